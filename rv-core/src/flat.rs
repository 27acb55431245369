use crate::trace::{FILL_ARRAY_MARKER, SWITCH_TABLE_MARKER, UNJOINED};

/// Deepest child nesting a flattened trace may declare.
pub const MAX_SEGMENT_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatTraceError {
    Truncated { offset: usize },
    BadMarker { offset: usize, expected: u16, found: u16 },
    OddPositionMap { offset: usize, size: u32 },
    TrailingUnits { offset: usize },
    TooDeep { offset: usize },
}

impl std::fmt::Display for FlatTraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlatTraceError::Truncated { offset } => {
                write!(f, "flattened trace truncated at unit {offset}")
            }
            FlatTraceError::BadMarker {
                offset,
                expected,
                found,
            } => write!(
                f,
                "expected table marker 0x{expected:04x} at unit {offset}, found 0x{found:04x}"
            ),
            FlatTraceError::OddPositionMap { offset, size } => {
                write!(f, "position map at unit {offset} has odd size {size}")
            }
            FlatTraceError::TrailingUnits { offset } => {
                write!(f, "unexpected units after the root segment at unit {offset}")
            }
            FlatTraceError::TooDeep { offset } => write!(
                f,
                "segment at unit {offset} nests deeper than {MAX_SEGMENT_DEPTH} levels"
            ),
        }
    }
}

impl std::error::Error for FlatTraceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSwitchTable {
    pub position: u32,
    pub keys: Vec<i32>,
    /// Relative to `position`.
    pub targets: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatFillArray {
    pub position: u32,
    pub element_width: u16,
    pub element_count: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatSegment {
    pub start: u32,
    pub end: u32,
    pub code: Vec<u16>,
    pub positions: Vec<(u32, u32)>,
    pub switch_tables: Vec<FlatSwitchTable>,
    pub fill_arrays: Vec<FlatFillArray>,
    pub children: Vec<FlatSegment>,
}

impl FlatSegment {
    /// First buffer position recorded for `pc`.
    pub fn position_of(&self, pc: u32) -> Option<u32> {
        self.positions
            .iter()
            .find(|(recorded, _)| *recorded == pc)
            .map(|(_, pos)| *pos)
    }

    pub fn is_joined(&self) -> bool {
        self.end != UNJOINED
    }

    pub fn segment_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(FlatSegment::segment_count)
            .sum::<usize>()
    }

    /// Renders the tree as indented text, one segment header per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(0, &mut out);
        out
    }

    fn render_into(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let end = if self.is_joined() {
            self.end.to_string()
        } else {
            "-".to_string()
        };
        out.push_str(&format!(
            "{indent}segment start={} end={} units={} children={}\n",
            self.start,
            end,
            self.code.len(),
            self.children.len()
        ));
        for (pc, pos) in &self.positions {
            let units = self
                .code
                .get(*pos as usize..)
                .and_then(|rest| rest.first())
                .map(|unit| format!("{unit:04x}"))
                .unwrap_or_else(|| "----".to_string());
            out.push_str(&format!("{indent}  pc {pc:>4} @ {pos:>4}  {units}\n"));
        }
        for table in &self.switch_tables {
            out.push_str(&format!(
                "{indent}  switch @ {} keys={:?} targets={:?}\n",
                table.position, table.keys, table.targets
            ));
        }
        for fill in &self.fill_arrays {
            out.push_str(&format!(
                "{indent}  fill-array @ {} width={} count={}\n",
                fill.position, fill.element_width, fill.element_count
            ));
        }
        for child in &self.children {
            child.render_into(depth + 1, out);
        }
    }
}

pub fn parse_flat(units: &[u16]) -> Result<FlatSegment, FlatTraceError> {
    let mut reader = Reader { units, offset: 0 };
    let root = reader.segment(0)?;
    if reader.offset != units.len() {
        return Err(FlatTraceError::TrailingUnits {
            offset: reader.offset,
        });
    }
    Ok(root)
}

struct Reader<'a> {
    units: &'a [u16],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn segment(&mut self, depth: usize) -> Result<FlatSegment, FlatTraceError> {
        if depth > MAX_SEGMENT_DEPTH {
            return Err(FlatTraceError::TooDeep {
                offset: self.offset,
            });
        }
        let start = self.read_u32()?;
        let end = self.read_u32()?;
        let len = self.read_u32()? as usize;
        let code = self.read_units(len)?.to_vec();

        let map_offset = self.offset;
        let map_size = self.read_u32()?;
        if map_size % 2 != 0 {
            return Err(FlatTraceError::OddPositionMap {
                offset: map_offset,
                size: map_size,
            });
        }
        let positions = (0..map_size / 2)
            .map(|_| -> Result<(u32, u32), FlatTraceError> {
                Ok((self.read_u32()?, self.read_u32()?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let table_count = self.read_u32()?;
        let mut switch_tables = Vec::new();
        for _ in 0..table_count {
            let position = self.read_u32()?;
            self.expect_marker(SWITCH_TABLE_MARKER)?;
            let size = self.read_u16()?;
            let keys = (0..size)
                .map(|_| self.read_u32().map(|key| key as i32))
                .collect::<Result<Vec<_>, _>>()?;
            let targets = (0..size)
                .map(|_| self.read_u32().map(|target| target as i32))
                .collect::<Result<Vec<_>, _>>()?;
            switch_tables.push(FlatSwitchTable {
                position,
                keys,
                targets,
            });
        }

        let fill_count = self.read_u32()?;
        let mut fill_arrays = Vec::new();
        for _ in 0..fill_count {
            let position = self.read_u32()?;
            self.expect_marker(FILL_ARRAY_MARKER)?;
            let element_width = self.read_u16()?;
            let element_count = self.read_u32()?;
            let byte_len = usize::from(element_width) * element_count as usize;
            let packed = self.read_units(byte_len.div_ceil(2))?;
            let mut data: Vec<u8> = packed.iter().flat_map(|unit| unit.to_le_bytes()).collect();
            data.truncate(byte_len);
            fill_arrays.push(FlatFillArray {
                position,
                element_width,
                element_count,
                data,
            });
        }

        let child_count = self.read_u32()?;
        let children = (0..child_count)
            .map(|_| self.segment(depth + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FlatSegment {
            start,
            end,
            code,
            positions,
            switch_tables,
            fill_arrays,
            children,
        })
    }

    fn expect_marker(&mut self, expected: u16) -> Result<(), FlatTraceError> {
        let offset = self.offset;
        let found = self.read_u16()?;
        if found != expected {
            return Err(FlatTraceError::BadMarker {
                offset,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16, FlatTraceError> {
        Ok(self.read_units(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, FlatTraceError> {
        let units = self.read_units(2)?;
        Ok(u32::from(units[0]) | (u32::from(units[1]) << 16))
    }

    fn read_units(&mut self, len: usize) -> Result<&'a [u16], FlatTraceError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.units.len())
            .ok_or(FlatTraceError::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.units[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}
