//! Per-activation branch tree of the instructions actually executed.
//!
//! The root segment holds the first path seen through the method. Revisiting a
//! recorded pc with a different event spawns a child segment anchored at that
//! pc's position; the child closes again once execution reaches a pc its
//! parent recorded identically. Branch targets stay symbolic until
//! [`TraceBuilder::flatten`] resolves them against the final buffers.

use std::collections::{BTreeMap, HashMap, HashSet};

pub const PAD_UNITS: usize = 8;
pub const OP_GOTO_32: u16 = 0x2A;
pub const OP_SPARSE_SWITCH: u16 = 0x2C;
pub const OP_RETURN_VOID: u16 = 0x0e;
pub const SWITCH_TABLE_MARKER: u16 = 0x0200;
pub const FILL_ARRAY_MARKER: u16 = 0x0300;
/// End offset of a child that never re-joined its parent.
pub const UNJOINED: u32 = u32::MAX;

const IF_UNITS: [u16; 8] = [0, 5, 0, 0, OP_RETURN_VOID, 0, 0, OP_RETURN_VOID];
const IF_TAKEN_SLOT: u32 = 5;
const IF_FALLTHROUGH_SLOT: u32 = 2;
const SWITCH_DEFAULT_SLOT: u32 = 3;

pub type SegmentId = usize;
const ROOT: SegmentId = 0;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FillArrayPayload {
    pub element_width: u16,
    pub element_count: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    /// Straight-line instruction units, already rewritten.
    Linear(Vec<u16>),
    Goto {
        target: u32,
    },
    If {
        inst: u16,
        taken: bool,
        target: u32,
    },
    /// `selector` is `None` when the switch fell through to its default.
    Switch {
        inst: u16,
        selector: Option<i32>,
        target: u32,
    },
    FillArray {
        inst: u16,
        payload: FillArrayPayload,
    },
}

impl TraceEvent {
    fn is_move_result(&self) -> bool {
        match self {
            TraceEvent::Linear(units) => units
                .first()
                .is_some_and(|unit| (0x0a..=0x0c).contains(&(unit & 0xff))),
            _ => false,
        }
    }

    fn direction(&self) -> Option<Direction> {
        match self {
            TraceEvent::If { taken: true, .. } => Some(Direction::Taken),
            TraceEvent::If { taken: false, .. } => Some(Direction::Fallthrough),
            TraceEvent::Switch { selector: None, .. } => Some(Direction::Default),
            TraceEvent::Switch {
                selector: Some(key),
                ..
            } => Some(Direction::Key(*key)),
            _ => None,
        }
    }

    fn branch_target(&self) -> Option<u32> {
        match self {
            TraceEvent::Goto { target }
            | TraceEvent::If { target, .. }
            | TraceEvent::Switch { target, .. } => Some(*target),
            TraceEvent::Linear(_) | TraceEvent::FillArray { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Direction {
    Taken,
    Fallthrough,
    Default,
    Key(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Position(u32),
    Pc(u32),
}

/// A goto whose offset is patched during flattening.
#[derive(Clone, Copy, Debug)]
struct Slot {
    at: u32,
    target: Target,
}

#[derive(Debug)]
struct Segment {
    parent: Option<SegmentId>,
    start: u32,
    end: Option<u32>,
    code: Vec<u16>,
    order: Vec<(u32, u32)>,
    index: HashMap<u32, u32>,
    cursor: Option<u32>,
    slots: Vec<Slot>,
    directions: HashMap<u32, HashSet<Direction>>,
    switch_tables: BTreeMap<u32, BTreeMap<i32, u32>>,
    fill_arrays: BTreeMap<u32, FillArrayPayload>,
    children: Vec<SegmentId>,
    origin: Option<TraceEvent>,
}

impl Segment {
    fn new(parent: Option<SegmentId>, start: u32, origin: Option<TraceEvent>) -> Self {
        Self {
            parent,
            start,
            end: None,
            code: Vec::new(),
            order: Vec::new(),
            index: HashMap::new(),
            cursor: None,
            slots: Vec::new(),
            directions: HashMap::new(),
            switch_tables: BTreeMap::new(),
            fill_arrays: BTreeMap::new(),
            children: Vec::new(),
            origin,
        }
    }

    fn len(&self) -> u32 {
        self.code.len() as u32
    }

    fn at_tail(&self) -> bool {
        self.cursor == Some(self.len())
    }

    fn matches(&self, pos: u32, pc: u32, event: &TraceEvent) -> bool {
        let pos = pos as usize;
        let head = self.code.get(pos).copied();
        let direction_seen = || {
            event.direction().is_some_and(|direction| {
                self.directions
                    .get(&pc)
                    .is_some_and(|seen| seen.contains(&direction))
            })
        };
        match event {
            TraceEvent::Linear(units) => {
                self.code.get(pos..pos + units.len()) == Some(units.as_slice())
            }
            TraceEvent::Goto { .. } => head == Some(OP_GOTO_32),
            TraceEvent::If { inst, .. } => head == Some(*inst) && direction_seen(),
            TraceEvent::Switch { inst, .. } => head == Some(switch_opcode(*inst)) && direction_seen(),
            TraceEvent::FillArray { inst, payload } => {
                head == Some(*inst) && self.fill_arrays.get(&pc) == Some(payload)
            }
        }
    }

    /// Where execution continues after the event recorded at `pos`.
    fn cursor_after(&self, pos: u32, event: &TraceEvent) -> Option<u32> {
        match event.branch_target() {
            Some(target) => self.index.get(&target).copied(),
            None => Some(pos),
        }
    }

    fn push_goto(&mut self, target: Target) {
        let at = self.len();
        self.code.extend_from_slice(&[OP_GOTO_32, 0, 0]);
        self.slots.push(Slot { at, target });
    }

    fn append(&mut self, pc: u32, event: TraceEvent) {
        self.end = None;
        if !event.is_move_result() {
            self.code.extend_from_slice(&[0; PAD_UNITS]);
        }
        let pos = self.len();
        self.order.push((pc, pos));
        self.index.entry(pc).or_insert(pos);
        if let Some(direction) = event.direction() {
            self.directions.entry(pc).or_default().insert(direction);
        }

        match event {
            TraceEvent::Linear(units) => {
                self.code.extend_from_slice(&units);
                self.cursor = Some(self.len());
            }
            TraceEvent::Goto { target } => {
                self.push_goto(Target::Pc(target));
                self.cursor = self.index.get(&target).copied();
            }
            TraceEvent::If { inst, taken, target } => {
                self.code.extend_from_slice(&IF_UNITS);
                self.code[pos as usize] = inst;
                let at = pos + if taken { IF_TAKEN_SLOT } else { IF_FALLTHROUGH_SLOT };
                self.code[at as usize] = OP_GOTO_32;
                self.slots.push(Slot {
                    at,
                    target: Target::Pc(target),
                });
                self.cursor = self.index.get(&target).copied();
            }
            TraceEvent::Switch {
                inst,
                selector,
                target,
            } => {
                self.code
                    .extend_from_slice(&[switch_opcode(inst), 0, 0, 0, 0, OP_RETURN_VOID]);
                let table = self.switch_tables.entry(pc).or_default();
                match selector {
                    Some(key) => {
                        table.insert(key, target);
                    }
                    None => {
                        let at = pos + SWITCH_DEFAULT_SLOT;
                        self.code[at as usize] = OP_GOTO_32;
                        self.slots.push(Slot {
                            at,
                            target: Target::Pc(target),
                        });
                    }
                }
                self.cursor = self.index.get(&target).copied();
            }
            TraceEvent::FillArray { inst, payload } => {
                self.code.extend_from_slice(&[inst, 0, 0]);
                self.fill_arrays.insert(pc, payload);
                self.cursor = Some(self.len());
            }
        }
    }

    fn resolve(&self, target: Target) -> u32 {
        match target {
            Target::Position(pos) => pos,
            Target::Pc(pc) => self.index.get(&pc).copied().unwrap_or(self.len()),
        }
    }
}

fn switch_opcode(inst: u16) -> u16 {
    OP_SPARSE_SWITCH | (inst & 0xff00)
}

#[derive(Debug)]
pub struct TraceBuilder {
    segments: Vec<Segment>,
    focus: SegmentId,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            segments: vec![Segment::new(None, 0, None)],
            focus: ROOT,
        }
    }

    pub fn record(&mut self, pc: u32, event: TraceEvent) {
        let id = self.focus;
        if event.is_move_result() {
            self.record_move_result(id, pc, event);
            return;
        }

        if let Some(pos) = self.segments[id].index.get(&pc).copied() {
            if self.segments[id].at_tail() {
                let segment = &mut self.segments[id];
                segment.code.extend_from_slice(&[0; PAD_UNITS]);
                segment.push_goto(Target::Position(pos));
                segment.cursor = Some(pos);
            }
            if self.segments[id].matches(pos, pc, &event) {
                let cursor = self.segments[id].cursor_after(pos, &event);
                self.segments[id].cursor = cursor;
            } else {
                self.diverge(id, pos, pc, event);
            }
            return;
        }

        if let Some(parent) = self.segments[id].parent
            && let Some(pos) = self.segments[parent].index.get(&pc).copied()
            && self.segments[parent].matches(pos, pc, &event)
        {
            self.segments[id].end = Some(pos);
            let cursor = self.segments[parent].cursor_after(pos, &event);
            self.segments[parent].cursor = cursor;
            self.focus = parent;
            return;
        }

        self.segments[id].append(pc, event);
    }

    /// move-result must stay adjacent to its invoke, so it is never padded or bridged.
    fn record_move_result(&mut self, id: SegmentId, pc: u32, event: TraceEvent) {
        let segment = &self.segments[id];
        let found = segment.index.get(&pc).copied();
        let at_tail = segment.at_tail();
        let matched = found.is_some_and(|pos| segment.matches(pos, pc, &event));
        match found {
            Some(_) if at_tail => self.segments[id].append(pc, event),
            Some(pos) if matched => self.segments[id].cursor = Some(pos),
            Some(pos) => self.diverge(id, pos, pc, event),
            None => self.segments[id].append(pc, event),
        }
    }

    fn diverge(&mut self, id: SegmentId, pos: u32, pc: u32, event: TraceEvent) {
        self.segments[id].cursor = Some(pos);
        let existing = self.segments[id].children.iter().copied().find(|child| {
            let child = &self.segments[*child];
            child.start == pos && child.origin.as_ref() == Some(&event)
        });
        if let Some(child) = existing {
            self.focus = child;
            self.segments[child].cursor = None;
            self.record(pc, event);
            return;
        }

        let child = self.segments.len();
        self.segments
            .push(Segment::new(Some(id), pos, Some(event.clone())));
        self.segments[id].children.push(child);
        self.focus = child;
        self.segments[child].append(pc, event);
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Nesting depth of the segment currently receiving events; the root is 0.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.segments[self.focus].parent;
        while let Some(parent) = current {
            depth += 1;
            current = self.segments[parent].parent;
        }
        depth
    }

    /// Serializes the whole tree, root first, children depth-first.
    pub fn flatten(&self) -> Vec<u16> {
        let mut out = Vec::new();
        self.flatten_segment(ROOT, &mut out);
        out
    }

    fn flatten_segment(&self, id: SegmentId, out: &mut Vec<u16>) {
        let segment = &self.segments[id];
        let end = match segment.parent {
            None => 0,
            Some(_) => segment.end.unwrap_or(UNJOINED),
        };
        push_u32(out, segment.start);
        push_u32(out, end);

        let mut code = segment.code.clone();
        for slot in &segment.slots {
            let relative = segment.resolve(slot.target).wrapping_sub(slot.at);
            let at = slot.at as usize;
            code[at + 1] = relative as u16;
            code[at + 2] = (relative >> 16) as u16;
        }
        push_u32(out, code.len() as u32);
        out.extend_from_slice(&code);

        push_u32(out, (segment.order.len() * 2) as u32);
        for (pc, pos) in &segment.order {
            push_u32(out, *pc);
            push_u32(out, *pos);
        }

        push_u32(out, segment.switch_tables.len() as u32);
        for (pc, table) in &segment.switch_tables {
            let pos = segment.resolve(Target::Pc(*pc));
            push_u32(out, pos);
            out.push(SWITCH_TABLE_MARKER);
            out.push(table.len() as u16);
            for key in table.keys() {
                push_u32(out, *key as u32);
            }
            for target in table.values() {
                push_u32(out, segment.resolve(Target::Pc(*target)).wrapping_sub(pos));
            }
        }

        push_u32(out, segment.fill_arrays.len() as u32);
        for (pc, payload) in &segment.fill_arrays {
            push_u32(out, segment.resolve(Target::Pc(*pc)));
            out.push(FILL_ARRAY_MARKER);
            out.push(payload.element_width);
            push_u32(out, payload.element_count);
            out.extend(
                payload
                    .data
                    .chunks(2)
                    .map(|pair| u16::from(pair[0]) | (u16::from(*pair.get(1).unwrap_or(&0)) << 8)),
            );
        }

        push_u32(out, segment.children.len() as u32);
        for child in &segment.children {
            self.flatten_segment(*child, out);
        }
    }
}

fn push_u32(out: &mut Vec<u16>, value: u32) {
    out.push(value as u16);
    out.push((value >> 16) as u16);
}
