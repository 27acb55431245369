//! Human and JSON views of persisted table files.

use std::path::{Path, PathBuf};

use revealer::{
    DecodedRecord, FlatSegment, NO_INDEX, NO_INDEX16, RuleError, SymbolKind, SymbolRecord,
    decode_records, kind_from_file_name, parse_flat, parse_rules,
};
use serde::Serialize;
use serde_json::json;

use crate::config::{AgentError, io_error};
use crate::logging;

#[derive(Debug, Clone)]
pub struct Inspection {
    pub path: PathBuf,
    pub kind: SymbolKind,
    pub records: Vec<DecodedRecord>,
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub table: &'static str,
    pub fields: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<SegmentView>,
}

#[derive(Debug, Serialize)]
pub struct SegmentView {
    pub start: u32,
    /// `None` for a segment that never re-joined its parent.
    pub end: Option<u32>,
    pub units: usize,
    pub positions: Vec<(u32, u32)>,
    pub switch_tables: usize,
    pub fill_arrays: usize,
    pub children: Vec<SegmentView>,
}

impl From<&FlatSegment> for SegmentView {
    fn from(segment: &FlatSegment) -> Self {
        Self {
            start: segment.start,
            end: segment.is_joined().then_some(segment.end),
            units: segment.code.len(),
            positions: segment.positions.clone(),
            switch_tables: segment.switch_tables.len(),
            fill_arrays: segment.fill_arrays.len(),
            children: segment.children.iter().map(SegmentView::from).collect(),
        }
    }
}

/// Decodes a `.dat` file; the table comes from the tag in its name.
pub fn inspect_file(path: &Path) -> Result<Inspection, AgentError> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AgentError::Config(format!("not a table file: {}", path.display())))?;
    let kind = kind_from_file_name(name).map_err(|source| AgentError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = std::fs::read(path).map_err(io_error(path))?;
    let records = decode_records(kind, &bytes).map_err(|source| AgentError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Inspection {
        path: path.to_path_buf(),
        kind,
        records,
    })
}

pub fn record_view(decoded: &DecodedRecord) -> RecordView {
    let mut trace = None;
    let fields = match &decoded.record {
        SymbolRecord::String(record) => json!({
            "value": record.value,
            "utf16_len": record.utf16_len,
        }),
        SymbolRecord::Type(record) => json!({ "descriptor": record.descriptor_idx }),
        SymbolRecord::Proto(record) => json!({
            "shorty": record.shorty_idx,
            "return_type": record.return_type_idx,
            "params": record.param_types,
        }),
        SymbolRecord::Field(record) => json!({
            "class": record.class_idx,
            "type": record.type_idx,
            "name": record.name_idx,
        }),
        SymbolRecord::Method(record) => json!({
            "class": record.class_idx,
            "proto": record.proto_idx,
            "name": record.name_idx,
        }),
        SymbolRecord::Class(record) => json!({
            "class": record.class_idx,
            "access_flags": record.access_flags,
            "superclass": (record.superclass_idx != NO_INDEX16).then_some(record.superclass_idx),
            "interfaces": record.interfaces,
            "source_file": optional(record.source_file_idx),
        }),
        SymbolRecord::StaticValue(record) => {
            let values: serde_json::Map<String, serde_json::Value> = record
                .values
                .iter()
                .map(|(position, bytes)| (position.to_string(), json!(hex(bytes))))
                .collect();
            json!({ "class": record.class_idx, "values": values })
        }
        SymbolRecord::EncodedField(record) => json!({
            "kind": format!("{:?}", record.kind).to_lowercase(),
            "field": record.field_idx,
            "access_flags": record.access_flags,
        }),
        SymbolRecord::EncodedMethod(record) => json!({
            "kind": format!("{:?}", record.kind).to_lowercase(),
            "method": record.method_idx,
            "access_flags": record.access_flags,
        }),
        SymbolRecord::Code(record) => {
            trace = parse_flat(&record.insns)
                .ok()
                .map(|root| SegmentView::from(&root));
            json!({
                "method": record.method_idx,
                "class_name": optional(record.class_name_idx),
                "registers": record.registers,
                "ins": record.ins,
                "outs": record.outs,
                "units": record.insns.len(),
            })
        }
    };
    RecordView {
        index: decoded.index,
        table: decoded.record.kind().file_tag(),
        fields,
        trace,
    }
}

pub fn render_json(inspection: &Inspection) -> Result<String, AgentError> {
    let views: Vec<RecordView> = inspection.records.iter().map(record_view).collect();
    Ok(serde_json::to_string_pretty(&views)?)
}

/// One line per record; code records are followed by their indented segment tree.
pub fn render_text(inspection: &Inspection) -> String {
    let mut out = format!(
        "{} {} ({} records)\n",
        logging::table_label(inspection.kind.file_tag()),
        inspection.path.display(),
        inspection.records.len()
    );
    for (position, decoded) in inspection.records.iter().enumerate() {
        let index = decoded.index.map_or_else(|| format!("#{position}"), |i| i.to_string());
        out.push_str(&format!("{index:>8}  {}\n", summary(&decoded.record)));
        if let SymbolRecord::Code(code) = &decoded.record {
            match parse_flat(&code.insns) {
                Ok(root) => {
                    for line in root.render().lines() {
                        out.push_str(&format!("          {line}\n"));
                    }
                }
                Err(err) => out.push_str(&format!("          {}\n", AgentError::Trace(err))),
            }
        }
    }
    out
}

/// Outcome of validating a forced-branch file.
#[derive(Debug)]
pub struct RulesReport {
    pub accepted: Vec<(usize, String)>,
    pub rejected: Vec<(usize, RuleError)>,
}

impl RulesReport {
    pub fn render(&self) -> String {
        let mut lines: Vec<(usize, String)> = self
            .accepted
            .iter()
            .map(|(line_no, rule)| {
                (*line_no, format!("{line_no:>4}  {}  {rule}", logging::verdict_label(true)))
            })
            .chain(self.rejected.iter().map(|(line_no, err)| {
                (*line_no, format!("{line_no:>4}  {}  {err}", logging::verdict_label(false)))
            }))
            .collect();
        lines.sort_by_key(|(line_no, _)| *line_no);
        let mut out: String = lines.into_iter().map(|(_, line)| line + "\n").collect();
        out.push_str(&format!(
            "{} accepted, {} rejected\n",
            self.accepted.len(),
            self.rejected.len()
        ));
        out
    }
}

pub fn check_rules(text: &str) -> RulesReport {
    let (rules, rejected) = parse_rules(text);
    let rejected_lines: Vec<usize> = rejected.iter().map(|(line_no, _)| *line_no).collect();
    let accepted_lines = (1..).filter(|line_no| !rejected_lines.contains(line_no));
    RulesReport {
        accepted: accepted_lines
            .zip(rules.iter().map(ToString::to_string))
            .collect(),
        rejected,
    }
}

fn summary(record: &SymbolRecord) -> String {
    match record {
        SymbolRecord::String(record) => format!("{:?} utf16={}", record.value, record.utf16_len),
        SymbolRecord::Type(record) => format!("descriptor={}", record.descriptor_idx),
        SymbolRecord::Proto(record) => format!(
            "shorty={} return={} params={:?}",
            record.shorty_idx, record.return_type_idx, record.param_types
        ),
        SymbolRecord::Field(record) => format!(
            "class={} type={} name={}",
            record.class_idx, record.type_idx, record.name_idx
        ),
        SymbolRecord::Method(record) => format!(
            "class={} proto={} name={}",
            record.class_idx, record.proto_idx, record.name_idx
        ),
        SymbolRecord::Class(record) => format!(
            "class={} flags=0x{:x} super={} interfaces={:?} source={}",
            record.class_idx,
            record.access_flags,
            if record.superclass_idx == NO_INDEX16 {
                "-".to_string()
            } else {
                record.superclass_idx.to_string()
            },
            record.interfaces,
            index_text(record.source_file_idx)
        ),
        SymbolRecord::StaticValue(record) => {
            let values: Vec<String> = record
                .values
                .iter()
                .map(|(position, bytes)| format!("{position}:{}", hex(bytes)))
                .collect();
            format!("class={} values=[{}]", record.class_idx, values.join(" "))
        }
        SymbolRecord::EncodedField(record) => format!(
            "{:?} field={} flags=0x{:x}",
            record.kind, record.field_idx, record.access_flags
        ),
        SymbolRecord::EncodedMethod(record) => format!(
            "{:?} method={} flags=0x{:x}",
            record.kind, record.method_idx, record.access_flags
        ),
        SymbolRecord::Code(record) => format!(
            "method={} class_name={} registers={} ins={} outs={} units={}",
            record.method_idx,
            index_text(record.class_name_idx),
            record.registers,
            record.ins,
            record.outs,
            record.insns.len()
        ),
    }
}

fn optional(index: u32) -> Option<u32> {
    (index != NO_INDEX).then_some(index)
}

fn index_text(index: u32) -> String {
    optional(index).map_or_else(|| "-".to_string(), |index| index.to_string())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
