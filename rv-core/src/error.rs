use std::path::PathBuf;

use crate::records::SymbolKind;

pub type DumpResult<T> = Result<T, DumpError>;

#[derive(Debug)]
pub enum DumpError {
    MissingString(u32),
    MissingType(u32),
    MissingField(u32),
    MissingMethod(u32),
    MissingProto(u32),
    MissingClassDef(u32),
    IndexOverflow { kind: SymbolKind, index: u32 },
    MalformedStaticValues { class_def_idx: u32, offset: usize },
    UnsupportedValueType { class_def_idx: u32, value_type: u8 },
    Io { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for DumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpError::MissingString(idx) => write!(f, "source unit has no string {idx}"),
            DumpError::MissingType(idx) => write!(f, "source unit has no type {idx}"),
            DumpError::MissingField(idx) => write!(f, "source unit has no field {idx}"),
            DumpError::MissingMethod(idx) => write!(f, "source unit has no method {idx}"),
            DumpError::MissingProto(idx) => write!(f, "source unit has no proto {idx}"),
            DumpError::MissingClassDef(idx) => write!(f, "source unit has no class def {idx}"),
            DumpError::IndexOverflow { kind, index } => {
                write!(f, "{kind} index {index} does not fit in 16 bits")
            }
            DumpError::MalformedStaticValues {
                class_def_idx,
                offset,
            } => write!(
                f,
                "static values of class def {class_def_idx} are truncated at offset {offset}"
            ),
            DumpError::UnsupportedValueType {
                class_def_idx,
                value_type,
            } => write!(
                f,
                "static values of class def {class_def_idx} use unsupported value type 0x{value_type:02x}"
            ),
            DumpError::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for DumpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DumpError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
