pub mod derive;
pub mod dumper;
pub mod error;
pub mod filter;
pub mod flat;
pub mod force_branch;
pub mod hooks;
pub mod records;
pub mod rewrite;
pub mod source;
pub mod store;
pub mod trace;
pub mod writer;

pub use derive::ImplicitMethod;
pub use dumper::{Dumper, DumperConfig, FORCE_BRANCHES_FILE, OUTPUT_DIR_NAME};
pub use error::{DumpError, DumpResult};
pub use filter::{CLASS_FILTER_FILE, ClassFilter, INCLUDED_CLASS_FILE};
pub use flat::{FlatFillArray, FlatSegment, FlatSwitchTable, FlatTraceError, parse_flat};
pub use force_branch::{ForceBranchController, ForceBranchRule, RuleError, parse_rule, parse_rules};
pub use hooks::MethodTracer;
pub use records::{
    ClassRecord, CodeRecord, DecodedRecord, EncodedFieldRecord, EncodedMethodRecord, FieldKind,
    FieldRecord, MethodKind, MethodRecord, NO_INDEX, NO_INDEX16, ProtoRecord, RecordError,
    StaticValueRecord, StringRecord, Symbol, SymbolKind, SymbolRecord, TypeRecord,
    decode_records, kind_from_file_name,
};
pub use rewrite::{FieldAccess, InvokeForm};
pub use source::{
    ClassDef, FieldId, Frame, MethodId, MethodInfo, MethodSignature, ProtoId, SourceUnit,
};
pub use store::{FileNaming, InternTable, SymbolStore, SymbolTables, TableOf};
pub use trace::{FillArrayPayload, TraceBuilder, TraceEvent};
pub use writer::{RecordWriter, WriteJob};
