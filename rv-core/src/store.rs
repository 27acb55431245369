use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::Rng;

use crate::records::{
    ClassRecord, CodeRecord, EncodedFieldRecord, EncodedMethodRecord, FieldRecord, MethodRecord,
    ProtoRecord, StaticValueRecord, StringRecord, Symbol, SymbolKind, TypeRecord, hash_str,
};
use crate::writer::{RecordWriter, WriteJob};

/// Derives `{pid}_{prefix}_{hash}_{tag}.dat` paths for one process.
#[derive(Debug, Clone)]
pub struct FileNaming {
    dir: PathBuf,
    pid: u32,
    prefix: String,
}

impl FileNaming {
    pub fn new(dir: impl Into<PathBuf>, pid: u32, prefix: Option<String>) -> Self {
        let prefix =
            prefix.unwrap_or_else(|| format!("{:06}", rand::thread_rng().gen_range(0..1_000_000)));
        Self {
            dir: dir.into(),
            pid,
            prefix,
        }
    }

    pub fn path(&self, location: &str, kind: SymbolKind) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}_{}.dat",
            self.pid,
            self.prefix,
            hash_str(location),
            kind.file_tag()
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

struct TableState<R> {
    buckets: HashMap<u64, Vec<(R, u32)>>,
    len: u32,
}

/// Append-only table assigning dense indices to distinct records.
pub struct InternTable<R: Symbol> {
    state: Mutex<TableState<R>>,
}

impl<R: Symbol> Default for InternTable<R> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TableState {
                buckets: HashMap::new(),
                len: 0,
            }),
        }
    }
}

impl<R: Symbol> InternTable<R> {
    /// Returns the record's index and, when it was not seen before, the record itself.
    pub fn intern(&self, record: R) -> (u32, Option<R>) {
        let hash = record.structural_hash();
        let mut state = self.state.lock();
        if let Some(index) = state.buckets.get(&hash).and_then(|bucket| {
            bucket
                .iter()
                .find(|(stored, _)| stored.same_identity(&record))
                .map(|(_, index)| *index)
        }) {
            return (index, None);
        }
        let index = state.len;
        state.len += 1;
        state
            .buckets
            .entry(hash)
            .or_default()
            .push((record.clone(), index));
        (index, Some(record))
    }

    pub fn lookup(&self, record: &R) -> Option<u32> {
        let state = self.state.lock();
        state.buckets.get(&record.structural_hash()).and_then(|bucket| {
            bucket
                .iter()
                .find(|(stored, _)| stored.same_identity(record))
                .map(|(_, index)| *index)
        })
    }

    pub fn len(&self) -> u32 {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct SymbolTables {
    pub strings: InternTable<StringRecord>,
    pub types: InternTable<TypeRecord>,
    pub protos: InternTable<ProtoRecord>,
    pub fields: InternTable<FieldRecord>,
    pub methods: InternTable<MethodRecord>,
    pub classes: InternTable<ClassRecord>,
    pub static_values: InternTable<StaticValueRecord>,
    pub encoded_fields: InternTable<EncodedFieldRecord>,
    pub encoded_methods: InternTable<EncodedMethodRecord>,
    pub code: InternTable<CodeRecord>,
}

/// Picks the table holding records of type `R`.
pub trait TableOf<R: Symbol> {
    fn table(&self) -> &InternTable<R>;
}

macro_rules! table_of {
    ($record:ty, $field:ident) => {
        impl TableOf<$record> for SymbolTables {
            fn table(&self) -> &InternTable<$record> {
                &self.$field
            }
        }
    };
}

table_of!(StringRecord, strings);
table_of!(TypeRecord, types);
table_of!(ProtoRecord, protos);
table_of!(FieldRecord, fields);
table_of!(MethodRecord, methods);
table_of!(ClassRecord, classes);
table_of!(StaticValueRecord, static_values);
table_of!(EncodedFieldRecord, encoded_fields);
table_of!(EncodedMethodRecord, encoded_methods);
table_of!(CodeRecord, code);

/// Process-wide interning store; first-seen records are handed to the writer.
pub struct SymbolStore {
    naming: FileNaming,
    tables: SymbolTables,
    writer: Option<RecordWriter>,
}

impl SymbolStore {
    pub fn new(naming: FileNaming, writer: Option<RecordWriter>) -> Self {
        Self {
            naming,
            tables: SymbolTables::default(),
            writer,
        }
    }

    pub fn intern<R>(&self, location: &str, record: R) -> u32
    where
        R: Symbol,
        SymbolTables: TableOf<R>,
    {
        let (index, fresh) = self.tables.table().intern(record);
        if let Some(record) = fresh
            && let Some(writer) = &self.writer
        {
            writer.submit(WriteJob {
                path: self.naming.path(location, R::KIND),
                index,
                record: record.into_record(),
            });
        }
        index
    }

    pub fn intern_string(&self, location: &str, value: &str) -> u32 {
        self.intern(location, StringRecord::new(value))
    }

    pub fn intern_type(&self, location: &str, descriptor: &str) -> u32 {
        let descriptor_idx = self.intern_string(location, descriptor);
        self.intern(location, TypeRecord { descriptor_idx })
    }

    pub fn tables(&self) -> &SymbolTables {
        &self.tables
    }

    pub fn naming(&self) -> &FileNaming {
        &self.naming
    }

    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush();
        }
    }

    pub fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            writer.shutdown();
        }
    }
}
