use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

pub const NO_INDEX: u32 = 0xFFFF_FFFF;
pub const NO_INDEX16: u16 = 0xFFFF;
pub const ACCESS_FLAGS_MASK: u32 = 0x3FFFF;

const HASH_SEED: u64 = 17;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolKind {
    String,
    Type,
    Proto,
    Field,
    Method,
    Class,
    StaticValue,
    EncodedField,
    EncodedMethod,
    Code,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 10] = [
        SymbolKind::String,
        SymbolKind::Type,
        SymbolKind::Proto,
        SymbolKind::Field,
        SymbolKind::Method,
        SymbolKind::Class,
        SymbolKind::StaticValue,
        SymbolKind::EncodedField,
        SymbolKind::EncodedMethod,
        SymbolKind::Code,
    ];

    pub fn file_tag(self) -> &'static str {
        match self {
            SymbolKind::String => "string",
            SymbolKind::Type => "type",
            SymbolKind::Proto => "proto",
            SymbolKind::Field => "field",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::StaticValue => "sv",
            SymbolKind::EncodedField => "ef",
            SymbolKind::EncodedMethod => "em",
            SymbolKind::Code => "code",
        }
    }

    pub fn from_file_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.file_tag() == tag)
    }

    /// Tables whose persisted records start with their own dense index.
    pub fn has_leading_index(self) -> bool {
        matches!(
            self,
            SymbolKind::String
                | SymbolKind::Type
                | SymbolKind::Proto
                | SymbolKind::Field
                | SymbolKind::Method
                | SymbolKind::Class
        )
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    UnexpectedEof { kind: SymbolKind, offset: usize },
    MissingTerminator { offset: usize },
    InvalidUtf8 { offset: usize },
    InvalidEncodedKind { kind: SymbolKind, value: u32 },
    UnknownFileTag(String),
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::UnexpectedEof { kind, offset } => {
                write!(f, "unexpected end of {kind} record data at offset {offset}")
            }
            RecordError::MissingTerminator { offset } => {
                write!(f, "string record at offset {offset} is missing its NUL terminator")
            }
            RecordError::InvalidUtf8 { offset } => {
                write!(f, "string record at offset {offset} is not valid utf-8")
            }
            RecordError::InvalidEncodedKind { kind, value } => {
                write!(f, "invalid {kind} kind tag {value}")
            }
            RecordError::UnknownFileTag(tag) => write!(f, "unknown record file tag '{tag}'"),
        }
    }
}

impl std::error::Error for RecordError {}

pub fn hash_int(value: u32) -> u32 {
    let mut x = value;
    x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    x = ((x >> 16) ^ x).wrapping_mul(0x45d9f3b);
    (x >> 16) ^ x
}

pub fn hash_str(value: &str) -> u64 {
    xxh3_64(value.as_bytes())
}

#[derive(Clone, Copy, Debug)]
struct StructuralHasher(u64);

impl StructuralHasher {
    fn new() -> Self {
        Self(HASH_SEED)
    }

    fn u32(self, value: u32) -> Self {
        Self(
            self.0
                .wrapping_mul(17)
                .wrapping_add(u64::from(hash_int(value))),
        )
    }

    fn u16(self, value: u16) -> Self {
        self.u32(u32::from(value))
    }

    fn str(self, value: &str) -> Self {
        self.u32(hash_str(value) as u32)
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// A table entry that can be interned and persisted.
pub trait Symbol: Clone + Send + 'static {
    const KIND: SymbolKind;

    fn structural_hash(&self) -> u64;

    /// Identity rule of the entity; may ignore attributes that are persisted but not identifying.
    fn same_identity(&self, other: &Self) -> bool;

    fn into_record(self) -> SymbolRecord;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringRecord {
    pub utf16_len: u32,
    pub value: String,
}

impl StringRecord {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let utf16_len = value.encode_utf16().count() as u32;
        Self { utf16_len, value }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeRecord {
    pub descriptor_idx: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtoRecord {
    pub shorty_idx: u32,
    pub return_type_idx: u16,
    pub param_types: Vec<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRecord {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MethodRecord {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassRecord {
    pub class_idx: u16,
    pub access_flags: u32,
    pub superclass_idx: u16,
    pub interfaces: Vec<u16>,
    pub source_file_idx: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticValueRecord {
    pub class_idx: u32,
    /// Field position to re-encoded value bytes (header byte included).
    pub values: BTreeMap<u32, Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Static = 0,
    Instance = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    Direct = 0,
    Virtual = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedFieldRecord {
    pub kind: FieldKind,
    pub field_idx: u32,
    pub access_flags: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodedMethodRecord {
    pub kind: MethodKind,
    pub method_idx: u32,
    pub access_flags: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeRecord {
    pub method_idx: u32,
    /// Runtime receiver class name for abstract/interface owners, `NO_INDEX` otherwise.
    pub class_name_idx: u32,
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub insns: Vec<u16>,
}

impl Symbol for StringRecord {
    const KIND: SymbolKind = SymbolKind::String;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new()
            .u32(self.utf16_len)
            .str(&self.value)
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::String(self)
    }
}

impl Symbol for TypeRecord {
    const KIND: SymbolKind = SymbolKind::Type;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new().u32(self.descriptor_idx).finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Type(self)
    }
}

impl Symbol for ProtoRecord {
    const KIND: SymbolKind = SymbolKind::Proto;

    fn structural_hash(&self) -> u64 {
        self.param_types
            .iter()
            .fold(
                StructuralHasher::new()
                    .u32(self.shorty_idx)
                    .u16(self.return_type_idx),
                |hasher, param| hasher.u16(*param),
            )
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Proto(self)
    }
}

impl Symbol for FieldRecord {
    const KIND: SymbolKind = SymbolKind::Field;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new()
            .u16(self.class_idx)
            .u16(self.type_idx)
            .u32(self.name_idx)
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Field(self)
    }
}

impl Symbol for MethodRecord {
    const KIND: SymbolKind = SymbolKind::Method;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new()
            .u16(self.class_idx)
            .u16(self.proto_idx)
            .u32(self.name_idx)
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Method(self)
    }
}

impl Symbol for ClassRecord {
    const KIND: SymbolKind = SymbolKind::Class;

    fn structural_hash(&self) -> u64 {
        self.interfaces
            .iter()
            .fold(
                StructuralHasher::new()
                    .u16(self.class_idx)
                    .u32(self.access_flags)
                    .u16(self.superclass_idx)
                    .u32(self.source_file_idx),
                |hasher, interface| hasher.u16(*interface),
            )
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Class(self)
    }
}

impl Symbol for StaticValueRecord {
    const KIND: SymbolKind = SymbolKind::StaticValue;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new().u32(self.class_idx).finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::StaticValue(self)
    }
}

impl Symbol for EncodedFieldRecord {
    const KIND: SymbolKind = SymbolKind::EncodedField;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new()
            .u32(self.kind as u32)
            .u32(self.field_idx)
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind && self.field_idx == other.field_idx
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::EncodedField(self)
    }
}

impl Symbol for EncodedMethodRecord {
    const KIND: SymbolKind = SymbolKind::EncodedMethod;

    fn structural_hash(&self) -> u64 {
        StructuralHasher::new()
            .u32(self.kind as u32)
            .u32(self.method_idx)
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.kind == other.kind && self.method_idx == other.method_idx
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::EncodedMethod(self)
    }
}

impl Symbol for CodeRecord {
    const KIND: SymbolKind = SymbolKind::Code;

    fn structural_hash(&self) -> u64 {
        self.insns
            .iter()
            .fold(
                StructuralHasher::new()
                    .u16(self.registers)
                    .u16(self.ins)
                    .u16(self.outs)
                    .u32(self.insns.len() as u32)
                    .u32(self.method_idx),
                |hasher, unit| hasher.u16(*unit),
            )
            .finish()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.method_idx == other.method_idx
            && self.registers == other.registers
            && self.ins == other.ins
            && self.outs == other.outs
            && self.insns == other.insns
    }

    fn into_record(self) -> SymbolRecord {
        SymbolRecord::Code(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SymbolRecord {
    String(StringRecord),
    Type(TypeRecord),
    Proto(ProtoRecord),
    Field(FieldRecord),
    Method(MethodRecord),
    Class(ClassRecord),
    StaticValue(StaticValueRecord),
    EncodedField(EncodedFieldRecord),
    EncodedMethod(EncodedMethodRecord),
    Code(CodeRecord),
}

impl SymbolRecord {
    pub fn kind(&self) -> SymbolKind {
        match self {
            SymbolRecord::String(_) => SymbolKind::String,
            SymbolRecord::Type(_) => SymbolKind::Type,
            SymbolRecord::Proto(_) => SymbolKind::Proto,
            SymbolRecord::Field(_) => SymbolKind::Field,
            SymbolRecord::Method(_) => SymbolKind::Method,
            SymbolRecord::Class(_) => SymbolKind::Class,
            SymbolRecord::StaticValue(_) => SymbolKind::StaticValue,
            SymbolRecord::EncodedField(_) => SymbolKind::EncodedField,
            SymbolRecord::EncodedMethod(_) => SymbolKind::EncodedMethod,
            SymbolRecord::Code(_) => SymbolKind::Code,
        }
    }

    /// Appends the fixed little-endian layout of this record.
    pub fn encode(&self, index: u32, out: &mut Vec<u8>) {
        match self {
            SymbolRecord::String(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.utf16_len.to_le_bytes());
                out.extend_from_slice(record.value.as_bytes());
                out.push(0);
            }
            SymbolRecord::Type(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.descriptor_idx.to_le_bytes());
            }
            SymbolRecord::Proto(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.shorty_idx.to_le_bytes());
                out.extend_from_slice(&record.return_type_idx.to_le_bytes());
                out.extend_from_slice(&(record.param_types.len() as u32).to_le_bytes());
                for param in &record.param_types {
                    out.extend_from_slice(&param.to_le_bytes());
                }
            }
            SymbolRecord::Field(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.class_idx.to_le_bytes());
                out.extend_from_slice(&record.type_idx.to_le_bytes());
                out.extend_from_slice(&record.name_idx.to_le_bytes());
            }
            SymbolRecord::Method(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.class_idx.to_le_bytes());
                out.extend_from_slice(&record.proto_idx.to_le_bytes());
                out.extend_from_slice(&record.name_idx.to_le_bytes());
            }
            SymbolRecord::Class(record) => {
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(&record.class_idx.to_le_bytes());
                out.extend_from_slice(&record.access_flags.to_le_bytes());
                out.extend_from_slice(&record.superclass_idx.to_le_bytes());
                out.extend_from_slice(&(record.interfaces.len() as u32).to_le_bytes());
                for interface in &record.interfaces {
                    out.extend_from_slice(&interface.to_le_bytes());
                }
                out.extend_from_slice(&record.source_file_idx.to_le_bytes());
            }
            SymbolRecord::StaticValue(record) => {
                out.extend_from_slice(&record.class_idx.to_le_bytes());
                out.extend_from_slice(&(record.values.len() as u32).to_le_bytes());
                for (position, bytes) in &record.values {
                    out.extend_from_slice(&position.to_le_bytes());
                    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
                    out.extend_from_slice(bytes);
                }
            }
            SymbolRecord::EncodedField(record) => {
                out.extend_from_slice(&(record.kind as u32).to_le_bytes());
                out.extend_from_slice(&record.field_idx.to_le_bytes());
                out.extend_from_slice(&record.access_flags.to_le_bytes());
            }
            SymbolRecord::EncodedMethod(record) => {
                out.extend_from_slice(&(record.kind as u32).to_le_bytes());
                out.extend_from_slice(&record.method_idx.to_le_bytes());
                out.extend_from_slice(&record.access_flags.to_le_bytes());
            }
            SymbolRecord::Code(record) => {
                out.extend_from_slice(&record.method_idx.to_le_bytes());
                out.extend_from_slice(&record.class_name_idx.to_le_bytes());
                out.extend_from_slice(&record.registers.to_le_bytes());
                out.extend_from_slice(&record.ins.to_le_bytes());
                out.extend_from_slice(&record.outs.to_le_bytes());
                out.extend_from_slice(&(record.insns.len() as u32).to_le_bytes());
                for unit in &record.insns {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedRecord {
    /// Leading dense index, for tables that persist one.
    pub index: Option<u32>,
    pub record: SymbolRecord,
}

/// Reads back every record appended to a table file.
pub fn decode_records(kind: SymbolKind, bytes: &[u8]) -> Result<Vec<DecodedRecord>, RecordError> {
    let mut cursor = Cursor::new(kind, bytes);
    let mut out = Vec::new();
    while !cursor.is_eof() {
        let index = if kind.has_leading_index() {
            Some(cursor.read_u32()?)
        } else {
            None
        };
        let record = match kind {
            SymbolKind::String => {
                let utf16_len = cursor.read_u32()?;
                let value = cursor.read_c_string()?;
                SymbolRecord::String(StringRecord { utf16_len, value })
            }
            SymbolKind::Type => SymbolRecord::Type(TypeRecord {
                descriptor_idx: cursor.read_u32()?,
            }),
            SymbolKind::Proto => {
                let shorty_idx = cursor.read_u32()?;
                let return_type_idx = cursor.read_u16()?;
                let count = cursor.read_u32()?;
                let param_types = (0..count)
                    .map(|_| cursor.read_u16())
                    .collect::<Result<Vec<_>, _>>()?;
                SymbolRecord::Proto(ProtoRecord {
                    shorty_idx,
                    return_type_idx,
                    param_types,
                })
            }
            SymbolKind::Field => SymbolRecord::Field(FieldRecord {
                class_idx: cursor.read_u16()?,
                type_idx: cursor.read_u16()?,
                name_idx: cursor.read_u32()?,
            }),
            SymbolKind::Method => SymbolRecord::Method(MethodRecord {
                class_idx: cursor.read_u16()?,
                proto_idx: cursor.read_u16()?,
                name_idx: cursor.read_u32()?,
            }),
            SymbolKind::Class => {
                let class_idx = cursor.read_u16()?;
                let access_flags = cursor.read_u32()?;
                let superclass_idx = cursor.read_u16()?;
                let count = cursor.read_u32()?;
                let interfaces = (0..count)
                    .map(|_| cursor.read_u16())
                    .collect::<Result<Vec<_>, _>>()?;
                let source_file_idx = cursor.read_u32()?;
                SymbolRecord::Class(ClassRecord {
                    class_idx,
                    access_flags,
                    superclass_idx,
                    interfaces,
                    source_file_idx,
                })
            }
            SymbolKind::StaticValue => {
                let class_idx = cursor.read_u32()?;
                let count = cursor.read_u32()?;
                let mut values = BTreeMap::new();
                for _ in 0..count {
                    let position = cursor.read_u32()?;
                    let size = cursor.read_u16()?;
                    values.insert(position, cursor.read_exact(usize::from(size))?.to_vec());
                }
                SymbolRecord::StaticValue(StaticValueRecord { class_idx, values })
            }
            SymbolKind::EncodedField => {
                let raw = cursor.read_u32()?;
                let kind = match raw {
                    0 => FieldKind::Static,
                    1 => FieldKind::Instance,
                    other => {
                        return Err(RecordError::InvalidEncodedKind { kind, value: other });
                    }
                };
                SymbolRecord::EncodedField(EncodedFieldRecord {
                    kind,
                    field_idx: cursor.read_u32()?,
                    access_flags: cursor.read_u32()?,
                })
            }
            SymbolKind::EncodedMethod => {
                let raw = cursor.read_u32()?;
                let kind = match raw {
                    0 => MethodKind::Direct,
                    1 => MethodKind::Virtual,
                    other => {
                        return Err(RecordError::InvalidEncodedKind { kind, value: other });
                    }
                };
                SymbolRecord::EncodedMethod(EncodedMethodRecord {
                    kind,
                    method_idx: cursor.read_u32()?,
                    access_flags: cursor.read_u32()?,
                })
            }
            SymbolKind::Code => {
                let method_idx = cursor.read_u32()?;
                let class_name_idx = cursor.read_u32()?;
                let registers = cursor.read_u16()?;
                let ins = cursor.read_u16()?;
                let outs = cursor.read_u16()?;
                let count = cursor.read_u32()?;
                let insns = (0..count)
                    .map(|_| cursor.read_u16())
                    .collect::<Result<Vec<_>, _>>()?;
                SymbolRecord::Code(CodeRecord {
                    method_idx,
                    class_name_idx,
                    registers,
                    ins,
                    outs,
                    insns,
                })
            }
        };
        out.push(DecodedRecord { index, record });
    }
    Ok(out)
}

/// Splits a `{pid}_{prefix}_{hash}_{tag}.dat` file name into its table kind.
pub fn kind_from_file_name(name: &str) -> Result<SymbolKind, RecordError> {
    let stem = name.strip_suffix(".dat").unwrap_or(name);
    let tag = stem.rsplit('_').next().unwrap_or(stem);
    SymbolKind::from_file_tag(tag).ok_or_else(|| RecordError::UnknownFileTag(tag.to_string()))
}

struct Cursor<'a> {
    kind: SymbolKind,
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(kind: SymbolKind, bytes: &'a [u8]) -> Self {
        Self {
            kind,
            bytes,
            offset: 0,
        }
    }

    fn read_u16(&mut self) -> Result<u16, RecordError> {
        let bytes = self.read_exact(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, RecordError> {
        let bytes = self.read_exact(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_c_string(&mut self) -> Result<String, RecordError> {
        let start = self.offset;
        let rest = &self.bytes[start..];
        let len = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(RecordError::MissingTerminator { offset: start })?;
        let value = std::str::from_utf8(&rest[..len])
            .map_err(|_| RecordError::InvalidUtf8 { offset: start })?
            .to_string();
        self.offset = start + len + 1;
        Ok(value)
    }

    fn read_exact(&mut self, len: usize) -> Result<&'a [u8], RecordError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(RecordError::UnexpectedEof {
                kind: self.kind,
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn is_eof(&self) -> bool {
        self.offset >= self.bytes.len()
    }
}
