//! Read-only view of the metadata a compilation unit exposes to the dumper.

pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_CONSTRUCTOR: u32 = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    pub class_idx: u32,
    pub type_idx: u32,
    pub name_idx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    pub class_idx: u32,
    pub proto_idx: u32,
    pub name_idx: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoId {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: Option<u32>,
    pub interfaces: Vec<u32>,
    pub source_file_idx: Option<u32>,
    /// Raw encoded array of static field initial values.
    pub static_values: Option<Vec<u8>>,
}

/// Indices are local to the unit; the dumper re-interns everything it persists.
pub trait SourceUnit {
    fn location(&self) -> &str;

    fn string(&self, idx: u32) -> Option<&str>;

    /// String index of the descriptor of type `idx`.
    fn type_descriptor_idx(&self, idx: u32) -> Option<u32>;

    fn field_id(&self, idx: u32) -> Option<FieldId>;

    fn method_id(&self, idx: u32) -> Option<MethodId>;

    fn proto_id(&self, idx: u32) -> Option<ProtoId>;

    fn class_def(&self, idx: u32) -> Option<ClassDef>;

    fn type_descriptor(&self, idx: u32) -> Option<&str> {
        self.string(self.type_descriptor_idx(idx)?)
    }
}

/// Register frame of the executing activation.
pub trait Frame {
    /// Descriptor of the runtime class of the object held in `register`.
    fn reference_descriptor(&self, register: u16) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub method_idx: u32,
    pub access_flags: u32,
    pub declaring_class_flags: u32,
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_direct(&self) -> bool {
        self.access_flags & (ACC_STATIC | ACC_PRIVATE | ACC_CONSTRUCTOR) != 0
    }

    pub fn declared_in_abstract_or_interface(&self) -> bool {
        self.declaring_class_flags & (ACC_ABSTRACT | ACC_INTERFACE) != 0
    }
}

/// Fully resolved identity of a method, as forced-branch rules spell it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub class: String,
    pub name: String,
    pub shorty: String,
    pub return_type: String,
    pub param_types: Vec<String>,
}

impl MethodSignature {
    pub fn resolve(unit: &dyn SourceUnit, method_idx: u32) -> Option<Self> {
        let method = unit.method_id(method_idx)?;
        let proto = unit.proto_id(method.proto_idx)?;
        let param_types = proto
            .parameters
            .iter()
            .map(|param| unit.type_descriptor(*param).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            class: unit.type_descriptor(method.class_idx)?.to_string(),
            name: unit.string(method.name_idx)?.to_string(),
            shorty: unit.string(proto.shorty_idx)?.to_string(),
            return_type: unit.type_descriptor(proto.return_type_idx)?.to_string(),
            param_types,
        })
    }
}

impl std::fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}({}){}",
            self.class,
            self.name,
            self.param_types.join(""),
            self.return_type
        )
    }
}
