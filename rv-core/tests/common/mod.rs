#![allow(dead_code, unused_imports)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub use revealer::{
    ClassDef, DecodedRecord, Dumper, DumperConfig, FieldId, Frame, MethodId, MethodInfo, ProtoId,
    SourceUnit, SymbolKind, SymbolRecord, decode_records,
};

pub const TEST_PID: u32 = 4242;
pub const TEST_PREFIX: &str = "000001";

#[derive(Debug, Clone, Default)]
pub struct FakeUnit {
    pub location: String,
    pub strings: Vec<String>,
    pub types: Vec<u32>,
    pub protos: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub class_defs: Vec<ClassDef>,
}

impl FakeUnit {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Self::default()
        }
    }

    pub fn add_string(&mut self, value: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|s| s == value) {
            return idx as u32;
        }
        self.strings.push(value.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn add_type(&mut self, descriptor: &str) -> u32 {
        let descriptor_idx = self.add_string(descriptor);
        if let Some(idx) = self.types.iter().position(|d| *d == descriptor_idx) {
            return idx as u32;
        }
        self.types.push(descriptor_idx);
        (self.types.len() - 1) as u32
    }

    pub fn add_proto(&mut self, shorty: &str, return_type: &str, params: &[&str]) -> u32 {
        let proto = ProtoId {
            shorty_idx: self.add_string(shorty),
            return_type_idx: self.add_type(return_type),
            parameters: params.iter().map(|param| self.add_type(param)).collect(),
        };
        self.protos.push(proto);
        (self.protos.len() - 1) as u32
    }

    pub fn add_field(&mut self, class: &str, ty: &str, name: &str) -> u32 {
        let field = FieldId {
            class_idx: self.add_type(class),
            type_idx: self.add_type(ty),
            name_idx: self.add_string(name),
        };
        self.fields.push(field);
        (self.fields.len() - 1) as u32
    }

    pub fn add_method(
        &mut self,
        class: &str,
        name: &str,
        shorty: &str,
        return_type: &str,
        params: &[&str],
    ) -> u32 {
        let method = MethodId {
            class_idx: self.add_type(class),
            proto_idx: self.add_proto(shorty, return_type, params),
            name_idx: self.add_string(name),
        };
        self.methods.push(method);
        (self.methods.len() - 1) as u32
    }

    pub fn add_class_def(&mut self, def: ClassDef) -> u32 {
        self.class_defs.push(def);
        (self.class_defs.len() - 1) as u32
    }
}

impl SourceUnit for FakeUnit {
    fn location(&self) -> &str {
        &self.location
    }

    fn string(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    fn type_descriptor_idx(&self, idx: u32) -> Option<u32> {
        self.types.get(idx as usize).copied()
    }

    fn field_id(&self, idx: u32) -> Option<FieldId> {
        self.fields.get(idx as usize).copied()
    }

    fn method_id(&self, idx: u32) -> Option<MethodId> {
        self.methods.get(idx as usize).copied()
    }

    fn proto_id(&self, idx: u32) -> Option<ProtoId> {
        self.protos.get(idx as usize).cloned()
    }

    fn class_def(&self, idx: u32) -> Option<ClassDef> {
        self.class_defs.get(idx as usize).cloned()
    }
}

#[derive(Debug, Default)]
pub struct FakeFrame {
    pub references: HashMap<u16, String>,
}

impl FakeFrame {
    pub fn with_reference(register: u16, descriptor: &str) -> Self {
        let mut references = HashMap::new();
        references.insert(register, descriptor.to_string());
        Self { references }
    }
}

impl Frame for FakeFrame {
    fn reference_descriptor(&self, register: u16) -> Option<String> {
        self.references.get(&register).cloned()
    }
}

pub fn test_config(package_dir: &Path) -> DumperConfig {
    DumperConfig {
        output_dir: package_dir.join("revealer"),
        package_dir: package_dir.to_path_buf(),
        pid: TEST_PID,
        random_prefix: Some(TEST_PREFIX.to_string()),
        write_records: true,
    }
}

pub fn start_dumper(package_dir: &Path) -> Arc<Dumper> {
    Dumper::start(test_config(package_dir)).expect("dumper start should succeed")
}

/// Flushes the writer and decodes one table file of `location`.
pub fn read_table(dumper: &Dumper, location: &str, kind: SymbolKind) -> Vec<DecodedRecord> {
    dumper.flush();
    let path = dumper.store().naming().path(location, kind);
    match std::fs::read(&path) {
        Ok(bytes) => decode_records(kind, &bytes).expect("table decode should succeed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(err) => panic!("reading {} failed: {err}", path.display()),
    }
}

/// `Foo.bar()V`, a static method with two registers.
pub fn foo_bar_unit() -> (FakeUnit, MethodInfo) {
    let mut unit = FakeUnit::new("/data/app/foo/base.apk");
    let method_idx = unit.add_method("LFoo;", "bar", "V", "V", &[]);
    let method = MethodInfo {
        method_idx,
        access_flags: revealer::source::ACC_STATIC,
        declaring_class_flags: 0x0001,
        registers: 2,
        ins: 0,
        outs: 0,
    };
    (unit, method)
}

pub fn units_at(code: &[u16], pos: u32, len: usize) -> &[u16] {
    &code[pos as usize..pos as usize + len]
}
