mod common;

use common::*;
use revealer::source::{ACC_ABSTRACT, ACC_STATIC};
use revealer::{
    ClassRecord, DumpError, EncodedFieldRecord, FieldKind, NO_INDEX, NO_INDEX16, StaticValueRecord,
};

fn class_unit(static_values: Option<Vec<u8>>) -> (FakeUnit, u32) {
    let mut unit = FakeUnit::new("classes.dex");
    let class_idx = unit.add_type("Lcom/example/Config;");
    let interface = unit.add_type("Ljava/lang/Runnable;");
    let def = ClassDef {
        class_idx,
        access_flags: 0x8000_0011,
        superclass_idx: None,
        interfaces: vec![interface],
        source_file_idx: None,
        static_values,
    };
    let def_idx = unit.add_class_def(def);
    (unit, def_idx)
}

#[test]
fn class_def_masks_flags_and_marks_missing_references() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let (unit, def_idx) = class_unit(None);

    let index = dumper
        .store()
        .class_from_unit(&unit, def_idx)
        .expect("class intern should succeed");
    assert_eq!(index, 0);

    let classes = read_table(&dumper, "classes.dex", SymbolKind::Class);
    assert_eq!(classes.len(), 1);
    let SymbolRecord::Class(ClassRecord {
        access_flags,
        superclass_idx,
        interfaces,
        source_file_idx,
        ..
    }) = &classes[0].record
    else {
        panic!("class table holds only class records");
    };
    assert_eq!(*access_flags, 0x11);
    assert_eq!(*superclass_idx, NO_INDEX16);
    assert_eq!(interfaces.len(), 1);
    assert_eq!(*source_file_idx, NO_INDEX);
    dumper.shutdown();
}

#[test]
fn static_values_reintern_symbol_values_and_copy_the_rest() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let mut unit = FakeUnit::new("classes.dex");
    unit.add_string("padding");
    let greeting = unit.add_string("greeting");
    let array = vec![
        4,
        0x24,
        0x34,
        0x12,
        0x17,
        greeting as u8,
        0x1e,
        0x3f,
    ];
    let class_idx = unit.add_type("Lcom/example/Config;");
    let def_idx = unit.add_class_def(ClassDef {
        class_idx,
        access_flags: 0x1,
        superclass_idx: None,
        interfaces: Vec::new(),
        source_file_idx: None,
        static_values: Some(array),
    });

    let index = dumper
        .store()
        .static_values_from_unit(&unit, def_idx)
        .expect("static values should succeed");
    assert_eq!(index, 0);

    let greeting_idx = dumper.store().intern_string("classes.dex", "greeting");
    let records = read_table(&dumper, "classes.dex", SymbolKind::StaticValue);
    let SymbolRecord::StaticValue(StaticValueRecord { class_idx, values }) = &records[0].record
    else {
        panic!("sv table holds only static value records");
    };
    assert_eq!(*class_idx, 0);
    assert_eq!(values.len(), 4);
    assert_eq!(values[&0], vec![0x24, 0x34, 0x12]);
    let mut expected_string = vec![0x77];
    expected_string.extend_from_slice(&greeting_idx.to_le_bytes());
    assert_eq!(values[&1], expected_string);
    assert_eq!(values[&2], vec![0x1e]);
    assert_eq!(values[&3], vec![0x3f]);
    dumper.shutdown();
}

#[test]
fn class_without_static_values_reports_no_index() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let (unit, def_idx) = class_unit(None);

    let index = dumper
        .store()
        .static_values_from_unit(&unit, def_idx)
        .expect("static values should succeed");
    assert_eq!(index, NO_INDEX);
    assert!(read_table(&dumper, "classes.dex", SymbolKind::StaticValue).is_empty());
    dumper.shutdown();
}

#[test]
fn truncated_static_values_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let (unit, def_idx) = class_unit(Some(vec![2, 0x24, 0x34]));

    let err = dumper
        .store()
        .static_values_from_unit(&unit, def_idx)
        .expect_err("truncated array should fail");
    assert!(matches!(err, DumpError::MalformedStaticValues { offset: 2, .. }));
    dumper.shutdown();
}

#[test]
fn encoded_field_returns_the_field_index() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let mut unit = FakeUnit::new("classes.dex");
    unit.add_field("LFoo;", "I", "unused");
    let field_idx = unit.add_field("LFoo;", "I", "count");

    let store = dumper.store();
    let first = store
        .field_from_unit(&unit, 0)
        .expect("field intern should succeed");
    let index = store
        .encoded_field_from_unit(&unit, field_idx, FieldKind::Static, 0xFFFF_FFFF)
        .expect("encoded field should succeed");
    assert_eq!(first, 0);
    assert_eq!(index, 1);

    let records = read_table(&dumper, "classes.dex", SymbolKind::EncodedField);
    assert_eq!(
        records[0].record,
        SymbolRecord::EncodedField(EncodedFieldRecord {
            kind: FieldKind::Static,
            field_idx: 1,
            access_flags: 0x3FFFF,
        })
    );
    dumper.shutdown();
}

#[test]
fn missing_metadata_surfaces_as_error() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let unit = FakeUnit::new("empty.dex");

    assert!(matches!(
        dumper.store().method_from_unit(&unit, 3),
        Err(DumpError::MissingMethod(3))
    ));
    assert!(matches!(
        dumper.store().string_from_unit(&unit, 0),
        Err(DumpError::MissingString(0))
    ));
    dumper.shutdown();
}

#[test]
fn abstract_receiver_class_is_recorded_for_instance_methods() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let mut unit = FakeUnit::new("classes.dex");
    let method_idx = unit.add_method("LBase;", "apply", "VIJ", "V", &["I", "J"]);
    let method = MethodInfo {
        method_idx,
        access_flags: 0x0001,
        declaring_class_flags: ACC_ABSTRACT,
        registers: 5,
        ins: 4,
        outs: 0,
    };
    let frame = FakeFrame::with_reference(1, "Lcom/example/Impl;");

    let implicit = dumper
        .store()
        .implicit_encoded_method(&unit, &method, &frame)
        .expect("implicit method should succeed");
    let expected = dumper
        .store()
        .intern_string("classes.dex", "Lcom/example/Impl;");
    assert_eq!(implicit.class_name_idx, expected);

    let encoded = read_table(&dumper, "classes.dex", SymbolKind::EncodedMethod);
    assert!(matches!(
        encoded[0].record,
        SymbolRecord::EncodedMethod(revealer::EncodedMethodRecord {
            kind: revealer::MethodKind::Virtual,
            ..
        })
    ));
    dumper.shutdown();
}

#[test]
fn static_methods_record_no_receiver_class() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let mut unit = FakeUnit::new("classes.dex");
    let method_idx = unit.add_method("LBase;", "make", "L", "LBase;", &[]);
    let method = MethodInfo {
        method_idx,
        access_flags: ACC_STATIC,
        declaring_class_flags: ACC_ABSTRACT,
        registers: 1,
        ins: 0,
        outs: 0,
    };
    let frame = FakeFrame::with_reference(0, "LOther;");

    let implicit = dumper
        .store()
        .implicit_encoded_method(&unit, &method, &frame)
        .expect("implicit method should succeed");
    assert_eq!(implicit.class_name_idx, NO_INDEX);
    dumper.shutdown();
}

#[test]
fn type_indices_beyond_sixteen_bits_overflow() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let mut config = test_config(dir.path());
    config.write_records = false;
    let dumper = Dumper::start(config).expect("dumper start should succeed");
    for i in 0..=u32::from(u16::MAX) {
        dumper.store().intern_type("big.dex", &format!("LT{i};"));
    }
    let mut unit = FakeUnit::new("big.dex");
    let ty = unit.add_type("LOverflow;");

    assert!(matches!(
        dumper.store().type_from_unit(&unit, ty),
        Err(DumpError::IndexOverflow {
            kind: SymbolKind::Type,
            index: 65536
        })
    ));
}
