mod common;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use common::*;
use proptest::prelude::*;
use revealer::{
    FileNaming, InternTable, MethodRecord, StaticValueRecord, StringRecord, Symbol, SymbolStore,
    TypeRecord, kind_from_file_name,
};

#[test]
fn interning_equal_strings_returns_one_index_and_one_record() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let store = dumper.store();

    let first = store.intern_string("a.dex", "hello");
    let second = store.intern_string("a.dex", "hello");
    let other = store.intern_string("a.dex", "world");

    assert_eq!(first, second);
    assert_eq!(first, 0);
    assert_eq!(other, 1);

    let records = read_table(&dumper, "a.dex", SymbolKind::String);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].index, Some(0));
    assert!(matches!(
        &records[0].record,
        SymbolRecord::String(StringRecord { value, utf16_len: 5 }) if value == "hello"
    ));
    dumper.shutdown();
}

#[test]
fn string_length_counts_utf16_units() {
    let record = StringRecord::new("h\u{e9}\u{1F600}");
    assert_eq!(record.utf16_len, 4);
}

#[test]
fn tables_assign_indices_independently() {
    let naming = FileNaming::new(std::env::temp_dir(), TEST_PID, Some(TEST_PREFIX.to_string()));
    let store = SymbolStore::new(naming, None);

    assert_eq!(store.intern_string("x", "LFoo;"), 0);
    assert_eq!(store.intern_type("x", "LFoo;"), 0);
    assert_eq!(store.intern_type("x", "LBar;"), 1);
    assert_eq!(store.tables().strings.len(), 2);
    assert_eq!(store.tables().types.len(), 2);
}

#[test]
fn records_sharing_a_hash_keep_distinct_indices() {
    let table: InternTable<StaticValueRecord> = InternTable::default();
    let mut first_values = BTreeMap::new();
    first_values.insert(0, vec![0x04, 0x01]);
    let mut second_values = BTreeMap::new();
    second_values.insert(0, vec![0x04, 0x02]);
    let first = StaticValueRecord {
        class_idx: 3,
        values: first_values,
    };
    let second = StaticValueRecord {
        class_idx: 3,
        values: second_values,
    };
    assert_eq!(first.structural_hash(), second.structural_hash());

    let (first_idx, fresh) = table.intern(first.clone());
    assert!(fresh.is_some());
    let (second_idx, fresh) = table.intern(second.clone());
    assert!(fresh.is_some());
    assert_ne!(first_idx, second_idx);
    assert_eq!(table.lookup(&first), Some(first_idx));
    assert_eq!(table.lookup(&second), Some(second_idx));
}

#[test]
fn file_names_follow_pid_prefix_location_hash_and_tag() {
    let naming = FileNaming::new("/tmp/out", TEST_PID, Some(TEST_PREFIX.to_string()));
    let path = naming.path("/data/app/foo/base.apk", SymbolKind::EncodedMethod);
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("file name should be utf-8");

    let hash = revealer::records::hash_str("/data/app/foo/base.apk");
    assert_eq!(name, format!("4242_000001_{hash}_em.dat"));
    assert_eq!(
        kind_from_file_name(name).expect("tag should parse"),
        SymbolKind::EncodedMethod
    );
}

#[test]
fn generated_prefix_is_six_digits() {
    let naming = FileNaming::new("/tmp/out", 1, None);
    assert_eq!(naming.prefix().len(), 6);
    assert!(naming.prefix().chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn composite_records_reference_previously_interned_indices() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let dumper = start_dumper(dir.path());
    let mut unit = FakeUnit::new("app.dex");
    let method_idx = unit.add_method("LFoo;", "run", "ILJ", "I", &["Ljava/lang/String;", "J"]);

    let index = dumper
        .store()
        .method_from_unit(&unit, method_idx)
        .expect("method intern should succeed");
    assert_eq!(index, 0);

    let strings = read_table(&dumper, "app.dex", SymbolKind::String);
    let types = read_table(&dumper, "app.dex", SymbolKind::Type);
    let protos = read_table(&dumper, "app.dex", SymbolKind::Proto);
    let methods = read_table(&dumper, "app.dex", SymbolKind::Method);

    for record in &types {
        let SymbolRecord::Type(TypeRecord { descriptor_idx }) = record.record else {
            panic!("type table holds only type records");
        };
        assert!((descriptor_idx as usize) < strings.len());
    }
    let SymbolRecord::Proto(proto) = &protos[0].record else {
        panic!("proto table holds only proto records");
    };
    assert!((proto.shorty_idx as usize) < strings.len());
    assert!((proto.return_type_idx as usize) < types.len());
    assert_eq!(proto.param_types.len(), 2);
    assert!(proto.param_types.iter().all(|ty| (*ty as usize) < types.len()));

    let SymbolRecord::Method(MethodRecord {
        class_idx,
        proto_idx,
        name_idx,
    }) = methods[0].record
    else {
        panic!("method table holds only method records");
    };
    assert!((class_idx as usize) < types.len());
    assert_eq!(proto_idx, 0);
    assert!((name_idx as usize) < strings.len());
    dumper.shutdown();
}

#[test]
fn concurrent_interning_agrees_on_every_index() {
    let naming = FileNaming::new(std::env::temp_dir(), TEST_PID, Some(TEST_PREFIX.to_string()));
    let store = Arc::new(SymbolStore::new(naming, None));
    let values: Vec<String> = (0..100).map(|i| format!("value-{i}")).collect();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            let mut values = values.clone();
            values.rotate_left(worker * 7);
            std::thread::spawn(move || {
                values
                    .iter()
                    .map(|value| (value.clone(), store.intern_string("x", value)))
                    .collect::<HashMap<_, _>>()
            })
        })
        .collect();

    let results: Vec<HashMap<String, u32>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker should not panic"))
        .collect();
    for result in &results[1..] {
        assert_eq!(result, &results[0]);
    }
    let indices: BTreeSet<u32> = results[0].values().copied().collect();
    assert_eq!(indices, (0..100).collect());
    assert_eq!(store.tables().strings.len(), 100);
}

#[test]
fn disabled_writer_leaves_no_files() {
    let dir = tempfile::tempdir().expect("tempdir should succeed");
    let mut config = test_config(dir.path());
    config.write_records = false;
    let dumper = Dumper::start(config).expect("dumper start should succeed");

    dumper.store().intern_string("a.dex", "quiet");
    dumper.flush();

    let entries = std::fs::read_dir(dir.path().join("revealer"))
        .expect("output dir should exist")
        .count();
    assert_eq!(entries, 0);
}

proptest! {
    #[test]
    fn interning_is_idempotent_and_dense(values in proptest::collection::vec("[a-c]{0,3}", 0..40)) {
        let table: InternTable<StringRecord> = InternTable::default();
        let mut seen: HashMap<String, u32> = HashMap::new();
        for value in &values {
            let (index, fresh) = table.intern(StringRecord::new(value.as_str()));
            match seen.get(value) {
                Some(existing) => {
                    prop_assert_eq!(*existing, index);
                    prop_assert!(fresh.is_none());
                }
                None => {
                    prop_assert!(fresh.is_some());
                    seen.insert(value.clone(), index);
                }
            }
        }
        let indices: BTreeSet<u32> = seen.values().copied().collect();
        let expected: BTreeSet<u32> = (0..seen.len() as u32).collect();
        prop_assert_eq!(indices, expected);
        prop_assert_eq!(table.len() as usize, seen.len());
    }
}
