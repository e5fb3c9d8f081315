//! Ids are a pure function of kind and content.

use proptest::prelude::*;

use gitodb_rs::{compute_id, Object, ObjectFormat, ObjectKind, ObjectStore, Odb, StoreLimits};

fn kind() -> impl Strategy<Value = ObjectKind> {
    prop::sample::select(ObjectKind::ALL.to_vec())
}

fn format() -> impl Strategy<Value = ObjectFormat> {
    prop::sample::select(vec![ObjectFormat::Sha1, ObjectFormat::Sha256])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn put_returns_the_computed_id(
        format in format(),
        kind in kind(),
        data in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let odb = Odb::open(&dir.path().join("objects"), format, StoreLimits::DEFAULT).unwrap();
        let object = Object::new(kind, data);
        let id = odb.put(&object).unwrap();
        prop_assert_eq!(id, compute_id(format, kind, &object.data));
        prop_assert_eq!(id.format(), format);
        prop_assert_eq!(odb.put(&object).unwrap(), id);
        prop_assert_eq!(odb.get(&id).unwrap(), object);
    }

    #[test]
    fn distinct_content_or_kind_gives_distinct_ids(
        kind_a in kind(),
        kind_b in kind(),
        a in prop::collection::vec(any::<u8>(), 0..256),
        b in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let same = kind_a == kind_b && a == b;
        let id_a = compute_id(ObjectFormat::Sha1, kind_a, &a);
        let id_b = compute_id(ObjectFormat::Sha1, kind_b, &b);
        prop_assert_eq!(id_a == id_b, same);
    }
}
