//! Property tests for the quantified invariants of spec §8 that are best
//! checked over a generated range of inputs rather than one fixed example:
//! invariant 1 (primitive read/write round trip), invariant 8 (serializer
//! round-trip law), and invariant 10 (free-page stack reuse/dangling).

use proptest::prelude::*;

use hare::column::logical_type::{serializer_for, LogicalType, Value};
use hare::common::config::OpenOptions;
use hare::storage::page::Page;
use hare::storage::{DirectDiskManager, DiskManager};

proptest! {
    /// Invariant 1: for every in-bounds offset and primitive width,
    /// `read(o, put(o, v)) == v`.
    #[test]
    fn prop_i32_round_trips_through_page(offset in 0usize..4092, value in any::<i32>()) {
        let mut page = Page::new(4096);
        page.set_i32(offset, value).unwrap();
        prop_assert_eq!(page.get_i32(offset).unwrap(), value);
    }

    #[test]
    fn prop_u64_round_trips_through_page(offset in 0usize..4088, value in any::<u64>()) {
        let mut page = Page::new(4096);
        page.set_u64(offset, value).unwrap();
        prop_assert_eq!(page.get_u64(offset).unwrap(), value);
    }

    #[test]
    fn prop_f64_round_trips_through_page(offset in 0usize..4088, value in any::<f64>()) {
        let mut page = Page::new(4096);
        page.set_f64(offset, value).unwrap();
        let read_back = page.get_f64(offset).unwrap();
        // bit-exact, not `==`, so NaN payloads still count as a round trip.
        prop_assert_eq!(read_back.to_bits(), value.to_bits());
    }

    /// Invariant 8: `deserialize(serialize(v)) == v` for every value type's
    /// in-page serializer.
    #[test]
    fn prop_int_serializer_round_trips(value in any::<i32>()) {
        let serializer = serializer_for(&LogicalType::Int).unwrap();
        let encoded = serializer.encode(&Value::Int(value)).unwrap();
        prop_assert_eq!(serializer.decode(&encoded).unwrap(), Value::Int(value));
    }

    #[test]
    fn prop_double_serializer_round_trips(value in any::<f64>()) {
        let serializer = serializer_for(&LogicalType::Double).unwrap();
        let encoded = serializer.encode(&Value::Double(value)).unwrap();
        match serializer.decode(&encoded).unwrap() {
            Value::Double(v) => prop_assert_eq!(v.to_bits(), value.to_bits()),
            other => prop_assert!(false, "expected Value::Double, got {:?}", other),
        }
    }

    #[test]
    fn prop_str_serializer_round_trips(value in "\\PC*") {
        let serializer = serializer_for(&LogicalType::Str).unwrap();
        let encoded = serializer.encode(&Value::Str(value.clone())).unwrap();
        prop_assert_eq!(serializer.decode(&encoded).unwrap(), Value::Str(value));
    }

    /// Invariant 10: after `free(p)` then `allocate()` returning `p'`,
    /// either the page was reused (`p' == p`) or the dangling count grew
    /// and a fresh page id was handed out.
    #[test]
    fn prop_free_then_allocate_reuses_or_dangles(extra_allocs in 0usize..8) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prop.hare");
        let dm = DirectDiskManager::open(&path, OpenOptions::new()).unwrap();

        // Churn a few unrelated allocations first so the freed page is not
        // trivially the only candidate.
        let mut held = Vec::new();
        for _ in 0..extra_allocs {
            held.push(dm.allocate().unwrap());
        }

        let freed = dm.allocate().unwrap();
        dm.free(freed).unwrap();
        let reused = dm.allocate().unwrap();

        prop_assert_ne!(reused, hare::common::PageId::new(u64::MAX));
        // A fresh DirectDiskManager's free-page stack has ample capacity,
        // so this exercises the reuse path deterministically.
        prop_assert_eq!(reused, freed);

        let _ = held;
    }
}
