//! Computed deltas rebuild their target from their base.

use proptest::prelude::*;

use gitodb_rs::{apply_delta, compute_delta};

/// A target that shares long runs with the base, as revisions do.
fn related_pair() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (
        prop::collection::vec(any::<u8>(), 0..4096),
        prop::collection::vec((any::<u16>(), any::<u16>(), prop::collection::vec(any::<u8>(), 0..64)), 0..8),
    )
        .prop_map(|(base, edits)| {
            let mut target = base.clone();
            for (at, del, insert) in edits {
                let at = if target.is_empty() { 0 } else { usize::from(at) % target.len() };
                let end = (at + usize::from(del) % 128).min(target.len());
                target.splice(at..end, insert);
            }
            (base, target)
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn delta_reconstructs_related_target((base, target) in related_pair()) {
        let delta = compute_delta(&base, &target);
        let mut out = Vec::new();
        apply_delta(&base, &delta, &mut out, target.len()).unwrap();
        prop_assert_eq!(out, target);
    }

    #[test]
    fn delta_reconstructs_unrelated_target(
        base in prop::collection::vec(any::<u8>(), 0..1024),
        target in prop::collection::vec(any::<u8>(), 0..1024),
    ) {
        let delta = compute_delta(&base, &target);
        let mut out = Vec::new();
        apply_delta(&base, &delta, &mut out, target.len()).unwrap();
        prop_assert_eq!(out, target);
    }

    #[test]
    fn output_cap_below_result_size_is_refused(
        base in prop::collection::vec(any::<u8>(), 0..512),
        target in prop::collection::vec(any::<u8>(), 1..512),
    ) {
        let delta = compute_delta(&base, &target);
        let mut out = Vec::new();
        prop_assert!(apply_delta(&base, &delta, &mut out, target.len() - 1).is_err());
    }
}
