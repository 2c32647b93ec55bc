//! Property tests for the builder's per-field repetition counters and the
//! specification-version string normalization.

use std::collections::BTreeMap;

use proptest::prelude::*;

use covenant::{engine, Contract, Interaction, SpecificationVersion};

fn value_strategy() -> impl Strategy<Value = String> {
    // Plain scalar values: anything resembling matcher JSON would go
    // through value expansion instead of indexing.
    "[a-z0-9]{1,8}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every occurrence of a header survives in declaration order, per
    /// lowercased name, independent of how names interleave.
    #[test]
    fn prop_header_occurrences_preserved_in_order(
        entries in prop::collection::vec(
            (prop::sample::select(vec!["X-A", "x-a", "X-B", "x-c"]), value_strategy()),
            1..12,
        )
    ) {
        let contract = Contract::new("prop-headers", "provider").unwrap();
        let mut interaction = contract.upon_receiving("prop header ordering").unwrap();

        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &entries {
            interaction = interaction.with_header(name, value, None).unwrap();
            expected
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value.clone());
        }

        let record = engine::interaction_record(interaction.handle()).unwrap();
        prop_assert_eq!(&record.request.headers, &expected);
    }

    /// Query parameter occurrences accumulate per name, in order.
    #[test]
    fn prop_query_occurrences_preserved_in_order(
        entries in prop::collection::vec(
            (prop::sample::select(vec!["a", "b", "c"]), value_strategy()),
            1..12,
        )
    ) {
        let contract = Contract::new("prop-query", "provider").unwrap();
        let mut interaction = contract.upon_receiving("prop query ordering").unwrap();

        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in &entries {
            interaction = interaction.with_query_parameter(name, value).unwrap();
            expected
                .entry(name.to_string())
                .or_default()
                .push(value.clone());
        }

        let record = engine::interaction_record(interaction.handle()).unwrap();
        prop_assert_eq!(&record.query, &expected);
    }

    /// All spellings of a major version resolve to the same value.
    #[test]
    fn prop_specification_spellings_are_equivalent(major in 1u32..=4) {
        let expected: SpecificationVersion = format!("{major}").parse().unwrap();
        for spelling in [
            format!("v{major}"),
            format!("V{major}"),
            format!("{major}.0"),
            format!("{major}_0_0"),
            format!("v{major}.0.0"),
        ] {
            let parsed: SpecificationVersion = spelling.parse().unwrap();
            prop_assert_eq!(parsed, expected);
        }
    }

    /// Arbitrary non-numeric strings never parse as a specification
    /// version (and never panic).
    #[test]
    fn prop_specification_garbage_is_rejected(s in "[a-z]{1,10}") {
        // A lone "v" prefix with nothing behind it is covered too.
        prop_assert!(s.parse::<SpecificationVersion>().is_err());
    }
}
