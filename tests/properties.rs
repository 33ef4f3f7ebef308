//! Property tests: the fanned engine agrees with the serial reference.

mod common;

use common::{Row, drain, engine, merge_inputs, reference_combine};
use polymerge::MergeConfig;
use proptest::prelude::*;

fn sorted_inputs() -> impl Strategy<Value = Vec<Vec<Row>>> {
    proptest::collection::vec(
        proptest::collection::vec((0i64..40, 1i64..8), 0..80).prop_map(|mut rows| {
            rows.sort_unstable();
            rows
        }),
        0..6,
    )
}

fn small_config(parallelism: usize, queue_capacity: usize) -> MergeConfig {
    MergeConfig {
        parallelism_hint: parallelism,
        serial_input_threshold: 1,
        batch_size_initial: 8,
        batch_size_min: 2,
        batch_size_max: 64,
        yield_after_initial: 16,
        yield_after_min: 4,
        yield_after_max: 256,
        queue_capacity_batches: queue_capacity,
        ..MergeConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn output_matches_the_reference_for_any_parallelism(
        inputs in sorted_inputs(),
        parallelism in 1usize..5,
        queue_capacity in 1usize..4,
    ) {
        let expected = reference_combine(&inputs);
        let (_pool, engine) = engine(3, small_config(parallelism, queue_capacity));
        let mut stream = merge_inputs(&engine, inputs);
        let out = drain(&mut stream);
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn output_is_sorted_with_distinct_adjacent_keys(
        inputs in sorted_inputs(),
        parallelism in 1usize..5,
    ) {
        let (_pool, engine) = engine(3, small_config(parallelism, 2));
        let mut stream = merge_inputs(&engine, inputs);
        let out = drain(&mut stream);
        prop_assert!(out.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn combining_is_a_fixpoint(inputs in sorted_inputs()) {
        let (_pool, engine) = engine(3, small_config(2, 2));
        let mut stream = merge_inputs(&engine, inputs);
        let once = drain(&mut stream);

        let mut stream = merge_inputs(&engine, vec![once.clone()]);
        let twice = drain(&mut stream);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn row_conservation_under_value_sums(
        inputs in sorted_inputs(),
        parallelism in 1usize..5,
    ) {
        let input_total: i64 = inputs
            .iter()
            .flat_map(|rows| rows.iter().map(|row| row.1))
            .sum();
        let (_pool, engine) = engine(3, small_config(parallelism, 3));
        let mut stream = merge_inputs(&engine, inputs);
        let output_total: i64 = drain(&mut stream).iter().map(|row| row.1).sum();
        prop_assert_eq!(input_total, output_total);
    }
}
