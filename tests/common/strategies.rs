use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for phones the validator accepts (10 digits, no leading zero)
pub fn valid_phone_strategy() -> impl Strategy<Value = String> {
    "[6-9][0-9]{9}"
}

/// Strategy for strings that can never normalize to a mobile number
pub fn invalid_phone_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[0-9]{1,9}",
        "[0-9]{13,15}",
        "0[0-9]{9}",
        "[a-z]{10}",
        "[6-9][0-9]{4}[a-z()./][0-9]{5}",
    ]
}

/// Batch shape: (record count, chunk size)
pub fn batch_shape_strategy() -> impl Strategy<Value = (usize, usize)> {
    (0usize..500, 1usize..64)
}

/// Chunked run shape: (record count, chunk size, max concurrency <= count)
pub fn chunked_run_strategy() -> impl Strategy<Value = (usize, usize, usize)> {
    (1usize..40, 1usize..12).prop_flat_map(|(n, chunk_size)| (Just(n), Just(chunk_size), 1..=n))
}

/// Mix of valid and invalid records; `true` marks a valid one.
pub fn mixed_batch_strategy() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 1..24)
}

pub fn mixed_records(validity: &[bool]) -> Vec<Value> {
    validity
        .iter()
        .enumerate()
        .map(|(i, valid)| {
            if *valid {
                json!({"name": format!("Farmer {i}"), "phone": format!("97{i:08}")})
            } else {
                json!({"name": format!("Farmer {i}"), "phone": "123"})
            }
        })
        .collect()
}
