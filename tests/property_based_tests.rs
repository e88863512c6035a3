mod common;

use bulk_engine::config::BulkConfig;
use bulk_engine::orchestration::{partition, ProcessingOptions};
use bulk_engine::pipeline::validate_record;
use bulk_engine::state_machine::{DetailStatus, OperationStatus};
use bulk_engine::store::OperationStore;
use common::strategies::*;
use common::{records, test_config, Harness};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    /// Property: chunks cover every index exactly once, in order
    #[test]
    fn partition_covers_every_index_once((len, chunk_size) in batch_shape_strategy()) {
        let chunks = partition(len, chunk_size);

        let mut expected_start = 0;
        for chunk in &chunks {
            prop_assert_eq!(chunk.start, expected_start);
            prop_assert!(!chunk.is_empty());
            prop_assert!(chunk.len() <= chunk_size);
            expected_start = chunk.end;
        }
        prop_assert_eq!(expected_start, len);
        prop_assert_eq!(chunks.len(), len.div_ceil(chunk_size));
    }

    /// Property: any well-formed mobile number validates
    #[test]
    fn valid_phones_are_accepted(phone in valid_phone_strategy()) {
        let record = json!({"name": "Farmer", "phone": phone.clone()});
        let normalized = validate_record(0, &record);
        prop_assert!(normalized.is_ok());
        prop_assert_eq!(normalized.unwrap().phone, phone);
    }

    /// Property: malformed numbers are rejected with a phone error
    #[test]
    fn invalid_phones_are_rejected(phone in invalid_phone_strategy()) {
        let record = json!({"name": "Farmer", "phone": phone});
        let errors = validate_record(3, &record).unwrap_err();
        prop_assert!(errors.iter().any(|e| e.field == "phone" && e.record_index == 3));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: counters balance and match the batch for either path
    #[test]
    fn counters_balance_for_mixed_batches(validity in mixed_batch_strategy()) {
        let expected_ok = validity.iter().filter(|v| **v).count() as u64;
        let total = validity.len() as u64;

        let view = tokio_test::block_on(async {
            let harness = Harness::new();
            harness.run(mixed_records(&validity), ProcessingOptions::default()).await
        });

        prop_assert_eq!(view.processed_records, total);
        prop_assert_eq!(view.successful_records, expected_ok);
        prop_assert_eq!(view.failed_records, total - expected_ok);
        prop_assert_eq!(
            view.processed_records,
            view.successful_records + view.failed_records + view.skipped_records
        );
        let expected_status = if expected_ok == 0 {
            OperationStatus::Failed
        } else {
            OperationStatus::Completed
        };
        prop_assert_eq!(view.status, expected_status);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property: the chunked path settles every record exactly once
    #[test]
    fn chunked_runs_settle_every_record((n, chunk_size, max_concurrency) in chunked_run_strategy()) {
        let (operation, details) = tokio_test::block_on(async {
            // Nothing runs inline
            let harness = Harness::with_config(BulkConfig {
                max_sync_records: 0,
                ..test_config()
            });
            let options = ProcessingOptions {
                chunk_size,
                max_concurrency,
                ..Default::default()
            };
            let view = harness.run(records(n), options).await;
            let operation = harness
                .store
                .get_by_id(view.operation_id)
                .await
                .unwrap()
                .unwrap();
            let details = harness
                .orchestrator
                .get_details(view.operation_id)
                .await
                .unwrap();
            (operation, details)
        });

        prop_assert_eq!(operation.status, OperationStatus::Completed);
        prop_assert_eq!(operation.processed_records, n as u64);
        prop_assert!(operation.counters_balanced());

        prop_assert_eq!(details.len(), n);
        let mut indices: Vec<u64> = details.iter().map(|d| d.record_index).collect();
        indices.sort_unstable();
        prop_assert_eq!(indices, (0..n as u64).collect::<Vec<_>>());
        prop_assert!(details.iter().all(|d| d.status != DetailStatus::Pending));
    }
}
