//! Property tests for the key index over generated day tables.

use std::sync::Arc;

use proptest::prelude::*;
use rollcall_test_utils::fixtures::{self, store_with};
use rollcall_test_utils::generators::{arb_day_table, arb_employee_id};
use rollcall_test_utils::{MemoryRemoteStore, RemoteOp, TableName};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn prop_index_agrees_with_scan(records in arb_day_table(30), probe in arb_employee_id()) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let table = TableName::new("2025-02-03");
        fixtures::seed(&remote, &table, &records);
        let store = store_with(&remote);

        runtime().block_on(async {
            let rows = store.get_rows(&table).await.unwrap();
            prop_assert_eq!(rows.len(), records.len());

            for row in &rows {
                let indexed = store.get_indexed_row(&table, &row.key()).await.unwrap().unwrap();
                prop_assert!(Arc::ptr_eq(row, &indexed));
            }

            let scanned = rows.iter().find(|row| row.key() == probe);
            let indexed = store.get_indexed_row(&table, &probe).await.unwrap();
            prop_assert_eq!(scanned.is_some(), indexed.is_some());
            if let (Some(scanned), Some(indexed)) = (scanned, indexed) {
                prop_assert!(Arc::ptr_eq(scanned, &indexed));
            }

            prop_assert_eq!(remote.calls(RemoteOp::GetRows), 1);
            Ok(())
        })?;
    }

    #[test]
    fn prop_row_numbers_follow_remote_order(records in arb_day_table(30)) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let table = TableName::new("2025-02-04");
        fixtures::seed(&remote, &table, &records);
        let store = store_with(&remote);

        runtime().block_on(async {
            let rows = store.get_rows(&table).await.unwrap();
            for (i, (row, record)) in rows.iter().zip(&records).enumerate() {
                prop_assert_eq!(row.row_number(), i + 2);
                prop_assert_eq!(&row.record(), record);
            }
            Ok(())
        })?;
    }
}
