//! ROLLCALL Test Utilities
//!
//! Shared test infrastructure for the ROLLCALL workspace:
//! - Tracing setup for tests
//! - Proptest generators for records and tables
//! - Fixtures: seeded remote stores and ready-made stores
//! - Custom assertions for store results

// Re-export the in-memory remote from its source crate
pub use rollcall_storage::MemoryRemoteStore;

pub use rollcall_core::{
    AttendanceRecord, AttendanceStatus, EmployeeRecord, Record, RetryConfig, SchemaError,
    StoreConfig, StoreError, StoreResult, TableName,
};
pub use rollcall_storage::{CacheStore, MutateOutcome, RemoteOp, RemoteStore};

use std::sync::{Arc, Once};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for the ROLLCALL crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rollcall_storage=debug,warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ROLLCALL record types.

    use super::*;
    use chrono::NaiveTime;
    use proptest::prelude::*;

    /// Generate an employee identifier like `emp042`.
    pub fn arb_employee_id() -> impl Strategy<Value = String> {
        (0u32..1000).prop_map(|n| format!("emp{:03}", n))
    }

    /// Generate free text that survives cell trimming.
    pub fn arb_cell_text() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z .'-]{0,20}[A-Za-z]".prop_map(|s| s.trim().to_string())
    }

    /// Generate a minute-precision time of day.
    pub fn arb_time() -> impl Strategy<Value = NaiveTime> {
        (0u32..24, 0u32..60).prop_map(|(h, m)| {
            NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
        })
    }

    /// Generate an AttendanceStatus variant.
    pub fn arb_status() -> impl Strategy<Value = AttendanceStatus> {
        prop_oneof![
            Just(AttendanceStatus::Absent),
            Just(AttendanceStatus::Present),
            Just(AttendanceStatus::Left),
            Just(AttendanceStatus::Excused),
        ]
    }

    /// Generate an EmployeeRecord.
    pub fn arb_employee() -> impl Strategy<Value = EmployeeRecord> {
        (
            arb_employee_id(),
            arb_cell_text(),
            "@[a-z]{2,12}",
            prop_oneof![Just("Ops"), Just("Sales"), Just("Support")],
            any::<bool>(),
        )
            .prop_map(|(employee_id, name, chat_handle, department, active)| EmployeeRecord {
                employee_id,
                name,
                chat_handle,
                department: department.to_string(),
                active,
            })
    }

    /// Generate an AttendanceRecord.
    pub fn arb_attendance() -> impl Strategy<Value = AttendanceRecord> {
        (
            arb_employee_id(),
            arb_cell_text(),
            arb_status(),
            proptest::option::of(arb_time()),
            proptest::option::of(arb_time()),
            proptest::option::of(arb_cell_text()),
        )
            .prop_map(|(employee_id, name, status, arrived_at, left_at, note)| AttendanceRecord {
                employee_id,
                name,
                status,
                arrived_at,
                left_at,
                note: note.unwrap_or_default(),
            })
    }

    /// Generate a roster with unique employee ids.
    pub fn arb_roster(max: usize) -> impl Strategy<Value = Vec<EmployeeRecord>> {
        prop::collection::vec(arb_employee(), 0..=max).prop_map(|mut employees| {
            let mut seen = std::collections::HashSet::new();
            employees.retain(|e| seen.insert(e.employee_id.clone()));
            employees
        })
    }

    /// Generate a day table with unique employee ids.
    pub fn arb_day_table(max: usize) -> impl Strategy<Value = Vec<AttendanceRecord>> {
        prop::collection::vec(arb_attendance(), 0..=max).prop_map(|mut records| {
            let mut seen = std::collections::HashSet::new();
            records.retain(|r| seen.insert(r.employee_id.clone()));
            records
        })
    }

    /// Generate a RetryConfig.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (0u32..6, 1u64..5000, proptest::option::of(1u64..60000)).prop_map(
            |(max_retries, initial_delay_ms, max_delay_ms)| RetryConfig {
                max_retries,
                initial_delay_ms,
                max_delay_ms,
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built remote stores and stores for common scenarios.

    use super::*;
    use std::time::Duration;

    /// The day table every scenario uses unless it needs a fresh one.
    pub fn day_table() -> TableName {
        TableName::new("2025-01-01")
    }

    /// A small active/inactive roster.
    pub fn roster() -> Vec<EmployeeRecord> {
        [
            ("emp1", "Ada Lovelace", "@ada", "Ops", true),
            ("emp2", "Brian Kernighan", "@bwk", "Sales", true),
            ("emp3", "Chen Ning", "@chen", "Support", false),
            ("emp42", "Douglas Adams", "@dna", "Ops", true),
        ]
        .into_iter()
        .map(|(id, name, handle, department, active)| EmployeeRecord {
            employee_id: id.to_string(),
            name: name.to_string(),
            chat_handle: handle.to_string(),
            department: department.to_string(),
            active,
        })
        .collect()
    }

    /// A fresh day table: everyone on the roster, absent.
    pub fn absent_day(roster: &[EmployeeRecord]) -> Vec<AttendanceRecord> {
        roster.iter().map(AttendanceRecord::absent).collect()
    }

    /// Encode records as raw rows in `R::HEADERS` order.
    pub fn rows_of<R: Record>(records: &[R]) -> Vec<Vec<String>> {
        records.iter().map(Record::encode).collect()
    }

    /// Seed `table` in `remote` with `R::HEADERS` and `records`.
    pub fn seed<R: Record>(remote: &MemoryRemoteStore, table: &TableName, records: &[R]) {
        remote.seed_table(table, R::HEADERS, rows_of(records));
    }

    /// A remote holding the roster and an all-absent day table.
    pub fn seeded_remote() -> Arc<MemoryRemoteStore> {
        let remote = Arc::new(MemoryRemoteStore::new());
        let roster = roster();
        seed(&remote, &TableName::new("Employees"), &roster);
        seed(&remote, &day_table(), &absent_day(&roster));
        remote
    }

    /// Config with short delays so paused-time tests stay readable.
    pub fn fast_config() -> StoreConfig {
        StoreConfig::default()
            .with_table_ttl(Duration::from_secs(60))
            .with_roster_ttl(Duration::from_secs(300))
            .with_init_ttl(Duration::from_secs(120))
            .with_invalidation_delay(Duration::from_secs(5))
            .with_dedup_window(Duration::from_secs(5))
            .with_retry(RetryConfig {
                max_retries: 3,
                initial_delay_ms: 1000,
                max_delay_ms: None,
            })
    }

    /// A store over `remote` with [`fast_config`].
    pub fn store_with(remote: &Arc<MemoryRemoteStore>) -> CacheStore {
        store_with_config(remote, fast_config())
    }

    pub fn store_with_config(remote: &Arc<MemoryRemoteStore>, config: StoreConfig) -> CacheStore {
        CacheStore::new(Arc::clone(remote) as Arc<dyn RemoteStore>, config)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for ROLLCALL store results.

    use super::*;

    /// Assert that a StoreResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StoreResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StoreResult is an exhausted-quota error.
    #[track_caller]
    pub fn assert_quota_exceeded<T: std::fmt::Debug>(result: &StoreResult<T>, attempts: u32) {
        match result {
            Err(StoreError::QuotaExceeded { attempts: got, .. }) => {
                assert_eq!(*got, attempts, "Wrong attempt count in QuotaExceeded");
            }
            other => panic!("Expected QuotaExceeded, got: {:?}", other),
        }
    }

    /// Assert that a StoreResult is a deferred initialization of `table`.
    #[track_caller]
    pub fn assert_deferred<T: std::fmt::Debug>(result: &StoreResult<T>, table: &TableName) {
        match result {
            Err(StoreError::InitializationDeferred { table: got }) => {
                assert_eq!(got, table, "Wrong table in InitializationDeferred");
            }
            other => panic!("Expected InitializationDeferred, got: {:?}", other),
        }
    }

    /// Assert that a StoreResult is a schema error.
    #[track_caller]
    pub fn assert_schema_error<T: std::fmt::Debug>(result: &StoreResult<T>) {
        match result {
            Err(StoreError::Schema(_)) => {}
            other => panic!("Expected Schema error, got: {:?}", other),
        }
    }

    /// Assert that a mutation was applied and return the written record.
    #[track_caller]
    pub fn assert_applied<R: std::fmt::Debug>(result: StoreResult<MutateOutcome<R>>) -> R {
        match result {
            Ok(MutateOutcome::Applied(record)) => record,
            other => panic!("Expected Applied, got: {:?}", other),
        }
    }

    /// Assert the remote saw exactly `expected` calls of `op`.
    #[track_caller]
    pub fn assert_calls(remote: &MemoryRemoteStore, op: RemoteOp, expected: usize) {
        assert_eq!(
            remote.calls(op),
            expected,
            "Expected {} {} call(s), got {}",
            expected,
            op,
            remote.calls(op)
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
