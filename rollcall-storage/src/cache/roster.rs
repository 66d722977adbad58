//! Cache of the employee directory.
//!
//! The roster is one slowly changing table read by nearly every operation,
//! so it gets its own longer TTL and a name-free API.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{RosterEntry, StoreResult, TableName};

use super::stats::{CacheStats, Evict};
use super::table::{Row, TableCache};
use crate::remote::RemoteStore;
use crate::retry::RetryExecutor;

/// A [`TableCache`] bound to the roster table.
pub struct RosterCache<E> {
    table: TableName,
    cache: TableCache<E>,
}

impl<E> Clone for RosterCache<E> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RosterCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterCache")
            .field("table", &self.table)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<E: RosterEntry> RosterCache<E> {
    pub fn new(
        table: TableName,
        remote: Arc<dyn RemoteStore>,
        retry: RetryExecutor,
        ttl: Duration,
    ) -> Self {
        Self {
            table,
            cache: TableCache::named("roster", remote, retry, ttl),
        }
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub(crate) fn cache(&self) -> &TableCache<E> {
        &self.cache
    }

    /// Every roster entry.
    pub async fn all(&self) -> StoreResult<Vec<Row<E>>> {
        self.cache.get_rows(&self.table).await
    }

    /// The entry with identifier `id`.
    pub async fn get(&self, id: &str) -> StoreResult<Option<Row<E>>> {
        self.cache.get_indexed_row(&self.table, id).await
    }

    /// The first entry matching `predicate`, in table order.
    pub async fn find<P>(&self, mut predicate: P) -> StoreResult<Option<Row<E>>>
    where
        P: FnMut(&E) -> bool,
    {
        let rows = self.all().await?;
        Ok(rows.into_iter().find(|row| row.read(&mut predicate)))
    }

    /// Every entry matching `predicate`, in table order.
    pub async fn filter<P>(&self, mut predicate: P) -> StoreResult<Vec<Row<E>>>
    where
        P: FnMut(&E) -> bool,
    {
        let rows = self.all().await?;
        Ok(rows.into_iter().filter(|row| row.read(&mut predicate)).collect())
    }

    /// Entries flagged active.
    pub async fn active(&self) -> StoreResult<Vec<Row<E>>> {
        self.filter(|entry| entry.is_active()).await
    }

    /// Drop the cached roster so the next read reloads it.
    pub fn invalidate(&self) -> bool {
        self.cache.clear(&self.table)
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_cached(&self.table)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl<E: RosterEntry> Evict for RosterCache<E> {
    fn evict(&self, table: &TableName) -> bool {
        *table == self.table && self.invalidate()
    }

    fn evict_all(&self) -> usize {
        self.cache.clear_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemoteStore;
    use crate::remote::RemoteOp;
    use rollcall_core::{EmployeeRecord, Record};

    fn roster_remote() -> Arc<MemoryRemoteStore> {
        let remote = Arc::new(MemoryRemoteStore::new());
        let rows = [
            ["emp1", "Ada", "@ada", "Ops", "TRUE"],
            ["emp2", "Brian", "@brian", "Sales", "FALSE"],
            ["emp3", "Chen", "@chen", "Ops", "yes"],
        ];
        remote.seed_table(
            &TableName::new("Employees"),
            EmployeeRecord::HEADERS,
            rows.iter()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect())
                .collect(),
        );
        remote
    }

    fn roster(remote: &Arc<MemoryRemoteStore>) -> RosterCache<EmployeeRecord> {
        RosterCache::new(
            TableName::new("Employees"),
            Arc::clone(remote) as Arc<dyn RemoteStore>,
            RetryExecutor::default(),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_by_id_and_predicate() {
        let remote = roster_remote();
        let roster = roster(&remote);

        let ada = roster.get("emp1").await.unwrap().unwrap();
        assert_eq!(ada.read(|e| e.name.clone()), "Ada");
        assert!(roster.get("emp9").await.unwrap().is_none());

        let chen = roster
            .find(|e| e.chat_handle == "@chen")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(chen.key(), "emp3");

        let ops = roster.filter(|e| e.department == "Ops").await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(remote.calls(RemoteOp::GetRows), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_filter() {
        let remote = roster_remote();
        let roster = roster(&remote);
        let active: Vec<String> = roster
            .active()
            .await
            .unwrap()
            .iter()
            .map(|row| row.key())
            .collect();
        assert_eq!(active, vec!["emp1", "emp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_only_touches_roster_table() {
        let remote = roster_remote();
        let roster = roster(&remote);
        roster.all().await.unwrap();

        assert!(!roster.evict(&TableName::new("2025-01-01")));
        assert!(roster.is_cached());
        assert!(roster.evict(&TableName::new("Employees")));
        assert!(!roster.is_cached());
    }
}
