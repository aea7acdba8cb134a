//! In-process stores for `STORAGE=memory` and the test suites. Nothing is persisted.
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    store::{Account, AccountStore, NewAccount, ReportStats, ReportStore, StoredReport},
    validation::{Choice, PatientRecord},
};

#[derive(Default)]
struct AccountTable {
    next_id: u64,
    by_id: BTreeMap<u64, Account>,
    usernames: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryAccounts {
    table: Mutex<AccountTable>,
}

#[async_trait]
impl AccountStore for MemoryAccounts {
    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut table = self.table.lock().await;

        if table.usernames.contains_key(&account.username) {
            return Err(StoreError::UsernameTaken);
        }

        table.next_id += 1;
        let id = table.next_id;
        let account = account.into_account(id, Utc::now());

        table.usernames.insert(account.username.clone(), id);
        table.by_id.insert(id, account.clone());

        Ok(account)
    }

    async fn get(&self, id: u64) -> Result<Option<Account>, StoreError> {
        Ok(self.table.lock().await.by_id.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let table = self.table.lock().await;

        Ok(table
            .usernames
            .get(username)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.table.lock().await.by_id.values().rev().cloned().collect())
    }

    async fn approve(&self, id: u64) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;

        Ok(table
            .by_id
            .get_mut(&id)
            .map(|account| account.approved = true)
            .is_some())
    }

    async fn set_password_hash(&self, id: u64, password_hash: &str) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;

        Ok(table
            .by_id
            .get_mut(&id)
            .map(|account| account.password_hash = password_hash.to_string())
            .is_some())
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let mut table = self.table.lock().await;

        match table.by_id.remove(&id) {
            Some(account) => {
                table.usernames.remove(&account.username);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
struct ReportTable {
    next_id: u64,
    by_id: BTreeMap<u64, StoredReport>,
}

/// Ids are allocated in increasing order, so id order is creation order.
#[derive(Default)]
pub struct MemoryReports {
    table: Mutex<ReportTable>,
}

#[async_trait]
impl ReportStore for MemoryReports {
    async fn insert(
        &self,
        owner_id: u64,
        record: PatientRecord,
    ) -> Result<StoredReport, StoreError> {
        let mut table = self.table.lock().await;

        table.next_id += 1;
        let report = StoredReport {
            id: table.next_id,
            owner_id,
            record,
            created_at: Utc::now(),
        };
        table.by_id.insert(report.id, report.clone());

        Ok(report)
    }

    async fn get(&self, id: u64) -> Result<Option<StoredReport>, StoreError> {
        Ok(self.table.lock().await.by_id.get(&id).cloned())
    }

    async fn update(
        &self,
        id: u64,
        record: PatientRecord,
    ) -> Result<Option<StoredReport>, StoreError> {
        let mut table = self.table.lock().await;

        Ok(table.by_id.get_mut(&id).map(|report| {
            report.record = record;
            report.clone()
        }))
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.table.lock().await.by_id.remove(&id).is_some())
    }

    async fn list_by_owner(
        &self,
        owner_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredReport>, StoreError> {
        let table = self.table.lock().await;

        Ok(table
            .by_id
            .values()
            .rev()
            .filter(|report| report.owner_id == owner_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_all(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredReport>, StoreError> {
        let table = self.table.lock().await;

        Ok(table
            .by_id
            .values()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search_by_id(&self, n: u64, limit: usize) -> Result<Vec<StoredReport>, StoreError> {
        let table = self.table.lock().await;

        Ok(table
            .by_id
            .values()
            .rev()
            .filter(|report| report.id == n || report.owner_id == n)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<ReportStats, StoreError> {
        let table = self.table.lock().await;
        let mut stats = ReportStats::default();

        for report in table.by_id.values() {
            stats.total += 1;
            if report.record.stroke {
                stats.stroke_count += 1;
            }
            *stats
                .by_smoking
                .entry(report.record.smoking_status.as_str().to_string())
                .or_default() += 1;
        }

        Ok(stats)
    }

    async fn delete_by_owner(&self, owner_id: u64) -> Result<usize, StoreError> {
        let mut table = self.table.lock().await;
        let before = table.by_id.len();

        table.by_id.retain(|_, report| report.owner_id != owner_id);

        Ok(before - table.by_id.len())
    }
}
