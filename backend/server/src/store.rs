//! # Stores
//!
//! The two collections behind the service, as traits so the handlers never know which
//! engine they talk to.
//!
//! | Collection | Production | Local / tests |
//! |---|---|---|
//! | accounts | Redis ([`crate::database`]) | [`crate::memory::MemoryAccounts`] |
//! | patient reports | Meilisearch ([`crate::search`]) | [`crate::memory::MemoryReports`] |
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{access::Role, error::StoreError, validation::PatientRecord};

pub const SEARCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: u64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub approved: bool,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub license_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub approved: bool,
    pub profile: Profile,
}

impl NewAccount {
    pub(crate) fn into_account(self, id: u64, created_at: DateTime<Utc>) -> Account {
        Account {
            id,
            username: self.username,
            password_hash: self.password_hash,
            role: self.role,
            approved: self.approved,
            full_name: self.profile.full_name,
            email: self.profile.email,
            license_number: self.profile.license_number,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub id: u64,
    pub owner_id: u64,
    #[serde(flatten)]
    pub record: PatientRecord,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportStats {
    pub total: usize,
    pub stroke_count: usize,
    pub by_smoking: BTreeMap<String, usize>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::UsernameTaken`] when the name is already claimed.
    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError>;

    async fn get(&self, id: u64) -> Result<Option<Account>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError>;

    /// Newest first.
    async fn list(&self) -> Result<Vec<Account>, StoreError>;

    /// Returns `false` when no such account exists.
    async fn approve(&self, id: u64) -> Result<bool, StoreError>;

    async fn set_password_hash(&self, id: u64, password_hash: &str) -> Result<bool, StoreError>;

    async fn delete(&self, id: u64) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn insert(&self, owner_id: u64, record: PatientRecord)
    -> Result<StoredReport, StoreError>;

    async fn get(&self, id: u64) -> Result<Option<StoredReport>, StoreError>;

    /// Replaces the clinical fields, keeping id, owner and creation time.
    async fn update(
        &self,
        id: u64,
        record: PatientRecord,
    ) -> Result<Option<StoredReport>, StoreError>;

    async fn delete(&self, id: u64) -> Result<bool, StoreError>;

    /// Newest first.
    async fn list_by_owner(
        &self,
        owner_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredReport>, StoreError>;

    /// Newest first.
    async fn list_all(&self, limit: usize, offset: usize)
    -> Result<Vec<StoredReport>, StoreError>;

    /// Reports whose id or owner id equals `n`.
    async fn search_by_id(&self, n: u64, limit: usize) -> Result<Vec<StoredReport>, StoreError>;

    async fn stats(&self) -> Result<ReportStats, StoreError>;

    /// Returns how many reports were removed.
    async fn delete_by_owner(&self, owner_id: u64) -> Result<usize, StoreError>;
}
