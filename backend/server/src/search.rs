//! # Meilisearch
//!
//! Patient report store.
//!
//! ## Schema
//! - Index `reports`, primary key `id`
//! - One document per report: `id`, `owner_id`, the clinical fields, `created_at` (unix millis)
//! - Filterable: `id`, `owner_id`, `stroke`, `smoking_status`
//! - Sortable: `created_at`, `id`
//!
//! Every read is a filtered search rather than a document fetch, so "missing" and
//! "filtered out" look the same to callers. Writes wait for their task to finish,
//! so a report is visible to the next request.
//!
//! Report ids come from the Redis counter (see [`crate::database::next_report_id`]).
//!
//! ## Commands
//!
//! Grab relevant keys.
//! ```sh
//! curl -H "Authorization: Bearer $(cat /run/secrets/MEILI_MASTER_KEY)" http://localhost:7700/keys
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use meilisearch_sdk::{
    client::Client,
    search::Selectors,
    settings::{PaginationSetting, Settings},
    task_info::TaskInfo,
    tasks::Task,
};
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::debug;

use crate::{
    database::next_report_id,
    error::StoreError,
    store::{ReportStats, ReportStore, StoredReport},
    validation::PatientRecord,
};

pub const REPORT_INDEX: &str = "reports";
pub const REPORT_ID: &str = "id";
pub const REPORT_OWNER: &str = "owner_id";
pub const REPORT_STROKE: &str = "stroke";
pub const REPORT_SMOKING: &str = "smoking_status";
pub const REPORT_CREATED_AT: &str = "created_at";

const MAX_TOTAL_HITS: usize = 1_000_000;
const NEWEST_FIRST: [&str; 2] = ["created_at:desc", "id:desc"];

pub async fn init_meilisearch(
    meili_url: &str,
    meili_admin_key: Option<&str>,
) -> Result<Arc<Client>, StoreError> {
    let meili_client = Arc::new(Client::new(meili_url, meili_admin_key)?);

    let task = meili_client
        .index(REPORT_INDEX)
        .set_settings(&init_settings())
        .await?;
    wait(&meili_client, task).await?;

    Ok(meili_client)
}

fn init_settings() -> Settings {
    Settings::new()
        .with_filterable_attributes([REPORT_ID, REPORT_OWNER, REPORT_STROKE, REPORT_SMOKING])
        .with_sortable_attributes([REPORT_CREATED_AT, REPORT_ID])
        .with_searchable_attributes([REPORT_SMOKING])
        .with_pagination(PaginationSetting {
            max_total_hits: MAX_TOTAL_HITS,
        })
}

async fn wait(meili_client: &Client, task: TaskInfo) -> Result<(), StoreError> {
    let task = task.wait_for_completion(meili_client, None, None).await?;

    if let Task::Failed { content } = task {
        return Err(StoreError::TaskFailed(content.error.to_string()));
    }

    Ok(())
}

async fn upsert_items<T>(
    meili_client: &Client,
    index_name: &str,
    items: &[T],
    id_name: &str,
) -> Result<(), StoreError>
where
    T: Serialize + Send + Sync,
{
    let task = meili_client
        .index(index_name)
        .add_or_update(items, Some(id_name))
        .await?;

    wait(meili_client, task).await
}

fn id_filter(id: u64) -> String {
    format!("{REPORT_ID} = {id}")
}

fn owner_filter(owner_id: u64) -> String {
    format!("{REPORT_OWNER} = {owner_id}")
}

pub struct MeiliReports {
    meili_client: Arc<Client>,
    ids: ConnectionManager,
}

impl MeiliReports {
    pub fn new(meili_client: Arc<Client>, ids: ConnectionManager) -> Self {
        Self { meili_client, ids }
    }

    async fn find(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredReport>, StoreError> {
        let index = self.meili_client.index(REPORT_INDEX);
        let mut query = index.search();
        query
            .with_sort(&NEWEST_FIRST)
            .with_limit(limit)
            .with_offset(offset);

        if let Some(filter) = filter {
            query.with_filter(filter);
        }

        let results = query.execute::<StoredReport>().await?;
        Ok(results.hits.into_iter().map(|hit| hit.result).collect())
    }

    /// Exhaustive hit count, optionally with the smoking status distribution.
    async fn count(
        &self,
        filter: Option<&str>,
        facet: bool,
    ) -> Result<(usize, Option<Vec<(String, usize)>>), StoreError> {
        let index = self.meili_client.index(REPORT_INDEX);
        let facets = [REPORT_SMOKING];
        let mut query = index.search();
        query.with_hits_per_page(0).with_page(1);

        if let Some(filter) = filter {
            query.with_filter(filter);
        }
        if facet {
            query.with_facets(Selectors::Some(&facets));
        }

        let results = query.execute::<StoredReport>().await?;
        let distribution = results
            .facet_distribution
            .and_then(|mut d| d.remove(REPORT_SMOKING))
            .map(|counts| counts.into_iter().collect());

        Ok((results.total_hits.unwrap_or(0), distribution))
    }
}

#[async_trait]
impl ReportStore for MeiliReports {
    async fn insert(
        &self,
        owner_id: u64,
        record: PatientRecord,
    ) -> Result<StoredReport, StoreError> {
        let report = StoredReport {
            id: next_report_id(&self.ids).await?,
            owner_id,
            record,
            created_at: Utc::now(),
        };

        upsert_items(
            &self.meili_client,
            REPORT_INDEX,
            std::slice::from_ref(&report),
            REPORT_ID,
        )
        .await?;
        debug!("Indexed report {}", report.id);

        Ok(report)
    }

    async fn get(&self, id: u64) -> Result<Option<StoredReport>, StoreError> {
        Ok(self.find(Some(&id_filter(id)), 1, 0).await?.pop())
    }

    async fn update(
        &self,
        id: u64,
        record: PatientRecord,
    ) -> Result<Option<StoredReport>, StoreError> {
        let Some(mut report) = self.get(id).await? else {
            return Ok(None);
        };

        report.record = record;
        upsert_items(
            &self.meili_client,
            REPORT_INDEX,
            std::slice::from_ref(&report),
            REPORT_ID,
        )
        .await?;

        Ok(Some(report))
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        if self.get(id).await?.is_none() {
            return Ok(false);
        }

        let task = self
            .meili_client
            .index(REPORT_INDEX)
            .delete_document(id)
            .await?;
        wait(&self.meili_client, task).await?;

        Ok(true)
    }

    async fn list_by_owner(
        &self,
        owner_id: u64,
        limit: usize,
    ) -> Result<Vec<StoredReport>, StoreError> {
        self.find(Some(&owner_filter(owner_id)), limit, 0).await
    }

    async fn list_all(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredReport>, StoreError> {
        self.find(None, limit, offset).await
    }

    async fn search_by_id(&self, n: u64, limit: usize) -> Result<Vec<StoredReport>, StoreError> {
        let filter = format!("{} OR {}", id_filter(n), owner_filter(n));
        self.find(Some(&filter), limit, 0).await
    }

    async fn stats(&self) -> Result<ReportStats, StoreError> {
        let (total, by_smoking) = self.count(None, true).await?;
        let (stroke_count, _) = self
            .count(Some(&format!("{REPORT_STROKE} = true")), false)
            .await?;

        Ok(ReportStats {
            total,
            stroke_count,
            by_smoking: by_smoking.unwrap_or_default().into_iter().collect(),
        })
    }

    async fn delete_by_owner(&self, owner_id: u64) -> Result<usize, StoreError> {
        let ids: Vec<u64> = self
            .find(Some(&owner_filter(owner_id)), MAX_TOTAL_HITS, 0)
            .await?
            .into_iter()
            .map(|report| report.id)
            .collect();

        if ids.is_empty() {
            return Ok(0);
        }

        let task = self
            .meili_client
            .index(REPORT_INDEX)
            .delete_documents(&ids)
            .await?;
        wait(&self.meili_client, task).await?;

        Ok(ids.len())
    }
}
