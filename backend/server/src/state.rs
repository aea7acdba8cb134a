use std::sync::Arc;

use password_hash::rand_core::{OsRng, RngCore};
use tracing::info;

use super::{
    config::{Config, StorageKind},
    credentials::Credentials,
    database::{RedisAccounts, init_redis},
    error::{StartupError, StoreError},
    memory::{MemoryAccounts, MemoryReports},
    search::{MeiliReports, init_meilisearch},
    session::SessionKeys,
    store::{AccountStore, ReportStore},
};

pub struct State {
    pub config: Config,
    pub accounts: Arc<dyn AccountStore>,
    pub reports: Arc<dyn ReportStore>,
    pub sessions: SessionKeys,
    pub credentials: Credentials,
    /// Hash of a random secret, verified against when a login names no account.
    pub decoy_hash: String,
}

impl State {
    pub async fn new(config: Config) -> Result<Arc<Self>, StartupError> {
        let (accounts, reports): (Arc<dyn AccountStore>, Arc<dyn ReportStore>) =
            match config.storage {
                StorageKind::Redis => {
                    info!("Connecting to Redis at {}", config.redis_url);
                    let redis_connection = init_redis(&config.redis_url)
                        .await
                        .map_err(StoreError::from)?;

                    info!("Connecting to Meilisearch at {}", config.meili_url);
                    let meili_client =
                        init_meilisearch(&config.meili_url, config.meili_key.as_deref()).await?;

                    (
                        Arc::new(RedisAccounts::new(redis_connection.clone())),
                        Arc::new(MeiliReports::new(meili_client, redis_connection)),
                    )
                }
                StorageKind::Memory => {
                    info!("Using in-memory stores, nothing will be persisted");
                    (
                        Arc::new(MemoryAccounts::default()),
                        Arc::new(MemoryReports::default()),
                    )
                }
            };

        Self::with_stores(config, accounts, reports)
    }

    pub fn with_stores(
        config: Config,
        accounts: Arc<dyn AccountStore>,
        reports: Arc<dyn ReportStore>,
    ) -> Result<Arc<Self>, StartupError> {
        let credentials = Credentials::new(config.scrypt_log_n)?;

        let mut decoy = [0u8; 32];
        OsRng.fill_bytes(&mut decoy);
        let decoy_hash = credentials.hash(&hex::encode(decoy))?;

        let sessions = SessionKeys::new(config.session_secret.clone(), config.session_ttl_secs);

        Ok(Arc::new(Self {
            config,
            accounts,
            reports,
            sessions,
            credentials,
            decoy_hash,
        }))
    }
}
