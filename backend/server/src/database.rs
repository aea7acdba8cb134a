//! # Redis
//!
//! Account store, plus the id counter for reports.
//!
//! ## Keys
//!
//! - `account:{id}`: hash of the account fields
//! - `accounts:usernames`: hash of username to id, claimed with `HSETNX`
//! - `accounts:next_id`: `INCR` counter
//! - `accounts:ids`: set of every live id, for listing
//! - `reports:next_id`: `INCR` counter for report ids (reports themselves live in Meilisearch)
//!
//! Ids come from `INCR` and are never reused. A failed username claim burns its id.
//!
//! Writes that must succeed or fail together run as Lua scripts: the username claim
//! and the account hash are written in one step, and field updates only land on a
//! hash that still exists.
//!
//! Timestamps are stored as unix milliseconds, `approved` as `0`/`1`.
//! Optional profile fields are simply absent from the hash when unset.
use std::{collections::HashMap, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{
    AsyncCommands, Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{
    access::Role,
    error::StoreError,
    store::{Account, AccountStore, NewAccount},
};

const USERNAMES: &str = "accounts:usernames";
const ACCOUNT_IDS: &str = "accounts:ids";
const NEXT_ACCOUNT_ID: &str = "accounts:next_id";
const NEXT_REPORT_ID: &str = "reports:next_id";

const ID: &str = "id";
const USERNAME: &str = "username";
const PASSWORD_HASH: &str = "password_hash";
const ROLE: &str = "role";
const APPROVED: &str = "approved";
const FULL_NAME: &str = "full_name";
const EMAIL: &str = "email";
const LICENSE_NUMBER: &str = "license_number";
const CREATED_AT: &str = "created_at";

/// KEYS: usernames, account hash, id set. ARGV: username, id, then field/value pairs.
static INSERT_ACCOUNT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[2], unpack(ARGV, 3))
        redis.call('SADD', KEYS[3], ARGV[2])
        return 1
        ",
    )
});

/// KEYS: account hash. ARGV: field, value.
static UPDATE_EXISTING: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
        return 1
        ",
    )
});

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, RedisError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(redis_url)?;
    client.get_connection_manager_with_config(config).await
}

pub async fn next_report_id(connection: &ConnectionManager) -> Result<u64, StoreError> {
    let mut connection = connection.clone();
    let id: u64 = connection.incr(NEXT_REPORT_ID, 1).await?;
    Ok(id)
}

fn account_key(id: u64) -> String {
    format!("account:{id}")
}

fn account_fields(account: &Account) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        (ID, account.id.to_string()),
        (USERNAME, account.username.clone()),
        (PASSWORD_HASH, account.password_hash.clone()),
        (ROLE, account.role.as_str().to_string()),
        (APPROVED, if account.approved { "1" } else { "0" }.to_string()),
        (CREATED_AT, account.created_at.timestamp_millis().to_string()),
    ];

    for (name, value) in [
        (FULL_NAME, &account.full_name),
        (EMAIL, &account.email),
        (LICENSE_NUMBER, &account.license_number),
    ] {
        if let Some(value) = value {
            fields.push((name, value.clone()));
        }
    }

    fields
}

fn insert_args(account: &Account) -> Vec<String> {
    let mut args = vec![account.username.clone(), account.id.to_string()];
    for (name, value) in account_fields(account) {
        args.push(name.to_string());
        args.push(value);
    }
    args
}

fn account_from_hash(id: u64, mut hash: HashMap<String, String>) -> Result<Account, StoreError> {
    let corrupt = |reason: &str| StoreError::Corrupt {
        key: account_key(id),
        reason: reason.to_string(),
    };

    let mut take = |field: &str| hash.remove(field).ok_or_else(|| corrupt(field));

    let username = take(USERNAME)?;
    let password_hash = take(PASSWORD_HASH)?;
    let role = take(ROLE)?.parse::<Role>().map_err(|_| corrupt(ROLE))?;
    let approved = take(APPROVED)? == "1";
    let created_at = take(CREATED_AT)?
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| corrupt(CREATED_AT))?;

    Ok(Account {
        id,
        username,
        password_hash,
        role,
        approved,
        full_name: hash.remove(FULL_NAME),
        email: hash.remove(EMAIL),
        license_number: hash.remove(LICENSE_NUMBER),
        created_at,
    })
}

#[derive(Clone)]
pub struct RedisAccounts {
    connection: ConnectionManager,
}

impl RedisAccounts {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn update_existing(
        &self,
        id: u64,
        field: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let updated: bool = UPDATE_EXISTING
            .key(account_key(id))
            .arg(field)
            .arg(value)
            .invoke_async(&mut connection)
            .await?;
        Ok(updated)
    }
}

#[async_trait]
impl AccountStore for RedisAccounts {
    async fn insert(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut connection = self.connection.clone();

        let id: u64 = connection.incr(NEXT_ACCOUNT_ID, 1).await?;
        let account = account.into_account(id, Utc::now());

        let inserted: bool = INSERT_ACCOUNT
            .key(USERNAMES)
            .key(account_key(id))
            .key(ACCOUNT_IDS)
            .arg(insert_args(&account))
            .invoke_async(&mut connection)
            .await?;

        if !inserted {
            return Err(StoreError::UsernameTaken);
        }

        Ok(account)
    }

    async fn get(&self, id: u64) -> Result<Option<Account>, StoreError> {
        let mut connection = self.connection.clone();
        let hash: HashMap<String, String> = connection.hgetall(account_key(id)).await?;

        if hash.is_empty() {
            return Ok(None);
        }

        account_from_hash(id, hash).map(Some)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StoreError> {
        let mut connection = self.connection.clone();
        let id: Option<u64> = connection.hget(USERNAMES, username).await?;

        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Account>, StoreError> {
        let mut connection = self.connection.clone();
        let ids: Vec<u64> = connection.smembers(ACCOUNT_IDS).await?;

        let mut accounts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(account) = self.get(id).await? {
                accounts.push(account);
            }
        }

        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(accounts)
    }

    async fn approve(&self, id: u64) -> Result<bool, StoreError> {
        self.update_existing(id, APPROVED, "1").await
    }

    async fn set_password_hash(&self, id: u64, password_hash: &str) -> Result<bool, StoreError> {
        self.update_existing(id, PASSWORD_HASH, password_hash).await
    }

    async fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let Some(account) = self.get(id).await? else {
            return Ok(false);
        };

        let mut connection = self.connection.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(account_key(id))
            .ignore()
            .hdel(USERNAMES, &account.username)
            .ignore()
            .srem(ACCOUNT_IDS, id)
            .ignore()
            .query_async(&mut connection)
            .await?;

        Ok(true)
    }
}
