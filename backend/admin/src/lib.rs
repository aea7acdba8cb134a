//! # Stroke Admin
//!
//! Operator tasks that must work before any administrator exists, plus an offline
//! scorer for checking the formula by hand.
//!
//! Account commands talk to Redis directly using the same `REDIS_URL` and
//! `SCRYPT_LOG_N` settings as the server.
use anyhow::{Context, Result, bail, ensure};
use server::{
    access::Role,
    config::Config,
    credentials::{Credentials, check_password_strength, check_username},
    database::{RedisAccounts, init_redis},
    risk::{RiskScore, score_values},
    store::{Account, AccountStore, NewAccount, Profile},
    validation::{AGE_RANGE, BMI_RANGE, GLUCOSE_MIN},
};

async fn accounts(config: &Config) -> Result<RedisAccounts> {
    let connection = init_redis(&config.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;

    Ok(RedisAccounts::new(connection))
}

pub async fn create_admin(config: &Config, username: &str, password: &str) -> Result<Account> {
    if let Err(reason) = check_username(username) {
        bail!("username {reason}");
    }
    if let Err(reason) = check_password_strength(password) {
        bail!("password {reason}");
    }

    let credentials = Credentials::new(config.scrypt_log_n)?;
    let password_hash = credentials.hash(password)?;

    let account = accounts(config)
        .await?
        .insert(NewAccount {
            username: username.to_string(),
            password_hash,
            role: Role::Admin,
            approved: true,
            profile: Profile::default(),
        })
        .await
        .with_context(|| format!("Could not create administrator {username}"))?;

    Ok(account)
}

pub async fn approve(config: &Config, id: u64) -> Result<Account> {
    let accounts = accounts(config).await?;

    if !accounts.approve(id).await? {
        bail!("No account with id {id}");
    }

    accounts
        .get(id)
        .await?
        .with_context(|| format!("Account {id} disappeared after approval"))
}

pub fn score(age: f64, hypertension: bool, avg_glucose_level: f64, bmi: f64) -> Result<RiskScore> {
    ensure!(
        (AGE_RANGE.0..=AGE_RANGE.1).contains(&age),
        "age must be between {} and {}",
        AGE_RANGE.0,
        AGE_RANGE.1
    );
    ensure!(
        avg_glucose_level.is_finite() && avg_glucose_level >= GLUCOSE_MIN,
        "glucose must be at least {GLUCOSE_MIN}"
    );
    ensure!(
        (BMI_RANGE.0..=BMI_RANGE.1).contains(&bmi),
        "bmi must be between {} and {}",
        BMI_RANGE.0,
        BMI_RANGE.1
    );

    Ok(score_values(age, hypertension, avg_glucose_level, bmi))
}
