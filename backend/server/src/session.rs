//! # Sessions
//!
//! Stateless bearer tokens signed with HMAC-SHA256.
//!
//! ```text
//! hex("<account id>:<role>:<expires at, unix secs>") "." hex(hmac(secret, payload))
//! ```
//!
//! Every authenticated route takes a [`Caller`] argument, produced here from the
//! `Authorization: Bearer` header. The account is re-read from the store on each request,
//! so a deleted or role-changed account stops working straight away.
use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use crate::{access::Caller, error::AppError, state::State};

type HmacSha256 = Hmac<Sha256>;

const BEARER: &str = "Bearer ";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Malformed token")]
    Malformed,

    #[error("Bad signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct SessionKeys {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl SessionKeys {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    pub fn issue(&self, caller: Caller, now: i64) -> SessionToken {
        let expires_at = now.saturating_add(self.ttl_secs);
        let payload = format!("{}:{}:{expires_at}", caller.id, caller.role);

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        SessionToken {
            token: format!("{}.{}", hex::encode(payload), hex::encode(signature)),
            expires_at,
        }
    }

    pub fn verify(&self, token: &str, now: i64) -> Result<Caller, SessionError> {
        let (payload_hex, signature_hex) = token.split_once('.').ok_or(SessionError::Malformed)?;

        let payload = hex::decode(payload_hex).map_err(|_| SessionError::Malformed)?;
        let signature = hex::decode(signature_hex).map_err(|_| SessionError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| SessionError::Malformed)?;
        let mut parts = payload.splitn(3, ':');

        let id = parts.next().and_then(|p| p.parse::<u64>().ok());
        let role = parts.next().and_then(|p| p.parse().ok());
        let expires_at = parts.next().and_then(|p| p.parse::<i64>().ok());

        let (Some(id), Some(role), Some(expires_at)) = (id, role, expires_at) else {
            return Err(SessionError::Malformed);
        };

        if expires_at <= now {
            return Err(SessionError::Expired);
        }

        Ok(Caller { id, role })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER)
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<Arc<State>> for Caller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthenticated)?;

        let caller = state
            .sessions
            .verify(token, Utc::now().timestamp())
            .map_err(|e| {
                debug!("Rejected session token: {e}");
                AppError::Unauthenticated
            })?;

        match state.accounts.get(caller.id).await? {
            Some(account) if account.role == caller.role && account.approved => Ok(caller),
            _ => {
                debug!("Session for account {} no longer valid", caller.id);
                Err(AppError::Unauthenticated)
            }
        }
    }
}
