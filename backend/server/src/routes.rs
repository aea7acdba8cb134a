use std::{collections::HashMap, sync::Arc};

use axum::{
    Form, Json,
    extract::{Path, Query, State as AxumState, rejection::FormRejection},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::{
    access::{Caller, Operation, Role, authorize},
    credentials::verify,
    error::{AppError, StoreError},
    risk::{RiskScore, score},
    session::SessionToken,
    state::State,
    store::{Account, NewAccount, SEARCH_LIMIT, StoredReport},
    utils::{
        AccountForm, OWNER_ID, PASSWORD, USERNAME, account_form, blocking, ensure, not_a_patient,
        owner_field, page, parse_search_id, password_change, payload, require_admin,
        require_staff, role_field,
    },
    validation::{FieldError, FieldErrorKind, validate},
};

type RawForm = Result<Form<HashMap<String, String>>, FormRejection>;
type AppState = AxumState<Arc<State>>;

#[derive(Serialize)]
pub struct ReportView {
    #[serde(flatten)]
    pub report: StoredReport,
    pub risk: RiskScore,
}

impl From<StoredReport> for ReportView {
    fn from(report: StoredReport) -> Self {
        let risk = score(&report.record);
        Self { report, risk }
    }
}

#[derive(Serialize)]
struct LoginResponse {
    #[serde(flatten)]
    session: SessionToken,
    account: Account,
}

#[derive(Deserialize)]
pub struct ListParams {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    q: String,
}

fn views(reports: Vec<StoredReport>) -> Vec<ReportView> {
    reports.into_iter().map(ReportView::from).collect()
}

async fn create_account(
    state: &State,
    account: AccountForm,
    role: Role,
    approved: bool,
) -> Result<Account, AppError> {
    let credentials = state.credentials.clone();
    let password = account.password;
    let password_hash = blocking(move || credentials.hash(&password)).await??;

    let created = state
        .accounts
        .insert(NewAccount {
            username: account.username,
            password_hash,
            role,
            approved,
            profile: account.profile,
        })
        .await
        .map_err(|e| match e {
            StoreError::UsernameTaken => AppError::Conflict("Username already taken"),
            other => other.into(),
        })?;

    info!(
        "Created {} account {} (approved: {})",
        created.role, created.id, created.approved
    );
    Ok(created)
}

async fn check_password(stored_hash: String, supplied: String) -> Result<bool, AppError> {
    blocking(move || verify(&stored_hash, &supplied)).await
}

async fn load_report(state: &State, id: u64) -> Result<StoredReport, AppError> {
    state.reports.get(id).await?.ok_or(AppError::NotFound)
}

fn guard(caller: &Caller, report: &StoredReport, operation: Operation) -> Result<(), AppError> {
    ensure(authorize(caller, report.owner_id, operation)).inspect_err(|_| {
        warn!(
            "Account {} ({}) denied {:?} on report {}",
            caller.id, caller.role, operation, report.id
        );
    })
}

/// Staff must name an existing patient account. Patients always own what they file.
async fn resolve_owner(
    state: &State,
    caller: &Caller,
    form: &HashMap<String, String>,
    errors: &mut Vec<FieldError>,
) -> Result<Option<u64>, AppError> {
    if caller.role == Role::Patient {
        return Ok(Some(caller.id));
    }

    let owner_id = match owner_field(form) {
        Ok(Some(owner_id)) => owner_id,
        Ok(None) => {
            errors.push(FieldError::new(OWNER_ID, FieldErrorKind::Missing));
            return Ok(None);
        }
        Err(e) => {
            errors.push(e);
            return Ok(None);
        }
    };

    match state.accounts.get(owner_id).await? {
        Some(account) if account.role == Role::Patient => Ok(Some(owner_id)),
        _ => {
            errors.push(not_a_patient());
            Ok(None)
        }
    }
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn register_patient_handler(
    AxumState(state): AppState,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let account = account_form(&payload(form)?)?;
    let created = create_account(&state, account, Role::Patient, true).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn register_doctor_handler(
    AxumState(state): AppState,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let account = account_form(&payload(form)?)?;
    let created = create_account(&state, account, Role::Doctor, false).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn login_handler(
    AxumState(state): AppState,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let form = payload(form)?;
    let username = form.get(USERNAME).map(|u| u.trim()).unwrap_or_default();
    let password = form.get(PASSWORD).cloned().unwrap_or_default();

    let Some(account) = state.accounts.find_by_username(username).await? else {
        check_password(state.decoy_hash.clone(), password).await?;
        warn!("Failed login for unknown username");
        return Err(AppError::AuthenticationFailure);
    };

    if !check_password(account.password_hash.clone(), password).await? {
        warn!("Failed login for account {}", account.id);
        return Err(AppError::AuthenticationFailure);
    }

    if !account.approved {
        info!("Login refused for unapproved account {}", account.id);
        return Err(AppError::PendingApproval);
    }

    let session = state.sessions.issue(
        Caller {
            id: account.id,
            role: account.role,
        },
        Utc::now().timestamp(),
    );
    info!("Account {} logged in", account.id);

    Ok(Json(LoginResponse { session, account }))
}

pub async fn me_handler(
    AxumState(state): AppState,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    let account = state
        .accounts
        .get(caller.id)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    Ok(Json(account))
}

pub async fn change_password_handler(
    AxumState(state): AppState,
    caller: Caller,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let change = password_change(&payload(form)?)?;

    let account = state
        .accounts
        .get(caller.id)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    if !check_password(account.password_hash, change.old_password).await? {
        warn!("Password change for account {} with wrong old password", caller.id);
        return Err(AppError::AuthenticationFailure);
    }

    let credentials = state.credentials.clone();
    let new_password = change.new_password;
    let password_hash = blocking(move || credentials.hash(&new_password)).await??;

    if !state
        .accounts
        .set_password_hash(caller.id, &password_hash)
        .await?
    {
        return Err(AppError::Unauthenticated);
    }
    info!("Account {} changed its password", caller.id);

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users_handler(
    AxumState(state): AppState,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&caller)?;

    Ok(Json(state.accounts.list().await?))
}

pub async fn create_user_handler(
    AxumState(state): AppState,
    caller: Caller,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&caller)?;
    let form = payload(form)?;

    let (account, role) = match (account_form(&form), role_field(&form)) {
        (Ok(account), Ok(role)) => (account, role),
        (account, role) => {
            let mut errors = Vec::new();
            for error in [account.err(), role.err()].into_iter().flatten() {
                match error {
                    AppError::ValidationFailure(fields) => errors.extend(fields),
                    other => return Err(other),
                }
            }
            return Err(AppError::ValidationFailure(errors));
        }
    };

    let created = create_account(&state, account, role, true).await?;
    info!("Admin {} created account {}", caller.id, created.id);

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn approve_user_handler(
    AxumState(state): AppState,
    caller: Caller,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&caller)?;

    if !state.accounts.approve(id).await? {
        return Err(AppError::NotFound);
    }
    info!("Admin {} approved account {id}", caller.id);

    let account = state.accounts.get(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(account))
}

pub async fn delete_user_handler(
    AxumState(state): AppState,
    caller: Caller,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&caller)?;

    if id == caller.id {
        return Err(AppError::Rejected(
            "Administrators cannot delete their own account",
        ));
    }

    let account = state.accounts.get(id).await?.ok_or(AppError::NotFound)?;

    if account.role == Role::Patient {
        let removed = state.reports.delete_by_owner(id).await?;
        info!("Removed {removed} reports owned by account {id}");
    }

    state.accounts.delete(id).await?;
    warn!("Admin {} deleted {} account {id}", caller.id, account.role);

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_report_handler(
    AxumState(state): AppState,
    caller: Caller,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let form = payload(form)?;

    let mut errors = Vec::new();
    let record = validate(&form).map_err(|fields| errors.extend(fields)).ok();
    let owner_id = resolve_owner(&state, &caller, &form, &mut errors).await?;

    let (Some(record), Some(owner_id)) = (record, owner_id) else {
        return Err(AppError::ValidationFailure(errors));
    };
    ensure(authorize(&caller, owner_id, Operation::Create))?;

    let report = state.reports.insert(owner_id, record).await?;
    info!(
        "Account {} filed report {} for account {owner_id}",
        caller.id, report.id
    );

    Ok((StatusCode::CREATED, Json(ReportView::from(report))))
}

pub async fn list_reports_handler(
    AxumState(state): AppState,
    caller: Caller,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let reports = match caller.role {
        Role::Patient => state.reports.list_by_owner(caller.id, SEARCH_LIMIT).await?,
        Role::Doctor | Role::Admin => {
            let (limit, offset) = page(params.limit, params.offset);
            state.reports.list_all(limit, offset).await?
        }
    };

    Ok(Json(views(reports)))
}

pub async fn search_reports_handler(
    AxumState(state): AppState,
    caller: Caller,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, AppError> {
    require_staff(&caller)?;

    let reports = match parse_search_id(&params.q) {
        Some(n) => state.reports.search_by_id(n, SEARCH_LIMIT).await?,
        None => Vec::new(),
    };

    Ok(Json(views(reports)))
}

pub async fn report_stats_handler(
    AxumState(state): AppState,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    require_staff(&caller)?;

    Ok(Json(state.reports.stats().await?))
}

pub async fn get_report_handler(
    AxumState(state): AppState,
    caller: Caller,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let report = load_report(&state, id).await?;
    guard(&caller, &report, Operation::Read)?;

    Ok(Json(ReportView::from(report)))
}

pub async fn update_report_handler(
    AxumState(state): AppState,
    caller: Caller,
    Path(id): Path<u64>,
    form: RawForm,
) -> Result<impl IntoResponse, AppError> {
    let form = payload(form)?;

    let report = load_report(&state, id).await?;
    guard(&caller, &report, Operation::Update)?;

    let record = validate(&form).map_err(AppError::ValidationFailure)?;
    let updated = state
        .reports
        .update(id, record)
        .await?
        .ok_or(AppError::NotFound)?;
    info!("Account {} updated report {id}", caller.id);

    Ok(Json(ReportView::from(updated)))
}

pub async fn delete_report_handler(
    AxumState(state): AppState,
    caller: Caller,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let report = load_report(&state, id).await?;
    guard(&caller, &report, Operation::Delete)?;

    if !state.reports.delete(id).await? {
        return Err(AppError::NotFound);
    }
    info!("Account {} deleted report {id}", caller.id);

    Ok(StatusCode::NO_CONTENT)
}
