use std::{collections::HashMap, sync::LazyLock};

use axum::{Form, extract::rejection::FormRejection};
use regex::Regex;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::{
    access::{Caller, Decision, Role},
    credentials::{check_password_strength, check_username},
    error::AppError,
    store::Profile,
    validation::{FieldError, FieldErrorKind},
};

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const OLD_PASSWORD: &str = "old_password";
pub const NEW_PASSWORD: &str = "new_password";
pub const ROLE: &str = "role";
pub const FULL_NAME: &str = "full_name";
pub const EMAIL: &str = "email";
pub const LICENSE_NUMBER: &str = "license_number";
pub const OWNER_ID: &str = "owner_id";

pub const DEFAULT_PAGE: usize = 50;
pub const MAX_PAGE: usize = 100;

const MAX_PROFILE_LEN: usize = 200;

static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Runs password hashing and other CPU-heavy work off the async workers.
pub async fn blocking<F, T>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(work)
        .await
        .map_err(|e| AppError::InternalError(Box::new(e)))
}

pub fn ensure(decision: Decision) -> Result<(), AppError> {
    if decision.is_allowed() {
        Ok(())
    } else {
        Err(AppError::AuthorizationFailure)
    }
}

pub fn require_admin(caller: &Caller) -> Result<(), AppError> {
    match caller.role {
        Role::Admin => Ok(()),
        Role::Doctor | Role::Patient => Err(AppError::AuthorizationFailure),
    }
}

pub fn require_staff(caller: &Caller) -> Result<(), AppError> {
    if caller.role.is_staff() {
        Ok(())
    } else {
        Err(AppError::AuthorizationFailure)
    }
}

/// Anything that is not a plain non-negative integer matches nothing.
pub fn parse_search_id(query: &str) -> Option<u64> {
    query.trim().parse().ok()
}

pub fn page(limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
    (
        limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE),
        offset.unwrap_or(0),
    )
}

fn field<'a>(form: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    form.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn required<'a>(
    form: &'a HashMap<String, String>,
    name: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    let value = field(form, name);
    if value.is_none() {
        errors.push(FieldError::new(name, FieldErrorKind::Missing));
    }
    value
}

/// Passwords are never trimmed.
fn required_secret<'a>(
    form: &'a HashMap<String, String>,
    name: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a str> {
    let value = form.get(name).map(String::as_str).filter(|v| !v.is_empty());
    if value.is_none() {
        errors.push(FieldError::new(name, FieldErrorKind::Missing));
    }
    value
}

fn optional(
    form: &HashMap<String, String>,
    name: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let value = field(form, name)?;

    if value.chars().count() > MAX_PROFILE_LEN {
        errors.push(FieldError::new(
            name,
            FieldErrorKind::Rejected("must be at most 200 characters"),
        ));
        return None;
    }

    Some(value.to_string())
}

fn finish<T>(value: Option<T>, errors: Vec<FieldError>) -> Result<T, AppError> {
    match value {
        Some(value) if errors.is_empty() => Ok(value),
        _ => Err(AppError::ValidationFailure(errors)),
    }
}

#[derive(Debug)]
pub struct AccountForm {
    pub username: String,
    pub password: String,
    pub profile: Profile,
}

/// Username, password and the optional profile fields.
pub fn account_form(form: &HashMap<String, String>) -> Result<AccountForm, AppError> {
    let mut errors = Vec::new();

    let username = required(form, USERNAME, &mut errors).and_then(|username| {
        check_username(username)
            .map_err(|reason| {
                errors.push(FieldError::new(USERNAME, FieldErrorKind::Rejected(reason)))
            })
            .ok()
            .map(|_| username.to_string())
    });

    let password = required_secret(form, PASSWORD, &mut errors).and_then(|password| {
        check_password_strength(password)
            .map_err(|reason| {
                errors.push(FieldError::new(PASSWORD, FieldErrorKind::Rejected(reason)))
            })
            .ok()
            .map(|_| password.to_string())
    });

    let full_name = optional(form, FULL_NAME, &mut errors);
    let mut email = optional(form, EMAIL, &mut errors);
    if email.as_deref().is_some_and(|e| !EMAIL_SHAPE.is_match(e)) {
        errors.push(FieldError::new(
            EMAIL,
            FieldErrorKind::Rejected("must be a valid email address"),
        ));
        email = None;
    }
    let license_number = optional(form, LICENSE_NUMBER, &mut errors);

    let account = username.zip(password).map(|(username, password)| AccountForm {
        username,
        password,
        profile: Profile {
            full_name,
            email,
            license_number,
        },
    });

    finish(account, errors)
}

pub fn role_field(form: &HashMap<String, String>) -> Result<Role, AppError> {
    let mut errors = Vec::new();

    let role = required(form, ROLE, &mut errors).and_then(|role| {
        role.parse::<Role>()
            .map_err(|_| {
                errors.push(FieldError::new(
                    ROLE,
                    FieldErrorKind::Rejected("must be admin, doctor or patient"),
                ))
            })
            .ok()
    });

    finish(role, errors)
}

#[derive(Debug)]
pub struct PasswordChange {
    pub old_password: String,
    pub new_password: String,
}

pub fn password_change(form: &HashMap<String, String>) -> Result<PasswordChange, AppError> {
    let mut errors = Vec::new();

    let old_password = required_secret(form, OLD_PASSWORD, &mut errors).map(str::to_string);
    let new_password = required_secret(form, NEW_PASSWORD, &mut errors).and_then(|password| {
        check_password_strength(password)
            .map_err(|reason| {
                errors.push(FieldError::new(NEW_PASSWORD, FieldErrorKind::Rejected(reason)))
            })
            .ok()
            .map(|_| password.to_string())
    });

    let change = old_password
        .zip(new_password)
        .map(|(old_password, new_password)| PasswordChange {
            old_password,
            new_password,
        });

    finish(change, errors)
}

/// Present only when staff file a report on behalf of a patient.
pub fn owner_field(form: &HashMap<String, String>) -> Result<Option<u64>, FieldError> {
    match field(form, OWNER_ID) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| not_a_patient()),
    }
}

pub fn not_a_patient() -> FieldError {
    FieldError::new(
        OWNER_ID,
        FieldErrorKind::Rejected("must be a patient account id"),
    )
}

pub fn payload<T>(form: Result<Form<T>, FormRejection>) -> Result<T, AppError> {
    form.map(|Form(inner)| inner).map_err(|e| {
        debug!("Rejected form payload: {e}");
        AppError::MalformedPayload
    })
}
