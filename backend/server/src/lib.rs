//! Documentation of a role-based stroke risk record service.
//!
//!
//!
//! # General Infrastructure
//! - One axum server, stateless apart from its two stores
//! - Accounts live in Redis, patient reports in Meilisearch
//! - Both stores sit behind traits, with in-memory versions for local runs and tests
//! - Admin bootstrap and offline scoring through the `stroke-admin` binary
//!
//!
//!
//! # Roles
//!
//! | Role | Reports | Accounts |
//! |---|---|---|
//! | admin | every report | list, create, approve, delete |
//! | doctor | every report, files on behalf of patients | none |
//! | patient | only their own | none |
//!
//! Patients are approved on registration. Doctors wait for an admin.
//!
//! Anything a caller may not see answers exactly like a missing record
//! (`404 Not found or access denied`).
//!
//!
//!
//! # Request Flow
//!
//! ```text
//! form body -> validation::validate -> PatientRecord -> ReportStore
//! ReportStore -> StoredReport -> risk::score -> JSON
//! Authorization header -> session::SessionKeys::verify -> Caller -> access::authorize
//! ```
//!
//!
//!
//! # Notes
//!
//! ## Redis + Meilisearch
//! Accounts need atomic username claims and O(1) lookups by id, which Redis gives directly.
//! Reports need filtering by owner, sorting by creation time and facet counts for the
//! statistics page, which is what Meilisearch is for. Report ids still come from a Redis
//! counter so they stay dense and never collide.
//!
//! ## Risk score
//! A fixed weighted sum, not a model. See [`risk`].
//!
//!
//!
//! # Setup
//!
//! Run locally without any backing services.
//! ```sh
//! STORAGE=memory SESSION_SECRET=change-me-to-something-long-enough RUST_LOG=info cargo run --bin stroke
//! ```
//!
//! Bootstrap the first administrator.
//! ```sh
//! cargo run --bin stroke-admin -- create-admin --username root --password 'Str0ng#Pass'
//! ```
//!
//! View current docs.
//! ```sh
//! cargo doc --open
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod access;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod memory;
pub mod risk;
pub mod routes;
pub mod search;
pub mod session;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

use config::Config;
use error::StartupError;
use routes::{
    approve_user_handler, change_password_handler, create_report_handler, create_user_handler,
    delete_report_handler, delete_user_handler, get_report_handler, health_handler,
    list_reports_handler, list_users_handler, login_handler, me_handler, register_doctor_handler,
    register_patient_handler, report_stats_handler, search_reports_handler, update_report_handler,
};
use state::State;

pub fn build_router(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/register/patient", post(register_patient_handler))
        .route("/register/doctor", post(register_doctor_handler))
        .route("/login", post(login_handler))
        .route("/me", get(me_handler))
        .route("/me/password", post(change_password_handler))
        .route(
            "/admin/users",
            get(list_users_handler).post(create_user_handler),
        )
        .route("/admin/users/{id}", delete(delete_user_handler))
        .route("/admin/users/{id}/approve", post(approve_user_handler))
        .route(
            "/reports",
            get(list_reports_handler).post(create_report_handler),
        )
        .route("/reports/search", get(search_reports_handler))
        .route("/reports/stats", get(report_stats_handler))
        .route(
            "/reports/{id}",
            get(get_report_handler)
                .put(update_report_handler)
                .delete(delete_report_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> Result<(), StartupError> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    info!("Starting server...");
    let address = format!("0.0.0.0:{}", state.config.port);
    let app = build_router(state);

    info!("Binding to {address}");
    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
