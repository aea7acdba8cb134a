use std::{net::SocketAddr, sync::Arc};

use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use server::{
    access::Role,
    build_router,
    config::Config,
    memory::{MemoryAccounts, MemoryReports},
    state::State,
    store::{NewAccount, Profile},
};
use tokio::net::TcpListener;

const ADMIN: (&str, &str) = ("root", "Admin#Pass1");
const PASSWORD: &str = "Patient#Pass1";

struct TestApp {
    address: SocketAddr,
    client: Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    async fn post_form(&self, path: &str, token: Option<&str>, form: &[(&str, &str)]) -> Response {
        let mut request = self.client.post(self.url(path)).form(form);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("request")
    }

    async fn put_form(&self, path: &str, token: &str, form: &[(&str, &str)]) -> Response {
        self.client
            .put(self.url(path))
            .bearer_auth(token)
            .form(form)
            .send()
            .await
            .expect("request")
    }

    async fn get(&self, path: &str, token: Option<&str>) -> Response {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("request")
    }

    async fn delete(&self, path: &str, token: &str) -> Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("request")
    }

    async fn login(&self, username: &str, password: &str) -> Response {
        self.post_form("/login", None, &[("username", username), ("password", password)])
            .await
    }

    async fn token(&self, username: &str, password: &str) -> String {
        let response = self.login(username, password).await;
        assert_eq!(response.status(), StatusCode::OK, "login {username}");

        let body: Value = response.json().await.expect("json");
        body["token"].as_str().expect("token").to_string()
    }

    async fn register(&self, kind: &str, username: &str) -> Value {
        let response = self
            .post_form(
                &format!("/register/{kind}"),
                None,
                &[("username", username), ("password", PASSWORD)],
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "register {username}");

        response.json().await.expect("json")
    }

    async fn patient(&self, username: &str) -> (u64, String) {
        let account = self.register("patient", username).await;
        let id = account["id"].as_u64().expect("id");
        (id, self.token(username, PASSWORD).await)
    }

    async fn approved_doctor(&self, username: &str) -> String {
        let account = self.register("doctor", username).await;
        let id = account["id"].as_u64().expect("id");

        let admin = self.token(ADMIN.0, ADMIN.1).await;
        let response = self
            .post_form(&format!("/admin/users/{id}/approve"), Some(&admin), &[])
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        self.token(username, PASSWORD).await
    }
}

async fn spawn_app() -> TestApp {
    let config = Config {
        scrypt_log_n: 4,
        session_secret: b"integration-test-secret-0123456789".to_vec(),
        ..Config::default()
    };

    let state = State::with_stores(
        config,
        Arc::new(MemoryAccounts::default()),
        Arc::new(MemoryReports::default()),
    )
    .expect("state");

    let password_hash = state.credentials.hash(ADMIN.1).expect("hash");
    state
        .accounts
        .insert(NewAccount {
            username: ADMIN.0.to_string(),
            password_hash,
            role: Role::Admin,
            approved: true,
            profile: Profile::default(),
        })
        .await
        .expect("bootstrap admin");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("address");
    let app = build_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    TestApp {
        address,
        client: Client::new(),
    }
}

fn reference_record() -> Vec<(&'static str, &'static str)> {
    vec![
        ("age", "55"),
        ("gender", "Male"),
        ("hypertension", "1"),
        ("heart_disease", "0"),
        ("ever_married", "Yes"),
        ("work_type", "Private"),
        ("Residence_type", "Urban"),
        ("avg_glucose_level", "180.5"),
        ("bmi", "28.3"),
        ("smoking_status", "formerly smoked"),
        ("stroke", "0"),
    ]
}

fn with(
    mut form: Vec<(&'static str, &'static str)>,
    key: &'static str,
    value: &'static str,
) -> Vec<(&'static str, &'static str)> {
    form.retain(|(k, _)| *k != key);
    form.push((key, value));
    form
}

fn error_fields(body: &Value) -> Vec<String> {
    body["fields"]
        .as_array()
        .expect("fields")
        .iter()
        .map(|f| f["field"].as_str().expect("field").to_string())
        .collect()
}

async fn create_report(app: &TestApp, token: &str, form: &[(&str, &str)]) -> Value {
    let response = app.post_form("/reports", Some(token), form).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.expect("json")
}

#[tokio::test]
async fn test_health() {
    let app = spawn_app().await;

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reference_scenario_score() {
    let app = spawn_app().await;
    let (patient_id, token) = app.patient("alice").await;

    let created = create_report(&app, &token, &reference_record()).await;
    assert_eq!(created["owner_id"], patient_id);
    assert_eq!(created["risk"]["score"], 75.66);
    assert_eq!(created["risk"]["band"], "high");
    assert_eq!(created["risk"]["exceeds_scale"], false);

    let id = created["id"].as_u64().expect("id");
    let fetched: Value = app
        .get(&format!("/reports/{id}"), Some(&token))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(fetched["residence_type"], "Urban");
    assert_eq!(fetched["risk"]["score"], 75.66);
}

#[tokio::test]
async fn test_age_out_of_range_rejected() {
    let app = spawn_app().await;
    let (_, token) = app.patient("old.timer").await;

    let response = app
        .post_form("/reports", Some(&token), &with(reference_record(), "age", "150"))
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json().await.expect("json");
    assert_eq!(error_fields(&body), ["age"]);
    assert!(body.get("risk").is_none());

    let listed: Value = app.get("/reports", Some(&token)).await.json().await.expect("json");
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_every_bad_field_reported() {
    let app = spawn_app().await;
    let (_, token) = app.patient("bob").await;

    let mut form = with(reference_record(), "bmi", "95");
    form = with(form, "gender", "Robot");
    form = with(form, "stroke", "maybe");
    form.retain(|(k, _)| *k != "work_type");

    let response = app.post_form("/reports", Some(&token), &form).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json().await.expect("json");
    assert_eq!(error_fields(&body), ["gender", "work_type", "bmi", "stroke"]);
}

#[tokio::test]
async fn test_patient_cannot_touch_other_reports() {
    let app = spawn_app().await;
    let (_, owner) = app.patient("owner").await;
    let (intruder_id, intruder) = app.patient("intruder").await;

    let created = create_report(&app, &owner, &reference_record()).await;
    let path = format!("/reports/{}", created["id"]);

    let missing = app.get("/reports/9999", Some(&intruder)).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let missing_body = missing.text().await.expect("body");

    let read = app.get(&path, Some(&intruder)).await;
    assert_eq!(read.status(), StatusCode::NOT_FOUND);
    assert_eq!(read.text().await.expect("body"), missing_body);

    // role and owner claims in the body are ignored
    let mut forged = reference_record();
    forged.push(("role", "admin"));
    let intruder_id = intruder_id.to_string();
    forged.push(("owner_id", intruder_id.as_str()));

    let update = app.put_form(&path, &intruder, &forged).await;
    assert_eq!(update.status(), StatusCode::NOT_FOUND);

    let delete = app.delete(&path, &intruder).await;
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);

    // still there for its owner
    assert_eq!(app.get(&path, Some(&owner)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_patient_filed_report_owned_by_caller() {
    let app = spawn_app().await;
    let (victim_id, _) = app.patient("victim").await;
    let (caller_id, token) = app.patient("caller").await;

    let victim_id = victim_id.to_string();
    let mut form = reference_record();
    form.push(("owner_id", victim_id.as_str()));

    let created = create_report(&app, &token, &form).await;
    assert_eq!(created["owner_id"], caller_id);
}

#[tokio::test]
async fn test_owner_can_update_and_delete() {
    let app = spawn_app().await;
    let (_, token) = app.patient("carol").await;

    let created = create_report(&app, &token, &reference_record()).await;
    let path = format!("/reports/{}", created["id"]);

    let update = app
        .put_form(&path, &token, &with(reference_record(), "hypertension", "0"))
        .await;
    assert_eq!(update.status(), StatusCode::OK);
    let updated: Value = update.json().await.expect("json");
    assert_eq!(updated["hypertension"], false);
    assert_eq!(updated["risk"]["band"], "medium");

    let invalid = app
        .put_form(&path, &token, &with(reference_record(), "bmi", "0"))
        .await;
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(app.delete(&path, &token).await.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.get(&path, Some(&token)).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_doctor_needs_approval() {
    let app = spawn_app().await;

    let doctor = app.register("doctor", "dr.strange").await;
    assert_eq!(doctor["approved"], false);
    assert!(doctor.get("password_hash").is_none());

    let refused = app.login("dr.strange", PASSWORD).await;
    assert_eq!(refused.status(), StatusCode::FORBIDDEN);

    let wrong = app.login("dr.strange", "Wrong#Pass1").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let admin = app.token(ADMIN.0, ADMIN.1).await;
    let approved = app
        .post_form(&format!("/admin/users/{}/approve", doctor["id"]), Some(&admin), &[])
        .await;
    assert_eq!(approved.status(), StatusCode::OK);

    assert_eq!(app.login("dr.strange", PASSWORD).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_patient_logs_in_right_away() {
    let app = spawn_app().await;

    let patient = app.register("patient", "dave").await;
    assert_eq!(patient["approved"], true);
    assert_eq!(patient["role"], "patient");

    let token = app.token("dave", PASSWORD).await;
    let me: Value = app.get("/me", Some(&token)).await.json().await.expect("json");
    assert_eq!(me["username"], "dave");
}

#[tokio::test]
async fn test_bad_tokens_rejected() {
    let app = spawn_app().await;
    let (_, token) = app.patient("erin").await;

    assert_eq!(app.get("/me", None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.get("/me", Some("garbage")).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let (payload, signature) = token.split_once('.').expect("token shape");
    let forged_payload = String::from_utf8(hex::decode(payload).expect("hex"))
        .expect("utf8")
        .replace("patient", "admin");
    let forged = format!("{}.{signature}", hex::encode(forged_payload));

    let response = app.get("/admin/users", Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_username_looks_like_wrong_password() {
    let app = spawn_app().await;
    app.patient("gail").await;

    let unknown = app.login("nobody.here", PASSWORD).await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    let unknown: Value = unknown.json().await.expect("json");

    let wrong = app.login("gail", "Wrong#Pass1").await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let wrong: Value = wrong.json().await.expect("json");

    assert_eq!(unknown, wrong);
}

#[tokio::test]
async fn test_duplicate_username() {
    let app = spawn_app().await;
    app.register("patient", "frank").await;

    let again = app
        .post_form(
            "/register/doctor",
            None,
            &[("username", "frank"), ("password", PASSWORD)],
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_weak_registration_rejected() {
    let app = spawn_app().await;

    let response = app
        .post_form(
            "/register/patient",
            None,
            &[("username", "g"), ("password", "password")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json().await.expect("json");
    assert_eq!(error_fields(&body), ["username", "password"]);
}

#[tokio::test]
async fn test_doctor_files_for_patient() {
    let app = spawn_app().await;
    let (patient_id, patient) = app.patient("grace").await;
    let doctor = app.approved_doctor("dr.house").await;

    let missing_owner = app.post_form("/reports", Some(&doctor), &reference_record()).await;
    assert_eq!(missing_owner.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = missing_owner.json().await.expect("json");
    assert_eq!(error_fields(&body), ["owner_id"]);

    // the admin account is not a patient
    let mut form = reference_record();
    form.push(("owner_id", "1"));
    let wrong_owner = app.post_form("/reports", Some(&doctor), &form).await;
    assert_eq!(wrong_owner.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let patient_id_text = patient_id.to_string();
    let mut form = reference_record();
    form.push(("owner_id", patient_id_text.as_str()));
    let created = create_report(&app, &doctor, &form).await;
    assert_eq!(created["owner_id"], patient_id);

    let own: Value = app.get("/reports", Some(&patient)).await.json().await.expect("json");
    assert_eq!(own.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_staff_search_and_stats() {
    let app = spawn_app().await;
    let (patient_id, patient) = app.patient("heidi").await;
    let doctor = app.approved_doctor("dr.quinn").await;

    create_report(&app, &patient, &reference_record()).await;
    create_report(
        &app,
        &patient,
        &with(with(reference_record(), "stroke", "1"), "smoking_status", "smokes"),
    )
    .await;

    let hits: Value = app
        .get(&format!("/reports/search?q={patient_id}"), Some(&doctor))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(hits.as_array().map(Vec::len), Some(2));

    let none: Value = app
        .get("/reports/search?q=abc", Some(&doctor))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(none.as_array().map(Vec::len), Some(0));

    let forbidden = app.get("/reports/search?q=1", Some(&patient)).await;
    assert_eq!(forbidden.status(), StatusCode::NOT_FOUND);

    let stats: Value = app
        .get("/reports/stats", Some(&doctor))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["stroke_count"], 1);
    assert_eq!(stats["by_smoking"]["smokes"], 1);
    assert_eq!(stats["by_smoking"]["formerly smoked"], 1);

    let listed: Value = app
        .get("/reports?limit=1", Some(&doctor))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["stroke"], true);
}

#[tokio::test]
async fn test_account_administration() {
    let app = spawn_app().await;
    let admin = app.token(ADMIN.0, ADMIN.1).await;
    let (patient_id, patient) = app.patient("ivan").await;
    create_report(&app, &patient, &reference_record()).await;

    let users: Value = app.get("/admin/users", Some(&admin)).await.json().await.expect("json");
    assert_eq!(users[0]["username"], "ivan");

    let denied = app.get("/admin/users", Some(&patient)).await;
    assert_eq!(denied.status(), StatusCode::NOT_FOUND);

    let created = app
        .post_form(
            "/admin/users",
            Some(&admin),
            &[
                ("username", "dr.admitted"),
                ("password", PASSWORD),
                ("role", "doctor"),
            ],
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created: Value = created.json().await.expect("json");
    assert_eq!(created["approved"], true);

    let bad_role = app
        .post_form(
            "/admin/users",
            Some(&admin),
            &[("username", "x"), ("password", PASSWORD), ("role", "root")],
        )
        .await;
    let body: Value = bad_role.json().await.expect("json");
    assert_eq!(error_fields(&body), ["username", "role"]);

    let own_id = app.get("/me", Some(&admin)).await.json::<Value>().await.expect("json")["id"]
        .as_u64()
        .expect("id");
    let self_delete = app.delete(&format!("/admin/users/{own_id}"), &admin).await;
    assert_eq!(self_delete.status(), StatusCode::BAD_REQUEST);

    let removed = app.delete(&format!("/admin/users/{patient_id}"), &admin).await;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    // token outlives the account but no longer works
    assert_eq!(app.get("/me", Some(&patient)).await.status(), StatusCode::UNAUTHORIZED);

    let stats: Value = app
        .get("/reports/stats", Some(&admin))
        .await
        .json()
        .await
        .expect("json");
    assert_eq!(stats["total"], 0);
}

#[tokio::test]
async fn test_password_change() {
    let app = spawn_app().await;
    let (_, token) = app.patient("judy").await;

    let wrong = app
        .post_form(
            "/me/password",
            Some(&token),
            &[("old_password", "Nope#Pass1"), ("new_password", "Fresh#Pass2")],
        )
        .await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let changed = app
        .post_form(
            "/me/password",
            Some(&token),
            &[("old_password", PASSWORD), ("new_password", "Fresh#Pass2")],
        )
        .await;
    assert_eq!(changed.status(), StatusCode::NO_CONTENT);

    assert_eq!(app.login("judy", PASSWORD).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.login("judy", "Fresh#Pass2").await.status(), StatusCode::OK);
}
