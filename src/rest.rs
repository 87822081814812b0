//! REST API layer for EcoCollect using Axum (exposed on port 11111)
//!
//! Public endpoints cover health, login, registration and password strength.
//! Everything else needs a Bearer JWT; `/admin` routes additionally require
//! the admin role and `/picker` plus `/verifications` the picker role.

use axum::{
    extract::{Path, Query, Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::accounts::{self, AccountUpdate, NewAccount, SystemStats};
use crate::alerts::{self, NewAlert};
use crate::assignments::{self, DailyStats, NewAssignment, RouteSummary};
use crate::auth::{self, validate_jwt, AuthSettings, Session};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    today, Account, Alert, Assignment, AssignmentStatus, AuthPayload, CollectionRecord, PhotoCategory,
    Role, Route, RouteStatus, ScheduledPickup,
};
use crate::reports::{self, ReportKind};
use crate::schedule::{self, PickupRequest};
use crate::storage::Storage;
use crate::validation::{self, LoginForm, PasswordChangeForm, PasswordStrength, RegisterForm};
use crate::verification::{self, RecordDetails, WeightReading};

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub auth: AuthSettings,
    pub platform_margin: f64,
}

impl AppState {
    pub fn new(storage: Storage, config: &Config) -> Self {
        Self {
            storage: Arc::new(storage),
            auth: AuthSettings::from_config(config),
            platform_margin: config.platform_margin,
        }
    }
}

/// Success envelope; failures use [`crate::error::ErrorBody`].
#[derive(Serialize, Deserialize, Debug)]
pub struct RestResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

type ApiResult<T> = Result<Json<RestResponse<T>>>;

fn ok<T>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok(Json(RestResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    }))
}

fn done(message: impl Into<String>) -> ApiResult<()> {
    Ok(Json(RestResponse {
        success: true,
        message: message.into(),
        data: None,
    }))
}

async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(Error::Unauthorized)?;

    let claims = validate_jwt(token, &state.auth.jwt_secret).map_err(|_| Error::Unauthorized)?;

    // tokens of deleted or deactivated accounts stop working immediately
    match state.storage.get_account(&claims.sub)? {
        Some(account) if account.is_active() && account.role == claims.role => {}
        _ => return Err(Error::Unauthorized),
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

async fn require_admin(Extension(claims): Extension<AuthPayload>, req: Request, next: Next) -> Result<Response> {
    if claims.role != Role::Admin {
        return Err(Error::Forbidden);
    }
    Ok(next.run(req).await)
}

async fn require_picker(Extension(claims): Extension<AuthPayload>, req: Request, next: Next) -> Result<Response> {
    if claims.role != Role::Picker {
        return Err(Error::Forbidden);
    }
    Ok(next.run(req).await)
}

/// Create Axum router with all dashboard endpoints
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let admin_routes = Router::new()
        .route("/admin/accounts", get(list_accounts_handler).post(create_account_handler))
        .route(
            "/admin/accounts/:id",
            get(get_account_handler).put(update_account_handler).delete(delete_account_handler),
        )
        .route("/admin/accounts/:id/toggle-status", post(toggle_status_handler))
        .route("/admin/accounts/:id/suspend", post(suspend_handler))
        .route("/admin/accounts/:id/password", post(set_password_handler))
        .route("/admin/routes", get(list_routes_handler).post(create_route_handler))
        .route("/admin/routes/:id", delete(delete_route_handler))
        .route("/admin/routes/:id/assign", post(assign_route_handler))
        .route("/admin/routes/:id/status", post(route_status_handler))
        .route("/admin/routes/:id/optimize", post(optimize_route_handler))
        .route("/admin/alerts", get(list_alerts_handler).post(raise_alert_handler))
        .route("/admin/alerts/critical", get(critical_alerts_handler))
        .route("/admin/alerts/broadcast", post(broadcast_handler))
        .route("/admin/alerts/:id/resolve", post(resolve_alert_handler))
        .route("/admin/assignments", get(admin_assignments_handler).post(create_assignment_handler))
        .route("/admin/stats", get(stats_handler))
        .route("/admin/reports/:kind", get(report_handler))
        .route("/admin/verifications/:id/reject", post(reject_verification_handler))
        .route_layer(middleware::from_fn(require_admin));

    let picker_routes = Router::new()
        .route("/picker/assignments", get(picker_assignments_handler))
        .route("/picker/assignments/:id", get(picker_assignment_handler))
        .route("/picker/assignments/:id/start", post(start_assignment_handler))
        .route("/picker/assignments/:id/complete", post(complete_assignment_handler))
        .route("/picker/assignments/:id/delay", post(delay_assignment_handler))
        .route("/picker/stats", get(picker_stats_handler))
        .route("/picker/route-summary", get(route_summary_handler))
        .route("/verifications", get(list_verifications_handler).post(open_verification_handler))
        .route("/verifications/:id", get(get_verification_handler))
        .route("/verifications/:id/photos", post(add_photo_handler))
        .route("/verifications/:id/photos/:category/:index", delete(remove_photo_handler))
        .route("/verifications/:id/weight", put(weight_handler))
        .route("/verifications/:id/signature", put(signature_handler))
        .route("/verifications/:id/details", put(details_handler))
        .route("/verifications/:id/submit", post(submit_verification_handler))
        .route_layer(middleware::from_fn(require_picker));

    let auth_routes = Router::new()
        .route("/me", get(me_handler))
        .route("/account/password", post(change_password_handler))
        .route("/schedule", get(list_pickups_handler).post(schedule_pickup_handler))
        .route("/schedule/:id/cancel", post(cancel_pickup_handler))
        .route("/schedule/:id/reschedule", post(reschedule_pickup_handler))
        .merge(picker_routes)
        .merge(admin_routes)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/register", post(register_handler))
        .route("/password-strength", post(password_strength_handler))
        .merge(auth_routes)
        .with_state(state)
}

// --- public ---

async fn health_handler() -> ApiResult<()> {
    done("EcoCollect API healthy")
}

async fn login_handler(State(state): State<Arc<AppState>>, Json(form): Json<LoginForm>) -> ApiResult<Session> {
    let session = auth::login(&state.storage, &state.auth, &form)?;
    ok("Login successful", session)
}

async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(form): Json<RegisterForm>,
) -> ApiResult<Session> {
    let session = auth::register(&state.storage, &state.auth, &form)?;
    ok("Account created", session)
}

#[derive(Deserialize)]
pub struct PasswordBody {
    #[serde(default)]
    pub password: String,
}

async fn password_strength_handler(Json(body): Json<PasswordBody>) -> ApiResult<PasswordStrength> {
    let strength = validation::password_strength(&body.password);
    ok(strength.label.to_string(), strength)
}

// --- any authenticated account ---

async fn me_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> ApiResult<Account> {
    ok("Current account", accounts::get(&state.storage, &claims.sub)?)
}

async fn change_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Json(form): Json<PasswordChangeForm>,
) -> ApiResult<()> {
    auth::change_password(&state.storage, &state.auth, &claims.sub, &form)?;
    done("Password updated")
}

async fn list_pickups_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> ApiResult<Vec<ScheduledPickup>> {
    ok("Scheduled pickups", schedule::list(&state.storage, &claims.sub)?)
}

async fn schedule_pickup_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Json(request): Json<PickupRequest>,
) -> ApiResult<ScheduledPickup> {
    let pickup = schedule::schedule(&state.storage, &claims.sub, &request)?;
    let message = format!(
        "Your {} collection has been scheduled for {} at {}.",
        pickup.waste_type,
        pickup.date.format("%B %-d"),
        pickup.time_slot
    );
    ok(message, pickup)
}

async fn cancel_pickup_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<ScheduledPickup> {
    let pickup = schedule::cancel(&state.storage, &claims.sub, &id)?;
    ok(format!("Your {} collection has been cancelled.", pickup.waste_type), pickup)
}

async fn reschedule_pickup_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<ScheduledPickup> {
    let pickup = schedule::request_reschedule(&state.storage, &claims.sub, &id)?;
    ok(
        format!("Reschedule request for {} has been submitted.", pickup.waste_type),
        pickup,
    )
}

// --- picker ---

#[derive(Deserialize)]
pub struct StatusFilter {
    pub status: Option<AssignmentStatus>,
}

async fn picker_assignments_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Query(filter): Query<StatusFilter>,
) -> ApiResult<Vec<Assignment>> {
    ok(
        "Assignments",
        assignments::list_for_picker(&state.storage, &claims.sub, filter.status)?,
    )
}

async fn picker_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    let assignment = assignments::get(&state.storage, &id)?;
    if assignment.picker_id != claims.sub {
        return Err(Error::Forbidden);
    }
    ok("Assignment", assignment)
}

async fn start_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    let assignment = assignments::start(&state.storage, &id, &claims.sub)?;
    ok(format!("Navigation to {} started", assignment.customer_name), assignment)
}

async fn complete_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    let assignment = assignments::complete(&state.storage, &id, &claims.sub)?;
    ok(format!("Earned ${:.2}", assignment.earnings), assignment)
}

async fn delay_assignment_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<Assignment> {
    ok("Assignment delayed", assignments::mark_delayed(&state.storage, &id, &claims.sub)?)
}

async fn picker_stats_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> ApiResult<DailyStats> {
    ok("Daily stats", assignments::daily_stats(&state.storage, &claims.sub)?)
}

async fn route_summary_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> ApiResult<RouteSummary> {
    ok("Route summary", assignments::route_summary(&state.storage, &claims.sub)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenVerification {
    pub assignment_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoBody {
    pub category: PhotoCategory,
    pub data_url: String,
}

#[derive(Deserialize)]
pub struct WeightBody {
    pub weight: f64,
}

#[derive(Deserialize)]
pub struct SignatureBody {
    pub signature: Option<String>,
}

async fn list_verifications_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
) -> ApiResult<Vec<CollectionRecord>> {
    ok("Collection records", verification::list_for_picker(&state.storage, &claims.sub)?)
}

async fn open_verification_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Json(body): Json<OpenVerification>,
) -> ApiResult<CollectionRecord> {
    ok(
        "Collection record opened",
        verification::open(&state.storage, &body.assignment_id, &claims.sub)?,
    )
}

async fn get_verification_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<CollectionRecord> {
    ok("Collection record", verification::get_owned(&state.storage, &id, &claims.sub)?)
}

async fn add_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
    Json(body): Json<PhotoBody>,
) -> ApiResult<CollectionRecord> {
    let record = verification::add_photo(&state.storage, &id, &claims.sub, body.category, &body.data_url)?;
    ok("Photo saved", record)
}

async fn remove_photo_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path((id, category, index)): Path<(String, PhotoCategory, usize)>,
) -> ApiResult<CollectionRecord> {
    let record = verification::remove_photo(&state.storage, &id, &claims.sub, category, index)?;
    ok("Photo removed", record)
}

async fn weight_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
    Json(body): Json<WeightBody>,
) -> ApiResult<WeightReading> {
    let reading = verification::record_weight(&state.storage, &id, &claims.sub, body.weight)?;
    let message = reading.warning.clone().unwrap_or_else(|| "Weight recorded".to_string());
    ok(message, reading)
}

async fn signature_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
    Json(body): Json<SignatureBody>,
) -> ApiResult<CollectionRecord> {
    let record = verification::set_signature(&state.storage, &id, &claims.sub, body.signature.as_deref())?;
    ok("Signature saved", record)
}

async fn details_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
    Json(details): Json<RecordDetails>,
) -> ApiResult<CollectionRecord> {
    ok("Details saved", verification::update_details(&state.storage, &id, &claims.sub, &details)?)
}

async fn submit_verification_handler(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> ApiResult<CollectionRecord> {
    ok(
        "Collection verified successfully",
        verification::submit(&state.storage, &id, &claims.sub)?,
    )
}

// --- admin ---

#[derive(Deserialize)]
pub struct AccountQuery {
    pub role: Option<Role>,
    pub search: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateAccountBody {
    pub role: Role,
    #[serde(flatten)]
    pub account: NewAccount,
}

async fn list_accounts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Vec<Account>> {
    let roles = match query.role {
        Some(role) => vec![role],
        None => Role::ALL.to_vec(),
    };
    let mut found = vec![];
    for role in roles {
        found.extend(accounts::list(&state.storage, role, query.search.as_deref())?);
    }
    ok("Accounts", found)
}

async fn create_account_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAccountBody>,
) -> ApiResult<Account> {
    let account = accounts::create(&state.storage, &state.auth, body.role, &body.account)?;
    ok(format!("{} created", body.role.display_name()), account)
}

async fn get_account_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Account> {
    ok("Account", accounts::get(&state.storage, &id)?)
}

async fn update_account_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(changes): Json<AccountUpdate>,
) -> ApiResult<Account> {
    ok("Account updated", accounts::update(&state.storage, &id, &changes)?)
}

async fn delete_account_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<()> {
    accounts::delete(&state.storage, &id)?;
    done(format!("Account {id} deleted"))
}

async fn toggle_status_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Account> {
    ok("Status updated", accounts::toggle_status(&state.storage, &id)?)
}

async fn suspend_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Account> {
    ok("Account suspended", accounts::suspend(&state.storage, &id)?)
}

async fn set_password_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<PasswordBody>,
) -> ApiResult<()> {
    auth::set_password(&state.storage, &state.auth, &id, &body.password)?;
    done("Password set")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRouteBody {
    pub picker_id: String,
}

#[derive(Deserialize)]
pub struct RouteStatusBody {
    pub status: RouteStatus,
}

async fn list_routes_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Route>> {
    ok("Routes", crate::routes::list(&state.storage)?)
}

async fn create_route_handler(State(state): State<Arc<AppState>>) -> ApiResult<Route> {
    let route = crate::routes::create(&state.storage)?;
    ok(format!("{} created", route.name), route)
}

async fn delete_route_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<()> {
    crate::routes::delete(&state.storage, &id)?;
    done(format!("Route {id} deleted"))
}

async fn assign_route_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AssignRouteBody>,
) -> ApiResult<Route> {
    ok("Picker assigned", crate::routes::assign_picker(&state.storage, &id, &body.picker_id)?)
}

async fn route_status_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RouteStatusBody>,
) -> ApiResult<Route> {
    ok("Route updated", crate::routes::set_status(&state.storage, &id, body.status)?)
}

async fn optimize_route_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Route> {
    let route = crate::routes::optimize(&state.storage, &id)?;
    ok(format!("Efficiency now {}%", route.efficiency), route)
}

async fn list_alerts_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Alert>> {
    ok("Alerts", alerts::list(&state.storage)?)
}

async fn critical_alerts_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Alert>> {
    ok("Critical alerts", alerts::critical_unresolved(&state.storage)?)
}

async fn raise_alert_handler(State(state): State<Arc<AppState>>, Json(alert): Json<NewAlert>) -> ApiResult<Alert> {
    ok("Alert raised", alerts::raise(&state.storage, alert)?)
}

async fn broadcast_handler(State(state): State<Arc<AppState>>) -> ApiResult<Alert> {
    ok("System alert sent to all users", alerts::broadcast_maintenance(&state.storage)?)
}

async fn resolve_alert_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Alert> {
    ok("Alert resolved", alerts::resolve(&state.storage, &id)?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentQuery {
    pub picker_id: Option<String>,
    pub status: Option<AssignmentStatus>,
}

async fn admin_assignments_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> ApiResult<Vec<Assignment>> {
    let all: Vec<Assignment> = state
        .storage
        .assignments()?
        .into_iter()
        .filter(|a| query.picker_id.as_deref().map_or(true, |p| a.picker_id == p))
        .filter(|a| query.status.map_or(true, |s| a.status == s))
        .collect();
    ok("Assignments", all)
}

async fn create_assignment_handler(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<NewAssignment>,
) -> ApiResult<Assignment> {
    ok("Assignment created", assignments::create(&state.storage, draft)?)
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<SystemStats> {
    ok("System statistics", accounts::system_stats(&state.storage)?)
}

async fn report_handler(State(state): State<Arc<AppState>>, Path(kind): Path<String>) -> Result<Response> {
    let kind: ReportKind = kind.parse().map_err(|_| Error::not_found("report", kind))?;
    let report = reports::generate(&state.storage, kind, today(), state.platform_margin)?;
    debug!(report = %report.filename, bytes = report.content.len(), "serving report");

    let disposition = format!("attachment; filename=\"{}\"", report.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.content,
    )
        .into_response())
}

async fn reject_verification_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CollectionRecord> {
    ok("Collection record rejected", verification::reject(&state.storage, &id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::settings;
    use crate::seed::{load_demo_data, DEMO_PASSWORD};
    use axum::{
        body::{to_bytes, Body},
        http::StatusCode,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt; // For .oneshot() testing

    fn app() -> Router {
        let storage = Storage::temporary().expect("temporary storage");
        load_demo_data(&storage, &settings(), DEMO_PASSWORD).expect("seed");
        create_router(AppState {
            storage: Arc::new(storage),
            auth: settings(),
            platform_margin: 0.25,
        })
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = axum::http::Request::builder().uri(uri).method(method);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn login(app: &Router, identifier: &str) -> String {
        let (status, body) = send(
            app,
            request(
                "POST",
                "/login",
                None,
                Some(json!({"emailOrUsername": identifier, "password": DEMO_PASSWORD})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_and_login_redirects() {
        let app = app();
        let (status, _) = send(&app, request("GET", "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            request("POST", "/login", None, Some(json!({"emailOrUsername": "admin", "password": DEMO_PASSWORD}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["redirect"], "/dashboard/admin");
        assert_eq!(body["data"]["role"], "admin");

        let (status, body) = send(
            &app,
            request("POST", "/login", None, Some(json!({"emailOrUsername": "admin", "password": "wrong"}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Invalid credentials");
    }

    #[tokio::test]
    async fn validation_errors_are_field_level() {
        let app = app();
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/register",
                None,
                Some(json!({
                    "firstName": "A",
                    "lastName": "Garcia",
                    "username": "_bad",
                    "email": "maria@example",
                    "password": "Recycle1!",
                    "confirmPassword": "Recycle2!",
                    "role": "picker",
                    "agreeToTerms": true
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap())
            .collect();
        assert!(fields.contains(&"firstName"));
        assert!(fields.contains(&"username"));
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"confirmPassword"));

        let (status, body) = send(&app, request("POST", "/password-strength", None, Some(json!({"password": "Abcdefg1!"})))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["score"], 100);
        assert_eq!(body["data"]["label"], "Strong");
    }

    #[tokio::test]
    async fn roles_guard_endpoints() {
        let app = app();
        let (status, _) = send(&app, request("GET", "/admin/stats", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(&app, request("GET", "/admin/stats", Some("not-a-token"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let picker = login(&app, "maria").await;
        let (status, _) = send(&app, request("GET", "/admin/stats", Some(&picker), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let resident = login(&app, "john@example.com").await;
        let (status, _) = send(&app, request("GET", "/picker/stats", Some(&resident), None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = login(&app, "admin").await;
        let (status, body) = send(&app, request("GET", "/admin/stats", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["totalAccounts"], 8);
        assert_eq!(body["data"]["activePickers"], 3);
    }

    #[tokio::test]
    async fn deactivated_account_token_stops_working() {
        let app = app();
        let admin = login(&app, "admin").await;
        let resident = login(&app, "sarah").await;

        let (status, _) = send(&app, request("GET", "/me", Some(&resident), None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, request("POST", "/admin/accounts/U002/toggle-status", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "inactive");

        let (status, _) = send(&app, request("GET", "/me", Some(&resident), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_manages_accounts_and_routes() {
        let app = app();
        let admin = login(&app, "admin").await;

        let (status, body) = send(&app, request("GET", "/admin/accounts?role=user&search=JOHN", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (status, body) = send(
            &app,
            request("POST", "/admin/accounts", Some(&admin), Some(json!({"role": "picker", "name": "Ana Lopez", "email": "ana@example.com"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], "WP004");

        let (status, body) = send(&app, request("POST", "/admin/routes", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], "R003");
        assert_eq!(body["data"]["name"], "New Route 3");

        let (status, body) = send(
            &app,
            request("POST", "/admin/routes/R003/assign", Some(&admin), Some(json!({"pickerId": "WP004"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["pickerName"], "Ana Lopez");

        // one admin deactivated, the other becomes the last
        let (status, _) = send(&app, request("POST", "/admin/accounts/A002/toggle-status", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, request("DELETE", "/admin/accounts/A001", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "Cannot delete the last active administrator");
    }

    #[tokio::test]
    async fn picker_completes_and_verifies_a_collection() {
        let app = app();
        let picker = login(&app, "maria").await;
        let photo = "data:image/png;base64,iVBORw0KGgo=";

        let (status, body) = send(&app, request("GET", "/picker/assignments?status=pending", Some(&picker), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 4);

        let (status, _) = send(&app, request("POST", "/picker/assignments/AS001/complete", Some(&picker), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, request("POST", "/verifications", Some(&picker), Some(json!({"assignmentId": "AS001"})))).await;
        assert_eq!(status, StatusCode::OK);
        let record_id = body["data"]["id"].as_str().unwrap().to_string();

        let (_, body) = send(
            &app,
            request("PUT", &format!("/verifications/{record_id}/weight"), Some(&picker), Some(json!({"weight": 58.0}))),
        )
        .await;
        assert_eq!(body["data"]["warning"], "Actual weight differs from estimate by 13.0kg. Please verify.");

        send(&app, request("POST", &format!("/verifications/{record_id}/photos"), Some(&picker), Some(json!({"category": "before", "dataUrl": photo})))).await;
        send(&app, request("PUT", &format!("/verifications/{record_id}/signature"), Some(&picker), Some(json!({"signature": photo})))).await;

        for step in ["start", "complete"] {
            let (status, _) = send(&app, request("POST", &format!("/picker/assignments/AS001/{step}"), Some(&picker), None)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, request("POST", &format!("/verifications/{record_id}/submit"), Some(&picker), None)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["verificationStatus"], "verified");

        let (_, body) = send(&app, request("GET", "/me", Some(&picker), None)).await;
        assert_eq!(body["data"]["earnings"], 2855.5);
        assert_eq!(body["data"]["collections"], 143);
    }

    #[tokio::test]
    async fn resident_schedules_and_cancels() {
        let app = app();
        let resident = login(&app, "john").await;

        let (status, body) = send(
            &app,
            request("POST", "/schedule", Some(&resident), Some(json!({"wasteType": "Recyclables", "timeSlot": "8:00 AM - 10:00 AM"}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["message"], "Please fill in all required fields to schedule a collection.");

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/schedule",
                Some(&resident),
                Some(json!({"date": "2030-03-25", "wasteType": "Recyclables", "timeSlot": "8:00 AM - 10:00 AM"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], "P004");

        let (status, _) = send(&app, request("POST", "/schedule/P004/cancel", Some(&resident), None)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, request("GET", "/schedule", Some(&resident), None)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn report_download_is_csv() {
        let app = app();
        let admin = login(&app, "admin").await;
        let response = app
            .clone()
            .oneshot(request("GET", "/admin/reports/financial", Some(&admin), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment; filename=\"financial-report-"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(csv.starts_with("Date,Revenue,Payouts,Profit\n"));

        let (status, _) = send(&app, request("GET", "/admin/reports/weekly", Some(&admin), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
