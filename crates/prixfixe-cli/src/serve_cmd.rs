use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use prixfixe_core::EngineError;
use prixfixe_core::finalize::finalize_meal_plan;
use prixfixe_core::grocery::update_grocery_item;
use prixfixe_core::plan::get_meal_plan_detail;
use prixfixe_core::state::change_task_status;
use prixfixe_core::voting::{BallotEntry, cast_ballot};
use prixfixe_core::workers::{HouseholdReport, Workers};
use prixfixe_db::models::{GroceryListItemStatus, MealPlanTaskStatus};
use prixfixe_db::queries::grocery_list::{self, GroceryItemUpdate};
use prixfixe_db::queries::{meal_plan_tasks, meal_plans};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    kind: &'static str,
    details: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            details: msg.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_input",
            details: msg.into(),
        }
    }

    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind: "timed_out",
            details: msg.into(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::InvalidRecipeGraph(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::TimedOut(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::ConversionGraphInconsistent(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            kind: err.kind(),
            details: format!("{err:#}"),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, details = %self.details, "request failed");
        }
        let body = serde_json::json!({ "error": self.kind, "details": self.details });
        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

type ApiResult = Result<axum::response::Response, AppError>;

/// `Json` body extractor whose rejections render as `invalid_input`.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

// ---------------------------------------------------------------------------
// Router state
// ---------------------------------------------------------------------------

/// Shared handler state. Worker runs started by a request get a child of
/// `shutdown`, so stopping the server also stops them.
#[derive(Debug, Clone)]
pub struct AppState {
    pub workers: Workers,
    pub shutdown: CancellationToken,
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    #[serde(rename = "returnCount", default)]
    pub return_count: bool,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct HouseholdRequest {
    #[serde(rename = "householdID")]
    pub household_id: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct BallotRequest {
    #[serde(rename = "voterID")]
    pub voter_id: String,
    pub votes: Vec<BallotEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusRequest {
    pub from: MealPlanTaskStatus,
    pub to: MealPlanTaskStatus,
    #[serde(default)]
    pub status_explanation: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroceryItemRequest {
    pub status: Option<GroceryListItemStatus>,
    pub purchased_qty: Option<f64>,
    #[serde(rename = "purchasedUnitID")]
    pub purchased_unit_id: Option<String>,
    pub purchase_price: Option<f64>,
    pub status_explanation: Option<String>,
}

impl From<GroceryItemRequest> for GroceryItemUpdate {
    fn from(req: GroceryItemRequest) -> Self {
        Self {
            status: req.status,
            purchased_qty: req.purchased_qty,
            purchased_unit_id: req.purchased_unit_id,
            purchase_price: req.purchase_price,
            status_explanation: req.status_explanation,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(workers: Workers, shutdown: CancellationToken) -> Router {
    Router::new()
        .route("/workers/finalize", post(finalize_worker))
        .route("/workers/tasks", post(tasks_worker))
        .route("/workers/grocery", post(grocery_worker))
        .route("/api/meal_plans/{id}", get(get_plan))
        .route("/api/meal_plans/{id}/finalize", post(finalize_plan))
        .route(
            "/api/meal_plans/{id}/events/{event_id}/ballots",
            post(submit_ballot),
        )
        .route("/api/meal_plans/{id}/missing_votes", get(missing_votes))
        .route("/api/meal_plans/{id}/tasks", get(list_tasks))
        .route("/api/meal_plans/{id}/tasks/{task_id}", patch(update_task))
        .route("/api/meal_plans/{id}/grocery_list", get(list_grocery))
        .route(
            "/api/meal_plans/{id}/grocery_list/{item_id}",
            patch(update_grocery),
        )
        .layer(CorsLayer::permissive())
        .with_state(AppState { workers, shutdown })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(workers: Workers, bind: &str, port: u16, cancel: CancellationToken) -> Result<()> {
    workers.reload_catalog().await?;
    let app = build_router(workers, cancel.clone());
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("prixfixe serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("prixfixe serve shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Worker handlers
// ---------------------------------------------------------------------------

async fn finalize_worker(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FinalizeRequest>,
) -> ApiResult {
    let cancel = state.shutdown.child_token();
    let report = state.workers.finalize_meal_plans(&cancel).await?;
    if cancel.is_cancelled() && !report.skipped.is_empty() {
        return Err(AppError::timed_out(format!(
            "server shutting down; {} plan(s) left for the next run",
            report.skipped.len()
        )));
    }
    if report.timed_out {
        return Err(AppError::timed_out(format!(
            "finalized {} plan(s) before the budget ran out; {} left for the next run",
            report.count,
            report.skipped.len()
        )));
    }
    tracing::debug!(return_count = req.return_count, count = report.count, "finalize worker invoked");
    Ok(Json(FinalizeResponse {
        count: report.count,
    })
    .into_response())
}

async fn tasks_worker(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<HouseholdRequest>,
) -> ApiResult {
    let cancel = state.shutdown.child_token();
    state.workers.reload_catalog().await?;
    let report = state
        .workers
        .create_meal_plan_tasks(&req.household_id, &cancel)
        .await?;
    household_response(report, &cancel)
}

async fn grocery_worker(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<HouseholdRequest>,
) -> ApiResult {
    let cancel = state.shutdown.child_token();
    state.workers.reload_catalog().await?;
    let report = state
        .workers
        .initialize_grocery_lists(&req.household_id, &cancel)
        .await?;
    household_response(report, &cancel)
}

fn household_response(report: HouseholdReport, cancel: &CancellationToken) -> ApiResult {
    if cancel.is_cancelled() && !report.skipped.is_empty() {
        return Err(AppError::timed_out(format!(
            "server shutting down; processed {} plan(s)",
            report.processed
        )));
    }
    if report.timed_out {
        return Err(AppError::timed_out(format!(
            "processed {} plan(s) before the budget ran out",
            report.processed
        )));
    }
    Ok(Json(SuccessResponse {
        success: report.success,
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Meal plan handlers
// ---------------------------------------------------------------------------

async fn require_plan(workers: &Workers, plan_id: &str) -> Result<(), AppError> {
    meal_plans::get_meal_plan(&workers.pool, plan_id)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("meal plan {plan_id} not found")))
}

async fn get_plan(
    State(AppState { workers, .. }): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let detail = get_meal_plan_detail(&workers.pool, &id).await?;
    Ok(Json(detail).into_response())
}

async fn finalize_plan(
    State(AppState { workers, .. }): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    let outcome = finalize_meal_plan(&workers.pool, &workers.events, &id, Utc::now()).await?;
    Ok(Json(outcome).into_response())
}

async fn submit_ballot(
    State(AppState { workers, .. }): State<AppState>,
    Path((id, event_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<BallotRequest>,
) -> ApiResult {
    let stored = cast_ballot(
        &workers.pool,
        &id,
        &event_id,
        &req.voter_id,
        &req.votes,
        Utc::now(),
    )
    .await?;
    Ok(Json(stored).into_response())
}

async fn missing_votes(
    State(AppState { workers, .. }): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    require_plan(&workers, &id).await?;
    let missing = meal_plans::missing_votes(&workers.pool, &id).await?;
    Ok(Json(missing).into_response())
}

async fn list_tasks(
    State(AppState { workers, .. }): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    require_plan(&workers, &id).await?;
    let tasks = meal_plan_tasks::tasks_for_plan(&workers.pool, &id).await?;
    Ok(Json(tasks).into_response())
}

async fn update_task(
    State(AppState { workers, .. }): State<AppState>,
    Path((id, task_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<TaskStatusRequest>,
) -> ApiResult {
    meal_plan_tasks::get_task(&workers.pool, &task_id)
        .await?
        .filter(|t| t.meal_plan_id == id)
        .ok_or_else(|| AppError::not_found(format!("meal plan task {task_id} not found")))?;

    let task = change_task_status(
        &workers.pool,
        &task_id,
        req.from,
        req.to,
        &req.status_explanation,
    )
    .await?;
    Ok(Json(task).into_response())
}

async fn list_grocery(
    State(AppState { workers, .. }): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult {
    require_plan(&workers, &id).await?;
    let items = grocery_list::items_for_plan(&workers.pool, &id).await?;
    Ok(Json(items).into_response())
}

async fn update_grocery(
    State(AppState { workers, .. }): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    ApiJson(req): ApiJson<GroceryItemRequest>,
) -> ApiResult {
    grocery_list::get_item(&workers.pool, &item_id)
        .await?
        .filter(|i| i.meal_plan_id == id)
        .ok_or_else(|| AppError::not_found(format!("grocery list item {item_id} not found")))?;

    let item = update_grocery_item(&workers.pool, &item_id, &req.into()).await?;
    Ok(Json(item).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
