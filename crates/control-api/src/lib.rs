//! The HTTP control plane (§6, "Control-plane HTTP"): a thin REST adapter
//! over the plan store. Treated as an external collaborator by the core
//! crate's spec, but implemented here the way the runtime's local API is
//! built — an axum [`Router`] over shared state.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rfault_core::{Direction, Plan, PlanError, RuleDef, RuleSnapshot};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub message: String,
}

/// Builds the control-plane router over a shared [`Plan`].
///
/// Routes are scoped by direction (`/rules/{direction}/...`) since this
/// plan, unlike the single-list plan the source exposed a bare `/rules`
/// for, keeps independent request/response rule lists (§3) — see
/// `DESIGN.md` for the rationale.
pub fn router(plan: Arc<Plan>) -> Router {
    Router::new()
        .route("/rules/:direction", get(list_rules).post(add_rule))
        .route("/rules/:direction/:name", get(get_rule).delete(delete_rule))
        .with_state(plan)
}

#[derive(Debug, Deserialize)]
struct RuleBody {
    name: String,
    #[serde(default)]
    delay: u64,
    #[serde(default)]
    drop: bool,
    #[serde(default)]
    return_empty: bool,
    #[serde(default)]
    return_err: String,
    #[serde(default)]
    percentage: u8,
    #[serde(default)]
    log: bool,
    #[serde(default)]
    client_addr: String,
    #[serde(default)]
    client_name: String,
    #[serde(default)]
    command: String,
    #[serde(default)]
    raw_match_any: Vec<String>,
    #[serde(default)]
    raw_match_all: Vec<String>,
    #[serde(default)]
    always_match: bool,
}

impl From<RuleBody> for RuleDef {
    fn from(b: RuleBody) -> Self {
        RuleDef {
            name: b.name,
            delay_ms: b.delay,
            drop: b.drop,
            return_empty: b.return_empty,
            return_err: b.return_err,
            percentage: b.percentage,
            log: b.log,
            client_addr: b.client_addr,
            client_name: b.client_name,
            command: b.command,
            raw_match_any: b.raw_match_any.into_iter().map(String::into_bytes).collect(),
            raw_match_all: b.raw_match_all.into_iter().map(String::into_bytes).collect(),
            always_match: b.always_match,
        }
    }
}

#[derive(Debug, Serialize)]
struct RuleView {
    name: String,
    delay: u64,
    drop: bool,
    return_empty: bool,
    return_err: String,
    percentage: u8,
    log: bool,
    client_addr: String,
    client_name: String,
    command: String,
    raw_match_any: Vec<String>,
    raw_match_all: Vec<String>,
    always_match: bool,
    hits: u64,
}

impl From<RuleSnapshot> for RuleView {
    fn from(r: RuleSnapshot) -> Self {
        RuleView {
            name: r.name,
            delay: r.delay_ms,
            drop: r.drop,
            return_empty: r.return_empty,
            return_err: r.return_err,
            percentage: r.percentage,
            log: r.log,
            client_addr: r.client_addr,
            client_name: r.client_name,
            command: r.command,
            raw_match_any: r.raw_match_any.into_iter().map(lossy_string).collect(),
            raw_match_all: r.raw_match_all.into_iter().map(lossy_string).collect(),
            always_match: r.always_match,
            hits: r.hits,
        }
    }
}

fn lossy_string(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Errors surfaced to control-plane callers (§7: rule-validation and
/// rule-not-found both map here).
#[derive(Debug)]
pub enum ApiError {
    UnknownDirection(String),
    Plan(PlanError),
}

impl From<PlanError> for ApiError {
    fn from(e: PlanError) -> Self {
        ApiError::Plan(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let resp_tuple = match self {
            ApiError::UnknownDirection(d) => (
                StatusCode::BAD_REQUEST,
                Json(ResponseMessage {
                    message: format!("unknown direction {d:?}: expected \"request\" or \"response\""),
                }),
            ),
            ApiError::Plan(PlanError::DuplicateRule(name)) => (
                StatusCode::CONFLICT,
                Json(ResponseMessage {
                    message: format!("rule {name:?} already exists"),
                }),
            ),
            ApiError::Plan(PlanError::RuleNotFound(name)) => (
                StatusCode::NOT_FOUND,
                Json(ResponseMessage {
                    message: format!("rule {name:?} not found"),
                }),
            ),
            ApiError::Plan(PlanError::InvalidPercentage { name, percentage }) => (
                StatusCode::BAD_REQUEST,
                Json(ResponseMessage {
                    message: format!("rule {name:?} has invalid percentage {percentage}"),
                }),
            ),
        };
        resp_tuple.into_response()
    }
}

fn parse_direction(raw: &str) -> Result<Direction, ApiError> {
    match raw {
        "request" => Ok(Direction::Request),
        "response" => Ok(Direction::Response),
        other => Err(ApiError::UnknownDirection(other.to_string())),
    }
}

async fn list_rules(
    State(plan): State<Arc<Plan>>,
    Path(direction): Path<String>,
) -> Result<Json<Vec<RuleView>>, ApiError> {
    let direction = parse_direction(&direction)?;
    Ok(Json(
        plan.list_rules(direction).into_iter().map(RuleView::from).collect(),
    ))
}

async fn add_rule(
    State(plan): State<Arc<Plan>>,
    Path(direction): Path<String>,
    Json(body): Json<RuleBody>,
) -> Result<Json<ResponseMessage>, ApiError> {
    let direction = parse_direction(&direction)?;
    let name = body.name.clone();
    plan.add_rule(direction, body.into())?;
    debug!(rule = %name, "rule added");
    Ok(Json(ResponseMessage {
        message: format!("rule {name:?} added"),
    }))
}

async fn get_rule(
    State(plan): State<Arc<Plan>>,
    Path((direction, name)): Path<(String, String)>,
) -> Result<Json<RuleView>, ApiError> {
    let direction = parse_direction(&direction)?;
    Ok(Json(plan.get_rule(direction, &name)?.into()))
}

async fn delete_rule(
    State(plan): State<Arc<Plan>>,
    Path((direction, name)): Path<(String, String)>,
) -> Result<Json<ResponseMessage>, ApiError> {
    let direction = parse_direction(&direction)?;
    plan.delete_rule(direction, &name)?;
    debug!(rule = %name, "rule deleted");
    Ok(Json(ResponseMessage {
        message: format!("rule {name:?} deleted"),
    }))
}
