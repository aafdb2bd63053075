//! HTTP routes for slipbot.
//!
//! Provides:
//! - Employee lookup, listing and mobile registration
//! - Salary slip download and delivery
//! - Workbook export/reload and slip index reload
//! - WhatsApp (Meta Cloud API) webhook verification and inbound messages

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use slipbot_common::{Error, PhoneMatcher};
use slipbot_directory::{DirectoryService, EmployeeListing, SlipContent};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::conversation::slip_caption;
use crate::message::ChannelMessage;
use crate::traits::{ChannelError, MessageGateway};
use crate::whatsapp::WhatsAppChannel;

const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;

// ============================================================================
// State
// ============================================================================

/// Shared state for the slipbot HTTP server.
pub struct AppState {
    /// Employee directory and slip index
    pub directory: Arc<DirectoryService>,
    /// Outbound gateway (a disconnected stub when WhatsApp is disabled)
    pub gateway: Arc<dyn MessageGateway>,
    /// WhatsApp channel instance (if configured)
    pub whatsapp: Option<Arc<WhatsAppChannel>>,
    /// WhatsApp app secret for webhook signature verification
    pub whatsapp_app_secret: Option<Arc<str>>,
    /// Phone normalization for admin-supplied mobiles
    pub matcher: PhoneMatcher,
    /// Closing line of slip captions
    pub sender_signature: String,
    /// Channel for forwarding incoming messages
    pub message_tx: mpsc::Sender<ChannelMessage>,
}

// ============================================================================
// Errors
// ============================================================================

/// Error body in the `{ statusCode, error, message }` shape.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<ChannelError> for ApiError {
    fn from(err: ChannelError) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match self.0.root() {
            Error::NotFound(m) | Error::Validation(m) | Error::Transport(m) => m.clone(),
            _ => "An internal server error occurred".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, "request rejected");
        }

        let body = ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bad_request(message: &str) -> ApiError {
    ApiError(Error::Validation(message.to_string()))
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
struct WebhookResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmployeePage {
    total: usize,
    limit: usize,
    offset: usize,
    items: Vec<EmployeeListing>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MobileUpdateResponse {
    empid: String,
    name: String,
    mobile: Option<String>,
    salary_slip_available: bool,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct SlipSentResponse {
    success: bool,
    empid: String,
    name: String,
    mobile: String,
    message: &'static str,
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "slipbot",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ready = state.directory.is_initialized() && !state.message_tx.is_closed();

    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            service: "slipbot",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ============================================================================
// Employee Routes
// ============================================================================

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<String>,
    offset: Option<String>,
}

/// GET /employees
async fn list_employees(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<EmployeePage>> {
    let limit = match query.limit.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => DEFAULT_PAGE_LIMIT,
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|l| (1..=MAX_PAGE_LIMIT).contains(l))
            .ok_or_else(|| bad_request("limit must be between 1 and 1000"))?,
    };

    let offset = match query.offset.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => 0,
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| bad_request("offset must be zero or positive"))?,
    };

    let records = state.directory.list_employees().await?;
    let total = records.len();
    let items = records.into_iter().skip(offset).take(limit).collect();

    Ok(Json(EmployeePage {
        total,
        limit,
        offset,
        items,
    }))
}

/// GET /employees/:empid
async fn get_employee(
    State(state): State<Arc<AppState>>,
    Path(empid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state.directory.get_employee(&empid).await?;
    Ok(Json(record))
}

fn pdf_response(content: SlipContent) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", content.slip.file_name),
            ),
        ],
        content.bytes,
    )
        .into_response()
}

/// GET /employees/:empid/salary-slip
async fn download_slip(
    State(state): State<Arc<AppState>>,
    Path(empid): Path<String>,
) -> ApiResult<Response> {
    let content = state.directory.read_slip(&empid).await?;
    Ok(pdf_response(content))
}

/// Extract a non-blank string `empid` from a JSON body.
fn empid_from(payload: Option<Json<serde_json::Value>>) -> ApiResult<String> {
    payload
        .as_ref()
        .and_then(|Json(body)| body.get("empid"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| bad_request("empid is required in the request body"))
}

/// POST /salary-slip
async fn fetch_slip(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<serde_json::Value>>,
) -> ApiResult<Response> {
    let empid = empid_from(payload)?;
    let content = state.directory.read_slip(&empid).await?;
    Ok(pdf_response(content))
}

/// POST /employees/:empid/mobile
async fn update_mobile(
    State(state): State<Arc<AppState>>,
    Path(empid): Path<String>,
    payload: Option<Json<serde_json::Value>>,
) -> ApiResult<Json<MobileUpdateResponse>> {
    let empid = empid.trim().to_string();
    if empid.is_empty() {
        return Err(bad_request("empid is required in the URL"));
    }

    let raw = payload
        .as_ref()
        .and_then(|Json(body)| {
            body.get("mobileNo")
                .filter(|v| !v.is_null())
                .or_else(|| body.get("mobile"))
        })
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    let digits = state.matcher.validate_mobile(&raw)?;
    let updated = state.directory.update_mobile(&empid, Some(&digits)).await?;

    Ok(Json(MobileUpdateResponse {
        empid,
        name: updated.employee.name.unwrap_or_default(),
        mobile: updated.employee.mobile,
        salary_slip_available: updated.salary_slip_available,
        message: "mobile number updated",
    }))
}

/// POST /send-salary-slip
async fn send_slip(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<serde_json::Value>>,
) -> ApiResult<Json<SlipSentResponse>> {
    let empid = empid_from(payload)?;

    let record = state.directory.get_employee(&empid).await?;
    let Some(mobile) = record.employee.mobile.clone() else {
        return Err(bad_request("Employee does not have a mobile number"));
    };
    if record.salary_slip.is_none() {
        return Err(ApiError(Error::NotFound(
            "Salary slip not available for this employee".into(),
        )));
    }

    let content = state.directory.read_slip(&empid).await?;
    let name = record.employee.name.clone().unwrap_or_default();
    let caption = slip_caption(&record.employee, &state.sender_signature);

    state
        .gateway
        .send_document(
            &state.matcher.to_address(&mobile),
            content.bytes,
            &content.slip.file_name,
            Some(&caption),
        )
        .await?;

    tracing::info!(employee_id = %empid, "salary slip sent on request");

    Ok(Json(SlipSentResponse {
        success: true,
        empid,
        name,
        mobile,
        message: "Salary slip sent via WhatsApp",
    }))
}

// ============================================================================
// Reconciliation Routes
// ============================================================================

/// POST /employees/sync-to-excel
async fn sync_to_workbook(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let summary = state.directory.export_to_authoritative().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "count": summary.count,
        "path": summary.path,
        "message": "Excel updated from local store",
    })))
}

/// POST /employees/reload-from-excel
async fn reload_from_workbook(
    State(state): State<Arc<AppState>>,
) -> ApiResult<impl IntoResponse> {
    let summary = state.directory.reload_from_authoritative().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "imported": summary.imported,
        "message": "Local store reloaded from Excel",
    })))
}

/// POST /salary-slips/reload
async fn reload_slips(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let total = state.directory.reload_slips().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "total": total,
        "message": "Salary slip index reloaded",
    })))
}

// ============================================================================
// WhatsApp Routes
// ============================================================================

/// GET /whatsapp/status
async fn whatsapp_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.gateway.status().await)
}

fn whatsapp_channel(state: &AppState) -> ApiResult<&Arc<WhatsAppChannel>> {
    state
        .whatsapp
        .as_ref()
        .ok_or_else(|| ApiError(Error::NotFound("WhatsApp channel not configured".into())))
}

/// POST /whatsapp/disconnect
async fn whatsapp_disconnect(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    whatsapp_channel(&state)?.shutdown().await;
    Ok(Json(serde_json::json!({ "message": "WhatsApp disconnected" })))
}

/// POST /whatsapp/reconnect
async fn whatsapp_reconnect(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    whatsapp_channel(&state)?.init().await?;
    Ok(Json(state.gateway.status().await))
}

#[derive(Debug, Deserialize)]
struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Verify WhatsApp webhook signature (X-Hub-Signature-256).
/// See: <https://developers.facebook.com/docs/graph-api/webhooks/getting-started#verification-requests>
pub fn verify_whatsapp_signature(app_secret: &str, body: &[u8], signature_header: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    // Constant-time comparison
    mac.verify_slice(&expected).is_ok()
}

/// GET /whatsapp (Meta webhook verification)
async fn whatsapp_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WhatsAppVerifyQuery>,
) -> impl IntoResponse {
    let Some(ref whatsapp) = state.whatsapp else {
        return (StatusCode::NOT_FOUND, "WhatsApp channel not configured".to_string());
    };

    let token_matches = params.verify_token.as_deref().is_some_and(|t| {
        let expected = whatsapp.verify_token();
        t.len() == expected.len()
            && t.bytes()
                .zip(expected.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    });

    if params.mode.as_deref() == Some("subscribe") && token_matches {
        if let Some(challenge) = params.challenge {
            tracing::info!("WhatsApp webhook verified");
            return (StatusCode::OK, challenge);
        }
        return (StatusCode::BAD_REQUEST, "Missing hub.challenge".to_string());
    }

    tracing::warn!("WhatsApp webhook verification failed: token mismatch");
    (StatusCode::FORBIDDEN, "Forbidden".to_string())
}

/// POST /whatsapp (incoming message webhook)
async fn whatsapp_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let reply = |status: StatusCode, success: bool, message: Option<&str>| {
        (
            status,
            Json(WebhookResponse {
                success,
                message: message.map(str::to_string),
            }),
        )
    };

    let Some(ref whatsapp) = state.whatsapp else {
        return reply(
            StatusCode::NOT_FOUND,
            false,
            Some("WhatsApp channel not configured"),
        );
    };

    if let Some(ref app_secret) = state.whatsapp_app_secret {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !verify_whatsapp_signature(app_secret, &body, signature) {
            tracing::warn!(
                signature = if signature.is_empty() { "missing" } else { "invalid" },
                "WhatsApp webhook signature verification failed"
            );
            return reply(StatusCode::UNAUTHORIZED, false, Some("Invalid signature"));
        }
    }

    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        return reply(StatusCode::BAD_REQUEST, false, Some("Invalid JSON payload"));
    };

    // Status updates carry no messages and are simply acknowledged
    for msg in whatsapp.parse_webhook_payload(&payload) {
        tracing::info!(
            from = %msg.sender,
            trace_id = %msg.trace_id,
            "WhatsApp message received"
        );

        if let Err(e) = state.message_tx.send(msg).await {
            tracing::error!(error = %e, "failed to forward WhatsApp message");
            return reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                Some("Failed to forward message"),
            );
        }
    }

    reply(StatusCode::OK, true, None)
}

async fn not_found() -> ApiError {
    ApiError(Error::NotFound("Route not found".into()))
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the slipbot HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Directory
        .route("/employees", get(list_employees))
        .route("/employees/sync-to-excel", post(sync_to_workbook))
        .route("/employees/reload-from-excel", post(reload_from_workbook))
        .route("/employees/:empid", get(get_employee))
        .route("/employees/:empid/salary-slip", get(download_slip))
        .route("/employees/:empid/mobile", post(update_mobile))
        // Slips
        .route("/salary-slip", post(fetch_slip))
        .route("/send-salary-slip", post(send_slip))
        .route("/salary-slips/reload", post(reload_slips))
        // WhatsApp
        .route("/whatsapp", get(whatsapp_verify).post(whatsapp_webhook))
        .route("/whatsapp/status", get(whatsapp_status))
        .route("/whatsapp/disconnect", post(whatsapp_disconnect))
        .route("/whatsapp/reconnect", post(whatsapp_reconnect))
        .fallback(not_found)
        .with_state(state)
}

/// Create the shared state with a receiver for inbound chat messages.
pub fn create_state(
    directory: Arc<DirectoryService>,
    gateway: Arc<dyn MessageGateway>,
    whatsapp: Option<Arc<WhatsAppChannel>>,
    config: &slipbot_common::Config,
) -> (Arc<AppState>, mpsc::Receiver<ChannelMessage>) {
    let (tx, rx) = mpsc::channel(100);

    let state = Arc::new(AppState {
        directory,
        gateway,
        whatsapp,
        whatsapp_app_secret: config
            .whatsapp
            .app_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(Arc::from),
        matcher: PhoneMatcher::new(&config.phone),
        sender_signature: config.conversation.sender_signature.clone(),
        message_tx: tx,
    });

    (state, rx)
}
