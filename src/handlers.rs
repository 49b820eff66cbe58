use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::components::calendar::{create_events, BatchResult, CalendarApi, CalendarError};
use crate::components::planner::{compose_conversation, PlannerError, PlannerModel};
use crate::components::token::TokenManager;
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::validation::{validate_chat_request, validate_event_batch, ValidationError};

/// Scopes requested at sign-in: read the calendar, write events
const OAUTH_SCOPES: &str =
    "https://www.googleapis.com/auth/calendar.readonly https://www.googleapis.com/auth/calendar.events";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub token_manager: TokenManager,
    pub planner: Arc<dyn PlannerModel>,
    pub calendar: Arc<dyn CalendarApi>,
}

/// Build the application router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/logout", get(logout_handler))
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/calendar/events",
            get(list_events_handler).post(create_events_handler),
        )
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Read a named cookie from the request headers
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie = headers.get(header::COOKIE)?;
    let cookie_str = cookie.to_str().ok()?;
    for cookie_pair in cookie_str.split(';') {
        let mut parts = cookie_pair.trim().split('=');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if key == name {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Extract the session id from the request
///
/// Checks the session cookie first, then falls back to a bearer
/// Authorization header.
fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(session_id) = cookie_value(headers, "session_id") {
        return Some(session_id);
    }

    let auth_header = headers.get(header::AUTHORIZATION)?;
    let auth_str = auth_header.to_str().ok()?;
    auth_str
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

/// Render the current time in the configured timezone for the persona prompt
fn current_local_time(timezone: &str) -> String {
    let tz: Tz = timezone.parse().unwrap_or(chrono_tz::UTC);
    Utc::now()
        .with_timezone(&tz)
        .format("%A, %Y-%m-%d %H:%M (%Z)")
        .to_string()
}

#[derive(Debug, Serialize)]
struct ChatReply {
    reply: String,
}

/// Handler for one chat turn
pub async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    // Authentication is checked before anything else so unauthenticated
    // calls never reach an external API
    let session_id = extract_session_id(&headers).ok_or(ApiError::Unauthenticated)?;
    state.token_manager.get_valid_credential(&session_id).await?;

    let request = validate_chat_request(&body)?;

    let now = current_local_time(&state.config.timezone);
    let turns = compose_conversation(
        &now,
        request.schedule.as_deref(),
        &request.history,
        &request.message,
    );

    let reply = state.planner.generate(&turns).await.map_err(|e| match e {
        PlannerError::RateLimited => ApiError::RateLimited,
        PlannerError::Failure(detail) => ApiError::Internal(detail),
    })?;

    Ok(Json(ChatReply { reply }))
}

/// Handler for reading upcoming calendar events
pub async fn list_events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let session_id = extract_session_id(&headers).ok_or(ApiError::Unauthenticated)?;
    let credential = state.token_manager.get_valid_credential(&session_id).await?;

    let events = state
        .calendar
        .list_upcoming(&credential.access_token)
        .await
        .map_err(|e| match e {
            CalendarError::Unauthorized => ApiError::Unauthenticated,
            CalendarError::InvalidResponse(detail) => {
                error!("Calendar returned an unexpected response: {}", detail);
                ApiError::UpstreamInvalid
            }
            CalendarError::Request(detail) => ApiError::Internal(detail),
        })?;

    // Results must always reflect live calendar state
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(events)).into_response())
}

/// Handler for writing a batch of events to the calendar
pub async fn create_events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<BatchResult>> {
    let session_id = extract_session_id(&headers).ok_or(ApiError::Unauthenticated)?;
    let credential = state.token_manager.get_valid_credential(&session_id).await?;

    let events = validate_event_batch(&body)?;

    let result = create_events(state.calendar.as_ref(), &credential.access_token, &events).await;

    Ok(Json(result))
}

/// Redirect the browser to the identity provider's consent page
///
/// The random `state` is echoed back by the provider and verified against a
/// short-lived cookie in the callback, tying the callback to this browser.
pub async fn login_handler(State(state): State<AppState>) -> ApiResult<Response> {
    let oauth_state = Uuid::new_v4().to_string();

    let mut url = Url::parse(&state.config.auth_url)
        .map_err(|e| ApiError::Internal(format!("Invalid auth URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("client_id", &state.config.google_client_id)
        .append_pair("redirect_uri", &state.config.oauth_redirect_url)
        .append_pair("response_type", "code")
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("scope", OAUTH_SCOPES)
        .append_pair("state", &oauth_state);

    let cookie = format!(
        "oauth_state={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=600",
        oauth_state
    );
    let mut response = Redirect::to(url.as_str()).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::Internal(format!("Invalid cookie value: {}", e)))?,
    );
    Ok(response)
}

/// Handle the OAuth callback: verify the state, exchange the code, and
/// start a session
pub async fn callback_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    // The state echoed by the provider must match the one set at login
    let expected_state = cookie_value(&headers, "oauth_state");
    let returned_state = params.get("state");
    match (&expected_state, returned_state) {
        (Some(expected), Some(returned)) if expected == returned => {}
        _ => return Err(ApiError::Validation(ValidationError::MalformedInput)),
    }

    let code = params
        .get("code")
        .ok_or(ApiError::Validation(ValidationError::MalformedInput))?;

    let session_id = Uuid::new_v4().to_string();
    state.token_manager.sign_in(&session_id, code).await?;

    info!("New session established");

    let cookie = format!("session_id={}; Path=/; HttpOnly; SameSite=Lax", session_id);
    let mut response = Redirect::to("/").into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::Internal(format!("Invalid cookie value: {}", e)))?,
    );
    // The state cookie has served its purpose
    response.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_static("oauth_state=; Path=/; HttpOnly; Max-Age=0"),
    );
    Ok(response)
}

/// Destroy the session and clear the cookie
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if let Some(session_id) = extract_session_id(&headers) {
        state.token_manager.sign_out(&session_id).await?;
    }

    let mut response = Redirect::to("/").into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session_id=; Path=/; HttpOnly; Max-Age=0"),
    );
    Ok(response)
}

/// Handler for API health check
pub async fn health_handler() -> &'static str {
    "OK"
}
