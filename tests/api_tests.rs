use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskpilot::components::calendar::{CalendarApi, CalendarError, CalendarEvent, CreatedEvent};
use taskpilot::components::planner::{ModelTurn, PlannerError, PlannerModel};
use taskpilot::components::token::{Credential, IdentityProvider, TokenManager, TokenResponse};
use taskpilot::config::Config;
use taskpilot::handlers::{build_router, AppState};
use taskpilot::session::{InMemorySessionStore, SessionStore};
use taskpilot::validation::{EventTime, EventWrite};
use tower::ServiceExt;

/// Fake planner that records calls and returns a canned reply
struct FakePlanner {
    calls: AtomicUsize,
    rate_limited: bool,
}

impl FakePlanner {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            rate_limited: false,
        }
    }

    fn rate_limited() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            rate_limited: true,
        }
    }
}

#[async_trait]
impl PlannerModel for FakePlanner {
    async fn generate(&self, _turns: &[ModelTurn]) -> Result<String, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited {
            return Err(PlannerError::RateLimited);
        }
        Ok("Let's break that down. How long do you expect it to take?".to_string())
    }
}

/// Fake calendar that records calls and serves two canned events
struct FakeCalendar {
    list_calls: AtomicUsize,
    insert_calls: AtomicUsize,
    unauthorized: bool,
}

impl FakeCalendar {
    fn new() -> Self {
        Self {
            list_calls: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            unauthorized: false,
        }
    }

    fn unauthorized() -> Self {
        Self {
            unauthorized: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl CalendarApi for FakeCalendar {
    async fn list_upcoming(&self, _access_token: &str) -> Result<Vec<CalendarEvent>, CalendarError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized {
            return Err(CalendarError::Unauthorized);
        }
        Ok(vec![
            CalendarEvent {
                id: "event1".to_string(),
                summary: Some("Test Event 1".to_string()),
                start: Some(EventTime::DateTime("2026-08-24T10:00:00Z".to_string())),
                end: Some(EventTime::DateTime("2026-08-24T11:00:00Z".to_string())),
                ..Default::default()
            },
            CalendarEvent {
                id: "event2".to_string(),
                summary: Some("Test Event 2".to_string()),
                start: Some(EventTime::Date("2026-08-25".to_string())),
                end: Some(EventTime::Date("2026-08-26".to_string())),
                ..Default::default()
            },
        ])
    }

    async fn insert_event(
        &self,
        _access_token: &str,
        _event: &EventWrite,
    ) -> Result<CreatedEvent, CalendarError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedEvent {
            id: format!("created-{}", call),
            html_link: Some("https://calendar.example/created".to_string()),
        })
    }
}

/// Identity provider that must never be reached in these tests
struct UnusedIdentityProvider;

#[async_trait]
impl IdentityProvider for UnusedIdentityProvider {
    async fn exchange_code(&self, _code: &str) -> Result<TokenResponse, String> {
        Err("identity provider should not be called".to_string())
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenResponse, String> {
        Err("identity provider should not be called".to_string())
    }
}

fn test_config() -> Config {
    Config {
        gemini_api_key: "test-key".to_string(),
        gemini_model: "gemini-test".to_string(),
        model_api_url: "http://localhost:1/v1beta".to_string(),
        google_client_id: "client-id".to_string(),
        google_client_secret: "client-secret".to_string(),
        oauth_redirect_url: "http://localhost:3000/auth/callback".to_string(),
        token_url: "http://localhost:1/token".to_string(),
        auth_url: "http://localhost:1/auth".to_string(),
        calendar_api_url: "http://localhost:1/calendar/v3".to_string(),
        google_calendar_id: "primary".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        timezone: "UTC".to_string(),
        port: 0,
    }
}

struct TestApp {
    router: Router,
    planner: Arc<FakePlanner>,
    calendar: Arc<FakeCalendar>,
}

async fn build_app(planner: FakePlanner, calendar: FakeCalendar, with_session: bool) -> TestApp {
    let sessions = Arc::new(InMemorySessionStore::default());
    if with_session {
        let credential = Credential {
            access_token: "valid-access".to_string(),
            refresh_token: "valid-refresh".to_string(),
            expires_at: Utc::now().timestamp() + 3600,
            refresh_failed: false,
        };
        sessions.put("test-session", &credential).await.unwrap();
    }

    let planner = Arc::new(planner);
    let calendar = Arc::new(calendar);
    let state = AppState {
        config: Arc::new(test_config()),
        token_manager: TokenManager::new(sessions, Arc::new(UnusedIdentityProvider)),
        planner: planner.clone(),
        calendar: calendar.clone(),
    };

    TestApp {
        router: build_router(state),
        planner,
        calendar,
    }
}

fn chat_request(body: Value, authenticated: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json");
    if authenticated {
        builder = builder.header(header::COOKIE, "session_id=test-session");
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_responds_ok() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unauthenticated_chat_returns_401_without_external_calls() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let request = chat_request(json!({ "message": "hello", "history": [] }), false);
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.planner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unauthenticated_calendar_endpoints_return_401() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let read = Request::get("/api/calendar/events")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(read).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let write = Request::post("/api/calendar/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "events": [] }).to_string()))
        .unwrap();
    let response = app.router.oneshot(write).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(app.calendar.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.calendar.insert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_turn_returns_the_model_reply() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), true).await;

    let request = chat_request(
        json!({
            "message": "I want to learn the piano",
            "history": [{ "role": "user", "content": "hi" }],
        }),
        true,
    );
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["reply"],
        "Let's break that down. How long do you expect it to take?"
    );
    assert_eq!(app.planner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_chat_request_returns_400() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), true).await;

    let request = chat_request(json!({ "message": "   ", "history": [] }), true);
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
    assert_eq!(app.planner.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rate_limited_model_maps_to_429() {
    let app = build_app(FakePlanner::rate_limited(), FakeCalendar::new(), true).await;

    let request = chat_request(json!({ "message": "hello", "history": [] }), true);
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn listing_events_disables_caching() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), true).await;

    let request = Request::get("/api/calendar/events")
        .header(header::COOKIE, "session_id=test-session")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_json(response).await;
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], "event1");
    assert_eq!(events[1]["start"]["date"], "2026-08-25");
}

#[tokio::test]
async fn provider_401_passes_through_on_reads() {
    let app = build_app(FakePlanner::new(), FakeCalendar::unauthorized(), true).await;

    let request = Request::get("/api/calendar/events")
        .header(header::COOKIE, "session_id=test-session")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_batch_returns_400() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), true).await;

    let events: Vec<Value> = (0..21)
        .map(|i| {
            json!({
                "summary": format!("Event {}", i),
                "start": { "dateTime": "2026-08-24T09:00:00Z" },
                "end": { "dateTime": "2026-08-24T10:00:00Z" },
            })
        })
        .collect();
    let request = Request::post("/api/calendar/events")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, "session_id=test-session")
        .body(Body::from(json!({ "events": events }).to_string()))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.calendar.insert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn batch_write_reports_per_item_results() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), true).await;

    let request = Request::post("/api/calendar/events")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, "session_id=test-session")
        .body(Body::from(
            json!({
                "events": [
                    {
                        "summary": "Practice piano",
                        "start": { "dateTime": "2026-08-24T18:00:00Z" },
                        "end": { "dateTime": "2026-08-24T19:00:00Z" },
                    },
                ]
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["successCount"], 1);
    assert_eq!(body["results"][0]["summary"], "Practice piano");
    assert_eq!(body["results"][0]["status"], "created");
    assert_eq!(body["results"][0]["data"]["id"], "created-0");
}

#[tokio::test]
async fn callback_without_code_returns_400() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let request = Request::get("/auth/callback?state=abc")
        .header(header::COOKIE, "oauth_state=abc")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_redirects_to_consent_url() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let request = Request::get("/auth/login").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert!(response.status().is_redirection());
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("http://localhost:1/auth?"));
    assert!(location.contains("client_id=client-id"));
    assert!(location.contains("access_type=offline"));
}

#[tokio::test]
async fn login_sets_state_cookie_matching_consent_url() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let request = Request::get("/auth/login").body(Body::empty()).unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    let consent_url = url::Url::parse(location).unwrap();
    let state_param = consent_url
        .query_pairs()
        .find(|(key, _)| key == "state")
        .map(|(_, value)| value.to_string())
        .unwrap();

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(cookie.starts_with(&format!("oauth_state={}", state_param)));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn callback_with_mismatched_state_returns_400() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    // The identity provider errors out if reached, which would surface as a
    // 500; a 400 shows the state check rejected the request first
    let request = Request::get("/auth/callback?code=auth-code&state=forged")
        .header(header::COOKIE, "oauth_state=genuine")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_without_state_cookie_returns_400() {
    let app = build_app(FakePlanner::new(), FakeCalendar::new(), false).await;

    let request = Request::get("/auth/callback?code=auth-code&state=abc")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// Identity provider that exchanges any code for a fixed token
struct SucceedingIdentityProvider;

#[async_trait]
impl IdentityProvider for SucceedingIdentityProvider {
    async fn exchange_code(&self, _code: &str) -> Result<TokenResponse, String> {
        Ok(TokenResponse {
            access_token: "fresh-access".to_string(),
            refresh_token: Some("fresh-refresh".to_string()),
            expires_in: 3600,
        })
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenResponse, String> {
        Err("refresh should not be called during sign-in".to_string())
    }
}

#[tokio::test]
async fn callback_with_matching_state_establishes_session() {
    let state = AppState {
        config: Arc::new(test_config()),
        token_manager: TokenManager::new(
            Arc::new(InMemorySessionStore::default()),
            Arc::new(SucceedingIdentityProvider),
        ),
        planner: Arc::new(FakePlanner::new()),
        calendar: Arc::new(FakeCalendar::new()),
    };
    let router = build_router(state);

    let request = Request::get("/auth/callback?code=auth-code&state=genuine")
        .header(header::COOKIE, "oauth_state=genuine")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert!(response.status().is_redirection());
    let cookies: Vec<&str> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert!(cookies.iter().any(|c| c.starts_with("session_id=")));
    // The one-shot state cookie is cleared once the session exists
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("oauth_state=;") && c.contains("Max-Age=0")));
}
