use super::models::{BatchResult, CalendarEvent, CreatedEvent, ItemResult, ItemStatus};
use crate::validation::{EventTime, EventWrite};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{error, info};
use url::Url;

/// Maximum number of upcoming events returned by a read
pub const MAX_UPCOMING_EVENTS: usize = 10;

/// Failures from the calendar provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// The provider rejected the access token; the caller must re-authenticate
    Unauthorized,
    /// The response was missing expected container fields
    InvalidResponse(String),
    /// Network or provider failure
    Request(String),
}

/// Read and write operations against the calendar provider
#[async_trait]
pub trait CalendarApi: Send + Sync + 'static {
    /// List upcoming events, expanded and ordered by start time
    async fn list_upcoming(&self, access_token: &str) -> Result<Vec<CalendarEvent>, CalendarError>;

    /// Create a single event, returning its provider-assigned identity
    async fn insert_event(
        &self,
        access_token: &str,
        event: &EventWrite,
    ) -> Result<CreatedEvent, CalendarError>;
}

/// Google Calendar implementation of [`CalendarApi`]
pub struct GoogleCalendarGateway {
    client: Client,
    base_url: String,
    calendar_id: String,
}

impl GoogleCalendarGateway {
    pub fn new(client: Client, base_url: String, calendar_id: String) -> Self {
        Self {
            client,
            base_url,
            calendar_id,
        }
    }

    fn events_url(&self) -> Result<Url, CalendarError> {
        let url_str = format!(
            "{}/calendars/{}/events",
            self.base_url.trim_end_matches('/'),
            self.calendar_id
        );
        Url::parse(&url_str)
            .map_err(|e| CalendarError::Request(format!("Failed to parse URL: {}", e)))
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarGateway {
    async fn list_upcoming(&self, access_token: &str) -> Result<Vec<CalendarEvent>, CalendarError> {
        let mut url = self.events_url()?;
        url.query_pairs_mut()
            .append_pair("timeMin", &Utc::now().to_rfc3339())
            .append_pair("singleEvents", "true")
            .append_pair("orderBy", "startTime")
            .append_pair("maxResults", &MAX_UPCOMING_EVENTS.to_string());

        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .map_err(|e| CalendarError::Request(format!("Failed to fetch events: {}", e)))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CalendarError::Unauthorized);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(CalendarError::Request(format!(
                "Failed to fetch events: HTTP {} - {}",
                status, error_body
            )));
        }

        let response_data: Value = response
            .json()
            .await
            .map_err(|e| CalendarError::Request(format!("Failed to parse events response: {}", e)))?;

        let items = response_data
            .get("items")
            .and_then(|i| i.as_array())
            .ok_or_else(|| CalendarError::InvalidResponse("No items in response".to_string()))?;

        Ok(items.iter().map(parse_event).collect())
    }

    async fn insert_event(
        &self,
        access_token: &str,
        event: &EventWrite,
    ) -> Result<CreatedEvent, CalendarError> {
        let url = self.events_url()?;

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", access_token))
            .json(event)
            .send()
            .await
            .map_err(|e| CalendarError::Request(format!("Failed to create event: {}", e)))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CalendarError::Unauthorized);
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(CalendarError::Request(format!(
                "Provider rejected event: HTTP {} - {}",
                status, error_body
            )));
        }

        let created: Value = response
            .json()
            .await
            .map_err(|e| CalendarError::Request(format!("Failed to parse create response: {}", e)))?;

        let id = created
            .get("id")
            .and_then(|i| i.as_str())
            .ok_or_else(|| CalendarError::InvalidResponse("No id in create response".to_string()))?
            .to_string();

        let html_link = created
            .get("htmlLink")
            .and_then(|l| l.as_str())
            .map(|l| l.to_string());

        Ok(CreatedEvent { id, html_link })
    }
}

/// Convert one provider event payload into the read model
fn parse_event(event: &Value) -> CalendarEvent {
    CalendarEvent {
        id: event
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or("")
            .to_string(),
        summary: event
            .get("summary")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        description: event
            .get("description")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        start: event.get("start").and_then(parse_event_time),
        end: event.get("end").and_then(parse_event_time),
        html_link: event
            .get("htmlLink")
            .and_then(|l| l.as_str())
            .map(|l| l.to_string()),
    }
}

fn parse_event_time(value: &Value) -> Option<EventTime> {
    let obj = value.as_object()?;
    if let Some(date_time) = obj.get("dateTime").and_then(|dt| dt.as_str()) {
        return Some(EventTime::DateTime(date_time.to_string()));
    }
    obj.get("date")
        .and_then(|d| d.as_str())
        .map(|d| EventTime::Date(d.to_string()))
}

/// Write a validated batch to the calendar, one event at a time
///
/// Submissions are strictly sequential to respect provider rate limits and
/// keep result ordering deterministic. Each item's outcome is recorded
/// independently; one failure never aborts the batch.
pub async fn create_events(
    api: &dyn CalendarApi,
    access_token: &str,
    events: &[EventWrite],
) -> BatchResult {
    let mut results: Vec<ItemResult> = Vec::with_capacity(events.len());
    let mut success_count = 0;

    for event in events {
        match api.insert_event(access_token, event).await {
            Ok(created) => {
                success_count += 1;
                results.push(ItemResult {
                    summary: event.summary.clone(),
                    status: ItemStatus::Created,
                    data: Some(created),
                    error: None,
                });
            }
            Err(e) => {
                error!("Failed to create event '{}': {:?}", event.summary, e);
                results.push(ItemResult {
                    summary: event.summary.clone(),
                    status: ItemStatus::Failed,
                    data: None,
                    error: Some(item_error_message(&e)),
                });
            }
        }
    }

    info!("Created {} of {} events", success_count, events.len());

    BatchResult {
        success: success_count > 0,
        message: format!("Created {} of {} events", success_count, events.len()),
        success_count,
        results,
    }
}

/// Per-item error text recorded in the batch ledger; carries the provider
/// or transport error so callers can tell why a specific item failed
fn item_error_message(error: &CalendarError) -> String {
    match error {
        CalendarError::Unauthorized => "Calendar access was rejected".to_string(),
        CalendarError::InvalidResponse(detail) | CalendarError::Request(detail) => detail.clone(),
    }
}
