use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum accepted chat message length, in characters
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Maximum number of events accepted in one calendar write batch
pub const MAX_BATCH_SIZE: usize = 20;

/// Reasons an inbound request can be rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Malformed request")]
    MalformedInput,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Message must not exceed {MAX_MESSAGE_CHARS} characters")]
    MessageTooLong,
    #[error("History must be a list of user/assistant turns with text content")]
    InvalidHistory,
    #[error("Event {0} is missing a summary or a valid start/end time")]
    InvalidEvent(usize),
    #[error("A batch may contain at most {MAX_BATCH_SIZE} events")]
    BatchTooLarge,
}

/// Role of a chat history turn as sent by the browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One turn of prior conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// A validated chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<ChatTurn>,
    /// The caller's existing schedule, kept as raw JSON for prompt rendering.
    /// None when absent or malformed.
    pub schedule: Option<Vec<Value>>,
}

/// Start or end of a calendar event, either a timed instant or an all-day date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    #[serde(rename = "dateTime")]
    DateTime(String),
    #[serde(rename = "date")]
    Date(String),
}

/// A validated event ready to be written to the calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWrite {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
}

/// Validate a raw chat request body
///
/// Rules are applied in order: the body must parse as JSON, the message must
/// be non-empty after trimming and at most [`MAX_MESSAGE_CHARS`] characters,
/// and the history must be a list of user/assistant turns. The optional
/// schedule is validated permissively and dropped silently when malformed
/// rather than failing the whole request.
pub fn validate_chat_request(raw: &[u8]) -> Result<ChatRequest, ValidationError> {
    let body: Value = serde_json::from_slice(raw).map_err(|_| ValidationError::MalformedInput)?;
    let body = body.as_object().ok_or(ValidationError::MalformedInput)?;

    let message = match body.get("message") {
        Some(Value::String(message)) => message.trim(),
        // A message of the wrong type is a structural error, not an empty one
        Some(_) => return Err(ValidationError::MalformedInput),
        None => return Err(ValidationError::EmptyMessage),
    };
    if message.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong);
    }

    let history = match body.get("history") {
        Some(value) => parse_history(value)?,
        None => Vec::new(),
    };

    let schedule = body.get("schedule").and_then(parse_schedule);

    Ok(ChatRequest {
        message: message.to_string(),
        history,
        schedule,
    })
}

/// Parse the history array, rejecting anything that is not a user/assistant
/// turn with string content
fn parse_history(value: &Value) -> Result<Vec<ChatTurn>, ValidationError> {
    let items = value.as_array().ok_or(ValidationError::InvalidHistory)?;

    let mut turns = Vec::with_capacity(items.len());
    for item in items {
        let obj = item.as_object().ok_or(ValidationError::InvalidHistory)?;
        let role = match obj.get("role").and_then(|r| r.as_str()) {
            Some("user") => TurnRole::User,
            Some("assistant") => TurnRole::Assistant,
            _ => return Err(ValidationError::InvalidHistory),
        };
        let content = obj
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or(ValidationError::InvalidHistory)?;
        turns.push(ChatTurn {
            role,
            content: content.to_string(),
        });
    }

    Ok(turns)
}

/// Permissive schedule check: an array of objects that each carry a summary
/// field. Anything else yields None so the request can still proceed.
fn parse_schedule(value: &Value) -> Option<Vec<Value>> {
    let items = value.as_array()?;
    let all_valid = items
        .iter()
        .all(|item| item.as_object().is_some_and(|obj| obj.contains_key("summary")));
    if all_valid {
        Some(items.clone())
    } else {
        None
    }
}

/// Validate a raw calendar write body into an event batch
///
/// Each event must carry a string summary and a start/end that resolve to
/// either a date-time or an all-day date. The batch is capped at
/// [`MAX_BATCH_SIZE`] items to bound external-API fan-out.
pub fn validate_event_batch(raw: &[u8]) -> Result<Vec<EventWrite>, ValidationError> {
    let body: Value = serde_json::from_slice(raw).map_err(|_| ValidationError::MalformedInput)?;
    let items = body
        .get("events")
        .and_then(|e| e.as_array())
        .ok_or(ValidationError::MalformedInput)?;

    if items.len() > MAX_BATCH_SIZE {
        return Err(ValidationError::BatchTooLarge);
    }

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        events.push(parse_event(item).ok_or(ValidationError::InvalidEvent(index))?);
    }

    Ok(events)
}

fn parse_event(value: &Value) -> Option<EventWrite> {
    let obj = value.as_object()?;
    let summary = obj.get("summary")?.as_str()?.to_string();
    let start = parse_event_time(obj.get("start")?)?;
    let end = parse_event_time(obj.get("end")?)?;
    let description = obj
        .get("description")
        .and_then(|d| d.as_str())
        .map(|d| d.to_string());
    let color_id = obj
        .get("colorId")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());

    Some(EventWrite {
        summary,
        description,
        start,
        end,
        color_id,
    })
}

fn parse_event_time(value: &Value) -> Option<EventTime> {
    let obj = value.as_object()?;
    if let Some(date_time) = obj.get("dateTime").and_then(|v| v.as_str()) {
        return Some(EventTime::DateTime(date_time.to_string()));
    }
    obj.get("date")
        .and_then(|v| v.as_str())
        .map(|d| EventTime::Date(d.to_string()))
}
