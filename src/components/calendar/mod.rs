mod gateway;
pub mod models;

pub use gateway::{
    create_events, CalendarApi, CalendarError, GoogleCalendarGateway, MAX_UPCOMING_EVENTS,
};
pub use models::{BatchResult, CalendarEvent, CreatedEvent, ItemResult, ItemStatus};
