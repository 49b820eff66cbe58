use crate::error::{env_error, AppResult, Error};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;

/// Default Gemini model used for planning conversations
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default base URL for the Gemini API
pub const DEFAULT_MODEL_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default base URL for the Google Calendar API
pub const DEFAULT_CALENDAR_API_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Default Google OAuth token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default Google OAuth consent endpoint
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Main configuration structure for the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gemini API key
    pub gemini_api_key: String,
    /// Gemini model name
    pub gemini_model: String,
    /// Base URL of the model API
    pub model_api_url: String,
    /// Google OAuth client ID
    pub google_client_id: String,
    /// Google OAuth client secret
    pub google_client_secret: String,
    /// Redirect URL registered for the OAuth client
    pub oauth_redirect_url: String,
    /// OAuth token endpoint
    pub token_url: String,
    /// OAuth consent endpoint
    pub auth_url: String,
    /// Base URL of the calendar API
    pub calendar_api_url: String,
    /// Calendar to read from and write to
    pub google_calendar_id: String,
    /// Redis connection URL for the session store
    pub redis_url: String,
    /// Timezone used when rendering the current time into the persona prompt
    pub timezone: String,
    /// Port to bind the HTTP server to
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        // Required environment variables
        let gemini_api_key = env::var("GEMINI_API_KEY").map_err(|_| env_error("GEMINI_API_KEY"))?;
        let google_client_id =
            env::var("GOOGLE_CLIENT_ID").map_err(|_| env_error("GOOGLE_CLIENT_ID"))?;
        let google_client_secret =
            env::var("GOOGLE_CLIENT_SECRET").map_err(|_| env_error("GOOGLE_CLIENT_SECRET"))?;
        let oauth_redirect_url =
            env::var("OAUTH_REDIRECT_URL").map_err(|_| env_error("OAUTH_REDIRECT_URL"))?;

        // Optional with defaults
        let gemini_model =
            env::var("GEMINI_MODEL").unwrap_or_else(|_| String::from(DEFAULT_MODEL));
        let model_api_url =
            env::var("MODEL_API_URL").unwrap_or_else(|_| String::from(DEFAULT_MODEL_API_URL));
        let token_url = env::var("TOKEN_URL").unwrap_or_else(|_| String::from(DEFAULT_TOKEN_URL));
        let auth_url = env::var("AUTH_URL").unwrap_or_else(|_| String::from(DEFAULT_AUTH_URL));
        let calendar_api_url = env::var("CALENDAR_API_URL")
            .unwrap_or_else(|_| String::from(DEFAULT_CALENDAR_API_URL));
        let google_calendar_id =
            env::var("GOOGLE_CALENDAR_ID").unwrap_or_else(|_| String::from("primary"));
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| String::from("redis://127.0.0.1:6379"));
        let timezone = env::var("TIMEZONE").unwrap_or_else(|_| String::from("UTC"));

        let port = match env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("Invalid PORT value: {}", value)))?,
            Err(_) => 3000,
        };

        Ok(Config {
            gemini_api_key,
            gemini_model,
            model_api_url,
            google_client_id,
            google_client_secret,
            oauth_redirect_url,
            token_url,
            auth_url,
            calendar_api_url,
            google_calendar_id,
            redis_url,
            timezone,
            port,
        })
    }
}
