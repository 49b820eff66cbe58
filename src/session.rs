use crate::components::token::Credential;
use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// Redis keys for the session store
mod keys {
    pub const SESSION_PREFIX: &str = "taskpilot:session:";
    /// 30 days in seconds
    pub const EXPIRY_SECONDS: i64 = 30 * 24 * 60 * 60;
}

/// Store for per-session delegated-access credentials
///
/// The credential is the only state the service keeps between requests;
/// everything else is ephemeral.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Fetch the credential for a session, if one exists
    async fn get(&self, session_id: &str) -> Result<Option<Credential>, String>;

    /// Store or replace the credential for a session
    async fn put(&self, session_id: &str, credential: &Credential) -> Result<(), String>;

    /// Destroy a session
    async fn remove(&self, session_id: &str) -> Result<(), String>;
}

/// Redis-backed session store
pub struct RedisSessionStore {
    client: RedisClient,
}

impl RedisSessionStore {
    /// Create a new Redis session store
    pub fn new(redis_url: &str) -> Result<Self, String> {
        info!("Connecting to Redis at {}", redis_url);

        let client = RedisClient::open(redis_url)
            .map_err(|e| format!("Failed to create Redis client: {}", e))?;

        Ok(Self { client })
    }

    /// Get a Redis connection from the client
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, String> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| format!("Failed to connect to Redis: {}", e))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Credential>, String> {
        let key = format!("{}{}", keys::SESSION_PREFIX, session_id);

        let mut conn = self.get_connection().await?;

        let exists: bool = conn
            .exists(&key)
            .await
            .map_err(|e| format!("Redis EXISTS error: {}", e))?;

        if !exists {
            return Ok(None);
        }

        let data: String = conn
            .get(&key)
            .await
            .map_err(|e| format!("Redis GET error: {}", e))?;

        let credential: Credential =
            serde_json::from_str(&data).map_err(|e| format!("JSON parse error: {}", e))?;

        Ok(Some(credential))
    }

    async fn put(&self, session_id: &str, credential: &Credential) -> Result<(), String> {
        let key = format!("{}{}", keys::SESSION_PREFIX, session_id);

        let mut conn = self.get_connection().await?;

        let json = serde_json::to_string(credential)
            .map_err(|e| format!("JSON serialization error: {}", e))?;

        conn.set::<_, _, ()>(&key, &json)
            .await
            .map_err(|e| format!("Redis SET error: {}", e))?;

        conn.expire::<_, ()>(&key, keys::EXPIRY_SECONDS)
            .await
            .map_err(|e| format!("Redis EXPIRE error: {}", e))?;

        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), String> {
        let key = format!("{}{}", keys::SESSION_PREFIX, session_id);

        let mut conn = self.get_connection().await?;

        conn.del::<_, ()>(&key)
            .await
            .map_err(|e| format!("Redis DEL error: {}", e))?;

        info!("Destroyed session {}", session_id);
        Ok(())
    }
}

/// In-memory implementation of the session store (for testing and local runs
/// without Redis)
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Credential>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Credential>, String> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn put(&self, session_id: &str, credential: &Credential) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), credential.clone());
        Ok(())
    }

    async fn remove(&self, session_id: &str) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }
}
