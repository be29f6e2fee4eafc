use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::warn;

use gwrap_protocol::gemini::GenerateContentResponse;

/// TTL'd in-memory tier. Backend failures are logged and degrade to a miss
/// (reads) or a dropped write; they never reach the caller.
///
/// The connection manager is established on first use and reconnects on its
/// own afterwards.
pub struct FastCache {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    ttl: Duration,
}

impl FastCache {
    pub fn new(uri: &str, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(uri)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            ttl,
        })
    }

    /// Startup probe; the proxy refuses to boot on an unreachable fast tier.
    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.manager().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await
    }

    async fn manager(&self) -> Result<ConnectionManager, redis::RedisError> {
        let conn = self
            .conn
            .get_or_try_init(|| {
                let config = ConnectionManagerConfig::new()
                    .set_connection_timeout(Duration::from_secs(5));
                self.client.get_connection_manager_with_config(config)
            })
            .await?;
        Ok(conn.clone())
    }

    pub async fn get(&self, key: &str) -> Option<GenerateContentResponse> {
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "fast tier unavailable, treating as miss");
                return None;
            }
        };
        let data: Option<String> = match conn.get(key).await {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "fast tier read failed");
                return None;
            }
        };
        let data = data?;
        match serde_json::from_str(&data) {
            Ok(response) => Some(response),
            Err(err) => {
                warn!(error = %err, "fast tier entry undecodable, treating as miss");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, response: &GenerateContentResponse) {
        let Ok(data) = serde_json::to_string(response) else {
            return;
        };
        let mut conn = match self.manager().await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "fast tier unavailable, dropping write");
                return;
            }
        };
        if let Err(err) = conn
            .set_ex::<_, _, ()>(key, data, self.ttl.as_secs())
            .await
        {
            warn!(error = %err, "fast tier write failed");
        }
    }
}
