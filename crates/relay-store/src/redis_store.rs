//! Redis backend.
//!
//! A background task dials the server with a linear backoff
//! (`min(attempt * step, max)`) and publishes the resulting
//! [`ConnectionManager`] through a `watch` channel. The manager handles
//! reconnects after that. Every command first waits for a published
//! connection, bounded by `wait_timeout`, so callers see
//! [`StoreError::Timeout`] instead of hanging while the server is down.
//! The same task pings the server periodically and reports failed pings.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, IntoConnectionInfo};
use relay_core::errors::FaultReporter;
use relay_settings::StoreSettings;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{RemoteStore, Ttl};
use crate::errors::{Result, StoreError};

/// Connection parameters for [`RedisStore`].
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,
    /// Password override.
    pub password: Option<String>,
    /// Bounded wait for a connection.
    pub wait_timeout: Duration,
    /// Liveness ping interval.
    pub ping_interval: Duration,
    /// Backoff step between connect attempts.
    pub retry_step: Duration,
    /// Backoff cap.
    pub retry_max: Duration,
}

impl From<&StoreSettings> for RedisConfig {
    fn from(s: &StoreSettings) -> Self {
        Self {
            url: s.url.clone(),
            password: s.password.clone(),
            wait_timeout: Duration::from_millis(s.wait_timeout_ms),
            ping_interval: Duration::from_millis(s.ping_interval_ms),
            retry_step: Duration::from_millis(s.retry_step_ms),
            retry_max: Duration::from_millis(s.retry_max_ms),
        }
    }
}

impl RedisConfig {
    /// Reconnect delay before attempt number `times` (1-based).
    pub fn backoff(&self, times: u32) -> Duration {
        self.retry_step.saturating_mul(times).min(self.retry_max)
    }
}

/// [`RemoteStore`] backed by a Redis server.
pub struct RedisStore {
    conn: watch::Receiver<Option<ConnectionManager>>,
    wait_timeout: Duration,
}

impl RedisStore {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called within a tokio runtime. Fails only if the URL is invalid.
    pub fn connect(config: RedisConfig, reporter: FaultReporter) -> Result<Self> {
        let mut info = config.url.as_str().into_connection_info()?;
        if let Some(password) = &config.password {
            info.redis.password = Some(password.clone());
        }
        let client = Client::open(info)?;
        let (tx, rx) = watch::channel(None);
        let wait_timeout = config.wait_timeout;

        drop(tokio::spawn(run_connection(client, config, tx, reporter)));

        Ok(Self {
            conn: rx,
            wait_timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut rx = self.conn.clone();
        match tokio::time::timeout(self.wait_timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(published)) => {
                let conn: Option<ConnectionManager> = (*published).clone();
                conn.ok_or(StoreError::Unavailable)
            }
            Ok(Err(_)) => Err(StoreError::Unavailable),
            Err(_) => Err(StoreError::Timeout(self.wait_timeout)),
        }
    }

    async fn query<T: FromRedisValue + Send>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        let value: T = cmd.query_async(&mut conn).await?;
        Ok(value)
    }
}

async fn run_connection(
    client: Client,
    config: RedisConfig,
    tx: watch::Sender<Option<ConnectionManager>>,
    reporter: FaultReporter,
) {
    let mut times: u32 = 0;
    let mut conn = loop {
        times = times.saturating_add(1);
        tokio::select! {
            () = tx.closed() => return,
            result = ConnectionManager::new(client.clone()) => match result {
                Ok(conn) => break conn,
                Err(err) => {
                    let delay = config.backoff(times);
                    warn!(url = %config.url, attempt = times, ?delay, error = %err, "store connection failed, reconnecting");
                    tokio::time::sleep(delay).await;
                }
            },
        }
    };

    info!(url = %config.url, "successfully connected to store");
    let _ = tx.send_replace(Some(conn.clone()));

    let mut ticker = tokio::time::interval(config.ping_interval);
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = tx.closed() => {
                debug!("store handle dropped, stopping ping task");
                return;
            }
            _ = ticker.tick() => {
                let reply: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
                match reply {
                    Ok(_) => debug!("store connection is alive"),
                    Err(err) => reporter.report_error("store.ping", &StoreError::Redis(err)),
                }
            }
        }
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("LPOP").arg(key)).await
    }

    async fn llen(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>> {
        self.query(redis::cmd("LINDEX").arg(key).arg(index)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop)).await
    }

    async fn lrem(&self, key: &str, count: i64, value: &str) -> Result<u64> {
        self.query(redis::cmd("LREM").arg(key).arg(count).arg(value)).await
    }

    async fn lpos(&self, key: &str, value: &str) -> Result<Option<u64>> {
        self.query(redis::cmd("LPOS").arg(key).arg(value)).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let added: u64 = self.query(redis::cmd("HSET").arg(key).arg(field).arg(value)).await?;
        Ok(added > 0)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let removed: u64 = self.query(redis::cmd("HDEL").arg(key).arg(field)).await?;
        Ok(removed > 0)
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.query(redis::cmd("HEXISTS").arg(key).arg(field)).await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let added: u64 = self.query(redis::cmd("SADD").arg(key).arg(member)).await?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let removed: u64 = self.query(redis::cmd("SREM").arg(key).arg(member)).await?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.query(redis::cmd("SISMEMBER").arg(key).arg(member)).await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.query(redis::cmd("SCARD").arg(key)).await
    }

    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        self.query(redis::cmd("SSCAN").arg(key).arg(cursor).arg("COUNT").arg(count))
            .await
    }

    async fn expire(&self, key: &str, secs: u64) -> Result<bool> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(secs)).await
    }

    async fn pexpire(&self, key: &str, millis: u64) -> Result<bool> {
        self.query(redis::cmd("PEXPIRE").arg(key).arg(millis)).await
    }

    async fn pttl(&self, key: &str) -> Result<Ttl> {
        let raw: i64 = self.query(redis::cmd("PTTL").arg(key)).await?;
        Ok(Ttl::from_reply(raw))
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        self.query(redis::cmd("PERSIST").arg(key)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.query(redis::cmd("KEYS").arg(pattern)).await
    }

    async fn set_ex(&self, key: &str, value: &str, secs: u64) -> Result<()> {
        self.query(redis::cmd("SET").arg(key).arg(value).arg("EX").arg(secs))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let removed: u64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let _pong: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn config(url: &str) -> RedisConfig {
        RedisConfig {
            url: url.into(),
            password: None,
            wait_timeout: Duration::from_millis(100),
            ping_interval: Duration::from_secs(30),
            retry_step: Duration::from_millis(50),
            retry_max: Duration::from_millis(2_000),
        }
    }

    #[test]
    fn backoff_is_linear_then_capped() {
        let c = config("redis://127.0.0.1:6379");
        assert_eq!(c.backoff(1), Duration::from_millis(50));
        assert_eq!(c.backoff(10), Duration::from_millis(500));
        assert_eq!(c.backoff(40), Duration::from_millis(2_000));
        assert_eq!(c.backoff(u32::MAX), Duration::from_millis(2_000));
    }

    #[test]
    fn config_from_settings() {
        let settings = StoreSettings::default();
        let c = RedisConfig::from(&settings);
        assert_eq!(c.wait_timeout, Duration::from_secs(30));
        assert_eq!(c.retry_max, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn invalid_url_fails_fast() {
        let result = RedisStore::connect(config("not a url"), FaultReporter::log_only());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_server_times_out() {
        let store = RedisStore::connect(config("redis://127.0.0.1:1"), FaultReporter::log_only())
            .unwrap();
        assert_matches!(store.ping().await, Err(StoreError::Timeout(_)));
    }
}
