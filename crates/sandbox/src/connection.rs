//! Connection to the container engine: health checks, reconnect with
//! backoff, and a single retry for transient failures.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    cubicle_config::RetryConfig,
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use cubicle_metrics::{connection as connection_metrics, counter};

use crate::{
    engine::ContainerEngine,
    error::{EngineError, EngineResult, Error, Result},
};

/// Builds a fresh engine handle from configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable target, for logs.
    fn describe(&self) -> String;

    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after the given zero-based failed attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Owns the process-wide engine handle.
///
/// Readers clone the current `Arc` and work with it; a reconnect builds a new
/// handle and swaps it in through [`ConnectionManager::install`], so nobody
/// ever observes a half-built connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    handle: RwLock<Option<Arc<dyn ContainerEngine>>>,
    generation: AtomicU64,
    reconnecting: Mutex<()>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        Self {
            connector,
            policy,
            handle: RwLock::new(None),
            generation: AtomicU64::new(0),
            reconnecting: Mutex::new(()),
        }
    }

    /// The handle currently installed, if any.
    pub async fn current(&self) -> Option<Arc<dyn ContainerEngine>> {
        self.handle.read().await.clone()
    }

    /// Number of times a handle (or `None`) has been installed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// The only place the handle is replaced.
    async fn install(&self, engine: Option<Arc<dyn ContainerEngine>>) {
        let mut guard = self.handle.write().await;
        *guard = engine;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Probe the engine, connecting or reconnecting as needed.
    pub async fn ensure_connection(&self) -> bool {
        let Some(engine) = self.current().await else {
            debug!(target_engine = %self.connector.describe(), "no engine handle yet, connecting");
            return self.reconnect().await.is_ok();
        };
        match engine.ping().await {
            Ok(()) => true,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "engine health check failed, reconnecting");
                self.reconnect().await.is_ok()
            },
            Err(e) => {
                warn!(error = %e, "engine health check failed");
                false
            },
        }
    }

    /// Rebuild the handle with exponential backoff.
    ///
    /// Each attempt connects and pings. Exhausting the budget installs `None`,
    /// so later calls start from a clean slate instead of a dead handle.
    pub async fn reconnect(&self) -> Result<Arc<dyn ContainerEngine>> {
        let seen = self.generation();
        let _guard = self.reconnecting.lock().await;

        // Someone else reconnected while we waited for the lock.
        if self.generation() != seen
            && let Some(engine) = self.current().await
            && engine.ping().await.is_ok()
        {
            debug!("using handle from concurrent reconnect");
            return Ok(engine);
        }

        let target = self.connector.describe();
        let mut last = EngineError::Fatal("no connection attempt made".into());
        for attempt in 0..self.policy.max_attempts {
            #[cfg(feature = "metrics")]
            counter!(connection_metrics::RECONNECT_ATTEMPTS_TOTAL).increment(1);

            info!(
                target_engine = %target,
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                "connecting to container engine"
            );
            match self.try_connect().await {
                Ok(engine) => {
                    info!(
                        target_engine = %target,
                        transport = %engine.transport(),
                        attempt = attempt + 1,
                        "container engine connected"
                    );
                    self.install(Some(Arc::clone(&engine))).await;
                    return Ok(engine);
                },
                Err(e) => {
                    warn!(target_engine = %target, attempt = attempt + 1, error = %e, "connection attempt failed");
                    last = e;
                },
            }
            if attempt + 1 < self.policy.max_attempts {
                let delay = self.policy.delay(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "waiting before next attempt");
                tokio::time::sleep(delay).await;
            }
        }

        #[cfg(feature = "metrics")]
        counter!(connection_metrics::RECONNECT_FAILURES_TOTAL).increment(1);

        self.install(None).await;
        Err(Error::ReconnectFailed {
            attempts: self.policy.max_attempts,
            last: last.to_string(),
        })
    }

    async fn try_connect(&self) -> EngineResult<Arc<dyn ContainerEngine>> {
        let engine = self.connector.connect().await?;
        engine.ping().await?;
        Ok(engine)
    }

    /// Run `op` against the current handle, reconnecting and retrying once if
    /// it fails with a transient error.
    pub async fn execute_with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn ContainerEngine>) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let engine = self.current().await.ok_or(Error::NotConnected)?;
        match op(engine).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "transient engine error, reconnecting and retrying once");
                #[cfg(feature = "metrics")]
                counter!(connection_metrics::RETRIES_TOTAL).increment(1);
                let engine = self.reconnect().await?;
                Ok(op(engine).await?)
            },
            Err(e) => Err(e.into()),
        }
    }
}
