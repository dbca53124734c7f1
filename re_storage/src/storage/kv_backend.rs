//! Client side of the networked key/value backend.
//!
//! A [`KvBackend`] is one named connection definition from the config: a
//! primary endpoint that takes every write, and an optional read-only
//! endpoint that takes most reads.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::KvBackendConfig;
use crate::error::{ConfigError, KvError};

#[async_trait]
pub trait KvEndpoint: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    async fn set(&self, key: &str, value: Bytes) -> Result<(), KvError>;

    async fn exists(&self, key: &str) -> Result<bool, KvError>;
}

pub type DynKvEndpoint = Arc<dyn KvEndpoint>;

pub struct KvBackend {
    name: String,
    primary: DynKvEndpoint,
    read_only: Option<DynKvEndpoint>,
    /// Per-mille chance that a read skips the read-only endpoint.
    use_primary_for_read_only_probability: u32,
}

impl KvBackend {
    pub fn new(
        name: impl Into<String>,
        primary: DynKvEndpoint,
        read_only: Option<DynKvEndpoint>,
        use_primary_for_read_only_probability: u32,
    ) -> Self {
        Self {
            name: name.into(),
            primary,
            read_only,
            use_primary_for_read_only_probability: use_primary_for_read_only_probability.min(1000),
        }
    }

    /// Builds a backend talking to Redis-protocol servers. No connection is
    /// opened until the first request.
    pub fn connect_redis(name: &str, config: &KvBackendConfig) -> Result<Self, ConfigError> {
        let timeout = Duration::from_millis(config.operation_timeout_ms);
        let primary = RedisEndpoint::new(&config.address, config.num_connections, timeout)?;
        let read_only = config
            .read_only_address
            .as_deref()
            .map(|address| RedisEndpoint::new(address, config.num_connections, timeout))
            .transpose()?;

        Ok(Self::new(
            name,
            Arc::new(primary),
            read_only.map(|endpoint| Arc::new(endpoint) as DynKvEndpoint),
            config.use_primary_for_read_only_probability,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary(&self) -> &DynKvEndpoint {
        &self.primary
    }

    /// Endpoint for the next read.
    pub fn read_endpoint(&self) -> &DynKvEndpoint {
        match &self.read_only {
            Some(read_only) => {
                let draw = rand::thread_rng().gen_range(0..1000);
                if draw < self.use_primary_for_read_only_probability {
                    &self.primary
                } else {
                    read_only
                }
            }
            None => &self.primary,
        }
    }
}

/// Bounded pool of multiplexed connections to one Redis-protocol endpoint.
pub struct RedisEndpoint {
    address: String,
    client: redis::Client,
    idle: Mutex<Vec<MultiplexedConnection>>,
    permits: Semaphore,
    operation_timeout: Duration,
}

impl RedisEndpoint {
    pub fn new(
        address: &str,
        num_connections: usize,
        operation_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = redis::Client::open(address)
            .map_err(|e| ConfigError::Invalid(format!("bad backend address {address}: {e}")))?;

        Ok(Self {
            address: address.to_string(),
            client,
            idle: Mutex::new(Vec::with_capacity(num_connections)),
            permits: Semaphore::new(num_connections),
            operation_timeout,
        })
    }

    async fn checkout(&self) -> Result<(SemaphorePermit<'_>, MultiplexedConnection), KvError> {
        let permit = tokio::time::timeout(self.operation_timeout, self.permits.acquire())
            .await
            .map_err(|_| {
                KvError::Transient(format!("timed out waiting for a connection to {}", self.address))
            })?
            .map_err(|_| KvError::Fatal("connection pool closed".to_string()))?;

        let idle = self.idle.lock().unwrap_or_else(|p| p.into_inner()).pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                tracing::debug!(address = %self.address, "opening backend connection");
                self.run(self.client.get_multiplexed_async_connection()).await?
            }
        };

        Ok((permit, conn))
    }

    fn checkin(&self, conn: MultiplexedConnection) {
        self.idle.lock().unwrap_or_else(|p| p.into_inner()).push(conn);
    }

    async fn run<T>(&self, fut: impl Future<Output = redis::RedisResult<T>>) -> Result<T, KvError> {
        tokio::time::timeout(self.operation_timeout, fut)
            .await
            .map_err(|_| KvError::Transient(format!("operation on {} timed out", self.address)))?
            .map_err(classify_redis_error)
    }
}

fn classify_redis_error(e: redis::RedisError) -> KvError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
        KvError::Transient(e.to_string())
    } else {
        KvError::Fatal(e.to_string())
    }
}

#[async_trait]
impl KvEndpoint for RedisEndpoint {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let (_permit, mut conn) = self.checkout().await?;
        let value: Option<Vec<u8>> = self.run(conn.get(key)).await?;
        self.checkin(conn);
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let (_permit, mut conn) = self.checkout().await?;
        self.run(conn.set::<_, _, ()>(key, &value[..])).await?;
        self.checkin(conn);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let (_permit, mut conn) = self.checkout().await?;
        let exists: bool = self.run(conn.exists(key)).await?;
        self.checkin(conn);
        Ok(exists)
    }
}
