//! # sightline-client
//!
//! HTTP implementations of the sightline backend traits.
//!
//! [`HttpBackend`] wraps a shared [`ConnectionPool`] and implements
//! `FeedSource`, `AttachmentSource`, `ActivityWriter` and `EntityResolver`
//! against the activity server's GraphQL and REST endpoints.

pub mod config;
pub mod entities;
pub mod feed;
pub mod files;
pub mod graphql;
pub mod pool;
pub mod writer;

pub use config::{ClientConfig, ConfigError};
pub use pool::{ConnectionPool, HttpResponse, Request, RetryPolicy};

use sightline_core::Result;

/// Backend client over a shared connection pool.
#[derive(Clone)]
pub struct HttpBackend {
    pool: ConnectionPool,
}

impl HttpBackend {
    /// Wrap an existing pool. The pool must be initialized before use.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Build and initialize a pool from `config`.
    pub fn connect(config: ClientConfig) -> Result<Self> {
        Ok(Self::new(ConnectionPool::connect(config)?))
    }

    /// Load configuration from the environment and connect.
    pub fn from_env() -> Result<Self> {
        Self::connect(ClientConfig::from_env()?)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
