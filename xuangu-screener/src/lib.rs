//! Xuangu Screener Library
//!
//! Stock screening over inverted indexes kept in Redis. Buckets of stock
//! codes (factors, themes, featured indicators) are intersected in the store,
//! and the per-stock attributes of the result are fetched in one pipelined
//! batch.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  xuangu-screener (Rust Service)                  │
//! │                              :5000                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐    │
//! │  │  Resolver    │→ │ Query Engine │→ │ KvStore (Redis/mem)  │    │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐    │
//! │  │ Theme Dir.   │  │ Session Gate │  │ Detail Gateway (HTTP)│    │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Buckets
//! - `factor:{label}`: stocks sharing a fundamental, money-flow or technical trait
//! - `theme:{name}`: constituents of a market theme
//! - `zhibiao:{name}`: stocks flagged by a featured indicator
//!
//! ## Records
//! Each matching stock gets a record of display fields; numeric attributes
//! are normalized to display units (亿, 万) before they are attached.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod auth;
pub mod detail;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod normalize;
pub mod query;
pub mod resolver;
pub mod routes;
pub mod store;
pub mod themes;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use xuangu_common::config::Config;

use crate::auth::SessionGate;
use crate::detail::DetailGateway;
use crate::query::QueryEngine;
use crate::store::KvStore;
use crate::themes::ThemeDirectory;

pub use crate::error::ScreenerError;
pub use crate::query::{Record, RecordSet};
pub use crate::routes::build_router;

/// Screening service state
pub struct ScreenerState {
    /// Configuration
    pub config: Config,
    /// Query engine over the inverted indexes
    pub engine: Arc<QueryEngine>,
    /// Cached theme directory
    pub themes: Arc<ThemeDirectory>,
    /// External stock analysis lookup
    pub detail: Arc<DetailGateway>,
    /// Session validation for protected routes
    pub sessions: Arc<SessionGate>,
}

impl ScreenerState {
    pub fn new(config: Config, store: Arc<dyn KvStore>) -> Self {
        let engine = Arc::new(QueryEngine::new(Arc::clone(&store)));
        let themes = Arc::new(ThemeDirectory::new(
            Arc::clone(&store),
            Duration::from_secs(config.themes.cache_ttl_secs),
            config.redis.scan_count,
        ));
        let detail = Arc::new(DetailGateway::from_config(&config.detail));
        let sessions = Arc::new(SessionGate::new(
            store,
            config.auth.permission_codes.clone(),
        ));

        Self {
            config,
            engine,
            themes,
            detail,
            sessions,
        }
    }
}

pub struct ScreenerService {
    state: Arc<ScreenerState>,
}

impl ScreenerService {
    pub fn new(config: Config, store: Arc<dyn KvStore>) -> Self {
        let state = Arc::new(ScreenerState::new(config, store));
        Self { state }
    }

    pub fn state(&self) -> &Arc<ScreenerState> {
        &self.state
    }

    pub async fn start(self) -> Result<()> {
        let host = self.state.config.bind_address();
        let port = self.state.config.server_port();
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", host, port))?;

        let app = build_router(Arc::clone(&self.state));

        tracing::info!(
            address = %addr,
            require_session = self.state.config.auth.require_session,
            "Starting HTTP server"
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
