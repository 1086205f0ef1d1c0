//! Common test utilities for session tests
//!
//! Wires an [`AuthService`] to in-memory collaborators with short timeouts
//! so scenarios run quickly under paused tokio time.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;
use stockroom_core::{ProfileConfig, Role, StockroomConfig};
use stockroom_session::{AuthService, AuthSnapshot, MemoryProfileStore, MemorySessionSource};

pub const PASSWORD: &str = "correct horse battery staple";

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("stockroom_session=debug,info")
            .with_test_writer()
            .try_init();
    });
}

/// Fetch timeout 15ms, three retries starting at 10ms, snapshot bound 100ms
pub fn test_config() -> StockroomConfig {
    let mut config = StockroomConfig::default();
    config.session.initial_session_timeout_ms = 100;
    config.profile = ProfileConfig {
        fetch_timeout_ms: 15,
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 1_000,
        write_timeout_ms: 100,
        ..ProfileConfig::default()
    };
    config
}

pub struct Harness {
    pub source: Arc<MemorySessionSource>,
    pub store: Arc<MemoryProfileStore>,
    pub config: StockroomConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: StockroomConfig) -> Self {
        init_logging();
        Self {
            source: Arc::new(MemorySessionSource::new()),
            store: Arc::new(MemoryProfileStore::new()),
            config,
        }
    }

    pub fn with_source(mut self, source: MemorySessionSource) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Register an account with a stored profile of the given role
    pub fn account(&self, email: &str, role: Role) -> String {
        let user_id = self.source.add_account(email, PASSWORD);
        self.store.seed(&user_id, email, role);
        user_id
    }

    pub fn start(&self) -> AuthService {
        AuthService::start(self.source.clone(), self.store.clone(), &self.config)
    }
}

/// Let spawned tasks drain, then wait for the service to stop loading
pub async fn settle(service: &AuthService) -> AuthSnapshot {
    tokio::time::sleep(Duration::from_millis(1)).await;
    service.wait_until_settled().await
}
