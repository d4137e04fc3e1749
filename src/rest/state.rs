//! API state management for the REST server.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::Config;
use crate::engine::IncidentEngine;

/// Shared state for the REST API
#[derive(Clone)]
pub struct ApiState {
    /// Engine behind one lock; requests run one at a time
    pub engine: Arc<Mutex<IncidentEngine>>,
    /// Application configuration
    pub config: Arc<Config>,
}

impl ApiState {
    pub fn new(config: Config, engine: IncidentEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            config: Arc::new(config),
        }
    }

    /// Build the engine from configuration
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let engine = IncidentEngine::from_config(&config)?;
        Ok(Self::new(config, engine))
    }
}

/// State rooted in a scratch directory, for handler tests
#[cfg(test)]
pub(crate) fn test_state(root: &std::path::Path) -> ApiState {
    let mut config = Config::default();
    let root = root.to_string_lossy();
    config.paths.database = format!("{root}/playbook.db");
    config.paths.uploads = format!("{root}/uploads");
    config.paths.reports = format!("{root}/reports");
    config.paths.logs = format!("{root}/logs");

    ApiState::from_config(config).unwrap()
}
