//! Shared application state

use abtest_config::EngineConfig;
use decision::ABTestEngine;
use std::sync::Arc;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ABTestEngine>,
    pub config: Arc<EngineConfig>,
}

impl AppState {
    /// Build the engine described by `config`
    pub fn from_config(config: EngineConfig) -> decision::Result<Self> {
        let engine = ABTestEngine::new(&config)?;
        Ok(Self::new(Arc::new(engine), config))
    }

    pub fn new(engine: Arc<ABTestEngine>, config: EngineConfig) -> Self {
        Self {
            engine,
            config: Arc::new(config),
        }
    }
}
