use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::codec::Codec;
use crate::config::{Config, ConfigError};
use crate::engine::{Engine, EngineError};

#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Everything a request handler needs, built from one configuration.
#[derive(Clone, Debug)]
pub struct AppState {
    engine: Arc<Engine>,
    config: Arc<Config>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, StateError> {
        let engine = Engine::from_config(config)?;
        Ok(Self::with_engine(engine, config.clone()))
    }

    pub fn with_engine(engine: Engine, config: Config) -> Self {
        Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }

    pub fn codec(&self) -> &Codec {
        self.engine.codec()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Swappable handle to the current [`AppState`].
///
/// Requests take a snapshot and keep using it even if a reload replaces the
/// state mid-flight.
#[derive(Clone, Debug)]
pub struct SharedAppState {
    inner: Arc<RwLock<Arc<AppState>>>,
}

impl SharedAppState {
    pub fn new(state: AppState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(state))),
        }
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn replace(&self, state: AppState) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(state);
    }
}

/// Reloads configuration from `path` and swaps it in. The previous state is
/// kept when loading or validation fails.
pub fn reload_app_state_from_path(
    path: impl AsRef<Path>,
    shared: &SharedAppState,
) -> Result<(), StateError> {
    let config = Config::load_from_path(path.as_ref())?;
    let state = AppState::from_config(&config)?;
    shared.replace(state);
    Ok(())
}
