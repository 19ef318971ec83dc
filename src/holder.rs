// src/holder.rs

use crate::config::Config;
use crate::error::ConfigError;
use crate::keys::KeyLoader;
use crate::oauth2::OAuth2Config;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Shared owner of the active [`OAuth2Config`].
///
/// Readers take a snapshot and keep using it for the whole request.
/// Replacing the configuration swaps a single pointer under a briefly held
/// write lock, so a reader sees either the old or the new configuration,
/// never a mix.
pub struct ConfigHolder {
    current: RwLock<Arc<OAuth2Config>>,
}

impl ConfigHolder {
    pub fn new(config: OAuth2Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The active configuration.
    pub fn snapshot(&self) -> Arc<OAuth2Config> {
        // Only a pointer is ever written, so a poisoned lock still holds a
        // complete configuration.
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Makes `next` active and returns the configuration it replaced.
    pub fn swap(&self, next: OAuth2Config) -> Arc<OAuth2Config> {
        let next = Arc::new(next);
        let previous = {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };
        info!("Swapped active OAuth2 configuration");
        previous
    }

    /// Builds a configuration from `config` and swaps it in.
    ///
    /// On error the active configuration is left untouched.
    pub fn reload(
        &self,
        config: &Config,
        loader: &dyn KeyLoader,
    ) -> Result<Arc<OAuth2Config>, ConfigError> {
        let next = OAuth2Config::from_config(config, loader)?;
        Ok(self.swap(next))
    }
}

impl From<OAuth2Config> for ConfigHolder {
    fn from(config: OAuth2Config) -> Self {
        Self::new(config)
    }
}
