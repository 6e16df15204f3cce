use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AiConfig, DatabaseConfig, DriverKind, ProviderKind};
use crate::database::{Connector, DatabaseConnection, DatabaseError};
use crate::generator::{GeneratorError, GeneratorFactory, SqlGenerator};

/// Maps configured driver and provider names to their implementations.
#[derive(Default)]
pub struct BackendRegistry {
    connectors: HashMap<DriverKind, Arc<dyn Connector>>,
    generators: HashMap<ProviderKind, Arc<dyn GeneratorFactory>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connector(&mut self, driver: DriverKind, connector: Arc<dyn Connector>) {
        self.connectors.insert(driver, connector);
    }

    pub fn register_generator(&mut self, provider: ProviderKind, factory: Arc<dyn GeneratorFactory>) {
        self.generators.insert(provider, factory);
    }

    #[must_use]
    pub fn with_connector(mut self, driver: DriverKind, connector: Arc<dyn Connector>) -> Self {
        self.register_connector(driver, connector);
        self
    }

    #[must_use]
    pub fn with_generator(mut self, provider: ProviderKind, factory: Arc<dyn GeneratorFactory>) -> Self {
        self.register_generator(provider, factory);
        self
    }

    #[must_use]
    pub fn drivers(&self) -> Vec<DriverKind> {
        let mut drivers = self.connectors.keys().copied().collect::<Vec<_>>();
        drivers.sort_unstable_by_key(|driver| driver.as_str());
        drivers
    }

    #[must_use]
    pub fn providers(&self) -> Vec<ProviderKind> {
        let mut providers = self.generators.keys().copied().collect::<Vec<_>>();
        providers.sort_unstable_by_key(|provider| provider.as_str());
        providers
    }

    pub async fn connect(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Arc<dyn DatabaseConnection>, DatabaseError> {
        let connector = self.connectors.get(&config.driver).ok_or_else(|| {
            DatabaseError::new(format!("unsupported database driver `{}`", config.driver))
        })?;
        connector.connect(config).await
    }

    pub fn create_generator(&self, config: &AiConfig) -> Result<Arc<dyn SqlGenerator>, GeneratorError> {
        let factory = self
            .generators
            .get(&config.provider)
            .ok_or_else(|| GeneratorError::UnsupportedProvider(config.provider.to_string()))?;
        factory.create(config)
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("drivers", &self.drivers())
            .field("providers", &self.providers())
            .finish()
    }
}
