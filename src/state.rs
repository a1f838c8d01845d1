// src/state.rs
use chrono::Duration as ChronoDuration;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    errors::{MarketplaceError, MarketplaceResult},
    services::{
        assignment_service::AssignmentService,
        connection_hub::{ConnectionHub, DEFAULT_HUB_CAPACITY},
        data_generator::{DataGenerator, GeneratorConfig},
        driver_metrics_service::DriverMetricsService,
        marketplace_service::MarketplaceService,
        store::{Store, StoreConfig},
    },
};

/// `REDIS_URL` value that selects the in-process store.
pub const MEMORY_STORE_URL: &str = "memory";

pub struct AppState {
    pub store: Arc<Store>,
    pub marketplace: Arc<MarketplaceService>,
    pub metrics_service: Arc<DriverMetricsService>,
    pub assignment_service: Arc<AssignmentService>,
    pub hub: ConnectionHub,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub bind_address: String,
    pub port: u16,
    pub cors_origin: Option<String>,
    pub hub_capacity: usize,
    pub generator: GeneratorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            bind_address: "0.0.0.0".to_string(),
            port: 3001,
            cors_origin: None,
            hub_capacity: DEFAULT_HUB_CAPACITY,
            generator: GeneratorConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> MarketplaceResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> MarketplaceResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = StoreConfig {
            redis_url: get("REDIS_URL").unwrap_or(defaults.store.redis_url),
            operation_timeout: Duration::from_millis(parse_or(&get, "STORE_TIMEOUT_MS", 2000u64)?),
        };

        let generator = GeneratorConfig {
            enabled: parse_flag(&get, "GENERATOR_ENABLED", defaults.generator.enabled)?,
            request_interval: seconds(&get, "REQUEST_INTERVAL_SECS", defaults.generator.request_interval)?,
            driver_move_interval: seconds(&get, "DRIVER_MOVE_INTERVAL_SECS", defaults.generator.driver_move_interval)?,
            metrics_interval: seconds(&get, "METRICS_INTERVAL_SECS", defaults.generator.metrics_interval)?,
            cleanup_interval: seconds(&get, "CLEANUP_INTERVAL_SECS", defaults.generator.cleanup_interval)?,
            request_max_age: ChronoDuration::hours(parse_or(&get, "REQUEST_MAX_AGE_HOURS", 24i64)?),
            ..defaults.generator
        };

        let config = Self {
            store,
            bind_address: get("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            port: parse_or(&get, "PORT", defaults.port)?,
            cors_origin: get("CORS_ORIGIN"),
            hub_capacity: parse_or(&get, "HUB_CAPACITY", defaults.hub_capacity)?,
            generator,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> MarketplaceResult<()> {
        if self.store.operation_timeout.is_zero() {
            return Err(MarketplaceError::InvalidConfiguration("STORE_TIMEOUT_MS must be positive".to_string()));
        }
        if self.hub_capacity == 0 {
            return Err(MarketplaceError::InvalidConfiguration("HUB_CAPACITY must be positive".to_string()));
        }
        if self.generator.request_max_age <= ChronoDuration::zero() {
            return Err(MarketplaceError::InvalidConfiguration("REQUEST_MAX_AGE_HOURS must be positive".to_string()));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn uses_memory_store(&self) -> bool {
        self.store.redis_url.eq_ignore_ascii_case(MEMORY_STORE_URL)
    }

    pub fn socket_addr(&self) -> MarketplaceResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| MarketplaceError::InvalidConfiguration(format!("invalid bind address: {}", e)))
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> MarketplaceResult<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| MarketplaceError::InvalidConfiguration(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> MarketplaceResult<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(MarketplaceError::InvalidConfiguration(format!("{}={:?} is not a boolean", key, v))),
    }
}

fn seconds<G>(get: &G, key: &str, default: Duration) -> MarketplaceResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    let secs = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        return Err(MarketplaceError::InvalidConfiguration(format!("{} must be positive", key)));
    }
    Ok(Duration::from_secs(secs))
}

impl AppState {
    pub async fn new(config: AppConfig) -> MarketplaceResult<Self> {
        let store = if config.uses_memory_store() {
            tracing::warn!("REDIS_URL=memory, using the in-process store; data is lost on restart");
            Store::memory()
        } else {
            Store::redis(config.store.clone()).await?
        };
        Ok(Self::with_store(Arc::new(store), config))
    }

    pub fn with_store(store: Arc<Store>, config: AppConfig) -> Self {
        let hub = ConnectionHub::new(config.hub_capacity);
        let marketplace = Arc::new(MarketplaceService::new(store.clone()));
        let metrics_service = Arc::new(DriverMetricsService::new(store.clone()));
        let assignment_service = Arc::new(AssignmentService::new(marketplace.clone(), hub.clone()));

        Self {
            store,
            marketplace,
            metrics_service,
            assignment_service,
            hub,
            config,
        }
    }

    pub fn data_generator(&self) -> DataGenerator {
        DataGenerator::new(
            self.marketplace.clone(),
            self.metrics_service.clone(),
            self.hub.clone(),
            self.config.generator.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> MarketplaceResult<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3001);
        assert_eq!(config.store.operation_timeout, Duration::from_millis(2000));
        assert_eq!(config.generator.request_interval, Duration::from_secs(5));
        assert_eq!(config.generator.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.generator.request_max_age, ChronoDuration::hours(24));
        assert!(config.generator.enabled);
        assert!(config.cors_origin.is_none());
        assert!(!config.uses_memory_store());
        assert_eq!(config.socket_addr().unwrap().port(), 3001);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REDIS_URL", "memory"),
            ("PORT", "8080"),
            ("BIND_ADDRESS", "127.0.0.1"),
            ("CORS_ORIGIN", "http://localhost:3000"),
            ("GENERATOR_ENABLED", "false"),
            ("REQUEST_INTERVAL_SECS", "2"),
            ("HUB_CAPACITY", "16"),
        ])
        .unwrap();
        assert!(config.uses_memory_store());
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.cors_origin.as_deref(), Some("http://localhost:3000"));
        assert!(!config.generator.enabled);
        assert_eq!(config.generator.request_interval, Duration::from_secs(2));
        assert_eq!(config.hub_capacity, 16);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            [("PORT", "not-a-port")],
            [("STORE_TIMEOUT_MS", "0")],
            [("GENERATOR_ENABLED", "maybe")],
            [("CLEANUP_INTERVAL_SECS", "0")],
            [("BIND_ADDRESS", "nowhere")],
        ] {
            assert!(
                matches!(config_from(&vars), Err(MarketplaceError::InvalidConfiguration(_))),
                "{:?} should be rejected",
                vars
            );
        }
    }

    #[tokio::test]
    async fn test_memory_state_wires_services() {
        let config = config_from(&[("REDIS_URL", "memory")]).unwrap();
        let state = AppState::new(config).await.unwrap();
        assert_eq!(state.store.backend_name(), "memory");
        assert_eq!(state.data_generator().config().seed_drivers, 20);
    }
}
