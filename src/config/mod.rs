use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// HS256 keys shorter than this are refused at startup
pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("JWT secret must be at least 32 bytes (got {0})")]
    WeakSecret(usize),

    #[error("{0} must be positive")]
    NonPositive(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub scheduler: SchedulerConfig,
    pub notification: NotificationConfig,
    /// YAML file with the role hierarchy and permission table; built-in chain when unset
    pub role_hierarchy_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
    pub batch_size: u32,
    pub escalation_timeout_ms: u64,
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_millis(self.escalation_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            batch_size: 100,
            escalation_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Falls back to log-only delivery when unset
    pub webhook_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_ACCESS_TOKEN_EXPIRY") {
            self.security.access_token_expiry_secs = v.parse().unwrap_or(self.security.access_token_expiry_secs);
        }
        if let Ok(v) = env::var("JWT_REFRESH_TOKEN_EXPIRY") {
            self.security.refresh_token_expiry_secs = v.parse().unwrap_or(self.security.refresh_token_expiry_secs);
        }

        // Scheduler overrides
        if let Ok(v) = env::var("SCHEDULER_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs = v.parse().unwrap_or(self.scheduler.sweep_interval_secs);
        }
        if let Ok(v) = env::var("SCHEDULER_BATCH_SIZE") {
            self.scheduler.batch_size = v.parse().unwrap_or(self.scheduler.batch_size);
        }
        if let Ok(v) = env::var("SCHEDULER_ESCALATION_TIMEOUT_MS") {
            self.scheduler.escalation_timeout_ms = v.parse().unwrap_or(self.scheduler.escalation_timeout_ms);
        }

        if let Ok(v) = env::var("NOTIFICATION_WEBHOOK_URL") {
            self.notification.webhook_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = env::var("ROLE_HIERARCHY_FILE") {
            self.role_hierarchy_file = Some(v).filter(|s| !s.is_empty());
        }

        if let Ok(v) = env::var("API_PORT") {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }

        self
    }

    /// Startup checks; the process refuses to run on failure
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret_len = self.security.jwt_secret.len();
        if secret_len < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret(secret_len));
        }
        if self.security.access_token_expiry_secs <= 0 {
            return Err(ConfigError::NonPositive("JWT_ACCESS_TOKEN_EXPIRY"));
        }
        if self.security.refresh_token_expiry_secs <= 0 {
            return Err(ConfigError::NonPositive("JWT_REFRESH_TOKEN_EXPIRY"));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(ConfigError::NonPositive("SCHEDULER_SWEEP_INTERVAL_SECS"));
        }
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::NonPositive("SCHEDULER_BATCH_SIZE"));
        }
        if self.scheduler.escalation_timeout_ms == 0 {
            return Err(ConfigError::NonPositive("SCHEDULER_ESCALATION_TIMEOUT_MS"));
        }
        Ok(())
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig { port: 8080 },
            security: SecurityConfig {
                jwt_secret: "development-only-secret-change-me-0000".to_string(),
                access_token_expiry_secs: 1800,
                refresh_token_expiry_secs: 604_800,
            },
            scheduler: SchedulerConfig {
                sweep_interval_secs: 300,
                ..SchedulerConfig::default()
            },
            notification: NotificationConfig::default(),
            role_hierarchy_file: None,
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig { port: 8080 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                access_token_expiry_secs: 1800,
                refresh_token_expiry_secs: 604_800,
            },
            scheduler: SchedulerConfig::default(),
            notification: NotificationConfig::default(),
            role_hierarchy_file: None,
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig { port: 8080 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                access_token_expiry_secs: 1800,
                refresh_token_expiry_secs: 604_800,
            },
            scheduler: SchedulerConfig {
                batch_size: 500,
                ..SchedulerConfig::default()
            },
            notification: NotificationConfig::default(),
            role_hierarchy_file: None,
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.security.access_token_expiry_secs, 1800);
        assert_eq!(config.security.refresh_token_expiry_secs, 604_800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_requires_secret() {
        let config = AppConfig::production();
        assert_eq!(config.validate(), Err(ConfigError::WeakSecret(0)));
        assert_eq!(config.scheduler.sweep_interval_secs, 3600);
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = AppConfig::development();
        config.security.jwt_secret = "x".repeat(MIN_SECRET_BYTES - 1);
        assert_eq!(config.validate(), Err(ConfigError::WeakSecret(31)));
        config.security.jwt_secret = "x".repeat(MIN_SECRET_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_positive_expiry_rejected() {
        let mut config = AppConfig::development();
        config.security.access_token_expiry_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::NonPositive("JWT_ACCESS_TOKEN_EXPIRY")));

        let mut config = AppConfig::development();
        config.security.refresh_token_expiry_secs = -1;
        assert_eq!(config.validate(), Err(ConfigError::NonPositive("JWT_REFRESH_TOKEN_EXPIRY")));
    }
}
