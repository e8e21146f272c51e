use service_core::config as core_config;
use service_core::error::AppError;
use service_core::observability::LogFormat;
use std::env;
use std::time::Duration;

pub const MAX_PASSWORD_RESET_TTL_MINUTES: i64 = 24 * 60;
const MIN_PROD_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub tokens: TokenConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub bootstrap: Option<BootstrapAdmin>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_minutes: i64,
}

/// Lifetimes and link base for invitation and reset tokens.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub public_base_url: String,
    pub invitation_ttl_hours: i64,
    pub password_reset_ttl_minutes: i64,
}

impl TokenConfig {
    pub fn invitation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.invitation_ttl_hours)
    }

    pub fn password_reset_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.password_reset_ttl_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// Upper bound for one send, including connection setup.
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccessConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("access-service"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            log_format: get_env("LOG_FORMAT", Some("json"), false)?
                .parse()
                .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET", None, is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    false,
                )?,
            },
            tokens: TokenConfig {
                public_base_url: get_env("PUBLIC_BASE_URL", Some("http://localhost:3000"), is_prod)?,
                invitation_ttl_hours: parse_env("INVITATION_TTL_HOURS", "168", false)?,
                password_reset_ttl_minutes: parse_env("PASSWORD_RESET_TTL_MINUTES", "60", false)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", false)?,
                user: env::var("SMTP_USER").ok(),
                password: env::var("SMTP_PASSWORD").ok(),
                from: get_env("MAIL_FROM", Some("noreply@localhost"), is_prod)?,
                timeout: Duration::from_secs(parse_env("MAIL_TIMEOUT_SECONDS", "10", false)?),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            bootstrap: match (
                env::var("BOOTSTRAP_ADMIN_EMAIL"),
                env::var("BOOTSTRAP_ADMIN_PASSWORD"),
            ) {
                (Ok(email), Ok(password)) => Some(BootstrapAdmin { email, password }),
                _ => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(config_error("JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"));
        }

        if self.tokens.invitation_ttl_hours <= 0 {
            return Err(config_error("INVITATION_TTL_HOURS must be positive"));
        }

        if self.tokens.password_reset_ttl_minutes <= 0
            || self.tokens.password_reset_ttl_minutes > MAX_PASSWORD_RESET_TTL_MINUTES
        {
            return Err(config_error(
                "PASSWORD_RESET_TTL_MINUTES must be between 1 and 1440",
            ));
        }

        if self.smtp.timeout.is_zero() {
            return Err(config_error("MAIL_TIMEOUT_SECONDS must be positive"));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(config_error(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS",
            ));
        }

        if self.environment == Environment::Prod {
            if self.jwt.secret.len() < MIN_PROD_JWT_SECRET_LEN {
                return Err(config_error("JWT_SECRET must be at least 32 bytes in production"));
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(config_error("Wildcard CORS origin not allowed in production"));
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AccessConfig {
        AccessConfig {
            common: core_config::Config::default(),
            environment: Environment::Prod,
            service_name: "access-service".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://localhost/access".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            jwt: JwtConfig {
                secret: "s".repeat(32),
                access_token_expiry_minutes: 60,
            },
            tokens: TokenConfig {
                public_base_url: "https://labels.example.com".to_string(),
                invitation_ttl_hours: 168,
                password_reset_ttl_minutes: 60,
            },
            smtp: SmtpConfig {
                host: "smtp.example.com".to_string(),
                port: 587,
                user: None,
                password: None,
                from: "noreply@example.com".to_string(),
                timeout: Duration::from_secs(10),
            },
            security: SecurityConfig {
                allowed_origins: vec!["https://labels.example.com".to_string()],
            },
            bootstrap: None,
        }
    }

    #[test]
    fn accepts_defaults() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.tokens.invitation_ttl(), chrono::Duration::days(7));
        assert_eq!(config.tokens.password_reset_ttl(), chrono::Duration::hours(1));
    }

    #[test]
    fn reset_ttl_is_capped_at_a_day() {
        let mut config = valid();
        config.tokens.password_reset_ttl_minutes = MAX_PASSWORD_RESET_TTL_MINUTES;
        assert!(config.validate().is_ok());

        config.tokens.password_reset_ttl_minutes = MAX_PASSWORD_RESET_TTL_MINUTES + 1;
        assert!(config.validate().is_err());

        config.tokens.password_reset_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn prod_rejects_short_secret_and_wildcard_cors() {
        let mut config = valid();
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.security.allowed_origins = vec!["*".to_string()];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.environment = Environment::Dev;
        config.security.allowed_origins = vec!["*".to_string()];
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_environment_names() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
