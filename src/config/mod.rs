use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Настройки JWT (токены выпускает внешний сервис авторизации)
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

// Правила бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Бронь сразу создаётся подтверждённой, без ожидания оплаты.
    pub direct_confirm: bool,
    /// Через сколько минут неоплаченная бронь освобождает места. Больше нуля.
    pub pending_ttl_minutes: u32,
    pub sweep_interval_seconds: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            direct_confirm: false,
            pending_ttl_minutes: 15,
            sweep_interval_seconds: 60,
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { key, value })
}

fn parsed_or<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    parse(key, env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn positive(key: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        });
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parsed_or("PORT", "8000")?,
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_reservation=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parsed_or("DB_POOL_SIZE", "20")?,
                acquire_timeout_seconds: parsed_or("DB_ACQUIRE_TIMEOUT_SECONDS", "5")?,
            },
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
            },
            booking: BookingConfig {
                direct_confirm: parsed_or("BOOKING_DIRECT_CONFIRM", "false")?,
                pending_ttl_minutes: positive(
                    "BOOKING_PENDING_TTL_MINUTES",
                    parsed_or("BOOKING_PENDING_TTL_MINUTES", "15")?,
                )?,
                sweep_interval_seconds: parsed_or("BOOKING_SWEEP_INTERVAL_SECONDS", "60")?,
            },
        })
    }
}
