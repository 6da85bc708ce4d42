use std::str::FromStr;
use std::time::Duration;

use crate::domain::rental::{DEFAULT_MAX_DURATION_DAYS, RentalPricing};

/// リモートストアの実装
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

/// レンタル取引の設定
#[derive(Debug, Clone)]
pub struct RentalSettings {
    /// リモート書き込みの最大試行回数（初回を含む）
    pub max_write_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 進行中操作（PendingOperation）の有効期限
    pub pending_timeout: Duration,
    /// これより古い Pending 記録は放棄されたとみなす
    pub stale_pending_after: Duration,
    pub default_duration_days: i64,
    pub default_label: String,
    pub pricing: RentalPricing,
}

impl Default for RentalSettings {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(2000),
            pending_timeout: Duration::from_secs(30),
            stale_pending_after: Duration::from_secs(600),
            default_duration_days: 10,
            default_label: "Rent".to_string(),
            pricing: RentalPricing::default(),
        }
    }
}

/// アプリケーション設定
///
/// 環境変数から読み込む。未設定・不正な値はデフォルトにフォールバックする。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub store_backend: StoreBackend,
    pub rental: RentalSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から設定を構築する
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RentalSettings::default();

        let max_duration_days =
            parse_or(&lookup, "RENTAL_MAX_DURATION_DAYS", DEFAULT_MAX_DURATION_DAYS).max(1);
        let default_duration_days = parse_or(
            &lookup,
            "RENTAL_DEFAULT_DURATION_DAYS",
            defaults.default_duration_days,
        );
        // 省略時の日数が範囲外だと、日数を指定しないすべての申請が検証エラーになる
        let default_duration_days = if (1..=max_duration_days).contains(&default_duration_days) {
            default_duration_days
        } else {
            let fallback = defaults.default_duration_days.min(max_duration_days);
            tracing::warn!(
                value = default_duration_days,
                max = max_duration_days,
                fallback,
                "RENTAL_DEFAULT_DURATION_DAYS out of range, using fallback"
            );
            fallback
        };

        let rental = RentalSettings {
            max_write_attempts: parse_or(&lookup, "RENTAL_MAX_WRITE_ATTEMPTS", 3u32).max(1),
            initial_backoff: Duration::from_millis(parse_or(
                &lookup,
                "RENTAL_INITIAL_BACKOFF_MS",
                200u64,
            )),
            max_backoff: Duration::from_millis(parse_or(&lookup, "RENTAL_MAX_BACKOFF_MS", 2000u64)),
            pending_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RENTAL_PENDING_TIMEOUT_SECS",
                30u64,
            )),
            stale_pending_after: Duration::from_secs(parse_or(
                &lookup,
                "RENTAL_STALE_PENDING_SECS",
                600u64,
            )),
            default_duration_days,
            default_label: lookup("RENTAL_DEFAULT_LABEL").unwrap_or(defaults.default_label),
            pricing: RentalPricing {
                flat_fee_cents: parse_or(&lookup, "RENTAL_FLAT_FEE_CENTS", 100i64),
                daily_fee_cents: parse_or(&lookup, "RENTAL_DAILY_FEE_CENTS", 0i64),
                max_duration_days,
            },
        };

        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/book_rental".into()),
            port: parse_or(&lookup, "PORT", 3000u16),
            store_backend: parse_or(&lookup, "STORE_BACKEND", StoreBackend::Postgres),
            rental,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid configuration value, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = config_from(&[]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        assert_eq!(config.rental.max_write_attempts, 3);
        assert_eq!(config.rental.default_duration_days, 10);
        assert_eq!(config.rental.default_label, "Rent");
        assert_eq!(config.rental.pricing, RentalPricing::default());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = config_from(&[
            ("PORT", "8080"),
            ("STORE_BACKEND", "memory"),
            ("RENTAL_MAX_WRITE_ATTEMPTS", "5"),
            ("RENTAL_INITIAL_BACKOFF_MS", "10"),
            ("RENTAL_DAILY_FEE_CENTS", "25"),
        ]);

        assert_eq!(config.port, 8080);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.rental.max_write_attempts, 5);
        assert_eq!(config.rental.initial_backoff, Duration::from_millis(10));
        assert_eq!(config.rental.pricing.daily_fee_cents, 25);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[
            ("PORT", "not-a-port"),
            ("STORE_BACKEND", "redis"),
            ("RENTAL_MAX_WRITE_ATTEMPTS", "0"),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.store_backend, StoreBackend::Postgres);
        // 0回は意味をなさないため最低1回に補正される
        assert_eq!(config.rental.max_write_attempts, 1);
    }

    #[test]
    fn test_default_duration_must_fit_the_maximum() {
        let config = config_from(&[("RENTAL_DEFAULT_DURATION_DAYS", "0")]);
        assert_eq!(config.rental.default_duration_days, 10);

        let config = config_from(&[("RENTAL_DEFAULT_DURATION_DAYS", "-4")]);
        assert_eq!(config.rental.default_duration_days, 10);

        let config = config_from(&[
            ("RENTAL_DEFAULT_DURATION_DAYS", "30"),
            ("RENTAL_MAX_DURATION_DAYS", "7"),
        ]);
        assert_eq!(config.rental.default_duration_days, 7);
        assert_eq!(config.rental.pricing.max_duration_days, 7);

        let config = config_from(&[("RENTAL_DEFAULT_DURATION_DAYS", "14")]);
        assert_eq!(config.rental.default_duration_days, 14);
    }
}
