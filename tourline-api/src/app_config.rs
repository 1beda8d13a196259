use chrono::FixedOffset;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tourline_payment::{MomoConfig, ZaloPayConfig};
use tourline_shared::ExpiryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub business_rules: BusinessRules,
    pub scheduler: SchedulerConfig,
    pub payment: PaymentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// `memory://` runs on the in-process store.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    5
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub reservation_window_seconds: i64,
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl BusinessRules {
    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::from_seconds(self.reservation_window_seconds)
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, config::ConfigError> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            config::ConfigError::Message(format!(
                "utc_offset_hours out of range: {}",
                self.utc_offset_hours
            ))
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub reaper_interval_seconds: u64,
    pub phase_interval_seconds: u64,
    pub reconcile_interval_seconds: u64,
    pub reconcile_min_age_seconds: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub timeout_seconds: u64,
    #[serde(default)]
    pub reconcile_on_invalid_signature: bool,
    // A missing section disables the provider.
    pub zalopay: Option<ZaloPayConfig>,
    pub momo: Option<MomoConfig>,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides; optional.
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `TOURLINE__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("TOURLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Settings from a single TOML document, without files or environment.
    pub fn from_toml(toml: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: &str = include_str!("../../config/default.toml");

    #[test]
    fn test_default_file_parses() {
        let config = Config::from_toml(DEFAULTS).unwrap();
        assert_eq!(config.business_rules.reservation_window_seconds, 600);
        assert_eq!(config.payment.timeout(), Duration::from_secs(10));
        assert!(!config.payment.reconcile_on_invalid_signature);
        assert!(config.payment.zalopay.is_none());
        assert!(config.database.is_memory());
    }

    #[test]
    fn test_provider_section_enables_provider() {
        let toml = format!(
            "{}\n[payment.zalopay]\napp_id = \"2553\"\nkey1 = \"k1\"\nkey2 = \"k2\"\n\
             create_endpoint = \"https://sb-openapi.zalopay.vn/v2/create\"\n\
             query_endpoint = \"https://sb-openapi.zalopay.vn/v2/query\"\n\
             callback_url = \"https://tourline.test/v1/webhooks/zalopay\"\n\
             redirect_url = \"https://tourline.test/done\"\n",
            DEFAULTS
        );
        let config = Config::from_toml(&toml).unwrap();
        let zalopay = config.payment.zalopay.unwrap();
        assert_eq!(zalopay.app_id, "2553");
        assert_eq!(zalopay.key2.expose(), "k2");
    }

    #[test]
    fn test_business_rules_need_only_the_window() {
        let toml = DEFAULTS.replace("utc_offset_hours = 7\n", "");
        let rules = Config::from_toml(&toml).unwrap().business_rules;
        assert_eq!(rules.expiry_policy(), ExpiryPolicy::from_seconds(600));
        assert_eq!(rules.utc_offset_hours, 0);
    }

    #[test]
    fn test_offset_bounds() {
        let mut rules = Config::from_toml(DEFAULTS).unwrap().business_rules;
        assert_eq!(rules.utc_offset().unwrap().local_minus_utc(), 7 * 3600);
        rules.utc_offset_hours = 30;
        assert!(rules.utc_offset().is_err());
    }
}
