use std::env;

/// Policy constants for pricing and the timed windows of the booking
/// lifecycle. Split out from [`AppConfig`] so the policy modules can take it
/// by reference without dragging server settings along.
#[derive(Debug, Clone, Copy)]
pub struct PricingConfig {
    /// Markup applied to the host's base rate to produce the driver-facing
    /// rate (0.15 = 15%).
    pub driver_markup_rate: f64,
    /// Platform service fee as a fraction of the driver subtotal.
    pub service_fee_rate: f64,
    /// Overstay accrual once a host selects the charging remediation.
    pub overstay_rate_cents_per_hour: i64,
    /// How long a host has to answer an approval-required booking.
    pub approval_window_minutes: i64,
    /// Window after creation during which cancellation is always refunded.
    pub cancellation_grace_minutes: i64,
    /// Window after overstay detection during which no action may be taken.
    pub overstay_grace_minutes: i64,
    /// Minimum and maximum extension lengths, in hours.
    pub min_extension_hours: f64,
    pub max_extension_hours: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            driver_markup_rate: 0.15,
            service_fee_rate: 0.15,
            overstay_rate_cents_per_hour: 2500,
            approval_window_minutes: 60,
            cancellation_grace_minutes: 10,
            overstay_grace_minutes: 10,
            min_extension_hours: 0.25,
            max_extension_hours: 24.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub dev_auth_overrides_enabled: bool,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub auth_jwt_secret: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub expiry_scan_interval_seconds: u64,
    pub pricing: PricingConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Curbside API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            dev_auth_overrides_enabled: env_parse_bool_or("DEV_AUTH_OVERRIDES_ENABLED", false),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            auth_jwt_secret: env_opt("AUTH_JWT_SECRET"),
            stripe_secret_key: env_opt("STRIPE_SECRET_KEY"),
            stripe_webhook_secret: env_opt("STRIPE_WEBHOOK_SECRET"),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
            expiry_scan_interval_seconds: env_parse_or("EXPIRY_SCAN_INTERVAL_SECONDS", 15),
            pricing: PricingConfig {
                driver_markup_rate: env_parse_or("DRIVER_MARKUP_RATE", 0.15),
                service_fee_rate: env_parse_or("SERVICE_FEE_RATE", 0.15),
                overstay_rate_cents_per_hour: env_parse_or("OVERSTAY_RATE_CENTS_PER_HOUR", 2500),
                approval_window_minutes: env_parse_or("APPROVAL_WINDOW_MINUTES", 60),
                cancellation_grace_minutes: env_parse_or("CANCELLATION_GRACE_MINUTES", 10),
                overstay_grace_minutes: env_parse_or("OVERSTAY_GRACE_MINUTES", 10),
                min_extension_hours: env_parse_or("MIN_EXTENSION_HOURS", 0.25),
                max_extension_hours: env_parse_or("MAX_EXTENSION_HOURS", 24.0),
            },
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn auth_dev_overrides_enabled(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.dev_auth_overrides_enabled
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, PricingConfig};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn default_windows_match_policy() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.approval_window_minutes, 60);
        assert_eq!(pricing.cancellation_grace_minutes, 10);
        assert_eq!(pricing.overstay_grace_minutes, 10);
    }
}
