//! Environment-driven configuration for the chart-rendering service.

use std::env;

use crate::error::{Result, ServiceError};

/// Fully resolved, validated configuration for one process lifetime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub is_production: bool,

    pub oss: Option<OssConfig>,

    pub max_concurrent: usize,
    pub task_timeout_secs: u64,
    pub retry_attempts: u32,

    pub task_retention_days: u32,
    pub cleanup_interval_hours: u64,
    pub cleanup_hour: u32,
    pub cleanup_max_retries: u32,
}

/// Object-store credentials and addressing, present only when all three
/// required variables are set together.
#[derive(Debug, Clone)]
pub struct OssConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    pub region: String,
    pub custom_domain: Option<String>,
    pub path_prefix: String,
}

impl AppConfig {
    /// Loads configuration from an optional `.env` file followed by the
    /// process environment, validating every bounded field.
    pub fn load() -> Result<Self> {
        // Missing .env is not an error; a real environment may set everything directly.
        let _ = dotenv::dotenv();

        let port = parse_in_range("PORT", 3000u16, 1, 65535)?;
        let is_production = env::var("NODE_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let oss = load_oss_config()?;

        let max_concurrent = parse_in_range("QUEUE_MAX_CONCURRENT", 10usize, 1, 100)?;
        let task_timeout_secs = parse_in_range("QUEUE_TASK_TIMEOUT", 300u64, 30, 3600)?;
        let retry_attempts = parse_in_range("QUEUE_RETRY_ATTEMPTS", 3u32, 0, 10)?;

        let task_retention_days = parse_in_range("TASK_RETENTION_DAYS", 7u32, 1, 365)?;
        let cleanup_interval_hours = parse_in_range("CLEANUP_INTERVAL_HOURS", 24u64, 1, 168)?;
        let cleanup_hour = parse_in_range("CLEANUP_HOUR", 2u32, 0, 23)?;
        let cleanup_max_retries = parse_in_range("CLEANUP_MAX_RETRIES", 3u32, 0, 10)?;

        Ok(Self {
            port,
            is_production,
            oss,
            max_concurrent,
            task_timeout_secs,
            retry_attempts,
            task_retention_days,
            cleanup_interval_hours,
            cleanup_hour,
            cleanup_max_retries,
        })
    }
}

fn load_oss_config() -> Result<Option<OssConfig>> {
    let access_key_id = env::var("OSS_ACCESS_KEY_ID").ok();
    let access_key_secret = env::var("OSS_ACCESS_KEY_SECRET").ok();
    let bucket = env::var("OSS_BUCKET").ok();

    let (access_key_id, access_key_secret, bucket) = match (access_key_id, access_key_secret, bucket) {
        (Some(id), Some(secret), Some(bucket)) => (id, secret, bucket),
        (None, None, None) => return Ok(None),
        _ => {
            return Err(ServiceError::Validation(
                "OSS_ACCESS_KEY_ID, OSS_ACCESS_KEY_SECRET and OSS_BUCKET must be set together"
                    .to_string(),
            ));
        }
    };

    let region = env::var("OSS_REGION").unwrap_or_else(|_| "oss-cn-hangzhou".to_string());
    if !region.starts_with("oss-") {
        return Err(ServiceError::Validation(format!(
            "OSS_REGION must begin with 'oss-', got '{region}'"
        )));
    }

    let custom_domain = env::var("OSS_CUSTOM_DOMAIN").ok().filter(|s| !s.is_empty());

    let mut path_prefix = env::var("OSS_PATH_PREFIX").unwrap_or_default();
    if !path_prefix.is_empty() && !path_prefix.ends_with('/') {
        path_prefix.push('/');
    }

    Ok(Some(OssConfig {
        access_key_id,
        access_key_secret,
        bucket,
        region,
        custom_domain,
        path_prefix,
    }))
}

/// Parses an environment variable into `T`, falling back to `default` when
/// unset, and rejecting values outside `[min, max]`.
fn parse_in_range<T>(name: &str, default: T, min: T, max: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Ok(raw) = env::var(name) else {
        return Ok(default);
    };
    let value: T = raw.trim().parse().map_err(|_| {
        ServiceError::Validation(format!("{name} must be a number, got '{raw}'"))
    })?;
    if value < min || value > max {
        return Err(ServiceError::Validation(format!(
            "{name}={value} out of range [{min}, {max}]"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_in_range_uses_default_when_unset() {
        std::env::remove_var("TEST_CONFIG_VALUE_ABC");
        let value = parse_in_range("TEST_CONFIG_VALUE_ABC", 5u32, 1, 10).unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn parse_in_range_rejects_out_of_bounds() {
        std::env::set_var("TEST_CONFIG_VALUE_XYZ", "999");
        let err = parse_in_range("TEST_CONFIG_VALUE_XYZ", 5u32, 1, 10).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        std::env::remove_var("TEST_CONFIG_VALUE_XYZ");
    }
}
