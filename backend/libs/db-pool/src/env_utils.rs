//! Environment variable helpers shared by the pool and service configs
//!
//! Values are trimmed before parsing; an empty value counts as unset.

use std::str::FromStr;

fn read(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `key`, falling back to `default` when it is unset or unparseable
pub fn parse_env_with_default<T: FromStr>(key: &str, default: T) -> T {
    read(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse `key`, falling back to `default` only when it is unset
///
/// A value that is present but unparseable is an error rather than a silent
/// default.
pub fn parse_env_or_err<T: FromStr>(key: &str, default: T) -> Result<T, String> {
    match read(key) {
        Some(v) => v
            .parse()
            .map_err(|_| format!("{} has an invalid value: {}", key, v)),
        None => Ok(default),
    }
}

/// Parse `key`, failing when it is unset, empty, or unparseable
pub fn parse_env_required<T: FromStr>(key: &str) -> Result<T, String> {
    read(key)
        .ok_or_else(|| format!("{} must be set", key))?
        .parse()
        .map_err(|_| format!("{} has an invalid value", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_on_missing_or_invalid() {
        std::env::remove_var("DB_POOL_TEST_LIMIT");
        assert_eq!(parse_env_with_default("DB_POOL_TEST_LIMIT", 42u32), 42);

        std::env::set_var("DB_POOL_TEST_LIMIT", " 17 ");
        assert_eq!(parse_env_with_default("DB_POOL_TEST_LIMIT", 42u32), 17);

        std::env::set_var("DB_POOL_TEST_LIMIT", "many");
        assert_eq!(parse_env_with_default("DB_POOL_TEST_LIMIT", 42u32), 42);
        std::env::remove_var("DB_POOL_TEST_LIMIT");
    }

    #[test]
    #[serial]
    fn test_or_err_rejects_invalid() {
        std::env::remove_var("DB_POOL_TEST_WINDOW");
        assert_eq!(parse_env_or_err("DB_POOL_TEST_WINDOW", 300u64), Ok(300));

        std::env::set_var("DB_POOL_TEST_WINDOW", "");
        assert_eq!(parse_env_or_err("DB_POOL_TEST_WINDOW", 300u64), Ok(300));

        std::env::set_var("DB_POOL_TEST_WINDOW", " 60 ");
        assert_eq!(parse_env_or_err("DB_POOL_TEST_WINDOW", 300u64), Ok(60));

        std::env::set_var("DB_POOL_TEST_WINDOW", "-5");
        let err = parse_env_or_err("DB_POOL_TEST_WINDOW", 300u64).unwrap_err();
        assert!(err.contains("DB_POOL_TEST_WINDOW"));
        std::env::remove_var("DB_POOL_TEST_WINDOW");
    }

    #[test]
    #[serial]
    fn test_required_rejects_blank() {
        std::env::set_var("DB_POOL_TEST_URL", "   ");
        assert!(parse_env_required::<String>("DB_POOL_TEST_URL").is_err());

        std::env::set_var("DB_POOL_TEST_URL", "postgres://localhost/identity");
        assert_eq!(
            parse_env_required::<String>("DB_POOL_TEST_URL").as_deref(),
            Ok("postgres://localhost/identity")
        );
        std::env::remove_var("DB_POOL_TEST_URL");
    }
}
