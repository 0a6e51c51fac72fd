use reqwest::Url;

/// Parse "true"/"false"/"1"/"0" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    parse_bool_str(&s)
}

/// Parse "true"/"false"/"1"/"0" from a &str.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Returns true for localhost, loopback IPv4/IPv6, and 0.0.0.0 URLs.
pub fn is_local_endpoint_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };

    match parsed.host_str() {
        Some(host) => {
            let normalized = host
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_ascii_lowercase();
            normalized == "localhost"
                || normalized == "::1"
                || normalized == "0.0.0.0"
                || normalized.starts_with("127.")
        }
        None => false,
    }
}

/// Reads an unsigned integer override from the environment, clamped to `min..=max`.
pub fn env_override_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

/// Reads a non-blank string from the environment.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnv, ENV_LOCK};

    #[test]
    fn test_parse_bool_helpers() {
        assert_eq!(parse_bool_str("true"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_flag("YES".to_string()), Some(true));
        assert_eq!(parse_bool_flag("off".to_string()), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    fn test_is_local_endpoint_url_normalizes_case_and_space() {
        assert!(is_local_endpoint_url(" HTTP://LOCALHOST:8000/api "));
        assert!(is_local_endpoint_url("https://127.0.0.1/api"));
        assert!(is_local_endpoint_url("http://[::1]:8000/api"));
        assert!(!is_local_endpoint_url("https://evil-localhost.com/api"));
        assert!(!is_local_endpoint_url("https://sheets.example.com/api"));
        assert!(!is_local_endpoint_url("not a url"));
    }

    #[test]
    fn test_env_override_u64_clamps_and_falls_back() {
        let _env_lock = ENV_LOCK.blocking_lock();
        let key = "CELLCHAT_TEST_U64_OVERRIDE";

        {
            let _env = ScopedEnv::set(&[(key, Some("9999"))]);
            assert_eq!(env_override_u64(key, 30, 5, 900), 900);
        }
        {
            let _env = ScopedEnv::set(&[(key, Some(" 12 "))]);
            assert_eq!(env_override_u64(key, 30, 5, 900), 12);
        }
        {
            let _env = ScopedEnv::set(&[(key, Some("soon"))]);
            assert_eq!(env_override_u64(key, 30, 5, 900), 30);
        }
        assert!(env_non_empty(key).is_none());
    }
}
