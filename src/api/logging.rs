use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;

const DEBUG_PAYLOAD_ENV: &str = "CELLCHAT_DEBUG_PAYLOAD";
const API_LOG_PATH_ENV: &str = "CELLCHAT_API_LOG_PATH";

pub fn debug_payload_enabled() -> bool {
    std::env::var(DEBUG_PAYLOAD_ENV)
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

pub fn emit_debug_payload(request_url: &str, payload: &Value) {
    let formatted_payload = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "<payload serialization error>".to_string());
    tracing::debug!(url = request_url, "sending chat backend request");
    append_to_log_file(&format!(
        "CELLCHAT_API DEBUG payload_request url={request_url}\npayload:\n{formatted_payload}\n"
    ));
}

pub fn emit_sse_parse_error(event_type: Option<&str>, json_data: &str, parse_error: &serde_json::Error) {
    let event_type = event_type.unwrap_or("<none>");
    tracing::warn!(
        error = %parse_error,
        event_type,
        "dropping malformed chat stream frame"
    );
    append_to_log_file(&format!(
        "CELLCHAT_API ERROR sse_parse_failed error={parse_error}\nevent_type={event_type}\ndata:\n{json_data}\n"
    ));
}

/// Mirrors raw diagnostics into `CELLCHAT_API_LOG_PATH` when it is set.
fn append_to_log_file(message: &str) {
    let Some(path) = resolve_log_path() else {
        return;
    };
    if let Err(error) = append_log_file(&path, message) {
        tracing::warn!(%error, path = %path, "failed to append to API log file");
    }
}

fn resolve_log_path() -> Option<String> {
    std::env::var(API_LOG_PATH_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn append_log_file(path: &str, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(message.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnv, ENV_LOCK};

    #[test]
    fn test_debug_payload_enabled_accepts_true_variants() {
        let _env_lock = ENV_LOCK.blocking_lock();
        {
            let _env = ScopedEnv::set(&[(DEBUG_PAYLOAD_ENV, Some("1"))]);
            assert!(debug_payload_enabled());
        }
        {
            let _env = ScopedEnv::set(&[(DEBUG_PAYLOAD_ENV, Some("TRUE"))]);
            assert!(debug_payload_enabled());
        }
        let _env = ScopedEnv::set(&[(DEBUG_PAYLOAD_ENV, None)]);
        assert!(!debug_payload_enabled());
    }

    #[test]
    fn test_parse_errors_are_appended_to_log_file() {
        let _env_lock = ENV_LOCK.blocking_lock();
        let dir = tempfile::tempdir().expect("temp dir");
        let log_path = dir.path().join("api.log");
        let _env = ScopedEnv::set(&[(API_LOG_PATH_ENV, log_path.to_str())]);

        let parse_error = serde_json::from_str::<Value>("{oops").unwrap_err();
        emit_sse_parse_error(Some("delta"), "{oops", &parse_error);
        emit_debug_payload("http://localhost:8000/api", &serde_json::json!({"query": "hi"}));

        let logged = std::fs::read_to_string(&log_path).expect("log file written");
        assert!(logged.contains("sse_parse_failed"));
        assert!(logged.contains("event_type=delta"));
        assert!(logged.contains("\"query\": \"hi\""));
    }

    #[test]
    fn test_resolve_log_path_ignores_blank_value() {
        let _env_lock = ENV_LOCK.blocking_lock();
        let _env = ScopedEnv::set(&[(API_LOG_PATH_ENV, Some("   "))]);
        assert_eq!(resolve_log_path(), None);
    }
}
