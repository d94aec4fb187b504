use genai_resilience::{App, Config, Error, ErrorCategory, KeySource};
use std::io::Write;
use std::time::Duration;

#[tokio::test]
async fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.keys.env_var, "GEMINI_API_KEY");
    assert_eq!(config.keys.max_fallback_keys, 10);
    assert_eq!(config.keys.max_errors_before_disable, 5);
    assert_eq!(config.keys.key_recovery_time_secs, 300);
    assert_eq!(config.keys.rate_limit_cooldown_secs, 60);
    assert_eq!(config.keys.max_key_attempts, 3);
    assert_eq!(config.key_rotation_delay(), Duration::from_secs(1));
}

#[tokio::test]
async fn test_config_validation() {
    let mut config = Config::default();

    // Valid config should pass
    assert!(config.validate().is_ok());

    // Invalid port
    config.server.port = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.server.port = 8080;

    // Zero failure threshold
    config.breaker.failure_threshold = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.breaker.failure_threshold = 5;

    // Zero success threshold
    config.breaker.success_threshold = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.breaker.success_threshold = 3;

    // Zero key attempts
    config.keys.max_key_attempts = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
}

#[test]
fn test_config_file_round_trip_into_app() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("genai.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        r#"
[keys]
max_key_attempts = 2
key_rotation_delay_ms = 250
max_errors_before_disable = 1
rate_limit_pattern = "(?i)overloaded"

[breaker]
failure_threshold = 4
recovery_timeout_secs = 30
"#
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.key_rotation_delay(), Duration::from_millis(250));
    assert_eq!(config.breaker_config().recovery_timeout, Duration::from_secs(30));

    let app = App::with_key_source(
        config,
        &KeySource::List(vec!["first".to_string(), "second".to_string()]),
    )
    .unwrap();
    assert_eq!(app.caller().max_key_attempts(), 2);
    assert_eq!(app.keys().settings().max_errors_before_disable, 1);
}

#[test]
fn test_missing_credentials_are_fatal() {
    let err = App::with_key_source(Config::default(), &KeySource::env("GENAI_TEST_NO_SUCH_KEY", 3))
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Fatal);
    assert_eq!(
        err.to_string(),
        "No API keys configured: set GENAI_TEST_NO_SUCH_KEY (and optionally GENAI_TEST_NO_SUCH_KEY_1..GENAI_TEST_NO_SUCH_KEY_3)"
    );
}

#[test]
fn test_error_display() {
    let err = Error::InvalidInput {
        field: "test_field".to_string(),
        reason: "test error".to_string(),
    };
    assert_eq!(format!("{}", err), "Invalid input: test_field - test error");

    let err = Error::ProviderExhausted {
        operation: "generate".to_string(),
        attempts: 3,
        source: Box::new(Error::CircuitBreakerOpen {
            service: "gemini".to_string(),
        }),
    };
    assert_eq!(
        err.to_string(),
        "Operation 'generate' failed after 3 key attempts: Circuit breaker open for service: gemini"
    );
}
