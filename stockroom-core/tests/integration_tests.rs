//! Integration tests for stockroom-core infrastructure

use futures::FutureExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stockroom_core::{
    config_error, init_logging, retry_async, validation_error, with_timeout,
    ErrorContext, LogFormat, LoggingConfig, RetryConfig, StockroomConfig, StockroomError,
    StoreError,
};
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

fn fast_retry(max_retries: usize) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay_ms: 10,
        max_delay_ms: 1000,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

#[tokio::test]
async fn test_error_handling() {
    let error = config_error!("Invalid config", "test_component");

    match &error {
        StockroomError::Config { message, context, .. } => {
            assert_eq!(message, "Invalid config");
            assert_eq!(context.component, "test_component");
            assert!(!context.error_id.is_empty());
            assert!(!context.recovery_suggestions.is_empty());
        }
        _ => panic!("Expected Config error"),
    }

    // Should not panic
    error.log();
    assert!(!error.is_recoverable());
}

#[tokio::test]
async fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        include_location: false,
        include_thread: false,
        log_to_file: false,
        log_file_path: None,
        enable_performance_monitoring: false,
        filter_directives: vec!["stockroom_core=debug".to_string()],
    };

    // A global subscriber can only be installed once per process,
    // so a second call must fail instead of panicking
    let _ = init_logging(&config);
    assert!(init_logging(&config).is_err());
}

#[tokio::test]
async fn test_logging_requires_file_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };

    assert!(init_logging(&config).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retry_mechanism() {
    let attempt_count = Arc::new(AtomicUsize::new(0));

    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move |_attempt: usize| {
            let count = attempt_count.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(StoreError::transient("Temporary failure"))
                } else {
                    Ok("Success")
                }
            }
            .boxed()
        }
    };

    let start = Instant::now();
    let outcome = retry_async(operation, &fast_retry(5), "test_operation", StoreError::is_transient)
        .await;

    assert_eq!(assert_ok!(outcome.result), "Success");
    assert_eq!(outcome.attempts, 3);
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    // 10ms + 20ms of backoff
    assert_eq!(outcome.total_delay, Duration::from_millis(30));
    assert_eq!(start.elapsed(), Duration::from_millis(30));
}

#[tokio::test(start_paused = true)]
async fn test_retry_stops_on_non_retryable_error() {
    let attempt_count = Arc::new(AtomicUsize::new(0));

    let operation = {
        let attempt_count = Arc::clone(&attempt_count);
        move |_attempt: usize| {
            attempt_count.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StoreError::permission("denied")) }.boxed()
        }
    };

    let outcome = retry_async(operation, &fast_retry(5), "denied", StoreError::is_transient).await;

    assert_eq!(
        assert_err!(outcome.result),
        StoreError::permission("denied")
    );
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.total_delay, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_is_exhausted() {
    let operation = |_attempt: usize| async { Err::<(), _>(StoreError::transient("down")) }.boxed();

    let config = fast_retry(3);
    let outcome = retry_async(operation, &config, "always_down", StoreError::is_transient).await;

    assert!(outcome.result.is_err());
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.total_delay, config.cumulative_delay(3));
    assert_eq!(outcome.total_delay, Duration::from_millis(70));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_mechanism() {
    let quick_operation = async {
        sleep(Duration::from_millis(10)).await;
        "Success"
    };

    let result = with_timeout(quick_operation, 100, "quick_test").await;
    assert_eq!(assert_ok!(result), "Success");

    let slow_operation = async {
        sleep(Duration::from_millis(200)).await;
        "Should not reach here"
    };

    let result = with_timeout(slow_operation, 50, "slow_test").await;

    match assert_err!(result) {
        StockroomError::Timeout {
            operation,
            duration_ms,
            ..
        } => {
            assert_eq!(operation, "slow_test");
            assert_eq!(duration_ms, 50);
        }
        _ => panic!("Expected Timeout error"),
    }
}

#[tokio::test]
async fn test_config_validation() {
    let mut config = StockroomConfig::default();
    assert!(config.validate().is_ok());

    config.profile.fetch_timeout_ms = 0;
    match assert_err!(config.validate()) {
        StockroomError::Config { message, .. } => {
            assert!(message.contains("fetch_timeout_ms"));
        }
        _ => panic!("Expected Config error"),
    }
}

#[tokio::test]
async fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = StockroomConfig::default();
    config.profile.max_retries = 7;
    config.profile.placeholder_display_name = "Unnamed".to_string();
    config.save_to_file(&path).unwrap();

    let loaded = StockroomConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);

    std::fs::write(&path, "[profile\nmax_retries = ").unwrap();
    assert!(StockroomConfig::from_file(&path).is_err());
}

#[tokio::test]
async fn test_error_macros() {
    let validation_err = validation_error!("Invalid field value", "email", "validator");
    match validation_err {
        StockroomError::Validation {
            message,
            field,
            context,
        } => {
            assert_eq!(message, "Invalid field value");
            assert_eq!(field, Some("email".to_string()));
            assert_eq!(context.component, "validator");
            assert!(!context.recovery_suggestions.is_empty());
        }
        _ => panic!("Expected Validation error"),
    }
}
