use crate::*;

#[test]
fn test_evaluator_error_display() {
    let not_found = EvaluatorError::object_not_found("evaluation_scripts/1/config.json");
    assert_eq!(
        not_found.to_string(),
        "对象不存在: evaluation_scripts/1/config.json"
    );

    let breaker = EvaluatorError::TooManyEarlyFailures {
        failures: 4,
        threshold: 4,
    };
    assert_eq!(breaker.to_string(), "早期失败过多: 前 4 个文件中失败 4 个");

    let mismatch = EvaluatorError::OutputShapeMismatch {
        expected: 10,
        actual: 9,
    };
    assert_eq!(mismatch.to_string(), "输出形状不匹配: 期望 10, 实际 9");
}

#[test]
fn test_error_kinds() {
    assert_eq!(
        EvaluatorError::MissingHarnessFile {
            analysis_id: 1,
            file: "config.json".to_string()
        }
        .kind(),
        ErrorKind::Staging
    );
    assert_eq!(
        EvaluatorError::EntryPointNotFound {
            function: "detect".to_string()
        }
        .kind(),
        ErrorKind::Contract
    );
    assert_eq!(
        EvaluatorError::TooManyEarlyFailures {
            failures: 4,
            threshold: 4
        }
        .kind(),
        ErrorKind::CircuitBreaker
    );
    assert_eq!(
        EvaluatorError::malformed_message("missing user_id").kind(),
        ErrorKind::Message
    );
    assert_eq!(
        EvaluatorError::HttpStatus {
            status: 500,
            url: "http://api/x".to_string()
        }
        .kind(),
        ErrorKind::Reporting
    );
}

#[test]
fn test_per_file_recoverable() {
    assert!(EvaluatorError::invocation("boom").is_per_file_recoverable());
    assert!(EvaluatorError::InvocationTimeout { seconds: 5 }.is_per_file_recoverable());
    assert!(EvaluatorError::OutputShapeMismatch {
        expected: 1,
        actual: 2
    }
    .is_per_file_recoverable());
    assert!(!EvaluatorError::storage("timeout").is_per_file_recoverable());
    assert!(!EvaluatorError::NoSuccessfulResults.is_per_file_recoverable());
}

#[test]
fn test_not_found_vs_transport() {
    assert!(EvaluatorError::object_not_found("a/b").is_not_found());
    assert!(!EvaluatorError::storage("connection reset").is_not_found());
    assert!(EvaluatorError::HttpStatus {
        status: 404,
        url: "http://api/file_metadata/3".to_string()
    }
    .is_not_found());
}

#[test]
fn test_error_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err: EvaluatorError = json_err.into();
    assert!(matches!(err, EvaluatorError::Serialization(_)));

    let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: EvaluatorError = io_err.into();
    assert!(matches!(err, EvaluatorError::Io(_)));

    let err: EvaluatorError = anyhow::anyhow!("wrapped").into();
    assert!(matches!(err, EvaluatorError::Internal(ref msg) if msg == "wrapped"));
}
