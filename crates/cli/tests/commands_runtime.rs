use std::env;
use std::sync::{Mutex, OnceLock};

use koperasi_cli::commands::seed::SeedAction;
use koperasi_cli::commands::{doctor, migrate, seed, smoke};
use serde_json::Value;

const VALID_ENV: &[(&str, &str)] = &[
    ("KOPERASI_DATABASE_URL", "sqlite::memory:"),
    ("KOPERASI_AUTH_TOKEN_SECRET", "integration-test-secret-0123456789abcdef"),
    ("KOPERASI_MAIL_TRANSPORT", "log"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_token_secret() {
    with_env(&[("KOPERASI_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or("").contains("auth.token_secret"));
    });
}

#[test]
fn seed_load_lists_accounts_and_parked_applications() {
    with_env(VALID_ENV, || {
        let result = seed::run(SeedAction::Load);
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("Koperasi123!"));
        assert!(message.contains("  - ketua@koperasi.test (KETUA)"));
        assert!(message.contains(
            "  - LOAN ln-seed-review: UNDER_REVIEW_KETUA (Cash loan approved by DSP, awaiting KETUA)"
        ));
        assert!(message.contains("  - MEMBER_APPLICATION ma-seed-pending: SUBMITTED"));
    });
}

#[test]
fn seed_load_is_deterministic_across_runs() {
    with_env(VALID_ENV, || {
        let first = seed::run(SeedAction::Load);
        let second = seed::run(SeedAction::Load);
        assert_eq!(first.exit_code, 0);
        assert_eq!(second.exit_code, 0);
        assert_eq!(parse_payload(&first.output)["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn seed_verify_fails_on_an_empty_database() {
    with_env(VALID_ENV, || {
        let result = seed::run(SeedAction::Verify);
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "seed_verification");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("seed-admin"));
        assert!(message.contains("ln-seed-review"));
        assert!(!message.contains("level-catalog"), "levels ship with the schema");
    });
}

#[test]
fn seed_clean_succeeds_on_an_empty_database() {
    with_env(VALID_ENV, || {
        let result = seed::run(SeedAction::Clean);
        assert_eq!(result.exit_code, 0, "{}", result.output);
        assert_eq!(parse_payload(&result.output)["status"], "ok");
    });
}

#[test]
fn doctor_reports_pending_schema_without_applying_it() {
    with_env(VALID_ENV, || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().cloned().unwrap_or_default();
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .unwrap_or(Value::Null)
        };
        assert_eq!(status_of("config_validation"), "pass");
        assert_eq!(status_of("mail_transport"), "pass");
        assert_eq!(status_of("database_connectivity"), "pass");
        assert_eq!(status_of("schema_version"), "fail");
    });
}

#[test]
fn doctor_skips_database_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 6);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report: {}", result.output);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(4));
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "KOPERASI_DATABASE_URL",
        "KOPERASI_DATABASE_MAX_CONNECTIONS",
        "KOPERASI_DATABASE_TIMEOUT_SECS",
        "KOPERASI_SERVER_BIND_ADDRESS",
        "KOPERASI_SERVER_PORT",
        "KOPERASI_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "KOPERASI_AUTH_TOKEN_SECRET",
        "KOPERASI_AUTH_ACCESS_TTL_MINUTES",
        "KOPERASI_AUTH_REFRESH_TTL_DAYS",
        "KOPERASI_AUTH_COOKIE_SECURE",
        "KOPERASI_MAIL_TRANSPORT",
        "KOPERASI_MAIL_RELAY_URL",
        "KOPERASI_MAIL_API_KEY",
        "KOPERASI_MAIL_FROM_ADDRESS",
        "KOPERASI_LOGGING_LEVEL",
        "KOPERASI_LOGGING_FORMAT",
        "KOPERASI_LOG_LEVEL",
        "KOPERASI_LOG_FORMAT",
        "KOPERASI_LOCALE",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
