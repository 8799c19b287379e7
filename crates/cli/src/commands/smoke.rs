use std::time::Instant;

use koperasi_core::config::{AppConfig, LoadOptions, MIN_TOKEN_SECRET_LEN};
use koperasi_db::{connect_with_config, connect_with_settings, migrations, SeedDataset};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{escape_json, exit, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const AFTER_CONFIG: &[&str] = &["token_secret", "db_connectivity", "workflow_fixtures"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config_started = Instant::now();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_ms(config_started),
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_ms(config_started),
                message: error.to_string(),
            });
            checks.extend(AFTER_CONFIG.iter().copied().map(skipped));
            return finalize_report(checks, elapsed_ms(started));
        }
    };

    let secret_started = Instant::now();
    let secret_len = config.auth.token_secret.expose_secret().len();
    checks.push(SmokeCheck {
        name: "token_secret",
        status: if secret_len >= MIN_TOKEN_SECRET_LEN { SmokeStatus::Pass } else { SmokeStatus::Fail },
        elapsed_ms: elapsed_ms(secret_started),
        message: format!("signing secret has {secret_len} characters"),
    });

    let runtime = match runtime("smoke") {
        Ok(runtime) => runtime,
        Err(failure) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: failure.output,
            });
            checks.push(skipped("workflow_fixtures"));
            return finalize_report(checks, elapsed_ms(started));
        }
    };

    let db_started = Instant::now();
    match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            runtime.block_on(pool.close());
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Pass,
                elapsed_ms: elapsed_ms(db_started),
                message: format!("connected using `{}`", config.database.url),
            });
        }
        Err(error) => {
            checks.push(SmokeCheck {
                name: "db_connectivity",
                status: SmokeStatus::Fail,
                elapsed_ms: elapsed_ms(db_started),
                message: format!("failed to connect: {error}"),
            });
            checks.push(skipped("workflow_fixtures"));
            return finalize_report(checks, elapsed_ms(started));
        }
    }

    // Fixture check runs against a scratch database so the configured one is untouched.
    let fixtures_started = Instant::now();
    let fixtures = runtime.block_on(async {
        let scratch = connect_with_settings("sqlite::memory:", 1, config.database.timeout_secs)
            .await
            .map_err(|error| format!("scratch database: {error}"))?;
        migrations::run_pending(&scratch)
            .await
            .map_err(|error| format!("migration execution failed: {error}"))?;
        SeedDataset::load(&scratch).await.map_err(|error| format!("seed load failed: {error}"))?;
        let verification = SeedDataset::verify(&scratch)
            .await
            .map_err(|error| format!("seed verification failed: {error}"))?;
        scratch.close().await;
        Ok::<bool, String>(verification.all_present)
    });

    checks.push(match fixtures {
        Ok(true) => SmokeCheck {
            name: "workflow_fixtures",
            status: SmokeStatus::Pass,
            elapsed_ms: elapsed_ms(fixtures_started),
            message: "schema migrates and demo workflows verify".to_string(),
        },
        Ok(false) => SmokeCheck {
            name: "workflow_fixtures",
            status: SmokeStatus::Fail,
            elapsed_ms: elapsed_ms(fixtures_started),
            message: "demo workflows failed verification".to_string(),
        },
        Err(message) => SmokeCheck {
            name: "workflow_fixtures",
            status: SmokeStatus::Fail,
            elapsed_ms: elapsed_ms(fixtures_started),
            message,
        },
    });

    finalize_report(checks, elapsed_ms(started))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    });

    CommandResult {
        exit_code: if failed { exit::CHECKS_FAILED } else { 0 },
        output: format!("{human}\n{machine}"),
    }
}
