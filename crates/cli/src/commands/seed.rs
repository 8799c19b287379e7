use clap::Subcommand;
use koperasi_db::{
    connect_with_config, migrations, DbPool, SeedDataset, SeedResult, VerificationResult,
};

use crate::commands::{exit, load_config, runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Subcommand)]
pub enum SeedAction {
    #[command(about = "Apply migrations, load the demo dataset, and verify it")]
    Load,
    #[command(about = "Check that every demo row is present and consistent")]
    Verify,
    #[command(about = "Delete the demo dataset")]
    Clean,
}

type SeedFailure = (&'static str, String, u8);

pub fn run(action: SeedAction) -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), exit::DATABASE))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;

        let outcome = match action {
            SeedAction::Load => load(&pool).await,
            SeedAction::Verify => verify(&pool).await.map(|_| verified_message()),
            SeedAction::Clean => SeedDataset::clean(&pool)
                .await
                .map(|()| "removed the demo dataset".to_string())
                .map_err(|error| ("seed_execution", error.to_string(), exit::MIGRATION)),
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(message) => CommandResult::success("seed", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

async fn load(pool: &DbPool) -> Result<String, SeedFailure> {
    let seeded = SeedDataset::load(pool)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), exit::MIGRATION))?;
    verify(pool).await?;
    Ok(render_summary(&seeded))
}

async fn verify(pool: &DbPool) -> Result<VerificationResult, SeedFailure> {
    let verification = SeedDataset::verify(pool)
        .await
        .map_err(|error| ("seed_verification", error.to_string(), exit::CHECKS_FAILED))?;
    if verification.all_present {
        return Ok(verification);
    }

    Err(("seed_verification", failed_checks_message(&verification), exit::CHECKS_FAILED))
}

fn failed_checks_message(verification: &VerificationResult) -> String {
    let failed = verification
        .checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(*check))
        .collect::<Vec<_>>();
    if failed.is_empty() {
        "some demo data is missing".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

fn verified_message() -> String {
    "demo dataset is present and consistent".to_string()
}

fn render_summary(seeded: &SeedResult) -> String {
    let mut lines = vec![format!(
        "loaded the demo dataset (password for every account: {})",
        SeedDataset::DEMO_PASSWORD
    )];

    lines.push("accounts:".to_string());
    lines.extend(seeded.users.iter().map(|(email, role)| format!("  - {email} ({role})")));

    lines.push("applications:".to_string());
    lines.extend(seeded.applications.iter().map(|application| {
        format!(
            "  - {} {}: {} ({})",
            application.kind, application.entity_id, application.status, application.description
        )
    }));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use koperasi_db::VerificationResult;

    use super::failed_checks_message;

    #[test]
    fn failed_checks_are_listed_by_name() {
        let verification = VerificationResult {
            all_present: false,
            checks: vec![("seed-admin", true), ("level-catalog", false), ("audit-events", false)],
        };

        assert_eq!(
            failed_checks_message(&verification),
            "seed verification failed for checks: level-catalog, audit-events"
        );
    }
}
