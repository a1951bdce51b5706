use signoff_db::migrations::{self, MIGRATOR};

use crate::commands::{finish, open_pool, prepare, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;

        let schema_version = MIGRATOR.iter().map(|migration| migration.version).max().unwrap_or(0);
        tracing::info!(
            event_name = "signoff.migrate.completed",
            schema_version,
            "applied pending migrations"
        );
        Ok(CommandResult::success(
            "migrate",
            format!("applied pending migrations (schema version {schema_version})"),
        ))
    });

    finish("migrate", result)
}
