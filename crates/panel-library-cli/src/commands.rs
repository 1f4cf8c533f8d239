use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use panel_library_common::Result;
use panel_library_config::AppConfig;
use panel_library_db::{
    MigrationReport, applied_migrations, open_connection, open_read_only, schema,
};
use serde::Serialize;
use tracing::info;

/// Applied state of one registered migration step.
#[derive(Debug, Clone, Serialize)]
pub struct StepStatus {
    pub id: String,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Open the configured database and apply every pending step. When the panel
/// library is disabled the database is not opened at all.
pub fn migrate(config: &AppConfig) -> Result<MigrationReport> {
    if !config.features.panel_library {
        info!("panel library disabled, schema left untouched");
        return Ok(MigrationReport::default());
    }

    let path = config.database.resolved_path();
    let mut conn = open_connection(
        &path,
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    schema::migrator(true)?.run(&mut conn)
}

/// Every step this build registers, with its ledger timestamp if applied.
/// Reads only; a missing database reports every step as pending.
pub fn status(config: &AppConfig) -> Result<Vec<StepStatus>> {
    let migrator = schema::migrator(config.features.panel_library)?;

    let path = config.database.resolved_path();
    let applied: HashMap<String, DateTime<Utc>> = if path.is_file() {
        let conn = open_read_only(
            &path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )?;
        applied_migrations(&conn)?
            .into_iter()
            .map(|m| (m.id, m.applied_at))
            .collect()
    } else {
        HashMap::new()
    };

    Ok(migrator
        .steps()
        .iter()
        .map(|step| StepStatus {
            id: step.id().to_string(),
            applied_at: applied.get(step.id()).copied(),
        })
        .collect())
}
