//! Migration system for tracking and applying database schema changes.
//!
//! Each step has a unique, immutable name and a schema effect. Steps are
//! applied in registration order and tracked by name in the `migration_log`
//! table, so a step that has already run in an environment is never run again.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use panel_library_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

const LEDGER_TABLE: &str = "migration_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    NVarchar,
    Text,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub length: Option<u32>,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl Column {
    /// A non-null column of the given type.
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            length: None,
            nullable: false,
            primary_key: false,
            auto_increment: false,
        }
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = true;
        self
    }

    fn sql_type(&self) -> String {
        match (self.ty, self.length) {
            (ColumnType::BigInt, _) => "INTEGER".to_string(),
            (ColumnType::NVarchar, Some(len)) => format!("VARCHAR({len})"),
            (ColumnType::NVarchar, None) => "VARCHAR(255)".to_string(),
            (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::DateTime, _) => "DATETIME".to_string(),
        }
    }

    fn sql(&self) -> String {
        let mut sql = format!("{} {}", quote(self.name), self.sql_type());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.auto_increment {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub columns: Vec<&'static str>,
    pub unique: bool,
}

impl Index {
    pub fn unique(columns: &[&'static str]) -> Self {
        Self {
            columns: columns.to_vec(),
            unique: true,
        }
    }

    /// `UQE_<table>_<cols>` for unique indices, `IDX_<table>_<cols>` otherwise.
    pub fn name_for(&self, table: &str) -> String {
        let prefix = if self.unique { "UQE" } else { "IDX" };
        format!("{prefix}_{table}_{}", self.columns.join("_"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub columns: Vec<Column>,
    pub indices: Vec<Index>,
}

/// The schema effect of a single migration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Migration {
    AddTable(Table),
    AddIndex { table: &'static str, index: Index },
}

impl Migration {
    /// Creates the table's columns only; indices are separate steps.
    pub fn add_table(table: &Table) -> Self {
        Migration::AddTable(table.clone())
    }

    pub fn add_index(table: &Table, index: &Index) -> Self {
        Migration::AddIndex {
            table: table.name,
            index: index.clone(),
        }
    }

    /// DDL for SQLite. No `IF NOT EXISTS`: a pre-existing object that the
    /// ledger does not know about is an incompatible schema and must fail.
    pub fn sql(&self) -> String {
        match self {
            Migration::AddTable(table) => {
                let columns: Vec<String> = table.columns.iter().map(Column::sql).collect();
                format!(
                    "CREATE TABLE {} (\n  {}\n)",
                    quote(table.name),
                    columns.join(",\n  ")
                )
            }
            Migration::AddIndex { table, index } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                let columns: Vec<String> = index.columns.iter().map(|c| quote(c)).collect();
                format!(
                    "CREATE {unique}INDEX {} ON {} ({})",
                    quote(&index.name_for(table)),
                    quote(table),
                    columns.join(", ")
                )
            }
        }
    }
}

/// A named step, immutable once registered.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    id: String,
    migration: Migration,
}

impl MigrationStep {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn migration(&self) -> &Migration {
        &self.migration
    }
}

/// Outcome of a [`Migrator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

/// A ledger row.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: String,
    pub applied_at: DateTime<Utc>,
}

/// Ordered, append-only list of migration steps.
///
/// Steps can only be appended; there is no way to remove or reorder one
/// after registration.
#[derive(Debug, Default)]
pub struct Migrator {
    steps: Vec<MigrationStep>,
    ids: HashSet<String>,
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_migration(&mut self, id: impl Into<String>, migration: Migration) -> Result<()> {
        let id = id.into();
        if !self.ids.insert(id.clone()) {
            return Err(Error::Migration {
                id,
                reason: "a migration with this name is already registered".into(),
            });
        }
        self.steps.push(MigrationStep { id, migration });
        Ok(())
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step not yet in the ledger, in registration order.
    ///
    /// Each step runs in its own `IMMEDIATE` transaction, which takes the
    /// database write lock: a second process migrating the same file waits
    /// (up to the connection's busy timeout), then finds the step ledgered
    /// and skips it.
    pub fn run(&self, conn: &mut Connection) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        if self.steps.is_empty() {
            debug!("no migrations registered, leaving schema untouched");
            return Ok(report);
        }

        ensure_ledger(conn)?;

        for step in &self.steps {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| step_error(step, format!("failed to acquire migration lock: {e}")))?;

            if is_applied(&tx, &step.id)? {
                debug!(migration = %step.id, "already applied, skipping");
                report.skipped.push(step.id.clone());
                continue;
            }

            let sql = step.migration.sql();
            info!(migration = %step.id, "applying migration");
            tx.execute_batch(&sql)
                .map_err(|e| step_error(step, e.to_string()))?;
            tx.execute(
                "INSERT INTO migration_log (migration_id, sql, applied_at) VALUES (?1, ?2, ?3)",
                params![step.id, sql, Utc::now()],
            )
            .map_err(|e| step_error(step, format!("failed to record migration: {e}")))?;
            tx.commit()
                .map_err(|e| step_error(step, format!("failed to commit: {e}")))?;

            report.applied.push(step.id.clone());
        }

        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "migrations complete"
        );
        Ok(report)
    }

    /// Registered steps that the ledger does not list yet.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<&str>> {
        let applied: HashSet<String> = applied_migrations(conn)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        Ok(self
            .steps
            .iter()
            .map(MigrationStep::id)
            .filter(|id| !applied.contains(*id))
            .collect())
    }
}

pub fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            migration_id TEXT NOT NULL UNIQUE,
            sql TEXT NOT NULL,
            applied_at DATETIME NOT NULL
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migration ledger: {e}")))
}

/// Ledger contents in application order. Empty if no migration ever ran.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    if !table_exists(conn, LEDGER_TABLE)? {
        return Ok(Vec::new());
    }

    let mut stmt = conn
        .prepare("SELECT migration_id, applied_at FROM migration_log ORDER BY id ASC")
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                id: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to query migration ledger: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read migration ledger: {e}")))
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![name],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to check table {name}: {e}")))
}

fn is_applied(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM migration_log WHERE migration_id = ?1",
            params![id],
            |_| Ok(()),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read migration ledger: {e}")))?;
    Ok(found.is_some())
}

fn step_error(step: &MigrationStep, reason: String) -> Error {
    Error::Migration {
        id: step.id.clone(),
        reason,
    }
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_table() -> Table {
        Table {
            name: "widget",
            columns: vec![
                Column::new("id", ColumnType::BigInt).primary_key(),
                Column::new("org_id", ColumnType::BigInt),
                Column::new("title", ColumnType::NVarchar).length(64),
                Column::new("note", ColumnType::Text).nullable(),
            ],
            indices: vec![Index::unique(&["org_id", "title"])],
        }
    }

    fn widget_migrator() -> Migrator {
        let table = widget_table();
        let mut mg = Migrator::new();
        mg.add_migration("create widget table v1", Migration::add_table(&table))
            .unwrap();
        mg.add_migration(
            "add index widget org_id & title",
            Migration::add_index(&table, &table.indices[0]),
        )
        .unwrap();
        mg
    }

    #[test]
    fn renders_table_ddl() {
        let sql = Migration::add_table(&widget_table()).sql();
        assert_eq!(
            sql,
            "CREATE TABLE \"widget\" (\n  \
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,\n  \
             \"org_id\" INTEGER NOT NULL,\n  \
             \"title\" VARCHAR(64) NOT NULL,\n  \
             \"note\" TEXT\n)"
        );
    }

    #[test]
    fn renders_index_ddl_with_derived_name() {
        let table = widget_table();
        let sql = Migration::add_index(&table, &table.indices[0]).sql();
        assert_eq!(
            sql,
            "CREATE UNIQUE INDEX \"UQE_widget_org_id_title\" ON \"widget\" (\"org_id\", \"title\")"
        );

        let plain = Index {
            columns: vec!["title"],
            unique: false,
        };
        assert_eq!(plain.name_for("widget"), "IDX_widget_title");
        assert_eq!(
            Migration::add_index(&table, &plain).sql(),
            "CREATE INDEX \"IDX_widget_title\" ON \"widget\" (\"title\")"
        );
    }

    #[test]
    fn rejects_duplicate_step_names() {
        let table = widget_table();
        let mut mg = Migrator::new();
        mg.add_migration("create widget table v1", Migration::add_table(&table))
            .unwrap();
        let err = mg
            .add_migration("create widget table v1", Migration::add_table(&table))
            .unwrap_err();
        assert!(matches!(err, Error::Migration { .. }));
        assert_eq!(mg.steps().len(), 1);
    }

    #[test]
    fn applies_in_order_then_skips() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mg = widget_migrator();

        let first = mg.run(&mut conn).unwrap();
        assert_eq!(
            first.applied,
            vec!["create widget table v1", "add index widget org_id & title"]
        );
        assert!(first.skipped.is_empty());

        let second = mg.run(&mut conn).unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped.len(), 2);

        let ledger = applied_migrations(&conn).unwrap();
        let ids: Vec<_> = ledger.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["create widget table v1", "add index widget org_id & title"]
        );
    }

    #[test]
    fn empty_migrator_does_not_touch_store() {
        let mut conn = Connection::open_in_memory().unwrap();
        let report = Migrator::new().run(&mut conn).unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(!table_exists(&conn, LEDGER_TABLE).unwrap());
    }

    #[test]
    fn pending_lists_unapplied_steps() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mg = widget_migrator();
        assert_eq!(mg.pending(&conn).unwrap().len(), 2);

        mg.run(&mut conn).unwrap();
        assert!(mg.pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn failed_step_is_not_ledgered() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE widget (id INTEGER)").unwrap();

        let err = widget_migrator().run(&mut conn).unwrap_err();
        match err {
            Error::Migration { id, .. } => assert_eq!(id, "create widget table v1"),
            other => panic!("expected migration error, got {other:?}"),
        }
        assert!(applied_migrations(&conn).unwrap().is_empty());
    }
}
