use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use panel_library_common::{Error, Result};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, ffi, params,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::connection::{open_connection, open_in_memory};
use crate::models::{
    ConnectionKind, ElementFilter, LibraryElement, LibraryElementConnection, NewLibraryElement,
    PatchLibraryElement, validate_fields,
};
use crate::schema;

const ELEMENT_COLUMNS: &str = "id, org_id, folder_id, uid, name, kind, type, description, model, \
                               created, created_by, updated, updated_by, version";

const CONNECTION_COLUMNS: &str =
    "id, library_element_id, connection_kind, connection_id, created, created_by";

/// Persistent storage for library elements and the documents that use them.
///
/// Duplicate elements and duplicate connections are rejected by the unique
/// indices and surface as [`Error::Duplicate`].
pub struct LibraryElementStore {
    conn: Mutex<Connection>,
    enabled: bool,
}

impl LibraryElementStore {
    pub fn open(db_path: &Path, busy_timeout: Duration, enabled: bool) -> Result<Self> {
        let conn = open_connection(db_path, busy_timeout)?;
        Self::with_connection(conn, enabled)
    }

    pub fn in_memory(enabled: bool) -> Result<Self> {
        Self::with_connection(open_in_memory()?, enabled)
    }

    /// Run this crate's migrations on `conn` and wrap it.
    pub fn with_connection(mut conn: Connection, enabled: bool) -> Result<Self> {
        let report = schema::migrator(enabled)?.run(&mut conn)?;
        if !report.applied.is_empty() {
            info!(
                "library element schema migrated ({} step(s))",
                report.applied.len()
            );
        }
        Ok(Self {
            conn: Mutex::new(conn),
            enabled,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        if !self.enabled {
            return Err(Error::FeatureDisabled);
        }
        self.conn
            .lock()
            .map_err(|_| Error::Database("library element store lock poisoned".into()))
    }

    pub fn create_element(&self, new: NewLibraryElement) -> Result<LibraryElement> {
        let mut conn = self.connection()?;
        let uid = new.uid.clone().unwrap_or_else(generate_uid);
        validate_fields(&uid, &new.name, &new.element_type, &new.description)?;

        let tx = write_transaction(&mut conn)?;
        if find_by_uid(&tx, new.org_id, &uid)?.is_some() {
            return Err(Error::Duplicate(format!("library element with uid {uid}")));
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO library_element
                (org_id, folder_id, uid, name, kind, type, description, model,
                 created, created_by, updated, updated_by, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?9, ?10, 1)",
            params![
                new.org_id,
                new.folder_id,
                uid,
                new.name,
                new.kind,
                new.element_type,
                new.description,
                new.model,
                now,
                new.created_by,
            ],
        )
        .map_err(|e| {
            write_error(
                e,
                format!(
                    "library element '{}' in folder {} of this kind",
                    new.name, new.folder_id
                ),
                "create library element",
            )
        })?;

        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit insert: {e}")))?;

        let element = LibraryElement {
            id,
            org_id: new.org_id,
            folder_id: new.folder_id,
            uid,
            name: new.name,
            kind: new.kind,
            element_type: new.element_type,
            description: new.description,
            model: new.model,
            created: now,
            created_by: new.created_by,
            updated: now,
            updated_by: new.created_by,
            version: 1,
        };
        debug!(uid = %element.uid, id = element.id, "created library element");
        Ok(element)
    }

    pub fn get_element(&self, org_id: i64, uid: &str) -> Result<Option<LibraryElement>> {
        let conn = self.connection()?;
        find_by_uid(&conn, org_id, uid)
    }

    pub fn get_element_by_id(&self, id: i64) -> Result<Option<LibraryElement>> {
        let conn = self.connection()?;
        find_by_id(&conn, id)
    }

    pub fn list_elements(&self, org_id: i64, filter: ElementFilter) -> Result<Vec<LibraryElement>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ELEMENT_COLUMNS} FROM library_element
                 WHERE org_id = ?1
                   AND (?2 IS NULL OR folder_id = ?2)
                   AND (?3 IS NULL OR kind = ?3)
                 ORDER BY name ASC, id ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![org_id, filter.folder_id, filter.kind], element_from_row)
            .map_err(|e| Error::Database(format!("failed to query library elements: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read library element row: {e}")))
    }

    /// Apply `patch` if its version matches, bumping the version by one.
    pub fn patch_element(
        &self,
        org_id: i64,
        uid: &str,
        patch: PatchLibraryElement,
        updated_by: i64,
    ) -> Result<LibraryElement> {
        let mut conn = self.connection()?;
        let tx = write_transaction(&mut conn)?;

        let mut element = find_by_uid(&tx, org_id, uid)?
            .ok_or_else(|| Error::NotFound(format!("library element {uid}")))?;
        if element.version != patch.version {
            return Err(Error::VersionMismatch {
                expected: patch.version,
                actual: element.version,
            });
        }

        if let Some(folder_id) = patch.folder_id {
            element.folder_id = folder_id;
        }
        if let Some(name) = patch.name {
            element.name = name;
        }
        if let Some(element_type) = patch.element_type {
            element.element_type = element_type;
        }
        if let Some(description) = patch.description {
            element.description = description;
        }
        if let Some(model) = patch.model {
            element.model = model;
        }
        validate_fields(
            &element.uid,
            &element.name,
            &element.element_type,
            &element.description,
        )?;

        element.version += 1;
        element.updated = Utc::now();
        element.updated_by = updated_by;

        tx.execute(
            "UPDATE library_element
             SET folder_id = ?1, name = ?2, type = ?3, description = ?4, model = ?5,
                 updated = ?6, updated_by = ?7, version = ?8
             WHERE id = ?9",
            params![
                element.folder_id,
                element.name,
                element.element_type,
                element.description,
                element.model,
                element.updated,
                element.updated_by,
                element.version,
                element.id,
            ],
        )
        .map_err(|e| {
            write_error(
                e,
                format!(
                    "library element '{}' in folder {} of this kind",
                    element.name, element.folder_id
                ),
                "update library element",
            )
        })?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit update: {e}")))?;

        debug!(uid = %element.uid, version = element.version, "patched library element");
        Ok(element)
    }

    /// Delete an element. Refused while any document is still connected.
    pub fn delete_element(&self, org_id: i64, uid: &str) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = write_transaction(&mut conn)?;

        let element = find_by_uid(&tx, org_id, uid)?
            .ok_or_else(|| Error::NotFound(format!("library element {uid}")))?;
        let connections = count_connections(&tx, element.id)?;
        if connections > 0 {
            return Err(Error::Conflict(format!(
                "library element {uid} is used by {connections} connection(s)"
            )));
        }

        tx.execute(
            "DELETE FROM library_element WHERE id = ?1",
            params![element.id],
        )
        .map_err(|e| Error::Database(format!("failed to delete library element: {e}")))?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit delete: {e}")))?;

        debug!(uid, "deleted library element");
        Ok(())
    }

    /// Record that `connection_id` (interpreted by `kind`) uses the element.
    pub fn connect_element(
        &self,
        element_id: i64,
        kind: ConnectionKind,
        connection_id: i64,
        created_by: i64,
    ) -> Result<LibraryElementConnection> {
        let mut conn = self.connection()?;
        let tx = write_transaction(&mut conn)?;
        if find_by_id(&tx, element_id)?.is_none() {
            return Err(Error::NotFound(format!("library element {element_id}")));
        }

        let now = Utc::now();
        tx.execute(
            "INSERT INTO library_element_connection
                (library_element_id, connection_kind, connection_id, created, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![element_id, kind, connection_id, now, created_by],
        )
        .map_err(|e| {
            write_error(
                e,
                format!("connection of element {element_id} to {kind:?} {connection_id}"),
                "connect library element",
            )
        })?;
        let id = tx.last_insert_rowid();
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit connection: {e}")))?;

        Ok(LibraryElementConnection {
            id,
            library_element_id: element_id,
            connection_kind: kind,
            connection_id,
            created: now,
            created_by,
        })
    }

    /// Remove one link. The element itself is left untouched.
    pub fn disconnect_element(
        &self,
        element_id: i64,
        kind: ConnectionKind,
        connection_id: i64,
    ) -> Result<()> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                "DELETE FROM library_element_connection
                 WHERE library_element_id = ?1 AND connection_kind = ?2 AND connection_id = ?3",
                params![element_id, kind, connection_id],
            )
            .map_err(|e| Error::Database(format!("failed to disconnect library element: {e}")))?;
        if removed == 0 {
            return Err(Error::NotFound(format!(
                "connection of element {element_id} to {kind:?} {connection_id}"
            )));
        }
        Ok(())
    }

    /// Remove every link held by a consumer, e.g. when a dashboard is deleted.
    pub fn disconnect_consumer(&self, kind: ConnectionKind, connection_id: i64) -> Result<usize> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                "DELETE FROM library_element_connection
                 WHERE connection_kind = ?1 AND connection_id = ?2",
                params![kind, connection_id],
            )
            .map_err(|e| Error::Database(format!("failed to disconnect consumer: {e}")))?;
        debug!(?kind, connection_id, removed, "disconnected consumer");
        Ok(removed)
    }

    pub fn list_connections(&self, element_id: i64) -> Result<Vec<LibraryElementConnection>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONNECTION_COLUMNS} FROM library_element_connection
                 WHERE library_element_id = ?1
                 ORDER BY id ASC"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![element_id], |row| {
                Ok(LibraryElementConnection {
                    id: row.get(0)?,
                    library_element_id: row.get(1)?,
                    connection_kind: row.get(2)?,
                    connection_id: row.get(3)?,
                    created: row.get(4)?,
                    created_by: row.get(5)?,
                })
            })
            .map_err(|e| Error::Database(format!("failed to query connections: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read connection row: {e}")))
    }

    pub fn connection_count(&self, element_id: i64) -> Result<usize> {
        let conn = self.connection()?;
        count_connections(&conn, element_id)
    }
}

/// Check-then-write paths take the database write lock up front, so a
/// second process cannot interleave between the check and the write.
fn write_transaction(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))
}

fn generate_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

fn find_by_uid(conn: &Connection, org_id: i64, uid: &str) -> Result<Option<LibraryElement>> {
    conn.query_row(
        &format!("SELECT {ELEMENT_COLUMNS} FROM library_element WHERE org_id = ?1 AND uid = ?2"),
        params![org_id, uid],
        element_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to get library element: {e}")))
}

fn find_by_id(conn: &Connection, id: i64) -> Result<Option<LibraryElement>> {
    conn.query_row(
        &format!("SELECT {ELEMENT_COLUMNS} FROM library_element WHERE id = ?1"),
        params![id],
        element_from_row,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to get library element: {e}")))
}

fn count_connections(conn: &Connection, element_id: i64) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM library_element_connection WHERE library_element_id = ?1",
            params![element_id],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to count connections: {e}")))?;
    Ok(count as usize)
}

fn element_from_row(row: &Row<'_>) -> rusqlite::Result<LibraryElement> {
    Ok(LibraryElement {
        id: row.get(0)?,
        org_id: row.get(1)?,
        folder_id: row.get(2)?,
        uid: row.get(3)?,
        name: row.get(4)?,
        kind: row.get(5)?,
        element_type: row.get(6)?,
        description: row.get(7)?,
        model: row.get(8)?,
        created: row.get(9)?,
        created_by: row.get(10)?,
        updated: row.get(11)?,
        updated_by: row.get(12)?,
        version: row.get(13)?,
    })
}

/// Map a write failure, turning unique-index violations into `Duplicate`.
fn write_error(e: rusqlite::Error, duplicate: String, action: &str) -> Error {
    if is_unique_violation(&e) {
        Error::Duplicate(duplicate)
    } else {
        Error::Database(format!("failed to {action}: {e}"))
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.extended_code,
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        ),
        _ => false,
    }
}
