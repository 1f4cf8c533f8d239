//! Durable shape of the library element tables.
//!
//! Migration names below are recorded in every deployed ledger. They must
//! never be renamed, reordered or removed; schema changes go into new steps
//! appended after them.

use panel_library_common::Result;
use tracing::debug;

use crate::migrations::{Column, ColumnType, Index, Migration, Migrator, Table};

pub const LIBRARY_ELEMENT_TABLE: &str = "library_element";
pub const CONNECTION_TABLE: &str = "library_element_connection";

pub const UID_MAX_LEN: usize = 40;
pub const NAME_MAX_LEN: usize = 255;
pub const TYPE_MAX_LEN: usize = 40;
pub const DESCRIPTION_MAX_LEN: usize = 255;

pub fn library_element_table() -> Table {
    Table {
        name: LIBRARY_ELEMENT_TABLE,
        columns: vec![
            Column::new("id", ColumnType::BigInt).primary_key(),
            Column::new("org_id", ColumnType::BigInt),
            Column::new("folder_id", ColumnType::BigInt),
            Column::new("uid", ColumnType::NVarchar).length(UID_MAX_LEN as u32),
            Column::new("name", ColumnType::NVarchar).length(NAME_MAX_LEN as u32),
            Column::new("kind", ColumnType::BigInt),
            Column::new("type", ColumnType::NVarchar).length(TYPE_MAX_LEN as u32),
            Column::new("description", ColumnType::NVarchar).length(DESCRIPTION_MAX_LEN as u32),
            Column::new("model", ColumnType::Text),
            Column::new("created", ColumnType::DateTime),
            Column::new("created_by", ColumnType::BigInt),
            Column::new("updated", ColumnType::DateTime),
            Column::new("updated_by", ColumnType::BigInt),
            Column::new("version", ColumnType::BigInt),
        ],
        indices: vec![library_element_index()],
    }
}

fn library_element_index() -> Index {
    Index::unique(&["org_id", "folder_id", "name", "kind"])
}

pub fn library_element_connection_table() -> Table {
    Table {
        name: CONNECTION_TABLE,
        columns: vec![
            Column::new("id", ColumnType::BigInt).primary_key(),
            Column::new("library_element_id", ColumnType::BigInt),
            Column::new("connection_kind", ColumnType::BigInt),
            Column::new("connection_id", ColumnType::BigInt),
            Column::new("created", ColumnType::DateTime),
            Column::new("created_by", ColumnType::BigInt),
        ],
        indices: vec![connection_index()],
    }
}

fn connection_index() -> Index {
    Index::unique(&["library_element_id", "connection_kind", "connection_id"])
}

/// Register the library element migrations. Does nothing when the panel
/// library is disabled.
pub fn add_migrations(mg: &mut Migrator, enabled: bool) -> Result<()> {
    if !enabled {
        debug!("panel library disabled, not registering schema migrations");
        return Ok(());
    }

    let elements = library_element_table();
    mg.add_migration(
        "create library_element table v1",
        Migration::add_table(&elements),
    )?;
    mg.add_migration(
        "add index library_element org_id & folder_id & name & kind",
        Migration::add_index(&elements, &library_element_index()),
    )?;

    let connections = library_element_connection_table();
    mg.add_migration(
        "create library_element_connection table v1",
        Migration::add_table(&connections),
    )?;
    mg.add_migration(
        "add index library_element_connection library_element_id & connection_kind & connection_id",
        Migration::add_index(&connections, &connection_index()),
    )?;

    Ok(())
}

/// A migrator carrying every step this crate contributes.
pub fn migrator(enabled: bool) -> Result<Migrator> {
    let mut mg = Migrator::new();
    add_migrations(&mut mg, enabled)?;
    Ok(mg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_four_steps_in_fixed_order() {
        let mg = migrator(true).unwrap();
        let ids: Vec<_> = mg.steps().iter().map(|s| s.id()).collect();
        assert_eq!(
            ids,
            vec![
                "create library_element table v1",
                "add index library_element org_id & folder_id & name & kind",
                "create library_element_connection table v1",
                "add index library_element_connection library_element_id & connection_kind & connection_id",
            ]
        );
    }

    #[test]
    fn disabled_registers_nothing() {
        let mg = migrator(false).unwrap();
        assert!(mg.is_empty());
    }

    #[test]
    fn contributing_twice_to_one_migrator_is_rejected() {
        let mut mg = Migrator::new();
        add_migrations(&mut mg, true).unwrap();
        assert!(add_migrations(&mut mg, true).is_err());
    }

    #[test]
    fn element_index_ddl() {
        let mg = migrator(true).unwrap();
        assert_eq!(
            mg.steps()[1].migration().sql(),
            "CREATE UNIQUE INDEX \"UQE_library_element_org_id_folder_id_name_kind\" \
             ON \"library_element\" (\"org_id\", \"folder_id\", \"name\", \"kind\")"
        );
    }
}
