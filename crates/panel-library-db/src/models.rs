use chrono::{DateTime, Utc};
use panel_library_common::{Error, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::schema::{DESCRIPTION_MAX_LEN, NAME_MAX_LEN, TYPE_MAX_LEN, UID_MAX_LEN};

/// Category of a library element. Stored as its integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Panel = 1,
    Variable = 2,
}

/// What kind of document consumes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Dashboard = 1,
}

impl TryFrom<i64> for ElementKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ElementKind::Panel),
            2 => Ok(ElementKind::Variable),
            other => Err(Error::InvalidInput(format!("unknown element kind {other}"))),
        }
    }
}

impl TryFrom<i64> for ConnectionKind {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            1 => Ok(ConnectionKind::Dashboard),
            other => Err(Error::InvalidInput(format!("unknown connection kind {other}"))),
        }
    }
}

impl ToSql for ElementKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for ElementKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        ElementKind::try_from(raw).map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

impl ToSql for ConnectionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for ConnectionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = i64::column_result(value)?;
        ConnectionKind::try_from(raw).map_err(|_| FromSqlError::OutOfRange(raw))
    }
}

/// A persisted library element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryElement {
    pub id: i64,
    pub org_id: i64,
    pub folder_id: i64,
    pub uid: String,
    pub name: String,
    pub kind: ElementKind,
    #[serde(rename = "type")]
    pub element_type: String,
    pub description: String,
    /// Serialized content definition, opaque to the store.
    pub model: String,
    pub created: DateTime<Utc>,
    pub created_by: i64,
    pub updated: DateTime<Utc>,
    pub updated_by: i64,
    pub version: i64,
}

/// Input for creating an element. `uid` is generated when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLibraryElement {
    pub org_id: i64,
    pub folder_id: i64,
    pub uid: Option<String>,
    pub name: String,
    pub kind: ElementKind,
    #[serde(rename = "type")]
    pub element_type: String,
    pub description: String,
    pub model: String,
    pub created_by: i64,
}

/// Partial update. `version` must match the stored version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchLibraryElement {
    pub version: i64,
    pub folder_id: Option<i64>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub element_type: Option<String>,
    pub description: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ElementFilter {
    pub folder_id: Option<i64>,
    pub kind: Option<ElementKind>,
}

/// A record that a consumer uses an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryElementConnection {
    pub id: i64,
    pub library_element_id: i64,
    pub connection_kind: ConnectionKind,
    pub connection_id: i64,
    pub created: DateTime<Utc>,
    pub created_by: i64,
}

pub(crate) fn validate_fields(
    uid: &str,
    name: &str,
    element_type: &str,
    description: &str,
) -> Result<()> {
    if uid.is_empty() {
        return Err(Error::InvalidInput("uid cannot be empty".into()));
    }
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("name cannot be empty".into()));
    }
    check_len("uid", uid, UID_MAX_LEN)?;
    check_len("name", name, NAME_MAX_LEN)?;
    check_len("type", element_type, TYPE_MAX_LEN)?;
    check_len("description", description, DESCRIPTION_MAX_LEN)
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::InvalidInput(format!("{field} exceeds {max} characters")));
    }
    Ok(())
}
