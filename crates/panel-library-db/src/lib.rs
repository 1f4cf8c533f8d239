pub mod connection;
pub mod element_store;
pub mod migrations;
pub mod models;
pub mod schema;

pub use connection::{open_connection, open_in_memory, open_read_only};
pub use element_store::LibraryElementStore;
pub use migrations::{AppliedMigration, MigrationReport, Migrator, applied_migrations};
pub use models::{
    ConnectionKind, ElementFilter, ElementKind, LibraryElement, LibraryElementConnection,
    NewLibraryElement, PatchLibraryElement,
};
