pub mod database;
pub mod memory;
pub mod pg_store;

pub use database::{db_error, DbClient};
pub use memory::MemoryStore;
pub use pg_store::PgStore;
