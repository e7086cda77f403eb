//! Database layer
//!
//! SQLite (default, single-file deployment) or MySQL, selected by
//! configuration. Application code only sees `DynDatabasePool`; repositories
//! branch on `driver()` and use the concrete sqlx pool.
//!
//! ```ignore
//! let pool = create_pool(&config.database).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
