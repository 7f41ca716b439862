//! Relational backend (sqlx)
//!
//! Runs the repository port against PostgreSQL in production and SQLite for
//! embedded use and tests, through the sqlx `Any` driver. The dialect is
//! chosen from the connection URL.
//!
//! # Example
//!
//! ```rust,no_run
//! use repokit::config::DatabaseConfig;
//! use repokit::context::Ctx;
//! use repokit::relational::RelationalRepository;
//! use repokit::repository::RepositoryPort;
//!
//! # async fn example() -> repokit::error::Result<()> {
//! let repo = RelationalRepository::connect(&DatabaseConfig::new("sqlite::memory:")).await?;
//! repo.ensure_collection(&Ctx::new(), "posts").await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod compiler;
mod dialect;
mod pool;
mod tx;

pub use adapter::RelationalRepository;
pub use dialect::Dialect;
pub use pool::create_pool;
pub use tx::RelationalTx;
