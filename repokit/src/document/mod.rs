//! Document backend (SurrealDB)
//!
//! Runs the repository port against SurrealDB over any protocol the `Any`
//! engine supports, including the embedded `mem://` store used in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use repokit::config::SurrealDbConfig;
//! use repokit::context::Ctx;
//! use repokit::document::DocumentRepository;
//! use repokit::repository::RepositoryPort;
//!
//! # async fn example() -> repokit::error::Result<()> {
//! let repo = DocumentRepository::connect(&SurrealDbConfig::new("mem://")).await?;
//! repo.ensure_collection(&Ctx::new(), "posts").await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod client;
mod compiler;
mod tx;

pub use adapter::DocumentRepository;
pub use client::{create_client, SurrealClient};
pub use tx::DocumentTx;
