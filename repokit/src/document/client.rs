//! SurrealDB connection management
//!
//! The protocol is picked at runtime from the URL scheme:
//! - `ws://` / `wss://` - WebSocket connections
//! - `http://` / `https://` - HTTP connections
//! - `mem://` - In-memory database (embedded and tests)

use std::time::Duration;

use crate::{
    config::SurrealDbConfig,
    error::{sanitize_url, DatabaseError, DatabaseOperation, Result},
};

/// SurrealDB client using the `Any` engine for runtime protocol selection
pub type SurrealClient = surrealdb::Surreal<surrealdb::engine::any::Any>;

/// Create a SurrealDB client with retry logic
///
/// Signs in as root when credentials are configured, then selects the
/// namespace and database. Attempts are retried with exponential backoff up
/// to `max_retries` times.
pub async fn create_client(config: &SurrealDbConfig) -> Result<SurrealClient> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_client(config).await {
            Ok(client) => {
                if attempt > 0 {
                    tracing::info!(
                        "SurrealDB connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "SurrealDB connected: url={}, ns={}, db={}",
                        sanitize_url(&config.url),
                        config.namespace,
                        config.database
                    );
                }
                return Ok(client);
            }
            Err(e) => {
                attempt += 1;

                if attempt > config.max_retries {
                    tracing::error!(
                        "Failed to connect to SurrealDB after {} attempts: {}",
                        config.max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay_multiplier = 2_u32.pow(attempt.saturating_sub(1));
                let delay = base_delay * delay_multiplier;

                tracing::warn!(
                    "SurrealDB connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a client (single try)
async fn try_create_client(config: &SurrealDbConfig) -> Result<SurrealClient> {
    let url_safe = sanitize_url(&config.url);
    tracing::debug!("Connecting to SurrealDB: {}", url_safe);

    let failure = |step: &str, e: surrealdb::Error| {
        let category = categorize_surrealdb_error(&e);
        let mut err = DatabaseError::from(e).add_context(format!(
            "{} during {} ({})",
            url_safe, step, category
        ));
        err.operation = DatabaseOperation::Connect;
        err
    };

    let client = surrealdb::engine::any::connect(config.url.as_str())
        .await
        .map_err(|e| failure("connect", e))?;

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        client
            .signin(surrealdb::opt::auth::Root {
                username,
                password,
            })
            .await
            .map_err(|e| failure("signin", e))?;
    }

    client
        .use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| failure("namespace selection", e))?;

    Ok(client)
}

/// Categorize a SurrealDB error for log output
fn categorize_surrealdb_error(err: &surrealdb::Error) -> &'static str {
    let err_str = err.to_string().to_lowercase();

    if err_str.contains("auth") || err_str.contains("credentials") || err_str.contains("signin") {
        "Authentication error - check your credentials"
    } else if err_str.contains("connect")
        || err_str.contains("network")
        || err_str.contains("dns")
        || err_str.contains("refused")
    {
        "Network connection error - check connectivity"
    } else if err_str.contains("permission") || err_str.contains("denied") || err_str.contains("not allowed") {
        "Permission error - check database permissions"
    } else if err_str.contains("timeout") {
        "Connection timeout - database may be overloaded"
    } else if err_str.contains("scheme") || err_str.contains("unsupported") {
        "Unsupported URL scheme - use ws://, http:// or mem://"
    } else {
        "Connection error"
    }
}
