//! Database schema bootstrap collaborator.
//!
//! Invoked once at worker startup. Its only contract with the rest of the
//! core is: succeeds, or the worker must not continue starting.
//!
//! The connection descriptor has the form `user:password@host[:port]`; the
//! worker's database is named `quill` and is created on first contact,
//! owned by the descriptor's user.

use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

const DB_NAME: &str = "quill";

/// Errors from the schema bootstrap.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Connection or query failure.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The descriptor's user segment cannot be used as an identifier.
    #[error("invalid database owner {0:?}")]
    InvalidOwner(String),
}

/// Ensure the `quill` database and its schema exist.
///
/// Connects to the maintenance database first, creates `quill` if missing,
/// then creates and seeds the `settings` table on a fresh database.
pub async fn ensure_schema(descriptor: &str, version: &str) -> Result<(), DatabaseError> {
    ensure_database(descriptor).await?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&connection_url(descriptor, DB_NAME))
        .await?;

    let has_settings =
        sqlx::query("select 1 from information_schema.tables where table_schema = 'public' and table_name = 'settings'")
            .fetch_optional(&pool)
            .await?;
    if has_settings.is_none() {
        sqlx::query(
            "create table public.settings (
                version varchar(20) not null,
                created timestamptz not null,
                updated timestamptz not null
            )",
        )
        .execute(&pool)
        .await?;
        sqlx::query("insert into settings (version, created, updated) values ($1, now(), now())")
            .bind(version)
            .execute(&pool)
            .await?;
        tracing::info!(database = DB_NAME, "Created schema");
    }

    pool.close().await;
    Ok(())
}

/// Create the `quill` database if the cluster does not have it yet.
async fn ensure_database(descriptor: &str) -> Result<(), DatabaseError> {
    let maintenance = PgPoolOptions::new()
        .max_connections(1)
        .connect(&connection_url(descriptor, "postgres"))
        .await?;

    let exists = sqlx::query("select datname from pg_database where datname = $1")
        .bind(DB_NAME)
        .fetch_optional(&maintenance)
        .await?;
    if exists.is_none() {
        let owner = owner_of(descriptor)?;
        // Identifiers cannot be bound as parameters.
        sqlx::query(&format!(
            "create database {DB_NAME} with owner \"{owner}\" encoding 'UTF8' connection limit -1"
        ))
        .execute(&maintenance)
        .await?;
        tracing::info!(database = DB_NAME, owner = %owner, "Created database");
    }

    maintenance.close().await;
    Ok(())
}

/// The user segment of the descriptor, defaulting to `quill`.
fn owner_of(descriptor: &str) -> Result<String, DatabaseError> {
    let owner = match descriptor.split(':').next() {
        Some(user) if !user.is_empty() && !user.contains('@') => user.to_string(),
        _ => DB_NAME.to_string(),
    };
    if owner.contains('"') {
        return Err(DatabaseError::InvalidOwner(owner));
    }
    Ok(owner)
}

fn connection_url(descriptor: &str, db: &str) -> String {
    format!("postgres://{descriptor}/{db}?sslmode=disable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_comes_from_descriptor_user() {
        assert_eq!(owner_of("alice:pw@db:5432").unwrap(), "alice");
        assert_eq!(owner_of("@db").unwrap(), "quill");
        assert_eq!(owner_of("").unwrap(), "quill");
    }

    #[test]
    fn owner_rejects_quote_injection() {
        assert!(matches!(
            owner_of("evil\":pw@db"),
            Err(DatabaseError::InvalidOwner(_))
        ));
    }

    #[test]
    fn connection_url_embeds_descriptor() {
        assert_eq!(
            connection_url("u:p@db:5432", "quill"),
            "postgres://u:p@db:5432/quill?sslmode=disable"
        );
    }
}
