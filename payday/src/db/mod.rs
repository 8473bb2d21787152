//! Connection pooling for the settlement ledger

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use tracing::info;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Sets the pragmas every ledger connection needs.
#[derive(Debug, Clone, Copy)]
struct LedgerConnectionCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for LedgerConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // The CHECK constraints and the open-run index are load-bearing;
        // foreign keys must be on for the REFERENCES clauses to mean anything.
        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        // Wait for locks instead of failing immediately; payout result
        // recording and counter bumps can interleave on the pool.
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA synchronous = NORMAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Create the connection pool for the ledger database.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(10)
        .connection_customizer(Box::new(LedgerConnectionCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")?;

    info!(database_url = %database_url, "Ledger connection pool ready");

    Ok(pool)
}
