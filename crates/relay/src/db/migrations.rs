// Embedded schema for the tables the relay reads: users, login sessions,
// chats with their members, and messages.

use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPool};
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./src/db/migrations");

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await.context("failed to apply socialnet postgres migrations")?;
    info!(migrations = MIGRATOR.iter().count(), "socialnet schema is up to date");
    Ok(())
}
