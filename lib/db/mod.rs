pub mod models;
pub mod schema;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_async::{
    pg::AsyncPgConnection,
    pooled_connection::{
        deadpool::{BuildError, Pool},
        AsyncDieselConnectionManager,
    },
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type PgPool = Pool<AsyncPgConnection>;

pub type MigrationError = Box<dyn std::error::Error + Send + Sync>;

pub async fn build_db_pool(db_url: &str, max_size: usize) -> Result<PgPool, BuildError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(db_url);
    Pool::builder(manager).max_size(max_size.max(1)).build()
}

/// Applies pending migrations over a short-lived blocking connection.
pub async fn run_migrations(db_url: &str) -> Result<usize, MigrationError> {
    let db_url = db_url.to_string();
    tokio::task::spawn_blocking(move || -> Result<usize, MigrationError> {
        let mut connection = PgConnection::establish(&db_url)?;
        let applied = connection.run_pending_migrations(MIGRATIONS)?;
        Ok(applied.len())
    })
    .await?
}
