//! Schema migrations, run on connect.
//!
//! Each dialect has its own migration directory since id columns differ
//! (`INTEGER PRIMARY KEY` vs `BIGSERIAL PRIMARY KEY`).

use sqlx::AnyPool;
use sqlx::migrate::Migrator;

use super::query::Dialect;
use crate::error::Result;

static SQLITE: Migrator = sqlx::migrate!("./migrations/sqlite");
static POSTGRES: Migrator = sqlx::migrate!("./migrations/postgres");

/// The embedded migrations for a dialect.
pub fn migrator(dialect: Dialect) -> &'static Migrator {
    match dialect {
        Dialect::Sqlite => &SQLITE,
        Dialect::Postgres => &POSTGRES,
    }
}

/// Apply any pending migrations.
pub async fn ensure_schema(pool: &AnyPool, dialect: Dialect) -> Result<()> {
    let migrator = migrator(dialect);
    migrator.run(pool).await?;
    log::debug!(
        "Schema up to date ({} migrations)",
        migrator.iter().count()
    );
    Ok(())
}
