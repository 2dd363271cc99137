use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::PathBuf;

use crate::providers::catalog;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(workspace_dir: PathBuf) -> Result<DbPool> {
    std::fs::create_dir_all(&workspace_dir)?;
    let db_path = workspace_dir.join("arena.db");
    let mgr = SqliteConnectionManager::file(&db_path);
    let pool = Pool::new(mgr)?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
        catalog::seed_defaults(&conn)?;
    }
    Ok(pool)
}

/// In-memory pool with the full schema, for tests. One connection only, so
/// every checkout sees the same database.
#[cfg(test)]
pub fn memory_pool() -> DbPool {
    let mgr = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(mgr)
        .expect("failed to build in-memory pool");
    {
        let conn = pool.get().expect("failed to check out connection");
        apply_migrations(&conn).expect("failed to apply migrations");
        catalog::seed_defaults(&conn).expect("failed to seed providers");
    }
    pool
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let migrations: &[(&str, &str)] = &[
        (
            "0001_init.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0001_init.sql"
            )),
        ),
        (
            "0002_providers.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0002_providers.sql"
            )),
        ),
        (
            "0003_arena.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0003_arena.sql"
            )),
        ),
    ];

    for (name, sql) in migrations {
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration {name}"))?;
    }
    Ok(())
}
