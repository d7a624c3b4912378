use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use safecircle_storage_sqlite::db::write_actor::spawn_writer;
use safecircle_storage_sqlite::{create_pool, init, run_migrations, KeyValueRepository};

use crate::config::ServerConfig;

pub struct AppState {
    pub kv: Arc<KeyValueRepository>,
    pub session_cookie: String,
}

/// Opens (and migrates) the SQLite store under `config.data_dir`.
pub fn build_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let db_path = init(&config.data_dir).context("Failed to initialize database")?;
    run_migrations(&db_path).context("Failed to run migrations")?;
    let pool = create_pool(&db_path).context("Failed to create connection pool")?;
    let writer = spawn_writer(pool.as_ref().clone());
    info!("[Server] Database ready at {}", db_path);

    Ok(Arc::new(AppState {
        kv: Arc::new(KeyValueRepository::new(pool, writer)),
        session_cookie: config.session_cookie.clone(),
    }))
}
