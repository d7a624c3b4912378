use std::net::SocketAddr;

use anyhow::Context;

const LISTEN_ADDR_ENV: &str = "SAFECIRCLE_LISTEN_ADDR";
const DATA_DIR_ENV: &str = "SAFECIRCLE_DATA_DIR";
const SESSION_COOKIE_ENV: &str = "SAFECIRCLE_SESSION_COOKIE";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_SESSION_COOKIE: &str = "session";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: String,
    /// Cookie accepted as an alternative to `Authorization: Bearer`.
    pub session_cookie: String,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env_value(LISTEN_ADDR_ENV)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .with_context(|| format!("{} is not a valid socket address", LISTEN_ADDR_ENV))?;
        let data_dir = env_value(DATA_DIR_ENV)
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let session_cookie =
            env_value(SESSION_COOKIE_ENV).unwrap_or_else(|| DEFAULT_SESSION_COOKIE.to_string());

        Ok(Self {
            listen_addr,
            data_dir,
            session_cookie,
        })
    }
}
