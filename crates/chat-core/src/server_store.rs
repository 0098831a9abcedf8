//! Durable registry of MCP tool servers.
//!
//! The backing file is a JSON object mapping server name to its
//! registration, e.g. `{"calc": {"url": "...", "transport": "streamable_http"}}`.
//! Entries keep the order they were registered in, and per-server keys this
//! crate does not interpret (`headers`, `timeout`, ...) survive a rewrite.
//! Writes overwrite the file in place: a crash mid-write can leave it
//! truncated, and the next `read` will then fail until the file is repaired.

use crate::error::{ChatError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Registered servers keyed by name, in registration order.
pub type ServerMap = IndexMap<String, ServerRegistration>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRegistration {
    pub url: String,
    pub transport: Transport,
    /// Keys carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerRegistration {
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport: Transport::StreamableHttp,
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "streamable_http", alias = "streamable-http")]
    StreamableHttp,
}

pub struct ServerStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl ServerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty registry file if none exists yet.
    pub async fn init_if_missing(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.map_err(|e| self.io_error(e))? {
            return Ok(());
        }
        info!("Creating empty server registry at {}", self.path.display());
        self.write(&ServerMap::new()).await
    }

    /// Read every registration. A missing or malformed file is an error.
    pub async fn read(&self) -> Result<ServerMap> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        serde_json::from_str(&contents).map_err(|e| {
            ChatError::ConfigIo(format!("{}: malformed registry: {}", self.path.display(), e))
        })
    }

    /// Overwrite the file with the given registrations.
    pub async fn write(&self, servers: &ServerMap) -> Result<()> {
        let json = serde_json::to_string_pretty(servers)?;
        tokio::fs::write(&self.path, json).await.map_err(|e| {
            warn!(
                "Writing server registry {} failed, file may be truncated: {}",
                self.path.display(),
                e
            );
            self.io_error(e)
        })
    }

    /// Register a server, replacing any existing entry with the same name.
    pub async fn add(&self, name: &str, url: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut servers = self.read().await?;
        servers.insert(name.to_string(), ServerRegistration::streamable_http(url));
        self.write(&servers).await?;
        info!(server = name, url, "Registered MCP server");
        Ok(())
    }

    /// Deregister a server. Removing an unknown name is a no-op.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut servers = self.read().await?;
        let removed = servers.shift_remove(name).is_some();
        self.write(&servers).await?;
        if removed {
            info!(server = name, "Removed MCP server");
        }
        Ok(())
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        Ok(self.read().await?.into_keys().collect())
    }

    /// Look up a single registration.
    pub async fn get(&self, name: &str) -> Result<ServerRegistration> {
        self.read()
            .await?
            .shift_remove(name)
            .ok_or_else(|| ChatError::NotFound(format!("MCP server '{}' is not registered", name)))
    }

    fn io_error(&self, e: std::io::Error) -> ChatError {
        ChatError::ConfigIo(format!("{}: {}", self.path.display(), e))
    }
}
