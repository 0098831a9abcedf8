use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Config store error: {0}")]
    ConfigIo(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {server}: {message}")]
    Connection { server: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Agent error: {0}")]
    UpstreamAgent(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Schema build error: {0}")]
    Schema(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    pub fn connection(server: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            server: server.into(),
            message: message.to_string(),
        }
    }

    /// Stable identifier for the error class, exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigIo(_) => "config_io",
            Self::NotFound(_) => "not_found",
            Self::Connection { .. } => "connection",
            Self::ToolExecution { .. } => "tool_execution",
            Self::UpstreamAgent(_) => "upstream_agent",
            Self::Provider(_) => "provider",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Schema(_) => "schema",
            Self::Other(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
