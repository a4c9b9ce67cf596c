pub mod library;

use serde::{Deserialize, Serialize};
use sluice_core::{ClaimConfig, IngestConfig};
use sluice_model::NodeId;

pub use library::LibraryDefinition;

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Queue settle, scan cadence and timestamp tolerance.
    pub ingest: IngestConfig,
    /// Claim selection rounds and batch size.
    pub claim: ClaimConfig,
    /// Processing nodes that may legitimately hold claims. The startup sweep
    /// releases claims held by anything else.
    pub nodes: Vec<NodeDefinition>,
    pub libraries: Vec<LibraryDefinition>,
}

impl SluiceConfig {
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8750,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres URL. Without one the server keeps files in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    /// Apply embedded migrations on startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn primary_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    pub name: String,
}
