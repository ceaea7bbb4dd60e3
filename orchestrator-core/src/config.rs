use std::{
    collections::HashMap,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use anyhow::{
    Context,
    Result,
};
use log::debug;
use serde::Deserialize;

use crate::mcp::InterpreterKind;

/// Default path searched for a config file when `--config` is not given
/// (spec §6).
pub const DEFAULT_CONFIG_PATH: &str = "orchestrator.json";

/// A declared MCP server entry from the config file's `mcpServers` map (spec
/// §6).
#[derive(Debug, Clone)]
pub struct DeclaredMcpServer {
    pub name: String,
    pub script_path: PathBuf,
    pub interpreter: InterpreterKind,
    pub capabilities: Vec<String>,
}

/// A declared agent or service entry from the config file's `agents` /
/// `services` map. Pre-populates a name hint only; a peer must still connect
/// and register before it is reachable (SPEC_FULL.md A.3).
#[derive(Debug, Clone)]
pub struct DeclaredPeer {
    pub name: String,
    pub manifest: serde_json::Value,
}

/// Fully-resolved configuration, after layering defaults, config file,
/// environment, and CLI flags (spec §6, SPEC_FULL.md A.3).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent_port: u16,
    pub client_port: u16,
    pub service_port: u16,
    pub log_level: String,
    pub task_timeout: Duration,
    pub mcp_servers: Vec<DeclaredMcpServer>,
    pub agents: Vec<DeclaredPeer>,
    pub services: Vec<DeclaredPeer>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_port: 3000,
            client_port: 3001,
            service_port: 3002,
            log_level: "info".to_owned(),
            task_timeout: Duration::from_secs(30),
            mcp_servers: Vec::new(),
            agents: Vec::new(),
            services: Vec::new(),
        }
    }
}

/// CLI/environment overrides layered on top of the config file (spec §6: CLI
/// flags beat environment variables, which beat the file, which beats
/// built-in defaults).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub agent_port: Option<u16>,
    pub client_port: Option<u16>,
    pub service_port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFileMcpServer {
    path: PathBuf,
    #[serde(rename = "type")]
    interpreter: InterpreterKind,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFilePeer {
    #[serde(default)]
    manifest: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFileOrchestrator {
    #[serde(rename = "agentPort")]
    agent_port: Option<u16>,
    #[serde(rename = "clientPort")]
    client_port: Option<u16>,
    #[serde(rename = "servicePort")]
    service_port: Option<u16>,
    #[serde(rename = "logLevel")]
    log_level: Option<String>,
    #[serde(rename = "taskTimeout")]
    task_timeout_secs: Option<u64>,
}

/// The on-disk shape of `orchestrator.json` (spec §6).
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: HashMap<String, ConfigFileMcpServer>,
    #[serde(default)]
    agents: HashMap<String, ConfigFilePeer>,
    #[serde(default)]
    services: HashMap<String, ConfigFilePeer>,
    #[serde(default)]
    orchestrator: ConfigFileOrchestrator,
}

impl OrchestratorConfig {
    /// Loads configuration by layering, in increasing priority: built-in
    /// defaults, the JSON config file (missing file is not an error), the
    /// `PORT`/`CLIENT_PORT`/`SERVICE_PORT`/`LOG_LEVEL` environment variables,
    /// then `overrides` (CLI flags; spec §6).
    pub fn load(overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = Self::default();

        let config_path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if let Some(file) = Self::read_file(&config_path)? {
            config.apply_file(file)?;
        } else {
            debug!("no config file at {}; using defaults", config_path.display());
        }

        if let Ok(port) = std::env::var("PORT") {
            config.agent_port = port.parse().with_context(|| format!("PORT={port} is not a valid port"))?;
        }
        if let Ok(port) = std::env::var("CLIENT_PORT") {
            config.client_port = port
                .parse()
                .with_context(|| format!("CLIENT_PORT={port} is not a valid port"))?;
        }
        if let Ok(port) = std::env::var("SERVICE_PORT") {
            config.service_port = port
                .parse()
                .with_context(|| format!("SERVICE_PORT={port} is not a valid port"))?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(port) = overrides.agent_port {
            config.agent_port = port;
        }
        if let Some(port) = overrides.client_port {
            config.client_port = port;
        }
        if let Some(port) = overrides.service_port {
            config.service_port = port;
        }
        if let Some(level) = &overrides.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Option<ConfigFile>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                let file: ConfigFile = serde_json::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?;
                Ok(Some(file))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read config file {}", path.display())),
        }
    }

    fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(port) = file.orchestrator.agent_port {
            self.agent_port = port;
        }
        if let Some(port) = file.orchestrator.client_port {
            self.client_port = port;
        }
        if let Some(port) = file.orchestrator.service_port {
            self.service_port = port;
        }
        if let Some(level) = file.orchestrator.log_level {
            self.log_level = level;
        }
        if let Some(secs) = file.orchestrator.task_timeout_secs {
            self.task_timeout = Duration::from_secs(secs);
        }

        self.mcp_servers = file
            .mcp_servers
            .into_iter()
            .map(|(name, entry)| DeclaredMcpServer {
                name,
                script_path: entry.path,
                interpreter: entry.interpreter,
                capabilities: entry.capabilities,
            })
            .collect();
        self.agents = file
            .agents
            .into_iter()
            .map(|(name, entry)| DeclaredPeer {
                name,
                manifest: entry.manifest,
            })
            .collect();
        self.services = file
            .services
            .into_iter()
            .map(|(name, entry)| DeclaredPeer {
                name,
                manifest: entry.manifest,
            })
            .collect();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_apply_when_file_is_missing() {
        let overrides = ConfigOverrides {
            config_path: Some(PathBuf::from("/nonexistent/orchestrator.json")),
            ..Default::default()
        };
        let config = OrchestratorConfig::load(&overrides).unwrap();
        assert_eq!(config.agent_port, 3000);
        assert_eq!(config.client_port, 3001);
        assert_eq!(config.service_port, 3002);
    }

    #[test]
    fn cli_overrides_beat_file_values() {
        let mut file = tempfile_json(
            r#"{ "orchestrator": { "agentPort": 4000, "logLevel": "debug" } }"#,
        );
        let overrides = ConfigOverrides {
            config_path: Some(file.path_buf()),
            agent_port: Some(5000),
            ..Default::default()
        };
        let config = OrchestratorConfig::load(&overrides).unwrap();
        assert_eq!(config.agent_port, 5000);
        assert_eq!(config.log_level, "debug");
        file.close();
    }

    #[test]
    fn parses_declared_mcp_servers() {
        let mut file = tempfile_json(
            r#"{ "mcpServers": { "calc": { "path": "./calc.js", "type": "node" } } }"#,
        );
        let overrides = ConfigOverrides {
            config_path: Some(file.path_buf()),
            ..Default::default()
        };
        let config = OrchestratorConfig::load(&overrides).unwrap();
        assert_eq!(config.mcp_servers.len(), 1);
        assert_eq!(config.mcp_servers[0].name, "calc");
        file.close();
    }

    struct TempJsonFile {
        path: PathBuf,
    }

    impl TempJsonFile {
        fn path_buf(&self) -> PathBuf {
            self.path.clone()
        }

        fn close(self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_json(contents: &str) -> TempJsonFile {
        let path = std::env::temp_dir().join(format!("orchestrator-test-{}.json", uuid::Uuid::new_v4()));
        let mut handle = std::fs::File::create(&path).unwrap();
        handle.write_all(contents.as_bytes()).unwrap();
        TempJsonFile { path }
    }
}
