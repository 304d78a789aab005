use crate::log;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_NAME: &str = "Unnamed Game Server";

// ---------------------------------------------------------------------------
// Timings
// ---------------------------------------------------------------------------

/// Every interval the daemon waits on. Production uses `Timings::default()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Sleep between two full orchestrator passes.
    pub poll_interval: Duration,
    /// A freshly booted server is never considered idle before this elapses.
    pub boot_grace: Duration,
    /// Time players have to come back once a server starts closing.
    pub close_grace: Duration,
    /// Wait before retrying a bind on a port that is still held.
    pub bind_backoff: Duration,
    /// Wait after dropping the wake socket so the game can bind the port.
    pub drain_interval: Duration,
    /// Wait before handing a server back to OFF after a listen/accept failure.
    pub listen_failure_backoff: Duration,
    /// Longest the orchestrator waits for one connection count.
    pub count_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            boot_grace: Duration::from_secs(300),
            close_grace: Duration::from_secs(60),
            bind_backoff: Duration::from_secs(30),
            drain_interval: Duration::from_secs(30),
            listen_failure_backoff: Duration::from_secs(30),
            count_timeout: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub name: String,
    pub executable_path: String,
    pub executable_args: String,
    pub working_directory: String,
    pub port: u16,
    /// Megabytes. Not used for scheduling yet.
    pub allocated_ram: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawServerConfig {
    #[serde(rename = "SERVER_NAME")]
    name: Option<String>,
    #[serde(rename = "EXE_PATH")]
    executable_path: Option<String>,
    #[serde(rename = "EXE_ARGS")]
    executable_args: Option<String>,
    #[serde(rename = "SERVER_ROOT")]
    working_directory: Option<String>,
    #[serde(rename = "PORT")]
    port: Option<i64>,
    #[serde(rename = "MAX_RAM")]
    allocated_ram: Option<u64>,
    #[serde(flatten)]
    extra: HashMap<String, toml::Value>,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(String),
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("value {0} has not been set")]
    MissingField(&'static str),
    #[error("PORT must be between 1 and 65535, got {0}")]
    InvalidPort(i64),
    #[error("unknown field `{0}`")]
    UnknownField(String),
}

/// A parsed config plus the non-fatal problems found while reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded {
    pub config: ServerConfig,
    pub warnings: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Loaded, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Loaded, ConfigError> {
    let raw: RawServerConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    if let Some(field) = raw.extra.keys().min() {
        return Err(ConfigError::UnknownField(field.clone()));
    }

    let executable_path = raw
        .executable_path
        .ok_or(ConfigError::MissingField("EXE_PATH"))?;
    let working_directory = raw
        .working_directory
        .ok_or(ConfigError::MissingField("SERVER_ROOT"))?;
    let port = match raw.port {
        None => return Err(ConfigError::MissingField("PORT")),
        Some(p) => u16::try_from(p)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort(p))?,
    };

    let mut warnings = Vec::new();

    let name = match raw.name {
        Some(name) => name,
        None => {
            warnings.push(format!(
                "Value SERVER_NAME has not been set! Setting name to \"{DEFAULT_SERVER_NAME}\""
            ));
            DEFAULT_SERVER_NAME.to_string()
        }
    };

    let executable_args = raw.executable_args.unwrap_or_else(|| {
        warnings.push("Value EXE_ARGS has not been set".to_string());
        String::new()
    });

    if raw.allocated_ram.is_none() {
        warnings.push(
            "Value MAX_RAM has not been set, load balancing features will not be available for this server!"
                .to_string(),
        );
    }

    Ok(Loaded {
        config: ServerConfig {
            name,
            executable_path,
            executable_args,
            working_directory,
            port,
            allocated_ram: raw.allocated_ram,
        },
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Include file
// ---------------------------------------------------------------------------

/// Config paths listed in an include file, one per line. `#` starts a comment.
pub fn parse_include(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Load every config named by the include file. Broken entries are logged and
/// skipped; only an unreadable include file or an empty result is an error.
pub fn load_servers(include: &Path) -> color_eyre::Result<Vec<ServerConfig>> {
    let content = std::fs::read_to_string(include).map_err(|e| {
        color_eyre::eyre::eyre!("cannot read include file {}: {}", include.display(), e)
    })?;

    let mut servers: Vec<ServerConfig> = Vec::new();
    let mut ports = HashSet::new();

    for path in parse_include(&content) {
        let tag = path.display().to_string();
        log::daemon(format!("Loading server file: \"{tag}\""));

        let loaded = match load_config(&path) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::daemon_error(format!("{e}"));
                log::daemon(format!("Aborted loading server file: \"{tag}\""));
                continue;
            }
        };
        for warning in &loaded.warnings {
            log::daemon_warn(warning);
        }

        let config = loaded.config;
        if !ports.insert(config.port) {
            log::daemon_warn(format!(
                "Port {} is already managed by another server, skipping \"{tag}\"",
                config.port
            ));
            continue;
        }

        log::daemon(format!(
            "Loaded server file \"{tag}\" successfully: name \"{}\", executable \"{}\", args \"{}\", root \"{}\", port {}",
            config.name,
            config.executable_path,
            config.executable_args,
            config.working_directory,
            config.port
        ));
        servers.push(config);
    }

    if servers.is_empty() {
        color_eyre::eyre::bail!("no server files were loaded");
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_valid_config_parses() {
        let input = r#"
SERVER_NAME = "Minecraft Survival"
EXE_PATH = "/usr/bin/java"
EXE_ARGS = "-Xmx4G -jar server.jar nogui"
SERVER_ROOT = "/srv/minecraft"
PORT = 25565
MAX_RAM = 4096
"#;
        let loaded = parse_config(input).unwrap();
        assert!(loaded.warnings.is_empty());
        let config = loaded.config;
        assert_eq!(config.name, "Minecraft Survival");
        assert_eq!(config.executable_path, "/usr/bin/java");
        assert_eq!(config.executable_args, "-Xmx4G -jar server.jar nogui");
        assert_eq!(config.working_directory, "/srv/minecraft");
        assert_eq!(config.port, 25565);
        assert_eq!(config.allocated_ram, Some(4096));
    }

    #[test]
    fn test_optional_fields_default_with_warnings() {
        let input = r#"
EXE_PATH = "/bin/echo"
SERVER_ROOT = "/tmp"
PORT = 9001
"#;
        let loaded = parse_config(input).unwrap();
        assert_eq!(loaded.config.name, DEFAULT_SERVER_NAME);
        assert_eq!(loaded.config.executable_args, "");
        assert_eq!(loaded.config.allocated_ram, None);
        assert_eq!(loaded.warnings.len(), 3);
        assert!(loaded.warnings[0].contains("SERVER_NAME"));
        assert!(loaded.warnings[1].contains("EXE_ARGS"));
        assert!(loaded.warnings[2].contains("MAX_RAM"));
    }

    #[test]
    fn test_missing_exe_path() {
        let input = r#"
SERVER_ROOT = "/tmp"
PORT = 9001
"#;
        assert_eq!(
            parse_config(input).unwrap_err(),
            ConfigError::MissingField("EXE_PATH")
        );
    }

    #[test]
    fn test_missing_server_root() {
        let input = r#"
EXE_PATH = "/bin/echo"
PORT = 9001
"#;
        assert_eq!(
            parse_config(input).unwrap_err(),
            ConfigError::MissingField("SERVER_ROOT")
        );
    }

    #[test]
    fn test_missing_port() {
        let input = r#"
EXE_PATH = "/bin/echo"
SERVER_ROOT = "/tmp"
"#;
        assert_eq!(
            parse_config(input).unwrap_err(),
            ConfigError::MissingField("PORT")
        );
    }

    #[test]
    fn test_port_out_of_range() {
        for bad in ["0", "-1", "70000"] {
            let input = format!("EXE_PATH = \"/bin/echo\"\nSERVER_ROOT = \"/tmp\"\nPORT = {bad}\n");
            assert!(matches!(
                parse_config(&input).unwrap_err(),
                ConfigError::InvalidPort(_)
            ));
        }
    }

    #[test]
    fn test_unknown_field_errors() {
        let input = r#"
EXE_PATH = "/bin/echo"
SERVER_ROOT = "/tmp"
PORT = 9001
MAX_PLAYERS = 20
"#;
        assert_eq!(
            parse_config(input).unwrap_err(),
            ConfigError::UnknownField("MAX_PLAYERS".to_string())
        );
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(
            parse_config("EXE_PATH = ").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_include_skips_blanks_and_comments() {
        let paths = parse_include("# servers\n/etc/a.toml\n\n  /etc/b.toml  \n#/etc/c.toml\n");
        assert_eq!(
            paths,
            vec![PathBuf::from("/etc/a.toml"), PathBuf::from("/etc/b.toml")]
        );
    }

    #[test]
    fn test_load_servers_skips_duplicate_port() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        std::fs::write(
            &a,
            "SERVER_NAME = \"a\"\nEXE_PATH = \"/bin/true\"\nSERVER_ROOT = \"/tmp\"\nPORT = 9100\n",
        )
        .unwrap();
        std::fs::write(
            &b,
            "SERVER_NAME = \"b\"\nEXE_PATH = \"/bin/true\"\nSERVER_ROOT = \"/tmp\"\nPORT = 9100\n",
        )
        .unwrap();
        let include = dir.path().join("include");
        std::fs::write(&include, format!("{}\n{}\n", a.display(), b.display())).unwrap();

        let servers = load_servers(&include).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "a");
    }

    #[test]
    fn test_load_servers_unreadable_include() {
        let dir = tempdir().unwrap();
        assert!(load_servers(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_default_timings() {
        let t = Timings::default();
        assert_eq!(t.poll_interval, Duration::from_secs(2));
        assert_eq!(t.boot_grace, Duration::from_secs(300));
        assert_eq!(t.close_grace, Duration::from_secs(60));
        assert_eq!(t.bind_backoff, Duration::from_secs(30));
        assert_eq!(t.drain_interval, Duration::from_secs(30));
        assert_eq!(t.listen_failure_backoff, Duration::from_secs(30));
        assert_eq!(t.count_timeout, Duration::from_secs(5));
    }
}
