//! Server shell configuration: CLI flag > env var > default, matching this codebase's
//! existing `main.rs` precedence rules for its own flags.

use std::path::PathBuf;

use osgrep_core::config;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub project_root: PathBuf,
    pub port: u16,
    pub store_name: String,
    pub worker_count: usize,
    pub worker_timeout_ms: u64,
    pub profile: bool,
    pub enable_watch: bool,
    pub model_dir: PathBuf,
}

impl ServerConfig {
    pub fn resolve(
        project_root: PathBuf,
        port: Option<u16>,
        store_name: Option<String>,
        worker_count: Option<usize>,
        model_dir: Option<PathBuf>,
        watch: bool,
    ) -> Self {
        Self {
            project_root,
            port: port.unwrap_or_else(config::default_port),
            store_name: store_name.unwrap_or_else(config::default_store_name),
            worker_count: worker_count.unwrap_or_else(config::default_worker_count),
            worker_timeout_ms: config::worker_timeout_ms(),
            profile: config::profile_enabled(),
            enable_watch: watch || config::watch_enabled(),
            model_dir: model_dir.unwrap_or_else(|| PathBuf::from("./models")),
        }
    }

    pub fn lock_dir(&self) -> PathBuf {
        config::project_state_dir(&self.project_root)
    }

    pub fn server_json_path(&self) -> PathBuf {
        self.lock_dir().join("server.json")
    }

    pub fn data_dir(&self) -> PathBuf {
        config::osgrep_home().join("data")
    }

    pub fn meta_store_path(&self) -> PathBuf {
        config::meta_store_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_defaults() {
        let cfg = ServerConfig::resolve(PathBuf::from("/tmp/proj"), None, None, None, None, false);
        assert_eq!(cfg.port, config::default_port());
        assert_eq!(cfg.store_name, config::default_store_name());
    }

    #[test]
    fn resolve_prefers_explicit_values() {
        let cfg = ServerConfig::resolve(
            PathBuf::from("/tmp/proj"),
            Some(9000),
            Some("custom".to_string()),
            Some(2),
            None,
            true,
        );
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.store_name, "custom");
        assert_eq!(cfg.worker_count, 2);
        assert!(cfg.enable_watch);
    }
}
