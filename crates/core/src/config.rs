//! Shared configuration, read with the same env-var-then-default precedence this
//! codebase already applies in its own `main.rs`.

use std::path::PathBuf;

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// `~/.osgrep` — holds the shared meta-store and per-store vector+text tables.
pub fn osgrep_home() -> PathBuf {
    dirs_home().join(".osgrep")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn meta_store_path() -> PathBuf {
    osgrep_home().join("meta.json")
}

pub fn data_dir(store_name: &str) -> PathBuf {
    osgrep_home().join("data").join(store_name)
}

/// `<projectRoot>/.osgrep` — holds the writer lock and server metadata for one repo.
pub fn project_state_dir(project_root: &std::path::Path) -> PathBuf {
    project_root.join(".osgrep")
}

pub fn default_store_name() -> String {
    std::env::var("MXBAI_STORE").unwrap_or_else(|_| "default".to_string())
}

pub fn default_port() -> u16 {
    std::env::var("OSGREP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8432)
}

pub fn worker_timeout_ms() -> u64 {
    std::env::var("OSGREP_WORKER_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(60_000)
}

pub fn profile_enabled() -> bool {
    env_flag("OSGREP_PROFILE")
}

pub fn watch_enabled() -> bool {
    env_flag("OSGREP_ENABLE_WATCH")
}

pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(4)
}
