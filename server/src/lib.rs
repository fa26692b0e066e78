//! osgrep-server: Syncer, Searcher, HTTP shell, and watch mode wired together over
//! `osgrep-core`, `osgrep-store`, and `osgrep-worker`.

pub mod config;
pub mod http;
pub mod searcher;
pub mod syncer;
pub mod watch;
pub mod worker_client;

pub use config::ServerConfig;
pub use searcher::Searcher;
pub use syncer::Syncer;
pub use worker_client::WorkerClient;
