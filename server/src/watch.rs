//! Experimental watch mode, gated behind `OSGREP_ENABLE_WATCH` (§9 open question,
//! resolved in favor of reusing the Syncer rather than a bespoke incremental engine).
//! Modeled directly on this codebase's existing `watch.rs` debounce loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use osgrep_store::Store;

use crate::syncer::Syncer;

const DEBOUNCE_MS: u64 = 500;

/// Start watching `project_root` for changes. Returns the watcher handle — dropping it
/// stops the watcher.
pub fn start_watcher(
    project_root: PathBuf,
    syncer: Arc<Syncer>,
    store: Arc<Mutex<Store>>,
) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<Event>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create file watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&project_root, RecursiveMode::Recursive) {
        warn!(path = %project_root.display(), error = %e, "failed to watch project root");
        return None;
    }
    info!(path = %project_root.display(), "watching for changes");

    std::thread::spawn(move || debounce_loop(rx, syncer, store));

    Some(watcher)
}

fn debounce_loop(rx: mpsc::Receiver<Event>, syncer: Arc<Syncer>, store: Arc<Mutex<Store>>) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                );
                if relevant {
                    let now = Instant::now();
                    for path in event.paths {
                        pending.insert(path, now);
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> =
                    pending.iter().filter(|(_, t)| **t <= cutoff).map(|(p, _)| p.clone()).collect();
                if ready.is_empty() {
                    continue;
                }
                for path in &ready {
                    pending.remove(path);
                }

                let mut store = store.lock().unwrap();
                match syncer.sync_paths(&mut store, &ready) {
                    Ok(report) => {
                        if report.indexed > 0 || report.stale > 0 || report.errors > 0 {
                            info!(
                                indexed = report.indexed,
                                stale = report.stale,
                                errors = report.errors,
                                "watch resync complete"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "watch resync failed"),
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}
