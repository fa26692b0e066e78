//! Fleet of isolated inference subprocesses with FIFO dispatch, crash recovery, and
//! memory-pressure-triggered recycling.
//!
//! The pool itself is synchronous/thread-based — one supervisor thread per worker
//! process — matching this codebase's existing preference for plain `std::thread`
//! worker groups (see the semantic-index builder's `std::thread::scope` pattern) rather
//! than pulling the async runtime into CPU-bound model-inference plumbing. The async
//! HTTP layer talks to the pool through a bounded channel and a oneshot reply so it never
//! blocks on subprocess I/O.
//!
//! Each worker's stdout is read on its own dedicated thread, which pushes completed
//! response lines back to the supervisor over the same channel it receives task
//! submissions on. The supervisor's own loop therefore never performs a blocking read
//! against any one worker — a hung worker's stdout simply produces no `WorkerOutput`
//! messages, and the supervisor keeps ticking every 250ms to run `check_timeouts`,
//! `check_memory_pressure`, and task dispatch for every other worker regardless.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::protocol::{Method, Request, Response};

/// Default memory-pressure threshold (§4.3).
pub const DEFAULT_RSS_THRESHOLD_BYTES: u64 = 1_500 * 1024 * 1024;

pub struct PoolConfig {
    pub worker_count: usize,
    pub worker_binary: PathBuf,
    pub model_dir: PathBuf,
    pub timeout: Duration,
    pub rss_threshold_bytes: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: osgrep_core::config::default_worker_count(),
            worker_binary: PathBuf::from("osgrep-worker"),
            model_dir: PathBuf::from("./models"),
            timeout: Duration::from_millis(osgrep_core::config::worker_timeout_ms()),
            rss_threshold_bytes: DEFAULT_RSS_THRESHOLD_BYTES,
        }
    }
}

/// Structured task failure, matchable by kind rather than message text.
#[derive(Debug)]
pub enum PoolError {
    /// The worker process assigned to this task exited before replying.
    Crashed { worker_id: u32 },
    /// The task's own deadline elapsed; the worker is presumed stuck and is killed.
    TimedOut { worker_id: u32, timeout_ms: u64 },
    Other(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Crashed { worker_id } => write!(f, "worker {worker_id} crashed"),
            PoolError::TimedOut { worker_id, timeout_ms } => {
                write!(f, "worker {worker_id} timed out after {timeout_ms}ms")
            }
            PoolError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

pub struct Task {
    pub method: Method,
    pub payload: serde_json::Value,
    pub reply: mpsc::Sender<Result<serde_json::Value, PoolError>>,
}

struct WorkerHandle {
    id: u32,
    child: Child,
    stdin: std::process::ChildStdin,
    draining: bool,
}

impl WorkerHandle {
    fn spawn(
        id: u32,
        idx: usize,
        cfg: &PoolConfig,
        tx: mpsc::Sender<SupervisorMsg>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(&cfg.worker_binary)
            .env("OSGREP_MODEL_DIR", &cfg.model_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                warn!(worker_id = id, "{line}");
            }
        });

        // Dedicated reader thread per worker: a slow or hung worker's stdout only ever
        // blocks this thread, never the supervisor loop.
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(Result::ok) {
                if tx.send(SupervisorMsg::WorkerOutput { worker_idx: idx, worker_id: id, line }).is_err() {
                    return;
                }
            }
            tx.send(SupervisorMsg::WorkerClosed { worker_idx: idx, worker_id: id }).ok();
        });

        Ok(Self { id, child, stdin, draining: false })
    }

    fn rss_bytes(&self) -> Option<u64> {
        read_proc_rss(self.child.id())
    }
}

#[cfg(target_os = "linux")]
fn read_proc_rss(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_proc_rss(_pid: u32) -> Option<u64> {
    None
}

/// Handle to a live pool. Dropping it does not wait for shutdown; call `destroy`
/// explicitly for a graceful, bounded-wait teardown.
pub struct WorkerPool {
    sender: mpsc::Sender<SupervisorMsg>,
    closed: Arc<Mutex<bool>>,
}

enum SupervisorMsg {
    Submit(Task),
    Shutdown(mpsc::Sender<()>),
    WorkerOutput { worker_idx: usize, worker_id: u32, line: String },
    WorkerClosed { worker_idx: usize, worker_id: u32 },
}

impl WorkerPool {
    pub fn start(cfg: PoolConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let closed = Arc::new(Mutex::new(false));
        let closed_clone = Arc::clone(&closed);
        let tx_clone = tx.clone();
        std::thread::spawn(move || supervisor_loop(cfg, rx, closed_clone, tx_clone));
        Self { sender: tx, closed }
    }

    /// Submit a task and block the calling thread until it completes or times out.
    /// Callers on an async runtime should invoke this from a `spawn_blocking` context.
    pub fn submit(&self, method: Method, payload: serde_json::Value) -> Result<serde_json::Value, PoolError> {
        if *self.closed.lock().unwrap() {
            return Err(PoolError::Other("pool is closed".to_string()));
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender
            .send(SupervisorMsg::Submit(Task { method, payload, reply: reply_tx }))
            .map_err(|_| PoolError::Other("pool supervisor is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| PoolError::Other("pool dropped the task without a reply".to_string()))?
    }

    pub fn destroy(&self, wait: Duration) {
        *self.closed.lock().unwrap() = true;
        let (tx, rx) = mpsc::channel();
        if self.sender.send(SupervisorMsg::Shutdown(tx)).is_ok() {
            rx.recv_timeout(wait).ok();
        }
    }
}

struct PendingRequest {
    request_id: u64,
    worker_idx: usize,
    worker_id: u32,
    started_at: Instant,
    reply: mpsc::Sender<Result<serde_json::Value, PoolError>>,
}

/// The supervisor owns all worker subprocesses and the FIFO queue. It runs on its own
/// thread so `submit` never blocks the caller on pool-internal bookkeeping beyond
/// waiting for its own task's reply.
fn supervisor_loop(
    cfg: PoolConfig,
    rx: mpsc::Receiver<SupervisorMsg>,
    closed: Arc<Mutex<bool>>,
    tx: mpsc::Sender<SupervisorMsg>,
) {
    let mut workers: Vec<Option<WorkerHandle>> = Vec::new();
    let mut next_id: u32 = 0;
    for _ in 0..cfg.worker_count {
        spawn_replacement(&cfg, &mut workers, &mut next_id, &tx);
    }

    let mut queue: VecDeque<Task> = VecDeque::new();
    let mut next_request_id: u64 = 0;
    let mut pending: Vec<PendingRequest> = Vec::new();

    loop {
        // Blocks up to 250ms for the next submission, shutdown request, or worker event;
        // returns on timeout regardless so housekeeping below always gets a turn.
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(SupervisorMsg::Submit(task)) => queue.push_back(task),
            Ok(SupervisorMsg::Shutdown(ack)) => {
                for slot in workers.iter_mut().flatten() {
                    slot.child.kill().ok();
                }
                ack.send(()).ok();
                return;
            }
            Ok(SupervisorMsg::WorkerOutput { worker_idx, worker_id, line }) => {
                handle_worker_output(&mut workers, &mut pending, worker_idx, worker_id, &line);
            }
            Ok(SupervisorMsg::WorkerClosed { worker_idx, worker_id }) => {
                let shutting_down = *closed.lock().unwrap();
                handle_worker_closed(
                    &cfg,
                    &mut workers,
                    &mut pending,
                    &mut next_id,
                    &tx,
                    worker_idx,
                    worker_id,
                    shutting_down,
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }

        // Assign queued tasks to idle workers, FIFO to the first idle one.
        while let Some(idx) = first_idle_worker(&workers, &pending) {
            let Some(task) = queue.pop_front() else { break };
            let Some(worker) = workers[idx].as_mut() else { continue };
            let request_id = next_request_id;
            next_request_id += 1;
            let req = Request { id: request_id, method: task.method, payload: task.payload };
            let line = serde_json::to_string(&req).unwrap();
            if writeln!(worker.stdin, "{line}").is_err() || worker.child.try_wait().ok().flatten().is_some() {
                task.reply
                    .send(Err(PoolError::Other(format!("worker {} is not accepting tasks", worker.id))))
                    .ok();
                continue;
            }
            pending.push(PendingRequest {
                request_id,
                worker_idx: idx,
                worker_id: worker.id,
                started_at: Instant::now(),
                reply: task.reply,
            });
        }

        check_timeouts(&cfg, &mut workers, &mut pending, &mut next_id, &tx);
        check_memory_pressure(&cfg, &mut workers);
        recycle_drained(&cfg, &mut workers, &pending, &mut next_id, &tx, *closed.lock().unwrap());
    }
}

fn first_idle_worker(workers: &[Option<WorkerHandle>], pending: &[PendingRequest]) -> Option<usize> {
    workers.iter().enumerate().find_map(|(idx, slot)| {
        let worker = slot.as_ref()?;
        if worker.draining {
            return None;
        }
        let busy = pending.iter().any(|p| p.worker_idx == idx);
        if busy {
            None
        } else {
            Some(idx)
        }
    })
}

/// Apply one completed response line from a worker's reader thread. Ignored if the
/// worker at `worker_idx` has since been respawned (its id no longer matches), which can
/// happen if the line raced a timeout/crash reap for the same slot.
fn handle_worker_output(
    workers: &mut [Option<WorkerHandle>],
    pending: &mut Vec<PendingRequest>,
    worker_idx: usize,
    worker_id: u32,
    line: &str,
) {
    let current_id = workers.get(worker_idx).and_then(|s| s.as_ref()).map(|w| w.id);
    if current_id != Some(worker_id) {
        return;
    }
    let Ok(resp) = serde_json::from_str::<Response>(line) else { return };
    if let Some(pos) = pending.iter().position(|p| p.request_id == resp.id) {
        let p = pending.remove(pos);
        let result = match (resp.result, resp.error) {
            (Some(v), _) => Ok(v),
            (None, Some(e)) => Err(PoolError::Other(e)),
            (None, None) => Err(PoolError::Other("worker returned an empty response".to_string())),
        };
        p.reply.send(result).ok();
    }
}

/// A worker's stdout closed — it exited, crashed, or was killed. Fail any task still
/// pending on it and respawn unless the pool is shutting down.
fn handle_worker_closed(
    cfg: &PoolConfig,
    workers: &mut [Option<WorkerHandle>],
    pending: &mut Vec<PendingRequest>,
    next_id: &mut u32,
    tx: &mpsc::Sender<SupervisorMsg>,
    worker_idx: usize,
    worker_id: u32,
    shutting_down: bool,
) {
    let current_id = workers.get(worker_idx).and_then(|s| s.as_ref()).map(|w| w.id);
    if current_id != Some(worker_id) {
        return;
    }

    let mut i = 0;
    while i < pending.len() {
        if pending[i].worker_idx == worker_idx {
            let p = pending.remove(i);
            p.reply.send(Err(PoolError::Crashed { worker_id })).ok();
        } else {
            i += 1;
        }
    }

    warn!(worker_idx, worker_id, "worker stdout closed, reaping");
    if let Some(mut worker) = workers[worker_idx].take() {
        worker.child.kill().ok();
        worker.child.wait().ok();
    }

    if shutting_down {
        return;
    }
    spawn_replacement_at(cfg, workers, worker_idx, next_id, tx);
}

fn check_timeouts(
    cfg: &PoolConfig,
    workers: &mut [Option<WorkerHandle>],
    pending: &mut Vec<PendingRequest>,
    next_id: &mut u32,
    tx: &mpsc::Sender<SupervisorMsg>,
) {
    let mut timed_out = Vec::new();
    for (i, p) in pending.iter().enumerate() {
        if p.started_at.elapsed() >= cfg.timeout {
            timed_out.push(i);
        }
    }
    for &i in timed_out.iter().rev() {
        let p = pending.remove(i);
        let timeout_ms = cfg.timeout.as_millis() as u64;
        error!(worker_idx = p.worker_idx, worker_id = p.worker_id, "task {} timed out after {timeout_ms}ms", p.request_id);
        p.reply.send(Err(PoolError::TimedOut { worker_id: p.worker_id, timeout_ms })).ok();
        if let Some(mut worker) = workers[p.worker_idx].take() {
            worker.child.kill().ok();
            worker.child.wait().ok();
        }
        spawn_replacement_at(cfg, workers, p.worker_idx, next_id, tx);
    }
}

fn check_memory_pressure(cfg: &PoolConfig, workers: &mut [Option<WorkerHandle>]) {
    for slot in workers.iter_mut() {
        if let Some(worker) = slot {
            if worker.draining {
                continue;
            }
            if let Some(rss) = worker.rss_bytes() {
                if rss >= cfg.rss_threshold_bytes {
                    info!(worker_id = worker.id, rss, "worker exceeded RSS threshold, draining");
                    worker.draining = true;
                }
            }
        }
    }
}

/// Recycle any worker marked draining once it has no in-flight task.
fn recycle_drained(
    cfg: &PoolConfig,
    workers: &mut [Option<WorkerHandle>],
    pending: &[PendingRequest],
    next_id: &mut u32,
    tx: &mpsc::Sender<SupervisorMsg>,
    shutting_down: bool,
) {
    if shutting_down {
        return;
    }
    for idx in 0..workers.len() {
        let should_recycle = workers[idx]
            .as_ref()
            .map(|w| w.draining && !pending.iter().any(|p| p.worker_idx == idx))
            .unwrap_or(false);
        if should_recycle {
            if let Some(mut worker) = workers[idx].take() {
                worker.child.kill().ok();
                worker.child.wait().ok();
            }
            spawn_replacement_at(cfg, workers, idx, next_id, tx);
        }
    }
}

fn spawn_replacement(
    cfg: &PoolConfig,
    workers: &mut Vec<Option<WorkerHandle>>,
    next_id: &mut u32,
    tx: &mpsc::Sender<SupervisorMsg>,
) {
    let id = *next_id;
    *next_id += 1;
    let idx = workers.len();
    match WorkerHandle::spawn(id, idx, cfg, tx.clone()) {
        Ok(handle) => workers.push(Some(handle)),
        Err(e) => {
            error!(error = %e, "failed to spawn worker, will retry next tick");
            workers.push(None);
        }
    }
}

fn spawn_replacement_at(
    cfg: &PoolConfig,
    workers: &mut [Option<WorkerHandle>],
    idx: usize,
    next_id: &mut u32,
    tx: &mpsc::Sender<SupervisorMsg>,
) {
    let id = *next_id;
    *next_id += 1;
    match WorkerHandle::spawn(id, idx, cfg, tx.clone()) {
        Ok(handle) => workers[idx] = Some(handle),
        Err(e) => {
            error!(error = %e, worker_idx = idx, "failed to respawn worker");
            workers[idx] = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_threshold_default_is_1_5gb() {
        assert_eq!(DEFAULT_RSS_THRESHOLD_BYTES, 1_500 * 1024 * 1024);
    }

    #[test]
    fn pool_error_display_carries_worker_id() {
        let e = PoolError::Crashed { worker_id: 3 };
        assert_eq!(e.to_string(), "worker 3 crashed");
        let e = PoolError::TimedOut { worker_id: 4, timeout_ms: 60_000 };
        assert_eq!(e.to_string(), "worker 4 timed out after 60000ms");
    }
}
