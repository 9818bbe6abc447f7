//! Process snapshotter.
//!
//! Keeps the state of the processes running on the host. The process
//! interceptor is the only writer; every other stage only reads it through the
//! process context attached to the event.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Pid = u32;

/// Pid of the kernel idle process.
pub const IDLE_PID: Pid = 0;

/// How long parked updates and terminated pids are remembered.
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("process {0} not found")]
    ProcessNotFound(Pid),
}

/// Module mapped into the address space of a process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub base: u64,
    pub size: u64,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
    pub exe: String,
    pub comm: String,
    pub session_id: u32,
    pub sid: String,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub threads: BTreeSet<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    Create(ProcessInfo),
    Terminate { pid: Pid },
    CreateThread { pid: Pid, tid: u32 },
    TerminateThread { pid: Pid, tid: u32 },
    LoadModule { pid: Pid, module: Module },
    UnloadModule { pid: Pid, base: u64 },
}

impl TrackerUpdate {
    fn pid(&self) -> Pid {
        match self {
            TrackerUpdate::Create(info) => info.pid,
            TrackerUpdate::Terminate { pid }
            | TrackerUpdate::CreateThread { pid, .. }
            | TrackerUpdate::TerminateThread { pid, .. }
            | TrackerUpdate::LoadModule { pid, .. }
            | TrackerUpdate::UnloadModule { pid, .. } => *pid,
        }
    }
}

/// Contract of the process state store.
///
/// Implementations are shared by every consumer thread and must be safe for
/// concurrent reads and writes.
pub trait ProcessSnapshotter: Send + Sync {
    /// Applies a process lifecycle change.
    fn observe(&self, update: TrackerUpdate);

    /// Returns the process state. Unknown pids are reported as
    /// [`TrackerError::ProcessNotFound`].
    fn lookup(&self, pid: Pid) -> Result<ProcessInfo, TrackerError>;

    fn contains(&self, pid: Pid) -> bool {
        self.lookup(pid).is_ok()
    }
}

/// In-memory [`ProcessSnapshotter`].
pub struct ProcessTracker {
    inner: RwLock<TrackerState>,
}

struct TrackerState {
    /// current processes
    processes: HashMap<Pid, ProcessInfo>,
    /// thread and module updates arrived before the process was created
    pending_updates: HashMap<Pid, Vec<(Instant, TrackerUpdate)>>,
    /// exited processes whose pid wasn't reused yet
    terminated: HashMap<Pid, Instant>,
    cleanup_timeout: Duration,
    next_cleanup: Instant,
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::with_cleanup_timeout(CLEANUP_TIMEOUT)
    }

    /// Tracker expiring parked updates and terminated pids after `timeout`.
    pub fn with_cleanup_timeout(timeout: Duration) -> Self {
        let mut processes = HashMap::new();
        // Some kernel events (eg. network activity) are reported to the idle process.
        processes.insert(
            IDLE_PID,
            ProcessInfo {
                pid: IDLE_PID,
                ppid: IDLE_PID,
                name: "Idle".to_string(),
                ..Default::default()
            },
        );
        Self {
            inner: RwLock::new(TrackerState {
                processes,
                pending_updates: HashMap::new(),
                terminated: HashMap::new(),
                cleanup_timeout: timeout,
                next_cleanup: Instant::now() + timeout,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.read(|state| state.processes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pids with parked updates.
    pub fn pending(&self) -> usize {
        self.read(|state| state.pending_updates.len())
    }

    fn read<R>(&self, f: impl FnOnce(&TrackerState) -> R) -> R {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl TrackerState {
    fn observe(&mut self, update: TrackerUpdate) {
        let now = Instant::now();
        self.cleanup(now);
        self.handle_update(update, now);
    }

    fn handle_update(&mut self, update: TrackerUpdate, now: Instant) {
        let pid = update.pid();
        match update {
            TrackerUpdate::Create(info) => {
                self.processes.insert(pid, info);
                self.terminated.remove(&pid);
                if let Some(pending_updates) = self.pending_updates.remove(&pid) {
                    pending_updates
                        .into_iter()
                        .for_each(|(received, update)| self.handle_update(update, received));
                }
            }
            TrackerUpdate::Terminate { pid } => {
                if self.processes.remove(&pid).is_none() {
                    log::debug!("(terminate) Process {pid} not found in process table");
                }
                self.pending_updates.remove(&pid);
                self.terminated.insert(pid, now);
            }
            update => {
                let Some(p) = self.processes.get_mut(&pid) else {
                    if self.terminated.contains_key(&pid) {
                        // late event of an exited process, it must not leak into
                        // the next process reusing the pid
                        log::debug!("Process {pid} already exited, dropping {update:?}");
                        return;
                    }
                    // if the update arrived before the process, we save it as pending
                    log::debug!("Process {pid} not found in process table, saving for later");
                    self.pending_updates
                        .entry(pid)
                        .or_default()
                        .push((now, update));
                    return;
                };
                match update {
                    TrackerUpdate::CreateThread { tid, .. } => {
                        p.threads.insert(tid);
                    }
                    TrackerUpdate::TerminateThread { tid, .. } => {
                        p.threads.remove(&tid);
                    }
                    TrackerUpdate::LoadModule { module, .. } => {
                        if !p.modules.iter().any(|m| m.base == module.base) {
                            p.modules.push(module);
                        }
                    }
                    TrackerUpdate::UnloadModule { base, .. } => {
                        p.modules.retain(|m| m.base != base);
                    }
                    TrackerUpdate::Create(_) | TrackerUpdate::Terminate { .. } => {
                        unreachable!("handled above")
                    }
                }
            }
        }
    }

    /// Every `cleanup_timeout`, forgets the parked updates and the terminated
    /// pids older than `cleanup_timeout`.
    fn cleanup(&mut self, now: Instant) {
        if now < self.next_cleanup {
            return;
        }
        log::trace!("periodic process tracker cleanup");
        let timeout = self.cleanup_timeout;
        self.pending_updates.retain(|pid, updates| {
            updates.retain(|(received, _)| now.duration_since(*received) < timeout);
            if updates.is_empty() {
                log::trace!("dropping expired updates of process {pid}");
            }
            !updates.is_empty()
        });
        self.terminated
            .retain(|_, exited| now.duration_since(*exited) < timeout);
        self.next_cleanup = now + timeout;
    }
}

impl ProcessSnapshotter for ProcessTracker {
    fn observe(&self, update: TrackerUpdate) {
        self.write(|state| state.observe(update))
    }

    fn lookup(&self, pid: Pid) -> Result<ProcessInfo, TrackerError> {
        self.read(|state| {
            state
                .processes
                .get(&pid)
                .cloned()
                .ok_or(TrackerError::ProcessNotFound(pid))
        })
    }

    fn contains(&self, pid: Pid) -> bool {
        self.read(|state| state.processes.contains_key(&pid))
    }
}
