//! Watches the process that launched the supervisor.
//!
//! When the owning process goes away there is nobody left to consume the
//! event stream, so the run is asked to stop at the next safe boundary.

use crate::context::RunContext;
use crate::events::Event;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Parent process state as seen by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentState {
    Running,
    /// Lookup succeeded and the process is not there.
    Missing,
    /// Zombie or dead.
    Defunct,
    /// The lookup itself failed.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentObservation {
    /// Our own current parent pid, when it could be read.
    pub current_parent: Option<u32>,
    pub parent: ParentState,
}

/// Reads process state. Called from the monitor task on every tick.
pub trait ProcessProbe: Send + 'static {
    fn observe(&mut self, parent_pid: u32) -> ParentObservation;
}

/// [`ProcessProbe`] backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
    self_pid: Option<Pid>,
}

impl SysinfoProbe {
    #[must_use]
    pub fn new() -> Self {
        Self { system: System::new(), self_pid: sysinfo::get_current_pid().ok() }
    }

    /// Parent pid of the current process, if the OS reports one.
    #[must_use]
    pub fn current_parent_pid() -> Option<u32> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid)?.parent().map(Pid::as_u32)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn observe(&mut self, parent_pid: u32) -> ParentObservation {
        let unknown = ParentObservation { current_parent: None, parent: ParentState::Unknown };
        let Some(self_pid) = self.self_pid else {
            return unknown;
        };
        let parent = Pid::from_u32(parent_pid);
        self.system.refresh_processes(ProcessesToUpdate::Some(&[self_pid, parent]), true);

        // Not finding ourselves means the table could not be read at all.
        let Some(me) = self.system.process(self_pid) else {
            return unknown;
        };
        let current_parent = me.parent().map(Pid::as_u32);
        let state = match self.system.process(parent) {
            None => ParentState::Missing,
            Some(p) if matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead) => ParentState::Defunct,
            Some(_) => ParentState::Running,
        };
        ParentObservation { current_parent, parent: state }
    }
}

/// Whether `pid` is the OS "no parent" sentinel.
#[must_use]
pub fn is_orphan_sentinel(pid: u32) -> bool {
    pid == 0 || (cfg!(unix) && pid == 1)
}

/// Reason to stop, or `None` while the parent is alive. Unknown states are
/// treated as alive.
#[must_use]
pub fn parent_exit_reason(parent_pid: u32, observation: &ParentObservation) -> Option<String> {
    if is_orphan_sentinel(parent_pid) {
        return Some(format!("no owning process (parent pid {parent_pid})"));
    }
    match observation.parent {
        ParentState::Missing => return Some(format!("parent process {parent_pid} no longer exists")),
        ParentState::Defunct => return Some(format!("parent process {parent_pid} is not running")),
        ParentState::Running | ParentState::Unknown => {}
    }
    match observation.current_parent {
        Some(current) if current != parent_pid => {
            Some(format!("reparented from {parent_pid} to {current}, owning process exited"))
        }
        _ => None,
    }
}

pub struct LivenessMonitor {
    parent_pid: u32,
    interval: Duration,
    ctx: RunContext,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(parent_pid: u32, interval: Duration, ctx: RunContext) -> Self {
        Self { parent_pid, interval, ctx, shutdown_tx: None, handle: None }
    }

    /// Captures the current parent pid. `None` when the OS will not say.
    #[must_use]
    pub fn for_current_process(interval: Duration, ctx: RunContext) -> Option<Self> {
        let parent_pid = SysinfoProbe::current_parent_pid()?;
        Some(Self::new(parent_pid, interval, ctx))
    }

    #[must_use]
    pub fn parent_pid(&self) -> u32 {
        self.parent_pid
    }

    pub fn start(&mut self) {
        self.start_with_probe(SysinfoProbe::new());
    }

    /// Spawns the polling loop. Must be called inside a Tokio runtime.
    pub fn start_with_probe<P: ProcessProbe>(&mut self, probe: P) {
        if self.handle.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let parent_pid = self.parent_pid;
        let interval = self.interval;
        let ctx = self.ctx.clone();
        let probe = Arc::new(Mutex::new(probe));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if ctx.should_stop() {
                            debug!("stop flag already set, liveness loop exiting");
                            break;
                        }
                        let observation = observe_blocking(Arc::clone(&probe), parent_pid).await;
                        if let Some(reason) = parent_exit_reason(parent_pid, &observation) {
                            warn!(parent_pid, %reason, "owning process gone, requesting stop");
                            ctx.stop_flag().set();
                            ctx.emit(&Event::ParentExit { parent_pid, reason });
                            break;
                        }
                    }
                }
            }
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        info!(parent_pid, interval_secs = interval.as_secs_f64(), "liveness monitor started");
    }

    /// Ends the loop if it is still running.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "liveness task ended abnormally");
            }
        }
    }
}

/// Runs one process lookup on the blocking pool. A crashed lookup reads as an
/// unknown parent, which never stops the run.
async fn observe_blocking<P: ProcessProbe>(lookup: Arc<Mutex<P>>, parent_pid: u32) -> ParentObservation {
    let polled = tokio::task::spawn_blocking(move || {
        let mut lookup = match lookup.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lookup.observe(parent_pid)
    })
    .await;
    polled.unwrap_or_else(|e| {
        warn!(error = %e, "parent process lookup failed");
        ParentObservation { current_parent: None, parent: ParentState::Unknown }
    })
}
