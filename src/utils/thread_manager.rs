//! Lifecycle wrapper for named background threads.
//!
//! Tasks are cooperative: they receive a [`StopSignal`] and must check it (or
//! sleep through [`StopSignal::wait`]) regularly. `stop` never blocks past its
//! timeout; a task that ignores the signal is left running detached and does
//! not keep the process alive. The manager refuses to start again until that
//! detached run has exited.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Upper bound for a single uninterrupted sleep inside [`StopSignal::wait`].
pub const DEFAULT_POLL_GRANULARITY: Duration = Duration::from_secs(5);

type Closer = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct ManagedResource {
    label: String,
    closer: Closer,
}

struct Shared {
    name: String,
    stop_requested: Mutex<bool>,
    wake: Condvar,
    resources: Mutex<Vec<ManagedResource>>,
    poll_granularity: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn close_all_resources(&self) -> bool {
        let resources: Vec<ManagedResource> = lock(&self.resources).drain(..).collect();
        let mut all_closed = true;
        for resource in resources {
            if let Err(e) = (resource.closer)() {
                error!(thread = %self.name, resource = %resource.label, error = %e, "Failed to close resource");
                all_closed = false;
            }
        }
        all_closed
    }
}

/// Handle given to a running task to observe stop requests.
#[derive(Clone)]
pub struct StopSignal {
    shared: Arc<Shared>,
}

impl StopSignal {
    pub fn should_stop(&self) -> bool {
        *lock(&self.shared.stop_requested)
    }

    /// Sleeps up to `duration`, waking early on a stop request. Returns `true`
    /// when the task should stop.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut stopped = lock(&self.shared.stop_requested);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let slice = (deadline - now).min(self.shared.poll_granularity);
            stopped = self
                .shared
                .wake
                .wait_timeout(stopped, slice)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }
}

pub struct ThreadManager {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Run that outlived a `stop` timeout.
    detached: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_poll_granularity(name, DEFAULT_POLL_GRANULARITY)
    }

    pub fn with_poll_granularity(name: impl Into<String>, poll_granularity: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                stop_requested: Mutex::new(false),
                wake: Condvar::new(),
                resources: Mutex::new(Vec::new()),
                poll_granularity,
            }),
            handle: Mutex::new(None),
            detached: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawns the task. A no-op while the task is still running; an error
    /// while a detached earlier run is still alive.
    pub fn start<F>(&self, task: F) -> std::io::Result<()>
    where
        F: FnOnce(StopSignal) -> anyhow::Result<()> + Send + 'static,
    {
        let mut handle = lock(&self.handle);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!(thread = %self.shared.name, "Thread already running, start ignored");
            return Ok(());
        }

        {
            let mut detached = lock(&self.detached);
            if detached.as_ref().is_some_and(|h| !h.is_finished()) {
                warn!(thread = %self.shared.name, "Previous run still alive after stop, start refused");
                return Err(std::io::Error::other(format!(
                    "thread {} has a detached run that has not exited",
                    self.shared.name
                )));
            }
            if let Some(finished) = detached.take() {
                let _ = finished.join();
            }
        }

        *lock(&self.shared.stop_requested) = false;
        let shared = self.shared.clone();
        let signal = StopSignal {
            shared: self.shared.clone(),
        };

        let spawned = thread::Builder::new()
            .name(self.shared.name.clone())
            .spawn(move || {
                info!(thread = %shared.name, "Thread started");
                match catch_unwind(AssertUnwindSafe(|| task(signal))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(thread = %shared.name, error = ?e, "Thread exited with error"),
                    Err(_) => error!(thread = %shared.name, "Thread panicked"),
                }
                shared.close_all_resources();
                info!(thread = %shared.name, "Thread exited");
            })?;

        *handle = Some(spawned);
        Ok(())
    }

    /// Requests a stop and polls for exit every `poll_interval` until
    /// `timeout`. Returns `false` if the thread is still alive at the deadline;
    /// the thread is then detached.
    pub fn stop(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let Some(handle) = lock(&self.handle).take() else {
            info!(thread = %self.shared.name, "Thread not started, nothing to stop");
            return true;
        };

        if handle.is_finished() {
            let _ = handle.join();
            return true;
        }

        *lock(&self.shared.stop_requested) = true;
        self.shared.wake.notify_all();
        info!(thread = %self.shared.name, "Waiting for thread to exit");

        let deadline = Instant::now() + timeout;
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                info!(thread = %self.shared.name, "Thread stopped");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(poll_interval.min(deadline - now));
        }

        warn!(
            thread = %self.shared.name,
            ?timeout,
            "Thread did not stop in time, detaching it"
        );
        *lock(&self.detached) = Some(handle);
        false
    }

    pub fn is_running(&self) -> bool {
        lock(&self.handle).as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn should_stop(&self) -> bool {
        *lock(&self.shared.stop_requested)
    }

    /// Registers `resource`; `closer` runs when the task exits or on
    /// [`close_all_resources`](Self::close_all_resources).
    pub fn register_resource<R, C>(&self, label: impl Into<String>, resource: R, closer: C)
    where
        R: Send + 'static,
        C: FnOnce(R) -> anyhow::Result<()> + Send + 'static,
    {
        lock(&self.shared.resources).push(ManagedResource {
            label: label.into(),
            closer: Box::new(move || closer(resource)),
        });
    }

    /// Closes registered resources in registration order. A failing closer is
    /// logged and the rest still run.
    pub fn close_all_resources(&self) -> bool {
        self.shared.close_all_resources()
    }
}

/// Name → manager map; managers are created on first lookup.
#[derive(Default)]
pub struct ThreadRegistry {
    managers: Mutex<HashMap<String, Arc<ThreadManager>>>,
    poll_granularity: Option<Duration>,
}

impl ThreadRegistry {
    pub fn new(poll_granularity: Duration) -> Self {
        Self {
            managers: Mutex::new(HashMap::new()),
            poll_granularity: Some(poll_granularity),
        }
    }

    pub fn get(&self, name: &str) -> Arc<ThreadManager> {
        let granularity = self.poll_granularity.unwrap_or(DEFAULT_POLL_GRANULARITY);
        lock(&self.managers)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ThreadManager::with_poll_granularity(name, granularity)))
            .clone()
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.managers)
            .iter()
            .filter(|(_, m)| m.is_running())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stops every running manager; `true` only if all of them stopped.
    pub fn stop_all(&self, timeout: Duration, poll_interval: Duration) -> bool {
        let managers: Vec<Arc<ThreadManager>> = lock(&self.managers).values().cloned().collect();
        info!(count = managers.len(), "Stopping background threads");

        let mut success = true;
        for manager in managers.iter().filter(|m| m.is_running()) {
            if !manager.stop(timeout, poll_interval) {
                warn!(thread = %manager.name(), "Thread could not be stopped cleanly");
                success = false;
            }
        }
        success
    }
}
