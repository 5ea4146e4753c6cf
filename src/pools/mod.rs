//! Fixed-size groups of named OS threads and the three pools built on them.

pub mod acceptor;
pub mod dispatcher;
pub mod worker;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[derive(Debug)]
pub enum PoolError {
    Spawn { thread: String, source: io::Error },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { thread, source } => {
                write!(f, "failed to spawn thread '{thread}': {source}")
            }
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
        }
    }
}

#[derive(Default)]
struct LiveThreads {
    count: Mutex<usize>,
    exited: Condvar,
}

/// Marks the thread as exited when its body returns or unwinds.
struct ExitSignal {
    live: Arc<LiveThreads>,
    exited: Arc<AtomicBool>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
        let mut count = self.live.count.lock().expect("thread group lock poisoned");
        *count = count.saturating_sub(1);
        self.live.exited.notify_all();
    }
}

struct Member {
    name: String,
    exited: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub joined: Vec<String>,
    pub panicked: Vec<String>,
    /// Still running at the deadline; detached.
    pub stragglers: Vec<String>,
}

impl JoinReport {
    pub fn is_clean(&self) -> bool {
        self.panicked.is_empty() && self.stragglers.is_empty()
    }

    pub fn merge(&mut self, other: JoinReport) {
        self.joined.extend(other.joined);
        self.panicked.extend(other.panicked);
        self.stragglers.extend(other.stragglers);
    }
}

pub struct ThreadGroup {
    prefix: &'static str,
    members: Vec<Member>,
    live: Arc<LiveThreads>,
}

impl ThreadGroup {
    pub fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            members: Vec::new(),
            live: Arc::new(LiveThreads::default()),
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.prefix
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Spawns `<prefix>-<index>` running `body`.
    pub fn spawn<F>(&mut self, body: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{}", self.prefix, self.members.len());
        *self.live.count.lock().expect("thread group lock poisoned") += 1;
        let exited = Arc::new(AtomicBool::new(false));
        let signal = ExitSignal {
            live: Arc::clone(&self.live),
            exited: Arc::clone(&exited),
        };

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _signal = signal;
            body();
        });
        match spawned {
            Ok(handle) => {
                self.members.push(Member {
                    name,
                    exited,
                    handle,
                });
                Ok(())
            }
            // The closure, and with it the exit signal, was dropped on failure.
            Err(source) => Err(PoolError::Spawn {
                thread: name,
                source,
            }),
        }
    }

    /// Waits until every thread has exited or `deadline` passes, then joins
    /// the finished ones. Unfinished threads are detached and reported.
    pub fn join_within(self, deadline: Instant) -> JoinReport {
        {
            let mut count = self.live.count.lock().expect("thread group lock poisoned");
            while *count > 0 {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                count = self
                    .live
                    .exited
                    .wait_timeout(count, deadline - now)
                    .expect("thread group lock poisoned")
                    .0;
            }
        }

        let mut report = JoinReport::default();
        for member in self.members {
            if !member.exited.load(Ordering::SeqCst) {
                report.stragglers.push(member.name);
                continue;
            }
            match member.handle.join() {
                Ok(()) => report.joined.push(member.name),
                Err(_) => report.panicked.push(member.name),
            }
        }
        report
    }
}
