use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use signal_hook::SigId;
#[cfg(unix)]
use signal_hook::consts::signal::{SIGINT, SIGTERM};
#[cfg(unix)]
use signal_hook::flag;
#[cfg(unix)]
use signal_hook::low_level::unregister;

/// Exit status used when a second signal arrives while draining.
pub const FORCED_EXIT_CODE: i32 = 1;

/// SIGINT/SIGTERM latch. The first signal sets the flag; a second one while
/// the flag is already set terminates the process.
pub struct ShutdownHooks {
    triggered: Arc<AtomicBool>,
    #[cfg(unix)]
    sig_ids: Vec<SigId>,
}

impl ShutdownHooks {
    pub fn install() -> io::Result<Self> {
        let triggered = Arc::new(AtomicBool::new(false));

        #[cfg(unix)]
        {
            let mut sig_ids = Vec::with_capacity(4);
            for signal in [SIGINT, SIGTERM] {
                // Order matters: the conditional exit must see the flag as it
                // was before this delivery set it.
                sig_ids.push(flag::register_conditional_shutdown(
                    signal,
                    FORCED_EXIT_CODE,
                    Arc::clone(&triggered),
                )?);
                sig_ids.push(flag::register(signal, Arc::clone(&triggered))?);
            }
            return Ok(Self { triggered, sig_ids });
        }

        #[cfg(not(unix))]
        {
            Ok(Self { triggered })
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Sets the latch without a signal.
    #[cfg(test)]
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Blocks the calling thread until the latch is set.
    pub fn wait(&self, poll_interval: Duration) {
        while !self.is_triggered() {
            thread::sleep(poll_interval);
        }
    }
}

impl Drop for ShutdownHooks {
    fn drop(&mut self) {
        #[cfg(unix)]
        for id in self.sig_ids.drain(..) {
            unregister(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::ShutdownHooks;

    #[test]
    fn trigger_releases_waiter() {
        let hooks = Arc::new(ShutdownHooks::install().expect("hooks should install"));
        assert!(!hooks.is_triggered());

        let waiter = {
            let hooks = Arc::clone(&hooks);
            thread::spawn(move || hooks.wait(Duration::from_millis(5)))
        };
        hooks.trigger();
        waiter.join().expect("waiter should not panic");
        assert!(hooks.is_triggered());
    }
}
