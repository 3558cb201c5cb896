use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide cooperative shutdown signal.
///
/// Every blocking or delaying operation inside the runtime waits
/// *against* this token rather than sleeping blindly, so a shutdown
/// request propagates promptly without forced thread termination.
///
/// Cheap to clone; clones observe the same signal.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                triggered: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Signal shutdown. Wakes every waiter; idempotent.
    pub fn trigger(&self) {
        let mut triggered = self.inner.triggered.lock();
        if !*triggered {
            *triggered = true;
            self.inner.condvar.notify_all();
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Interruptible sleep: returns `true` if shutdown fired before the
    /// timeout elapsed, `false` on a full wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut triggered = self.inner.triggered.lock();
        if *triggered {
            return true;
        }
        self.inner
            .condvar
            .wait_for(&mut triggered, timeout);
        *triggered
    }

    /// Route Ctrl-C to this token. Returns an error if a handler is
    /// already installed for the process.
    pub fn install_ctrlc_handler(&self) -> crate::error::FurrowResult<()> {
        use colored::Colorize;
        let token = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("{}", "\nCtrl+C received! Shutting down FURROW runtime...".red());
            token.trigger();
        })
        .map_err(|e| crate::error::FurrowError::internal(format!("ctrlc handler: {e}")))
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
