//! In-process endpoints
//!
//! Lets a plugin and a gateway (or a test harness) share one process. A bound
//! name owns an accept queue; connecting hands the bound side one end of an
//! in-memory duplex pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Buffer size of each direction of an in-process pipe
const PIPE_BUFFER: usize = 64 * 1024;

static GLOBAL: LazyLock<Arc<InprocHub>> = LazyLock::new(|| Arc::new(InprocHub::new()));

/// Accept queue of a bound in-process endpoint
pub type InprocListener = mpsc::UnboundedReceiver<DuplexStream>;

#[derive(Debug)]
struct Endpoint {
    token: u64,
    accept_tx: mpsc::UnboundedSender<DuplexStream>,
}

/// Name table of bound in-process endpoints
#[derive(Debug, Default)]
pub struct InprocHub {
    endpoints: Mutex<HashMap<String, Endpoint>>,
    next_token: AtomicU64,
}

impl InprocHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide hub
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `name`, replacing any previous endpoint with that name
    ///
    /// Returns a token for [`unbind`](Self::unbind) and the accept queue.
    pub fn bind(&self, name: &str) -> (u64, InprocListener) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let previous = self
            .lock()
            .insert(name.to_string(), Endpoint { token, accept_tx });
        if previous.is_some() {
            tracing::debug!(name, "in-process endpoint rebound");
        }
        (token, accept_rx)
    }

    /// Remove `name` if it is still owned by `token`
    pub fn unbind(&self, name: &str, token: u64) {
        let mut endpoints = self.lock();
        if endpoints.get(name).is_some_and(|e| e.token == token) {
            endpoints.remove(name);
        }
    }

    /// Open a pipe to the endpoint bound at `name`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if nothing is bound at `name` or the
    /// bound side has gone away
    pub fn connect(&self, name: &str) -> Result<DuplexStream> {
        let endpoints = self.lock();
        let endpoint = endpoints
            .get(name)
            .ok_or_else(|| Error::Transport(format!("no in-process endpoint bound at '{name}'")))?;

        let (local, remote) = tokio::io::duplex(PIPE_BUFFER);
        endpoint
            .accept_tx
            .send(remote)
            .map_err(|_| Error::Transport(format!("in-process endpoint '{name}' is closed")))?;
        Ok(local)
    }

    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }
}
