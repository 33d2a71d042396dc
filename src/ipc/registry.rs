//! Address uniqueness tracking for session channels
//!
//! At most one bound and at most one connected session endpoint may use a
//! given address at a time. The registry records claims and counts
//! conflicts. Whether a conflict is fatal is the channel's decision.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use super::address::ChannelAddress;

static GLOBAL: LazyLock<Arc<AddressRegistry>> = LazyLock::new(|| Arc::new(AddressRegistry::new()));

/// Which side of an address is being claimed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Bound,
    Connected,
}

#[derive(Debug, Default)]
struct Claims {
    bound: HashSet<ChannelAddress>,
    connected: HashSet<ChannelAddress>,
}

impl Claims {
    fn set_mut(&mut self, kind: ClaimKind) -> &mut HashSet<ChannelAddress> {
        match kind {
            ClaimKind::Bound => &mut self.bound,
            ClaimKind::Connected => &mut self.connected,
        }
    }
}

/// Registry of bound and connected session addresses
#[derive(Debug, Default)]
pub struct AddressRegistry {
    claims: Mutex<Claims>,
    conflicts: AtomicUsize,
}

impl AddressRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry, empty at process start
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    fn lock(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim an address
    ///
    /// Returns `false` and records a conflict if the address is already
    /// claimed for the same side. The existing claim is left untouched.
    pub fn claim(&self, kind: ClaimKind, address: &ChannelAddress) -> bool {
        let inserted = self.lock().set_mut(kind).insert(address.clone());
        if !inserted {
            self.conflicts.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Release a claim previously granted by [`claim`](Self::claim)
    pub fn release(&self, kind: ClaimKind, address: &ChannelAddress) {
        self.lock().set_mut(kind).remove(address);
    }

    #[must_use]
    pub fn is_bound(&self, address: &ChannelAddress) -> bool {
        self.lock().bound.contains(address)
    }

    #[must_use]
    pub fn is_connected(&self, address: &ChannelAddress) -> bool {
        self.lock().connected.contains(address)
    }

    /// Number of conflicting claims seen so far
    #[must_use]
    pub fn conflicts(&self) -> usize {
        self.conflicts.load(Ordering::Relaxed)
    }
}
