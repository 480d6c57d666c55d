//! Connection state latches
//!
//! Boolean events set from modem status frames and awaited by callers that
//! need to know the module reset, formed a network, or is associated.

use tokio::sync::watch;

use super::types::ModemStatus;

/// A settable, clearable flag that async callers can wait on
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch is set. Returns immediately if it already is
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// Coarse module/network state
#[derive(Debug, Default)]
pub struct ConnectionState {
    /// A hardware or watchdog reset was reported
    pub reset: Latch,
    /// The coordinator formed its network
    pub coordinator_started: Latch,
    /// The module is currently part of a network
    pub associated: Latch,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a modem status notification
    pub fn apply(&self, status: ModemStatus) {
        match status {
            ModemStatus::CoordinatorStarted => {
                self.coordinator_started.set();
                self.associated.set();
            }
            ModemStatus::JoinedNetwork => self.associated.set(),
            ModemStatus::HardwareReset | ModemStatus::WatchdogTimerReset => {
                self.reset.set();
                self.coordinator_started.clear();
                self.associated.clear();
            }
            ModemStatus::Disassociated => {
                self.coordinator_started.clear();
                self.associated.clear();
            }
            _ => {}
        }
    }
}
