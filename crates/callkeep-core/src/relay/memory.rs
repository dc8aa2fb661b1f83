//! In-process relay that keeps alerts in memory

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use super::{IncomingCallAlert, NotificationRelay};
use crate::error::Result;

/// Relay that records shown alerts instead of rendering them.
///
/// Useful for headless hosts and tests: showing an alert for a call that
/// already has one replaces it, and cancelling an absent alert does nothing.
#[derive(Debug, Default)]
pub struct InMemoryRelay {
    alerts: Mutex<HashMap<String, IncomingCallAlert>>,
    shown: Mutex<u64>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alert currently showing for a call
    pub fn alert(&self, call_id: &str) -> Option<IncomingCallAlert> {
        self.alerts.lock().get(call_id).cloned()
    }

    pub fn is_showing(&self, call_id: &str) -> bool {
        self.alerts.lock().contains_key(call_id)
    }

    /// Number of alerts currently showing
    pub fn active_count(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Total number of `show_incoming_call` calls
    pub fn shown_count(&self) -> u64 {
        *self.shown.lock()
    }
}

impl NotificationRelay for InMemoryRelay {
    fn show_incoming_call(&self, alert: &IncomingCallAlert) -> Result<()> {
        let replaced = self
            .alerts
            .lock()
            .insert(alert.call_id.clone(), alert.clone());
        if replaced.is_some() {
            debug!("Replaced alert for call {} (id {})", alert.call_id, alert.notification_id);
        } else {
            debug!("Showing alert for call {} (id {})", alert.call_id, alert.notification_id);
        }
        *self.shown.lock() += 1;
        Ok(())
    }

    fn cancel(&self, call_id: &str) -> Result<()> {
        if self.alerts.lock().remove(call_id).is_some() {
            debug!("Cancelled alert for call {}", call_id);
        }
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        let mut alerts = self.alerts.lock();
        debug!("Cancelling {} alerts", alerts.len());
        alerts.clear();
        Ok(())
    }
}
