//! Application-facing call notifications
//!
//! Every state change the connection layer wants the application to know
//! about is turned into an [`AppEvent`] and pushed onto a bounded channel.
//! Emission never blocks the telephony callback that caused it: the
//! [`AppEventSink`] uses `try_send` and spills into an overflow queue when the
//! consumer falls behind. A separate task spawned by [`AppEventDispatcher`]
//! drains the [`AppEventStream`] into an [`ApplicationEventHandler`].
//!
//! ```text
//! CallConnection ──emit──► mpsc (bounded) + overflow ──► AppEventDispatcher task ──► handler
//! ```
//!
//! Events for one call are delivered in the order the transitions happened.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::record::CallAttributes;

/// Kind of notification sent to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppEventKind {
    CallAnswered,
    CallEnded,
    CallHeld,
    CallUnheld,
    CallMuted,
    CallUnmuted,
    DtmfTone,
    AudioSessionReady,
}

impl AppEventKind {
    /// Wire name of the event kind
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEventKind::CallAnswered => "CALL_ANSWERED",
            AppEventKind::CallEnded => "CALL_ENDED",
            AppEventKind::CallHeld => "CALL_HELD",
            AppEventKind::CallUnheld => "CALL_UNHELD",
            AppEventKind::CallMuted => "CALL_MUTED",
            AppEventKind::CallUnmuted => "CALL_UNMUTED",
            AppEventKind::DtmfTone => "DTMF_TONE",
            AppEventKind::AudioSessionReady => "AUDIO_SESSION_READY",
        }
    }
}

impl std::fmt::Display for AppEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification for the application layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEvent {
    pub kind: AppEventKind,
    pub call_id: String,
    /// Attribute snapshot taken when the event was emitted
    pub attributes: CallAttributes,
    pub emitted_at: DateTime<Utc>,
}

impl AppEvent {
    pub fn new(kind: AppEventKind, call_id: impl Into<String>, attributes: CallAttributes) -> Self {
        Self {
            kind,
            call_id: call_id.into(),
            attributes,
            emitted_at: Utc::now(),
        }
    }
}

type Overflow = Arc<Mutex<VecDeque<AppEvent>>>;

/// Non-blocking sender side of the application event channel.
///
/// When the bounded channel is full, events spill into an ordered overflow
/// queue shared with the [`AppEventStream`]. Nothing is dropped while the
/// stream is alive, and the channel never holds an event newer than one
/// still waiting in overflow.
#[derive(Debug, Clone)]
pub struct AppEventSink {
    tx: mpsc::Sender<AppEvent>,
    overflow: Overflow,
    spilled: Arc<AtomicU64>,
}

impl AppEventSink {
    /// Create a sink and the stream that drains it
    pub fn channel(capacity: usize) -> (Self, AppEventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let overflow = Overflow::default();
        (
            Self {
                tx,
                overflow: overflow.clone(),
                spilled: Arc::new(AtomicU64::new(0)),
            },
            AppEventStream { rx, overflow },
        )
    }

    /// Queue an event for delivery without waiting for the consumer
    pub fn emit(&self, event: AppEvent) {
        debug!("Emitting {} for call {}", event.kind, event.call_id);
        let (kind, call_id) = (event.kind, event.call_id.clone());

        let mut overflow = self.overflow.lock();
        overflow.push_back(event);
        while let Some(next) = overflow.pop_front() {
            match self.tx.try_send(next) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(next)) => {
                    overflow.push_front(next);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        "Application event channel closed, discarding {} for call {}",
                        kind, call_id
                    );
                    overflow.clear();
                    return;
                }
            }
        }

        if !overflow.is_empty() {
            self.spilled.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Application event channel full, queued {} for call {} ({} waiting)",
                kind,
                call_id,
                overflow.len()
            );
        }
    }

    /// Number of events that had to wait in overflow
    pub fn spilled(&self) -> u64 {
        self.spilled.load(Ordering::Relaxed)
    }

    /// Events currently waiting in overflow
    pub fn backlog(&self) -> usize {
        self.overflow.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the application event channel, overflow included
#[derive(Debug)]
pub struct AppEventStream {
    rx: mpsc::Receiver<AppEvent>,
    overflow: Overflow,
}

impl AppEventStream {
    /// Next event, waiting if none is queued.
    ///
    /// Returns `None` once every [`AppEventSink`] is dropped and nothing is left.
    pub async fn recv(&mut self) -> Option<AppEvent> {
        if let Ok(event) = self.try_recv() {
            return Some(event);
        }
        match self.rx.recv().await {
            Some(event) => Some(event),
            None => self.overflow.lock().pop_front(),
        }
    }

    /// Next queued event without waiting
    pub fn try_recv(&mut self) -> std::result::Result<AppEvent, mpsc::error::TryRecvError> {
        // the channel only holds events older than anything in overflow
        let mut overflow = self.overflow.lock();
        match self.rx.try_recv() {
            Ok(event) => Ok(event),
            Err(e) => overflow.pop_front().ok_or(e),
        }
    }
}

/// Consumer of application events
#[async_trait]
pub trait ApplicationEventHandler: Send + Sync {
    async fn on_event(&self, event: AppEvent);
}

/// Background task delivering queued events to a handler
pub struct AppEventDispatcher {
    handle: JoinHandle<u64>,
}

impl AppEventDispatcher {
    /// Spawn the delivery task on the current tokio runtime.
    ///
    /// The task ends once every [`AppEventSink`] clone is dropped and the
    /// channel is drained.
    pub fn spawn(
        mut rx: AppEventStream,
        handler: Arc<dyn ApplicationEventHandler>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut delivered = 0u64;
            while let Some(event) = rx.recv().await {
                handler.on_event(event).await;
                delivered += 1;
            }
            info!("Application event dispatcher stopped after {} events", delivered);
            delivered
        });
        Self { handle }
    }

    /// Wait for the dispatcher to drain and stop; returns the delivered count
    pub async fn join(self) -> u64 {
        match self.handle.await {
            Ok(delivered) => delivered,
            Err(e) => {
                warn!("Application event dispatcher task failed: {}", e);
                0
            }
        }
    }
}
