//! Process-wide table of live call connections
//!
//! The registry is the long-lived owner of every [`CallConnection`]. All
//! table operations go through one lock; the lock is never held while a
//! connection is being driven, so events for different calls only contend
//! for the brief lookup. Each connection sits behind its own mutex, which
//! gives every call a single total order of transitions.
//!
//! Lock order is always connection, then registry: a connection that
//! reaches DISCONNECTED removes itself while still locked, and the registry
//! checks liveness through a lock-free state mirror instead of locking the
//! connection.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::CallKeepConfig;
use crate::connection::{
    CallConnection, ConnectionEvent, ConnectionReleaser, ConnectionState, StateMirror,
    TelecomConnection, Transition, VIDEO_STATE_AUDIO_ONLY,
};
use crate::error::{CallKeepError, Result};
use crate::relay::CallController;

/// Shared handle to a registered connection
#[derive(Clone)]
pub struct ConnectionHandle {
    call_id: Arc<str>,
    connection: Arc<Mutex<CallConnection>>,
    state: StateMirror,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("call_id", &self.call_id)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    fn new(connection: CallConnection) -> Self {
        Self {
            call_id: Arc::from(connection.call_id()),
            state: connection.mirror(),
            connection: Arc::new(Mutex::new(connection)),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Current state, read without locking the connection
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Apply one event; concurrent callers are serialized per connection
    pub fn apply(&self, event: &ConnectionEvent) -> Result<Transition> {
        self.connection.lock().apply(event)
    }

    /// Inspect the connection under its lock
    pub fn with<R>(&self, f: impl FnOnce(&CallConnection) -> R) -> R {
        f(&self.connection.lock())
    }
}

/// Map from call id to the connection handling it
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<String, ConnectionHandle>>,
    default_video_state: i32,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            default_video_state: VIDEO_STATE_AUDIO_ONLY,
        })
    }

    pub fn with_config(config: &CallKeepConfig) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            default_video_state: config.default_video_state,
        })
    }

    /// Take ownership of a connection under its call id.
    ///
    /// Fails if the id is already registered or the connection is already
    /// disconnected.
    pub fn register(self: &Arc<Self>, mut connection: CallConnection) -> Result<ConnectionHandle> {
        let call_id = connection.call_id().to_string();
        if connection.state().is_terminal() {
            return Err(CallKeepError::CallTerminated {
                call_id,
                event: "register".to_string(),
            });
        }

        let owner: Weak<Self> = Arc::downgrade(self);
        let releaser: Weak<dyn ConnectionReleaser> = owner;
        connection.attach_releaser(releaser);

        let mut entries = self.entries.lock();
        if entries.contains_key(&call_id) {
            debug!("Call {} already registered", call_id);
            return Err(CallKeepError::DuplicateCall { call_id });
        }
        let handle = ConnectionHandle::new(connection);
        entries.insert(call_id.clone(), handle.clone());
        info!("Registered call {} ({} live)", call_id, entries.len());
        Ok(handle)
    }

    pub fn lookup(&self, call_id: &str) -> Option<ConnectionHandle> {
        self.entries.lock().get(call_id).cloned()
    }

    /// Remove a disconnected connection.
    ///
    /// Absent ids are a no-op so racing teardown paths can all call this.
    pub fn deinit(&self, call_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(handle) = entries.get(call_id) else {
            debug!("Call {} not registered, nothing to deinit", call_id);
            return Ok(());
        };

        let state = handle.state();
        if !state.is_terminal() {
            return Err(CallKeepError::NotTerminated {
                call_id: call_id.to_string(),
                state,
            });
        }

        entries.remove(call_id);
        info!("Deinitialized call {} ({} live)", call_id, entries.len());
        Ok(())
    }

    /// Route an event to the connection registered under `call_id`
    pub fn dispatch(&self, call_id: &str, event: &ConnectionEvent) -> Result<Transition> {
        let handle = self
            .lookup(call_id)
            .ok_or_else(|| CallKeepError::CallNotFound {
                call_id: call_id.to_string(),
            })?;
        debug!("Dispatching {} to call {}", event.name(), call_id);
        handle.apply(event)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl ConnectionReleaser for ConnectionRegistry {
    fn release(&self, call_id: &str) -> Result<()> {
        self.deinit(call_id)
    }
}

impl CallController for ConnectionRegistry {
    fn answer_incoming_call(&self, call_id: &str) -> Result<()> {
        self.dispatch(
            call_id,
            &ConnectionEvent::AnswerWithVideoState(self.default_video_state),
        )
        .map(|_| ())
    }

    fn reject_call(&self, call_id: &str) -> Result<()> {
        self.dispatch(call_id, &ConnectionEvent::Reject).map(|_| ())
    }

    fn is_live(&self, call_id: &str) -> bool {
        self.lookup(call_id)
            .is_some_and(|handle| !handle.state().is_terminal())
    }
}
