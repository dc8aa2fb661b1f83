//! # callkeep-core
//!
//! Call connection lifecycle for hosts that surface calls through the OS
//! telephony UI: incoming-call alerts, answer/reject taps, hold, mute and
//! DTMF, relayed to the application as ordered events.
//!
//! ## Components
//!
//! - [`record`]: call identity and string attributes
//! - [`connection`]: the per-call state machine (`RINGING`, `ACTIVE`,
//!   `HELD`, `DISCONNECTED`)
//! - [`registry`]: call id to connection table with serialized access
//! - [`events`]: bounded, non-blocking delivery of [`AppEvent`]s
//! - [`relay`]: the notification boundary and the alert tap receiver
//! - [`service`]: wiring for host adapters
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use callkeep_core::{CallKeepConfig, CallKeepService, ConnectionEvent, ConnectionState, InMemoryRelay};
//!
//! let relay = Arc::new(InMemoryRelay::new());
//! let (service, mut events) = CallKeepService::new(CallKeepConfig::default(), relay.clone()).unwrap();
//!
//! let call = service
//!     .report_incoming_call("c1", [("callerName", "Alice")].into_iter().collect())
//!     .unwrap();
//! assert!(relay.is_showing("c1"));
//!
//! service.dispatch("c1", ConnectionEvent::AnswerWithVideoState(0)).unwrap();
//! assert_eq!(call.state(), ConnectionState::Active);
//! assert_eq!(events.try_recv().unwrap().kind.as_str(), "CALL_ANSWERED");
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod logging;
pub mod record;
pub mod registry;
pub mod relay;
pub mod service;

pub use config::{CallKeepConfig, NotificationConfig};
pub use connection::{
    CallConnection, ConnectionEvent, ConnectionState, DisconnectCause, TelecomConnection,
    Transition,
};
pub use error::{CallKeepError, Result};
pub use events::{
    AppEvent, AppEventDispatcher, AppEventKind, AppEventSink, AppEventStream,
    ApplicationEventHandler,
};
pub use record::{CallAttributes, CallRecord};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use relay::{CallController, InMemoryRelay, NotificationRelay, UserAction, UserActionReceiver};
pub use service::CallKeepService;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
