//! Configuration for the call connection layer
//!
//! Configuration can be built in code with the `with_*` methods or loaded
//! from TOML:
//!
//! ```rust
//! use callkeep_core::config::CallKeepConfig;
//!
//! let config = CallKeepConfig::from_toml_str(r#"
//!     event_channel_capacity = 64
//!
//!     [notification]
//!     app_id = "com.example.phone"
//!     channel_name = "Incoming calls"
//! "#).unwrap();
//!
//! assert_eq!(config.notification.channel_id(), "com.example.phone.callkeep.callnew");
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::connection::VIDEO_STATE_AUDIO_ONLY;
use crate::error::{CallKeepError, Result};
use crate::logging::{LoggingConfig, parse_log_level};

/// Suffix appended to the application id to form the incoming-call channel id
pub const INCOMING_CHANNEL_SUFFIX: &str = ".callkeep.callnew";

/// Settings for the incoming-call alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Application package id the notification channel is namespaced under
    pub app_id: String,
    /// User-visible name of the notification channel
    pub channel_name: String,
    /// Raise a full-screen alert over the lock screen
    pub full_screen: bool,
    /// Keep ringing until the alert is dismissed
    pub insistent: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            app_id: "io.callkeep".to_string(),
            channel_name: "Incoming calls".to_string(),
            full_screen: true,
            insistent: true,
        }
    }
}

impl NotificationConfig {
    pub fn channel_id(&self) -> String {
        format!("{}{}", self.app_id, INCOMING_CHANNEL_SUFFIX)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallKeepConfig {
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
    /// Capacity of the application event channel
    pub event_channel_capacity: usize,
    /// Video state used when a call is answered from the alert
    pub default_video_state: i32,
}

impl Default for CallKeepConfig {
    fn default() -> Self {
        Self {
            notification: NotificationConfig::default(),
            logging: LoggingConfig::default(),
            event_channel_capacity: 256,
            default_video_state: VIDEO_STATE_AUDIO_ONLY,
        }
    }
}

impl CallKeepConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.notification.app_id = app_id.into();
        self
    }

    pub fn with_channel_name(mut self, name: impl Into<String>) -> Self {
        self.notification.channel_name = name.into();
        self
    }

    pub fn with_full_screen(mut self, enabled: bool) -> Self {
        self.notification.full_screen = enabled;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_default_video_state(mut self, video_state: i32) -> Self {
        self.default_video_state = video_state;
        self
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| CallKeepError::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            CallKeepError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<()> {
        if self.notification.app_id.trim().is_empty() {
            return Err(CallKeepError::config("notification.app_id must not be empty"));
        }
        if self.event_channel_capacity == 0 {
            return Err(CallKeepError::config("event_channel_capacity must be greater than zero"));
        }
        parse_log_level(&self.logging.level)?;
        if self.default_video_state < 0 {
            return Err(CallKeepError::config(format!(
                "default_video_state must not be negative, got {}",
                self.default_video_state
            )));
        }
        Ok(())
    }
}
