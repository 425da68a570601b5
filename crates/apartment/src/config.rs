//! Apartment configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::apartment::wait::{HostWait, DEFAULT_POLL_INTERVAL};

/// Configuration shared by the thread-backed apartments
#[derive(Clone)]
pub struct ApartmentConfig {
    /// Name given to the apartment's OS thread
    pub thread_name: String,
    /// Dispatch host messages while waiting on native handles
    pub pump_messages: bool,
    /// Upper bound of one native wait slice
    pub poll_interval: Duration,
    /// Runtime entered by the apartment thread, so tokio timers and I/O
    /// work inside callbacks
    pub runtime: Option<Handle>,
    /// Native wait primitives used by the pump-aware wait
    pub host: Option<Arc<dyn HostWait>>,
}

impl Default for ApartmentConfig {
    fn default() -> Self {
        Self {
            thread_name: "apartment".to_string(),
            pump_messages: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            runtime: Handle::try_current().ok(),
            host: None,
        }
    }
}

impl ApartmentConfig {
    /// Create a config with the given thread name
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            ..Default::default()
        }
    }

    pub fn with_pump_messages(mut self, pump: bool) -> Self {
        self.pump_messages = pump;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn without_runtime(mut self) -> Self {
        self.runtime = None;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostWait>) -> Self {
        self.host = Some(host);
        self
    }
}

impl fmt::Debug for ApartmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApartmentConfig")
            .field("thread_name", &self.thread_name)
            .field("pump_messages", &self.pump_messages)
            .field("poll_interval", &self.poll_interval)
            .field("runtime", &self.runtime.is_some())
            .field("host", &self.host.is_some())
            .finish()
    }
}
