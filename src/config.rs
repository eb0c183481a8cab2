//! Configuration for sessions and the gateway.

use std::path::PathBuf;
use std::time::Duration;

use crate::ble::address::PeripheralAddress;
use crate::data::SamplingInterval;

/// Timeouts bounding each suspension point of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// How long discovery may run before the device counts as not found.
    pub scan_timeout: Duration,
    /// Bound on connecting plus service discovery.
    pub connect_timeout: Duration,
    /// Bound on each read, write, subscribe and disconnect.
    pub operation_timeout: Duration,
}

impl SessionConfig {
    /// Default discovery timeout (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default connect timeout (15 seconds).
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    /// Default per-operation timeout (5 seconds).
    pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

    /// Set the discovery timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-operation timeout.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            operation_timeout: Self::DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Everything the gateway needs besides its collaborators.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RelayConfig {
    /// Address of the peripheral.
    pub address: PeripheralAddress,
    /// Session timeouts.
    pub session: SessionConfig,
    /// Interval written to the store when it holds none yet.
    pub default_interval: SamplingInterval,
    /// IIO device directory of the humidity sensor, if not auto-detected.
    pub humidity_device: Option<PathBuf>,
    /// Framebuffer of the LED matrix; light control is off when unset.
    pub framebuffer: Option<PathBuf>,
}

impl RelayConfig {
    /// Config with defaults for everything but the address.
    pub fn new(address: PeripheralAddress) -> Self {
        Self {
            address,
            session: SessionConfig::default(),
            default_interval: SamplingInterval::default(),
            humidity_device: None,
            framebuffer: None,
        }
    }

    /// Set the session timeouts.
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the interval seeded into an empty store.
    pub fn with_default_interval(mut self, interval: SamplingInterval) -> Self {
        self.default_interval = interval;
        self
    }
}
