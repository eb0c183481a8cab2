//! Error types for the ble-env-relay crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No peripheral with the requested address showed up during discovery.
    #[error("Device {address} not found after {timeout_ms} ms of discovery")]
    DeviceNotFound {
        /// The address that was searched for.
        address: String,
        /// How long discovery ran before giving up.
        timeout_ms: u64,
    },

    /// Failed to establish a connection to the peripheral.
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed {
        /// The peripheral address.
        address: String,
        /// Description of why the connection failed.
        reason: String,
    },

    /// A required service or characteristic is absent on the peripheral.
    #[error("Protocol mismatch: characteristic {characteristic} of service {service} not found")]
    ProtocolMismatch {
        /// The service UUID that was required.
        service: String,
        /// The characteristic UUID that was required.
        characteristic: String,
    },

    /// The session owning a binding has been closed.
    #[error("Session closed: {operation} on {uuid} after disconnect")]
    SessionClosed {
        /// The operation that was attempted.
        operation: &'static str,
        /// The characteristic involved.
        uuid: String,
    },

    /// A payload exceeded the per-write limit of the link.
    #[error("Payload of {len} bytes exceeds the {max}-byte limit of {uuid}")]
    PayloadTooLarge {
        /// The characteristic that was written.
        uuid: String,
        /// The rejected payload length.
        len: usize,
        /// The maximum payload length.
        max: usize,
    },

    /// Writing a characteristic failed.
    #[error("Write to {uuid} failed: {reason}")]
    Write {
        /// The characteristic that was written.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Reading a characteristic failed.
    #[error("Read of {uuid} failed: {reason}")]
    Read {
        /// The characteristic that was read.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Subscribing to a characteristic failed.
    #[error("Subscribe to {uuid} failed: {reason}")]
    Subscribe {
        /// The characteristic that was subscribed to.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// A binding already has an active subscription.
    #[error("Characteristic {uuid} already has an active subscription")]
    AlreadySubscribed {
        /// The characteristic UUID.
        uuid: String,
    },

    /// A sampling interval outside the accepted range was received.
    #[error("Invalid interval {value}: expected an integer between 1 and 10 seconds")]
    InvalidInterval {
        /// The rejected value, as received.
        value: String,
    },

    /// A notification payload could not be decoded.
    #[error("Decode error on {source_name}: {context}")]
    Decode {
        /// Where the payload came from (characteristic UUID or store key).
        source_name: String,
        /// Description of what was wrong with the data.
        context: String,
    },

    /// A bounded operation did not complete in time.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The value store rejected an operation.
    #[error("Value store error on key {key}: {reason}")]
    Store {
        /// The key involved.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// A local sensor or display could not be accessed.
    #[error("Sensor error on {device}: {reason}")]
    Sensor {
        /// The device path or name.
        device: String,
        /// Description of the failure.
        reason: String,
    },

    /// A session state transition that the lifecycle does not allow.
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidState {
        /// The state the session was in.
        from: String,
        /// The state that was requested.
        to: String,
    },

    /// The requested operation is not supported by the characteristic.
    #[error("Operation not supported: {operation} on {uuid}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: &'static str,
        /// The characteristic involved.
        uuid: String,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// I/O error from the console or a sysfs device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A notification handler panicked.
    #[error("Notification handler for {uuid} panicked: {message}")]
    HandlerPanic {
        /// The characteristic whose handler panicked.
        uuid: String,
        /// The panic message, if it was a string.
        message: String,
    },
}

impl Error {
    /// Whether this error ends a session attempt.
    ///
    /// Connection and protocol errors are structural; errors from a single
    /// write, read or decode leave the session usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::BluetoothUnavailable
                | Self::DeviceNotFound { .. }
                | Self::ConnectionFailed { .. }
                | Self::ProtocolMismatch { .. }
                | Self::SessionClosed { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::ProtocolMismatch {
            service: "181a".into(),
            characteristic: "2a6e".into(),
        }
        .is_fatal());
        assert!(Error::DeviceNotFound {
            address: "64:AB:DF:6A:07:14".into(),
            timeout_ms: 10_000,
        }
        .is_fatal());
        assert!(!Error::PayloadTooLarge {
            uuid: "6e400002".into(),
            len: 21,
            max: 20,
        }
        .is_fatal());
        assert!(!Error::InvalidInterval { value: "11".into() }.is_fatal());
    }

    #[test]
    fn test_messages_name_the_uuid() {
        let err = Error::Write {
            uuid: "6e400002-b5a3-f393-e0a9-e50e24dcca9e".into(),
            reason: "timed out".into(),
        };
        assert!(err.to_string().contains("6e400002"));
    }
}
