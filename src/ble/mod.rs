//! BLE communication module.
//!
//! The session state machine talks to peripherals through the
//! [`Transport`]/[`Link`] seam. [`platform`] implements it on btleplug;
//! [`binding`] and [`notification`] give callers typed access to resolved
//! characteristics.

pub mod address;
pub mod binding;
pub mod notification;
pub mod platform;
pub mod transport;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use address::PeripheralAddress;
pub use binding::CharacteristicBinding;
pub use notification::{
    handler_fn, log_error_observer, ErrorObserver, FnHandler, NotificationChannel,
    NotificationHandler,
};
pub use platform::{BtleLink, BtleTransport};
pub use transport::{
    CharacteristicId, DiscoveredCharacteristic, DiscoveredService, Link, NotificationEvent,
    NotificationStream, Transport,
};
pub use uuids::*;
