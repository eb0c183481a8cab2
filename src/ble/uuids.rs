//! BLE Service and Characteristic UUIDs.
//!
//! Contains the UUID constants for the two profiles the peripheral exposes.

use uuid::Uuid;

// UART Service (Nordic NUS - Nordic UART Service)
/// Nordic UART Service UUID.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX characteristic UUID (host writes to the peripheral).
pub const UART_TX_UUID: Uuid = Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX characteristic UUID (notifications from the peripheral).
pub const UART_RX_UUID: Uuid = Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e24dcca9e);

// Environmental Sensing Service (Standard BLE)
/// Standard BLE Environmental Sensing Service UUID.
pub const ENVIRONMENTAL_SENSING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_181a_0000_1000_8000_00805f9b34fb);
/// Temperature characteristic UUID (Notify, sint16 in 0.01 °C).
pub const TEMPERATURE_UUID: Uuid = Uuid::from_u128(0x0000_2a6e_0000_1000_8000_00805f9b34fb);

/// Maximum payload of a single characteristic write on this link.
pub const MAX_WRITE_LEN: usize = 20;

/// Parse a UUID from its string form, ignoring case.
pub fn parse_uuid(s: &str) -> Option<Uuid> {
    Uuid::parse_str(s.trim()).ok()
}

/// Short name of a known UUID, for log lines.
pub fn uuid_name(uuid: &Uuid) -> &'static str {
    const NAMES: [(Uuid, &str); 5] = [
        (UART_SERVICE_UUID, "uart"),
        (UART_TX_UUID, "uart-tx"),
        (UART_RX_UUID, "uart-rx"),
        (ENVIRONMENTAL_SENSING_SERVICE_UUID, "environmental-sensing"),
        (TEMPERATURE_UUID, "temperature"),
    ];

    NAMES
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}
