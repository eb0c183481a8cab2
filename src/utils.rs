//! Small helpers shared across modules.

use std::borrow::Cow;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use ble_env_relay::celsius_to_fahrenheit;
///
/// assert!((celsius_to_fahrenheit(50.0) - 122.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Render a UART payload as text for logging.
///
/// Invalid UTF-8 is replaced, and trailing line endings or NUL padding that
/// firmware often appends are dropped.
///
/// ```
/// use ble_env_relay::utils::payload_text;
///
/// assert_eq!(payload_text(b"hello\r\n\0"), "hello");
/// assert_eq!(payload_text(&[0x68, 0xFF]), "h\u{FFFD}");
/// ```
pub fn payload_text(payload: &[u8]) -> Cow<'_, str> {
    let end = payload
        .iter()
        .rposition(|&b| !matches!(b, b'\r' | b'\n' | 0))
        .map_or(0, |i| i + 1);
    String::from_utf8_lossy(&payload[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-0.16) - 31.712).abs() < 0.001);
    }

    #[test]
    fn test_payload_text() {
        assert_eq!(payload_text(b""), "");
        assert_eq!(payload_text(b"\n\n"), "");
        assert_eq!(payload_text(b"temp ok"), "temp ok");
        assert_eq!(payload_text(b" spaced \n"), " spaced ");
    }
}
