//! Live reading decoding.
//!
//! Decodes the temperature, humidity and battery characteristic payloads.

use crate::error::{Error, Result};

/// Size of the temperature payload.
pub const TEMPERATURE_PAYLOAD_LEN: usize = 4;

/// Decode the live temperature characteristic into degrees Celsius.
///
/// Payload layout (bytes read as `i8`):
/// - Byte 0: filler
/// - Byte 1: fractional part in tenths of a degree (0-9)
/// - Byte 2: integer magnitude
/// - Byte 3: sign flag (0 = positive, anything else = negative)
///
/// # Example
///
/// ```
/// use rtemp_ble::protocol::decode_temperature;
///
/// let celsius = decode_temperature(&[0xAA, 5, 23, 0]).unwrap();
/// assert!((celsius - 23.5).abs() < 1e-9);
///
/// let celsius = decode_temperature(&[0xAA, 5, 23, 0xFF]).unwrap();
/// assert!((celsius + 23.5).abs() < 1e-9);
/// ```
pub fn decode_temperature(data: &[u8]) -> Result<f64> {
    if data.len() < TEMPERATURE_PAYLOAD_LEN {
        return Err(Error::invalid_data(format!(
            "Temperature data too short: {} bytes (need {})",
            data.len(),
            TEMPERATURE_PAYLOAD_LEN
        )));
    }

    let tenths = f64::from(data[1] as i8);
    let whole = f64::from(data[2] as i8);
    let sign = if data[3] == 0 { 1.0 } else { -1.0 };

    Ok(sign * (whole + tenths * 0.1))
}

/// Decode the live humidity characteristic into a percentage.
pub fn decode_humidity(data: &[u8]) -> Result<i32> {
    first_byte_percent(data, "Humidity")
}

/// Decode the battery level characteristic into a percentage.
pub fn decode_battery(data: &[u8]) -> Result<i32> {
    first_byte_percent(data, "Battery")
}

fn first_byte_percent(data: &[u8], what: &str) -> Result<i32> {
    data.first()
        .map(|&b| i32::from(b as i8))
        .ok_or_else(|| Error::invalid_data(format!("{what} data is empty")))
}
