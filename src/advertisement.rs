//! SwitchBot thermometer advertisement decoding.
//!
//! The thermometer broadcasts its readings in the manufacturer-specific data of
//! a BLE advertisement. The payload handed to [`decode`] starts with the
//! little-endian Bluetooth company identifier, followed by the vendor data:
//!
//! ```text
//! offset  0     1     2..=9   10          11                  12
//!        +-----+-----+-------+-----------+-------------------+-----------------+
//!        | 48  | 09  |  ...  | ....dddd  | s kkkkkkk         | . hhhhhhh       |
//!        | 69  |     |       | tenths    | sign, integer °C  | humidity %      |
//!        +-----+-----+-------+-----------+-------------------+-----------------+
//! ```
//!
//! A set sign bit means the temperature is at or above freezing.

use crate::mac_address::MacAddress;
use thiserror::Error;

/// Minimum payload length that carries a complete reading.
pub const MIN_PAYLOAD_LEN: usize = 13;

/// Accepted values for the first payload byte (low byte of the company id).
pub const RECOGNIZED_SUBTYPES: [u8; 2] = [0x48, 0x69];

/// Required value of the second payload byte (high byte of the company id).
pub const VENDOR_BYTE: u8 = 0x09;

const SIGN_BIT: u8 = 0b1000_0000;
const SEVEN_BITS: u8 = 0b0111_1111;
const LOW_NIBBLE: u8 = 0b0000_1111;

/// A single BLE advertisement, as delivered by a scanner backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Source address of the advertisement
    pub address: MacAddress,
    /// Received signal strength in dBm, when the backend reports one
    pub rssi: Option<i16>,
    /// Manufacturer-specific data, company id bytes included
    pub manufacturer_data: Vec<u8>,
    /// Advertised local name, if any
    pub local_name: Option<String>,
}

/// Temperature and humidity decoded from one advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermometerReading {
    /// Temperature in Celsius with 0.1 degree resolution
    pub temperature: f64,
    /// Relative humidity in percent. Not clamped; malformed input may exceed 100.
    pub humidity: u8,
}

/// Why a payload does not carry a thermometer reading.
///
/// This is an expected outcome for advertisements of unrelated devices or
/// unrelated payload sub-types.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicable {
    #[error("payload too short: {len} bytes, need at least {}", MIN_PAYLOAD_LEN)]
    TooShort { len: usize },
    #[error("unrecognized payload header {:02X} {:02X}", .header[0], .header[1])]
    UnrecognizedHeader { header: [u8; 2] },
}

/// Returns true when a Bluetooth company identifier matches the header bytes
/// accepted by [`decode`].
pub fn is_thermometer_company(company_id: u16) -> bool {
    let [low, high] = company_id.to_le_bytes();
    RECOGNIZED_SUBTYPES.contains(&low) && high == VENDOR_BYTE
}

/// Decode a thermometer reading from manufacturer data.
///
/// # Example
/// ```
/// use switchbot_mhz19_exporter::advertisement::decode;
///
/// let payload = [0x69, 0x09, 0, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x96, 0x32];
/// let reading = decode(&payload).unwrap();
/// assert!((reading.temperature - 22.1).abs() < 1e-9);
/// assert_eq!(reading.humidity, 50);
/// ```
pub fn decode(payload: &[u8]) -> Result<ThermometerReading, NotApplicable> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(NotApplicable::TooShort { len: payload.len() });
    }
    if !RECOGNIZED_SUBTYPES.contains(&payload[0]) || payload[1] != VENDOR_BYTE {
        return Err(NotApplicable::UnrecognizedHeader {
            header: [payload[0], payload[1]],
        });
    }

    let above_freezing = payload[11] & SIGN_BIT != 0;
    let magnitude =
        f64::from(payload[10] & LOW_NIBBLE) / 10.0 + f64::from(payload[11] & SEVEN_BITS);
    let temperature = if above_freezing { magnitude } else { -magnitude };

    Ok(ThermometerReading {
        temperature,
        humidity: payload[12] & SEVEN_BITS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::thermometer_payload;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_decode_positive_temperature() {
        let reading = decode(&thermometer_payload(0x01, 0x96, 0x32)).unwrap();
        assert_close(reading.temperature, 22.1);
        assert_eq!(reading.humidity, 50);
    }

    #[test]
    fn test_decode_negative_temperature() {
        let reading = decode(&thermometer_payload(0x01, 0x16, 0x32)).unwrap();
        assert_close(reading.temperature, -22.1);
    }

    #[test]
    fn test_decode_sign_convention_over_all_digits() {
        for k in 0..=0x7F_u8 {
            for d in 0..=9_u8 {
                let expected = f64::from(d) / 10.0 + f64::from(k);
                let positive = decode(&thermometer_payload(d, 0x80 | k, 0)).unwrap();
                let negative = decode(&thermometer_payload(d, k, 0)).unwrap();
                assert_close(positive.temperature, expected);
                assert_close(negative.temperature, -expected);
            }
        }
    }

    #[test]
    fn test_decode_zero_with_cleared_sign_bit_is_zero() {
        let reading = decode(&thermometer_payload(0x00, 0x00, 0x00)).unwrap();
        assert_eq!(reading.temperature, 0.0);
    }

    #[test]
    fn test_decode_ignores_high_nibble_of_tenths_byte() {
        let reading = decode(&thermometer_payload(0xF5, 0x94, 0x00)).unwrap();
        assert_close(reading.temperature, 20.5);
    }

    #[test]
    fn test_decode_humidity_is_not_clamped() {
        let reading = decode(&thermometer_payload(0x00, 0x80, 0x7F)).unwrap();
        assert_eq!(reading.humidity, 127);

        // Bit 7 of the humidity byte is masked off.
        let reading = decode(&thermometer_payload(0x00, 0x80, 0xE4)).unwrap();
        assert_eq!(reading.humidity, 100);
    }

    #[test]
    fn test_decode_accepts_both_subtypes() {
        let mut payload = thermometer_payload(0x03, 0x99, 0x28);
        payload[0] = 0x48;
        let reading = decode(&payload).unwrap();
        assert_close(reading.temperature, 25.3);
        assert_eq!(reading.humidity, 40);
    }

    #[test]
    fn test_decode_accepts_longer_payloads() {
        let mut payload = thermometer_payload(0x01, 0x96, 0x32);
        payload.extend_from_slice(&[0xAB; 8]);
        assert!(decode(&payload).is_ok());
    }

    #[test]
    fn test_decode_short_payload_is_not_applicable() {
        let payload = thermometer_payload(0x01, 0x96, 0x32);
        for len in 0..MIN_PAYLOAD_LEN {
            assert_eq!(
                decode(&payload[..len]),
                Err(NotApplicable::TooShort { len })
            );
        }
    }

    #[test]
    fn test_decode_unrecognized_header_is_not_applicable() {
        for (first, second) in [(0x00, 0x09), (0x49, 0x09), (0x69, 0x08), (0x48, 0x00)] {
            let mut payload = thermometer_payload(0x01, 0x96, 0x32);
            payload[0] = first;
            payload[1] = second;
            assert_eq!(
                decode(&payload),
                Err(NotApplicable::UnrecognizedHeader {
                    header: [first, second]
                })
            );
        }
    }

    #[test]
    fn test_is_thermometer_company() {
        assert!(is_thermometer_company(0x0969));
        assert!(is_thermometer_company(0x0948));
        assert!(!is_thermometer_company(0x0499));
        assert!(!is_thermometer_company(0x6909));
    }

    #[test]
    fn test_not_applicable_display() {
        assert_eq!(
            NotApplicable::TooShort { len: 4 }.to_string(),
            "payload too short: 4 bytes, need at least 13"
        );
        assert_eq!(
            NotApplicable::UnrecognizedHeader {
                header: [0x4C, 0x00]
            }
            .to_string(),
            "unrecognized payload header 4C 00"
        );
    }
}
