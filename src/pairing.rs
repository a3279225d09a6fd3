//! Pairing code shown on the parent device.
//!
//! The code is a display aid only. Linking uses the full device id shared out
//! of band, and two ids can share a code.

use crate::constants::PAIRING_CODE_LEN;

/// Derive the pairing code for a device id: its last six characters, upper-cased.
/// Ids shorter than six characters yield the whole id.
pub fn derive_pairing_code(device_id: &str) -> String {
    let chars: Vec<char> = device_id.chars().collect();
    let start = chars.len().saturating_sub(PAIRING_CODE_LEN);
    chars[start..].iter().collect::<String>().to_uppercase()
}
