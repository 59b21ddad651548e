//! Register word decoding
//!
//! Pure functions turning big-endian register words into typed values.
//! Missing words in a short slice decode as 0.

use crate::registers::{DataType, ReadValue, RegisterDefinition};

#[inline]
fn word(words: &[u16], index: usize) -> u32 {
    u32::from(words.get(index).copied().unwrap_or(0))
}

/// Decode the numeric content of a register span.
///
/// `uint64` only combines the low two words of its four-word span; values
/// above `u32::MAX` are not representable. `string` returns the first word.
pub fn decode_numeric(words: &[u16], data_type: DataType) -> i64 {
    match data_type {
        DataType::Uint16 => i64::from(word(words, 0)),
        DataType::Int16 => i64::from(word(words, 0) as u16 as i16),
        DataType::Uint32 => i64::from((word(words, 0) << 16) | word(words, 1)),
        DataType::Int32 => i64::from(((word(words, 0) << 16) | word(words, 1)) as i32),
        DataType::Uint64 => i64::from((word(words, 2) << 16) | word(words, 3)),
        DataType::String => i64::from(word(words, 0)),
    }
}

/// True when the value is the "no data" sentinel of its type
pub fn is_disconnected(value: i64, data_type: DataType) -> bool {
    match data_type {
        DataType::Uint16 => value == 0xFFFF,
        DataType::Int16 => value == 0x7FFF,
        DataType::Uint32 => value == 0xFFFF_FFFF,
        DataType::Int32 => value == 0x7FFF_FFFF,
        DataType::Uint64 | DataType::String => false,
    }
}

/// Two bytes per word, high byte first; NULs dropped, whitespace trimmed
pub fn decode_string(words: &[u16]) -> String {
    let text: String = words
        .iter()
        .flat_map(|w| w.to_be_bytes())
        .filter(|&b| b != 0)
        .map(char::from)
        .collect();
    text.trim().to_string()
}

/// Decode a register, applying the sentinel check and scale factor
pub fn decode_value(words: &[u16], def: &RegisterDefinition) -> ReadValue {
    if def.data_type == DataType::String {
        return ReadValue::Text(decode_string(words));
    }

    let numeric = decode_numeric(words, def.data_type);
    if is_disconnected(numeric, def.data_type) {
        return ReadValue::not_available();
    }

    ReadValue::Number(apply_scale(numeric as f64, def.scale_factor))
}

/// Divide by the scale factor; 0 and 1 leave the value untouched
#[inline]
pub fn apply_scale(value: f64, scale_factor: f64) -> f64 {
    if scale_factor == 0.0 || scale_factor == 1.0 {
        value
    } else {
        value / scale_factor
    }
}

/// Label for a numeric value of an enum register.
///
/// `None` when the register has no enum table or the value is text.
pub fn resolve_enum_label(def: &RegisterDefinition, value: &ReadValue) -> Option<String> {
    let table = def.enum_values.as_ref()?;
    let number = value.as_number()?;

    let label = if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        table.get(&(number as i64)).cloned()
    } else {
        None
    };
    Some(label.unwrap_or_else(|| format!("Unknown ({number})")))
}

/// Description of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal Function: the register exists but does not support this function code",
        0x02 => "Illegal Data Address: the register address does not exist for this unit ID",
        0x03 => "Illegal Data Value: the value is out of range for this register",
        0x04 => "Server Device Failure: internal error on the GX device",
        0x05 => "Acknowledge: request accepted but processing not complete",
        0x06 => "Server Device Busy: the GX device is busy, retry later",
        0x0A => "Gateway Path Unavailable: the unit ID is mapped but the device was not found, it may be disconnected",
        0x0B => "Gateway Target Device Failed to Respond: the unit ID does not match any device",
        _ => "Unknown error",
    }
}
