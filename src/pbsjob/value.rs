//! Conversion between the on-wire string form of one attribute and its
//! typed slot in the job record. Empty input always decodes to the slot's
//! zero value; integer slots fall back to a human-readable memory parse so
//! values like "64GiB" land as bytes.

use crate::error::{ExporterError, Result};
use crate::util;

use super::schema::{SlotMut, SlotRef};

pub fn decode_slot(slot: SlotMut<'_>, value: &str, separator: &str) -> Result<()> {
    match slot {
        SlotMut::Int(field) => *field = decode_int(value)?,
        SlotMut::Str(field) => *field = value.to_string(),
        SlotMut::List(field) => *field = decode_list(value, separator),
    }

    Ok(())
}

pub fn encode_slot(slot: SlotRef<'_>, separator: &str) -> String {
    match slot {
        SlotRef::Int(value) => value.to_string(),
        SlotRef::Str(value) => value.to_string(),
        SlotRef::List(values) => values.join(separator),
    }
}

pub fn decode_bool(value: &str) -> Result<bool> {
    match value {
        "" | "false" => Ok(false),
        "true" => Ok(true),
        value => Err(ExporterError::ValueParse(format!(
            "invalid boolean attribute value '{value}'"
        ))),
    }
}

pub fn encode_bool(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn decode_int(value: &str) -> Result<i64> {
    if value.is_empty() {
        return Ok(0);
    }

    if let Ok(int_value) = value.parse::<i64>() {
        return Ok(int_value);
    }

    util::parse_mem_bytes(value).map_err(|_| {
        ExporterError::ValueParse(format!("invalid integer attribute value '{value}'"))
    })
}

pub fn decode_uint(value: &str) -> Result<u64> {
    if value.is_empty() {
        return Ok(0);
    }

    value.parse().map_err(|_| {
        ExporterError::ValueParse(format!("invalid unsigned attribute value '{value}'"))
    })
}

/// An empty value is the empty list, not a list of one empty element.
fn decode_list(value: &str, separator: &str) -> Vec<String> {
    if value.is_empty() {
        return Vec::new();
    }

    value.split(separator).map(str::to_string).collect()
}
