//! Profile-driven telegram decoding

use enolink_esp3::layout_for;
use serde_json::Value;
use tracing::debug;

use crate::profile::{Case, FieldRule, Profile, Span};
use crate::value::{coerce_literal, is_truthy, number, FieldMap};

/// Trailing bytes after the data bytes: sender id (4) and status (1)
const TRAILER_LEN: usize = 5;

/// Decode a telegram payload with a profile
///
/// `payload` is the ERP1 data starting at the RORG byte and ending with the
/// status byte. The first case whose constraints match is used; when none
/// matches the result is empty.
pub fn decode(payload: &[u8], profile: &Profile) -> FieldMap {
    let mut fields = FieldMap::new();
    let Some(case) = matching_case(payload, profile) else {
        debug!(eep = %profile.eep, len = payload.len(), "No case matched telegram");
        return fields;
    };

    let data = data_bytes(payload);
    for rule in &case.fields {
        let Some(key) = rule.shortcut.as_deref() else {
            continue;
        };
        if let Some(value) = evaluate_rule(rule, data) {
            fields.insert(key.to_string(), value);
        }
    }
    fields
}

/// First case of `profile` that applies to `payload`
pub fn matching_case<'a>(payload: &[u8], profile: &'a Profile) -> Option<&'a Case> {
    let &rorg = payload.first()?;
    let discriminant = layout_for(rorg).discriminant(payload);
    let status = payload.last().copied();
    profile
        .cases
        .iter()
        .find(|case| case.matches(discriminant, status))
}

fn data_bytes(payload: &[u8]) -> &[u8] {
    if payload.len() > TRAILER_LEN + 1 {
        &payload[1..payload.len() - TRAILER_LEN]
    } else {
        &[]
    }
}

fn evaluate_rule(rule: &FieldRule, data: &[u8]) -> Option<Value> {
    if let Some(value) = &rule.value {
        return evaluate(value);
    }

    let (offset, size) = rule.bit_field()?;
    let Some(raw) = extract_bits(data, offset, size) else {
        debug!(offset, size, available = data.len() * 8, "Bit field outside telegram");
        return None;
    };
    match (rule.range, rule.scale) {
        (Some(range), Some(scale)) => Some(number(rescale(raw as f64, range, scale))),
        _ => Some(Value::from(raw)),
    }
}

/// Evaluate a literal or `{"if": [cond, then, else]}` formula
fn evaluate(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => match map.get("if") {
            Some(Value::Array(branches)) if branches.len() == 3 => {
                let condition = evaluate(&branches[0])?;
                let chosen = if is_truthy(&condition) {
                    &branches[1]
                } else {
                    &branches[2]
                };
                evaluate(chosen)
            }
            Some(_) => None,
            None => Some(value.clone()),
        },
        literal => Some(coerce_literal(literal)),
    }
}

/// Read `size` bits starting `offset` bits from the MSB of `data`
pub fn extract_bits(data: &[u8], offset: u32, size: u32) -> Option<u64> {
    if size == 0 || size > 64 {
        return None;
    }
    let end = offset.checked_add(size)?;
    if end as usize > data.len() * 8 {
        return None;
    }
    Some((offset..end).fold(0u64, |acc, bit| {
        let byte = data[(bit / 8) as usize];
        let set = (byte >> (7 - bit % 8)) & 1;
        (acc << 1) | u64::from(set)
    }))
}

/// Map `raw` linearly from `range` onto `scale`, rounded to two decimals
fn rescale(raw: f64, range: Span, scale: Span) -> f64 {
    let width = range.max - range.min;
    if width == 0.0 {
        return raw;
    }
    let scaled = scale.min + (raw - range.min) * (scale.max - scale.min) / width;
    (scaled * 100.0).round() / 100.0
}
