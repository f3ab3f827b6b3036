//! Equipment profile definitions
//!
//! Profiles are JSON documents, one per EEP code. Numeric attributes are
//! commonly written as strings (`"0xA5"`, `"16"`, `"+40"`); they are parsed
//! once here so decoding never has to look at text again.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single equipment profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Profile code, e.g. `A5-02-05`
    pub eep: String,
    /// Human readable title
    #[serde(default)]
    pub type_title: Option<String>,
    /// RORG byte
    #[serde(default, deserialize_with = "lenient::opt_hex_u8")]
    pub rorg_number: Option<u8>,
    /// FUNC number
    #[serde(default, deserialize_with = "lenient::opt_hex_u8")]
    pub func_number: Option<u8>,
    /// TYPE number
    #[serde(default, deserialize_with = "lenient::opt_hex_u8")]
    pub type_number: Option<u8>,
    /// Entity metadata, opaque to the decoder
    #[serde(default)]
    pub objects: BTreeMap<String, Value>,
    /// Ordered decoding cases
    #[serde(default, rename = "case")]
    pub cases: Vec<Case>,
}

/// One alternative interpretation of a telegram
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Required discriminant value
    #[serde(default, deserialize_with = "lenient::opt_hex_u32")]
    pub data: Option<u32>,
    /// Required status byte
    #[serde(default, deserialize_with = "lenient::opt_hex_u8")]
    pub status: Option<u8>,
    /// Field rules applied when the case matches
    #[serde(default, rename = "datafield")]
    pub fields: Vec<FieldRule>,
}

/// How one entity value is produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Entity key; rules without one are descriptive only
    #[serde(default)]
    pub shortcut: Option<String>,
    /// Literal or formula
    #[serde(default)]
    pub value: Option<Value>,
    /// First bit, counted from the MSB of the data bytes
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub bitoffs: Option<u32>,
    /// Width of the bit field
    #[serde(default, deserialize_with = "lenient::opt_u32")]
    pub bitsize: Option<u32>,
    /// Raw value range of the bit field
    #[serde(default)]
    pub range: Option<Span>,
    /// Engineering range the raw range maps to
    #[serde(default)]
    pub scale: Option<Span>,
}

/// Linear range endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Value at the start of the range
    #[serde(deserialize_with = "lenient::number")]
    pub min: f64,
    /// Value at the end of the range
    #[serde(deserialize_with = "lenient::number")]
    pub max: f64,
}

impl Case {
    /// Whether this case applies to a telegram
    ///
    /// A data constraint never matches when the payload had no
    /// discriminant (too short for its family).
    pub fn matches(&self, discriminant: Option<u32>, status: Option<u8>) -> bool {
        let data_ok = match self.data {
            Some(want) => discriminant == Some(want),
            None => true,
        };
        let status_ok = match self.status {
            Some(want) => status == Some(want),
            None => true,
        };
        data_ok && status_ok
    }
}

impl FieldRule {
    /// Bit field position, when both offset and size are given
    pub fn bit_field(&self) -> Option<(u32, u32)> {
        Some((self.bitoffs?, self.bitsize?))
    }
}

impl Profile {
    /// RORG/FUNC/TYPE, falling back to the profile code when the explicit
    /// numbers are missing
    pub fn triple(&self) -> Option<(u8, u8, u8)> {
        match (self.rorg_number, self.func_number, self.type_number) {
            (Some(r), Some(f), Some(t)) => Some((r, f, t)),
            _ => parse_eep(&self.eep),
        }
    }

    /// RORG byte of this profile
    pub fn rorg(&self) -> Option<u8> {
        self.rorg_number.or_else(|| self.triple().map(|(r, _, _)| r))
    }

    /// Entity keys this profile can produce
    pub fn entity_keys(&self) -> impl Iterator<Item = &str> {
        self.cases
            .iter()
            .flat_map(|case| case.fields.iter())
            .filter_map(|field| field.shortcut.as_deref())
    }
}

/// Split a profile code like `A5-02-05` into its three numbers
pub fn parse_eep(code: &str) -> Option<(u8, u8, u8)> {
    let mut parts = code.trim().split('-');
    let mut next = || u8::from_str_radix(parts.next()?, 16).ok();
    let triple = (next()?, next()?, next()?);
    parts.next().is_none().then_some(triple)
}

/// Serde helpers accepting numbers or numeric strings (`"0x0A"`, `"A5"`, `"+40"`)
mod lenient {
    use super::*;
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Float(f64),
        Text(String),
    }

    /// How numeric text without a `0x` prefix is read
    #[derive(Clone, Copy)]
    enum Radix {
        Decimal,
        Hex,
    }

    fn strip_hex_prefix(text: &str) -> Option<&str> {
        text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
    }

    fn parse_int(text: &str, radix: Radix) -> Option<u64> {
        let text = text.trim();
        if let Some(hex) = strip_hex_prefix(text) {
            return u64::from_str_radix(hex, 16).ok();
        }
        match radix {
            // from_str_radix would accept a sign
            Radix::Hex if text.starts_with(['+', '-']) => None,
            Radix::Hex => u64::from_str_radix(text, 16).ok(),
            Radix::Decimal => text.trim_start_matches('+').parse().ok(),
        }
    }

    fn int<'de, D: Deserializer<'de>>(
        deserializer: D,
        radix: Radix,
    ) -> Result<Option<u64>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Int(n)) => Ok(Some(n)),
            Some(Raw::Float(f)) if f.fract() == 0.0 && f >= 0.0 => Ok(Some(f as u64)),
            Some(Raw::Float(f)) => Err(D::Error::custom(format!("expected integer, got {}", f))),
            Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Raw::Text(s)) => parse_int(&s, radix)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid number: {:?}", s))),
        }
    }

    fn narrow<T: TryFrom<u64>, E: Error>(value: Option<u64>) -> Result<Option<T>, E>
    where
        T::Error: std::fmt::Display,
    {
        value.map(|n| T::try_from(n).map_err(E::custom)).transpose()
    }

    pub fn opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        narrow(int(deserializer, Radix::Decimal)?)
    }

    /// Profile codes and case constraints: text is hex even without `0x`
    pub fn opt_hex_u8<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u8>, D::Error> {
        narrow(int(deserializer, Radix::Hex)?)
    }

    pub fn opt_hex_u32<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u32>, D::Error> {
        narrow(int(deserializer, Radix::Hex)?)
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(n as f64),
            Raw::Float(f) => Ok(f),
            Raw::Text(s) => {
                let text = s.trim();
                if let Some(n) = parse_int(text, Radix::Decimal) {
                    return Ok(n as f64);
                }
                text.parse::<f64>()
                    .map_err(|_| D::Error::custom(format!("invalid number: {:?}", s)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_profile_document() {
        let profile: Profile = serde_json::from_value(json!({
            "eep": "A5-02-05",
            "type_title": "Temperature Sensor Range 0C to +40C",
            "rorg_number": "0xA5",
            "func_number": "0x02",
            "type_number": "0x05",
            "objects": { "TMP": { "name": "Temperature", "role": "value.temperature" } },
            "case": [{
                "datafield": [
                    { "shortcut": "TMP", "bitoffs": "16", "bitsize": "8",
                      "range": { "min": "255", "max": "0" },
                      "scale": { "min": "0", "max": "+40" } }
                ]
            }]
        }))
        .unwrap();

        assert_eq!(profile.triple(), Some((0xA5, 0x02, 0x05)));
        assert_eq!(profile.cases.len(), 1);
        let field = &profile.cases[0].fields[0];
        assert_eq!(field.bit_field(), Some((16, 8)));
        assert_eq!(field.range, Some(Span { min: 255.0, max: 0.0 }));
        assert_eq!(field.scale, Some(Span { min: 0.0, max: 40.0 }));
        assert_eq!(profile.entity_keys().collect::<Vec<_>>(), vec!["TMP"]);
    }

    #[test]
    fn test_case_constraints_parse_hex() {
        let case: Case = serde_json::from_value(json!({
            "data": "0x02006409",
            "status": "0x00",
            "datafield": []
        }))
        .unwrap();
        assert_eq!(case.data, Some(0x0200_6409));
        assert_eq!(case.status, Some(0x00));
        assert!(case.matches(Some(0x0200_6409), Some(0x00)));
        assert!(!case.matches(Some(0x0200_6409), Some(0x30)));
        assert!(!case.matches(None, Some(0x00)));
    }

    #[test]
    fn test_unprefixed_constraints_are_hex() {
        let case: Case = serde_json::from_value(json!({
            "data": "30",
            "status": "30",
            "datafield": [{ "shortcut": "pressed", "bitoffs": "16", "bitsize": "8" }]
        }))
        .unwrap();
        assert_eq!(case.data, Some(0x30));
        assert_eq!(case.status, Some(0x30));
        // Bit positions stay decimal
        assert_eq!(case.fields[0].bit_field(), Some((16, 8)));

        let profile: Profile = serde_json::from_value(json!({
            "eep": "A5-38-08",
            "rorg_number": "A5",
            "func_number": "38",
            "type_number": "08"
        }))
        .unwrap();
        assert_eq!(profile.triple(), Some((0xA5, 0x38, 0x08)));
    }

    #[test]
    fn test_integer_constraints_kept() {
        let case: Case = serde_json::from_value(json!({ "data": 48, "status": 32 })).unwrap();
        assert_eq!(case.data, Some(48));
        assert_eq!(case.status, Some(0x20));
    }

    #[test]
    fn test_signed_hex_rejected() {
        let result: Result<Case, _> = serde_json::from_value(json!({ "status": "+30" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result: Result<Case, _> = serde_json::from_value(json!({ "data": "0xZZ" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_triple_falls_back_to_code() {
        let profile: Profile = serde_json::from_value(json!({ "eep": "D2-05-00" })).unwrap();
        assert_eq!(profile.triple(), Some((0xD2, 0x05, 0x00)));
        assert_eq!(profile.rorg(), Some(0xD2));
        assert!(profile.cases.is_empty());
    }

    #[test]
    fn test_parse_eep() {
        assert_eq!(parse_eep("F6-02-01"), Some((0xF6, 0x02, 0x01)));
        assert_eq!(parse_eep("F6-02"), None);
        assert_eq!(parse_eep("F6-02-01-07"), None);
    }
}
