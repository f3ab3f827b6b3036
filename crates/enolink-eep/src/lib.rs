//! EnOcean equipment profiles
//!
//! Equipment profiles (EEPs) describe how the data bytes of a telegram map
//! to entity values. This crate provides:
//!
//! - [`Profile`] definitions parsed from JSON files
//! - a [`ProfileLibrary`] that loads a directory tree of profiles
//! - [`decode`], turning a telegram payload into a [`FieldMap`]
//! - a [`CommandTranslator`] turning entity commands into telegrams
//!
//! # Example
//!
//! ```rust
//! use enolink_eep::{decode, Profile};
//!
//! let profile: Profile = serde_json::from_str(r#"{
//!     "eep": "A5-38-08",
//!     "case": [{ "data": "0x02006409", "datafield": [{ "shortcut": "switch", "value": "1" }] }]
//! }"#).unwrap();
//!
//! let payload = [0xA5, 0x02, 0x00, 0x64, 0x09, 0x01, 0x02, 0x03, 0x04, 0x00];
//! let fields = decode(&payload, &profile);
//! assert_eq!(fields["switch"], 1);
//! ```

#![warn(missing_docs)]

pub mod decoder;
pub mod error;
pub mod library;
pub mod profile;
pub mod translator;
pub mod value;

pub use decoder::{decode, extract_bits, matching_case};
pub use error::{EepError, Result};
pub use library::{load_file, ProfileLibrary, ProfileStore};
pub use profile::{parse_eep, Case, FieldRule, Profile, Span};
pub use translator::{brightness_percent, button_code, Command, CommandTranslator, Translation};
pub use value::{coerce_literal, values_match, FieldMap};
