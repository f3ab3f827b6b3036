//! In-memory profile library
//!
//! Profiles are loaded once from a directory tree into an immutable map
//! keyed by EEP code. [`ProfileLibrary::reload`] builds a fresh map and swaps
//! it in whole, so readers never observe a half-loaded library.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{EepError, Result};
use crate::profile::Profile;

type ProfileMap = HashMap<String, Arc<Profile>>;

/// Read access to profiles, as needed by the bridge
pub trait ProfileStore: Send + Sync {
    /// Profile for an EEP code
    fn profile(&self, eep: &str) -> Option<Arc<Profile>>;

    /// Profiles a teach-in telegram could refer to
    ///
    /// With `function` set, only profiles with that FUNC/TYPE match;
    /// otherwise every profile of the RORG is a candidate.
    fn candidates(&self, rorg: u8, function: Option<(u8, u8)>) -> Vec<Arc<Profile>>;
}

/// Profiles keyed by EEP code
#[derive(Debug, Default)]
pub struct ProfileLibrary {
    profiles: RwLock<Arc<ProfileMap>>,
    source: Option<PathBuf>,
}

impl ProfileLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a library from already parsed profiles
    ///
    /// Later profiles override earlier ones with the same code.
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        let map = profiles
            .into_iter()
            .map(|p| (normalize(&p.eep), Arc::new(p)))
            .collect();
        Self {
            profiles: RwLock::new(Arc::new(map)),
            source: None,
        }
    }

    /// Load every `*.json` file below `dir`
    ///
    /// Files that cannot be read or parsed are logged and skipped.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let map = scan(&dir)?;
        info!(path = %dir.display(), profiles = map.len(), "Loaded EEP profiles");
        Ok(Self {
            profiles: RwLock::new(Arc::new(map)),
            source: Some(dir),
        })
    }

    /// Rescan the source directory and replace the whole library
    ///
    /// Returns the number of profiles now loaded.
    pub fn reload(&self) -> Result<usize> {
        let dir = self.source.as_ref().ok_or(EepError::NoSource)?;
        let map = scan(dir)?;
        let count = map.len();
        *self.profiles.write() = Arc::new(map);
        info!(path = %dir.display(), profiles = count, "Reloaded EEP profiles");
        Ok(count)
    }

    /// Look up a profile by code (case-insensitive)
    pub fn get(&self, eep: &str) -> Option<Arc<Profile>> {
        self.profiles.read().get(&normalize(eep)).cloned()
    }

    /// Whether a profile with this code exists
    pub fn contains(&self, eep: &str) -> bool {
        self.profiles.read().contains_key(&normalize(eep))
    }

    /// Sorted list of loaded profile codes
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<_> = self.profiles.read().keys().cloned().collect();
        codes.sort();
        codes
    }

    /// Number of loaded profiles
    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

impl ProfileStore for ProfileLibrary {
    fn profile(&self, eep: &str) -> Option<Arc<Profile>> {
        self.get(eep)
    }

    fn candidates(&self, rorg: u8, function: Option<(u8, u8)>) -> Vec<Arc<Profile>> {
        let snapshot = Arc::clone(&self.profiles.read());
        let mut matches: Vec<_> = snapshot
            .values()
            .filter(|profile| match (profile.triple(), function) {
                (Some((r, f, t)), Some((func, type_))) => r == rorg && f == func && t == type_,
                (Some((r, _, _)), None) => r == rorg,
                (None, _) => false,
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.eep.cmp(&b.eep));
        matches
    }
}

fn normalize(eep: &str) -> String {
    eep.trim().to_ascii_uppercase()
}

fn scan(dir: &Path) -> Result<ProfileMap> {
    let pattern = dir.join("**").join("*.json");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| EepError::InvalidPattern(e.to_string()))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Unreadable profile path");
                None
            }
        })
        .collect();
    paths.sort();

    let mut map = ProfileMap::new();
    for path in paths {
        match load_file(&path) {
            Ok(profile) => {
                let code = normalize(&profile.eep);
                if map.insert(code.clone(), Arc::new(profile)).is_some() {
                    debug!(eep = %code, path = %path.display(), "Profile overrides earlier definition");
                }
            }
            Err(e) => warn!(error = %e, code = e.error_code(), "Skipping profile"),
        }
    }
    Ok(map)
}

/// Parse a single profile file
pub fn load_file(path: &Path) -> Result<Profile> {
    let text = std::fs::read_to_string(path).map_err(|source| EepError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| EepError::Json {
        path: path.to_path_buf(),
        source,
    })
}
