//! Transparent huge page configuration.
//!
//! A huge page has a single PFN and a single idle bit, so one access marks
//! the whole 2 MiB range active. Traces are only page-accurate with THP
//! disabled.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collector::error::CollectError;
use crate::collector::traits::FileSystem;

/// Sysfs file selecting the THP mode.
pub const THP_ENABLED_PATH: &str = "/sys/kernel/mm/transparent_hugepage/enabled";

/// Kernel THP policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThpMode {
    Always,
    Madvise,
    Never,
}

impl ThpMode {
    /// The word the kernel expects in the `enabled` file.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThpMode::Always => "always",
            ThpMode::Madvise => "madvise",
            ThpMode::Never => "never",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            "always" => Some(ThpMode::Always),
            "madvise" => Some(ThpMode::Madvise),
            "never" => Some(ThpMode::Never),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_word(s.trim()).ok_or_else(|| format!("unknown THP mode '{}'", s.trim()))
    }
}

/// Parses the `enabled` file, e.g. `always [madvise] never`.
///
/// The active mode is the bracketed word.
pub fn parse_enabled(content: &str) -> Option<ThpMode> {
    content
        .split_whitespace()
        .find_map(|w| w.strip_prefix('[').and_then(|w| w.strip_suffix(']')))
        .and_then(ThpMode::from_word)
}

/// Reads the current THP mode.
pub fn current_mode<F: FileSystem>(fs: &F) -> Result<ThpMode, CollectError> {
    let content = fs.read_to_string(Path::new(THP_ENABLED_PATH))?;
    parse_enabled(&content)
        .ok_or_else(|| CollectError::Parse(format!("no active mode in '{}'", content.trim())))
}

/// Returns true if THP is disabled. Warns otherwise.
///
/// A kernel without THP support counts as disabled.
pub fn check_hugepages<F: FileSystem>(fs: &F) -> bool {
    if !fs.exists(Path::new(THP_ENABLED_PATH)) {
        return true;
    }
    match current_mode(fs) {
        Ok(ThpMode::Never) => true,
        Ok(mode) => {
            warn!(
                %mode,
                "transparent huge pages are enabled; activity is tracked per huge page \
                 (write 'never' to {} to disable)",
                THP_ENABLED_PATH
            );
            false
        }
        Err(e) => {
            warn!(error = %e, "cannot determine transparent huge page mode");
            false
        }
    }
}

/// Switches the THP mode. Needs root.
pub fn set_mode<F: FileSystem>(fs: &F, mode: ThpMode) -> Result<(), CollectError> {
    fs.write_at(Path::new(THP_ENABLED_PATH), 0, mode.as_str().as_bytes())?;
    info!(%mode, "transparent huge page mode set");
    Ok(())
}
