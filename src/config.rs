//! Session configuration, loadable from TOML.
//!
//! ```toml
//! [resolver]
//! insert_insert = "merge_lexicographically"
//! delete_modify = "delete_wins"
//!
//! [presence]
//! inactivity_timeout_ms = 60000
//!
//! [undo]
//! coalesce_window_ms = 300
//! max_depth = 200
//! ```
//!
//! Every section and field is optional and falls back to its default.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::conflict::ResolverConfig;
use crate::error::Result;
use crate::presence::PresenceConfig;
use crate::session::UndoConfig;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub presence: PresenceConfig,
    pub undo: UndoConfig,
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Config> {
        return Ok(toml::from_str(source)?);
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let source = std::fs::read_to_string(path)?;
        return Config::from_toml_str(&source);
    }
}
