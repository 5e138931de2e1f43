//! Configuration loading for reverseproxy
//!
//! The configuration file is INI. Keys before the first section are
//! top-level keys (`default_host` in single-host mode); every section names
//! a logical host and carries its backend under `host`:
//!
//! ```ini
//! default_host = http://10.0.0.9:9090
//!
//! [api]
//! host = 10.0.0.5:8080
//! ```
//!
//! Section names and keys are lower-cased on load. Section names may
//! contain dots (`[www.example.com]`).

use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{ProxyError, Result};

/// A value or a table in the parsed INI tree.
///
/// The `config` crate splits dotted section names into nested tables, so
/// `[www.example.com]` arrives as `www -> example -> com`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IniNode {
    Value(String),
    Table(HashMap<String, IniNode>),
}

/// Parsed configuration, read once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Keys that appear before any section
    pub top_level: BTreeMap<String, String>,
    /// Section name -> key/value pairs
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigSnapshot {
    /// Load configuration from an INI file
    pub fn load(path: &Path) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .build()
            .map_err(|e| {
                ProxyError::Config(format!("Failed to load {}: {}", path.display(), e))
            })?;

        Self::from_config(settings)
            .map_err(|e| ProxyError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from INI text
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Ini))
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))?;

        Self::from_config(settings)
            .map_err(|e| ProxyError::Config(format!("Failed to parse config: {}", e)))
    }

    fn from_config(settings: Config) -> std::result::Result<Self, config::ConfigError> {
        let root: HashMap<String, IniNode> = settings.try_deserialize()?;

        let mut snapshot = ConfigSnapshot::default();
        for (name, node) in root {
            match node {
                IniNode::Value(value) => {
                    snapshot.top_level.insert(name.to_ascii_lowercase(), value);
                }
                IniNode::Table(table) => snapshot.add_section(name, table),
            }
        }

        Ok(snapshot)
    }

    /// Record a section and rebuild the dotted names of nested ones. A
    /// table holding only tables is a name prefix, not a section.
    fn add_section(&mut self, name: String, table: HashMap<String, IniNode>) {
        let name = name.to_ascii_lowercase();
        let is_section =
            table.is_empty() || table.values().any(|node| matches!(node, IniNode::Value(_)));
        if is_section {
            self.sections.entry(name.clone()).or_default();
        }

        for (key, node) in table {
            match node {
                IniNode::Value(value) => {
                    self.sections
                        .entry(name.clone())
                        .or_default()
                        .insert(key.to_ascii_lowercase(), value);
                }
                IniNode::Table(nested) => self.add_section(format!("{}.{}", name, key), nested),
            }
        }
    }

    /// Look up a top-level key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.top_level.get(key).map(String::as_str)
    }

    /// Look up a key inside a section
    pub fn section_value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|pairs| pairs.get(key))
            .map(String::as_str)
    }
}
