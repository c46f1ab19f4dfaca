//! Routing configuration: which node a city's accounts live on.
//!
//! Shape mirrors the reference `fragmentation.toml` loader in
//! `NodeManager.__init__`: a flat list of nodes, each owning a set of
//! county names and a backing store path.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::common::LedgerError;

/// One shard: a named node owning a set of counties and a storage path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub counties: Vec<String>,
    pub db_path: String,
}

/// Top-level `[[nodes]]` routing table, as parsed from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub nodes: Vec<NodeConfig>,
}

impl RoutingConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, LedgerError> {
        toml::from_str(contents).map_err(LedgerError::from)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Node owning a given county, if any. First match wins when counties
    /// overlap across nodes (not validated against; config authoring error).
    pub fn node_for_city(&self, city: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.counties.iter().any(|c| c == city))
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Build a reverse `node name -> NodeConfig` lookup for fast repeated
    /// access, analogous to the reference's precomputed `node_files` dict.
    pub fn node_index(&self) -> HashMap<String, &NodeConfig> {
        self.nodes.iter().map(|n| (n.name.clone(), n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[nodes]]
        name = "node-a"
        counties = ["Alpha", "Beta"]
        db_path = "data/node-a.db"

        [[nodes]]
        name = "node-b"
        counties = ["Gamma"]
        db_path = "data/node-b.db"
    "#;

    #[test]
    fn parses_multiple_nodes() {
        let cfg = RoutingConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.nodes.len(), 2);
    }

    #[test]
    fn finds_node_by_county() {
        let cfg = RoutingConfig::from_toml_str(SAMPLE).unwrap();
        let node = cfg.node_for_city("Gamma").unwrap();
        assert_eq!(node.name, "node-b");
    }

    #[test]
    fn unknown_city_is_none() {
        let cfg = RoutingConfig::from_toml_str(SAMPLE).unwrap();
        assert!(cfg.node_for_city("Nowhere").is_none());
    }

    #[test]
    fn rejects_malformed_toml() {
        let result = RoutingConfig::from_toml_str("not valid toml {{{");
        assert!(result.is_err());
    }
}
