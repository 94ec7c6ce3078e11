//! Cluster document parser

use super::document::ClusterSpec;
use crate::error::{KeelError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Cluster document parser
pub struct ClusterParser;

impl ClusterParser {
    /// Parse a cluster document from a file
    pub fn parse_file(path: &Path) -> Result<ClusterSpec> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content)
    }

    /// Parse a cluster document from a string
    pub fn parse_str(content: &str) -> Result<ClusterSpec> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::parse_str_with_env(content, &env)
    }

    /// Parse with an explicit variable map used for `${VAR}` substitution
    pub fn parse_str_with_env(content: &str, env: &HashMap<String, String>) -> Result<ClusterSpec> {
        let expanded = interpolate(content, env);
        serde_yaml::from_str(&expanded).map_err(|e| KeelError::ConfigParse(e.to_string()))
    }

    /// Parse and validate
    pub fn load(path: &Path) -> Result<ClusterSpec> {
        let spec = Self::parse_file(path)?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Replace `${VAR}` and `${VAR:-default}` references
fn interpolate(content: &str, env: &HashMap<String, String>) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let name = &caps[1];
        match env.get(name) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    })
    .into_owned()
}
