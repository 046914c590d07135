//! Runtime configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```toml
//! check_cycles = true
//! cyclic_mode = false
//!
//! [[layers]]
//! name = "architecture"
//! levels = [
//!     { name = "infra", level = 0 },
//!     { name = "domain", level = 1 },
//!     { name = "presentation", level = 2 },
//! ]
//! ```

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// One named level inside a layer dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerLevel {
    pub name: String,
    pub level: u32,
}

/// An independent ordering of layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDimension {
    pub name: String,
    #[serde(default)]
    pub levels: Vec<LayerLevel>,
}

impl LayerDimension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            levels: Vec::new(),
        }
    }

    pub fn level(mut self, name: impl Into<String>, level: u32) -> Self {
        self.levels.push(LayerLevel {
            name: name.into(),
            level,
        });
        self
    }
}

/// Where a layer name sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerPosition<'a> {
    pub dimension: &'a str,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reject batches whose declared capabilities form a cycle
    pub check_cycles: bool,
    /// Let mutually dependent pending modules initialise together
    pub cyclic_mode: bool,
    /// Scoped actions reach only the dispatching module's reducers
    pub scoped_reducers: bool,
    /// A context may only read capabilities its module depends on or declares
    pub enforce_dependency_declarations: bool,
    pub layers: Vec<LayerDimension>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            check_cycles: true,
            cyclic_mode: false,
            scoped_reducers: false,
            enforce_dependency_declarations: true,
            layers: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(content: &str) -> RuntimeResult<Self> {
        let config: RuntimeConfig = toml::from_str(content).map_err(|e| RuntimeError::Config {
            message: format!("Invalid runtime configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RuntimeError::Config {
            message: format!("Failed to read '{}': {}", path.display(), e),
        })?;
        log::debug!("loading runtime configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Layer names must be unique across all dimensions
    pub fn validate(&self) -> RuntimeResult<()> {
        let mut dimensions: HashSet<&str> = HashSet::new();
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for dimension in &self.layers {
            if !dimensions.insert(dimension.name.as_str()) {
                return Err(RuntimeError::Config {
                    message: format!("Layer dimension '{}' is defined twice", dimension.name),
                });
            }
            for level in &dimension.levels {
                if let Some(previous) = seen.insert(level.name.as_str(), dimension.name.as_str()) {
                    return Err(RuntimeError::Config {
                        message: format!(
                            "Layer '{}' is defined in dimension '{}' and again in '{}'",
                            level.name, previous, dimension.name
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn with_cycle_checks(mut self, enabled: bool) -> Self {
        self.check_cycles = enabled;
        self
    }

    pub fn with_cyclic_mode(mut self, enabled: bool) -> Self {
        self.cyclic_mode = enabled;
        self
    }

    pub fn with_scoped_reducers(mut self, enabled: bool) -> Self {
        self.scoped_reducers = enabled;
        self
    }

    pub fn with_dependency_enforcement(mut self, enabled: bool) -> Self {
        self.enforce_dependency_declarations = enabled;
        self
    }

    pub fn with_layers(mut self, dimension: LayerDimension) -> Self {
        self.layers.push(dimension);
        self
    }

    pub fn has_layers(&self) -> bool {
        !self.layers.is_empty()
    }

    pub fn layer_position(&self, layer: &str) -> Option<LayerPosition<'_>> {
        self.layers.iter().find_map(|dimension| {
            dimension
                .levels
                .iter()
                .find(|level| level.name == layer)
                .map(|level| LayerPosition {
                    dimension: dimension.name.as_str(),
                    level: level.level,
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.check_cycles);
        assert!(!config.cyclic_mode);
        assert!(!config.scoped_reducers);
        assert!(config.enforce_dependency_declarations);
        assert!(!config.has_layers());
        assert_eq!(RuntimeConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_parse_layers() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            cyclic_mode = true

            [[layers]]
            name = "architecture"
            levels = [
                { name = "infra", level = 0 },
                { name = "presentation", level = 2 },
            ]
            "#,
        )
        .unwrap();

        assert!(config.cyclic_mode);
        assert!(config.check_cycles);
        let position = config.layer_position("presentation").unwrap();
        assert_eq!(position.dimension, "architecture");
        assert_eq!(position.level, 2);
        assert!(config.layer_position("unknown").is_none());
    }

    #[test]
    fn test_duplicate_layer_name_rejected() {
        let config = RuntimeConfig::default()
            .with_layers(LayerDimension::new("a").level("core", 0))
            .with_layers(LayerDimension::new("b").level("core", 1));
        match config.validate() {
            Err(RuntimeError::Config { message }) => assert!(message.contains("core")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = RuntimeConfig::from_toml_str("check_cycles = \"yes\"");
        assert!(matches!(result, Err(RuntimeError::Config { .. })));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "scoped_reducers = true").unwrap();
        writeln!(file, "enforce_dependency_declarations = false").unwrap();

        let config = RuntimeConfig::from_file(file.path()).unwrap();
        assert!(config.scoped_reducers);
        assert!(!config.enforce_dependency_declarations);
    }

    #[test]
    fn test_missing_file() {
        let result = RuntimeConfig::from_file("/nonexistent/modhost.toml");
        assert!(matches!(result, Err(RuntimeError::Config { .. })));
    }
}
