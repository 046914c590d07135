//! Layer constraints
//!
//! A module on layer L may depend only on capabilities whose layer level is
//! at most L's level in the same dimension. Dimensions are independent; a
//! module with no layer in a dimension is unconstrained there. Without any
//! configured dimension, layer names are not checked at all.

use crate::config::{LayerPosition, RuntimeConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::module::registry::ModuleEntry;

fn position<'a>(
    config: &'a RuntimeConfig,
    layer: &str,
    referenced_by: impl FnOnce() -> String,
) -> RuntimeResult<LayerPosition<'a>> {
    config
        .layer_position(layer)
        .ok_or_else(|| RuntimeError::UnknownLayer {
            layer: layer.to_string(),
            referenced_by: referenced_by(),
        })
}

/// Validate one module's layers against its dependencies
pub(crate) fn check_layers(config: &RuntimeConfig, entry: &ModuleEntry) -> RuntimeResult<()> {
    if !config.has_layers() {
        return Ok(());
    }

    let module_layers: Vec<(String, LayerPosition<'_>)> = entry
        .module
        .layer()
        .into_iter()
        .map(|layer| {
            let found = position(config, &layer, || format!("module '{}'", entry.name()))?;
            Ok((layer, found))
        })
        .collect::<RuntimeResult<_>>()?;

    for key in &entry.capabilities {
        for layer in key.layer() {
            position(config, layer, || format!("capability '{}'", key))?;
        }
    }

    for key in &entry.dependencies {
        for key_layer in key.layer() {
            let key_position = position(config, key_layer, || format!("capability '{}'", key))?;
            let module_layer = module_layers
                .iter()
                .find(|(_, found)| found.dimension == key_position.dimension);
            if let Some((module_layer, module_position)) = module_layer {
                if key_position.level > module_position.level {
                    return Err(RuntimeError::LayerViolation {
                        module: entry.name().to_string(),
                        module_layer: module_layer.clone(),
                        key: key.display_name(),
                        key_layer: key_layer.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}
