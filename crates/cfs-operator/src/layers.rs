//! Resolve a session's configuration reference into ordered layers.

use cfs_protocol::Layer;
use cfs_protocol::session::SessionConfiguration;

use crate::adapters::ConfigurationStore;
use crate::error::OperatorError;

/// Configurations named with this prefix run a single ad-hoc playbook when
/// no stored configuration exists.
pub const DEBUG_PREFIX: &str = "debug_";

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLayers {
    pub layers: Vec<Layer>,
    /// The layers are the synthetic debug layer.
    pub debug: bool,
}

pub async fn resolve_layers(
    store: &dyn ConfigurationStore,
    configuration: &SessionConfiguration,
) -> Result<ResolvedLayers, OperatorError> {
    let name = configuration.name.as_str();
    let stored = match store.get_configuration(name).await {
        Ok(stored) => stored,
        Err(err) if err.is_not_found() && name.starts_with(DEBUG_PREFIX) => {
            tracing::info!(configuration = name, "using synthetic debug layer");
            return Ok(ResolvedLayers {
                layers: vec![debug_layer(name)],
                debug: true,
            });
        }
        Err(err) => return Err(err),
    };
    Ok(ResolvedLayers {
        layers: apply_limit(stored.layers, &configuration.limit),
        debug: false,
    })
}

fn debug_layer(configuration: &str) -> Layer {
    let playbook = configuration.strip_prefix(DEBUG_PREFIX).unwrap_or(configuration);
    Layer {
        clone_url: String::new(),
        playbook: format!("{playbook}.yaml"),
        layer: Some("_debug".into()),
        ..Layer::default()
    }
}

/// Apply a layer limit and tag each kept layer with its index.
///
/// An all-numeric limit selects 0-based indices in ascending order, dropping
/// out-of-range entries. Anything else selects layers by name; layers without
/// a name always pass a name filter.
pub fn apply_limit(layers: Vec<Layer>, limit: &str) -> Vec<Layer> {
    let limit = limit.trim();
    let indexed = layers.into_iter().enumerate();
    let selected: Vec<(usize, Layer)> = if limit.is_empty() {
        indexed.collect()
    } else {
        let terms: Vec<&str> = limit.split(',').map(str::trim).collect();
        let numeric: Option<Vec<usize>> = terms
            .iter()
            .map(|term| {
                if !term.is_empty() && term.bytes().all(|b| b.is_ascii_digit()) {
                    term.parse().ok()
                } else {
                    None
                }
            })
            .collect();
        match numeric {
            Some(mut indices) => {
                indices.sort_unstable();
                let layers: Vec<(usize, Layer)> = indexed.collect();
                indices
                    .into_iter()
                    .filter_map(|index| layers.get(index).cloned())
                    .collect()
            }
            None => indexed
                .filter(|(_, layer)| layer.name().is_none_or(|name| terms.contains(&name)))
                .collect(),
        }
    };
    selected
        .into_iter()
        .map(|(index, mut layer)| {
            layer.layer = Some(index.to_string());
            layer
        })
        .collect()
}
