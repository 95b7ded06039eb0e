use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, RopeError};

pub const DEFAULT_ROPE_THETA: f64 = 10000.0;
pub const DEFAULT_PARTIAL_ROTARY_FACTOR: f64 = 1.0;
pub const DEFAULT_HIDDEN_SIZE: i64 = 4096;
pub const DEFAULT_NUM_ATTENTION_HEADS: i64 = 32;

/// Canonicalizes a config in place before rope parameters are read from it.
pub type Standardizer = fn(&mut ModelConfig);

/// The subset of a model `config.json` the rope initializers read.
///
/// Every field is optional; lookups fall back in the order documented on
/// [`crate::rope::resolve_rope_parameters`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
    // {"full_attention": {...}, "sliding_attention": {...}}, a flat {...},
    // or a legacy scalar
    #[serde(default)]
    pub rope_parameters: Option<Value>,

    // legacy, folded into rope_parameters by `standardize_rope_params`
    #[serde(default)]
    pub rope_scaling: Option<Value>,

    // default: 10000
    #[serde(default)]
    pub rope_theta: Option<f64>,

    // default: 1.0
    #[serde(default)]
    pub partial_rotary_factor: Option<f64>,

    #[serde(default)]
    pub head_dim: Option<i64>,

    // default: 4096
    #[serde(default)]
    pub hidden_size: Option<i64>,

    // default: 32
    #[serde(default)]
    pub num_attention_heads: Option<i64>,

    #[serde(skip)]
    pub standardize: Option<Standardizer>,
}

impl ModelConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: ModelConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        debug!(path = %path.as_ref().display(), "loaded model config");
        Ok(config)
    }

    /// Installs [`standardize_rope_params`] as this config's normalization step.
    pub fn with_standardizer(mut self) -> Self {
        self.standardize = Some(standardize_rope_params);
        self
    }

    /// `head_dim` if set, otherwise `hidden_size / num_attention_heads`.
    ///
    /// The division truncates; an inexact split is not reported.
    pub fn head_dim_or_derived(&self) -> Result<i64> {
        if let Some(head_dim) = self.head_dim {
            return Ok(head_dim);
        }
        let hidden_size = self.hidden_size.unwrap_or(DEFAULT_HIDDEN_SIZE);
        let num_heads = self.num_attention_heads.unwrap_or(DEFAULT_NUM_ATTENTION_HEADS);
        if num_heads == 0 {
            return Err(RopeError::ZeroAttentionHeads { hidden_size });
        }
        Ok(hidden_size / num_heads)
    }
}

/// Migrates the legacy top-level layout (`rope_theta`, `partial_rotary_factor`,
/// `rope_scaling`) into a unified `rope_parameters` mapping.
///
/// Configs that already carry `rope_parameters` are left as they are, so
/// calling this repeatedly is harmless.
pub fn standardize_rope_params(config: &mut ModelConfig) {
    if config.rope_parameters.is_some() {
        return;
    }

    let mut params = Map::new();
    if let Some(Value::Object(scaling)) = &config.rope_scaling {
        for (key, value) in scaling {
            // older configs spell it "type"
            let key = if key == "type" { "rope_type" } else { key.as_str() };
            params.insert(key.to_string(), value.clone());
        }
    }
    params
        .entry("rope_type")
        .or_insert_with(|| Value::from("default"));
    params.insert(
        "rope_theta".to_string(),
        Value::from(config.rope_theta.unwrap_or(DEFAULT_ROPE_THETA)),
    );
    if let Some(factor) = config.partial_rotary_factor {
        params.insert("partial_rotary_factor".to_string(), Value::from(factor));
    }

    debug!(?params, "standardized legacy rope config");
    config.rope_parameters = Some(Value::Object(params));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_hf_config_and_ignores_unknown_keys() {
        let config = ModelConfig::from_json_str(
            r#"{
                "model_type": "qwen3",
                "hidden_size": 1024,
                "num_attention_heads": 16,
                "rope_theta": 1000000,
                "vocab_size": 151936
            }"#,
        )
        .unwrap();

        assert_eq!(config.hidden_size, Some(1024));
        assert_eq!(config.rope_theta, Some(1_000_000.0));
        assert!(config.rope_parameters.is_none());
        assert!(config.standardize.is_none());
    }

    #[test]
    fn head_dim_takes_precedence_over_derived() {
        let config = ModelConfig {
            head_dim: Some(128),
            hidden_size: Some(1024),
            num_attention_heads: Some(16),
            ..Default::default()
        };
        assert_eq!(config.head_dim_or_derived().unwrap(), 128);
    }

    #[test]
    fn derived_head_dim_truncates() {
        let config = ModelConfig {
            hidden_size: Some(100),
            num_attention_heads: Some(3),
            ..Default::default()
        };
        assert_eq!(config.head_dim_or_derived().unwrap(), 33);
    }

    #[test]
    fn derived_head_dim_uses_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.head_dim_or_derived().unwrap(), 128);
    }

    #[test]
    fn zero_heads_is_an_error() {
        let config = ModelConfig {
            hidden_size: Some(64),
            num_attention_heads: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            config.head_dim_or_derived(),
            Err(RopeError::ZeroAttentionHeads { hidden_size: 64 })
        ));
    }

    #[test]
    fn standardize_builds_rope_parameters_from_legacy_fields() {
        let mut config = ModelConfig {
            rope_theta: Some(500000.0),
            partial_rotary_factor: Some(0.5),
            rope_scaling: Some(json!({"type": "linear", "factor": 2.0})),
            ..Default::default()
        };
        standardize_rope_params(&mut config);

        assert_eq!(
            config.rope_parameters,
            Some(json!({
                "rope_type": "linear",
                "factor": 2.0,
                "rope_theta": 500000.0,
                "partial_rotary_factor": 0.5
            }))
        );
    }

    #[test]
    fn standardize_keeps_existing_rope_parameters() {
        let existing = json!({"full": {"rope_theta": 5000}});
        let mut config = ModelConfig {
            rope_parameters: Some(existing.clone()),
            rope_theta: Some(8000.0),
            ..Default::default()
        };
        standardize_rope_params(&mut config);
        standardize_rope_params(&mut config);
        assert_eq!(config.rope_parameters, Some(existing));
    }
}
