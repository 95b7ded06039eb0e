use serde_json::{Map, Value};
use tch::{Device, Kind, Tensor};
use tracing::debug;

use crate::config::{ModelConfig, DEFAULT_PARTIAL_ROTARY_FACTOR, DEFAULT_ROPE_THETA};
use crate::error::{Result, RopeError};

/// Scalars the default rope initializer derives from a config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RopeParameters {
    pub base: f64,
    pub partial_rotary_factor: f64,
    /// Number of rotated channels per head, `head_dim * partial_rotary_factor` truncated.
    pub dim: i64,
}

fn numeric(name: &'static str, value: &Value) -> Result<f64> {
    value.as_f64().ok_or_else(|| RopeError::InvalidParameter {
        name,
        value: value.clone(),
    })
}

fn lookup(
    params: Option<&Map<String, Value>>,
    name: &'static str,
    fallback: Option<f64>,
    default: f64,
) -> Result<f64> {
    match params.and_then(|p| p.get(name)) {
        Some(value) => numeric(name, value),
        None => Ok(fallback.unwrap_or(default)),
    }
}

/// Resolves base, partial rotary factor and rotary dim.
///
/// The parameter source is `rope_parameters[layer_type]` when `rope_parameters`
/// is a mapping containing `layer_type`, otherwise `rope_parameters` itself, or
/// an empty mapping when the config has none. Keys missing from the source fall
/// back to the top-level config fields and then to the defaults. A source that
/// is not a mapping (legacy scalar layout) is skipped entirely.
pub fn resolve_rope_parameters(
    config: &ModelConfig,
    layer_type: Option<&str>,
) -> Result<RopeParameters> {
    let empty = Value::Object(Map::new());
    let source = match (&config.rope_parameters, layer_type) {
        (Some(Value::Object(per_layer)), Some(layer)) if per_layer.contains_key(layer) => {
            &per_layer[layer]
        }
        (Some(params), _) => params,
        (None, _) => &empty,
    };
    let params = source.as_object();

    let base = lookup(params, "rope_theta", config.rope_theta, DEFAULT_ROPE_THETA)?;
    let partial_rotary_factor = lookup(
        params,
        "partial_rotary_factor",
        config.partial_rotary_factor,
        DEFAULT_PARTIAL_ROTARY_FACTOR,
    )?;

    let head_dim = config.head_dim_or_derived()?;
    let dim = (head_dim as f64 * partial_rotary_factor) as i64;

    Ok(RopeParameters {
        base,
        partial_rotary_factor,
        dim,
    })
}

/// Inverse frequencies `1 / base^(2i / dim)` for the even exponents below `dim`.
pub fn inv_freq(base: f64, dim: i64, device: Device) -> Result<Tensor> {
    let steps =
        Tensor::f_arange_start_step(0, dim, 2, (Kind::Int64, device))?.to_kind(Kind::Float)
            / dim as f64;
    let base = steps.f_full_like(base)?;

    Ok(1.0 / base.f_pow(&steps)?)
}

/// The "default" rope initializer: plain inverse frequencies, attention scaling 1.0.
///
/// Runs the config's standardizer first when it has one. `seq_len` is part of
/// the initializer calling convention and does not affect the result.
pub fn compute_default_rope_parameters(
    config: &mut ModelConfig,
    device: Device,
    _seq_len: Option<i64>,
    layer_type: Option<&str>,
) -> Result<(Tensor, f64)> {
    if let Some(standardize) = config.standardize {
        standardize(config);
    }

    let params = resolve_rope_parameters(config, layer_type)?;
    debug!(
        base = params.base,
        partial_rotary_factor = params.partial_rotary_factor,
        dim = params.dim,
        layer_type,
        "computing default rope inv_freq"
    );

    let inv_freq = inv_freq(params.base, params.dim, device)?;
    Ok((inv_freq, 1.0))
}
