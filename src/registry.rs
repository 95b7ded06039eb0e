use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock, PoisonError};

use tch::{Device, Tensor};
use tracing::{debug, info};

use crate::config::ModelConfig;
use crate::error::Result;
use crate::rope::compute_default_rope_parameters;

pub const DEFAULT_ROPE_TYPE: &str = "default";

/// Initializer calling convention: `(config, device, seq_len, layer_type) -> (inv_freq, attention_scaling)`.
pub type RopeInitFn =
    fn(&mut ModelConfig, Device, Option<i64>, Option<&str>) -> Result<(Tensor, f64)>;

/// Rope initializers keyed by rope type name.
#[derive(Debug, Clone, Default)]
pub struct RopeInitRegistry {
    functions: BTreeMap<String, RopeInitFn>,
}

impl RopeInitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<RopeInitFn> {
        self.functions.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Inserts `init` under `name` unless the name is taken. Returns whether it was inserted.
    pub fn insert_if_absent(&mut self, name: &str, init: RopeInitFn) -> bool {
        if self.functions.contains_key(name) {
            return false;
        }
        self.functions.insert(name.to_string(), init);
        true
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

/// Registers [`compute_default_rope_parameters`] as `"default"` unless an entry exists.
pub fn ensure_default_registered(registry: &mut RopeInitRegistry) -> bool {
    let inserted = registry.insert_if_absent(DEFAULT_ROPE_TYPE, compute_default_rope_parameters);
    if inserted {
        info!("registered default rope initializer");
    } else {
        debug!("default rope initializer already present");
    }
    inserted
}

/// Process-wide registry shared by every caller of [`patch_rope_init_functions`].
pub fn rope_init_functions() -> &'static Mutex<RopeInitRegistry> {
    static FUNCTIONS: OnceLock<Mutex<RopeInitRegistry>> = OnceLock::new();
    FUNCTIONS.get_or_init(|| Mutex::new(RopeInitRegistry::new()))
}

/// Makes sure the process-wide registry has a `"default"` initializer.
pub fn patch_rope_init_functions() {
    let mut registry = rope_init_functions()
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    ensure_default_registered(&mut registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel(
        _config: &mut ModelConfig,
        device: Device,
        _seq_len: Option<i64>,
        _layer_type: Option<&str>,
    ) -> Result<(Tensor, f64)> {
        Ok((Tensor::zeros([1], (tch::Kind::Float, device)), 42.0))
    }

    #[test]
    fn registers_default_once() {
        let mut registry = RopeInitRegistry::new();
        assert!(ensure_default_registered(&mut registry));
        assert!(!ensure_default_registered(&mut registry));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["default"]);
    }

    #[test]
    fn existing_default_is_kept() {
        let mut registry = RopeInitRegistry::new();
        registry.insert_if_absent(DEFAULT_ROPE_TYPE, sentinel);

        assert!(!ensure_default_registered(&mut registry));

        let init = registry.get(DEFAULT_ROPE_TYPE).unwrap();
        let mut config = ModelConfig::default();
        let (_, scaling) = init(&mut config, Device::Cpu, None, None).unwrap();
        assert_eq!(scaling, 42.0);
    }

    #[test]
    fn other_entries_are_untouched() {
        let mut registry = RopeInitRegistry::new();
        registry.insert_if_absent("linear", sentinel);
        ensure_default_registered(&mut registry);

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("linear"));
        assert!(registry.contains(DEFAULT_ROPE_TYPE));
    }

    #[test]
    fn global_patch_is_idempotent() {
        patch_rope_init_functions();
        patch_rope_init_functions();

        let registry = rope_init_functions().lock().unwrap();
        assert!(registry.contains(DEFAULT_ROPE_TYPE));
        assert_eq!(registry.names().filter(|n| *n == DEFAULT_ROPE_TYPE).count(), 1);
    }
}
