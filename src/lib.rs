//! Default rotary position embedding initializer for hosts whose rope
//! initializer registry no longer ships a `"default"` entry, plus the
//! environment advisor behind the `install_flash_attn` binary.

pub mod advisor;
pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod rope;

pub use config::ModelConfig;
pub use error::RopeError;
pub use registry::{
    ensure_default_registered, patch_rope_init_functions, rope_init_functions, RopeInitFn,
    RopeInitRegistry,
};
pub use rope::compute_default_rope_parameters;
