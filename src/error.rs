use thiserror::Error;

#[derive(Debug, Error)]
pub enum RopeError {
    #[error("failed to read model config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse model config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rope parameter `{name}` must be numeric, got {value}")]
    InvalidParameter {
        name: &'static str,
        value: serde_json::Value,
    },

    #[error("num_attention_heads is zero, cannot derive head_dim from hidden_size {hidden_size}")]
    ZeroAttentionHeads { hidden_size: i64 },

    #[error("tensor operation failed: {0}")]
    Tensor(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, RopeError>;
