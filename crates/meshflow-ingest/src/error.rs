use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The payload was rejected before anything was written.
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl IngestError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
