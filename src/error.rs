use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealRecordError {
    #[error("Malformed fragment at '{path}': {details}")]
    MalformedFragment { path: String, details: String },

    #[error("Extraction failed for section {section}: {reason}")]
    ExtractionFailure { section: String, reason: String },

    #[error("Incomplete record: missing required fields {}", missing.join(", "))]
    IncompleteRecord { missing: Vec<String> },

    #[error("No record stored for deal: {0}")]
    RecordNotFound(String),

    #[error("Invalid deal identifier: {0}")]
    InvalidDealId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[cfg(feature = "llm")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl DealRecordError {
    pub fn malformed(path: impl Into<String>, details: impl Into<String>) -> Self {
        Self::MalformedFragment {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Terminal errors end the run; everything else degrades a single section.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::MalformedFragment { .. } | Self::ExtractionFailure { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DealRecordError>;
