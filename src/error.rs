use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("gesture not found: {0}")]
    UnknownGesture(String),
    #[error("invalid value for {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
    #[error("profile not found: {0}")]
    ProfileNotFound(String),
    #[error("binding '{action}' is invalid: {reason}")]
    InvalidBinding { action: String, reason: String },
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("malformed landmark frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("hand has {0} landmarks, expected 21")]
    LandmarkCount(usize),
}
