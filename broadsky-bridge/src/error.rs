use broadsky_zenoh::ZenohConfigError;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("{target} dial failure: {reason}")]
    Connection { target: String, reason: String },
    #[error("Encode error: {0}")]
    Encode(String),
    #[error("Publish to `{subject}` failed: {reason}")]
    Publish { subject: String, reason: String },
    #[error("{target} close failure: {reason}")]
    Close { target: String, reason: String },
}

impl BridgeError {
    pub fn connection<E>(target: impl Into<String>, error: E) -> BridgeError
    where
        E: std::fmt::Display,
    {
        BridgeError::Connection {
            target: target.into(),
            reason: error.to_string(),
        }
    }
}

impl From<ZenohConfigError> for BridgeError {
    fn from(value: ZenohConfigError) -> Self {
        match value {
            ZenohConfigError::Open(reason) => BridgeError::Connection {
                target: "zenoh".into(),
                reason,
            },
            other => BridgeError::Config(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(value: serde_json::Error) -> Self {
        BridgeError::Encode(value.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for BridgeError {
    fn from(value: ciborium::ser::Error<std::io::Error>) -> Self {
        BridgeError::Encode(value.to_string())
    }
}
