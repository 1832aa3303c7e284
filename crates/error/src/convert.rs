use crate::{ErrorCode, MeridianError};

impl From<std::io::Error> for MeridianError {
    fn from(err: std::io::Error) -> Self {
        MeridianError::new(ErrorCode::Internal, err.to_string())
    }
}

impl From<serde_json::Error> for MeridianError {
    fn from(err: serde_json::Error) -> Self {
        MeridianError::new(ErrorCode::SerializationFailed, err.to_string())
    }
}
