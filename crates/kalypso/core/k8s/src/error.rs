use kube::core::ErrorResponse;
use thiserror::Error;

pub type Result<T, E = Error> = ::core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Api(#[source] ::kube::Error),

    #[error("failed to convert an object: {0}")]
    Serde(#[from] ::serde_json::Error),

    #[error("kind is not registered: {0}")]
    UnregisteredKind(String),

    #[error("{name:?} is already controlled by {kind} {owner:?}")]
    OwnedByOther {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("object has no {0}")]
    MissingField(&'static str),

    #[error("{message}")]
    Step {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps the error with a human-readable message that is published
    /// through the resource status.
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::Step {
            message: message.into(),
            source: Box::new(self),
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict(_) => true,
            Self::Step { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub(crate) fn from_response(code: u16, reason: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => Self::NotFound(message),
            409 if reason == "AlreadyExists" => Self::AlreadyExists(message),
            409 => Self::Conflict(message),
            _ => Self::Api(::kube::Error::Api(ErrorResponse {
                status: "Failure".into(),
                message,
                reason: reason.into(),
                code,
            })),
        }
    }
}

impl From<::kube::Error> for Error {
    fn from(error: ::kube::Error) -> Self {
        match error {
            ::kube::Error::Api(response) if matches!(response.code, 404 | 409) => {
                Self::from_response(response.code, &response.reason, response.message)
            }
            error => Self::Api(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: u16, reason: &str) -> ::kube::Error {
        ::kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} for test"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn classify_api_responses() {
        assert!(Error::from(response(409, "Conflict")).is_conflict());
        assert!(Error::from(response(404, "NotFound")).is_not_found());
        assert!(matches!(
            Error::from(response(409, "AlreadyExists")),
            Error::AlreadyExists(_),
        ));
        assert!(matches!(
            Error::from(response(500, "InternalError")),
            Error::Api(_),
        ));
    }

    #[test]
    fn context_keeps_classification() {
        let error = Error::Conflict("stale".into()).context("Failed to reconcile Deployment");
        assert!(error.is_conflict());
        assert_eq!(error.to_string(), "Failed to reconcile Deployment");
    }
}
