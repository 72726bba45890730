/// Failure kinds callers are expected to tell apart.
///
/// These travel inside `anyhow::Error`; recover them with
/// `err.downcast_ref::<ZebedeeError>()`. Plain I/O failures are not listed
/// here and stay as context-wrapped `anyhow` errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZebedeeError {
    #[error("invalid input: {0}")]
    Configuration(String),

    #[error("collection already exists: {name}")]
    AlreadyExists { name: String },

    #[error("collection not found: {name}")]
    CollectionNotFound { name: String },

    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("{uri} is blocked by collection {collection}")]
    Blocked { collection: String, uri: String },
}

impl ZebedeeError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::AlreadyExists { .. } => "already_exists",
            Self::CollectionNotFound { .. } => "collection_not_found",
            Self::NotFound { .. } => "not_found",
            Self::Blocked { .. } => "blocked",
        }
    }
}

/// Extract the typed kind from an `anyhow` chain, if there is one.
pub fn error_kind(err: &anyhow::Error) -> Option<&ZebedeeError> {
    err.chain().find_map(|cause| cause.downcast_ref::<ZebedeeError>())
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{ZebedeeError, error_kind};

    #[test]
    fn error_kind_survives_added_context() {
        let err = Err::<(), _>(ZebedeeError::Blocked {
            collection: "other".to_string(),
            uri: "/econ/page1/data.json".to_string(),
        })
        .context("move aborted")
        .expect_err("must fail");

        let kind = error_kind(&err).expect("typed kind");
        assert_eq!(kind.kind(), "blocked");
        assert!(format!("{err:#}").contains("blocked by collection other"));
    }
}
