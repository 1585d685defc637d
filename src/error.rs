use thiserror::Error;

/// Errors surfaced by the cache engine, codecs, and adapters.
///
/// Codec and adapter-lookup failures are configuration mistakes and are
/// reported eagerly rather than swallowed; store failures propagate to the
/// caller unretried. A loader reporting an absent entity is not an error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("field codec `{code}` is not registered")]
    UnknownCodec { code: String },
    #[error("field name `{name}` must not contain `:`")]
    InvalidFieldName { name: String },
    #[error("codec `{code}` cannot encode a {given} value")]
    Encode {
        code: &'static str,
        given: &'static str,
    },
    #[error("malformed cached payload: {message}")]
    Decode { message: String },
    #[error("duplicate field `{name}` after payload decode")]
    DuplicateField { name: String },
    #[error("field `{name}` is not present")]
    FieldNotPresent { name: String },
    #[error("no adapter registered for type `{type_name}` version `{version}`")]
    AdapterNotFound { type_name: String, version: String },
    #[error("adapter for type `{type_name}` version `{version}` has no {missing}")]
    AdapterIncomplete {
        type_name: String,
        version: String,
        missing: &'static str,
    },
    #[error("entity spec must carry a non-empty type name and primary key")]
    InvalidSpec,
    #[error("entity load failed: {0}")]
    Load(String),
    #[error("payload serialization failed: {0}")]
    Payload(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl CacheError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::Load(err.to_string())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn adapter_not_found(type_name: &str, version: &str) -> Self {
        Self::AdapterNotFound {
            type_name: type_name.to_string(),
            version: version.to_string(),
        }
    }

    pub(crate) fn adapter_incomplete(
        type_name: &str,
        version: &str,
        missing: &'static str,
    ) -> Self {
        Self::AdapterIncomplete {
            type_name: type_name.to_string(),
            version: version.to_string(),
            missing,
        }
    }
}

/// Errors from the key/value store backend.
///
/// The engine performs no retries; backends decide how much flakiness to
/// absorb before reporting.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
