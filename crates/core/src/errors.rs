use thiserror::Error;

/// Failures surfaced by the commerce collaborators (catalog, orders,
/// customers, payments). `NotFound` and `Invalid` are business
/// conditions the dispatcher turns into user-facing apologies;
/// `Storage` is infrastructure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Failures surfaced by the session store collaborator. Malformed
/// stored documents are not an error: they normalize to a fresh
/// session during lenient decode.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session store failure: {0}")]
    Backend(String),
}

/// Failures surfaced by the model backend. Classification and receipt
/// analysis absorb these into safe defaults; they never abort a turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model backend error: {0}")]
    Backend(String),
    #[error("model backend does not support `{0}`")]
    Unsupported(&'static str),
    #[error("model returned malformed output: {0}")]
    Malformed(String),
}
