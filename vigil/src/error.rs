use crate::{key::FieldKey, value::Kind};
use thiserror::Error;

/// Errors raised synchronously by the observation and reactivity runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Only plain objects and arrays can be observed
    #[error("cannot observe a value of kind {kind:?}")]
    InvalidTarget { kind: Kind },

    /// Strict mode is enabled and the mutation happened outside of an action
    #[error("{key} was mutated outside of an action while strict mode is enabled")]
    ActionRequired { key: FieldKey },

    /// Malformed arguments to a constructor or to the configuration
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
