//! Rules engine error types.

use semstreams_model::{Classified, ErrorClass};

/// Errors raised while building or evaluating rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The declarative configuration is invalid.
    #[error("invalid rule config for {rule:?}: {reason}")]
    InvalidConfig {
        /// The rule id.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No factory is registered for the rule type.
    #[error("unknown rule type {0:?}")]
    UnknownType(String),

    /// Two operands could not be compared.
    #[error(transparent)]
    Compare(#[from] semstreams_model::value::CompareError),
}

impl Classified for RuleError {
    fn class(&self) -> ErrorClass {
        ErrorClass::InvalidInput
    }
}
