use thiserror::Error;

/// Error kinds for state, change, and selection operations.
///
/// Pure algebraic operations (change composition, position mapping, selection
/// normalisation) fail fast with `Bounds` or `SchemaViolation`; the extension
/// resolver fails fast with `Configuration`. None of these leave a state in a
/// partially-updated condition: every operation either returns a complete new
/// value or an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A position or range outside the document, or mismatched change-set
    /// lengths.
    #[error("out of bounds: {0}")]
    Bounds(String),
    /// An invalid extension configuration: duplicate compartment use, a
    /// cyclic slot dependency, or a facet value that fails validation.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Structurally invalid input: malformed JSON, an empty selection set,
    /// overlapping non-empty selection ranges.
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

impl From<core_text::TextError> for StateError {
    fn from(err: core_text::TextError) -> StateError {
        StateError::Bounds(err.to_string())
    }
}
