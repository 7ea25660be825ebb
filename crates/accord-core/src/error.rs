//! Error types for Accord

use thiserror::Error;

/// Core Accord errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccordError {
    // Registry errors
    #[error("Section with key \"{0}\" already exists")]
    DuplicateSectionKey(String),

    #[error("Unknown section \"{0}\"")]
    UnknownSection(String),

    #[error("Dependency cycle detected in sections: {}", keys.join(", "))]
    DependencyCycle { keys: Vec<String> },

    // Write errors
    #[error("Section \"{0}\" does not support patch updates")]
    UnsupportedPatch(String),

    #[error("Cannot write derived section \"{0}\"")]
    DerivedSectionWrite(String),

    #[error("Effect depth {max_depth} exceeded while running effect for sections: {}", when.join(", "))]
    EffectRecursionExceeded { when: Vec<String>, max_depth: usize },

    // Orchestrator errors
    #[error("Orchestrator requires at least one instrument")]
    NoInstruments,

    #[error("Duplicate instrument id \"{0}\"")]
    DuplicateInstrument(String),

    #[error("Unknown write target \"{0}\"")]
    UnknownWriteTarget(String),

    #[error("Orchestrated adapter patch requires mergeable values")]
    UnsupportedOrchestratorPatch,

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Lifecycle errors
    #[error("Store has been destroyed")]
    Destroyed,
}

impl From<serde_json::Error> for AccordError {
    fn from(err: serde_json::Error) -> Self {
        AccordError::Serialization(err.to_string())
    }
}

/// Result type for Accord operations
pub type AccordResult<T> = Result<T, AccordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_every_key() {
        let err = AccordError::DependencyCycle {
            keys: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Dependency cycle detected in sections: a, b"
        );
    }

    #[test]
    fn test_serde_error_converts() {
        let err: AccordError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, AccordError::Serialization(_)));
    }
}
