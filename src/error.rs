use crate::data::Shape;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine. None of them are retried, they are all handed
/// straight back to the caller.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Dimensions or parameters that cannot describe a valid structure.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A layer is incompatible with the one below it.
    #[error("Layer {index} is incompatible with the layer below: expected an input of {expected} but received {received}")]
    Incompatible {
        index: usize,
        expected: Shape,
        received: Shape,
    },

    /// A kind tag that doesn't name any registered constructor.
    #[error("Unknown {family} kind '{tag}'")]
    UnknownKind { family: &'static str, tag: String },

    /// The operation makes no sense for this kind of unit.
    #[error("{unit} units do not support {operation}")]
    Unsupported {
        operation: &'static str,
        unit: &'static str,
    },

    /// A closed-form solver produced non-finite values.
    #[error("Non-finite values appeared while computing {stage}")]
    Numerical { stage: &'static str },

    /// The unit still waits for its one-time closed-form fit.
    #[error("{unit} unit is not trained yet, call training_done first")]
    NotTrained { unit: &'static str },

    /// A collection which must contain at least one element was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn unsupported(operation: &'static str, unit: &'static str) -> Self {
        Error::Unsupported { operation, unit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_reports_index_and_shapes() {
        let err = Error::Incompatible {
            index: 2,
            expected: Shape::new(3, 3, 4),
            received: Shape::new(3, 3, 5),
        };
        let msg = err.to_string();
        assert!(msg.contains("Layer 2"), "{}", msg);
        assert!(msg.contains("3x3x4"), "{}", msg);
    }
}
