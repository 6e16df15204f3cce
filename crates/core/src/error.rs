use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// The kinds of slow work the session hands off to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    FetchSchema,
    Generate,
    Execute,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connect => "connection",
            Self::FetchSchema => "schema fetch",
            Self::Generate => "SQL generation",
            Self::Execute => "query execution",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{operation} failed: {message}")]
    Failed { operation: Operation, message: String },
    #[error("{operation} timed out after {}s", after.as_secs())]
    TimedOut { operation: Operation, after: Duration },
}

impl CommandError {
    #[must_use]
    pub fn failed(operation: Operation, message: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Failed { operation, .. } | Self::TimedOut { operation, .. } => *operation,
        }
    }
}
