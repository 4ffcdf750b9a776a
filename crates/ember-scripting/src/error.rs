//! Interpreter error types

use std::fmt;

/// Interpreter result type
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Interpreter error
#[derive(Debug, Clone)]
pub enum ScriptError {
    /// Module startup could not complete
    StartupFailed {
        /// Error message
        message: String,
    },

    /// An operation needs a started interpreter
    NotStarted,

    /// An operation needs an active request
    NoActiveRequest,

    /// A startup setting could not be applied
    InvalidSetting {
        /// Setting name
        key: String,
        /// Rejected value
        value: String,
    },

    /// Script compilation/parsing error
    CompilationError {
        /// Error message
        message: String,
        /// Line number if available
        line: Option<usize>,
        /// Column number if available
        column: Option<usize>,
    },

    /// Script runtime error
    RuntimeError {
        /// Error message
        message: String,
        /// Script line where error occurred
        line: Option<usize>,
    },

    /// IO error (reading script files)
    IoError {
        /// Error message
        message: String,
    },
}

impl ScriptError {
    /// Create a startup error
    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::StartupFailed {
            message: message.into(),
        }
    }

    /// Create a compilation error
    pub fn compilation<S: Into<String>>(message: S) -> Self {
        Self::CompilationError {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Create a runtime error
    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::RuntimeError {
            message: message.into(),
            line: None,
        }
    }

    /// Whether the interpreter never got to run the script
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::StartupFailed { .. } | Self::NotStarted | Self::InvalidSetting { .. }
        )
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartupFailed { message } => write!(f, "Interpreter startup failed: {}", message),
            Self::NotStarted => write!(f, "Interpreter not started"),
            Self::NoActiveRequest => write!(f, "No active request"),
            Self::InvalidSetting { key, value } => {
                write!(f, "Invalid value {:?} for setting {}", value, key)
            }
            Self::CompilationError {
                message,
                line,
                column,
            } => {
                write!(f, "Script compilation error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                    if let Some(col) = column {
                        write!(f, ", column {}", col)?;
                    }
                }
                Ok(())
            }
            Self::RuntimeError { message, line } => {
                write!(f, "Script runtime error: {}", message)?;
                if let Some(line) = line {
                    write!(f, " at line {}", line)?;
                }
                Ok(())
            }
            Self::IoError { message } => {
                write!(f, "Script IO error: {}", message)
            }
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<std::io::Error> for ScriptError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
        }
    }
}

impl From<rhai::ParseError> for ScriptError {
    fn from(err: rhai::ParseError) -> Self {
        let pos = err.position();
        Self::CompilationError {
            message: err.to_string(),
            line: pos.line(),
            column: pos.position(),
        }
    }
}

impl From<Box<rhai::EvalAltResult>> for ScriptError {
    fn from(err: Box<rhai::EvalAltResult>) -> Self {
        let pos = err.position();
        Self::RuntimeError {
            message: err.to_string(),
            line: pos.line(),
        }
    }
}

impl From<ScriptError> for ember_core::Error {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::NoActiveRequest => ember_core::Error::NoActiveRequest,
            err if err.is_startup() => ember_core::Error::StartupFailure(err.to_string()),
            err => ember_core::Error::Script(err.to_string()),
        }
    }
}
