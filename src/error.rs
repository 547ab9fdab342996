//! Error types for nebcore.
//!
//! All errors in nebcore are strongly typed using thiserror.
//! Each subsystem owns one enum; `NebError` wraps them for callers that
//! drive several subsystems at once (the daemon shell, module loaders).

use std::path::PathBuf;

use thiserror::Error;

use crate::broker::CallbackType;
use crate::nerd::SubscriberId;

/// Errors raised by the priority queue and the scheduling queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue growth failed: could not reserve {requested} more slots")]
    AllocationFailed {
        requested: usize,
    },

    #[error("Queue handle {index}:{generation} does not refer to a queued element")]
    NotFound {
        index: u32,
        generation: u32,
    },
}

/// Errors raised by the callback registry and the module registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Callback type {raw} is out of range [0, {max})")]
    CallbackOutOfRange {
        raw: i32,
        max: usize,
    },

    #[error("Callback is already registered for {callback_type}")]
    DuplicateCallback {
        callback_type: CallbackType,
    },

    #[error("Callback not found for {callback_type}")]
    CallbackNotFound {
        callback_type: CallbackType,
    },

    #[error("Allocation failed while growing the {what} list")]
    AllocationFailed {
        what: &'static str,
    },

    #[error("Poisoned lock: {context}")]
    Poisoned {
        context: &'static str,
    },
}

/// Errors raised while loading, initializing or unloading modules.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module not found: {name}")]
    NotFound {
        name: String,
    },

    #[error("Module '{name}' is not marked to be loaded")]
    NotLoadable {
        name: String,
    },

    #[error("Module '{name}' failed to initialize: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    #[error("Module '{name}' refused to unload: {reason}")]
    UnloadRefused {
        name: String,
        reason: String,
    },

    #[error("Module '{name}' failed: {reason}")]
    Failed {
        name: String,
        reason: String,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

impl ModuleError {
    /// Builds the error a module returns from its own `init`/`deinit`.
    #[must_use]
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by the subscription channel registry.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Bad request: {reason}")]
    BadRequest {
        reason: String,
    },

    #[error("Unknown channel: {name}")]
    UnknownChannel {
        name: String,
    },

    #[error("Channel id {id} is out of range")]
    ChannelOutOfRange {
        id: usize,
    },

    #[error("Subscriber {id} is not connected")]
    UnknownSubscriber {
        id: SubscriberId,
    },

    #[error("Subscriber limit of {max} reached")]
    Full {
        max: usize,
    },

    #[error("Channel '{name}' could not activate its callbacks: {source}")]
    Activation {
        name: String,
        #[source]
        source: BrokerError,
    },

    #[error("Poisoned lock: {context}")]
    Poisoned {
        context: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Numeric request status, in the HTTP-like convention the line protocol uses.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } | Self::UnknownChannel { .. } => 400,
            Self::Full { .. } => 503,
            _ => 500,
        }
    }
}

/// Errors raised while loading daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        field: String,
        reason: String,
    },
}

/// Coarse classification shared by every nebcore error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Memory could not be reserved; nothing was mutated.
    AllocationFailed,
    /// The referenced element, callback, module, channel or subscriber is absent.
    NotFound,
    /// The caller passed something out of range, duplicated or malformed.
    InvalidArgument,
    /// I/O, lock poisoning or another environment failure.
    Internal,
}

/// Top-level error type for nebcore.
#[derive(Debug, Error)]
pub enum NebError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NebError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Queue(QueueError::AllocationFailed { .. })
            | Self::Broker(BrokerError::AllocationFailed { .. })
            | Self::Module(ModuleError::Broker(BrokerError::AllocationFailed { .. })) => {
                ErrorKind::AllocationFailed
            }
            Self::Queue(QueueError::NotFound { .. })
            | Self::Broker(BrokerError::CallbackNotFound { .. })
            | Self::Module(ModuleError::NotFound { .. } | ModuleError::Broker(BrokerError::CallbackNotFound { .. }))
            | Self::Channel(ChannelError::UnknownChannel { .. } | ChannelError::UnknownSubscriber { .. }) => {
                ErrorKind::NotFound
            }
            Self::Broker(BrokerError::CallbackOutOfRange { .. } | BrokerError::DuplicateCallback { .. })
            | Self::Module(
                ModuleError::NotLoadable { .. }
                | ModuleError::Broker(BrokerError::CallbackOutOfRange { .. } | BrokerError::DuplicateCallback { .. }),
            )
            | Self::Channel(
                ChannelError::BadRequest { .. } | ChannelError::ChannelOutOfRange { .. } | ChannelError::Full { .. },
            )
            | Self::Config(ConfigError::Parse(_) | ConfigError::Invalid { .. }) => ErrorKind::InvalidArgument,
            _ => ErrorKind::Internal,
        }
    }

    /// Returns true if this is an allocation failure.
    #[must_use]
    pub fn is_allocation_failure(&self) -> bool {
        self.kind() == ErrorKind::AllocationFailed
    }

    /// Returns true if the referenced object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if the caller supplied an invalid argument.
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for nebcore operations.
pub type NebResult<T> = Result<T, NebError>;
