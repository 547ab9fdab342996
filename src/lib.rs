//! # nebcore - scheduling queue, event broker and subscription channels
//!
//! nebcore is the in-process plumbing of a monitoring daemon. It decides what
//! runs next, tells interested modules what just happened, and streams
//! selected events to socket clients.
//!
//! ## Core Concepts
//!
//! - **PriorityQueue**: An indexed binary heap handing out generational handles
//! - **ScheduleQueue / EventList**: Timed events ordered by wall-clock run time
//! - **EventBroker**: Typed callback slots with priority-ordered fan-out
//! - **ModuleRegistry**: In-process modules that register callbacks through an injected context
//! - **ChannelRegistry**: Named channels activated only while someone subscribes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nebcore::broker::{callback, CallbackStatus, CallbackType, EventBroker, ModuleId};
//!
//! let broker = Arc::new(EventBroker::default());
//! broker.register_callback(
//!     CallbackType::HostCheckData,
//!     ModuleId::new(),
//!     0,
//!     callback(|_, data| {
//!         println!("event {}", data.kind());
//!         CallbackStatus::Continue
//!     }),
//! )?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;

// Queues
pub mod pqueue;
pub mod squeue;
pub mod timed;

// Broker and channels
pub mod broker;
pub mod nerd;

pub mod config;

pub use broker::{
    callback, BrokerOptions, Callback, CallbackStatus, CallbackType, DispatchSummary, EmitOutcome, EventBroker,
    EventData, Module, ModuleContext, ModuleId, ModuleRegistry,
};
pub use config::{DaemonConfig, ModuleSpec, NerdConfig, SchedulerConfig};
pub use error::{BrokerError, ChannelError, ConfigError, ErrorKind, ModuleError, NebError, NebResult, QueueError};
pub use nerd::{ChannelRegistry, NerdModule, NerdServer, SubscriberId};
pub use pqueue::{Handle, MaxFirst, MinFirst, PriorityOrder, PriorityQueue};
pub use squeue::{ScheduleHandle, ScheduleQueue};
pub use timed::{EventKind, EventList, TimedEvent};
