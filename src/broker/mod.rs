//! Event broker: typed callback registration and fan-out.
//!
//! Modules register callbacks against one of a fixed set of slots; the core
//! emits events through the per-category wrappers in [`emit`], which gate on
//! [`BrokerOptions`] and hand a borrowed payload to every callback in the slot.

/// Callback slots, return codes and dispatch summaries.
pub mod callbacks;
/// Per-category emit wrappers and the broadcast option mask.
pub mod emit;
/// Event payloads and `NEBTYPE`/`NEBFLAG`/`NEBATTR` constants.
pub mod events;
/// In-process modules and their registry.
pub mod module;
/// Callback registry and dispatch.
pub mod registry;

pub use callbacks::{
    CallbackStatus, CallbackType, DispatchSummary, NEBERROR_CALLBACKCANCEL, NEBERROR_CALLBACKOVERRIDE, NEB_ERROR, NEB_OK,
};
pub use emit::{BrokerOptions, CheckRun, CommentInfo, DowntimeInfo, EmitOutcome, NotificationInfo, TimedEventInfo};
pub use events::{
    CommandRef, CommandRun, EventData, EventHeader, EventMeta, HostCheckData, HostRecord, ServiceCheckData, ServiceRecord,
    Subject,
};
pub use module::{
    EventLogger, LoadFlags, Module, ModuleContext, ModuleInfo, ModuleInfoKind, ModuleRegistry, ModuleStatus, UnloadFlags,
    UnloadReason,
};
pub use registry::{callback, Callback, EventBroker, ModuleId};
