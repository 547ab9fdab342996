//! Callback registration and dispatch.
//!
//! Each callback slot holds an immutable, priority-sorted list that is
//! replaced wholesale on every (de)registration. `make_callbacks` clones the
//! slot's `Arc` and releases the lock before invoking anything, so a
//! callback may register or deregister (itself included) without
//! deadlocking. Changes made during a walk take effect on the next one.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::BrokerError;

use super::callbacks::{CallbackStatus, CallbackType, DispatchSummary};
use super::emit::BrokerOptions;
use super::events::EventData;

/// A registered event handler.
pub type Callback = Arc<dyn Fn(CallbackType, &EventData<'_>) -> CallbackStatus + Send + Sync>;

/// Wraps a closure as a [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(CallbackType, &EventData<'_>) -> CallbackStatus + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of the module that owns a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(Uuid);

impl ModuleId {
    /// Create a new random module id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ModuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone)]
struct Registration {
    owner: ModuleId,
    priority: i32,
    callback: Callback,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

type Slot = Arc<[Registration]>;

fn lock_err(context: &'static str) -> BrokerError {
    BrokerError::Poisoned { context }
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn empty_slots() -> Vec<Slot> {
    CallbackType::ALL.iter().map(|_| Slot::from(Vec::new())).collect()
}

/// Typed callback registry with priority-ordered fan-out.
///
/// Dispatch order within a slot is ascending `priority`; registrations with
/// equal priority run in the order they were registered.
pub struct EventBroker {
    slots: RwLock<Vec<Slot>>,
    options: AtomicU32,
}

impl fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroker")
            .field("options", &self.options())
            .field("callbacks", &self.total_callbacks().unwrap_or(0))
            .finish()
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(BrokerOptions::EVERYTHING)
    }
}

impl EventBroker {
    /// Creates a broker with empty callback lists.
    #[must_use]
    pub fn new(options: BrokerOptions) -> Self {
        Self {
            slots: RwLock::new(empty_slots()),
            options: AtomicU32::new(options.bits()),
        }
    }

    /// Categories the emit wrappers currently broadcast.
    #[must_use]
    pub fn options(&self) -> BrokerOptions {
        BrokerOptions::from_bits(self.options.load(Ordering::Relaxed))
    }

    /// Replaces the broadcast category mask.
    pub fn set_options(&self, options: BrokerOptions) {
        self.options.store(options.bits(), Ordering::Relaxed);
    }

    /// Adds `callback` to the `callback_type` list on behalf of `owner`.
    ///
    /// The same callback (by identity) may appear at most once per slot.
    pub fn register_callback(
        &self,
        callback_type: CallbackType,
        owner: ModuleId,
        priority: i32,
        callback: Callback,
    ) -> Result<(), BrokerError> {
        let mut slots = self.slots.write().map_err(|_| lock_err("broker.register"))?;
        let current = &slots[callback_type.index()];

        if current.iter().any(|r| same_callback(&r.callback, &callback)) {
            return Err(BrokerError::DuplicateCallback { callback_type });
        }

        let mut next = Vec::new();
        next.try_reserve_exact(current.len() + 1)
            .map_err(|_| BrokerError::AllocationFailed { what: "callback" })?;

        let at = current
            .iter()
            .position(|r| r.priority > priority)
            .unwrap_or(current.len());
        next.extend_from_slice(&current[..at]);
        next.push(Registration {
            owner,
            priority,
            callback,
        });
        next.extend_from_slice(&current[at..]);

        slots[callback_type.index()] = Slot::from(next);
        debug!(callback_type = %callback_type, module = %owner, priority, "callback registered");
        Ok(())
    }

    /// Same as [`register_callback`](Self::register_callback) but takes the
    /// raw slot number a module ABI would pass.
    pub fn register_raw(&self, raw: i32, owner: ModuleId, priority: i32, callback: Callback) -> Result<(), BrokerError> {
        self.register_callback(CallbackType::from_raw(raw)?, owner, priority, callback)
    }

    /// Removes `callback` from the `callback_type` list.
    pub fn deregister_callback(&self, callback_type: CallbackType, callback: &Callback) -> Result<(), BrokerError> {
        let mut slots = self.slots.write().map_err(|_| lock_err("broker.deregister"))?;
        let current = &slots[callback_type.index()];

        let Some(at) = current.iter().position(|r| same_callback(&r.callback, callback)) else {
            return Err(BrokerError::CallbackNotFound { callback_type });
        };

        let mut next = Vec::new();
        next.try_reserve_exact(current.len() - 1)
            .map_err(|_| BrokerError::AllocationFailed { what: "callback" })?;
        next.extend_from_slice(&current[..at]);
        next.extend_from_slice(&current[at + 1..]);

        slots[callback_type.index()] = Slot::from(next);
        debug!(callback_type = %callback_type, "callback deregistered");
        Ok(())
    }

    /// Removes every registration owned by `owner`, across all slots, in one pass.
    ///
    /// Returns the number of registrations removed.
    pub fn deregister_module_callbacks(&self, owner: ModuleId) -> Result<usize, BrokerError> {
        let mut slots = self.slots.write().map_err(|_| lock_err("broker.deregister_module"))?;
        let mut removed = 0;

        for slot in slots.iter_mut() {
            let kept = slot.iter().filter(|r| r.owner != owner).count();
            if kept == slot.len() {
                continue;
            }
            removed += slot.len() - kept;
            let next: Vec<Registration> = slot.iter().filter(|r| r.owner != owner).cloned().collect();
            *slot = Slot::from(next);
        }

        if removed > 0 {
            debug!(module = %owner, removed, "module callbacks deregistered");
        }
        Ok(removed)
    }

    /// Invokes every callback registered for `callback_type`, in order, until
    /// one asks to stop.
    pub fn make_callbacks(&self, callback_type: CallbackType, data: &EventData<'_>) -> Result<DispatchSummary, BrokerError> {
        let list = {
            let slots = self.slots.read().map_err(|_| lock_err("broker.dispatch"))?;
            Arc::clone(&slots[callback_type.index()])
        };

        let mut summary = DispatchSummary::default();
        for reg in list.iter() {
            let status = (reg.callback)(callback_type, data);
            trace!(
                callback_type = %callback_type,
                n = summary.invoked + 1,
                code = status.code(),
                "callback returned"
            );
            if !summary.record(status) {
                break;
            }
        }
        Ok(summary)
    }

    /// Dispatches on the slot matching the payload.
    pub fn dispatch(&self, data: &EventData<'_>) -> Result<DispatchSummary, BrokerError> {
        self.make_callbacks(data.callback_type(), data)
    }

    /// Number of callbacks registered for one slot.
    pub fn callback_count(&self, callback_type: CallbackType) -> Result<usize, BrokerError> {
        let slots = self.slots.read().map_err(|_| lock_err("broker.count"))?;
        Ok(slots[callback_type.index()].len())
    }

    /// Number of callbacks registered across all slots.
    pub fn total_callbacks(&self) -> Result<usize, BrokerError> {
        let slots = self.slots.read().map_err(|_| lock_err("broker.count"))?;
        Ok(slots.iter().map(|s| s.len()).sum())
    }

    /// Number of registrations `owner` holds across all slots.
    pub fn module_callback_count(&self, owner: ModuleId) -> Result<usize, BrokerError> {
        let slots = self.slots.read().map_err(|_| lock_err("broker.count"))?;
        Ok(slots
            .iter()
            .flat_map(|s| s.iter())
            .filter(|r| r.owner == owner)
            .count())
    }

    /// Returns true if `callback` is registered for `callback_type`.
    pub fn is_registered(&self, callback_type: CallbackType, callback: &Callback) -> Result<bool, BrokerError> {
        let slots = self.slots.read().map_err(|_| lock_err("broker.lookup"))?;
        Ok(slots[callback_type.index()]
            .iter()
            .any(|r| same_callback(&r.callback, callback)))
    }

    /// Drops every registration in every slot.
    pub fn clear(&self) -> Result<(), BrokerError> {
        let mut slots = self.slots.write().map_err(|_| lock_err("broker.clear"))?;
        *slots = empty_slots();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::broker::callbacks::{NEBERROR_CALLBACKCANCEL, NEBERROR_CALLBACKOVERRIDE};
    use crate::broker::events::{EventMeta, ProcessData, NEBTYPE_PROCESS_START};

    fn process_event() -> EventData<'static> {
        EventData::Process(ProcessData {
            header: EventMeta::new(NEBTYPE_PROCESS_START).stamp(),
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str, status: CallbackStatus) -> Callback {
        let log = Arc::clone(log);
        callback(move |_, _| {
            log.lock().unwrap().push(tag);
            status
        })
    }

    #[test]
    fn test_priority_then_registration_order() {
        let broker = EventBroker::default();
        let owner = ModuleId::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (tag, pri) in [("a", 5), ("b", 1), ("c", 5), ("d", 0)] {
            broker
                .register_callback(CallbackType::ProcessData, owner, pri, recorder(&log, tag, CallbackStatus::Continue))
                .unwrap();
        }

        let summary = broker.make_callbacks(CallbackType::ProcessData, &process_event()).unwrap();
        assert_eq!(summary.invoked, 4);
        assert_eq!(summary.code(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_and_missing_callbacks_are_rejected() {
        let broker = EventBroker::default();
        let owner = ModuleId::new();
        let cb = callback(|_, _| CallbackStatus::Continue);

        broker.register_callback(CallbackType::LogData, owner, 0, Arc::clone(&cb)).unwrap();
        assert_eq!(
            broker.register_callback(CallbackType::LogData, owner, 3, Arc::clone(&cb)),
            Err(BrokerError::DuplicateCallback {
                callback_type: CallbackType::LogData
            })
        );
        // Same function on a different slot is fine.
        broker.register_callback(CallbackType::CommentData, owner, 0, Arc::clone(&cb)).unwrap();

        broker.deregister_callback(CallbackType::LogData, &cb).unwrap();
        assert_eq!(
            broker.deregister_callback(CallbackType::LogData, &cb),
            Err(BrokerError::CallbackNotFound {
                callback_type: CallbackType::LogData
            })
        );
        assert_eq!(broker.callback_count(CallbackType::CommentData).unwrap(), 1);
    }

    #[test]
    fn test_register_raw_bounds() {
        let broker = EventBroker::default();
        let cb = callback(|_, _| CallbackStatus::Continue);
        let err = broker.register_raw(18, ModuleId::new(), 0, cb).unwrap_err();
        assert!(matches!(err, BrokerError::CallbackOutOfRange { raw: 18, .. }));
        assert_eq!(broker.total_callbacks().unwrap(), 0);
    }

    #[test]
    fn test_stop_codes_end_the_walk() {
        for (stop, code) in [
            (CallbackStatus::Override, NEBERROR_CALLBACKOVERRIDE),
            (CallbackStatus::Cancel, NEBERROR_CALLBACKCANCEL),
        ] {
            let broker = EventBroker::default();
            let owner = ModuleId::new();
            let log = Arc::new(Mutex::new(Vec::new()));
            broker
                .register_callback(CallbackType::ProcessData, owner, 0, recorder(&log, "warn", CallbackStatus::Warning(2)))
                .unwrap();
            broker
                .register_callback(CallbackType::ProcessData, owner, 1, recorder(&log, "stop", stop))
                .unwrap();
            broker
                .register_callback(CallbackType::ProcessData, owner, 2, recorder(&log, "never", CallbackStatus::Continue))
                .unwrap();

            let summary = broker.dispatch(&process_event()).unwrap();
            assert_eq!(summary.invoked, 2);
            assert_eq!(summary.code(), code);
            assert_eq!(summary.warnings, 2);
            assert_eq!(*log.lock().unwrap(), vec!["warn", "stop"]);
        }
    }

    #[test]
    fn test_module_bulk_deregistration() {
        let broker = EventBroker::default();
        let keep = ModuleId::new();
        let gone = ModuleId::new();

        for t in [CallbackType::HostCheckData, CallbackType::ServiceCheckData, CallbackType::LogData] {
            broker.register_callback(t, gone, 0, callback(|_, _| CallbackStatus::Continue)).unwrap();
        }
        broker
            .register_callback(CallbackType::LogData, keep, 0, callback(|_, _| CallbackStatus::Continue))
            .unwrap();

        assert_eq!(broker.module_callback_count(gone).unwrap(), 3);
        assert_eq!(broker.deregister_module_callbacks(gone).unwrap(), 3);
        assert_eq!(broker.module_callback_count(gone).unwrap(), 0);
        assert_eq!(broker.total_callbacks().unwrap(), 1);
        assert_eq!(broker.deregister_module_callbacks(gone).unwrap(), 0);
    }

    #[test]
    fn test_callback_may_deregister_itself_mid_dispatch() {
        let broker = Arc::new(EventBroker::default());
        let owner = ModuleId::new();
        let hits = Arc::new(Mutex::new(0u32));

        let slot: Arc<Mutex<Option<Callback>>> = Arc::new(Mutex::new(None));
        let cb = {
            let broker = Arc::clone(&broker);
            let hits = Arc::clone(&hits);
            let slot = Arc::clone(&slot);
            callback(move |t, _| {
                *hits.lock().unwrap() += 1;
                if let Some(me) = slot.lock().unwrap().take() {
                    broker.deregister_callback(t, &me).unwrap();
                }
                CallbackStatus::Continue
            })
        };
        *slot.lock().unwrap() = Some(Arc::clone(&cb));
        broker.register_callback(CallbackType::ProcessData, owner, 0, cb).unwrap();

        broker.dispatch(&process_event()).unwrap();
        broker.dispatch(&process_event()).unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(broker.total_callbacks().unwrap(), 0);
    }

    #[test]
    fn test_clear_empties_every_slot() {
        let broker = EventBroker::default();
        let owner = ModuleId::new();
        for t in CallbackType::ALL {
            broker.register_callback(t, owner, 0, callback(|_, _| CallbackStatus::Continue)).unwrap();
        }
        assert_eq!(broker.total_callbacks().unwrap(), CallbackType::NUM_ITEMS);
        broker.clear().unwrap();
        assert_eq!(broker.total_callbacks().unwrap(), 0);
        let summary = broker.dispatch(&process_event()).unwrap();
        assert_eq!(summary.invoked, 0);
    }
}
