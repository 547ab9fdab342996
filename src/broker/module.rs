//! In-process broker modules.
//!
//! A module is any type implementing [`Module`]. It is handed a
//! [`ModuleContext`] during `init` and registers its callbacks through it;
//! those registrations are tagged with the module's id so unloading removes
//! all of them in one pass over the broker.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BrokerError, ModuleError};

use super::callbacks::{CallbackStatus, CallbackType};
use super::events::EventData;
use super::registry::{callback, Callback, EventBroker, ModuleId};

/// Flags passed to [`Module::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum LoadFlags {
    #[default]
    Normal = 0,
}

/// Flags passed to [`Module::deinit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum UnloadFlags {
    /// The module may refuse.
    #[default]
    Request = 0,
    /// The module is unloaded regardless of what `deinit` returns.
    Force = 1,
}

/// Why a module is being unloaded.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum UnloadReason {
    NebShutdown = 1,
    NebRestart = 2,
    ErrorNoInit = 3,
    ErrorBadInit = 4,
    ErrorApiVersion = 5,
}

/// Descriptive fields a module may publish about itself.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleInfoKind {
    Title,
    Author,
    Copyright,
    Version,
    License,
    Desc,
}

/// Descriptive strings a module publishes about itself.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub title: Option<String>,
    pub author: Option<String>,
    pub copyright: Option<String>,
    pub version: Option<String>,
    pub license: Option<String>,
    pub desc: Option<String>,
}

impl ModuleInfo {
    fn field_mut(&mut self, kind: ModuleInfoKind) -> &mut Option<String> {
        match kind {
            ModuleInfoKind::Title => &mut self.title,
            ModuleInfoKind::Author => &mut self.author,
            ModuleInfoKind::Copyright => &mut self.copyright,
            ModuleInfoKind::Version => &mut self.version,
            ModuleInfoKind::License => &mut self.license,
            ModuleInfoKind::Desc => &mut self.desc,
        }
    }

    /// Sets one field.
    pub fn set(&mut self, kind: ModuleInfoKind, text: impl Into<String>) {
        *self.field_mut(kind) = Some(text.into());
    }

    /// Reads one field.
    #[must_use]
    pub fn get(&self, kind: ModuleInfoKind) -> Option<&str> {
        match kind {
            ModuleInfoKind::Title => self.title.as_deref(),
            ModuleInfoKind::Author => self.author.as_deref(),
            ModuleInfoKind::Copyright => self.copyright.as_deref(),
            ModuleInfoKind::Version => self.version.as_deref(),
            ModuleInfoKind::License => self.license.as_deref(),
            ModuleInfoKind::Desc => self.desc.as_deref(),
        }
    }
}

/// Handle a module uses during `init` to reach the broker.
pub struct ModuleContext<'a> {
    id: ModuleId,
    name: &'a str,
    broker: &'a Arc<EventBroker>,
    info: &'a mut ModuleInfo,
}

impl ModuleContext<'_> {
    /// Id the module's registrations are tagged with.
    #[must_use]
    pub const fn module_id(&self) -> ModuleId {
        self.id
    }

    /// Name the module was added under.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name
    }

    /// Shared broker handle, for modules that deregister individual callbacks later.
    #[must_use]
    pub fn broker(&self) -> Arc<EventBroker> {
        Arc::clone(self.broker)
    }

    /// Registers `callback` for `callback_type` on behalf of this module.
    pub fn register_callback(
        &mut self,
        callback_type: CallbackType,
        priority: i32,
        callback: Callback,
    ) -> Result<(), BrokerError> {
        self.broker.register_callback(callback_type, self.id, priority, callback)
    }

    /// Removes one of this module's registrations.
    pub fn deregister_callback(&mut self, callback_type: CallbackType, callback: &Callback) -> Result<(), BrokerError> {
        self.broker.deregister_callback(callback_type, callback)
    }

    /// Publishes one descriptive string for this module.
    pub fn set_info(&mut self, kind: ModuleInfoKind, text: impl Into<String>) {
        self.info.set(kind, text);
    }
}

/// Entry points of a broker module.
pub trait Module: Send + Sync {
    /// Called once when the module is loaded. Returning an error unloads it
    /// again without calling [`deinit`](Self::deinit).
    fn init(&self, flags: LoadFlags, args: Option<&str>, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleError>;

    /// Called before the module's callbacks are removed. An error refuses the
    /// unload unless `flags` is [`UnloadFlags::Force`].
    fn deinit(&self, _flags: UnloadFlags, _reason: UnloadReason) -> Result<(), ModuleError> {
        Ok(())
    }
}

struct ModuleEntry {
    id: ModuleId,
    name: String,
    args: Option<String>,
    module: Arc<dyn Module>,
    should_be_loaded: bool,
    is_loaded: bool,
    core: bool,
    info: ModuleInfo,
}

/// Read-only view of one registered module.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    pub id: ModuleId,
    pub name: String,
    pub args: Option<String>,
    pub is_loaded: bool,
    pub core: bool,
}

/// Owns every module and their load state.
pub struct ModuleRegistry {
    broker: Arc<EventBroker>,
    modules: Vec<ModuleEntry>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    /// An empty registry whose modules register with `broker`.
    #[must_use]
    pub fn new(broker: Arc<EventBroker>) -> Self {
        Self {
            broker,
            modules: Vec::new(),
        }
    }

    /// Broker the modules register with.
    #[must_use]
    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    /// Adds a module to be loaded later by [`load_module`](Self::load_module)
    /// or [`load_all`](Self::load_all).
    pub fn add_module(&mut self, name: impl Into<String>, args: Option<String>, module: Arc<dyn Module>) -> ModuleId {
        let id = ModuleId::new();
        let name = name.into();
        info!(module = %name, "added module");
        self.modules.push(ModuleEntry {
            id,
            name,
            args,
            module,
            should_be_loaded: true,
            is_loaded: false,
            core: false,
            info: ModuleInfo::default(),
        });
        id
    }

    /// Adds a module built into the daemon. It counts as loaded immediately
    /// and `init` is never called; the caller registers its callbacks with
    /// the returned id.
    pub fn add_core_module(&mut self, name: impl Into<String>, module: Arc<dyn Module>) -> ModuleId {
        let id = ModuleId::new();
        let name = name.into();
        debug!(module = %name, "added core module");
        self.modules.push(ModuleEntry {
            id,
            name,
            args: None,
            module,
            should_be_loaded: false,
            is_loaded: true,
            core: true,
            info: ModuleInfo::default(),
        });
        id
    }

    fn entry_mut(&mut self, id: ModuleId) -> Result<&mut ModuleEntry, ModuleError> {
        self.modules.iter_mut().find(|m| m.id == id).ok_or_else(|| ModuleError::NotFound {
            name: id.to_string(),
        })
    }

    /// Looks a module up by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ModuleId> {
        self.modules.iter().find(|m| m.name == name).map(|m| m.id)
    }

    /// Initializes one module. Already-loaded modules are left alone.
    pub fn load_module(&mut self, id: ModuleId) -> Result<(), ModuleError> {
        let broker = Arc::clone(&self.broker);
        let entry = self.entry_mut(id)?;

        if entry.is_loaded {
            return Ok(());
        }
        if !entry.should_be_loaded {
            return Err(ModuleError::NotLoadable {
                name: entry.name.clone(),
            });
        }

        let mut ctx = ModuleContext {
            id: entry.id,
            name: &entry.name,
            broker: &broker,
            info: &mut entry.info,
        };
        let result = entry.module.init(LoadFlags::Normal, entry.args.as_deref(), &mut ctx);

        match result {
            Ok(()) => {
                entry.is_loaded = true;
                info!(module = %entry.name, "module loaded and initialized");
                Ok(())
            }
            Err(err) => {
                let name = entry.name.clone();
                warn!(module = %name, error = %err, "module init failed, unloading");
                // Partially registered callbacks must not outlive a failed init.
                broker.deregister_module_callbacks(id)?;
                entry.is_loaded = false;
                Err(ModuleError::InitFailed {
                    name,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Loads every module marked to be loaded. Failures are logged and
    /// counted; loading continues with the next module.
    pub fn load_all(&mut self) -> usize {
        let pending: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|m| m.should_be_loaded && !m.is_loaded)
            .map(|m| m.id)
            .collect();

        let mut failed = 0;
        for id in pending {
            if let Err(err) = self.load_module(id) {
                warn!(error = %err, "failed to load module");
                failed += 1;
            }
        }
        failed
    }

    /// Calls `deinit` and removes every callback the module registered.
    ///
    /// A module that is not loaded is left alone.
    pub fn unload_module(&mut self, id: ModuleId, flags: UnloadFlags, reason: UnloadReason) -> Result<(), ModuleError> {
        let broker = Arc::clone(&self.broker);
        let entry = self.entry_mut(id)?;

        if !entry.is_loaded {
            return Ok(());
        }

        if let Err(err) = entry.module.deinit(flags, reason) {
            if flags != UnloadFlags::Force {
                warn!(module = %entry.name, error = %err, "module refused to unload");
                return Err(ModuleError::UnloadRefused {
                    name: entry.name.clone(),
                    reason: err.to_string(),
                });
            }
            warn!(module = %entry.name, error = %err, "module deinit failed, forcing unload");
        }

        let removed = broker.deregister_module_callbacks(id)?;
        entry.is_loaded = false;
        info!(module = %entry.name, ?reason, removed, "module unloaded");
        Ok(())
    }

    /// Unloads every loaded module, most recently added first. Returns the
    /// number of modules that stayed loaded.
    pub fn unload_all(&mut self, flags: UnloadFlags, reason: UnloadReason) -> usize {
        let loaded: Vec<ModuleId> = self.modules.iter().rev().filter(|m| m.is_loaded).map(|m| m.id).collect();

        let mut refused = 0;
        for id in loaded {
            if let Err(err) = self.unload_module(id, flags, reason) {
                warn!(error = %err, "failed to unload module");
                refused += 1;
            }
        }
        refused
    }

    /// Sets one descriptive field of a module.
    pub fn set_module_info(&mut self, id: ModuleId, kind: ModuleInfoKind, text: impl Into<String>) -> Result<(), ModuleError> {
        self.entry_mut(id)?.info.set(kind, text);
        Ok(())
    }

    /// Descriptive strings of a module.
    #[must_use]
    pub fn module_info(&self, id: ModuleId) -> Option<&ModuleInfo> {
        self.modules.iter().find(|m| m.id == id).map(|m| &m.info)
    }

    /// Whether `id` is registered and currently loaded.
    #[must_use]
    pub fn is_loaded(&self, id: ModuleId) -> bool {
        self.modules.iter().any(|m| m.id == id && m.is_loaded)
    }

    /// Every registered module in insertion order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleStatus> + '_ {
        self.modules.iter().map(|m| ModuleStatus {
            id: m.id,
            name: m.name.clone(),
            args: m.args.clone(),
            is_loaded: m.is_loaded,
            core: m.core,
        })
    }
}

/// Built-in module that writes check results and process events to the log.
///
/// Args: an optional comma-separated list of `hosts`, `services`, `process`
/// (all three when absent).
#[derive(Debug, Default)]
pub struct EventLogger;

impl EventLogger {
    fn log_event(callback_type: CallbackType, data: &EventData<'_>) -> CallbackStatus {
        match data {
            EventData::HostCheck(d) => info!(
                host = d.host_name,
                state = d.state,
                kind = d.header.kind,
                output = d.run.output.unwrap_or(""),
                "host check"
            ),
            EventData::ServiceCheck(d) => info!(
                host = d.host_name,
                service = d.service_description,
                state = d.state,
                kind = d.header.kind,
                output = d.run.output.unwrap_or(""),
                "service check"
            ),
            other => info!(callback_type = %callback_type, kind = other.kind(), "broker event"),
        }
        CallbackStatus::Continue
    }
}

impl Module for EventLogger {
    fn init(&self, _flags: LoadFlags, args: Option<&str>, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleError> {
        ctx.set_info(ModuleInfoKind::Title, "event logger");
        ctx.set_info(ModuleInfoKind::Desc, "Logs broker events through tracing");

        let wanted = args.unwrap_or("hosts,services,process");
        let cb = callback(Self::log_event);
        for item in wanted.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let callback_type = match item {
                "hosts" => CallbackType::HostCheckData,
                "services" => CallbackType::ServiceCheckData,
                "process" => CallbackType::ProcessData,
                other => {
                    return Err(ModuleError::failed(ctx.name(), format!("unknown event class '{other}'")));
                }
            };
            ctx.register_callback(callback_type, 0, Arc::clone(&cb))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::broker::events::{EventMeta, NEBTYPE_PROCESS_START};

    #[derive(Default)]
    struct Recorder {
        fail_init: bool,
        refuse_unload: bool,
        deinits: AtomicUsize,
    }

    impl Module for Recorder {
        fn init(&self, _flags: LoadFlags, args: Option<&str>, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleError> {
            ctx.set_info(ModuleInfoKind::Version, args.unwrap_or("0"));
            ctx.register_callback(CallbackType::ProcessData, 0, callback(|_, _| CallbackStatus::Continue))?;
            ctx.register_callback(CallbackType::LogData, 0, callback(|_, _| CallbackStatus::Continue))?;
            if self.fail_init {
                return Err(ModuleError::failed(ctx.name(), "boom"));
            }
            Ok(())
        }

        fn deinit(&self, _flags: UnloadFlags, _reason: UnloadReason) -> Result<(), ModuleError> {
            self.deinits.fetch_add(1, Ordering::SeqCst);
            if self.refuse_unload {
                return Err(ModuleError::failed("recorder", "busy"));
            }
            Ok(())
        }
    }

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(Arc::new(EventBroker::default()))
    }

    #[test]
    fn test_load_and_unload_round_trip() {
        let mut reg = registry();
        let recorder = Arc::new(Recorder::default());
        let id = reg.add_module("recorder", Some("1.2".to_string()), recorder.clone());

        reg.load_module(id).unwrap();
        assert!(reg.is_loaded(id));
        assert_eq!(reg.broker().module_callback_count(id).unwrap(), 2);
        assert_eq!(reg.module_info(id).unwrap().get(ModuleInfoKind::Version), Some("1.2"));

        reg.unload_module(id, UnloadFlags::Request, UnloadReason::NebShutdown).unwrap();
        assert!(!reg.is_loaded(id));
        assert_eq!(reg.broker().total_callbacks().unwrap(), 0);
        assert_eq!(recorder.deinits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_init_rolls_back_without_deinit() {
        let mut reg = registry();
        let recorder = Arc::new(Recorder {
            fail_init: true,
            ..Recorder::default()
        });
        let id = reg.add_module("bad", None, recorder.clone());

        let err = reg.load_module(id).unwrap_err();
        assert!(matches!(err, ModuleError::InitFailed { ref name, .. } if name == "bad"));
        assert!(!reg.is_loaded(id));
        assert_eq!(reg.broker().total_callbacks().unwrap(), 0);
        assert_eq!(recorder.deinits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_unload_unless_forced() {
        let mut reg = registry();
        let recorder = Arc::new(Recorder {
            refuse_unload: true,
            ..Recorder::default()
        });
        let id = reg.add_module("sticky", None, recorder);
        reg.load_module(id).unwrap();

        let err = reg.unload_module(id, UnloadFlags::Request, UnloadReason::NebRestart).unwrap_err();
        assert!(matches!(err, ModuleError::UnloadRefused { .. }));
        assert!(reg.is_loaded(id));
        assert_eq!(reg.broker().module_callback_count(id).unwrap(), 2);

        reg.unload_module(id, UnloadFlags::Force, UnloadReason::NebShutdown).unwrap();
        assert!(!reg.is_loaded(id));
        assert_eq!(reg.broker().module_callback_count(id).unwrap(), 0);
    }

    #[test]
    fn test_load_all_counts_failures_and_continues() {
        let mut reg = registry();
        let good = reg.add_module("good", None, Arc::new(Recorder::default()));
        let bad = reg.add_module(
            "bad",
            None,
            Arc::new(Recorder {
                fail_init: true,
                ..Recorder::default()
            }),
        );
        let logger = reg.add_module("logger", Some("process".to_string()), Arc::new(EventLogger));

        assert_eq!(reg.load_all(), 1);
        assert!(reg.is_loaded(good));
        assert!(!reg.is_loaded(bad));
        assert!(reg.is_loaded(logger));
        assert_eq!(reg.find("logger"), Some(logger));

        let summary = reg
            .broker()
            .program_state(EventMeta::new(NEBTYPE_PROCESS_START))
            .unwrap();
        assert_eq!(summary.code(), 0);

        assert_eq!(reg.unload_all(UnloadFlags::Request, UnloadReason::NebShutdown), 0);
        assert_eq!(reg.broker().total_callbacks().unwrap(), 0);
    }

    #[test]
    fn test_core_module_is_loaded_without_init() {
        let mut reg = registry();
        let recorder = Arc::new(Recorder::default());
        let id = reg.add_core_module("core", recorder.clone());
        assert!(reg.is_loaded(id));
        assert_eq!(reg.broker().module_callback_count(id).unwrap(), 0);
        assert!(matches!(reg.load_module(id), Ok(())));

        reg.set_module_info(id, ModuleInfoKind::Author, "core team").unwrap();
        assert_eq!(reg.module_info(id).unwrap().author.as_deref(), Some("core team"));

        let status: Vec<ModuleStatus> = reg.modules().collect();
        assert!(status[0].core);

        reg.unload_all(UnloadFlags::Force, UnloadReason::NebShutdown);
        assert_eq!(recorder.deinits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_logger_rejects_unknown_class() {
        let mut reg = registry();
        let id = reg.add_module("logger", Some("hosts,bogus".to_string()), Arc::new(EventLogger));
        assert!(reg.load_module(id).is_err());
        assert_eq!(reg.broker().total_callbacks().unwrap(), 0);
    }
}
