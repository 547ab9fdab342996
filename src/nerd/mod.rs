//! NERD: named event subscription channels for socket clients.
//!
//! [`NerdModule`] is an ordinary broker module. Its `init` builds the
//! [`ChannelRegistry`] against the injected broker and declares the built-in
//! channels; its `deinit` closes every client.

use std::sync::Mutex;

use tracing::info;

use crate::broker::{LoadFlags, Module, ModuleContext, ModuleInfoKind, UnloadFlags, UnloadReason};
use crate::error::ModuleError;

/// Channel registry, lazy activation and broadcast.
pub mod channel;
/// Built-in `hostchecks` and `servicechecks` channels.
pub mod handlers;
/// Request line parser.
pub mod protocol;
/// Unix-socket listener.
pub mod server;

pub use channel::{ChannelHandler, ChannelId, ChannelRegistry, SubscriberId, SubscriberSink, FULL_MESSAGE, JSON_FORMAT};
pub use handlers::{register_builtin_channels, HOSTCHECKS, SERVICECHECKS};
pub use protocol::{parse_request, Action, Request, MAX_REQUEST_LEN};
pub use server::NerdServer;

/// Module that owns the channel registry for its loaded lifetime.
#[derive(Debug)]
pub struct NerdModule {
    max_subscribers: usize,
    registry: Mutex<Option<ChannelRegistry>>,
}

impl NerdModule {
    /// A module that will accept at most `max_subscribers` clients.
    #[must_use]
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            max_subscribers,
            registry: Mutex::new(None),
        }
    }

    /// Handle to the live registry, once the module is initialized.
    #[must_use]
    pub fn registry(&self) -> Option<ChannelRegistry> {
        self.registry.lock().ok().and_then(|g| g.clone())
    }
}

impl Module for NerdModule {
    fn init(&self, _flags: LoadFlags, _args: Option<&str>, ctx: &mut ModuleContext<'_>) -> Result<(), ModuleError> {
        ctx.set_info(ModuleInfoKind::Title, "nerd");
        ctx.set_info(ModuleInfoKind::Desc, "Event subscription channels over a unix socket");

        let registry = ChannelRegistry::new(ctx.broker(), ctx.module_id(), self.max_subscribers);
        register_builtin_channels(&registry).map_err(|e| ModuleError::failed(ctx.name(), e.to_string()))?;

        let mut slot = self
            .registry
            .lock()
            .map_err(|_| ModuleError::failed(ctx.name(), "registry lock poisoned"))?;
        *slot = Some(registry);
        info!(max_subscribers = self.max_subscribers, "nerd initialized");
        Ok(())
    }

    fn deinit(&self, _flags: UnloadFlags, reason: UnloadReason) -> Result<(), ModuleError> {
        let registry = self
            .registry
            .lock()
            .map_err(|_| ModuleError::failed("nerd", "registry lock poisoned"))?
            .take();
        if let Some(registry) = registry {
            registry
                .shutdown()
                .map_err(|e| ModuleError::failed("nerd", e.to_string()))?;
        }
        info!(?reason, "nerd deinitialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::broker::{EventBroker, ModuleRegistry};

    #[test]
    fn test_module_lifecycle_owns_registry() {
        let broker = Arc::new(EventBroker::default());
        let mut modules = ModuleRegistry::new(Arc::clone(&broker));
        let nerd = Arc::new(NerdModule::new(8));
        let id = modules.add_module("nerd", None, Arc::clone(&nerd) as Arc<dyn Module>);

        assert!(nerd.registry().is_none());
        modules.load_module(id).unwrap();
        let registry = nerd.registry().unwrap();
        assert_eq!(registry.channel_names().unwrap(), vec![HOSTCHECKS.to_string(), SERVICECHECKS.to_string()]);

        let sub = SubscriberId::new();
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        registry.add_subscriber(sub, Box::new(a)).unwrap();
        registry.subscribe(sub, HOSTCHECKS, None).unwrap();
        assert_eq!(broker.module_callback_count(id).unwrap(), 1);

        modules
            .unload_module(id, UnloadFlags::Request, UnloadReason::NebShutdown)
            .unwrap();
        assert!(nerd.registry().is_none());
        assert_eq!(registry.subscriber_count().unwrap(), 0);
        assert_eq!(broker.total_callbacks().unwrap(), 0);
    }
}
