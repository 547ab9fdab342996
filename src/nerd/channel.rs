//! Channel and subscription bookkeeping.
//!
//! A channel is registered with the broker only while it has at least one
//! subscription: the first subscribe registers one callback per declared
//! slot, the last unsubscribe (or a broadcast that finds nobody listening)
//! removes them again.
//!
//! Lock order is registry state first, broker second. The broker never holds
//! its own lock while running callbacks, so a channel callback may cancel
//! subscribers (and deregister itself) from inside a dispatch.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{callback, Callback, CallbackStatus, CallbackType, EventBroker, EventData, ModuleId};
use crate::error::{BrokerError, ChannelError};

use super::protocol::{parse_request, Action, Request};

/// Line written to a client rejected because the registry is full.
pub const FULL_MESSAGE: &str = "We're full. Go away\n";

/// Subscription format that receives events as JSON lines.
pub const JSON_FORMAT: &str = "json";

/// Index of a channel in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(usize);

impl ChannelId {
    /// Position of the channel in declaration order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Create a new random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where broadcast lines for one subscriber go.
pub trait SubscriberSink: Send {
    /// Writes one complete message.
    ///
    /// `WouldBlock` and `TimedOut` mean "skip this message"; any other error
    /// means the subscriber is gone.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Releases the underlying connection.
    fn close(&mut self);
}

impl SubscriberSink for UnixStream {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Turns broker events into channel lines.
pub trait ChannelHandler: Send + Sync {
    /// Text line for `data`, newline included, or `None` to publish nothing.
    fn render(&self, data: &EventData<'_>) -> Option<String>;
}

impl<F> ChannelHandler for F
where
    F: Fn(&EventData<'_>) -> Option<String> + Send + Sync,
{
    fn render(&self, data: &EventData<'_>) -> Option<String> {
        self(data)
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Subscription {
    subscriber: SubscriberId,
    format: Option<String>,
}

struct Channel {
    name: String,
    mask: u32,
    callback: Callback,
    subscriptions: Vec<Subscription>,
    active: bool,
}

struct Inner {
    broker: Arc<EventBroker>,
    owner: ModuleId,
    max_subscribers: usize,
    channels: Vec<Channel>,
    subscribers: HashMap<SubscriberId, Box<dyn SubscriberSink>>,
}

impl Inner {
    fn channel(&self, id: ChannelId) -> Result<&Channel, ChannelError> {
        self.channels
            .get(id.0)
            .ok_or(ChannelError::ChannelOutOfRange { id: id.0 })
    }

    fn find_channel(&self, name: &str) -> Result<ChannelId, ChannelError> {
        self.channels
            .iter()
            .position(|c| c.name == name)
            .map(ChannelId)
            .ok_or_else(|| ChannelError::UnknownChannel { name: name.to_string() })
    }

    fn activate(&mut self, id: ChannelId) -> Result<(), ChannelError> {
        let channel = &self.channels[id.0];
        if channel.active {
            return Ok(());
        }

        let mut done: Vec<CallbackType> = Vec::new();
        for callback_type in CallbackType::from_mask(channel.mask) {
            let registered =
                self.broker
                    .register_callback(callback_type, self.owner, 0, Arc::clone(&channel.callback));
            if let Err(source) = registered {
                for t in done {
                    let _ = self.broker.deregister_callback(t, &channel.callback);
                }
                return Err(ChannelError::Activation {
                    name: channel.name.clone(),
                    source,
                });
            }
            done.push(callback_type);
        }

        info!(channel = %channel.name, slots = done.len(), "channel activated");
        self.channels[id.0].active = true;
        Ok(())
    }

    fn deactivate(&mut self, id: ChannelId) {
        let channel = &mut self.channels[id.0];
        if !channel.active {
            return;
        }
        for callback_type in CallbackType::from_mask(channel.mask) {
            match self.broker.deregister_callback(callback_type, &channel.callback) {
                Ok(()) | Err(BrokerError::CallbackNotFound { .. }) => {}
                Err(err) => warn!(channel = %channel.name, error = %err, "failed to deregister channel callback"),
            }
        }
        channel.active = false;
        info!(channel = %channel.name, "channel deactivated");
    }

    fn subscribe(&mut self, subscriber: SubscriberId, name: &str, format: Option<String>) -> Result<(), ChannelError> {
        if !self.subscribers.contains_key(&subscriber) {
            return Err(ChannelError::UnknownSubscriber { id: subscriber });
        }
        let id = self.find_channel(name)?;
        let sub = Subscription { subscriber, format };
        if self.channels[id.0].subscriptions.contains(&sub) {
            return Ok(());
        }

        if self.channels[id.0].subscriptions.is_empty() {
            self.activate(id)?;
        }
        debug!(channel = name, %subscriber, format = ?sub.format, "subscribed");
        self.channels[id.0].subscriptions.push(sub);
        Ok(())
    }

    fn unsubscribe(&mut self, subscriber: SubscriberId, name: &str, format: Option<&str>) -> Result<bool, ChannelError> {
        let id = self.find_channel(name)?;
        let subs = &mut self.channels[id.0].subscriptions;
        let Some(at) = subs
            .iter()
            .position(|s| s.subscriber == subscriber && s.format.as_deref() == format)
        else {
            return Ok(false);
        };
        subs.remove(at);
        debug!(channel = name, %subscriber, format, "unsubscribed");

        if subs.is_empty() {
            self.deactivate(id);
        }
        Ok(true)
    }

    fn cancel_subscriber(&mut self, subscriber: SubscriberId) -> Result<usize, ChannelError> {
        let Some(mut sink) = self.subscribers.remove(&subscriber) else {
            return Err(ChannelError::UnknownSubscriber { id: subscriber });
        };

        let mut removed = 0;
        for idx in 0..self.channels.len() {
            let subs = &mut self.channels[idx].subscriptions;
            let before = subs.len();
            subs.retain(|s| s.subscriber != subscriber);
            let gone = before - subs.len();
            if gone > 0 {
                removed += gone;
                if subs.is_empty() {
                    self.deactivate(ChannelId(idx));
                }
            }
        }

        sink.close();
        info!(%subscriber, subscriptions = removed, "subscriber cancelled");
        Ok(removed)
    }

    fn write_to(&mut self, subscriber: SubscriberId, bytes: &[u8], gone: &mut Vec<SubscriberId>) {
        let Some(sink) = self.subscribers.get_mut(&subscriber) else {
            return;
        };
        match sink.send(bytes) {
            Ok(()) => {}
            Err(err) if is_transient(&err) => {
                debug!(%subscriber, "subscriber not ready, message skipped");
            }
            Err(err) => {
                debug!(%subscriber, error = %err, "subscriber write failed");
                if !gone.contains(&subscriber) {
                    gone.push(subscriber);
                }
            }
        }
    }

    fn reap(&mut self, gone: Vec<SubscriberId>) {
        for subscriber in gone {
            if let Err(err) = self.cancel_subscriber(subscriber) {
                debug!(%subscriber, error = %err, "subscriber already cancelled");
            }
        }
    }

    fn broadcast(&mut self, id: ChannelId, bytes: &[u8]) -> Result<(), ChannelError> {
        let targets: Vec<SubscriberId> = self.channel(id)?.subscriptions.iter().map(|s| s.subscriber).collect();
        if targets.is_empty() {
            self.deactivate(id);
            return Ok(());
        }

        let mut gone = Vec::new();
        for subscriber in targets {
            self.write_to(subscriber, bytes, &mut gone);
        }
        self.reap(gone);
        Ok(())
    }

    fn publish(&mut self, id: ChannelId, line: &str, data: &EventData<'_>) -> Result<(), ChannelError> {
        let targets: Vec<Subscription> = self.channel(id)?.subscriptions.clone();
        if targets.is_empty() {
            self.deactivate(id);
            return Ok(());
        }

        let mut json: Option<String> = None;
        let mut gone = Vec::new();
        for sub in targets {
            if sub.format.as_deref() == Some(JSON_FORMAT) {
                let text = json.get_or_insert_with(|| match serde_json::to_string(data) {
                    Ok(mut s) => {
                        s.push('\n');
                        s
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to encode event as json");
                        String::new()
                    }
                });
                if text.is_empty() {
                    continue;
                }
                self.write_to(sub.subscriber, text.as_bytes(), &mut gone);
            } else {
                self.write_to(sub.subscriber, line.as_bytes(), &mut gone);
            }
        }
        self.reap(gone);
        Ok(())
    }
}

/// Named subscription channels fed by broker callbacks.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.lock() {
            Ok(g) => f
                .debug_struct("ChannelRegistry")
                .field("channels", &g.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>())
                .field("subscribers", &g.subscribers.len())
                .finish(),
            Err(_) => f.write_str("ChannelRegistry { <poisoned> }"),
        }
    }
}

fn channel_callback(inner: Weak<Mutex<Inner>>, id: ChannelId, handler: Arc<dyn ChannelHandler>) -> Callback {
    callback(move |_, data| {
        let Some(line) = handler.render(data) else {
            return CallbackStatus::Continue;
        };
        let Some(inner) = inner.upgrade() else {
            return CallbackStatus::Continue;
        };
        let Ok(mut guard) = inner.lock() else {
            return CallbackStatus::Continue;
        };
        if let Err(err) = guard.publish(id, &line, data) {
            warn!(channel = %id, error = %err, "channel publish failed");
        }
        CallbackStatus::Continue
    })
}

impl ChannelRegistry {
    /// Creates an empty registry whose broker registrations are tagged with `owner`.
    #[must_use]
    pub fn new(broker: Arc<EventBroker>, owner: ModuleId, max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                broker,
                owner,
                max_subscribers: max_subscribers.max(1),
                channels: Vec::new(),
                subscribers: HashMap::new(),
            })),
        }
    }

    fn lock(&self, context: &'static str) -> Result<MutexGuard<'_, Inner>, ChannelError> {
        self.inner.lock().map_err(|_| ChannelError::Poisoned { context })
    }

    /// Declares a channel fed by the broker slots named in `mask`
    /// (bits from [`CallbackType::flag`]).
    ///
    /// Nothing is registered with the broker until someone subscribes.
    pub fn make_channel(
        &self,
        name: &str,
        mask: u32,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<ChannelId, ChannelError> {
        let name = name.trim();
        if name.is_empty() || name.contains([':', ' ', '\t', '\n']) {
            return Err(ChannelError::BadRequest {
                reason: format!("invalid channel name '{name}'"),
            });
        }
        if mask == 0 || CallbackType::from_mask(mask).count() != mask.count_ones() as usize {
            return Err(ChannelError::BadRequest {
                reason: format!("channel '{name}' has invalid callback mask {mask:#x}"),
            });
        }

        let mut inner = self.lock("nerd.make_channel")?;
        if inner.channels.iter().any(|c| c.name == name) {
            return Err(ChannelError::BadRequest {
                reason: format!("channel '{name}' already exists"),
            });
        }

        let id = ChannelId(inner.channels.len());
        let cb = channel_callback(Arc::downgrade(&self.inner), id, handler);
        inner.channels.push(Channel {
            name: name.to_string(),
            mask,
            callback: cb,
            subscriptions: Vec::new(),
            active: false,
        });
        info!(channel = name, id = id.0, mask, "channel created");
        Ok(id)
    }

    /// Looks a channel up by name.
    pub fn channel_id(&self, name: &str) -> Result<ChannelId, ChannelError> {
        self.lock("nerd.lookup")?.find_channel(name)
    }

    /// Names of every declared channel, in declaration order.
    pub fn channel_names(&self) -> Result<Vec<String>, ChannelError> {
        Ok(self.lock("nerd.lookup")?.channels.iter().map(|c| c.name.clone()).collect())
    }

    /// Accepts a new client.
    ///
    /// When the registry is full the client is sent [`FULL_MESSAGE`], closed
    /// and `ChannelError::Full` is returned.
    pub fn add_subscriber(&self, id: SubscriberId, mut sink: Box<dyn SubscriberSink>) -> Result<(), ChannelError> {
        let mut inner = self.lock("nerd.add_subscriber")?;
        if inner.subscribers.len() >= inner.max_subscribers {
            let max = inner.max_subscribers;
            drop(inner);
            let _ = sink.send(FULL_MESSAGE.as_bytes());
            sink.close();
            warn!(subscriber = %id, max, "subscriber rejected, registry full");
            return Err(ChannelError::Full { max });
        }
        inner.subscribers.insert(id, sink);
        info!(subscriber = %id, connected = inner.subscribers.len(), "subscriber connected");
        Ok(())
    }

    /// Subscribes a client to a channel in the given format.
    ///
    /// Subscribing twice with the same format is a no-op.
    pub fn subscribe(&self, subscriber: SubscriberId, channel: &str, format: Option<&str>) -> Result<(), ChannelError> {
        self.lock("nerd.subscribe")?
            .subscribe(subscriber, channel, format.map(str::to_string))
    }

    /// Drops the subscription matching both `subscriber` and `format`.
    ///
    /// Returns false if there was no such subscription.
    pub fn unsubscribe(&self, subscriber: SubscriberId, channel: &str, format: Option<&str>) -> Result<bool, ChannelError> {
        self.lock("nerd.unsubscribe")?.unsubscribe(subscriber, channel, format)
    }

    /// Applies one parsed request.
    pub fn apply(&self, subscriber: SubscriberId, request: &Request) -> Result<(), ChannelError> {
        match request.action {
            Action::Subscribe => self.subscribe(subscriber, &request.channel, request.format.as_deref()),
            Action::Unsubscribe => self
                .unsubscribe(subscriber, &request.channel, request.format.as_deref())
                .map(|_| ()),
        }
    }

    /// Parses and applies one protocol line from `subscriber`.
    pub fn handle_request(&self, subscriber: SubscriberId, line: &str) -> Result<(), ChannelError> {
        match parse_request(line)? {
            Some(request) => self.apply(subscriber, &request),
            None => Ok(()),
        }
    }

    /// Removes a client from every channel and closes its connection.
    ///
    /// Returns the number of subscriptions dropped.
    pub fn cancel_subscriber(&self, subscriber: SubscriberId) -> Result<usize, ChannelError> {
        self.lock("nerd.cancel")?.cancel_subscriber(subscriber)
    }

    /// Writes `bytes` to every subscriber of channel `id`, regardless of format.
    pub fn broadcast(&self, id: ChannelId, bytes: &[u8]) -> Result<(), ChannelError> {
        self.lock("nerd.broadcast")?.broadcast(id, bytes)
    }

    /// Closes every client and removes every channel callback from the broker.
    pub fn shutdown(&self) -> Result<(), ChannelError> {
        let mut inner = self.lock("nerd.shutdown")?;
        let subscribers: Vec<SubscriberId> = inner.subscribers.keys().copied().collect();
        for subscriber in subscribers {
            let _ = inner.cancel_subscriber(subscriber);
        }
        for idx in 0..inner.channels.len() {
            inner.deactivate(ChannelId(idx));
        }
        Ok(())
    }

    /// Connected clients, subscribed to anything or not.
    pub fn subscriber_count(&self) -> Result<usize, ChannelError> {
        Ok(self.lock("nerd.count")?.subscribers.len())
    }

    /// Number of subscriptions on one channel.
    pub fn subscription_count(&self, id: ChannelId) -> Result<usize, ChannelError> {
        Ok(self.lock("nerd.count")?.channel(id)?.subscriptions.len())
    }

    /// Returns true while the channel's callbacks are registered with the broker.
    pub fn is_active(&self, id: ChannelId) -> Result<bool, ChannelError> {
        Ok(self.lock("nerd.count")?.channel(id)?.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::events::{EventMeta, ProcessData, NEBTYPE_PROCESS_START};

    #[derive(Clone, Default)]
    struct MemorySink {
        lines: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<bool>>,
        fail_with: Option<io::ErrorKind>,
    }

    impl MemorySink {
        fn failing(kind: io::ErrorKind) -> Self {
            Self {
                fail_with: Some(kind),
                ..Self::default()
            }
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }

        fn is_closed(&self) -> bool {
            *self.closed.lock().unwrap()
        }
    }

    impl SubscriberSink for MemorySink {
        fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
            if let Some(kind) = self.fail_with {
                return Err(io::Error::from(kind));
            }
            self.lines.lock().unwrap().push(String::from_utf8_lossy(bytes).into_owned());
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn process_event() -> EventData<'static> {
        EventData::Process(ProcessData {
            header: EventMeta::new(NEBTYPE_PROCESS_START).stamp(),
        })
    }

    fn setup(max: usize) -> (Arc<EventBroker>, ChannelRegistry, ChannelId) {
        let broker = Arc::new(EventBroker::default());
        let registry = ChannelRegistry::new(Arc::clone(&broker), ModuleId::new(), max);
        let handler: Arc<dyn ChannelHandler> = Arc::new(|d: &EventData<'_>| Some(format!("event {}\n", d.kind())));
        let id = registry
            .make_channel("process", CallbackType::ProcessData.flag(), handler)
            .unwrap();
        (broker, registry, id)
    }

    fn connect(registry: &ChannelRegistry, sink: &MemorySink) -> SubscriberId {
        let id = SubscriberId::new();
        registry.add_subscriber(id, Box::new(sink.clone())).unwrap();
        id
    }

    #[test]
    fn test_lazy_activation_follows_subscriber_count() {
        let (broker, registry, id) = setup(4);
        let a = connect(&registry, &MemorySink::default());
        let b = connect(&registry, &MemorySink::default());
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 0);

        registry.subscribe(a, "process", None).unwrap();
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 1);
        registry.subscribe(b, "process", None).unwrap();
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 1);
        assert!(registry.is_active(id).unwrap());

        assert!(registry.unsubscribe(a, "process", None).unwrap());
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 1);
        assert!(registry.unsubscribe(b, "process", None).unwrap());
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 0);
        assert!(!registry.is_active(id).unwrap());
    }

    #[test]
    fn test_unsubscribe_matches_format() {
        let (_, registry, id) = setup(4);
        let a = connect(&registry, &MemorySink::default());
        registry.handle_request(a, "subscribe process:json\n").unwrap();

        assert!(!registry.unsubscribe(a, "process", None).unwrap());
        assert_eq!(registry.subscription_count(id).unwrap(), 1);
        assert!(registry.unsubscribe(a, "process", Some("json")).unwrap());
        assert_eq!(registry.subscription_count(id).unwrap(), 0);
    }

    #[test]
    fn test_dispatch_renders_text_and_json() {
        let (broker, registry, _) = setup(4);
        let text = MemorySink::default();
        let json = MemorySink::default();
        let t = connect(&registry, &text);
        let j = connect(&registry, &json);
        registry.subscribe(t, "process", None).unwrap();
        registry.subscribe(j, "process", Some(JSON_FORMAT)).unwrap();

        broker.dispatch(&process_event()).unwrap();

        assert_eq!(text.lines(), vec![format!("event {NEBTYPE_PROCESS_START}\n")]);
        let lines = json.lines();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(lines[0].trim_end()).unwrap();
        assert_eq!(v["type"], NEBTYPE_PROCESS_START);
    }

    #[test]
    fn test_would_block_skips_and_hard_error_cancels() {
        let (broker, registry, id) = setup(4);
        let slow = MemorySink::failing(io::ErrorKind::WouldBlock);
        let dead = MemorySink::failing(io::ErrorKind::BrokenPipe);
        let s = connect(&registry, &slow);
        let d = connect(&registry, &dead);
        registry.subscribe(s, "process", None).unwrap();
        registry.subscribe(d, "process", None).unwrap();

        registry.broadcast(id, b"hello\n").unwrap();

        assert!(!slow.is_closed());
        assert!(dead.is_closed());
        assert_eq!(registry.subscriber_count().unwrap(), 1);
        assert_eq!(registry.subscription_count(id).unwrap(), 1);
        assert_eq!(broker.callback_count(CallbackType::ProcessData).unwrap(), 1);
    }

    #[test]
    fn test_last_subscriber_lost_mid_dispatch_deactivates() {
        let (broker, registry, id) = setup(4);
        let dead = MemorySink::failing(io::ErrorKind::ConnectionReset);
        let d = connect(&registry, &dead);
        registry.subscribe(d, "process", None).unwrap();

        broker.dispatch(&process_event()).unwrap();

        assert!(!registry.is_active(id).unwrap());
        assert_eq!(broker.total_callbacks().unwrap(), 0);
        assert!(matches!(
            registry.cancel_subscriber(d),
            Err(ChannelError::UnknownSubscriber { .. })
        ));
    }

    #[test]
    fn test_full_registry_rejects_with_message() {
        let (_, registry, _) = setup(1);
        connect(&registry, &MemorySink::default());

        let extra = MemorySink::default();
        let err = registry.add_subscriber(SubscriberId::new(), Box::new(extra.clone())).unwrap_err();
        assert_eq!(err.status(), 503);
        assert_eq!(extra.lines(), vec![FULL_MESSAGE.to_string()]);
        assert!(extra.is_closed());
    }

    #[test]
    fn test_request_errors() {
        let (_, registry, _) = setup(4);
        let a = connect(&registry, &MemorySink::default());
        assert_eq!(registry.handle_request(a, "subscribe nosuch").unwrap_err().status(), 400);
        assert_eq!(registry.handle_request(a, "subscribe").unwrap_err().status(), 400);
        assert!(registry.handle_request(a, "").is_ok());
        assert!(matches!(
            registry.subscribe(SubscriberId::new(), "process", None),
            Err(ChannelError::UnknownSubscriber { .. })
        ));
    }

    #[test]
    fn test_make_channel_validation() {
        let (_, registry, _) = setup(4);
        let handler: Arc<dyn ChannelHandler> = Arc::new(|_: &EventData<'_>| None);
        assert!(registry.make_channel("process", CallbackType::LogData.flag(), Arc::clone(&handler)).is_err());
        assert!(registry.make_channel("bad:name", CallbackType::LogData.flag(), Arc::clone(&handler)).is_err());
        assert!(registry.make_channel("logs", 0, Arc::clone(&handler)).is_err());
        assert!(registry.make_channel("logs", 1 << 20, Arc::clone(&handler)).is_err());
        let id = registry.make_channel("logs", CallbackType::LogData.flag(), handler).unwrap();
        assert_eq!(id.index(), 1);
        assert_eq!(registry.channel_id("logs").unwrap(), id);
    }

    #[test]
    fn test_shutdown_closes_everything() {
        let (broker, registry, _) = setup(4);
        let sink = MemorySink::default();
        let a = connect(&registry, &sink);
        registry.subscribe(a, "process", None).unwrap();

        registry.shutdown().unwrap();
        assert!(sink.is_closed());
        assert_eq!(registry.subscriber_count().unwrap(), 0);
        assert_eq!(broker.total_callbacks().unwrap(), 0);
    }
}
