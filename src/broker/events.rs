//! Event payloads handed to broker callbacks.
//!
//! Payloads borrow from the emitting call site; callbacks that need to keep
//! anything past their return must copy it out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::callbacks::CallbackType;

/// No specific event type.
pub const NEBTYPE_NONE: i32 = 0;

/// Daemon finished starting up.
pub const NEBTYPE_PROCESS_START: i32 = 100;
/// Daemon detached from its terminal.
pub const NEBTYPE_PROCESS_DAEMONIZE: i32 = 101;
/// Daemon is restarting.
pub const NEBTYPE_PROCESS_RESTART: i32 = 102;
/// Daemon is shutting down.
pub const NEBTYPE_PROCESS_SHUTDOWN: i32 = 103;
/// Before objects are read or verified.
pub const NEBTYPE_PROCESS_PRELAUNCH: i32 = 104;

/// Timed event queued.
pub const NEBTYPE_TIMEDEVENT_ADD: i32 = 200;
/// Timed event unqueued without running.
pub const NEBTYPE_TIMEDEVENT_REMOVE: i32 = 201;
/// Timed event about to run.
pub const NEBTYPE_TIMEDEVENT_EXECUTE: i32 = 202;

/// Log line written.
pub const NEBTYPE_LOG_DATA: i32 = 300;
/// Log file rotated.
pub const NEBTYPE_LOG_ROTATION: i32 = 301;

/// System command finished.
pub const NEBTYPE_SYSTEM_COMMAND: i32 = 400;

/// Host event handler ran.
pub const NEBTYPE_EVENTHANDLER_HOST: i32 = 500;
/// Global host event handler ran.
pub const NEBTYPE_EVENTHANDLER_GLOBAL_HOST: i32 = 501;
/// Service event handler ran.
pub const NEBTYPE_EVENTHANDLER_SERVICE: i32 = 502;
/// Global service event handler ran.
pub const NEBTYPE_EVENTHANDLER_GLOBAL_SERVICE: i32 = 503;

/// Notification round started.
pub const NEBTYPE_NOTIFICATION_START: i32 = 600;
/// Notification round ended.
pub const NEBTYPE_NOTIFICATION_END: i32 = 601;

/// Service check about to start.
pub const NEBTYPE_SERVICECHECK_INITIATE: i32 = 700;
/// Service check result before processing.
pub const NEBTYPE_SERVICECHECK_RAW: i32 = 701;
/// Service check result applied to the service.
pub const NEBTYPE_SERVICECHECK_PROCESSED: i32 = 702;

/// Host check about to start.
pub const NEBTYPE_HOSTCHECK_INITIATE: i32 = 800;
/// Host check result before processing.
pub const NEBTYPE_HOSTCHECK_RAW: i32 = 801;
/// Host check result applied to the host.
pub const NEBTYPE_HOSTCHECK_PROCESSED: i32 = 802;

/// Comment added.
pub const NEBTYPE_COMMENT_ADD: i32 = 900;
/// Comment deleted.
pub const NEBTYPE_COMMENT_DELETE: i32 = 901;
/// Comment loaded from retention data.
pub const NEBTYPE_COMMENT_LOAD: i32 = 902;

/// Object started flapping.
pub const NEBTYPE_FLAPPING_START: i32 = 1000;
/// Object stopped flapping.
pub const NEBTYPE_FLAPPING_STOP: i32 = 1001;

/// Downtime scheduled.
pub const NEBTYPE_DOWNTIME_ADD: i32 = 1100;
/// Downtime deleted.
pub const NEBTYPE_DOWNTIME_DELETE: i32 = 1101;
/// Downtime loaded from retention data.
pub const NEBTYPE_DOWNTIME_LOAD: i32 = 1102;
/// Downtime began.
pub const NEBTYPE_DOWNTIME_START: i32 = 1103;
/// Downtime ended.
pub const NEBTYPE_DOWNTIME_STOP: i32 = 1104;

/// No initiator flag.
pub const NEBFLAG_NONE: i32 = 0;
/// Initiated by the daemon itself.
pub const NEBFLAG_PROCESS_INITIATED: i32 = 1;
/// Initiated by a user request.
pub const NEBFLAG_USER_INITIATED: i32 = 2;
/// Initiated by a broker module.
pub const NEBFLAG_MODULE_INITIATED: i32 = 3;

/// No attributes.
pub const NEBATTR_NONE: i32 = 0;
/// Orderly shutdown.
pub const NEBATTR_SHUTDOWN_NORMAL: i32 = 1;
/// Shutdown after a failure.
pub const NEBATTR_SHUTDOWN_ABNORMAL: i32 = 2;
/// Orderly restart.
pub const NEBATTR_RESTART_NORMAL: i32 = 4;
/// Restart after a failure.
pub const NEBATTR_RESTART_ABNORMAL: i32 = 8;
/// Flapping stopped on its own.
pub const NEBATTR_FLAPPING_STOP_NORMAL: i32 = 1;
/// Flapping stopped because flap detection was disabled.
pub const NEBATTR_FLAPPING_STOP_DISABLED: i32 = 2;
/// Downtime ran to its end.
pub const NEBATTR_DOWNTIME_STOP_NORMAL: i32 = 1;
/// Downtime cancelled early.
pub const NEBATTR_DOWNTIME_STOP_CANCELLED: i32 = 2;

/// Fields every payload starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// One of the `NEBTYPE_*` values.
    #[serde(rename = "type")]
    pub kind: i32,
    /// One of the `NEBFLAG_*` values.
    pub flags: i32,
    /// Bitwise OR of `NEBATTR_*` values.
    pub attr: i32,
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
}

/// Emission metadata before the timestamp is resolved.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub kind: i32,
    pub flags: i32,
    pub attr: i32,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EventMeta {
    /// Metadata for `kind` with no flags, no attributes and a wall-clock timestamp.
    #[must_use]
    pub const fn new(kind: i32) -> Self {
        Self {
            kind,
            flags: NEBFLAG_NONE,
            attr: NEBATTR_NONE,
            timestamp: None,
        }
    }

    /// Sets the `NEBFLAG_*` initiator.
    #[must_use]
    pub const fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the `NEBATTR_*` bits.
    #[must_use]
    pub const fn with_attr(mut self, attr: i32) -> Self {
        self.attr = attr;
        self
    }

    /// Pins the timestamp instead of reading the clock at emission time.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn stamp(self) -> EventHeader {
        EventHeader {
            kind: self.kind,
            flags: self.flags,
            attr: self.attr,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// The slice of host state the broker reads when a host event is emitted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub name: String,
    pub current_state: i32,
    pub last_state: i32,
    pub state_type: i32,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub plugin_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_plugin_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf_data: Option<String>,
    pub flapping_comment_id: u64,
}

impl HostRecord {
    /// A host in state 0 with one attempt allowed.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_attempt: 1,
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// The slice of service state the broker reads when a service event is emitted.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub host_name: String,
    pub description: String,
    pub current_state: i32,
    pub last_state: i32,
    pub state_type: i32,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub plugin_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_plugin_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perf_data: Option<String>,
    pub flapping_comment_id: u64,
}

impl ServiceRecord {
    /// A service in state 0 with one attempt allowed.
    #[must_use]
    pub fn new(host_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            description: description.into(),
            current_attempt: 1,
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Host or service an event-handler, flapping or notification event is about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "object_type", content = "object", rename_all = "snake_case")]
pub enum Subject<'a> {
    /// A host.
    Host(&'a HostRecord),
    /// A service, which names its host.
    Service(&'a ServiceRecord),
}

impl<'a> Subject<'a> {
    /// Name of the host, or of the service's host.
    #[must_use]
    pub fn host_name(&self) -> &'a str {
        match self {
            Self::Host(h) => &h.name,
            Self::Service(s) => &s.host_name,
        }
    }

    /// Service description, for services only.
    #[must_use]
    pub fn service_description(&self) -> Option<&'a str> {
        match self {
            Self::Host(_) => None,
            Self::Service(s) => Some(&s.description),
        }
    }
}

/// Timing and result of an executed command, shared by check, handler and
/// system-command payloads.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommandRun<'a> {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds allowed before the command is killed.
    pub timeout: i32,
    pub early_timeout: bool,
    pub execution_time: f64,
    pub return_code: i32,
    pub command_line: Option<&'a str>,
    pub output: Option<&'a str>,
}

impl<'a> CommandRun<'a> {
    /// A run that started and ended at `at` with return code 0.
    #[must_use]
    pub const fn instant(at: DateTime<Utc>) -> Self {
        Self {
            start_time: at,
            end_time: at,
            timeout: 0,
            early_timeout: false,
            execution_time: 0.0,
            return_code: 0,
            command_line: None,
            output: None,
        }
    }
}

/// A command definition reference split into its name and `!`-separated arguments.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommandRef<'a> {
    pub command_name: Option<&'a str>,
    pub command_args: Option<&'a str>,
}

impl<'a> CommandRef<'a> {
    /// Splits `check_ping!100.0,20%!500.0,60%` on the first `!`.
    #[must_use]
    pub fn split(command: Option<&'a str>) -> Self {
        match command {
            None => Self::default(),
            Some(raw) => match raw.split_once('!') {
                Some((name, args)) => Self {
                    command_name: Some(name),
                    command_args: Some(args),
                },
                None => Self {
                    command_name: Some(raw),
                    command_args: None,
                },
            },
        }
    }
}

/// Payload of the process slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessData {
    #[serde(flatten)]
    pub header: EventHeader,
}

/// Payload of the timed-event slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimedEventData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub event_type: i32,
    pub recurring: bool,
    pub run_time: DateTime<Utc>,
    pub interval_secs: u64,
    pub label: &'a str,
}

/// Payload of the log slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub entry_time: DateTime<Utc>,
    pub data_type: u64,
    pub data: &'a str,
}

/// Payload of the system-command slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemCommandData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    #[serde(flatten)]
    pub run: CommandRun<'a>,
}

/// Payload of the event-handler slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EventHandlerData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub state: i32,
    pub state_type: i32,
    #[serde(flatten)]
    pub command: CommandRef<'a>,
    #[serde(flatten)]
    pub run: CommandRun<'a>,
    #[serde(skip)]
    pub subject: Subject<'a>,
}

/// Payload of the notification slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NotificationData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub reason_type: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub output: &'a str,
    pub ack_author: Option<&'a str>,
    pub ack_data: Option<&'a str>,
    pub escalated: bool,
    pub contacts_notified: u32,
}

/// Payload of the host-check slot. `host` is the record the check ran against.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HostCheckData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub host_name: &'a str,
    pub check_type: i32,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub state: i32,
    pub state_type: i32,
    pub latency: f64,
    #[serde(flatten)]
    pub command: CommandRef<'a>,
    #[serde(flatten)]
    pub run: CommandRun<'a>,
    pub long_output: Option<&'a str>,
    pub perf_data: Option<&'a str>,
    #[serde(skip)]
    pub host: &'a HostRecord,
}

/// Payload of the service-check slot. `service` is the record the check ran against.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServiceCheckData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub host_name: &'a str,
    pub service_description: &'a str,
    pub check_type: i32,
    pub current_attempt: i32,
    pub max_attempts: i32,
    pub state: i32,
    pub state_type: i32,
    pub latency: f64,
    #[serde(flatten)]
    pub command: CommandRef<'a>,
    #[serde(flatten)]
    pub run: CommandRun<'a>,
    pub long_output: Option<&'a str>,
    pub perf_data: Option<&'a str>,
    #[serde(skip)]
    pub service: &'a ServiceRecord,
}

/// Payload of the comment slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommentData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub comment_type: i32,
    pub entry_type: i32,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub entry_time: DateTime<Utc>,
    pub author_name: &'a str,
    pub comment_data: &'a str,
    pub persistent: bool,
    pub source: i32,
    pub expires: bool,
    pub expire_time: Option<DateTime<Utc>>,
    pub comment_id: u64,
}

/// Payload of the downtime slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DowntimeData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub downtime_type: i32,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub entry_time: DateTime<Utc>,
    pub author_name: &'a str,
    pub comment_data: &'a str,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub fixed: bool,
    pub duration: u64,
    pub triggered_by: u64,
    pub downtime_id: u64,
}

/// Payload of the flapping slot.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FlappingData<'a> {
    #[serde(flatten)]
    pub header: EventHeader,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub percent_change: f64,
    pub high_threshold: f64,
    pub low_threshold: f64,
    pub comment_id: u64,
}

/// Payload of one dispatched event.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData<'a> {
    Process(ProcessData),
    TimedEvent(TimedEventData<'a>),
    Log(LogData<'a>),
    SystemCommand(SystemCommandData<'a>),
    EventHandler(EventHandlerData<'a>),
    Notification(NotificationData<'a>),
    ServiceCheck(ServiceCheckData<'a>),
    HostCheck(HostCheckData<'a>),
    Comment(CommentData<'a>),
    Downtime(DowntimeData<'a>),
    Flapping(FlappingData<'a>),
}

impl EventData<'_> {
    /// Slot this payload is dispatched on.
    #[must_use]
    pub const fn callback_type(&self) -> CallbackType {
        match self {
            Self::Process(_) => CallbackType::ProcessData,
            Self::TimedEvent(_) => CallbackType::TimedEventData,
            Self::Log(_) => CallbackType::LogData,
            Self::SystemCommand(_) => CallbackType::SystemCommandData,
            Self::EventHandler(_) => CallbackType::EventHandlerData,
            Self::Notification(_) => CallbackType::NotificationData,
            Self::ServiceCheck(_) => CallbackType::ServiceCheckData,
            Self::HostCheck(_) => CallbackType::HostCheckData,
            Self::Comment(_) => CallbackType::CommentData,
            Self::Downtime(_) => CallbackType::DowntimeData,
            Self::Flapping(_) => CallbackType::FlappingData,
        }
    }

    /// Common header of the payload.
    #[must_use]
    pub const fn header(&self) -> &EventHeader {
        match self {
            Self::Process(d) => &d.header,
            Self::TimedEvent(d) => &d.header,
            Self::Log(d) => &d.header,
            Self::SystemCommand(d) => &d.header,
            Self::EventHandler(d) => &d.header,
            Self::Notification(d) => &d.header,
            Self::ServiceCheck(d) => &d.header,
            Self::HostCheck(d) => &d.header,
            Self::Comment(d) => &d.header,
            Self::Downtime(d) => &d.header,
            Self::Flapping(d) => &d.header,
        }
    }

    /// The `NEBTYPE_*` value of this event.
    #[must_use]
    pub const fn kind(&self) -> i32 {
        self.header().kind
    }
}
