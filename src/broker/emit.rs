//! Per-category emit wrappers.
//!
//! Each wrapper checks its category bit in the broker options, drops the
//! event when a required host/service record is missing, stamps the
//! header, builds the payload on the stack and dispatches it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

use super::callbacks::DispatchSummary;
use super::events::{
    CommandRef, CommandRun, CommentData, DowntimeData, EventData, EventHandlerData, EventMeta, FlappingData,
    HostCheckData, HostRecord, LogData, NotificationData, ProcessData, ServiceCheckData, ServiceRecord, Subject,
    SystemCommandData, TimedEventData,
};
use super::registry::EventBroker;

/// Bitmask selecting which event categories are broadcast.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrokerOptions(u32);

#[allow(missing_docs)]
impl BrokerOptions {
    pub const NOTHING: Self = Self(0);
    pub const PROGRAM_STATE: Self = Self(1);
    pub const TIMED_EVENTS: Self = Self(2);
    pub const SERVICE_CHECKS: Self = Self(4);
    pub const HOST_CHECKS: Self = Self(8);
    pub const EVENT_HANDLERS: Self = Self(16);
    pub const LOGGED_DATA: Self = Self(32);
    pub const NOTIFICATIONS: Self = Self(64);
    pub const FLAPPING_DATA: Self = Self(128);
    pub const COMMENT_DATA: Self = Self(256);
    pub const DOWNTIME_DATA: Self = Self(512);
    pub const SYSTEM_COMMANDS: Self = Self(1024);
    pub const OCP_DATA: Self = Self(2048);
    pub const STATUS_DATA: Self = Self(4096);
    pub const ADAPTIVE_DATA: Self = Self(8192);
    pub const EXTERNALCOMMAND_DATA: Self = Self(16384);
    pub const RETENTION_DATA: Self = Self(32768);
    pub const EVERYTHING: Self = Self(65535);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self::EVERYTHING
    }
}

impl fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerOptions({:#06x})", self.0)
    }
}

impl std::ops::BitOr for BrokerOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// What an emit wrapper did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The event went through `make_callbacks`.
    Dispatched(DispatchSummary),
    /// The category is switched off in the broker options.
    Disabled,
    /// A required host or service record was missing.
    Dropped,
}

impl EmitOutcome {
    /// Aggregate callback code; 0 when nothing was dispatched.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Dispatched(summary) => summary.code(),
            Self::Disabled | Self::Dropped => 0,
        }
    }

    /// Returns true if some callback claimed the event.
    #[must_use]
    pub const fn was_handled(&self) -> bool {
        match self {
            Self::Dispatched(summary) => summary.was_handled(),
            Self::Disabled | Self::Dropped => false,
        }
    }
}

/// Check execution details for host and service check emissions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckRun<'a> {
    /// 0 for active checks, 1 for passive.
    pub check_type: i32,
    /// Unexpanded check command, e.g. `check_ping!100.0,20%`.
    pub command: Option<&'a str>,
    pub latency: f64,
    pub run: CommandRun<'a>,
}

impl<'a> CheckRun<'a> {
    /// An active check with no command, finished at `at`.
    #[must_use]
    pub const fn active(at: DateTime<Utc>) -> Self {
        Self {
            check_type: 0,
            command: None,
            latency: 0.0,
            run: CommandRun::instant(at),
        }
    }
}

/// Fields of a comment emission.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommentInfo<'a> {
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

/// Fields of a downtime emission.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DowntimeInfo<'a> {
    pub downtime_type: i32,
    pub host_name: &'a str,
    pub service_description: Option<&'a str>,
    pub entry_time: DateTime<Utc>,
    pub author_name: &'a str,
    pub comment_data: &'a str,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub fixed: bool,
    pub triggered_by: u64,
    pub duration: u64,
    pub downtime_id: u64,
}

/// Fields of a notification emission.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NotificationInfo<'a> {
    pub reason_type: i32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub ack_author: Option<&'a str>,
    pub ack_data: Option<&'a str>,
    pub escalated: bool,
    pub contacts_notified: u32,
}

/// A scheduled unit of work as seen by timed-event subscribers.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEventInfo<'a> {
    pub event_type: i32,
    pub recurring: bool,
    pub run_time: DateTime<Utc>,
    pub interval_secs: u64,
    pub label: &'a str,
}

impl EventBroker {
    fn gate(&self, bit: BrokerOptions) -> bool {
        self.options().contains(bit)
    }

    fn emit(&self, data: &EventData<'_>) -> Result<EmitOutcome, BrokerError> {
        self.dispatch(data).map(EmitOutcome::Dispatched)
    }

    /// Process start, daemonize, restart, shutdown and prelaunch.
    pub fn program_state(&self, meta: EventMeta) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::PROGRAM_STATE) {
            return Ok(EmitOutcome::Disabled);
        }
        self.emit(&EventData::Process(ProcessData { header: meta.stamp() }))
    }

    /// Timed event added, removed or executed.
    pub fn timed_event(&self, meta: EventMeta, event: Option<&TimedEventInfo<'_>>) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::TIMED_EVENTS) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(event) = event else {
            return Ok(EmitOutcome::Dropped);
        };
        self.emit(&EventData::TimedEvent(TimedEventData {
            header: meta.stamp(),
            event_type: event.event_type,
            recurring: event.recurring,
            run_time: event.run_time,
            interval_secs: event.interval_secs,
            label: event.label,
        }))
    }

    /// A log line was written.
    pub fn log_data(
        &self,
        meta: EventMeta,
        data: &str,
        data_type: u64,
        entry_time: DateTime<Utc>,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::LOGGED_DATA) {
            return Ok(EmitOutcome::Disabled);
        }
        self.emit(&EventData::Log(LogData {
            header: meta.stamp(),
            entry_time,
            data_type,
            data,
        }))
    }

    /// A system command ran. Dropped when `run.command_line` is absent.
    pub fn system_command(&self, meta: EventMeta, run: &CommandRun<'_>) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::SYSTEM_COMMANDS) {
            return Ok(EmitOutcome::Disabled);
        }
        if run.command_line.is_none() {
            return Ok(EmitOutcome::Dropped);
        }
        self.emit(&EventData::SystemCommand(SystemCommandData {
            header: meta.stamp(),
            run: *run,
        }))
    }

    /// A host or service event handler ran.
    pub fn event_handler(
        &self,
        meta: EventMeta,
        subject: Option<Subject<'_>>,
        state: i32,
        state_type: i32,
        command: Option<&str>,
        run: &CommandRun<'_>,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::EVENT_HANDLERS) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(subject) = subject else {
            return Ok(EmitOutcome::Dropped);
        };
        self.emit(&EventData::EventHandler(EventHandlerData {
            header: meta.stamp(),
            host_name: subject.host_name(),
            service_description: subject.service_description(),
            state,
            state_type,
            command: CommandRef::split(command),
            run: *run,
            subject,
        }))
    }

    /// A notification started or ended.
    pub fn notification_data(
        &self,
        meta: EventMeta,
        subject: Option<Subject<'_>>,
        info: &NotificationInfo<'_>,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::NOTIFICATIONS) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(subject) = subject else {
            return Ok(EmitOutcome::Dropped);
        };
        let output = match subject {
            Subject::Host(h) => h.plugin_output.as_str(),
            Subject::Service(s) => s.plugin_output.as_str(),
        };
        self.emit(&EventData::Notification(NotificationData {
            header: meta.stamp(),
            host_name: subject.host_name(),
            service_description: subject.service_description(),
            reason_type: info.reason_type,
            start_time: info.start_time,
            end_time: info.end_time,
            output,
            ack_author: info.ack_author,
            ack_data: info.ack_data,
            escalated: info.escalated,
            contacts_notified: info.contacts_notified,
        }))
    }

    /// A host check was initiated or its result processed.
    ///
    /// `state`, `state_type` and the output fields come from the caller; the
    /// attempt counters are read from the host record.
    #[allow(clippy::too_many_arguments)]
    pub fn host_check(
        &self,
        meta: EventMeta,
        host: Option<&HostRecord>,
        state: i32,
        state_type: i32,
        check: &CheckRun<'_>,
        long_output: Option<&str>,
        perf_data: Option<&str>,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::HOST_CHECKS) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(host) = host else {
            return Ok(EmitOutcome::Dropped);
        };
        self.emit(&EventData::HostCheck(HostCheckData {
            header: meta.stamp(),
            host_name: &host.name,
            check_type: check.check_type,
            current_attempt: host.current_attempt,
            max_attempts: host.max_attempts,
            state,
            state_type,
            latency: check.latency,
            command: CommandRef::split(check.command),
            run: check.run,
            long_output,
            perf_data,
            host,
        }))
    }

    /// A service check was initiated or its result processed.
    ///
    /// State and output are read from the service record.
    pub fn service_check(
        &self,
        meta: EventMeta,
        service: Option<&ServiceRecord>,
        check: &CheckRun<'_>,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::SERVICE_CHECKS) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(service) = service else {
            return Ok(EmitOutcome::Dropped);
        };
        let mut run = check.run;
        run.output = Some(&service.plugin_output);
        self.emit(&EventData::ServiceCheck(ServiceCheckData {
            header: meta.stamp(),
            host_name: &service.host_name,
            service_description: &service.description,
            check_type: check.check_type,
            current_attempt: service.current_attempt,
            max_attempts: service.max_attempts,
            state: service.current_state,
            state_type: service.state_type,
            latency: check.latency,
            command: CommandRef::split(check.command),
            run,
            long_output: service.long_plugin_output.as_deref(),
            perf_data: service.perf_data.as_deref(),
            service,
        }))
    }

    /// A comment was added, deleted or loaded.
    pub fn comment_data(&self, meta: EventMeta, info: &CommentInfo<'_>) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::COMMENT_DATA) {
            return Ok(EmitOutcome::Disabled);
        }
        self.emit(&EventData::Comment(CommentData {
            header: meta.stamp(),
            comment_type: info.comment_type,
            entry_type: info.entry_type,
            host_name: info.host_name,
            service_description: info.service_description,
            entry_time: info.entry_time,
            author_name: info.author_name,
            comment_data: info.comment_data,
            persistent: info.persistent,
            source: info.source,
            expires: info.expires,
            expire_time: info.expire_time,
            comment_id: info.comment_id,
        }))
    }

    /// A downtime was added, deleted, loaded, started or stopped.
    pub fn downtime_data(&self, meta: EventMeta, info: &DowntimeInfo<'_>) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::DOWNTIME_DATA) {
            return Ok(EmitOutcome::Disabled);
        }
        self.emit(&EventData::Downtime(DowntimeData {
            header: meta.stamp(),
            downtime_type: info.downtime_type,
            host_name: info.host_name,
            service_description: info.service_description,
            entry_time: info.entry_time,
            author_name: info.author_name,
            comment_data: info.comment_data,
            start_time: info.start_time,
            end_time: info.end_time,
            fixed: info.fixed,
            duration: info.duration,
            triggered_by: info.triggered_by,
            downtime_id: info.downtime_id,
        }))
    }

    /// A host or service started or stopped flapping.
    pub fn flapping_data(
        &self,
        meta: EventMeta,
        subject: Option<Subject<'_>>,
        percent_change: f64,
        high_threshold: f64,
        low_threshold: f64,
    ) -> Result<EmitOutcome, BrokerError> {
        if !self.gate(BrokerOptions::FLAPPING_DATA) {
            return Ok(EmitOutcome::Disabled);
        }
        let Some(subject) = subject else {
            return Ok(EmitOutcome::Dropped);
        };
        let comment_id = match subject {
            Subject::Host(h) => h.flapping_comment_id,
            Subject::Service(s) => s.flapping_comment_id,
        };
        self.emit(&EventData::Flapping(FlappingData {
            header: meta.stamp(),
            host_name: subject.host_name(),
            service_description: subject.service_description(),
            percent_change,
            high_threshold,
            low_threshold,
            comment_id,
        }))
    }
}
