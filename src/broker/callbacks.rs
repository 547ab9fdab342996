//! Callback-type slots, callback return codes and dispatch summaries.
//!
//! The numeric values of the slots and return codes match the historical
//! module ABI so existing modules keep their constants.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Generic success code.
pub const NEB_OK: i32 = 0;
/// Generic failure code.
pub const NEB_ERROR: i32 = -1;
/// A callback handled the event and asks the core to skip its default handling.
pub const NEBERROR_CALLBACKOVERRIDE: i32 = 205;
/// A callback asks the core to stop calling the remaining callbacks.
pub const NEBERROR_CALLBACKCANCEL: i32 = 206;

/// One of the fixed event categories the broker dispatches.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CallbackType {
    Reserved0 = 0,
    Reserved1 = 1,
    Reserved2 = 2,
    Reserved3 = 3,
    Reserved4 = 4,
    RawData = 5,
    NebData = 6,
    ProcessData = 7,
    TimedEventData = 8,
    LogData = 9,
    SystemCommandData = 10,
    EventHandlerData = 11,
    NotificationData = 12,
    ServiceCheckData = 13,
    HostCheckData = 14,
    CommentData = 15,
    DowntimeData = 16,
    FlappingData = 17,
}

impl CallbackType {
    /// Total number of callback slots.
    pub const NUM_ITEMS: usize = 18;

    /// Every slot, in numeric order.
    pub const ALL: [Self; Self::NUM_ITEMS] = [
        Self::Reserved0,
        Self::Reserved1,
        Self::Reserved2,
        Self::Reserved3,
        Self::Reserved4,
        Self::RawData,
        Self::NebData,
        Self::ProcessData,
        Self::TimedEventData,
        Self::LogData,
        Self::SystemCommandData,
        Self::EventHandlerData,
        Self::NotificationData,
        Self::ServiceCheckData,
        Self::HostCheckData,
        Self::CommentData,
        Self::DowntimeData,
        Self::FlappingData,
    ];

    /// Converts a raw slot number, rejecting anything out of range.
    pub fn from_raw(raw: i32) -> Result<Self, BrokerError> {
        usize::try_from(raw)
            .ok()
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or(BrokerError::CallbackOutOfRange {
                raw,
                max: Self::NUM_ITEMS,
            })
    }

    /// Slot number.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /// Slot index into per-slot tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for this slot, as used by channel declarations.
    #[must_use]
    pub const fn flag(self) -> u32 {
        1 << (self as u32)
    }

    /// Expands a slot bitmask into the slots it names, in numeric order.
    pub fn from_mask(mask: u32) -> impl Iterator<Item = Self> {
        Self::ALL.into_iter().filter(move |t| mask & t.flag() != 0)
    }

    /// Upper-case name, as printed in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reserved0 => "RESERVED0",
            Self::Reserved1 => "RESERVED1",
            Self::Reserved2 => "RESERVED2",
            Self::Reserved3 => "RESERVED3",
            Self::Reserved4 => "RESERVED4",
            Self::RawData => "RAW_DATA",
            Self::NebData => "NEB_DATA",
            Self::ProcessData => "PROCESS_DATA",
            Self::TimedEventData => "TIMED_EVENT_DATA",
            Self::LogData => "LOG_DATA",
            Self::SystemCommandData => "SYSTEM_COMMAND_DATA",
            Self::EventHandlerData => "EVENT_HANDLER_DATA",
            Self::NotificationData => "NOTIFICATION_DATA",
            Self::ServiceCheckData => "SERVICE_CHECK_DATA",
            Self::HostCheckData => "HOST_CHECK_DATA",
            Self::CommentData => "COMMENT_DATA",
            Self::DowntimeData => "DOWNTIME_DATA",
            Self::FlappingData => "FLAPPING_DATA",
        }
    }
}

impl fmt::Display for CallbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<i32> for CallbackType {
    type Error = BrokerError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

/// What a callback tells the dispatcher after seeing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackStatus {
    /// Keep walking the list.
    Continue,
    /// Soft failure; recorded in the summary, dispatch continues.
    Warning(i32),
    /// Handled; skip remaining callbacks and the core's default handling.
    Override,
    /// Stop calling the remaining callbacks.
    Cancel,
}

impl CallbackStatus {
    /// Maps a raw module return code onto a status.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            NEB_OK => Self::Continue,
            NEBERROR_CALLBACKOVERRIDE => Self::Override,
            NEBERROR_CALLBACKCANCEL => Self::Cancel,
            other => Self::Warning(other),
        }
    }

    /// Raw return code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Continue => NEB_OK,
            Self::Warning(code) => code,
            Self::Override => NEBERROR_CALLBACKOVERRIDE,
            Self::Cancel => NEBERROR_CALLBACKCANCEL,
        }
    }

    /// Returns true if this status ends the dispatch walk.
    #[must_use]
    pub const fn stops_dispatch(self) -> bool {
        matches!(self, Self::Override | Self::Cancel)
    }
}

impl From<i32> for CallbackStatus {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

/// Outcome of one `make_callbacks` walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchSummary {
    /// Number of callbacks invoked.
    pub invoked: usize,
    /// The status that stopped the walk early, if any.
    pub stopped_by: Option<CallbackStatus>,
    /// Bitwise OR of every warning code returned.
    pub warnings: i32,
}

impl DispatchSummary {
    /// Aggregate return code: the stop code if the walk was cut short,
    /// otherwise the OR of warning codes (0 when every callback continued).
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self.stopped_by {
            Some(status) => status.code(),
            None => self.warnings,
        }
    }

    /// Returns true if some callback claimed the event.
    #[must_use]
    pub const fn was_handled(&self) -> bool {
        matches!(self.stopped_by, Some(CallbackStatus::Override))
    }

    pub(crate) fn record(&mut self, status: CallbackStatus) -> bool {
        self.invoked += 1;
        match status {
            CallbackStatus::Continue => true,
            CallbackStatus::Warning(code) => {
                self.warnings |= code;
                true
            }
            CallbackStatus::Override | CallbackStatus::Cancel => {
                self.stopped_by = Some(status);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_type_numbers_are_stable() {
        assert_eq!(CallbackType::ProcessData.as_raw(), 7);
        assert_eq!(CallbackType::HostCheckData.as_raw(), 14);
        assert_eq!(CallbackType::FlappingData.as_raw(), 17);
        for (idx, t) in CallbackType::ALL.iter().enumerate() {
            assert_eq!(t.index(), idx);
        }
    }

    #[test]
    fn test_callback_type_rejects_out_of_range() {
        assert!(matches!(
            CallbackType::from_raw(18),
            Err(BrokerError::CallbackOutOfRange { raw: 18, max: 18 })
        ));
        assert!(CallbackType::from_raw(-1).is_err());
        assert_eq!(CallbackType::try_from(9).unwrap(), CallbackType::LogData);
    }

    #[test]
    fn test_mask_expands_in_numeric_order() {
        let mask = CallbackType::ServiceCheckData.flag() | CallbackType::HostCheckData.flag();
        let types: Vec<_> = CallbackType::from_mask(mask).collect();
        assert_eq!(types, vec![CallbackType::ServiceCheckData, CallbackType::HostCheckData]);
        assert_eq!(CallbackType::from_mask(0).count(), 0);
    }

    #[test]
    fn test_status_codes_round_trip_through_raw_values() {
        assert_eq!(CallbackStatus::from_code(0), CallbackStatus::Continue);
        assert_eq!(CallbackStatus::from_code(205), CallbackStatus::Override);
        assert_eq!(CallbackStatus::from_code(206), CallbackStatus::Cancel);
        assert_eq!(CallbackStatus::from_code(3), CallbackStatus::Warning(3));
        assert!(CallbackStatus::Cancel.stops_dispatch());
        assert!(!CallbackStatus::Warning(1).stops_dispatch());
    }

    #[test]
    fn test_summary_aggregates_warnings_and_stops() {
        let mut s = DispatchSummary::default();
        assert!(s.record(CallbackStatus::Warning(1)));
        assert!(s.record(CallbackStatus::Continue));
        assert!(s.record(CallbackStatus::Warning(4)));
        assert_eq!(s.code(), 5);
        assert!(!s.record(CallbackStatus::Override));
        assert_eq!(s.invoked, 4);
        assert_eq!(s.code(), NEBERROR_CALLBACKOVERRIDE);
        assert!(s.was_handled());
    }
}
