//! Built-in channels.

use std::sync::Arc;

use crate::broker::events::{NEBTYPE_HOSTCHECK_PROCESSED, NEBTYPE_SERVICECHECK_PROCESSED};
use crate::broker::{CallbackType, EventData};
use crate::error::ChannelError;

use super::channel::{ChannelHandler, ChannelId, ChannelRegistry};

/// Host check results, one line per processed check.
pub const HOSTCHECKS: &str = "hostchecks";
/// Service check results, one line per processed check.
pub const SERVICECHECKS: &str = "servicechecks";

/// `<host> from <last> -> <current>: <output>`
#[must_use]
pub fn host_check_line(data: &EventData<'_>) -> Option<String> {
    let EventData::HostCheck(d) = data else {
        return None;
    };
    if d.header.kind != NEBTYPE_HOSTCHECK_PROCESSED {
        return None;
    }
    Some(format!(
        "{} from {} -> {}: {}\n",
        d.host_name,
        d.host.last_state,
        d.host.current_state,
        d.run.output.unwrap_or("")
    ))
}

/// `<host>;<service> from <last> -> <current>: <output>`
#[must_use]
pub fn service_check_line(data: &EventData<'_>) -> Option<String> {
    let EventData::ServiceCheck(d) = data else {
        return None;
    };
    if d.header.kind != NEBTYPE_SERVICECHECK_PROCESSED {
        return None;
    }
    Some(format!(
        "{};{} from {} -> {}: {}\n",
        d.host_name,
        d.service_description,
        d.service.last_state,
        d.service.current_state,
        d.run.output.unwrap_or("")
    ))
}

/// Declares `hostchecks` and `servicechecks` on `registry`.
pub fn register_builtin_channels(registry: &ChannelRegistry) -> Result<(ChannelId, ChannelId), ChannelError> {
    let hosts: Arc<dyn ChannelHandler> = Arc::new(host_check_line);
    let services: Arc<dyn ChannelHandler> = Arc::new(service_check_line);
    let h = registry.make_channel(HOSTCHECKS, CallbackType::HostCheckData.flag(), hosts)?;
    let s = registry.make_channel(SERVICECHECKS, CallbackType::ServiceCheckData.flag(), services)?;
    Ok((h, s))
}
