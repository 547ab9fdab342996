//! Client request line protocol.
//!
//! ```text
//! subscribe <channel>[:<format>]
//! unsubscribe <channel>[:<format>]
//! ```
//!
//! One request per line. Nothing is sent back on success; delivery of
//! broadcast lines simply starts or stops.

use std::fmt;

use crate::error::ChannelError;

/// Longest request line accepted.
pub const MAX_REQUEST_LEN: usize = 2048;

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Start receiving a channel.
    Subscribe,
    /// Stop receiving a channel.
    Unsubscribe,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        })
    }
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Subscribe or unsubscribe.
    pub action: Action,
    /// Channel name.
    pub channel: String,
    /// Text after the `:`, such as `json`.
    pub format: Option<String>,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.channel)?;
        if let Some(fmt) = &self.format {
            write!(f, ":{fmt}")?;
        }
        Ok(())
    }
}

fn bad(reason: impl Into<String>) -> ChannelError {
    ChannelError::BadRequest { reason: reason.into() }
}

/// Parses one request line. Blank lines yield `Ok(None)`.
pub fn parse_request(line: &str) -> Result<Option<Request>, ChannelError> {
    if line.len() > MAX_REQUEST_LEN {
        return Err(bad(format!("request longer than {MAX_REQUEST_LEN} bytes")));
    }

    let line = line.trim_end_matches(['\r', '\n']).trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let action = match verb {
        "subscribe" => Action::Subscribe,
        "unsubscribe" => Action::Unsubscribe,
        other => return Err(bad(format!("unknown verb '{other}'"))),
    };

    let rest = rest.trim();
    let (channel, format) = match rest.split_once(':') {
        Some((channel, format)) => (channel.trim(), Some(format.trim()).filter(|f| !f.is_empty())),
        None => (rest, None),
    };
    if channel.is_empty() {
        return Err(bad("missing channel name"));
    }

    Ok(Some(Request {
        action,
        channel: channel.to_string(),
        format: format.map(str::to_string),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe_with_and_without_format() {
        let r = parse_request("subscribe hostchecks\n").unwrap().unwrap();
        assert_eq!(r.action, Action::Subscribe);
        assert_eq!(r.channel, "hostchecks");
        assert_eq!(r.format, None);

        let r = parse_request("unsubscribe servicechecks:json\r\n").unwrap().unwrap();
        assert_eq!(r.action, Action::Unsubscribe);
        assert_eq!(r.channel, "servicechecks");
        assert_eq!(r.format.as_deref(), Some("json"));
        assert_eq!(r.to_string(), "unsubscribe servicechecks:json");
    }

    #[test]
    fn test_empty_format_is_no_format() {
        let r = parse_request("subscribe hostchecks:").unwrap().unwrap();
        assert_eq!(r.format, None);
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        assert_eq!(parse_request("\n").unwrap(), None);
        assert_eq!(parse_request("   ").unwrap(), None);
    }

    #[test]
    fn test_bad_requests_are_400() {
        for line in ["subscribe", "subscribe :json", "tune-in hostchecks", "unsubscribe   \n"] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.status(), 400, "{line:?}");
        }
        let long = format!("subscribe {}", "x".repeat(MAX_REQUEST_LEN));
        assert!(parse_request(&long).is_err());
    }
}
