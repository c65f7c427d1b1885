//! Positional parser for Xray access log lines.
//!
//! A connection line looks like:
//!
//! ```text
//! 2024/05/01 10:00:00 tcp:1.2.3.4:52114 accepted tcp:example.com:443 [vless-in >> direct] email: alice@example.com
//! ```
//!
//! The route may contain spaces, so it is everything between the destination
//! and the `email:` marker. Lines that don't fit (startup banners, DNS lines,
//! connections without a user) are rejected rather than treated as errors.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

const EMAIL_MARKER: &str = "email:";

/// date, time, client, status, destination, marker, user
const MIN_FIELDS: usize = 7;

/// Index of the first route field.
const ROUTE_START: usize = 5;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Accepted,
    Rejected,
    Other(String),
}

impl ConnectionStatus {
    fn parse(raw: &str) -> Self {
        match raw {
            "accepted" => Self::Accepted,
            "rejected" | "blocked" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A single connection observed in the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub client_address: String,
    pub status: ConnectionStatus,
    pub destination: String,
    pub route: String,
    pub user: String,
}

impl LogEvent {
    pub fn client_ip(&self) -> &str {
        client_ip(&self.client_address)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ConnectionStatus::Accepted
    }
}

/// Parses one log line. Returns `None` for anything that is not a
/// user-attributed connection line.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let marker = fields.iter().rposition(|field| *field == EMAIL_MARKER)?;
    if marker < ROUTE_START {
        return None;
    }
    let user = fields.get(marker + 1)?;
    let timestamp = parse_timestamp(fields[0], fields[1])?;

    Some(LogEvent {
        timestamp,
        client_address: fields[2].to_string(),
        status: ConnectionStatus::parse(fields[3]),
        destination: fields[4].to_string(),
        route: fields.get(ROUTE_START..marker)?.join(" "),
        user: (*user).to_string(),
    })
}

/// Extracts the client IP from an address such as `tcp:1.2.3.4:5566`:
/// the second-to-last colon-delimited segment, i.e. the address without
/// its port. An address without a colon is returned unchanged.
pub fn client_ip(address: &str) -> &str {
    let mut segments = address.rsplit(':');
    let last = segments.next().unwrap_or(address);
    segments.next().unwrap_or(last)
}

/// Log timestamps are written in the proxy host's local time.
fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let joined = format!("{} {}", date, time);
    TIMESTAMP_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(&joined, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.with_timezone(&Utc))
    })
}

#[cfg(test)]
#[path = "tests/parser_tests.rs"]
mod tests;
