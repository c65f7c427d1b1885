//! Typed view of the Xray configuration document.
//!
//! Only the parts this tool reads or writes are modelled. Everything else
//! (log, routing, outbounds, stream settings, unknown client fields) is kept in
//! the `extra` maps and written back untouched.

use super::timestamp::{self, ConfigTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Prefix of `deActiveReason` for accounts deactivated for multiple access.
pub const ABUSE_REASON_PREFIX: &str = "Used by ";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<InboundSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<Account>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A proxy client entry, keyed by `email` across the log and the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub de_active_date: Option<ConfigTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub de_active_reason: Option<String>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub expired_date: Option<ConfigTime>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub billing_start_date: Option<ConfigTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(
        default,
        deserialize_with = "timestamp::optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_connect: Option<ConfigTime>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Effective lifecycle state of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus<'a> {
    Active,
    Deactivated(&'a str),
}

impl Account {
    /// Clients without an email never appear in the log and are left alone.
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }

    pub fn status(&self) -> AccountStatus<'_> {
        let reason = self.de_active_reason.as_deref().unwrap_or_default();
        if self.de_active_date.is_some() || !reason.is_empty() {
            AccountStatus::Deactivated(reason)
        } else {
            AccountStatus::Active
        }
    }

    /// Whether the account was deactivated by the multiple-access check.
    pub fn is_abuse_deactivated(&self) -> bool {
        self.de_active_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with(ABUSE_REASON_PREFIX))
    }

    pub fn deactivate(&mut self, at: ConfigTime, reason: String) {
        self.de_active_date = Some(at);
        self.de_active_reason = Some(reason);
    }

    pub fn reactivate(&mut self) {
        self.de_active_date = None;
        self.de_active_reason = None;
    }
}

impl Inbound {
    pub fn tag(&self) -> &str {
        self.tag.as_deref().unwrap_or_default()
    }

    pub fn clients(&self) -> &[Account] {
        self.settings
            .as_ref()
            .and_then(|settings| settings.clients.as_deref())
            .unwrap_or_default()
    }

    pub fn clients_mut(&mut self) -> &mut [Account] {
        self.settings
            .as_mut()
            .and_then(|settings| settings.clients.as_deref_mut())
            .unwrap_or_default()
    }
}

/// Entries the policy can't act on. They are skipped, not fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    /// A client entry has no email, so it can't be matched to log lines.
    MissingEmail { inbound: String, index: usize },
}

impl Display for ConfigIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEmail { inbound, index } => {
                write!(f, "client #{} of inbound '{}' has no email", index, inbound)
            }
        }
    }
}

impl ConfigDocument {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for inbound in &self.inbounds {
            for (index, account) in inbound.clients().iter().enumerate() {
                if !account.has_email() {
                    issues.push(ConfigIssue::MissingEmail {
                        inbound: inbound.tag().to_string(),
                        index,
                    });
                }
            }
        }
        issues
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Inbound, &Account)> {
        self.inbounds
            .iter()
            .flat_map(|inbound| inbound.clients().iter().map(move |account| (inbound, account)))
    }

    /// Per-account `maxConnections`, keyed by email. When an email appears in
    /// several inbounds, the first explicit limit wins.
    pub fn connection_limits(&self) -> HashMap<String, u32> {
        let mut limits = HashMap::new();
        for (_, account) in self.accounts().filter(|(_, account)| account.has_email()) {
            if let Some(limit) = account.max_connections {
                limits.entry(account.email.clone()).or_insert(limit);
            }
        }
        limits
    }
}
