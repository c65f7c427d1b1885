//! Account lifecycle rules.
//!
//! Each account is evaluated in a fixed order: abuse deactivation, then
//! reactivation, then billing expiry. Later rules see what earlier ones did to
//! the same account within the pass.

use crate::usage::UsageAggregator;
use crate::window::FlaggedUsers;
use crate::xray_config::{Account, AccountStatus, ConfigDocument, ConfigTime};
use chrono::{DateTime, Duration, Utc};
use std::fmt::{Display, Formatter};

/// Days an account stays enabled after first use when it sets no `expireDays`.
pub const DEFAULT_EXPIRE_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOptions {
    /// Lift abuse deactivations once the account is no longer flagged.
    pub reactive: bool,
    /// Deactivate accounts whose billing period has run out.
    pub disable_expired: bool,
    pub default_expire_days: u32,
    /// Window size, quoted in the deactivation reason.
    pub range_minutes: u32,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            reactive: true,
            disable_expired: true,
            default_expire_days: DEFAULT_EXPIRE_DAYS,
            range_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    Deactivated { ips: Vec<String> },
    Reactivated,
    Expired { days: u32 },
}

/// One state change applied to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub inbound_tag: String,
    pub email: String,
    pub kind: TransitionKind,
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransitionKind::Deactivated { ips } => write!(
                f,
                "deactivated {} on {} ({} ips: {})",
                self.email,
                self.inbound_tag,
                ips.len(),
                ips.join(", ")
            ),
            TransitionKind::Reactivated => {
                write!(f, "reactivated {} on {}", self.email, self.inbound_tag)
            }
            TransitionKind::Expired { days } => write!(
                f,
                "expired {} on {} after {} days",
                self.email, self.inbound_tag, days
            ),
        }
    }
}

pub fn abuse_reason(ips: &[String], range_minutes: u32) -> String {
    format!(
        "Used by {} ips in {} mins ago ({})",
        ips.len(),
        range_minutes,
        ips.join(", ")
    )
}

pub fn expiry_reason(days: u32) -> String {
    format!("Expired after {} days", days)
}

#[derive(Debug, Clone)]
pub struct PolicyEngine {
    options: PolicyOptions,
}

impl PolicyEngine {
    pub fn new(options: PolicyOptions) -> Self {
        Self { options }
    }

    /// Applies the lifecycle rules to every account in `document` in place
    /// and returns the transitions in document order.
    pub fn apply(
        &self,
        document: &mut ConfigDocument,
        flagged: &FlaggedUsers,
        usage: &UsageAggregator,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();
        for inbound in &mut document.inbounds {
            let tag = inbound.tag().to_string();
            for account in inbound.clients_mut() {
                if !account.has_email() {
                    continue;
                }
                let kinds = [
                    self.deactivate_abuse(account, flagged, now),
                    self.reactivate(account, flagged),
                    self.expire(account, usage, now),
                ];
                transitions.extend(kinds.into_iter().flatten().map(|kind| Transition {
                    inbound_tag: tag.clone(),
                    email: account.email.clone(),
                    kind,
                }));
            }
        }
        transitions
    }

    fn deactivate_abuse(
        &self,
        account: &mut Account,
        flagged: &FlaggedUsers,
        now: DateTime<Utc>,
    ) -> Option<TransitionKind> {
        let ips = flagged.ips(&account.email)?;
        if let AccountStatus::Deactivated(reason) = account.status() {
            tracing::debug!(email = %account.email, reason, "Flagged account is already deactivated");
            return None;
        }
        account.deactivate(now.into(), abuse_reason(ips, self.options.range_minutes));
        Some(TransitionKind::Deactivated { ips: ips.to_vec() })
    }

    fn reactivate(&self, account: &mut Account, flagged: &FlaggedUsers) -> Option<TransitionKind> {
        if !self.options.reactive
            || !account.is_abuse_deactivated()
            || flagged.contains(&account.email)
        {
            return None;
        }
        account.reactivate();
        Some(TransitionKind::Reactivated)
    }

    fn expire(
        &self,
        account: &mut Account,
        usage: &UsageAggregator,
        now: DateTime<Utc>,
    ) -> Option<TransitionKind> {
        if !self.options.disable_expired || account.de_active_date.is_some() {
            return None;
        }

        let recorded = account.first_connect;
        let first_connect = recorded.or_else(|| {
            usage
                .get(&account.email)
                .map(|record| ConfigTime(record.first_connect))
        })?;
        let start = account.billing_start_date.unwrap_or(first_connect);
        let days = account
            .expire_days
            .unwrap_or(self.options.default_expire_days);
        if now - start.0 <= Duration::days(i64::from(days)) {
            return None;
        }

        if recorded.is_none() {
            account.first_connect = Some(first_connect);
        }
        let at = ConfigTime::from(now);
        account.deactivate(at, expiry_reason(days));
        account.expired_date = Some(at);
        Some(TransitionKind::Expired { days })
    }
}

#[cfg(test)]
#[path = "tests/policy_tests.rs"]
mod tests;
