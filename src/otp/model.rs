//! Verification code records and request/response types.

use crate::collab::Channel;
use crate::error::{Error, Result};
use crate::key::KeyBuilder;
use crate::record::Record;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Why a code was issued. Codes never cross purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Registration,
    Login,
    Recovery,
    Verification,
}

impl Purpose {
    pub const ALL: [Purpose; 4] = [
        Purpose::Registration,
        Purpose::Login,
        Purpose::Recovery,
        Purpose::Verification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Registration => "registration",
            Purpose::Login => "login",
            Purpose::Recovery => "recovery",
            Purpose::Verification => "verification",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Purpose::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| Error::ValidationError(format!("Unknown purpose '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Sms,
    Email,
    Both,
}

impl DeliveryMethod {
    pub fn channels(&self) -> &'static [Channel] {
        match self {
            DeliveryMethod::Sms => &[Channel::Sms],
            DeliveryMethod::Email => &[Channel::Email],
            DeliveryMethod::Both => &[Channel::Sms, Channel::Email],
        }
    }

    pub fn needs_email(&self) -> bool {
        self.channels().contains(&Channel::Email)
    }
}

/// One issued code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub id: String,
    pub phone: String,
    pub email: Option<String>,
    pub purpose: Purpose,
    pub code: String,
    pub attempts: u32,
    /// Consumed, either by a successful match or by being superseded.
    pub verified: bool,
    /// Consumed because a newer code was issued or redeemed for the same subject.
    pub superseded: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl OtpRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Not consumed and not expired. An exhausted code is still live so
    /// that further attempts report exhaustion.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.verified && !self.is_expired(now)
    }

    /// Eligible for physical deletion.
    pub fn is_purgeable(&self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.verified || self.is_expired(now) || self.attempts >= max_attempts
    }

    /// Issue order among codes of one subject: creation time, ties broken by
    /// the time-ordered id.
    pub fn issued_before(&self, other: &OtpRecord) -> bool {
        (self.created_at, self.id.as_str()) < (other.created_at, other.id.as_str())
    }

    /// Mark as used because another code replaced it.
    pub fn supersede(&mut self) {
        self.verified = true;
        self.superseded = true;
    }
}

impl Record for OtpRecord {
    type Key = String;

    /// `{purpose}:{phone}:{id}`, so one prefix scan finds every code of a subject.
    fn record_key(&self) -> Self::Key {
        KeyBuilder::build_composite(&[self.purpose.as_str(), self.phone.as_str(), self.id.as_str()])
    }

    fn record_prefix() -> &'static str {
        "otp"
    }
}

/// Persisted issuance timestamps for one phone and purpose.
///
/// Kept apart from the code records so that the sliding-window limit
/// survives cleanup of consumed codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuanceLedger {
    pub phone: String,
    pub purpose: Purpose,
    pub issued_at: Vec<DateTime<Utc>>,
}

impl IssuanceLedger {
    pub fn new(phone: &str, purpose: Purpose) -> Self {
        IssuanceLedger {
            phone: phone.to_string(),
            purpose,
            issued_at: Vec::new(),
        }
    }

    pub fn key_for(purpose: Purpose, phone: &str) -> String {
        KeyBuilder::build_composite(&[purpose.as_str(), phone])
    }

    /// Drop issuances at or before `cutoff`.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.issued_at.retain(|t| *t > cutoff);
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.issued_at.iter().min().copied()
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.issued_at.iter().max().copied()
    }

    /// Remove one issuance recorded at `at`. Returns false if none matched.
    pub fn refund(&mut self, at: DateTime<Utc>) -> bool {
        match self.issued_at.iter().position(|t| *t == at) {
            Some(index) => {
                self.issued_at.remove(index);
                true
            }
            None => false,
        }
    }

    /// Time until an issuance frees up in a full `window`.
    pub fn retry_after(&self, now: DateTime<Utc>, window: Duration) -> std::time::Duration {
        self.oldest()
            .and_then(|oldest| (oldest + window - now).to_std().ok())
            .unwrap_or(std::time::Duration::ZERO)
    }
}

impl Record for IssuanceLedger {
    type Key = String;

    fn record_key(&self) -> Self::Key {
        Self::key_for(self.purpose, &self.phone)
    }

    fn record_prefix() -> &'static str {
        "otp_issuance"
    }
}

/// Input to [`OtpService::issue`](super::OtpService::issue).
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRequest {
    pub phone: String,
    pub email: Option<String>,
    pub purpose: Purpose,
    pub method: DeliveryMethod,
    pub metadata: BTreeMap<String, String>,
    pub origin_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl IssueRequest {
    pub fn new(phone: impl Into<String>, purpose: Purpose) -> Self {
        IssueRequest {
            phone: phone.into(),
            email: None,
            purpose,
            method: DeliveryMethod::Sms,
            metadata: BTreeMap::new(),
            origin_ip: None,
            user_agent: None,
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn method(mut self, method: DeliveryMethod) -> Self {
        self.method = method;
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn provenance(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.origin_ip = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Outcome of one delivery channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub delivered: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueResult {
    pub id: String,
    pub expires_at: DateTime<Utc>,
    pub expires_in_secs: u64,
    /// Channels that accepted the message.
    pub delivered_via: Vec<Channel>,
    pub outcomes: Vec<ChannelOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyResult {
    pub id: String,
    pub phone: String,
    pub email: Option<String>,
    pub purpose: Purpose,
    pub verified_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub purged_count: usize,
    pub purged_ledgers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurposeStats {
    pub purpose: Purpose,
    pub total: usize,
    pub verified: usize,
    pub expired: usize,
    pub average_attempts: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OtpStats {
    pub by_purpose: Vec<PurposeStats>,
    pub total: usize,
}
