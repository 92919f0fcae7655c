//! One-time-code issuance and verification.

use super::code::{constant_time_eq, generate_code, normalize_email, normalize_phone, validate_code_format};
use super::model::{
    ChannelOutcome, CleanupReport, IssuanceLedger, IssueRequest, IssueResult, OtpRecord, OtpStats,
    Purpose, PurposeStats, VerifyResult,
};
use crate::backend::StoreBackend;
use crate::clock::{Clock, SystemClock};
use crate::collab::{Channel, Notifier, VerificationMessage};
use crate::config::{OtpConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::observability::{EngineMetrics, NoOpMetrics};
use crate::record::Record;
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use uuid::Uuid;

fn span(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Issues, rate-limits and redeems verification codes.
///
/// Per phone and purpose at most one code is live at a time. Every counter
/// involved (issuance window, attempts, consumption) is updated with a
/// compare-and-swap on a persisted record, so limits hold across restarts
/// and across any number of service instances.
pub struct OtpService<B: StoreBackend, N: Notifier> {
    codes: RecordStore<OtpRecord, B>,
    ledgers: RecordStore<IssuanceLedger, B>,
    notifier: N,
    config: OtpConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn EngineMetrics>,
}

impl<B: StoreBackend, N: Notifier> OtpService<B, N> {
    pub fn new(backend: B, notifier: N) -> Self {
        OtpService {
            codes: RecordStore::new(backend.clone()),
            ledgers: RecordStore::new(backend),
            notifier,
            config: OtpConfig::default(),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoOpMetrics),
        }
    }

    pub fn with_config(mut self, config: OtpConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store_config(mut self, config: StoreConfig) -> Self {
        self.codes = self.codes.with_config(config.clone());
        self.ledgers = self.ledgers.with_config(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EngineMetrics>) -> Self {
        self.codes = self.codes.with_metrics(Arc::clone(&metrics));
        self.ledgers = self.ledgers.with_metrics(Arc::clone(&metrics));
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue a fresh code and deliver it.
    ///
    /// Any earlier live code for the same phone and purpose is invalidated.
    /// If every requested channel fails, the new code is deleted and the
    /// issuance does not count against the rate limit.
    ///
    /// # Errors
    /// - `Error::ValidationError`: malformed phone or email, or email delivery without an email
    /// - `Error::RateLimited`: too many issuances inside the window
    /// - `Error::DeliveryFailed`: no channel accepted the message
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueResult> {
        self.issue_with(request, None).await
    }

    /// Issue again, but only if the previous issuance is older than the
    /// resend interval.
    ///
    /// # Errors
    /// As [`issue`](Self::issue), plus `Error::TooSoon`.
    pub async fn resend(&self, request: IssueRequest) -> Result<IssueResult> {
        self.issue_with(request, Some(span(self.config.resend_interval)))
            .await
    }

    async fn issue_with(
        &self,
        request: IssueRequest,
        min_interval: Option<chrono::Duration>,
    ) -> Result<IssueResult> {
        let request = validate_request(request)?;
        let now = self.clock.now();

        if let Err(e) = self
            .reserve_issuance(&request.phone, request.purpose, now, min_interval)
            .await
        {
            self.report_rejection("issue", &request.phone, &e);
            return Err(e);
        }

        match self.create_and_send(&request, now).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.refund_issuance(&request.phone, request.purpose, now)
                    .await;
                self.report_rejection("issue", &request.phone, &e);
                Err(e)
            }
        }
    }

    /// Record an issuance in the subject's ledger, enforcing the resend
    /// interval and the sliding-window limit in the same write.
    async fn reserve_issuance(
        &self,
        phone: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
        min_interval: Option<chrono::Duration>,
    ) -> Result<()> {
        let window = span(self.config.rate_window);
        let max = self.config.max_issuances_per_window;

        self.ledgers
            .upsert(&IssuanceLedger::key_for(purpose, phone), |current| {
                let mut ledger = current.unwrap_or_else(|| IssuanceLedger::new(phone, purpose));

                if let (Some(interval), Some(latest)) = (min_interval, ledger.latest()) {
                    let elapsed = now - latest;
                    if elapsed < interval {
                        return Err(Error::TooSoon {
                            retry_after: (interval - elapsed)
                                .to_std()
                                .unwrap_or(std::time::Duration::ZERO),
                        });
                    }
                }

                ledger.prune(now - window);
                if ledger.issued_at.len() >= max {
                    return Err(Error::RateLimited {
                        retry_after: ledger.retry_after(now, window),
                    });
                }
                ledger.issued_at.push(now);
                Ok(ledger)
            })
            .await?;
        Ok(())
    }

    async fn refund_issuance(&self, phone: &str, purpose: Purpose, at: DateTime<Utc>) {
        let result = self
            .ledgers
            .update(&IssuanceLedger::key_for(purpose, phone), |mut ledger| {
                ledger.refund(at);
                Ok(ledger)
            })
            .await;
        if let Err(e) = result {
            warn!(
                "Failed to release issuance slot for {} ({}): {}",
                phone, purpose, e
            );
        }
    }

    async fn create_and_send(&self, request: &IssueRequest, now: DateTime<Utc>) -> Result<IssueResult> {
        let record = OtpRecord {
            id: Uuid::now_v7().to_string(),
            phone: request.phone.clone(),
            email: request.email.clone(),
            purpose: request.purpose,
            code: generate_code(),
            attempts: 0,
            verified: false,
            superseded: false,
            created_at: now,
            expires_at: now + span(self.config.code_ttl),
            verified_at: None,
            origin_ip: request.origin_ip.clone(),
            user_agent: request.user_agent.clone(),
            metadata: request.metadata.clone(),
        };
        self.codes.put(&record, self.config.record_ttl).await?;

        // The new code is stored before anything is invalidated. Each
        // issuance then retires every live sibling issued before it, and
        // itself if a newer one already landed, so of any two overlapping
        // issuances the older code always ends up retired.
        let retired = match self.retire_older(&record).await {
            Ok(retired) => retired,
            Err(e) => {
                if let Err(e) = self.codes.delete(&record.record_key()).await {
                    error!("Failed to roll back code {}: {}", record.id, e);
                }
                return Err(e);
            }
        };
        if retired > 0 {
            debug!(
                "Invalidated {} code(s) for {} ({})",
                retired, request.phone, request.purpose
            );
        }

        let message = VerificationMessage {
            code: record.code.clone(),
            purpose: record.purpose,
            expires_at: record.expires_at,
        };

        // channels are independent, send on all of them at once
        let message = &message;
        let sends = request.method.channels().iter().map(|&channel| {
            let address = match channel {
                Channel::Sms => Some(request.phone.as_str()),
                Channel::Email => request.email.as_deref(),
            };
            async move {
                let sent = match address {
                    Some(address) => self.notifier.send(channel, address, message).await,
                    None => Err(Error::ValidationError(format!("no {} address", channel))),
                };
                (channel, sent)
            }
        });

        let mut outcomes = Vec::with_capacity(request.method.channels().len());
        for (channel, sent) in join_all(sends).await {
            match sent {
                Ok(()) => outcomes.push(ChannelOutcome {
                    channel,
                    delivered: true,
                    error: None,
                }),
                Err(e) => {
                    warn!(
                        "{} delivery of code {} failed: {}",
                        channel, record.id, e
                    );
                    outcomes.push(ChannelOutcome {
                        channel,
                        delivered: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let delivered_via: Vec<Channel> = outcomes
            .iter()
            .filter(|o| o.delivered)
            .map(|o| o.channel)
            .collect();

        if delivered_via.is_empty() {
            if let Err(e) = self.codes.delete(&record.record_key()).await {
                error!("Failed to roll back undelivered code {}: {}", record.id, e);
            }
            return Err(Error::DeliveryFailed {
                channels: request.method.channels().to_vec(),
            });
        }

        info!(
            "Issued {} code {} for {} via {:?}",
            record.purpose, record.id, record.phone, delivered_via
        );
        self.metrics
            .record_code_issued(record.purpose.as_str(), delivered_via.len());

        Ok(IssueResult {
            id: record.id,
            expires_at: record.expires_at,
            expires_in_secs: self.config.code_ttl.as_secs(),
            delivered_via,
            outcomes,
        })
    }

    /// Live codes of one subject, as currently stored.
    async fn live_codes(&self, phone: &str, purpose: Purpose) -> Result<Vec<OtpRecord>> {
        let now = self.clock.now();
        let mut records = self.codes.scan(&[purpose.as_str(), phone]).await?;
        records.retain(|r| r.is_live(now));
        Ok(records)
    }

    /// Supersede the live codes issued before `record`, and `record` itself
    /// when a newer live code exists.
    async fn retire_older(&self, record: &OtpRecord) -> Result<usize> {
        let live = self.live_codes(&record.phone, record.purpose).await?;
        let overtaken = live.iter().any(|r| record.issued_before(r));
        if overtaken {
            debug!("Code {} overtaken by a newer issuance", record.id);
        }
        let older: Vec<&OtpRecord> = live
            .iter()
            .filter(|r| r.issued_before(record) || (overtaken && r.id == record.id))
            .collect();
        self.supersede(older).await
    }

    /// Mark each code as used.
    async fn supersede<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a OtpRecord>,
    {
        let mut count = 0;
        for record in records {
            let result = self
                .codes
                .update(&record.record_key(), |mut current| {
                    if !current.verified {
                        current.supersede();
                    }
                    Ok(current)
                })
                .await;
            match result {
                Ok(_) => count += 1,
                // purged concurrently
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }

    /// Redeem a code.
    ///
    /// Works on the most recent live code of the subject. Expiry and
    /// exhaustion are checked first and cost nothing; past that every
    /// guess, right or wrong, spends one attempt in the same write that
    /// evaluates it.
    ///
    /// # Errors
    /// - `Error::ValidationError`: malformed phone or code
    /// - `Error::NotFoundOrExpired`: no live code, or `code` belongs to a superseded one
    ///   that is still stored. Once [`cleanup`](Self::cleanup) has purged it, the same
    ///   guess is judged against the live code only and yields `IncorrectCode`.
    /// - `Error::AttemptsExhausted`: the live code has no attempts left
    /// - `Error::IncorrectCode`: mismatch, with the attempts remaining
    pub async fn verify(&self, phone: &str, code: &str, purpose: Purpose) -> Result<VerifyResult> {
        let phone = normalize_phone(phone)?;
        validate_code_format(code)?;

        let now = self.clock.now();
        let records = self.codes.scan(&[purpose.as_str(), &phone]).await?;
        let target = records
            .iter()
            .filter(|r| r.is_live(now))
            .reduce(|a, b| if a.issued_before(b) { b } else { a });

        let Some(target) = target else {
            debug!("No live {} code for {}", purpose, phone);
            self.metrics.record_verification(purpose.as_str(), false);
            return Err(Error::NotFoundOrExpired);
        };

        let max_attempts = self.config.max_attempts;
        let outcome = self
            .codes
            .update(&target.record_key(), |mut record| {
                if record.verified || record.is_expired(now) {
                    return Err(Error::NotFoundOrExpired);
                }
                if record.attempts >= max_attempts {
                    return Err(Error::AttemptsExhausted);
                }
                record.attempts += 1;
                if constant_time_eq(&record.code, code) {
                    record.verified = true;
                    record.verified_at = Some(now);
                }
                Ok(record)
            })
            .await;

        let record = match outcome {
            Ok(record) => record,
            Err(e) => {
                self.metrics.record_verification(purpose.as_str(), false);
                self.report_rejection("verify", &phone, &e);
                return Err(e);
            }
        };

        if record.verified {
            let others = match self.live_codes(&phone, purpose).await {
                Ok(live) => {
                    let others: Vec<&OtpRecord> = live.iter().filter(|r| r.id != record.id).collect();
                    self.supersede(others).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = others {
                warn!("Failed to invalidate sibling codes for {}: {}", phone, e);
            }
            info!("Verified {} code {} for {}", purpose, record.id, phone);
            self.metrics.record_verification(purpose.as_str(), true);
            return Ok(VerifyResult {
                id: record.id,
                phone: record.phone,
                email: record.email,
                purpose: record.purpose,
                verified_at: record.verified_at.unwrap_or(now),
                metadata: record.metadata,
            });
        }

        self.metrics.record_verification(purpose.as_str(), false);

        let replaced = records
            .iter()
            .any(|r| r.superseded && r.id != record.id && constant_time_eq(&r.code, code));
        if replaced {
            debug!("Superseded {} code presented for {}", purpose, phone);
            return Err(Error::NotFoundOrExpired);
        }

        debug!(
            "Wrong {} code for {} ({}/{} attempts)",
            purpose, phone, record.attempts, max_attempts
        );
        Err(Error::IncorrectCode {
            remaining_attempts: max_attempts.saturating_sub(record.attempts),
        })
    }

    /// Delete every expired, consumed or exhausted code, and every issuance
    /// ledger with nothing left inside the rate window.
    ///
    /// Records that change while the sweep runs are left for the next one.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let mut report = CleanupReport::default();

        for record in self.codes.scan(&[]).await? {
            if record.is_purgeable(now, self.config.max_attempts)
                && self.codes.delete_if_unchanged(&record).await?
            {
                report.purged_count += 1;
            }
        }

        let cutoff = now - span(self.config.rate_window);
        for ledger in self.ledgers.scan(&[]).await? {
            let mut pruned = ledger.clone();
            pruned.prune(cutoff);
            if pruned.issued_at.is_empty() && self.ledgers.delete_if_unchanged(&ledger).await? {
                report.purged_ledgers += 1;
            }
        }

        info!(
            "Cleanup purged {} code(s) and {} issuance ledger(s)",
            report.purged_count, report.purged_ledgers
        );
        Ok(report)
    }

    /// Per-purpose totals over every stored code.
    pub async fn stats(&self) -> Result<OtpStats> {
        let now = self.clock.now();
        let records = self.codes.scan(&[]).await?;

        let mut by_purpose = Vec::new();
        for purpose in Purpose::ALL {
            let group: Vec<&OtpRecord> = records.iter().filter(|r| r.purpose == purpose).collect();
            if group.is_empty() {
                continue;
            }
            let attempts: u32 = group.iter().map(|r| r.attempts).sum();
            by_purpose.push(PurposeStats {
                purpose,
                total: group.len(),
                verified: group.iter().filter(|r| r.verified && !r.superseded).count(),
                expired: group.iter().filter(|r| r.is_expired(now)).count(),
                average_attempts: f64::from(attempts) / group.len() as f64,
            });
        }

        let total = by_purpose.iter().map(|s| s.total).sum();
        Ok(OtpStats { by_purpose, total })
    }

    fn report_rejection(&self, operation: &str, subject: &str, error: &Error) {
        if error.is_expected() {
            debug!("{} for {} rejected: {}", operation, subject, error);
        } else {
            warn!("{} for {} failed: {}", operation, subject, error);
            self.metrics.record_error(operation, &error.to_string());
        }
    }
}

fn validate_request(mut request: IssueRequest) -> Result<IssueRequest> {
    request.phone = normalize_phone(&request.phone)?;
    request.email = match request.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => Some(normalize_email(email)?),
        _ => None,
    };
    if request.method.needs_email() && request.email.is_none() {
        return Err(Error::ValidationError(
            "email is required for email delivery".to_string(),
        ));
    }
    Ok(request)
}
