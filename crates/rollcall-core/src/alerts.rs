//! Bounded alert ledger and day-over-day pattern detection.
//!
//! The ledger reads the attendance collection and writes only its own.
//! Pattern checks run opportunistically after attendance appends; the
//! caller swallows and logs any failure so the triggering append never
//! fails.

use crate::error::Result;
use crate::store::{collections, CollectionStore};
use crate::types::{
    ledger_record_id, AlertRecord, AlertSeverity, AttendanceRecord, AttendanceStatus,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::{Arc, PoisonError};

/// Only the most recent alerts are retained; insertion evicts the oldest.
pub const ALERT_CAP: usize = 100;

/// Relative day-over-day change (percent) that triggers a pattern alert.
const PATTERN_SHIFT_THRESHOLD_PCT: f64 = 20.0;

const PATTERN_SHIFT_KIND: &str = "attendance_pattern_shift";

#[derive(Clone)]
pub struct AlertLedger {
    store: Arc<CollectionStore>,
}

impl AlertLedger {
    pub fn new(store: Arc<CollectionStore>) -> Self {
        Self { store }
    }

    /// Append an alert, evicting the oldest entries beyond [`ALERT_CAP`]
    /// before persisting.
    pub fn raise(
        &self,
        kind: &str,
        message: &str,
        severity: AlertSeverity,
        payload: serde_json::Value,
    ) -> Result<AlertRecord> {
        let timestamp = Utc::now();
        let record = AlertRecord {
            alert_id: ledger_record_id(timestamp),
            kind: kind.to_string(),
            message: message.to_string(),
            severity,
            timestamp,
            payload,
        };

        let lock = self.store.lock(collections::ALERTS);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alerts: Vec<AlertRecord> = self.store.load(collections::ALERTS, Vec::new())?;
        alerts.push(record.clone());
        if alerts.len() > ALERT_CAP {
            let excess = alerts.len() - ALERT_CAP;
            alerts.drain(..excess);
        }
        self.store.save(collections::ALERTS, &alerts)?;

        tracing::info!(kind, severity = severity_str(severity), "alert raised");
        Ok(record)
    }

    /// All alerts, newest first.
    pub fn list(&self) -> Result<Vec<AlertRecord>> {
        let mut alerts: Vec<AlertRecord> = self.store.load(collections::ALERTS, Vec::new())?;
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(alerts)
    }

    /// Compare yesterday's present count against the same weekday one week
    /// prior and raise an alert when the relative change exceeds 20% in
    /// either direction: `warning` on a decrease, `info` on an increase.
    ///
    /// A zero prior count has no defined relative change and skips the
    /// check.
    pub fn detect_pattern_shift(&self, now: DateTime<Utc>) -> Result<Option<AlertRecord>> {
        let records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        let yesterday = (now - Duration::days(1)).date_naive();
        let week_prior = yesterday - Duration::days(7);

        let yesterday_count = present_count(&records, yesterday);
        let prior_count = present_count(&records, week_prior);
        if prior_count == 0 {
            return Ok(None);
        }

        let change_pct =
            (yesterday_count as f64 - prior_count as f64) / prior_count as f64 * 100.0;
        if change_pct.abs() <= PATTERN_SHIFT_THRESHOLD_PCT {
            return Ok(None);
        }

        let severity = if change_pct < 0.0 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        let message = format!(
            "present count on {yesterday} was {yesterday_count} vs {prior_count} on the same weekday last week ({change_pct:+.1}%)"
        );
        let payload = serde_json::json!({
            "yesterday": yesterday.to_string(),
            "yesterday_count": yesterday_count,
            "week_prior": week_prior.to_string(),
            "week_prior_count": prior_count,
            "change_percent": change_pct,
        });
        let alert = self.raise(PATTERN_SHIFT_KIND, &message, severity, payload)?;
        Ok(Some(alert))
    }
}

fn present_count(records: &[AttendanceRecord], day: NaiveDate) -> usize {
    records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present && r.timestamp.date_naive() == day)
        .count()
}

fn severity_str(severity: AlertSeverity) -> &'static str {
    match severity {
        AlertSeverity::Info => "info",
        AlertSeverity::Warning => "warning",
        AlertSeverity::Error => "error",
    }
}
