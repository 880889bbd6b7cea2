// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Wallet lifecycle, sends, swaps, KYC transitions and authentication
//! events are appended to the audit database, keyed
//! `YYYY-MM-DD|ts|event_id` so a day's events come back in order.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{put_json, ts_key, Database, DbError, JsonTable};

pub(crate) const AUDIT_EVENTS: JsonTable = TableDefinition::new("audit_events");

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Wallet events
    WalletCreated,
    WalletArchived,

    // Transaction events
    TransactionBroadcast,
    TransactionFailed,

    // Exchange events
    QuoteCreated,
    ExchangeExecuted,
    ExchangeFailed,
    ExchangeCancelled,

    // KYC events
    KycSubmitted,
    KycDocumentUploaded,
    KycStatusChanged,
    KycLimitsChanged,
    RiskScoreSet,
    KycPiiRevealed,

    // Auth events
    UserRegistered,
    AuthSuccess,
    AuthFailure,
    TwoFactorEnabled,
    TwoFactorDisabled,

    // Admin events
    TradingPairUpserted,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// User who triggered the event (if known).
    pub user_id: Option<String>,
    /// Resource affected (wallet_id, operation_id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (wallet, transaction, exchange, kyc).
    pub resource_type: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.timestamp.format("%Y-%m-%d"),
            ts_key(self.timestamp.timestamp_nanos_opt().unwrap_or_default()),
            self.event_id
        )
    }
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    db: &'a Database,
}

impl<'a> AuditRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.db.write(|txn| {
            let mut table = txn.open_table(AUDIT_EVENTS).map_err(DbError::from)?;
            put_json(&mut table, &event.key(), event)?;
            Ok(())
        })
    }

    /// Events of one UTC day (`YYYY-MM-DD`), oldest first.
    pub fn read_events(&self, date: &str) -> Result<Vec<AuditEvent>, AuditError> {
        let day = parse_date(date)?;
        self.read_days(day, day)
    }

    /// Events of an inclusive date range.
    pub fn read_events_range(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        self.read_days(parse_date(start_date)?, parse_date(end_date)?)
    }

    pub fn search_by_user(&self, user_id: &str, date: &str) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self
            .read_events(date)?
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }

    fn read_days(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<AuditEvent>, AuditError> {
        if start > end {
            return Ok(Vec::new());
        }
        let from = format!("{}|", start.format("%Y-%m-%d"));
        let to = format!("{}}}", end.format("%Y-%m-%d"));
        self.db.read(|txn| {
            let table = txn.open_table(AUDIT_EVENTS).map_err(DbError::from)?;
            let mut events = Vec::new();
            for entry in table.range(from.as_str()..to.as_str()).map_err(DbError::from)? {
                let (_, value) = entry.map_err(DbError::from)?;
                events.push(serde_json::from_slice(value.value()).map_err(DbError::from)?);
            }
            Ok(events)
        })
    }
}

fn parse_date(date: &str) -> Result<NaiveDate, AuditError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| AuditError::InvalidDate(date.to_string()))
}

/// Log an audit event; write failures are reported through tracing and
/// otherwise ignored.
#[macro_export]
macro_rules! audit_log {
    ($db:expr, $event:expr) => {{
        let repo = $crate::storage::AuditRepository::new($db);
        let event: $crate::storage::AuditEvent = $event;
        if let Err(e) = repo.log(&event) {
            ::tracing::warn!(error = %e, event_type = ?event.event_type, "Failed to write audit event");
        }
    }};
    ($db:expr, $event_type:expr, $user_id:expr, $resource_type:expr, $resource_id:expr) => {{
        $crate::audit_log!(
            $db,
            $crate::storage::AuditEvent::new($event_type)
                .with_user($user_id)
                .with_resource($resource_type, $resource_id)
        )
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::audit_db;

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::WalletCreated)
            .with_user("user_123")
            .with_resource("wallet", "wallet_abc");

        assert_eq!(event.event_type, AuditEventType::WalletCreated);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert_eq!(event.resource_type, Some("wallet".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::AuthFailure)
            .with_user("user_123")
            .failed("bad password");

        assert!(!event.success);
        assert_eq!(event.error, Some("bad password".to_string()));
    }

    #[test]
    fn log_and_read_events() {
        let (db, _dir) = audit_db();
        let repo = AuditRepository::new(&db);

        repo.log(&AuditEvent::new(AuditEventType::WalletCreated).with_user("user_1"))
            .unwrap();
        let mut second = AuditEvent::new(AuditEventType::QuoteCreated).with_user("user_2");
        second.timestamp += chrono::Duration::milliseconds(1);
        repo.log(&second).unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = repo.read_events(&today).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::WalletCreated);
        assert_eq!(events[1].event_type, AuditEventType::QuoteCreated);

        let mine = repo.search_by_user("user_2", &today).unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[test]
    fn range_excludes_other_days() {
        let (db, _dir) = audit_db();
        let repo = AuditRepository::new(&db);
        let mut old = AuditEvent::new(AuditEventType::AuthSuccess);
        old.timestamp -= chrono::Duration::days(3);
        repo.log(&old).unwrap();
        repo.log(&AuditEvent::new(AuditEventType::AuthSuccess)).unwrap();

        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();
        let events = repo
            .read_events_range(
                &yesterday.format("%Y-%m-%d").to_string(),
                &today.format("%Y-%m-%d").to_string(),
            )
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(repo.read_events("yesterday"), Err(AuditError::InvalidDate(_))));
    }

    #[test]
    fn macro_writes_event() {
        let (db, _dir) = audit_db();
        crate::audit_log!(&db, AuditEventType::WalletCreated, "u1", "wallet", "w1");
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(AuditRepository::new(&db).read_events(&today).unwrap().len(), 1);
    }
}
