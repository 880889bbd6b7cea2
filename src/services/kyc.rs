// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KYC profiles, document intake, reviews and the level gate.
//!
//! PII is encrypted field by field with the KYC key; each ciphertext is
//! bound to `kyc:<user_id>:<field>` so fields cannot be swapped between
//! users or between columns.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;
use utoipa::ToSchema;

use crate::audit_log;
use crate::clock::Clock;
use crate::crypto::KeyEncryptor;
use crate::storage::{
    AuditEvent, AuditEventType, Databases, DocumentStatus, DocumentType, KycDocument, KycLevel,
    KycProfile, KycRepository, KycStatus, RiskLevel, RiskScore,
};

use super::{ServiceError, ServiceResult};

pub const MAX_DOCUMENT_BYTES: usize = 10 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];
const APPROVAL_VALIDITY_DAYS: i64 = 365;

/// Plaintext PII as submitted by the user.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct KycSubmission {
    pub first_name: String,
    pub last_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub nationality: String,
    pub document_number: String,
    pub address: String,
}

#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub document_type: DocumentType,
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

/// Profile as shown to its owner: no PII.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycProfileView {
    pub level: KycLevel,
    pub status: KycStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[schema(value_type = String)]
    pub daily_limit_usd: Decimal,
    #[schema(value_type = String)]
    pub monthly_limit_usd: Decimal,
}

impl From<&KycProfile> for KycProfileView {
    fn from(p: &KycProfile) -> Self {
        Self {
            level: p.level,
            status: p.status,
            submitted_at: p.submitted_at,
            reviewed_at: p.reviewed_at,
            approved_at: p.approved_at,
            expires_at: p.expires_at,
            rejection_reason: p.rejection_reason.clone(),
            daily_limit_usd: p.daily_limit_usd,
            monthly_limit_usd: p.monthly_limit_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycDocumentView {
    pub id: String,
    pub document_type: DocumentType,
    pub file_size: u64,
    pub file_hash: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&KycDocument> for KycDocumentView {
    fn from(d: &KycDocument) -> Self {
        Self {
            id: d.id.clone(),
            document_type: d.document_type,
            file_size: d.file_size,
            file_hash: d.file_hash.clone(),
            mime_type: d.mime_type.clone(),
            status: d.status,
            uploaded_at: d.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycStatusView {
    pub profile: Option<KycProfileView>,
    pub documents: Vec<KycDocumentView>,
    pub risk: Option<RiskScore>,
}

/// Decrypted PII for administrator review.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KycPii {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub nationality: String,
    pub document_number: String,
    pub address: String,
}

fn field_ad(user_id: &str, field: &str) -> String {
    format!("kyc:{user_id}:{field}")
}

/// Gate on verification level for money-moving operations.
#[derive(Clone)]
pub struct KycEnforcer {
    dbs: Arc<Databases>,
    clock: Arc<dyn Clock>,
}

impl KycEnforcer {
    pub fn new(dbs: Arc<Databases>, clock: Arc<dyn Clock>) -> Self {
        Self { dbs, clock }
    }

    /// Pass iff the caller has an approved, unexpired profile at `level` or above.
    pub fn require(&self, user_id: Option<&str>, level: KycLevel) -> ServiceResult<KycProfile> {
        let user_id = user_id.filter(|u| !u.is_empty()).ok_or(ServiceError::AuthRequired)?;
        let profile = KycRepository::new(&self.dbs.kyc)
            .get_profile(user_id)?
            .ok_or(ServiceError::ProfileRequired)?;

        let unexpired = profile.expires_at.is_none_or(|at| at > self.clock.now());
        if profile.status != KycStatus::Approved || profile.level < level || !unexpired {
            return Err(ServiceError::LevelInsufficient { required: level });
        }
        Ok(profile)
    }
}

pub struct KycService {
    dbs: Arc<Databases>,
    encryptor: Arc<KeyEncryptor>,
    clock: Arc<dyn Clock>,
}

impl KycService {
    pub fn new(dbs: Arc<Databases>, encryptor: Arc<KeyEncryptor>, clock: Arc<dyn Clock>) -> Self {
        Self { dbs, encryptor, clock }
    }

    fn repo(&self) -> KycRepository<'_> {
        KycRepository::new(&self.dbs.kyc)
    }

    fn load_or_create(&self, user_id: &str) -> ServiceResult<KycProfile> {
        if let Some(profile) = self.repo().get_profile(user_id)? {
            return Ok(profile);
        }
        let profile = KycProfile::new(user_id, self.clock.now());
        self.repo().save_profile(&profile)?;
        Ok(profile)
    }

    /// Store a document against the caller's profile, creating the profile
    /// on first upload.
    pub fn add_document(&self, user_id: &str, upload: DocumentUpload) -> ServiceResult<KycDocument> {
        if !ALLOWED_MIME_TYPES.contains(&upload.mime_type.as_str()) {
            return Err(ServiceError::UnsupportedMediaType(upload.mime_type));
        }
        if upload.content.is_empty() {
            return Err(ServiceError::validation("file", "document is empty"));
        }
        if upload.content.len() > MAX_DOCUMENT_BYTES {
            return Err(ServiceError::PayloadTooLarge(format!(
                "document exceeds {MAX_DOCUMENT_BYTES} bytes"
            )));
        }
        if upload.file_name.trim().is_empty() {
            return Err(ServiceError::validation("file_name", "file name is required"));
        }

        let profile = self.load_or_create(user_id)?;
        let id = uuid::Uuid::new_v4().to_string();
        let path = format!("kyc/{}/{id}", profile.id);
        let doc = KycDocument {
            encrypted_file_path: self
                .encryptor
                .encrypt_str(&path, &field_ad(user_id, "document_path"))?,
            encrypted_file_name: self
                .encryptor
                .encrypt_str(&upload.file_name, &field_ad(user_id, "document_name"))?,
            id,
            profile_id: profile.id,
            document_type: upload.document_type,
            file_size: upload.content.len() as u64,
            file_hash: alloy::hex::encode(Sha256::digest(&upload.content)),
            mime_type: upload.mime_type,
            status: DocumentStatus::Pending,
            uploaded_at: self.clock.now(),
        };
        self.repo().add_document(&doc)?;

        audit_log!(
            &self.dbs.audit,
            AuditEventType::KycDocumentUploaded,
            user_id,
            "kyc_document",
            doc.id.as_str()
        );
        Ok(doc)
    }

    /// Encrypt and store PII and move the profile to `pending`.
    pub fn submit(&self, user_id: &str, submission: KycSubmission) -> ServiceResult<KycProfile> {
        let fields = [
            ("first_name", submission.first_name.trim()),
            ("last_name", submission.last_name.trim()),
            ("date_of_birth", submission.date_of_birth.trim()),
            ("nationality", submission.nationality.trim()),
            ("document_number", submission.document_number.trim()),
            ("address", submission.address.trim()),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(ServiceError::validation(field, format!("{field} is required")));
            }
        }
        let dob = NaiveDate::parse_from_str(submission.date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|_| ServiceError::validation("date_of_birth", "date_of_birth must be YYYY-MM-DD"))?;
        if dob >= self.clock.now().date_naive() {
            return Err(ServiceError::validation("date_of_birth", "date_of_birth must be in the past"));
        }

        let profile = self.load_or_create(user_id)?;
        if self.repo().documents(&profile.id)?.is_empty() {
            return Err(ServiceError::validation("documents", "upload at least one document before submitting"));
        }

        let mut sealed = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            sealed.push(self.encryptor.encrypt_str(value, &field_ad(user_id, field))?);
        }
        let now = self.clock.now();

        let updated = self.repo().update_profile(user_id, |p| {
            if !p.status.can_transition_to(KycStatus::Pending) {
                return Err(ServiceError::invalid_status(
                    status_name(p.status),
                    status_name(KycStatus::Pending),
                ));
            }
            let mut it = sealed.into_iter();
            p.encrypted_first_name = it.next();
            p.encrypted_last_name = it.next();
            p.encrypted_date_of_birth = it.next();
            p.encrypted_nationality = it.next();
            p.encrypted_document_number = it.next();
            p.encrypted_address = it.next();
            p.status = KycStatus::Pending;
            p.submitted_at = Some(now);
            p.rejection_reason = None;
            p.updated_at = now;
            Ok(())
        })?;

        info!(user_id = %user_id, "KYC profile submitted");
        audit_log!(&self.dbs.audit, AuditEventType::KycSubmitted, user_id, "kyc", updated.id.as_str());
        Ok(updated)
    }

    pub fn status(&self, user_id: &str) -> ServiceResult<KycStatusView> {
        let profile = self.repo().get_profile(user_id)?;
        let documents = match &profile {
            Some(p) => self.repo().documents(&p.id)?,
            None => Vec::new(),
        };
        Ok(KycStatusView {
            profile: profile.as_ref().map(KycProfileView::from),
            documents: documents.iter().map(KycDocumentView::from).collect(),
            risk: self.repo().get_risk(user_id)?,
        })
    }

    /// Decrypt the submitted PII of a user for review.
    pub fn reveal_pii(&self, user_id: &str) -> ServiceResult<KycPii> {
        let profile = self
            .repo()
            .get_profile(user_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("KYC profile for {user_id}")))?;
        if !profile.has_all_pii() {
            return Err(ServiceError::NotFound(format!("submitted PII for {user_id}")));
        }
        let open = |field: &str, value: &Option<String>| -> ServiceResult<String> {
            let sealed = value.as_deref().unwrap_or_default();
            Ok(self
                .encryptor
                .decrypt_str(sealed, &field_ad(user_id, field))?
                .to_string())
        };
        Ok(KycPii {
            first_name: open("first_name", &profile.encrypted_first_name)?,
            last_name: open("last_name", &profile.encrypted_last_name)?,
            date_of_birth: open("date_of_birth", &profile.encrypted_date_of_birth)?,
            nationality: open("nationality", &profile.encrypted_nationality)?,
            document_number: open("document_number", &profile.encrypted_document_number)?,
            address: open("address", &profile.encrypted_address)?,
        })
    }

    // =========================================================================
    // Review transitions (admin)
    // =========================================================================

    fn transition<F>(&self, user_id: &str, next: KycStatus, apply: F) -> ServiceResult<KycProfile>
    where
        F: FnOnce(&mut KycProfile, DateTime<Utc>) -> ServiceResult<()>,
    {
        let now = self.clock.now();
        let updated = self.repo().update_profile(user_id, |p| {
            if !p.status.can_transition_to(next) {
                return Err(ServiceError::invalid_status(status_name(p.status), status_name(next)));
            }
            apply(p, now)?;
            p.status = next;
            p.updated_at = now;
            Ok(())
        })?;

        info!(user_id = %user_id, status = status_name(next), "KYC status changed");
        audit_log!(
            &self.dbs.audit,
            AuditEvent::new(AuditEventType::KycStatusChanged)
                .with_user(user_id)
                .with_resource("kyc", updated.id.as_str())
                .with_details(serde_json::json!({ "status": status_name(next), "level": updated.level }))
        );
        Ok(updated)
    }

    pub fn start_review(&self, user_id: &str) -> ServiceResult<KycProfile> {
        self.transition(user_id, KycStatus::UnderReview, |_, _| Ok(()))
    }

    pub fn approve(&self, user_id: &str, level: KycLevel) -> ServiceResult<KycProfile> {
        if level == KycLevel::Unverified {
            return Err(ServiceError::validation("level", "approval level must be basic or full"));
        }
        self.transition(user_id, KycStatus::Approved, |p, now| {
            if !p.has_all_pii() {
                return Err(ServiceError::validation("profile", "profile has no submitted PII"));
            }
            p.level = level;
            p.reviewed_at = Some(now);
            p.approved_at = Some(now);
            p.expires_at = Some(now + Duration::days(APPROVAL_VALIDITY_DAYS));
            p.rejection_reason = None;
            p.daily_limit_usd = p.daily_limit_usd.max(KycProfile::DEFAULT_DAILY_LIMIT);
            p.monthly_limit_usd = p.monthly_limit_usd.max(KycProfile::DEFAULT_MONTHLY_LIMIT);
            Ok(())
        })
    }

    pub fn reject(&self, user_id: &str, reason: &str) -> ServiceResult<KycProfile> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::validation("reason", "a rejection reason is required"));
        }
        self.transition(user_id, KycStatus::Rejected, |p, now| {
            p.reviewed_at = Some(now);
            p.rejection_reason = Some(reason.to_string());
            Ok(())
        })
    }

    pub fn expire(&self, user_id: &str) -> ServiceResult<KycProfile> {
        self.transition(user_id, KycStatus::Expired, |p, now| {
            p.expires_at = Some(now);
            Ok(())
        })
    }

    pub fn set_limits(&self, user_id: &str, daily: Decimal, monthly: Decimal) -> ServiceResult<KycProfile> {
        if daily < Decimal::ZERO {
            return Err(ServiceError::validation("daily_limit_usd", "limit must not be negative"));
        }
        if monthly < daily {
            return Err(ServiceError::validation(
                "monthly_limit_usd",
                "monthly limit must be at least the daily limit",
            ));
        }
        let now = self.clock.now();
        let updated = self.repo().update_profile::<_, ServiceError>(user_id, |p| {
            p.daily_limit_usd = daily;
            p.monthly_limit_usd = monthly;
            p.updated_at = now;
            Ok(())
        })?;
        audit_log!(
            &self.dbs.audit,
            AuditEvent::new(AuditEventType::KycLimitsChanged)
                .with_user(user_id)
                .with_details(serde_json::json!({ "daily": daily, "monthly": monthly }))
        );
        Ok(updated)
    }

    pub fn set_risk_score(
        &self,
        user_id: &str,
        score: u8,
        factors: Vec<String>,
        aml_hits: Vec<String>,
    ) -> ServiceResult<RiskScore> {
        if score > 100 {
            return Err(ServiceError::validation("score", "score must be between 0 and 100"));
        }
        let now = self.clock.now();
        let level = RiskLevel::from_score(score);
        let review_in = match level {
            RiskLevel::High | RiskLevel::Critical => Duration::days(30),
            RiskLevel::Low | RiskLevel::Medium => Duration::days(90),
        };
        let risk = RiskScore {
            user_id: user_id.to_string(),
            score,
            level,
            factors,
            aml_hits,
            screened_at: now,
            next_review_at: (now + review_in).date_naive(),
        };
        self.repo().save_risk(&risk)?;
        audit_log!(&self.dbs.audit, AuditEventType::RiskScoreSet, user_id, "risk_score", user_id);
        Ok(risk)
    }
}

fn status_name(status: KycStatus) -> &'static str {
    match status {
        KycStatus::NotStarted => "not_started",
        KycStatus::Pending => "pending",
        KycStatus::UnderReview => "under_review",
        KycStatus::Approved => "approved",
        KycStatus::Rejected => "rejected",
        KycStatus::Expired => "expired",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::test_support::databases;

    pub(crate) fn submission() -> KycSubmission {
        KycSubmission {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            date_of_birth: "1990-12-10".into(),
            nationality: "GB".into(),
            document_number: "X1234567".into(),
            address: "1 Main St".into(),
        }
    }

    pub(crate) fn png(bytes: usize) -> DocumentUpload {
        DocumentUpload {
            document_type: DocumentType::Passport,
            file_name: "passport.png".into(),
            mime_type: "image/png".into(),
            content: vec![0xAB; bytes],
        }
    }

    fn service() -> (KycService, KycEnforcer, Arc<ManualClock>, tempfile::TempDir) {
        let (dbs, dir) = databases();
        let dbs = Arc::new(dbs);
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let encryptor = Arc::new(KeyEncryptor::new(&[9u8; crate::crypto::KEY_LEN]).unwrap());
        (
            KycService::new(dbs.clone(), encryptor, clock.clone()),
            KycEnforcer::new(dbs, clock.clone()),
            clock,
            dir,
        )
    }

    #[test]
    fn full_review_cycle_unlocks_gate() {
        let (svc, gate, _clock, _dir) = service();
        assert!(matches!(gate.require(Some("u1"), KycLevel::Basic), Err(ServiceError::ProfileRequired)));
        assert!(matches!(gate.require(None, KycLevel::Basic), Err(ServiceError::AuthRequired)));

        svc.add_document("u1", png(16)).unwrap();
        svc.submit("u1", submission()).unwrap();
        assert!(matches!(
            gate.require(Some("u1"), KycLevel::Basic),
            Err(ServiceError::LevelInsufficient { .. })
        ));

        svc.start_review("u1").unwrap();
        let approved = svc.approve("u1", KycLevel::Basic).unwrap();
        assert_eq!(approved.daily_limit_usd, Decimal::from(500));
        assert!(approved.expires_at.is_some());

        assert!(gate.require(Some("u1"), KycLevel::Basic).is_ok());
        assert!(matches!(
            gate.require(Some("u1"), KycLevel::Full),
            Err(ServiceError::LevelInsufficient { .. })
        ));
    }

    #[test]
    fn expired_approval_fails_gate() {
        let (svc, gate, clock, _dir) = service();
        svc.add_document("u1", png(16)).unwrap();
        svc.submit("u1", submission()).unwrap();
        svc.start_review("u1").unwrap();
        svc.approve("u1", KycLevel::Full).unwrap();

        clock.advance(Duration::days(366));
        assert!(matches!(
            gate.require(Some("u1"), KycLevel::Basic),
            Err(ServiceError::LevelInsufficient { .. })
        ));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let (svc, _gate, _clock, _dir) = service();
        svc.add_document("u1", png(16)).unwrap();
        svc.submit("u1", submission()).unwrap();
        assert!(matches!(svc.approve("u1", KycLevel::Basic), Err(ServiceError::InvalidStatus { .. })));
        assert!(matches!(svc.submit("u1", submission()), Err(ServiceError::InvalidStatus { .. })));

        svc.start_review("u1").unwrap();
        svc.reject("u1", "blurry photo").unwrap();
        // rejected profiles may resubmit
        assert_eq!(svc.submit("u1", submission()).unwrap().status, KycStatus::Pending);
    }

    #[test]
    fn submission_requires_a_document() {
        let (svc, _gate, _clock, _dir) = service();
        let err = svc.submit("u1", submission()).unwrap_err();
        assert!(matches!(err, ServiceError::Validation { field: "documents", .. }));
    }

    #[test]
    fn pii_is_encrypted_and_revealable() {
        let (svc, _gate, _clock, _dir) = service();
        svc.add_document("u1", png(16)).unwrap();
        let profile = svc.submit("u1", submission()).unwrap();
        let sealed = profile.encrypted_first_name.unwrap();
        assert!(!sealed.contains("Ada"));
        assert_eq!(svc.reveal_pii("u1").unwrap().first_name, "Ada");
    }

    #[test]
    fn document_validation() {
        let (svc, _gate, _clock, _dir) = service();
        let mut gif = png(16);
        gif.mime_type = "image/gif".into();
        assert!(matches!(svc.add_document("u1", gif), Err(ServiceError::UnsupportedMediaType(_))));
        assert!(matches!(
            svc.add_document("u1", png(MAX_DOCUMENT_BYTES + 1)),
            Err(ServiceError::PayloadTooLarge(_))
        ));
        assert!(matches!(svc.add_document("u1", png(0)), Err(ServiceError::Validation { .. })));

        let doc = svc.add_document("u1", png(MAX_DOCUMENT_BYTES)).unwrap();
        assert_eq!(doc.file_hash.len(), 64);
        assert_eq!(svc.status("u1").unwrap().documents.len(), 1);
    }

    #[test]
    fn risk_levels_and_review_dates() {
        let (svc, _gate, clock, _dir) = service();
        let today = clock.now().date_naive();
        let low = svc.set_risk_score("u1", 10, vec![], vec![]).unwrap();
        assert_eq!(low.level, RiskLevel::Low);
        assert_eq!(low.next_review_at, today + Duration::days(90));

        let high = svc.set_risk_score("u1", 80, vec!["pep".into()], vec![]).unwrap();
        assert_eq!(high.level, RiskLevel::Critical);
        assert_eq!(high.next_review_at, today + Duration::days(30));
        assert!(svc.set_risk_score("u1", 101, vec![], vec![]).is_err());
    }
}
