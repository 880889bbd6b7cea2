// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! KYC profiles, documents and risk scores (kyc database).
//!
//! ## Table Layout
//!
//! - `kyc_profiles`: user_id → JSON [`KycProfile`]
//! - `kyc_documents`: document_id → JSON [`KycDocument`]
//! - `kyc_docs_by_profile`: `profile_id|document_id` → document_id
//! - `risk_scores`: user_id → JSON [`RiskScore`]
//!
//! PII fields and document locations are stored as ciphertext produced by
//! the KYC encryptor; this module never sees plaintext.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, TableDefinition};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    get_json, put_json, scan_prefix, Database, DbError, DbResult, IndexTable, JsonTable,
};

pub(crate) const KYC_PROFILES: JsonTable = TableDefinition::new("kyc_profiles");
pub(crate) const KYC_DOCUMENTS: JsonTable = TableDefinition::new("kyc_documents");
pub(crate) const KYC_DOCS_BY_PROFILE: IndexTable = TableDefinition::new("kyc_docs_by_profile");
pub(crate) const RISK_SCORES: JsonTable = TableDefinition::new("risk_scores");

/// Verification level; ordering is meaningful (`Unverified < Basic < Full`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum KycLevel {
    #[default]
    Unverified,
    Basic,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    #[default]
    NotStarted,
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Expired,
}

impl KycStatus {
    pub fn can_transition_to(&self, next: KycStatus) -> bool {
        use KycStatus::*;
        matches!(
            (self, next),
            (NotStarted, Pending)
                | (Pending, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Approved, Expired)
                | (Rejected, Pending)
                | (Expired, Pending)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycProfile {
    pub id: String,
    pub user_id: String,
    pub level: KycLevel,
    pub status: KycStatus,
    pub encrypted_first_name: Option<String>,
    pub encrypted_last_name: Option<String>,
    pub encrypted_date_of_birth: Option<String>,
    pub encrypted_nationality: Option<String>,
    pub encrypted_document_number: Option<String>,
    pub encrypted_address: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub daily_limit_usd: Decimal,
    pub monthly_limit_usd: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KycProfile {
    pub const DEFAULT_DAILY_LIMIT: Decimal = Decimal::from_parts(500, 0, 0, false, 0);
    pub const DEFAULT_MONTHLY_LIMIT: Decimal = Decimal::from_parts(5000, 0, 0, false, 0);

    pub fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            level: KycLevel::Unverified,
            status: KycStatus::NotStarted,
            encrypted_first_name: None,
            encrypted_last_name: None,
            encrypted_date_of_birth: None,
            encrypted_nationality: None,
            encrypted_document_number: None,
            encrypted_address: None,
            submitted_at: None,
            reviewed_at: None,
            approved_at: None,
            expires_at: None,
            rejection_reason: None,
            daily_limit_usd: Self::DEFAULT_DAILY_LIMIT,
            monthly_limit_usd: Self::DEFAULT_MONTHLY_LIMIT,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_all_pii(&self) -> bool {
        [
            &self.encrypted_first_name,
            &self.encrypted_last_name,
            &self.encrypted_date_of_birth,
            &self.encrypted_nationality,
            &self.encrypted_document_number,
            &self.encrypted_address,
        ]
        .iter()
        .all(|f| f.as_deref().is_some_and(|v| !v.is_empty()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    DriversLicense,
    NationalId,
    ProofOfAddress,
    Selfie,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycDocument {
    pub id: String,
    pub profile_id: String,
    pub document_type: DocumentType,
    pub encrypted_file_path: String,
    pub encrypted_file_name: String,
    pub file_size: u64,
    /// Hex SHA-256 of the content
    pub file_hash: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RiskScore {
    pub user_id: String,
    /// 0..=100
    pub score: u8,
    pub level: RiskLevel,
    pub factors: Vec<String>,
    pub aml_hits: Vec<String>,
    pub screened_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub next_review_at: NaiveDate,
}

pub struct KycRepository<'a> {
    db: &'a Database,
}

impl<'a> KycRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn get_profile(&self, user_id: &str) -> DbResult<Option<KycProfile>> {
        self.db.read(|txn| get_json(&txn.open_table(KYC_PROFILES)?, user_id))
    }

    pub fn save_profile(&self, profile: &KycProfile) -> DbResult<()> {
        self.db.write(|txn| {
            put_json(&mut txn.open_table(KYC_PROFILES)?, &profile.user_id, profile)
        })
    }

    /// Read-modify-write of a profile under the write lock.
    pub fn update_profile<F, E>(&self, user_id: &str, f: F) -> Result<KycProfile, E>
    where
        E: From<DbError>,
        F: FnOnce(&mut KycProfile) -> Result<(), E>,
    {
        self.db.write(|txn| {
            let mut table = txn.open_table(KYC_PROFILES).map_err(DbError::from)?;
            let mut profile: KycProfile = get_json(&table, user_id)?
                .ok_or_else(|| DbError::NotFound(format!("KYC profile for {user_id}")))?;
            f(&mut profile)?;
            put_json(&mut table, user_id, &profile)?;
            Ok(profile)
        })
    }

    pub fn add_document(&self, doc: &KycDocument) -> DbResult<()> {
        self.db.write(|txn| {
            let mut docs = txn.open_table(KYC_DOCUMENTS)?;
            if docs.get(doc.id.as_str())?.is_some() {
                return Err(DbError::Conflict(format!("document {} exists", doc.id)));
            }
            put_json(&mut docs, &doc.id, doc)?;
            let key = format!("{}|{}", doc.profile_id, doc.id);
            txn.open_table(KYC_DOCS_BY_PROFILE)?
                .insert(key.as_str(), doc.id.as_str())?;
            Ok(())
        })
    }

    pub fn documents(&self, profile_id: &str) -> DbResult<Vec<KycDocument>> {
        self.db.read(|txn| {
            let ids = scan_prefix(&txn.open_table(KYC_DOCS_BY_PROFILE)?, profile_id)?;
            let docs = txn.open_table(KYC_DOCUMENTS)?;
            let mut out = Vec::with_capacity(ids.len());
            for (_, id) in ids {
                if let Some(doc) = get_json(&docs, &id)? {
                    out.push(doc);
                }
            }
            Ok(out)
        })
    }

    pub fn get_risk(&self, user_id: &str) -> DbResult<Option<RiskScore>> {
        self.db.read(|txn| get_json(&txn.open_table(RISK_SCORES)?, user_id))
    }

    pub fn save_risk(&self, risk: &RiskScore) -> DbResult<()> {
        self.db
            .write(|txn| put_json(&mut txn.open_table(RISK_SCORES)?, &risk.user_id, risk))
    }
}
