//! Certificate model - issued certificates and their revocation state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Certificate status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateStatus {
    Good,
    Revoked,
}

impl CertificateStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "good" => Some(Self::Good),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Revocation reasons, using the RFC 5280 / OCSP reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Numeric reason code.
    pub fn code(self) -> i32 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    /// Convert from a numeric reason code. Code 7 is unassigned.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Unspecified),
            1 => Some(Self::KeyCompromise),
            2 => Some(Self::CaCompromise),
            3 => Some(Self::AffiliationChanged),
            4 => Some(Self::Superseded),
            5 => Some(Self::CessationOfOperation),
            6 => Some(Self::CertificateHold),
            8 => Some(Self::RemoveFromCrl),
            9 => Some(Self::PrivilegeWithdrawn),
            10 => Some(Self::AaCompromise),
            _ => None,
        }
    }
}

/// Certificate record owned by the certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial: String,
    pub identity_id: String,
    pub status: CertificateStatus,
    pub reason: Option<RevocationReason>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub issued_utc: DateTime<Utc>,
}

impl CertificateRecord {
    /// Record a freshly issued certificate for an identity.
    pub fn issue(identity_id: impl Into<String>) -> Self {
        Self {
            serial: Uuid::new_v4().simple().to_string(),
            identity_id: identity_id.into(),
            status: CertificateStatus::Good,
            reason: None,
            revoked_utc: None,
            issued_utc: Utc::now(),
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == CertificateStatus::Revoked
    }

    /// Mark the certificate revoked.
    pub fn revoke(&mut self, reason: RevocationReason, at: DateTime<Utc>) {
        self.status = CertificateStatus::Revoked;
        self.reason = Some(reason);
        self.revoked_utc = Some(at);
    }
}
