// 📣 User Reports - Community signals about provider fund availability
//
// Reports are stored with a salted SHA-256 of the submitter id, never the id
// itself. The same fingerprint may only report on the same provider once per
// cooldown window.

use crate::entities::provider::ProviderIndex;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Longer comments are truncated
pub const MAX_COMMENT_CHARS: usize = 500;

// ============================================================================
// REPORT KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    /// "I got an appointment paid by the fund"
    FundsAvailable,

    /// "They told me the funds for this month are gone"
    FundsExhausted,

    /// Informational only
    LongWait,

    /// Informational only
    GoodService,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::FundsAvailable => "funds-available",
            ReportKind::FundsExhausted => "funds-exhausted",
            ReportKind::LongWait => "long-wait",
            ReportKind::GoodService => "good-service",
        }
    }

    /// Only fund reports move the availability estimate
    pub fn is_fund_signal(&self) -> bool {
        matches!(self, ReportKind::FundsAvailable | ReportKind::FundsExhausted)
    }

    pub fn all() -> [ReportKind; 4] {
        [
            ReportKind::FundsAvailable,
            ReportKind::FundsExhausted,
            ReportKind::LongWait,
            ReportKind::GoodService,
        ]
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        ReportKind::all()
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown report kind: {}", s))
    }
}

// ============================================================================
// USER REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReport {
    pub id: String,
    pub provider_id: String,
    pub kind: ReportKind,
    pub comment: Option<String>,

    /// Salted SHA-256 of the submitter id
    pub fingerprint: String,

    pub created_at: DateTime<Utc>,
}

impl UserReport {
    pub fn new(
        provider_id: &str,
        kind: ReportKind,
        comment: Option<&str>,
        submitter: &str,
        salt: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        UserReport {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            kind,
            comment: comment.and_then(clean_comment),
            fingerprint: fingerprint(submitter, salt),
            created_at,
        }
    }
}

/// Salted hash identifying a submitter without storing who they are
pub fn fingerprint(submitter: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(submitter.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn clean_comment(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_COMMENT_CHARS).collect())
}

// ============================================================================
// SUBMISSION POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReportRejection {
    #[error("Unknown provider: {provider_id}")]
    UnknownProvider { provider_id: String },

    #[error("Already reported on this provider, retry after {retry_after}")]
    DuplicateSubmission { retry_after: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct ReportPolicy {
    pub cooldown: Duration,
}

impl ReportPolicy {
    pub fn new(cooldown_hours: i64) -> Self {
        ReportPolicy {
            cooldown: Duration::hours(cooldown_hours.max(0)),
        }
    }

    /// Accept or reject a new report against what is already stored
    pub fn check(
        &self,
        index: &ProviderIndex,
        existing: &[UserReport],
        candidate: &UserReport,
    ) -> Result<(), ReportRejection> {
        if index.find_by_id(&candidate.provider_id).is_none() {
            return Err(ReportRejection::UnknownProvider {
                provider_id: candidate.provider_id.clone(),
            });
        }

        let latest = existing
            .iter()
            .filter(|r| r.provider_id == candidate.provider_id)
            .filter(|r| r.fingerprint == candidate.fingerprint)
            .filter(|r| r.created_at <= candidate.created_at)
            .map(|r| r.created_at)
            .max();

        if let Some(latest) = latest {
            let retry_after = latest + self.cooldown;
            if candidate.created_at < retry_after {
                tracing::debug!(
                    provider_id = %candidate.provider_id,
                    %retry_after,
                    "report rejected by cooldown"
                );
                return Err(ReportRejection::DuplicateSubmission { retry_after });
            }
        }

        Ok(())
    }
}

impl Default for ReportPolicy {
    fn default() -> Self {
        Self::new(24)
    }
}

// ============================================================================
// TESTS
// ============================================================================
