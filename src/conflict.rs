//! Conflict detection and the password gate in front of deletion.
//!
//! Payroll conflicts key on company plus calendar month, overtime conflicts on
//! company plus exact date. A conflict pauses the import until the operator
//! either confirms deletion of the existing period with their password or
//! cancels. Three wrong passwords cancel the conflict.

use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ImportError, StoreError};
use crate::format;
use crate::store::{Filter, RecordStore, OVERTIME_TABLE, PAYROLL_TABLE};
use crate::types::{ConflictScope, ImportConflict};

/// Wrong passwords allowed per conflict before it is cancelled.
pub const MAX_ATTEMPTS: u8 = 3;

const PAYROLL_DATE_COLUMN: &str = "date_payroll";
const OVERTIME_DATE_COLUMN: &str = "date_";

/// `[first day of month, first day of next month)`.
#[must_use]
pub fn payroll_window(competence: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let start = competence.with_day(1)?;
    let end = start.checked_add_months(Months::new(1))?;
    Some((start, end))
}

fn company_filter(company: Option<u32>) -> Option<Filter> {
    company.map(|c| Filter::Eq("company", Value::from(c)))
}

fn payroll_filters(company: Option<u32>, start: NaiveDate, end: NaiveDate) -> Vec<Filter> {
    company_filter(company)
        .into_iter()
        .chain([
            Filter::Gte(PAYROLL_DATE_COLUMN, Value::from(format::format_iso(start))),
            Filter::Lt(PAYROLL_DATE_COLUMN, Value::from(format::format_iso(end))),
        ])
        .collect()
}

/// Existing payroll rows for the company in the competence month.
///
/// # Errors
///
/// Propagates store failures.
pub async fn detect_payroll_conflict<S: RecordStore + ?Sized>(
    store: &S,
    company: Option<u32>,
    competence: NaiveDate,
) -> Result<Option<ImportConflict>, StoreError> {
    let Some((start, end)) = payroll_window(competence) else {
        return Ok(None);
    };
    let found = store
        .exists(PAYROLL_TABLE, &payroll_filters(company, start, end))
        .await?;
    debug!(?company, %start, found, "payroll month checked");
    Ok(found.then(|| ImportConflict {
        scope: ConflictScope::PayrollMonth,
        company,
        period_ref: format::format_month_br(start),
        period_key_for_delete: format::format_iso(start),
    }))
}

/// Existing overtime rows for the company on any of `dates`. The conflict
/// names the first date, in sheet order, that is already stored.
///
/// # Errors
///
/// Propagates store failures.
pub async fn detect_overtime_conflict<S: RecordStore + ?Sized>(
    store: &S,
    company: Option<u32>,
    dates: &[NaiveDate],
) -> Result<Option<ImportConflict>, StoreError> {
    let mut distinct: Vec<NaiveDate> = Vec::new();
    for date in dates {
        if !distinct.contains(date) {
            distinct.push(*date);
        }
    }
    if distinct.is_empty() {
        return Ok(None);
    }

    let isos: Vec<String> = distinct.iter().map(|d| format::format_iso(*d)).collect();
    let filters: Vec<Filter> = company_filter(company)
        .into_iter()
        .chain([Filter::In(
            OVERTIME_DATE_COLUMN,
            isos.iter().cloned().map(Value::from).collect(),
        )])
        .collect();
    let stored = store.select(OVERTIME_TABLE, OVERTIME_DATE_COLUMN, &filters).await?;
    let stored_dates: Vec<&str> = stored
        .iter()
        .filter_map(|row| row.get(OVERTIME_DATE_COLUMN).and_then(Value::as_str))
        .collect();

    let hit = distinct
        .iter()
        .zip(&isos)
        .find(|(_, iso)| stored_dates.iter().any(|s| s.starts_with(iso.as_str())));
    debug!(?company, dates = distinct.len(), hit = hit.is_some(), "overtime dates checked");
    Ok(hit.map(|(date, iso)| ImportConflict {
        scope: ConflictScope::OvertimeDate,
        company,
        period_ref: format::format_date_br(*date),
        period_key_for_delete: iso.clone(),
    }))
}

/// Deletes the stored period a conflict points at.
///
/// # Errors
///
/// Propagates store failures. A malformed period key deletes nothing.
pub async fn delete_conflicting<S: RecordStore + ?Sized>(
    store: &S,
    conflict: &ImportConflict,
) -> Result<usize, StoreError> {
    let Some(key) = format::parse_date_text(&conflict.period_key_for_delete).date() else {
        return Ok(0);
    };
    let deleted = match conflict.scope {
        ConflictScope::PayrollMonth => {
            let Some((start, end)) = payroll_window(key) else {
                return Ok(0);
            };
            store
                .delete(PAYROLL_TABLE, &payroll_filters(conflict.company, start, end))
                .await?
        }
        ConflictScope::OvertimeDate => {
            let filters: Vec<Filter> = company_filter(conflict.company)
                .into_iter()
                .chain([Filter::Eq(OVERTIME_DATE_COLUMN, Value::from(format::format_iso(key)))])
                .collect();
            store.delete(OVERTIME_TABLE, &filters).await?
        }
    };
    info!(scope = conflict.scope.as_str(), period = %conflict.period_ref, deleted, "conflicting period deleted");
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 digest of the session password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHash(String);

impl CredentialHash {
    #[must_use]
    pub fn from_password(password: &str) -> Self {
        Self(hex::encode(Sha256::digest(password.as_bytes())))
    }

    /// # Errors
    ///
    /// [`ImportError::Session`] unless `digest` is 64 hex digits.
    pub fn from_hex(digest: &str) -> Result<Self, ImportError> {
        let digest = digest.trim().to_ascii_lowercase();
        match hex::decode(&digest) {
            Ok(bytes) if bytes.len() == 32 => Ok(Self(digest)),
            _ => Err(ImportError::Session("hash de senha invalido".to_string())),
        }
    }

    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn verify(&self, password: &str) -> bool {
        let candidate = Self::from_password(password);
        candidate
            .0
            .bytes()
            .zip(self.0.bytes())
            .fold(candidate.0.len() == self.0.len(), |same, (a, b)| same & (a == b))
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Result of one confirmation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Blank password; not counted as an attempt.
    PasswordRequired,
    /// Wrong password; the conflict stays pending.
    Denied { attempts: u8 },
    /// Third wrong password; the conflict was cancelled.
    Locked,
    /// Correct password; the caller may delete the period.
    Approved(ImportConflict),
}

/// Holds the pending conflict and counts wrong passwords per scope.
#[derive(Debug, Default)]
pub struct ConflictGate {
    pending: Option<ImportConflict>,
    attempts: HashMap<ConflictScope, u8>,
}

impl ConflictGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses on `conflict`, replacing any earlier one.
    pub fn open(&mut self, conflict: ImportConflict) {
        self.attempts.insert(conflict.scope, 0);
        self.pending = Some(conflict);
    }

    #[must_use]
    pub const fn pending(&self) -> Option<&ImportConflict> {
        self.pending.as_ref()
    }

    #[must_use]
    pub fn attempts(&self, scope: ConflictScope) -> u8 {
        self.attempts.get(&scope).copied().unwrap_or(0)
    }

    /// Checks `password` against `credential`.
    ///
    /// # Errors
    ///
    /// [`ImportError::NoConflict`] when nothing is pending.
    pub fn confirm(&mut self, password: &str, credential: &CredentialHash) -> Result<ConfirmOutcome, ImportError> {
        let scope = self.pending.as_ref().ok_or(ImportError::NoConflict)?.scope;
        let password = password.trim();
        if password.is_empty() {
            return Ok(ConfirmOutcome::PasswordRequired);
        }

        if credential.verify(password) {
            self.attempts.insert(scope, 0);
            return self
                .pending
                .take()
                .map(ConfirmOutcome::Approved)
                .ok_or(ImportError::NoConflict);
        }

        let attempts = self.attempts.entry(scope).or_insert(0);
        *attempts += 1;
        if *attempts >= MAX_ATTEMPTS {
            *attempts = 0;
            self.pending = None;
            return Ok(ConfirmOutcome::Locked);
        }
        Ok(ConfirmOutcome::Denied { attempts: *attempts })
    }

    /// Drops the pending conflict.
    pub fn cancel(&mut self) -> Option<ImportConflict> {
        let conflict = self.pending.take()?;
        self.attempts.insert(conflict.scope, 0);
        Some(conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn payroll_conflict() -> ImportConflict {
        ImportConflict {
            scope: ConflictScope::PayrollMonth,
            company: Some(12),
            period_ref: "03/2024".to_string(),
            period_key_for_delete: "2024-03-01".to_string(),
        }
    }

    #[test]
    fn window_spans_calendar_month() {
        assert_eq!(payroll_window(date(2024, 12, 15)), Some((date(2024, 12, 1), date(2025, 1, 1))));
        assert_eq!(payroll_window(date(2024, 2, 29)), Some((date(2024, 2, 1), date(2024, 3, 1))));
    }

    #[test]
    fn credential_round_trip() {
        let hash = CredentialHash::from_password("segredo");
        assert!(hash.verify("segredo"));
        assert!(!hash.verify("Segredo"));
        let parsed = CredentialHash::from_hex(&hash.as_hex().to_uppercase()).unwrap();
        assert_eq!(parsed, hash);
        assert!(CredentialHash::from_hex("abc").is_err());
    }

    #[tokio::test]
    async fn payroll_conflict_within_month_only() {
        let store = MemoryStore::new().with_rows(
            PAYROLL_TABLE,
            vec![json!({"company": 12, "date_payroll": "2024-03-01"})],
        );
        let hit = detect_payroll_conflict(&store, Some(12), date(2024, 3, 20)).await.unwrap();
        assert_eq!(hit, Some(payroll_conflict()));
        assert_eq!(detect_payroll_conflict(&store, Some(12), date(2024, 4, 1)).await.unwrap(), None);
        assert_eq!(detect_payroll_conflict(&store, Some(13), date(2024, 3, 1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overtime_conflict_names_first_stored_sheet_date() {
        let store = MemoryStore::new().with_rows(
            OVERTIME_TABLE,
            vec![
                json!({"company": 12, "date_": "2024-03-01"}),
                json!({"company": 12, "date_": "2024-03-03"}),
            ],
        );
        let dates = [date(2024, 3, 2), date(2024, 3, 3), date(2024, 3, 1)];
        let hit = detect_overtime_conflict(&store, Some(12), &dates).await.unwrap().unwrap();
        assert_eq!(hit.scope, ConflictScope::OvertimeDate);
        assert_eq!(hit.period_ref, "03/03/2024");
        assert_eq!(hit.period_key_for_delete, "2024-03-03");

        assert_eq!(detect_overtime_conflict(&store, Some(12), &[]).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_only_the_conflicting_period() {
        let store = MemoryStore::new().with_rows(
            PAYROLL_TABLE,
            vec![
                json!({"company": 12, "date_payroll": "2024-03-01"}),
                json!({"company": 12, "date_payroll": "2024-04-01"}),
            ],
        );
        assert_eq!(delete_conflicting(&store, &payroll_conflict()).await.unwrap(), 1);
        assert_eq!(store.rows(PAYROLL_TABLE), vec![json!({"company": 12, "date_payroll": "2024-04-01"})]);
    }

    #[test]
    fn blank_password_is_not_an_attempt() {
        let mut gate = ConflictGate::new();
        gate.open(payroll_conflict());
        let credential = CredentialHash::from_password("ok");
        assert_eq!(gate.confirm("  ", &credential).unwrap(), ConfirmOutcome::PasswordRequired);
        assert_eq!(gate.attempts(ConflictScope::PayrollMonth), 0);
    }

    #[test]
    fn third_wrong_password_locks_even_before_a_correct_one() {
        let mut gate = ConflictGate::new();
        gate.open(payroll_conflict());
        let credential = CredentialHash::from_password("ok");

        assert_eq!(gate.confirm("x", &credential).unwrap(), ConfirmOutcome::Denied { attempts: 1 });
        assert_eq!(gate.confirm("y", &credential).unwrap(), ConfirmOutcome::Denied { attempts: 2 });
        assert_eq!(gate.confirm("z", &credential).unwrap(), ConfirmOutcome::Locked);
        assert!(gate.pending().is_none());
        assert!(matches!(gate.confirm("ok", &credential), Err(ImportError::NoConflict)));

        gate.open(payroll_conflict());
        assert_eq!(
            gate.confirm("ok", &credential).unwrap(),
            ConfirmOutcome::Approved(payroll_conflict())
        );
    }

    #[test]
    fn attempt_counters_are_per_scope() {
        let mut gate = ConflictGate::new();
        let credential = CredentialHash::from_password("ok");
        gate.open(payroll_conflict());
        gate.confirm("x", &credential).unwrap();
        gate.confirm("x", &credential).unwrap();
        assert_eq!(gate.cancel(), Some(payroll_conflict()));

        gate.open(ImportConflict {
            scope: ConflictScope::OvertimeDate,
            company: Some(12),
            period_ref: "01/03/2024".to_string(),
            period_key_for_delete: "2024-03-01".to_string(),
        });
        assert_eq!(gate.confirm("x", &credential).unwrap(), ConfirmOutcome::Denied { attempts: 1 });
        assert_eq!(gate.attempts(ConflictScope::PayrollMonth), 0);
    }
}
