//! Remote record store.
//!
//! The store is a tabular REST API in the PostgREST dialect: one endpoint per
//! table under `/rest/v1`, column filters as query parameters
//! (`company=eq.12`), `Range` pagination with the total in `Content-Range`.
//! [`RecordStore`] is the seam; [`HttpStore`] talks to the real service and
//! [`MemoryStore`] keeps tables in memory for tests and offline runs.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::format::{self, DateParse};
use crate::headers::OvertimeField;
use crate::transform::{EmployeeRow, OvertimeRow, PayrollRow};
use crate::types::{ConflictScope, SheetKind};

pub const EMPLOYEE_TABLE: &str = "employee";
pub const PAYROLL_TABLE: &str = "payroll";
pub const OVERTIME_TABLE: &str = "overtime";
pub const AUDIT_TABLE: &str = "log_table_load";

/// Default number of rows per paginated read.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// `type_registration` of every row written by an import.
const RECORD_TYPE: &str = "Importado";

/// A column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(&'static str, Value),
    Gte(&'static str, Value),
    Lt(&'static str, Value),
    In(&'static str, Vec<Value>),
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl Filter {
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Eq(c, _) | Self::Gte(c, _) | Self::Lt(c, _) | Self::In(c, _) => *c,
        }
    }

    /// Query-string operand, e.g. `gte.2024-03-01` or `in.(1,2)`.
    #[must_use]
    pub fn operand(&self) -> String {
        match self {
            Self::Eq(_, v) => format!("eq.{}", plain(v)),
            Self::Gte(_, v) => format!("gte.{}", plain(v)),
            Self::Lt(_, v) => format!("lt.{}", plain(v)),
            Self::In(_, vs) => {
                let items: Vec<String> = vs.iter().map(plain).collect();
                format!("in.({})", items.join(","))
            }
        }
    }

    /// Evaluates the predicate against one row.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        let Some(field) = row.get(self.column()) else {
            return false;
        };
        match self {
            Self::Eq(_, v) => compare(field, v).map_or_else(|| plain(field) == plain(v), Ordering::is_eq),
            Self::Gte(_, v) => compare(field, v).is_some_and(Ordering::is_ge),
            Self::Lt(_, v) => compare(field, v).is_some_and(Ordering::is_lt),
            Self::In(_, vs) => vs
                .iter()
                .any(|v| compare(field, v).map_or_else(|| plain(field) == plain(v), Ordering::is_eq)),
        }
    }
}

/// Read/write contract of the remote store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every row of `table` matching all `filters`, projected to `columns`
    /// (`*` for all).
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError>;

    /// Whether any row matches.
    async fn exists(&self, table: &str, filters: &[Filter]) -> Result<bool, StoreError> {
        Ok(!self.select(table, "*", filters).await?.is_empty())
    }

    /// Bulk insert; returns the number of rows sent.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<usize, StoreError>;

    /// Merges `patch` into every matching row; returns the number touched.
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize, StoreError>;

    /// Deletes every matching row; returns the number removed.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Store reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpStore {
    http: Client,
    base_url: String,
    page_size: usize,
}

impl HttpStore {
    /// # Errors
    ///
    /// [`StoreError::NotConfigured`] for a blank URL or key, or a key that is
    /// not a valid header value.
    pub fn new(base_url: &str, api_key: &str, page_size: usize) -> Result<Self, StoreError> {
        if base_url.trim().is_empty() {
            return Err(StoreError::NotConfigured("store.url"));
        }
        if api_key.trim().is_empty() {
            return Err(StoreError::NotConfigured("store.api_key"));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key.trim()).map_err(|_| StoreError::NotConfigured("store.api_key"))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| StoreError::NotConfigured("store.api_key"))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn filtered(builder: RequestBuilder, filters: &[Filter]) -> RequestBuilder {
        let params: Vec<(&str, String)> = filters.iter().map(|f| (f.column(), f.operand())).collect();
        builder.query(&params)
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), %body, "store rejected request");
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn rows(response: Response) -> Result<Vec<Value>, StoreError> {
        let text = Self::checked(response).await?.text().await?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Total row count from a `Content-Range: 0-999/2345` header.
fn content_range_total(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .parse()
        .ok()
}

#[async_trait]
impl RecordStore for HttpStore {
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        let mut start = 0;
        loop {
            let end = start + self.page_size - 1;
            let request = self
                .http
                .get(self.endpoint(table))
                .query(&[("select", columns)])
                .header("Range-Unit", "items")
                .header(RANGE, format!("{start}-{end}"))
                .header("Prefer", "count=exact");
            let response = Self::checked(Self::filtered(request, filters).send().await?).await?;
            let total = content_range_total(response.headers());
            let page = Self::rows(response).await?;
            let fetched = page.len();
            rows.extend(page);
            debug!(table, start, fetched, ?total, "store page");

            if fetched < self.page_size || total.is_some_and(|t| rows.len() >= t) {
                break;
            }
            start += self.page_size;
        }
        Ok(rows)
    }

    async fn exists(&self, table: &str, filters: &[Filter]) -> Result<bool, StoreError> {
        let request = self
            .http
            .get(self.endpoint(table))
            .query(&[("select", "*"), ("limit", "1")]);
        let response = Self::filtered(request, filters).send().await?;
        Ok(!Self::rows(response).await?.is_empty())
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        let response = self
            .http
            .post(self.endpoint(table))
            .header("Prefer", "return=minimal")
            .json(&rows)
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(count)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize, StoreError> {
        let request = self
            .http
            .patch(self.endpoint(table))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = Self::filtered(request, filters).send().await?;
        Ok(Self::rows(response).await?.len())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        let request = self
            .http
            .delete(self.endpoint(table))
            .header("Prefer", "return=representation");
        let response = Self::filtered(request, filters).send().await?;
        Ok(Self::rows(response).await?.len())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Tables held in memory. Writes to a table marked with
/// [`MemoryStore::reject_writes`] fail with a 500.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `table`.
    #[must_use]
    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Snapshot of `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reject_writes(&self, table: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string());
    }

    fn check_writable(&self, table: &str) -> Result<(), StoreError> {
        if self
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
        {
            return Err(StoreError::Status {
                status: 500,
                body: format!("writes to {table} are rejected"),
            });
        }
        Ok(())
    }
}

fn project(row: &Value, columns: &str) -> Value {
    if columns.trim() == "*" {
        return row.clone();
    }
    let picked = columns
        .split(',')
        .map(str::trim)
        .filter_map(|c| row.get(c).map(|v| (c.to_string(), v.clone())))
        .collect();
    Value::Object(picked)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(&self, table: &str, columns: &str, filters: &[Filter]) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .map(|row| project(row, columns))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<usize, StoreError> {
        self.check_writable(table)?;
        let count = rows.len();
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        Ok(count)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<usize, StoreError> {
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut touched = 0;
        for row in rows.iter_mut().filter(|row| filters.iter().all(|f| f.matches(row))) {
            if let (Value::Object(target), Value::Object(changes)) = (row, &patch) {
                for (k, v) in changes {
                    target.insert(k.clone(), v.clone());
                }
            }
            touched += 1;
        }
        Ok(touched)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, StoreError> {
        self.check_writable(table)?;
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok(before - rows.len())
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// ISO-8601 UTC timestamp stamped on every written row.
#[must_use]
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn iso_date(text: &str) -> Value {
    match format::parse_date_text(text) {
        DateParse::Valid(d) => Value::String(format::format_iso(d)),
        _ => Value::Null,
    }
}

fn code(text: &str) -> Value {
    format::parse_code(text).map_or(Value::Null, Value::from)
}

fn text_or_null(text: &str) -> Value {
    let t = text.trim();
    if t.is_empty() {
        Value::Null
    } else {
        Value::String(t.to_string())
    }
}

fn user_or_null(user: &str) -> Value {
    text_or_null(user)
}

/// Numeric registration stored in a row, whether it came back as a number or
/// as text.
#[must_use]
pub fn registration_of(row: &Value) -> Option<u64> {
    match row.get("registration")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => format::parse_code(s),
        _ => None,
    }
}

#[must_use]
pub fn employee_payload(row: &EmployeeRow, user: &str, stamp: &str) -> Value {
    json!({
        "company": code(&row.company),
        "registration": code(&row.registration),
        "name": row.name.trim(),
        "cpf": format::format_cpf(&row.cpf),
        "date_birth": iso_date(&row.birth_date),
        "date_hiring": iso_date(&row.hire_date),
        "status": code(&row.status),
        "date_status": iso_date(&row.status_date),
        "role": text_or_null(&row.role),
        "sector": text_or_null(&row.sector),
        "nationality": text_or_null(&row.nationality),
        "education": text_or_null(&row.education),
        "sex": text_or_null(&row.sex),
        "marital": text_or_null(&row.marital_status),
        "ethnicity": text_or_null(&row.ethnicity),
        "salary": row.salary.value,
        "type_registration": RECORD_TYPE,
        "user_registration": user_or_null(user),
        "date_registration": stamp,
    })
}

/// `date_payroll` is the first day of the competence month, so month-window
/// conflict checks always see the row; the payment day goes to
/// `date_payment`.
#[must_use]
pub fn payroll_payload(row: &PayrollRow, user: &str, stamp: &str) -> Value {
    json!({
        "company": row.company,
        "registration": code(&row.registration),
        "name": text_or_null(&row.collaborator),
        "events_payroll": code(&row.event_code),
        "references_payroll": format::parse_money(&row.reference),
        "value_payroll": row.amount.value,
        "date_payroll": row.competence_start().map(format::format_iso),
        "date_payment": row.payment_day().map(format::format_iso),
        "type_registration": RECORD_TYPE,
        "user_registration": user_or_null(user),
        "date_registration": stamp,
    })
}

/// Minutes per event code go to `min_<code>` columns.
#[must_use]
pub fn overtime_payload(row: &OvertimeRow, user: &str, stamp: &str) -> Value {
    let mut payload = json!({
        "company": row.company,
        "registration": code(&row.registration),
        "name": text_or_null(&row.name),
        "date_": iso_date(&row.date),
        "type_registration": RECORD_TYPE,
        "user_registration": user_or_null(user),
        "date_registration": stamp,
    });
    if let Value::Object(map) = &mut payload {
        for event in OvertimeField::EVENTS {
            if let Some(code) = event.event_code() {
                map.insert(format!("min_{code}"), Value::from(row.minutes_for(event)));
            }
        }
    }
    payload
}

/// Registrations already in the employee table.
///
/// # Errors
///
/// Propagates store failures.
pub async fn fetch_registrations<S: RecordStore + ?Sized>(store: &S) -> Result<HashSet<u64>, StoreError> {
    let rows = store.select(EMPLOYEE_TABLE, "registration", &[]).await?;
    Ok(rows.iter().filter_map(registration_of).collect())
}

/// Outcome of an employee upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    /// Rows without a usable registration.
    pub skipped: usize,
}

/// Updates employees whose registration already exists, one PATCH each, then
/// bulk-inserts the rest. Rows without a registration are skipped; when a
/// registration repeats, the last row wins.
///
/// # Errors
///
/// Stops at the first store failure; earlier writes are kept.
pub async fn upsert_employees<S: RecordStore + ?Sized>(
    store: &S,
    rows: &[EmployeeRow],
    user: &str,
) -> Result<UpsertCounts, StoreError> {
    let mut counts = UpsertCounts::default();
    let mut unique: Vec<(u64, &EmployeeRow)> = Vec::new();
    let mut position: HashMap<u64, usize> = HashMap::new();
    for row in rows {
        let Some(registration) = row.registration_number() else {
            warn!(row = row.row_index, "employee row without registration skipped");
            counts.skipped += 1;
            continue;
        };
        match position.entry(registration) {
            Entry::Occupied(slot) => {
                debug!(registration, row = row.row_index, "repeated registration, later row kept");
                unique[*slot.get()].1 = row;
            }
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push((registration, row));
            }
        }
    }

    let existing = fetch_registrations(store).await?;
    let stamp = timestamp();
    let mut fresh = Vec::new();
    for (registration, row) in unique {
        let payload = employee_payload(row, user, &stamp);
        if existing.contains(&registration) {
            store
                .update(EMPLOYEE_TABLE, &[Filter::Eq("registration", Value::from(registration))], payload)
                .await?;
            counts.updated += 1;
        } else {
            fresh.push(payload);
        }
    }
    counts.inserted = store.insert(EMPLOYEE_TABLE, fresh).await?;
    debug!(inserted = counts.inserted, updated = counts.updated, skipped = counts.skipped, "employees upserted");
    Ok(counts)
}

/// # Errors
///
/// Propagates store failures.
pub async fn insert_payroll<S: RecordStore + ?Sized>(
    store: &S,
    rows: &[PayrollRow],
    user: &str,
) -> Result<usize, StoreError> {
    let stamp = timestamp();
    let payload = rows.iter().map(|r| payroll_payload(r, user, &stamp)).collect();
    store.insert(PAYROLL_TABLE, payload).await
}

/// # Errors
///
/// Propagates store failures.
pub async fn insert_overtime<S: RecordStore + ?Sized>(
    store: &S,
    rows: &[OvertimeRow],
    user: &str,
) -> Result<usize, StoreError> {
    let stamp = timestamp();
    let payload = rows.iter().map(|r| overtime_payload(r, user, &stamp)).collect();
    store.insert(OVERTIME_TABLE, payload).await
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    Inclusao,
    Delete,
}

/// One row of the import history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    #[serde(rename = "registration")]
    pub table_label: String,
    pub actions: AuditAction,
    #[serde(rename = "file_")]
    pub file_name: String,
    #[serde(rename = "user_registration")]
    pub user_name: String,
    #[serde(rename = "type_registration")]
    pub record_type: String,
    pub date_registration: String,
}

fn dash_if_blank(text: &str) -> String {
    if text.trim().is_empty() {
        "-".to_string()
    } else {
        text.trim().to_string()
    }
}

impl AuditEntry {
    #[must_use]
    pub fn new(table_label: String, actions: AuditAction, file_name: &str, user_name: &str) -> Self {
        Self {
            table_label,
            actions,
            file_name: dash_if_blank(file_name),
            user_name: dash_if_blank(user_name),
            record_type: RECORD_TYPE.to_string(),
            date_registration: timestamp(),
        }
    }
}

fn labelled(table: &str, company: Option<u32>, period: Option<&str>) -> String {
    let period = period.map(str::trim).filter(|p| !p.is_empty());
    match (company.filter(|c| *c > 0).map(format::format_company), period) {
        (Some(c), Some(p)) => format!("{table} {c}-{p}"),
        (Some(c), None) => format!("{table} {c}"),
        (None, Some(p)) => format!("{table} Ref. {p}"),
        (None, None) => table.to_string(),
    }
}

/// History label of a successful import: `payroll 0012-03/2024`,
/// `overtime 0012-05/03/2024`, `employee`.
#[must_use]
pub fn import_label(kind: SheetKind, company: Option<u32>, period: Option<&str>) -> String {
    match kind {
        SheetKind::Employee => EMPLOYEE_TABLE.to_string(),
        SheetKind::Payroll => labelled(PAYROLL_TABLE, company, period),
        SheetKind::Overtime => labelled(OVERTIME_TABLE, company, period),
    }
}

/// History label of a conflict deletion, by reference only:
/// `payroll Ref. 03/2024`.
#[must_use]
pub fn delete_label(scope: ConflictScope, period_ref: &str) -> String {
    match scope {
        ConflictScope::PayrollMonth => labelled(PAYROLL_TABLE, None, Some(period_ref)),
        ConflictScope::OvertimeDate => labelled(OVERTIME_TABLE, None, Some(period_ref)),
    }
}

/// # Errors
///
/// Propagates store failures.
pub async fn insert_audit<S: RecordStore + ?Sized>(store: &S, entry: &AuditEntry) -> Result<(), StoreError> {
    store.insert(AUDIT_TABLE, vec![serde_json::to_value(entry)?]).await?;
    Ok(())
}
