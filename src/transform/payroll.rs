//! Payroll ("FOLHA PGTO") transformer.
//!
//! Three layouts are tried in order and the first that recognizes the sheet
//! wins:
//!
//! 1. `structured`: row 0 carries every required payroll header.
//! 2. `header-scan`: the header row sits further down (below a report
//!    banner); data ends at the first totals/summary row.
//! 3. `event-ledger`: an exported event report, one block per event code,
//!    read line by line from the decoded text (or from the matrix rendered
//!    as comma-separated lines when the text is not a report).

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::ImportError;
use crate::excel::SourceFile;
use crate::format::{self, Money};
use crate::headers::{canonicalize, normalize_header, FieldSet, HeaderMap, PayrollField};
use crate::types::{CellValue, SheetMatrix};

use super::meta::{company_code, SheetMeta};
use super::registration_text;

/// Marker identifying an event-ledger text report.
pub const LEDGER_MARKER: &str = "Evento,Colaborador";

static EVENT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{3,4},-").expect("valid event header pattern"));

static COMPANY_BANNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^0005,-,[PF]").expect("valid banner pattern"));

static LEDGER_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"]|"")*"|[^,]+"#).expect("valid field pattern"));

static SERIAL_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").expect("valid serial pattern"));

/// Report lines that never carry data.
const LEDGER_SKIP_PREFIXES: [&str; 4] = ["Relação de Eventos", "Relacao de Eventos", "Período:", LEDGER_MARKER];
const LEDGER_SKIP_CONTAINS: &str = "FPRF004.OPE";
const LEDGER_BLOCK_END: &str = "Total de Colaboradores";
/// cadastro, nome, situacao, competencia, pagamento, referencia, valor
const LEDGER_MIN_FIELDS: usize = 7;

/// One payroll event line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRow {
    pub row_index: usize,
    pub registration: String,
    pub collaborator: String,
    pub event_code: String,
    /// `mm/yyyy` when it parses, the original text otherwise.
    pub competence: String,
    pub reference: String,
    pub amount: Money,
    pub company: Option<u32>,
    /// `dd/mm/yyyy`, event-ledger reports only.
    pub payment_date: Option<String>,
    pub situation: Option<String>,
    pub event_description: Option<String>,
}

impl PayrollRow {
    #[must_use]
    pub fn registration_number(&self) -> Option<u64> {
        format::parse_code(&self.registration)
    }

    /// First day of the competence month.
    #[must_use]
    pub fn competence_start(&self) -> Option<NaiveDate> {
        format::parse_competence(&self.competence)
    }

    /// Payment date, falling back to the competence month.
    #[must_use]
    pub fn payment_day(&self) -> Option<NaiveDate> {
        self.payment_date
            .as_deref()
            .and_then(|d| format::parse_date_text(d).date())
            .or_else(|| self.competence_start())
    }
}

/// A payroll layout. `None` means "not this layout".
pub type Strategy = fn(&SourceFile, &SheetMeta) -> Option<Vec<PayrollRow>>;

/// Layouts in the order they are tried.
pub const STRATEGIES: [(&str, Strategy); 3] = [
    ("structured", structured),
    ("header-scan", header_scan),
    ("event-ledger", event_ledger),
];

/// Runs [`STRATEGIES`] in order.
///
/// # Errors
///
/// [`ImportError::MissingHeaders`] (judged against row 0) when no layout
/// recognizes the sheet.
pub fn transform(
    source: &SourceFile,
    meta: &SheetMeta,
) -> Result<(Vec<PayrollRow>, &'static str), ImportError> {
    for (name, strategy) in STRATEGIES {
        if let Some(rows) = strategy(source, meta) {
            debug!(strategy = name, rows = rows.len(), "payroll layout recognized");
            return Ok((rows, name));
        }
    }
    let header = canonicalize::<PayrollField>(source.matrix.row(0));
    match header.require() {
        Err(missing) => Err(ImportError::MissingHeaders(missing)),
        Ok(()) => Err(ImportError::EmptySheet),
    }
}

// ---------------------------------------------------------------------------
// Header-driven layouts
// ---------------------------------------------------------------------------

/// Row 0 holds all six required headers.
pub fn structured(source: &SourceFile, meta: &SheetMeta) -> Option<Vec<PayrollRow>> {
    let header = canonicalize::<PayrollField>(source.matrix.row(0));
    if !header.contains_all(PayrollField::REQUIRED) {
        return None;
    }
    Some(rows_below(&source.matrix, &header, 0, meta, false))
}

/// The first row with registration, event and amount headers.
pub fn header_scan(source: &SourceFile, meta: &SheetMeta) -> Option<Vec<PayrollRow>> {
    let matrix = &source.matrix;
    let (header_idx, header) = (0..matrix.height()).find_map(|r| {
        let header = canonicalize::<PayrollField>(matrix.row(r));
        header.contains_all(&PayrollField::ANCHORS).then_some((r, header))
    })?;
    Some(rows_below(matrix, &header, header_idx, meta, true))
}

fn is_total_row(row: &[CellValue]) -> bool {
    row.iter().any(|cell| {
        let norm = normalize_header(&cell.display());
        !norm.is_empty() && (norm.starts_with("total") || norm.contains("resumo"))
    })
}

fn rows_below(
    matrix: &SheetMatrix,
    header: &HeaderMap<PayrollField>,
    header_idx: usize,
    meta: &SheetMeta,
    stop_at_totals: bool,
) -> Vec<PayrollRow> {
    let mut rows = Vec::new();
    for r in header_idx + 1..matrix.height() {
        let row = matrix.row(r);
        if matrix.is_row_blank(r) {
            continue;
        }
        if stop_at_totals && is_total_row(row) {
            break;
        }
        if let Some(built) = build_row(header, row, r + 1, meta) {
            rows.push(built);
        }
    }
    rows
}

fn build_row(
    header: &HeaderMap<PayrollField>,
    row: &[CellValue],
    row_index: usize,
    meta: &SheetMeta,
) -> Option<PayrollRow> {
    let cell = |field| {
        header
            .position(field)
            .and_then(|col| row.get(col))
            .cloned()
            .unwrap_or_default()
    };

    let registration = registration_text(&cell(PayrollField::Registration));
    let collaborator = cell(PayrollField::CollaboratorName).display();
    let event_code = cell(PayrollField::EventCode).display();
    let reference = cell(PayrollField::ReferenceQty).display();
    let amount = Money::from_cell(&cell(PayrollField::Amount));

    let has_data = [&registration, &collaborator, &event_code, &reference]
        .iter()
        .any(|s| !s.is_empty())
        || !amount.is_blank();
    if !has_data {
        return None;
    }

    let competence_cell = cell(PayrollField::Competence);
    let competence = format::competence_label(&competence_cell)
        .or_else(|| (!competence_cell.is_blank()).then(|| competence_cell.display()))
        .or_else(|| meta.competence.clone())
        .unwrap_or_default();

    Some(PayrollRow {
        row_index,
        registration,
        collaborator,
        event_code,
        competence,
        reference,
        amount,
        company: company_code(&cell(PayrollField::Company)).or(meta.company),
        ..PayrollRow::default()
    })
}

// ---------------------------------------------------------------------------
// Event ledger
// ---------------------------------------------------------------------------

/// Event-ledger report, from the decoded text when it carries the marker,
/// otherwise from the matrix rendered as CSV lines.
pub fn event_ledger(source: &SourceFile, meta: &SheetMeta) -> Option<Vec<PayrollRow>> {
    let text = if source.has_ledger_marker() {
        source.text.clone()
    } else {
        matrix_to_csv(&source.matrix)
    };
    let mut rows = parse_ledger(&text);
    if rows.is_empty() {
        return None;
    }
    for row in &mut rows {
        if row.competence.is_empty() {
            row.competence = meta.competence.clone().unwrap_or_default();
        }
        row.company = meta.company;
    }
    Some(rows)
}

fn escape_csv(cell: &CellValue) -> String {
    let text = match cell {
        CellValue::Text(s) => s.clone(),
        other => other.display(),
    };
    if text.contains(['"', ',', '\n', ';']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text
    }
}

fn matrix_to_csv(matrix: &SheetMatrix) -> String {
    matrix
        .rows()
        .map(|row| row.iter().map(escape_csv).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits a report line into fields. Quoted runs keep their commas; empty
/// fields collapse, so `150,00` reads as two fields.
fn split_ledger_line(line: &str) -> Vec<String> {
    LEDGER_FIELD
        .find_iter(line)
        .map(|m| clean_field(m.as_str()))
        .collect()
}

fn clean_field(field: &str) -> String {
    let trimmed = field.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace("\"\"", "\"").trim().to_string()
}

/// Serial day numbers in a report cell are rendered with `render`.
fn ledger_date(raw: &str, render: fn(NaiveDate) -> String) -> String {
    if SERIAL_TEXT.is_match(raw) {
        return raw
            .parse::<f64>()
            .ok()
            .and_then(format::serial_to_date)
            .map(render)
            .unwrap_or_default();
    }
    raw.to_string()
}

fn is_skipped(line: &str) -> bool {
    COMPANY_BANNER.is_match(line)
        || LEDGER_SKIP_PREFIXES.iter().any(|p| line.starts_with(p))
        || line.contains(LEDGER_SKIP_CONTAINS)
}

struct EventBlock {
    code: String,
    description: Option<String>,
}

fn event_block(line: &str) -> Option<EventBlock> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 3 {
        return None;
    }
    let raw_code = parts[0].trim();
    let code = raw_code
        .parse::<u32>()
        .map_or_else(|_| raw_code.to_string(), |n| n.to_string());
    let description = clean_field(&parts[2..].join(","))
        .trim_end_matches(',')
        .trim()
        .to_string();
    Some(EventBlock {
        code,
        description: (!description.is_empty()).then_some(description),
    })
}

/// Parses an event-ledger report.
///
/// The first competence read is carried into rows that have none.
#[must_use]
pub fn parse_ledger(text: &str) -> Vec<PayrollRow> {
    let mut rows = Vec::new();
    let mut current: Option<EventBlock> = None;
    let mut first_competence: Option<String> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || is_skipped(line) {
            continue;
        }
        if EVENT_HEADER.is_match(line) {
            if let Some(block) = event_block(line) {
                current = Some(block);
            }
            continue;
        }
        if line.contains(LEDGER_BLOCK_END) {
            current = None;
            continue;
        }

        let Some(block) = &current else { continue };
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let parts = split_ledger_line(line);
        if parts.len() < LEDGER_MIN_FIELDS {
            continue;
        }

        let competence = ledger_date(&parts[3], format::format_month_br);
        let competence = format::competence_label(&CellValue::from(competence.as_str())).unwrap_or(competence);
        let payment = ledger_date(&parts[4], format::format_date_br);
        if first_competence.is_none() && !competence.is_empty() {
            first_competence = Some(competence.clone());
        }

        rows.push(PayrollRow {
            row_index: idx + 1,
            registration: parts[0].clone(),
            collaborator: parts[1].clone(),
            situation: Some(parts[2].clone()),
            competence,
            payment_date: (!payment.is_empty()).then_some(payment),
            reference: parts[5].clone(),
            amount: Money::from_text(&parts[6]),
            event_code: block.code.clone(),
            event_description: block.description.clone(),
            company: None,
        });
    }

    if let Some(carried) = first_competence {
        for row in rows.iter_mut().filter(|r| r.competence.is_empty()) {
            row.competence.clone_from(&carried);
        }
    }
    rows
}
