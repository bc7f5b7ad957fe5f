//! Overtime ("HORAS EXTRAS") transformer.
//!
//! Tabular sheets carry `Data`, `Cadastro`, `Nome` and one column per event
//! code. Exported "apuração" reports have no header row at all; they list one
//! block per employee with the event code in column G and the time in the
//! last `H:MM` cell of the line.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::ImportError;
use crate::format::{self, DateParse};
use crate::headers::{canonicalize, FieldSet, HeaderMap, OvertimeField};
use crate::types::{CellValue, SheetMatrix};

use super::meta::{company_code, SheetMeta};
use super::registration_text;

/// Smallest registration number that starts an employee block in a report.
const REPORT_MIN_REGISTRATION: u64 = 100_000;
const REPORT_EVENT_COL: usize = 6;
const REPORT_COMPANY_CELL: (usize, usize) = (1, 0);

/// One employee's overtime on one date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OvertimeRow {
    pub row_index: usize,
    /// `dd/mm/yyyy` when it parses, the original text otherwise.
    pub date: String,
    pub registration: String,
    pub name: String,
    /// Minutes per event code, in [`OvertimeField::EVENTS`] order.
    pub minutes: [u32; 6],
    pub company: Option<u32>,
}

impl OvertimeRow {
    #[must_use]
    pub fn registration_number(&self) -> Option<u64> {
        format::parse_code(&self.registration)
    }

    #[must_use]
    pub fn date_value(&self) -> Option<NaiveDate> {
        format::parse_date_text(&self.date).date()
    }

    /// Minutes for one event column.
    #[must_use]
    pub fn minutes_for(&self, event: OvertimeField) -> u32 {
        OvertimeField::EVENTS
            .iter()
            .position(|e| *e == event)
            .map_or(0, |i| self.minutes[i])
    }

    /// `H:MM` per event code, in [`OvertimeField::EVENTS`] order.
    #[must_use]
    pub fn display_times(&self) -> [String; 6] {
        self.minutes.map(format::format_minutes)
    }
}

/// An overtime layout. `None` means "not this layout".
pub type Strategy = fn(&SheetMatrix, &SheetMeta) -> Option<Vec<OvertimeRow>>;

/// Layouts in the order they are tried.
pub const STRATEGIES: [(&str, Strategy); 2] =
    [("tabular", tabular), ("apuracao-report", apuracao_report)];

/// Runs [`STRATEGIES`] in order.
///
/// # Errors
///
/// [`ImportError::MissingHeaders`] (judged against row 0) when no layout
/// recognizes the sheet.
pub fn transform(
    matrix: &SheetMatrix,
    meta: &SheetMeta,
) -> Result<(Vec<OvertimeRow>, &'static str), ImportError> {
    for (name, strategy) in STRATEGIES {
        if let Some(rows) = strategy(matrix, meta) {
            return Ok((rows, name));
        }
    }
    let header = canonicalize::<OvertimeField>(matrix.row(0));
    match header.require() {
        Err(missing) => Err(ImportError::MissingHeaders(missing)),
        Ok(()) => Err(ImportError::EmptySheet),
    }
}

fn fallback_date(meta: &SheetMeta) -> String {
    meta.header_date.map(format::format_date_br).unwrap_or_default()
}

/// First row carrying every required overtime header.
pub fn tabular(matrix: &SheetMatrix, meta: &SheetMeta) -> Option<Vec<OvertimeRow>> {
    let (header_idx, header) = (0..matrix.height()).find_map(|r| {
        let header = canonicalize::<OvertimeField>(matrix.row(r));
        header.contains_all(OvertimeField::REQUIRED).then_some((r, header))
    })?;

    let rows = (header_idx + 1..matrix.height())
        .filter(|&r| !matrix.is_row_blank(r))
        .map(|r| tabular_row(&header, matrix.row(r), r + 1, meta))
        .collect();
    Some(rows)
}

fn tabular_row(
    header: &HeaderMap<OvertimeField>,
    row: &[CellValue],
    row_index: usize,
    meta: &SheetMeta,
) -> OvertimeRow {
    let cell = |field| {
        header
            .position(field)
            .and_then(|col| row.get(col))
            .cloned()
            .unwrap_or_default()
    };

    let date_cell = cell(OvertimeField::Date);
    let date = match format::parse_date_cell(&date_cell) {
        DateParse::Valid(d) => format::format_date_br(d),
        DateParse::Blank => fallback_date(meta),
        _ => date_cell.display(),
    };

    OvertimeRow {
        row_index,
        date,
        registration: registration_text(&cell(OvertimeField::Registration)),
        name: cell(OvertimeField::Name).display(),
        minutes: OvertimeField::EVENTS.map(|event| format::parse_minutes(&cell(event))),
        company: company_code(&cell(OvertimeField::Company)).or(meta.company),
    }
}

fn report_registration(cell: &CellValue) -> Option<u64> {
    let text = registration_text(cell);
    text.parse::<u64>()
        .ok()
        .filter(|n| *n >= REPORT_MIN_REGISTRATION)
}

/// Time of a report line: the last cell right of the event code holding an
/// `H:MM` text or an Excel time-of-day fraction.
fn report_minutes(row: &[CellValue]) -> Option<u32> {
    row.iter()
        .skip(REPORT_EVENT_COL + 1)
        .filter(|cell| match cell {
            CellValue::Text(text) => format::contains_time(text),
            CellValue::Number(n) => (0.0..1.0).contains(n),
            CellValue::Empty | CellValue::Bool(_) => false,
        })
        .last()
        .map(format::parse_minutes)
}

/// Employee blocks of an "apuração" report, minutes summed per event code.
///
/// Company comes from A2, the date from the report period. Rows are ordered
/// by registration.
pub fn apuracao_report(matrix: &SheetMatrix, meta: &SheetMeta) -> Option<Vec<OvertimeRow>> {
    let (cr, cc) = REPORT_COMPANY_CELL;
    let company = company_code(matrix.get(cr, cc)).or(meta.company);
    let date = fallback_date(meta);

    let mut rows: Vec<OvertimeRow> = Vec::new();
    let mut by_registration: HashMap<u64, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for (r, row) in matrix.rows().enumerate() {
        let name = matrix.get(r, 1);
        if let (Some(registration), Some(name)) = (report_registration(matrix.get(r, 0)), name.as_text()) {
            let name = name.trim();
            if !name.is_empty() {
                let idx = *by_registration.entry(registration).or_insert_with(|| {
                    rows.push(OvertimeRow {
                        row_index: r + 1,
                        date: date.clone(),
                        registration: registration.to_string(),
                        company,
                        ..OvertimeRow::default()
                    });
                    rows.len() - 1
                });
                rows[idx].name = name.to_string();
                current = Some(idx);
            }
        }

        let Some(idx) = current else { continue };
        let code = matrix.get(r, REPORT_EVENT_COL).display();
        let Some(slot) = OvertimeField::EVENTS
            .iter()
            .position(|event| event.event_code() == Some(code.as_str()))
        else {
            continue;
        };
        if let Some(minutes) = report_minutes(row) {
            rows[idx].minutes[slot] = rows[idx].minutes[slot].saturating_add(minutes);
        }
    }

    if rows.is_empty() {
        return None;
    }
    rows.sort_by_key(|row| row.registration_number());
    Some(rows)
}
