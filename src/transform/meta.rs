//! Company and period metadata read from well-known cells.
//!
//! Extraction is opportunistic: a stray or missing cell degrades to `None`,
//! never to an error.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::Serialize;

use crate::format::{self, DateParse};
use crate::headers::normalize_header;
use crate::types::{CellValue, SheetMatrix};

static DATE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("valid date pattern"));

/// Normalized labels whose right-hand neighbour holds the period.
const PERIOD_LABELS: [&str; 3] = ["competencia", "periodo", "mes"];

/// How far right of a period label to look for a date.
const PERIOD_LOOKAHEAD: usize = 3;

/// Header date cell used by exported reports (J5).
const HEADER_DATE_CELL: (usize, usize) = (4, 9);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetMeta {
    /// Company code from A1.
    pub company: Option<u32>,
    /// Company name from C1, kept only alongside a code.
    pub company_name: Option<String>,
    /// `mm/yyyy`
    pub competence: Option<String>,
    /// Report period date, or J5 when no period label is present.
    pub header_date: Option<NaiveDate>,
}

impl SheetMeta {
    /// `0012 - ACME`: padded code plus the first word of the company name.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        let code = format::format_company(self.company?);
        let first_word = self
            .company_name
            .as_deref()
            .and_then(|name| name.split_whitespace().next());
        Some(match first_word {
            Some(word) => format!("{code} - {word}"),
            None => code,
        })
    }

    /// Padded company code, or `-`.
    #[must_use]
    pub fn company_display(&self) -> String {
        self.company.map_or_else(|| "-".to_string(), format::format_company)
    }
}

/// Positive company code from a cell, if it has digits.
pub(crate) fn company_code(cell: &CellValue) -> Option<u32> {
    format::parse_code(&cell.display())
        .and_then(|code| u32::try_from(code).ok())
        .filter(|code| *code > 0)
}

fn first_date_in(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Number(_) => format::parse_date_cell(cell).date(),
        CellValue::Text(s) => DATE_IN_TEXT
            .find(s)
            .and_then(|m| format::parse_date_text(m.as_str()).date()),
        CellValue::Empty | CellValue::Bool(_) => None,
    }
}

/// Reads company, competence and header date from `matrix`.
#[must_use]
pub fn extract(matrix: &SheetMatrix) -> SheetMeta {
    let company = company_code(matrix.get(0, 0));
    let company_name = company.and_then(|_| {
        let name = matrix.get(0, 2).display();
        (!name.is_empty() && format::parse_code(&name).is_none()).then_some(name)
    });

    let mut competence = None;
    let mut period = None;
    'scan: for (r, row) in matrix.rows().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_text() else { continue };
            if !PERIOD_LABELS.contains(&normalize_header(text).as_str()) {
                continue;
            }
            let next = matrix.get(r, c + 1);
            if competence.is_none() {
                competence = format::competence_label(next);
            }
            if period.is_none() {
                period = (c + 1..=c + PERIOD_LOOKAHEAD)
                    .find_map(|col| first_date_in(matrix.get(r, col)));
            }
            if competence.is_some() && period.is_some() {
                break 'scan;
            }
        }
    }

    let header_date = period.or_else(|| {
        match format::parse_date_cell(matrix.get(HEADER_DATE_CELL.0, HEADER_DATE_CELL.1)) {
            DateParse::Valid(d) => Some(d),
            _ => None,
        }
    });
    let competence = competence.or_else(|| {
        header_date
            .and_then(|d| NaiveDate::from_ymd_opt(d.year(), d.month(), 1))
            .map(format::format_month_br)
    });

    SheetMeta {
        company,
        company_name,
        competence,
        header_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matrix(rows: &[&[&str]]) -> SheetMatrix {
        SheetMatrix::new(
            rows.iter()
                .map(|r| r.iter().map(|c| CellValue::from(*c)).collect())
                .collect(),
        )
    }

    #[test]
    fn label_uses_first_word_of_company_name() {
        let meta = extract(&matrix(&[&["12", "", "ACME COMERCIO LTDA"]]));
        assert_eq!(meta.company, Some(12));
        assert_eq!(meta.label().as_deref(), Some("0012 - ACME"));
    }

    #[test]
    fn header_row_is_not_company_metadata() {
        let meta = extract(&matrix(&[&["cadastro", "Colaborador", "Evento"]]));
        assert_eq!(meta, SheetMeta::default());
        assert_eq!(meta.label(), None);
        assert_eq!(meta.company_display(), "-");
    }

    #[test]
    fn competence_is_read_next_to_its_label() {
        let meta = extract(&matrix(&[&["5"], &["", "Competência:", "03/2024"]]));
        assert_eq!(meta.competence.as_deref(), Some("03/2024"));
    }

    #[test]
    fn period_date_is_found_within_lookahead() {
        let meta = extract(&matrix(&[
            &["5"],
            &["Período:", "", "01/03/2024 a 31/03/2024"],
        ]));
        assert_eq!(meta.header_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(meta.competence.as_deref(), Some("03/2024"));
    }

    #[test]
    fn j5_is_the_header_date_fallback() {
        let mut rows = vec![vec![CellValue::Empty; 10]; 5];
        rows[4][9] = CellValue::Number(45352.0);
        let meta = extract(&SheetMatrix::new(rows));
        assert_eq!(meta.header_date, NaiveDate::from_ymd_opt(2024, 3, 1));
    }
}
