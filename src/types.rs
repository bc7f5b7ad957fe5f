//! Common types for hr-sheet-import.
//!
//! Defines the decoded cell matrix, the supported sheet kinds, row-level
//! errors and the conflict descriptor produced before a destructive reimport.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cell value decoded from a spreadsheet.
///
/// The variant is decided once, when the matrix is built. Transformers match
/// on it explicitly instead of coercing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    /// Plain number or an Excel date serial.
    Number(f64),
    Text(String),
    Bool(bool),
}

static EMPTY_CELL: CellValue = CellValue::Empty;

impl CellValue {
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(_) | Self::Bool(_) => false,
        }
    }

    /// Renders the cell as trimmed display text.
    ///
    /// Integral numbers print without a fractional part so registration
    /// numbers read from `.xlsx` files keep their natural form.
    #[allow(clippy::cast_possible_truncation)]
    pub fn display(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        if s.trim().is_empty() {
            Self::Empty
        } else {
            Self::Text(s.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

/// Rectangular rows x columns matrix of decoded cells.
///
/// Short rows are padded with [`CellValue::Empty`] on construction, so every
/// row has [`SheetMatrix::width`] cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetMatrix {
    rows: Vec<Vec<CellValue>>,
    width: usize,
}

impl SheetMatrix {
    /// Builds a matrix, padding short rows.
    pub fn new(mut rows: Vec<Vec<CellValue>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(width, CellValue::Empty);
        }
        Self { rows, width }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(CellValue::is_blank))
    }

    /// Returns the cell at `(row, col)`, or an empty cell when out of bounds.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Returns a whole row, or an empty slice when out of bounds.
    #[must_use]
    pub fn row(&self, idx: usize) -> &[CellValue] {
        self.rows.get(idx).map_or(&[], Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CellValue]> {
        self.rows.iter().map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_row_blank(&self, idx: usize) -> bool {
        self.row(idx).iter().all(CellValue::is_blank)
    }
}

/// The three supported sheet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SheetKind {
    /// Employee registry ("CADASTRO").
    Employee,
    /// Payroll events ("FOLHA PGTO").
    Payroll,
    /// Overtime records ("HORAS EXTRAS").
    Overtime,
}

impl SheetKind {
    /// Label shown to users.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Employee => "CADASTRO",
            Self::Payroll => "FOLHA PGTO",
            Self::Overtime => "HORAS EXTRAS",
        }
    }

    /// Returns `true` when any row error prevents the import.
    ///
    /// Employee row errors are advisory; payroll and overtime errors block.
    #[must_use]
    pub const fn row_errors_block(self) -> bool {
        !matches!(self, Self::Employee)
    }

    /// File name suggested for the empty template.
    #[must_use]
    pub const fn template_file_name(self) -> &'static str {
        match self {
            Self::Employee => "modelo_cadastro.xlsx",
            Self::Payroll => "modelo_folha_pgto.xlsx",
            Self::Overtime => "modelo_horas_extras.xlsx",
        }
    }
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Violations found on one sheet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    /// 1-based physical row number, header rows included.
    pub row_index: usize,
    /// Every violation on the row, in rule order.
    pub errors: Vec<String>,
}

/// What kind of existing data an import collides with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictScope {
    #[serde(rename = "payroll-month")]
    PayrollMonth,
    #[serde(rename = "overtime-date")]
    OvertimeDate,
}

impl ConflictScope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PayrollMonth => "payroll-month",
            Self::OvertimeDate => "overtime-date",
        }
    }
}

/// Existing persisted data overlapping the company and period of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportConflict {
    pub scope: ConflictScope,
    pub company: Option<u32>,
    /// Human-readable period (`mm/yyyy` for payroll, `dd/mm/yyyy` for overtime).
    pub period_ref: String,
    /// ISO date used to build the delete predicate.
    pub period_key_for_delete: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_value_as_number() {
        let num = CellValue::Number(42.0);
        assert_eq!(num.as_number(), Some(42.0));
    }

    #[test]
    fn cell_display_drops_integral_fraction() {
        assert_eq!(CellValue::Number(12345.0).display(), "12345");
        assert_eq!(CellValue::Number(1.5).display(), "1.5");
        assert_eq!(CellValue::Text("  JOAO ".to_string()).display(), "JOAO");
    }

    #[test]
    fn matrix_pads_short_rows() {
        let matrix = SheetMatrix::new(vec![
            vec![CellValue::from("a"), CellValue::from("b"), CellValue::from("c")],
            vec![CellValue::from("d")],
        ]);
        assert_eq!(matrix.width(), 3);
        assert_eq!(matrix.row(1).len(), 3);
        assert_eq!(matrix.get(1, 2), &CellValue::Empty);
        assert_eq!(matrix.get(9, 9), &CellValue::Empty);
    }

    #[test]
    fn only_employee_errors_are_advisory() {
        assert!(!SheetKind::Employee.row_errors_block());
        assert!(SheetKind::Payroll.row_errors_block());
        assert!(SheetKind::Overtime.row_errors_block());
    }

    #[test]
    fn conflict_scope_serializes_kebab() {
        let json = serde_json::to_string(&ConflictScope::OvertimeDate).unwrap();
        assert_eq!(json, "\"overtime-date\"");
    }
}
