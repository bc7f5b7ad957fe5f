//! Sheet-kind transformers.
//!
//! Each transformer locates the header row, reads company/period metadata and
//! produces typed, normalized rows. Rows carry their 1-based physical row
//! number so validation errors point at the sheet.

pub mod employee;
pub mod meta;
pub mod overtime;
pub mod payroll;

use tracing::info;

use crate::error::ImportError;
use crate::excel::SourceFile;
use crate::types::{CellValue, SheetKind};

pub use employee::EmployeeRow;
pub use meta::SheetMeta;
pub use overtime::OvertimeRow;
pub use payroll::PayrollRow;

/// Rows of one transformed sheet.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetRows {
    Employee(Vec<EmployeeRow>),
    Payroll(Vec<PayrollRow>),
    Overtime(Vec<OvertimeRow>),
}

impl SheetRows {
    #[must_use]
    pub const fn kind(&self) -> SheetKind {
        match self {
            Self::Employee(_) => SheetKind::Employee,
            Self::Payroll(_) => SheetKind::Payroll,
            Self::Overtime(_) => SheetKind::Overtime,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Employee(rows) => rows.len(),
            Self::Payroll(rows) => rows.len(),
            Self::Overtime(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the row at `index` (position in the row list, not the sheet).
    pub fn remove(&mut self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        match self {
            Self::Employee(rows) => {
                rows.remove(index);
            }
            Self::Payroll(rows) => {
                rows.remove(index);
            }
            Self::Overtime(rows) => {
                rows.remove(index);
            }
        }
        true
    }

    /// Distinct employee registrations referenced by payroll or overtime
    /// rows, in first-seen order. Employee sheets reference nothing.
    #[must_use]
    pub fn referenced_registrations(&self) -> Vec<u64> {
        let codes: Vec<Option<u64>> = match self {
            Self::Employee(_) => return Vec::new(),
            Self::Payroll(rows) => rows.iter().map(PayrollRow::registration_number).collect(),
            Self::Overtime(rows) => rows.iter().map(OvertimeRow::registration_number).collect(),
        };
        let mut seen = Vec::new();
        for code in codes.into_iter().flatten() {
            if !seen.contains(&code) {
                seen.push(code);
            }
        }
        seen
    }
}

/// Output of [`transform`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub rows: SheetRows,
    pub meta: SheetMeta,
    /// Name of the layout strategy that produced the rows.
    pub strategy: &'static str,
}

/// Runs the transformer for `kind` over a decoded source.
///
/// # Errors
///
/// [`ImportError::MissingHeaders`] when no layout matched, and
/// [`ImportError::EmptySheet`] when the layout matched but produced no rows.
pub fn transform(kind: SheetKind, source: &SourceFile) -> Result<Transformed, ImportError> {
    if source.matrix.is_empty() && !source.has_ledger_marker() {
        return Err(ImportError::EmptySheet);
    }

    let meta = meta::extract(&source.matrix);
    let (rows, strategy) = match kind {
        SheetKind::Employee => (SheetRows::Employee(employee::transform(&source.matrix)?), "structured"),
        SheetKind::Payroll => {
            let (rows, strategy) = payroll::transform(source, &meta)?;
            (SheetRows::Payroll(rows), strategy)
        }
        SheetKind::Overtime => {
            let (rows, strategy) = overtime::transform(&source.matrix, &meta)?;
            (SheetRows::Overtime(rows), strategy)
        }
    };

    if rows.is_empty() {
        return Err(ImportError::EmptySheet);
    }
    info!(%kind, strategy, rows = rows.len(), company = ?meta.company, "sheet transformed");
    Ok(Transformed { rows, meta, strategy })
}

/// Registration text: integral part of the cell, trimmed.
pub(crate) fn registration_text(cell: &CellValue) -> String {
    let text = cell.display();
    match text.split_once('.') {
        Some((int, _)) => int.trim().to_string(),
        None => text,
    }
}
