//! Employee registry ("CADASTRO") transformer.
//!
//! Headers are always row 0. Every non-blank data row becomes one
//! [`EmployeeRow`]; nothing is filtered, since employee row errors are
//! advisory.

use serde::Serialize;

use crate::error::ImportError;
use crate::format::{self, Money};
use crate::headers::{canonicalize, EmployeeField, HeaderMap};
use crate::types::{CellValue, SheetMatrix};

use super::registration_text;

/// One employee registry row in display form.
///
/// Dates are `dd/mm/yyyy` when they parse and the original text otherwise,
/// so the validator can still report them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRow {
    pub row_index: usize,
    pub company: String,
    pub registration: String,
    pub name: String,
    pub cpf: String,
    pub birth_date: String,
    pub hire_date: String,
    pub status: String,
    pub status_description: String,
    pub status_date: String,
    pub role: String,
    pub sector: String,
    pub nationality: String,
    pub education: String,
    pub sex: String,
    pub marital_status: String,
    pub ethnicity: String,
    pub salary: Money,
    /// Unmapped columns, header -> value.
    pub extras: Vec<(String, String)>,
}

impl EmployeeRow {
    #[must_use]
    pub fn registration_number(&self) -> Option<u64> {
        format::parse_code(&self.registration)
    }

    #[must_use]
    pub fn company_number(&self) -> Option<u32> {
        format::parse_code(&self.company).and_then(|c| u32::try_from(c).ok())
    }
}

struct RowReader<'a> {
    header: &'a HeaderMap<EmployeeField>,
    row: &'a [CellValue],
}

impl RowReader<'_> {
    fn cell(&self, field: EmployeeField) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.header
            .position(field)
            .and_then(|col| self.row.get(col))
            .unwrap_or(&EMPTY)
    }

    fn text(&self, field: EmployeeField) -> String {
        self.cell(field).display()
    }

    fn date(&self, field: EmployeeField) -> String {
        format::date_cell_display(self.cell(field))
    }
}

/// Transforms an employee registry sheet.
///
/// # Errors
///
/// [`ImportError::MissingHeaders`] when row 0 lacks a required field.
pub fn transform(matrix: &SheetMatrix) -> Result<Vec<EmployeeRow>, ImportError> {
    let header = canonicalize::<EmployeeField>(matrix.row(0));
    header.require().map_err(ImportError::MissingHeaders)?;

    let rows = (1..matrix.height())
        .filter(|&r| !matrix.is_row_blank(r))
        .map(|r| {
            let row = matrix.row(r);
            let read = RowReader { header: &header, row };
            EmployeeRow {
                row_index: r + 1,
                company: read.text(EmployeeField::Company),
                registration: registration_text(read.cell(EmployeeField::Registration)),
                name: read.text(EmployeeField::Name),
                cpf: read.text(EmployeeField::Cpf),
                birth_date: read.date(EmployeeField::BirthDate),
                hire_date: read.date(EmployeeField::HireDate),
                status: read.text(EmployeeField::Status),
                status_description: read.text(EmployeeField::StatusDescription),
                status_date: read.date(EmployeeField::StatusDate),
                role: read.text(EmployeeField::Role),
                sector: read.text(EmployeeField::Sector),
                nationality: read.text(EmployeeField::Nationality),
                education: read.text(EmployeeField::Education),
                sex: read.text(EmployeeField::Sex),
                marital_status: read.text(EmployeeField::MaritalStatus),
                ethnicity: read.text(EmployeeField::Ethnicity),
                salary: Money::from_cell(read.cell(EmployeeField::Salary)),
                extras: header
                    .passthrough()
                    .map(|c| (c.header.clone(), row.get(c.index).map(CellValue::display).unwrap_or_default()))
                    .collect(),
            }
        })
        .collect();
    Ok(rows)
}
