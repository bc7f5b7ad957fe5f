//! Spreadsheet reading and template export.
//!
//! [`read_source`] turns an uploaded buffer into a [`SheetMatrix`] (first
//! worksheet of an `.xlsx`/`.xls`/`.ods` workbook, or a delimited text file)
//! plus a best-effort decoding of the same bytes as text, used by the payroll
//! event-ledger strategy.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use encoding_rs::WINDOWS_1252;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use tracing::debug;

use crate::error::ImportError;
use crate::headers::{EmployeeField, FieldSet, OvertimeField, PayrollField};
use crate::types::{CellValue, SheetKind, SheetMatrix};

const TEXT_EXTENSIONS: [&str; 3] = ["csv", "txt", "prn"];
const WORKBOOK_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

impl From<&Data> for CellValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(dt: &Data) -> Self {
        match dt {
            Data::Empty => Self::Empty,
            Data::Int(i) => Self::Number(*i as f64),
            Data::Float(f) => Self::Number(*f),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Self::from(s.as_str()),
            Data::Bool(b) => Self::Bool(*b),
            Data::Error(e) => Self::Text(e.to_string()),
            Data::DateTime(dt) => Self::Number(dt.as_f64()),
        }
    }
}

/// A decoded upload.
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub name: String,
    /// First worksheet, anchored at A1.
    pub matrix: SheetMatrix,
    /// The raw bytes decoded as text (UTF-8, falling back to Windows-1252).
    pub text: String,
}

impl SourceFile {
    /// Returns `true` when the text looks like an event-ledger report dump.
    #[must_use]
    pub fn has_ledger_marker(&self) -> bool {
        self.text.contains(crate::transform::payroll::LEDGER_MARKER)
    }
}

/// Decodes bytes as UTF-8 (BOM stripped), or as Windows-1252 when they are
/// not valid UTF-8. Never fails.
#[must_use]
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (cow, _, _) = WINDOWS_1252.decode(bytes);
            cow.into_owned()
        }
    }
}

fn extension(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Reads an uploaded buffer.
///
/// Workbooks are opened by content; unknown extensions are tried as a
/// workbook first and then as delimited text.
///
/// # Errors
///
/// Returns [`ImportError::FileRead`] when the buffer is neither a workbook
/// nor text.
pub fn read_source(name: &str, bytes: &[u8]) -> Result<SourceFile, ImportError> {
    let ext = extension(name);
    let fail = |reason: String| ImportError::FileRead {
        file: name.to_string(),
        reason,
    };

    let matrix = if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        read_delimited(&decode_text(bytes)).map_err(fail)?
    } else {
        match read_workbook(bytes) {
            Ok(matrix) => matrix,
            Err(e) if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) => return Err(fail(e)),
            Err(e) => {
                if bytes.contains(&0) {
                    return Err(fail(e));
                }
                debug!(file = name, "not a workbook, reading as delimited text");
                read_delimited(&decode_text(bytes)).map_err(fail)?
            }
        }
    };

    debug!(
        file = name,
        rows = matrix.height(),
        cols = matrix.width(),
        "source decoded"
    );
    Ok(SourceFile {
        name: name.to_string(),
        matrix,
        text: decode_text(bytes),
    })
}

fn read_workbook(bytes: &[u8]) -> Result<SheetMatrix, String> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| format!("Failed to open workbook: {e}"))?;

    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| "workbook has no sheets".to_string())?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|e| format!("Failed to read sheet {first}: {e}"))?;

    Ok(range_to_matrix(&range))
}

/// calamine ranges start at the first used cell; pad so that fixed
/// coordinates like A1 and J5 keep their meaning.
fn range_to_matrix(range: &Range<Data>) -> SheetMatrix {
    let (row0, col0) = range.start().unwrap_or((0, 0));
    let mut rows: Vec<Vec<CellValue>> = vec![Vec::new(); row0 as usize];
    for row in range.rows() {
        let mut cells = vec![CellValue::Empty; col0 as usize];
        cells.extend(row.iter().map(CellValue::from));
        rows.push(cells);
    }
    SheetMatrix::new(rows)
}

/// `;` wins over `,` when the first non-blank line has more of them.
fn sniff_delimiter(text: &str) -> u8 {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    if line.matches(';').count() > line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn read_delimited(text: &str) -> Result<SheetMatrix, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(text))
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("invalid delimited text: {e}"))?;
        rows.push(record.iter().map(CellValue::from).collect());
    }
    Ok(SheetMatrix::new(rows))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Header row of the downloadable template for `kind`.
///
/// The required fields, plus optional columns the importer understands.
#[must_use]
pub fn template_headers(kind: SheetKind) -> Vec<&'static str> {
    match kind {
        SheetKind::Employee => {
            let mut headers: Vec<&str> = EmployeeField::REQUIRED.iter().map(|f| f.label()).collect();
            headers.insert(3, EmployeeField::Cpf.label());
            headers
        }
        SheetKind::Payroll => PayrollField::REQUIRED
            .iter()
            .chain(&[PayrollField::Company])
            .map(|f| f.label())
            .collect(),
        SheetKind::Overtime => OvertimeField::REQUIRED.iter().map(|f| f.label()).collect(),
    }
}

fn template_workbook(kind: SheetKind) -> Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Modelo")?;

    for (col, header) in template_headers(kind).into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let col = col as u16;
        sheet.write_with_format(0, col, header, &bold)?;
        sheet.set_column_width(col, header.len().max(10) as f64 + 2.0)?;
    }
    Ok(workbook)
}

/// Template workbook for `kind` as `.xlsx` bytes.
///
/// # Errors
///
/// Returns an error if the workbook cannot be serialized.
pub fn template_bytes(kind: SheetKind) -> Result<Vec<u8>, XlsxError> {
    template_workbook(kind)?.save_to_buffer()
}

/// Writes the template workbook for `kind` to `path`.
///
/// # Errors
///
/// Returns an error if the workbook cannot be written.
pub fn write_template(kind: SheetKind, path: &Path) -> Result<(), XlsxError> {
    template_workbook(kind)?.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_falls_back_to_windows_1252() {
        let latin = b"Per\xedodo: 03/2024";
        assert_eq!(decode_text(latin), "Período: 03/2024");
        assert_eq!(decode_text("\u{feff}cadastro".as_bytes()), "cadastro");
    }

    #[test]
    fn reads_semicolon_csv() {
        let csv = "cadastro;Colaborador;valor\n12345;JOAO;1.234,56\n";
        let source = read_source("folha.csv", csv.as_bytes()).unwrap();
        assert_eq!(source.matrix.height(), 2);
        assert_eq!(source.matrix.get(1, 2), &CellValue::Text("1.234,56".to_string()));
    }

    #[test]
    fn text_report_without_extension_is_accepted() {
        let text = "Evento,Colaborador\n303,-,Horas Extras 60%\n";
        let source = read_source("relatorio", text.as_bytes()).unwrap();
        assert!(source.has_ledger_marker());
    }

    #[test]
    fn garbage_workbook_is_a_file_read_error() {
        let err = read_source("folha.xlsx", b"PK\x03\x04 not really").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn workbook_cells_keep_their_coordinates() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write(1, 2, "Empresa").unwrap();
        sheet.write(2, 3, 42.0).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let source = read_source("x.xlsx", &bytes).unwrap();
        assert_eq!(source.matrix.get(1, 2), &CellValue::Text("Empresa".to_string()));
        assert_eq!(source.matrix.get(2, 3), &CellValue::Number(42.0));
    }

    #[test]
    fn template_round_trips_through_reader() {
        let bytes = template_bytes(SheetKind::Overtime).unwrap();
        let source = read_source("modelo.xlsx", &bytes).unwrap();
        assert_eq!(source.matrix.height(), 1);
        let headers: Vec<String> = source.matrix.row(0).iter().map(CellValue::display).collect();
        assert_eq!(
            headers,
            vec!["Data", "Cadastro", "Nome", "303", "304", "505", "506", "511", "512"]
        );
    }

    #[test]
    fn payroll_template_offers_company() {
        assert_eq!(
            template_headers(SheetKind::Payroll),
            vec!["cadastro", "Colaborador", "Evento", "Competencia", "Referencia", "valor", "Empresa"]
        );
        assert_eq!(template_headers(SheetKind::Employee)[3], "CPF");
    }

    #[test]
    fn write_template_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SheetKind::Employee.template_file_name());
        write_template(SheetKind::Employee, &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let source = read_source("modelo_cadastro.xlsx", &bytes).unwrap();
        assert_eq!(source.matrix.width(), template_headers(SheetKind::Employee).len());
    }
}
