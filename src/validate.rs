//! Row validation.
//!
//! Each validator returns every violation on a row, in rule order; an empty
//! list means the row is valid. Whether errors block the import depends on
//! the sheet kind ([`SheetKind::row_errors_block`]).

use std::collections::HashSet;

use crate::format::{self, DateParse};
use crate::transform::{EmployeeRow, OvertimeRow, PayrollRow, SheetRows};
use crate::types::{RowError, SheetKind};

const SEX_VALUES: [&str; 4] = ["M", "F", "MASCULINO", "FEMININO"];

fn required(errors: &mut Vec<String>, value: &str, message: &str) {
    if value.trim().is_empty() {
        errors.push(message.to_string());
    }
}

/// Non-blank value that has no digits at all.
fn not_numeric(value: &str) -> bool {
    !value.trim().is_empty() && format::digits_only(value).is_empty()
}

/// Non-blank value with anything but digits.
fn not_plain_number(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.chars().all(|c| c.is_ascii_digit())
}

/// Checks a non-blank date; `optional` dates accept the `00/00/0000`
/// placeholders.
fn check_date(errors: &mut Vec<String>, label: &str, value: &str, optional: bool) {
    match format::parse_date_text(value) {
        DateParse::Blank | DateParse::Valid(_) => {}
        DateParse::NotApplicable if optional => {}
        DateParse::Malformed => {
            errors.push(format!("{label} em formato invalido. Use dd/mm/aaaa ou YYYY-MM-DD"));
        }
        DateParse::Impossible | DateParse::NotApplicable => {
            errors.push(format!("{label} e uma data invalida"));
        }
    }
}

/// Employee registry rules. CPF is optional but must have 11 digits when
/// present; `Data Afastamento` is optional.
#[must_use]
pub fn validate_employee(row: &EmployeeRow) -> Vec<String> {
    let mut errors = Vec::new();

    required(&mut errors, &row.company, "Empresa e obrigatoria");
    required(&mut errors, &row.registration, "Cadastro e obrigatorio");
    required(&mut errors, &row.name, "Nome e obrigatorio");
    required(&mut errors, &row.birth_date, "Nascimento e obrigatorio");
    required(&mut errors, &row.hire_date, "Admissao e obrigatoria");
    required(&mut errors, &row.status, "Situacao e obrigatoria");
    required(&mut errors, &row.role, "Cargo e obrigatorio");
    required(&mut errors, &row.sector, "Setor e obrigatorio");
    if row.salary.is_blank() {
        errors.push("Salario e obrigatorio".to_string());
    }

    if !row.cpf.trim().is_empty() && format::digits_only(&row.cpf).len() != 11 {
        errors.push("CPF invalido: deve ter 11 digitos".to_string());
    }
    if not_numeric(&row.company) {
        errors.push("Empresa deve ser numerica (inteiro)".to_string());
    }
    if not_numeric(&row.status) {
        errors.push("Situacao deve ser numerica (inteiro)".to_string());
    }

    check_date(&mut errors, "Nascimento", &row.birth_date, false);
    check_date(&mut errors, "Admissao", &row.hire_date, false);
    check_date(&mut errors, "Data Afastamento", &row.status_date, true);

    if !row.salary.is_blank() && row.salary.value.is_none() {
        errors.push("Valor Salario deve ser numerico".to_string());
    }
    let sex = row.sex.trim().to_uppercase();
    if !sex.is_empty() && !SEX_VALUES.contains(&sex.as_str()) {
        errors.push("Sexo deve ser M/F ou Masculino/Feminino".to_string());
    }

    errors
}

#[must_use]
pub fn validate_payroll(row: &PayrollRow) -> Vec<String> {
    let mut errors = Vec::new();

    required(&mut errors, &row.registration, "Cadastro e obrigatorio");
    required(&mut errors, &row.collaborator, "Colaborador e obrigatorio");
    required(&mut errors, &row.event_code, "Evento e obrigatorio");
    required(&mut errors, &row.competence, "Competencia e obrigatoria");
    if row.amount.is_blank() {
        errors.push("valor e obrigatorio".to_string());
    }

    if not_plain_number(&row.registration) {
        errors.push("Cadastro deve ser numerico".to_string());
    }
    if not_numeric(&row.event_code) {
        errors.push("Evento deve ser numerico".to_string());
    }
    if !row.competence.trim().is_empty() && row.competence_start().is_none() {
        errors.push("Competencia invalida. Use mm/aaaa".to_string());
    }
    if !row.amount.is_blank() && row.amount.value.is_none() {
        errors.push("valor deve ser numerico".to_string());
    }

    errors
}

/// Overtime rules. Time columns never fail: unparseable times are zero.
#[must_use]
pub fn validate_overtime(row: &OvertimeRow) -> Vec<String> {
    let mut errors = Vec::new();

    required(&mut errors, &row.date, "Data e obrigatoria");
    required(&mut errors, &row.registration, "Cadastro e obrigatorio");
    required(&mut errors, &row.name, "Nome e obrigatorio");

    check_date(&mut errors, "Data", &row.date, false);
    if not_plain_number(&row.registration) {
        errors.push("Cadastro deve ser numerico".to_string());
    }

    errors
}

fn row_errors<R>(rows: &[R], index: fn(&R) -> usize, check: fn(&R) -> Vec<String>) -> Vec<RowError> {
    rows.iter()
        .filter_map(|row| {
            let errors = check(row);
            (!errors.is_empty()).then(|| RowError {
                row_index: index(row),
                errors,
            })
        })
        .collect()
}

/// Validates every row, returning only rows with violations.
#[must_use]
pub fn collect_row_errors(rows: &SheetRows) -> Vec<RowError> {
    match rows {
        SheetRows::Employee(rows) => {
            row_errors(rows.as_slice(), |r: &EmployeeRow| r.row_index, validate_employee)
        }
        SheetRows::Payroll(rows) => {
            row_errors(rows.as_slice(), |r: &PayrollRow| r.row_index, validate_payroll)
        }
        SheetRows::Overtime(rows) => {
            row_errors(rows.as_slice(), |r: &OvertimeRow| r.row_index, validate_overtime)
        }
    }
}

/// Returns `true` when `errors` must stop an import of `kind`.
#[must_use]
pub fn blocks_import(kind: SheetKind, errors: &[RowError]) -> bool {
    kind.row_errors_block() && !errors.is_empty()
}

/// Referenced registrations absent from the known-employee set, in
/// reference order.
#[must_use]
pub fn missing_registrations(referenced: &[u64], known: &HashSet<u64>) -> Vec<u64> {
    referenced
        .iter()
        .copied()
        .filter(|code| !known.contains(code))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Money;
    use pretty_assertions::assert_eq;

    fn valid_employee() -> EmployeeRow {
        EmployeeRow {
            row_index: 2,
            company: "12".to_string(),
            registration: "100200".to_string(),
            name: "ANA SOUZA".to_string(),
            cpf: "123.456.789-01".to_string(),
            birth_date: "10/05/1990".to_string(),
            hire_date: "2020-01-15".to_string(),
            status: "1".to_string(),
            status_description: "Trabalhando".to_string(),
            status_date: "00/00/0000".to_string(),
            role: "ANALISTA".to_string(),
            sector: "RH".to_string(),
            nationality: "Brasileiro".to_string(),
            education: "Superior".to_string(),
            sex: "Feminino".to_string(),
            marital_status: "Solteiro".to_string(),
            ethnicity: "Parda".to_string(),
            salary: Money::from_text("3.500,00"),
            extras: Vec::new(),
        }
    }

    #[test]
    fn valid_employee_has_no_errors() {
        assert_eq!(validate_employee(&valid_employee()), Vec::<String>::new());
    }

    #[test]
    fn short_cpf_is_reported() {
        let row = EmployeeRow {
            cpf: "123".to_string(),
            ..valid_employee()
        };
        assert_eq!(validate_employee(&row), vec!["CPF invalido: deve ter 11 digitos"]);
    }

    #[test]
    fn every_independent_violation_is_reported() {
        let row = EmployeeRow {
            name: String::new(),
            role: " ".to_string(),
            cpf: "1234".to_string(),
            company: "ACME".to_string(),
            birth_date: "31/02/1990".to_string(),
            hire_date: "ontem".to_string(),
            status_date: "99/99".to_string(),
            salary: Money::from_text("a combinar"),
            sex: "X".to_string(),
            ..valid_employee()
        };
        assert_eq!(
            validate_employee(&row),
            vec![
                "Nome e obrigatorio",
                "Cargo e obrigatorio",
                "CPF invalido: deve ter 11 digitos",
                "Empresa deve ser numerica (inteiro)",
                "Nascimento e uma data invalida",
                "Admissao em formato invalido. Use dd/mm/aaaa ou YYYY-MM-DD",
                "Data Afastamento em formato invalido. Use dd/mm/aaaa ou YYYY-MM-DD",
                "Valor Salario deve ser numerico",
                "Sexo deve ser M/F ou Masculino/Feminino",
            ]
        );
    }

    #[test]
    fn blank_required_field_reports_only_presence() {
        let row = EmployeeRow {
            birth_date: String::new(),
            salary: Money::default(),
            ..valid_employee()
        };
        assert_eq!(
            validate_employee(&row),
            vec!["Nascimento e obrigatorio", "Salario e obrigatorio"]
        );
    }

    #[test]
    fn payroll_rules() {
        let row = PayrollRow {
            row_index: 3,
            registration: "12a".to_string(),
            collaborator: "ANA".to_string(),
            event_code: "303".to_string(),
            competence: "marco".to_string(),
            reference: "8:00".to_string(),
            amount: Money::from_text("n/d"),
            ..PayrollRow::default()
        };
        assert_eq!(
            validate_payroll(&row),
            vec![
                "Cadastro deve ser numerico",
                "Competencia invalida. Use mm/aaaa",
                "valor deve ser numerico",
            ]
        );
    }

    #[test]
    fn overtime_rules() {
        let row = OvertimeRow {
            row_index: 4,
            date: String::new(),
            registration: "12345".to_string(),
            name: "ANA".to_string(),
            ..OvertimeRow::default()
        };
        assert_eq!(validate_overtime(&row), vec!["Data e obrigatoria"]);

        let row = OvertimeRow {
            date: "32/01/2024".to_string(),
            ..row
        };
        assert_eq!(validate_overtime(&row), vec!["Data e uma data invalida"]);
    }

    #[test]
    fn blocking_is_asymmetric() {
        let errors = vec![RowError {
            row_index: 2,
            errors: vec!["x".to_string()],
        }];
        assert!(!blocks_import(SheetKind::Employee, &errors));
        assert!(blocks_import(SheetKind::Payroll, &errors));
        assert!(blocks_import(SheetKind::Overtime, &errors));
        assert!(!blocks_import(SheetKind::Payroll, &[]));
    }

    #[test]
    fn collected_errors_keep_physical_row_index() {
        let rows = SheetRows::Overtime(vec![
            OvertimeRow {
                row_index: 2,
                date: "01/03/2024".to_string(),
                registration: "1".to_string(),
                name: "A".to_string(),
                ..OvertimeRow::default()
            },
            OvertimeRow {
                row_index: 5,
                date: "01/03/2024".to_string(),
                registration: "2".to_string(),
                ..OvertimeRow::default()
            },
        ]);
        assert_eq!(
            collect_row_errors(&rows),
            vec![RowError {
                row_index: 5,
                errors: vec!["Nome e obrigatorio".to_string()],
            }]
        );
    }

    #[test]
    fn missing_registrations_in_reference_order() {
        let known: HashSet<u64> = [10, 30].into_iter().collect();
        assert_eq!(missing_registrations(&[40, 10, 20], &known), vec![40, 20]);
    }
}
