//! Header canonicalization.
//!
//! Maps physical column headers (any case, accents, punctuation, known
//! synonyms) to a closed set of canonical fields per sheet kind. Each kind
//! declares its synonym table and its required fields through [`FieldSet`].

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::types::CellValue;

/// Normalizes a header for lookup.
///
/// Unicode-decomposes, drops diacritics and every non-alphanumeric
/// character, then lowercases: `"Competência:"` becomes `"competencia"`.
pub fn normalize_header(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !is_combining_mark(*c) && c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// A closed set of canonical fields for one sheet kind.
pub trait FieldSet: Copy + Eq + Ord + Hash + Debug + 'static {
    /// Fields that must all be present among the mapped headers.
    const REQUIRED: &'static [Self];
    /// Normalized synonym -> field.
    const SYNONYMS: &'static [(&'static str, Self)];

    /// Display label used in messages and templates.
    fn label(self) -> &'static str;
}

/// Looks a physical header up in the synonym table of `F`.
pub fn lookup<F: FieldSet>(header: &str) -> Option<F> {
    let key = normalize_header(header);
    if key.is_empty() {
        return None;
    }
    F::SYNONYMS
        .iter()
        .find(|(synonym, _)| *synonym == key)
        .map(|(_, field)| *field)
}

/// One physical column of a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderColumn<F> {
    pub index: usize,
    pub header: String,
    /// `None` for passthrough columns.
    pub field: Option<F>,
}

/// Result of canonicalizing a header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMap<F> {
    columns: Vec<HeaderColumn<F>>,
}

impl<F: FieldSet> HeaderMap<F> {
    pub fn columns(&self) -> &[HeaderColumn<F>] {
        &self.columns
    }

    /// Column index of the first header mapped to `field`.
    pub fn position(&self, field: F) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.field == Some(field))
            .map(|c| c.index)
    }

    pub fn fields(&self) -> BTreeSet<F> {
        self.columns.iter().filter_map(|c| c.field).collect()
    }

    pub fn contains_all(&self, fields: &[F]) -> bool {
        let present = self.fields();
        fields.iter().all(|f| present.contains(f))
    }

    /// Required fields absent from the header row, in declaration order.
    pub fn missing(&self) -> Vec<F> {
        let present = self.fields();
        F::REQUIRED
            .iter()
            .copied()
            .filter(|f| !present.contains(f))
            .collect()
    }

    /// Checks the required set.
    ///
    /// # Errors
    ///
    /// Returns the display labels of every missing required field.
    pub fn require(&self) -> Result<(), Vec<String>> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing.iter().map(|f| f.label().to_string()).collect())
        }
    }

    /// Non-blank headers that matched no field.
    pub fn passthrough(&self) -> impl Iterator<Item = &HeaderColumn<F>> {
        self.columns
            .iter()
            .filter(|c| c.field.is_none() && !c.header.is_empty())
    }
}

/// Canonicalizes a header row for the field set `F`.
pub fn canonicalize<F: FieldSet>(row: &[CellValue]) -> HeaderMap<F> {
    let columns = row
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let header = cell.display();
            let field = lookup::<F>(&header);
            HeaderColumn { index, header, field }
        })
        .collect();
    HeaderMap { columns }
}

fn check_unique<F: FieldSet>(kind: &str) -> Result<(), String> {
    let mut seen: HashMap<&str, F> = HashMap::new();
    for (synonym, field) in F::SYNONYMS {
        if normalize_header(synonym) != *synonym {
            return Err(format!("{kind}: synonym '{synonym}' is not normalized"));
        }
        if let Some(previous) = seen.insert(synonym, *field) {
            if previous != *field {
                return Err(format!(
                    "{kind}: synonym '{synonym}' maps to both {previous:?} and {field:?}"
                ));
            }
        }
    }
    for field in F::REQUIRED {
        if !F::SYNONYMS.iter().any(|(_, f)| f == field) {
            return Err(format!("{kind}: required field {field:?} has no synonym"));
        }
    }
    Ok(())
}

/// Verifies every synonym table: normalized keys, no key mapped to two
/// fields, and every required field reachable.
///
/// # Errors
///
/// Returns a description of the first broken table entry.
pub fn check_synonym_tables() -> Result<(), String> {
    check_unique::<EmployeeField>("employee")?;
    check_unique::<PayrollField>("payroll")?;
    check_unique::<OvertimeField>("overtime")
}

// ---------------------------------------------------------------------------
// Employee registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EmployeeField {
    Company,
    Registration,
    Name,
    Cpf,
    BirthDate,
    HireDate,
    Status,
    StatusDescription,
    StatusDate,
    Role,
    Sector,
    Nationality,
    Education,
    Sex,
    MaritalStatus,
    Ethnicity,
    Salary,
}

impl FieldSet for EmployeeField {
    // CPF is canonicalized when present but never required.
    const REQUIRED: &'static [Self] = &[
        Self::Company,
        Self::Registration,
        Self::Name,
        Self::BirthDate,
        Self::HireDate,
        Self::Status,
        Self::StatusDate,
        Self::Role,
        Self::Sector,
        Self::Nationality,
        Self::Education,
        Self::Sex,
        Self::MaritalStatus,
        Self::Ethnicity,
        Self::Salary,
    ];

    const SYNONYMS: &'static [(&'static str, Self)] = &[
        ("empresa", Self::Company),
        ("company", Self::Company),
        ("codempresa", Self::Company),
        ("codigoempresa", Self::Company),
        ("cadastro", Self::Registration),
        ("matricula", Self::Registration),
        ("matric", Self::Registration),
        ("registro", Self::Registration),
        ("reg", Self::Registration),
        ("nome", Self::Name),
        ("funcionario", Self::Name),
        ("colaborador", Self::Name),
        ("nomecompleto", Self::Name),
        ("cpf", Self::Cpf),
        ("numcpf", Self::Cpf),
        ("documento", Self::Cpf),
        ("nascimento", Self::BirthDate),
        ("datanascimento", Self::BirthDate),
        ("datadenascimento", Self::BirthDate),
        ("dtnascimento", Self::BirthDate),
        ("admissao", Self::HireDate),
        ("dataadmissao", Self::HireDate),
        ("datadeadmissao", Self::HireDate),
        ("dtadmissao", Self::HireDate),
        ("situacao", Self::Status),
        ("status", Self::Status),
        ("codsituacao", Self::Status),
        ("codigosituacao", Self::Status),
        ("descricaosituacao", Self::StatusDescription),
        ("descsituacao", Self::StatusDescription),
        ("dataafastamento", Self::StatusDate),
        ("dtafastamento", Self::StatusDate),
        ("afastamento", Self::StatusDate),
        ("datasituacao", Self::StatusDate),
        ("tituloreduzidocargo", Self::Role),
        ("titulocargo", Self::Role),
        ("cargo", Self::Role),
        ("funcao", Self::Role),
        ("descricaodolocal", Self::Sector),
        ("descricaolocal", Self::Sector),
        ("local", Self::Sector),
        ("setor", Self::Sector),
        ("descricaonacionalidade", Self::Nationality),
        ("nacionalidade", Self::Nationality),
        ("descricaoinstrucao", Self::Education),
        ("instrucao", Self::Education),
        ("grauinstrucao", Self::Education),
        ("escolaridade", Self::Education),
        ("sexo", Self::Sex),
        ("genero", Self::Sex),
        ("descricaoestadocivil", Self::MaritalStatus),
        ("estadocivil", Self::MaritalStatus),
        ("descricaoracaetnia", Self::Ethnicity),
        ("racaetnia", Self::Ethnicity),
        ("raca", Self::Ethnicity),
        ("etnia", Self::Ethnicity),
        ("valorsalario", Self::Salary),
        ("valordosalario", Self::Salary),
        ("salario", Self::Salary),
        ("salariobase", Self::Salary),
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Company => "Empresa",
            Self::Registration => "Cadastro",
            Self::Name => "Nome",
            Self::Cpf => "CPF",
            Self::BirthDate => "Nascimento",
            Self::HireDate => "Admissao",
            Self::Status => "Situacao",
            Self::StatusDescription => "Descricao (Situacao)",
            Self::StatusDate => "Data Afastamento",
            Self::Role => "Titulo Reduzido (Cargo)",
            Self::Sector => "Descricao do Local",
            Self::Nationality => "Descricao (Nacionalidade)",
            Self::Education => "Descricao (Instrucao)",
            Self::Sex => "Sexo",
            Self::MaritalStatus => "Descricao (Estado Civil)",
            Self::Ethnicity => "Descricao (Raca/Etnia)",
            Self::Salary => "Valor Salario",
        }
    }
}

// ---------------------------------------------------------------------------
// Payroll
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PayrollField {
    Registration,
    CollaboratorName,
    EventCode,
    Competence,
    ReferenceQty,
    Amount,
    Company,
}

impl PayrollField {
    /// Minimum set that identifies a header row inside a report.
    pub const ANCHORS: [Self; 3] = [Self::Registration, Self::EventCode, Self::Amount];
}

impl FieldSet for PayrollField {
    const REQUIRED: &'static [Self] = &[
        Self::Registration,
        Self::CollaboratorName,
        Self::EventCode,
        Self::Competence,
        Self::ReferenceQty,
        Self::Amount,
    ];

    const SYNONYMS: &'static [(&'static str, Self)] = &[
        ("cadastro", Self::Registration),
        ("matricula", Self::Registration),
        ("matric", Self::Registration),
        ("registro", Self::Registration),
        ("reg", Self::Registration),
        ("colaborador", Self::CollaboratorName),
        ("funcionario", Self::CollaboratorName),
        ("nome", Self::CollaboratorName),
        ("evento", Self::EventCode),
        ("evto", Self::EventCode),
        ("codigo", Self::EventCode),
        ("codigoevento", Self::EventCode),
        ("codevento", Self::EventCode),
        ("competencia", Self::Competence),
        ("pagamento", Self::Competence),
        ("mes", Self::Competence),
        ("periodo", Self::Competence),
        ("datapagamento", Self::Competence),
        ("referencia", Self::ReferenceQty),
        ("ref", Self::ReferenceQty),
        ("qtd", Self::ReferenceQty),
        ("quantidade", Self::ReferenceQty),
        ("horas", Self::ReferenceQty),
        ("valor", Self::Amount),
        ("vencimento", Self::Amount),
        ("provento", Self::Amount),
        ("desconto", Self::Amount),
        ("vlr", Self::Amount),
        ("total", Self::Amount),
        ("empresa", Self::Company),
        ("company", Self::Company),
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Registration => "cadastro",
            Self::CollaboratorName => "Colaborador",
            Self::EventCode => "Evento",
            Self::Competence => "Competencia",
            Self::ReferenceQty => "Referencia",
            Self::Amount => "valor",
            Self::Company => "Empresa",
        }
    }
}

// ---------------------------------------------------------------------------
// Overtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OvertimeField {
    Date,
    Registration,
    Name,
    Event303,
    Event304,
    Event505,
    Event506,
    Event511,
    Event512,
    Company,
}

impl OvertimeField {
    /// The six event-code columns, in display order.
    pub const EVENTS: [Self; 6] = [
        Self::Event303,
        Self::Event304,
        Self::Event505,
        Self::Event506,
        Self::Event511,
        Self::Event512,
    ];

    /// Event code for the event columns.
    pub fn event_code(self) -> Option<&'static str> {
        match self {
            Self::Event303 => Some("303"),
            Self::Event304 => Some("304"),
            Self::Event505 => Some("505"),
            Self::Event506 => Some("506"),
            Self::Event511 => Some("511"),
            Self::Event512 => Some("512"),
            Self::Date | Self::Registration | Self::Name | Self::Company => None,
        }
    }
}

impl FieldSet for OvertimeField {
    const REQUIRED: &'static [Self] = &[
        Self::Date,
        Self::Registration,
        Self::Name,
        Self::Event303,
        Self::Event304,
        Self::Event505,
        Self::Event506,
        Self::Event511,
        Self::Event512,
    ];

    const SYNONYMS: &'static [(&'static str, Self)] = &[
        ("data", Self::Date),
        ("dia", Self::Date),
        ("dataapuracao", Self::Date),
        ("cadastro", Self::Registration),
        ("matricula", Self::Registration),
        ("registro", Self::Registration),
        ("reg", Self::Registration),
        ("nome", Self::Name),
        ("colaborador", Self::Name),
        ("funcionario", Self::Name),
        ("303", Self::Event303),
        ("304", Self::Event304),
        ("505", Self::Event505),
        ("506", Self::Event506),
        ("511", Self::Event511),
        ("512", Self::Event512),
        ("empresa", Self::Company),
        ("company", Self::Company),
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Date => "Data",
            Self::Registration => "Cadastro",
            Self::Name => "Nome",
            Self::Company => "Empresa",
            event => event.event_code().unwrap_or_default(),
        }
    }
}
