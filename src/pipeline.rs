//! Import orchestration.
//!
//! [`transition`] is the whole state machine; [`ImportSession`] drives it
//! through reader, transformer, validator, conflict check and store writes,
//! one user action at a time.

use std::collections::VecDeque;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::RegistrationCache;
use crate::conflict::{self, ConfirmOutcome, ConflictGate, CredentialHash, MAX_ATTEMPTS};
use crate::error::ImportError;
use crate::excel;
use crate::format;
use crate::store::{self, AuditAction, AuditEntry, RecordStore};
use crate::transform::{self, SheetRows, Transformed};
use crate::types::{ConflictScope, ImportConflict, RowError, SheetKind};
use crate::validate;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    /// Nothing in flight; a loaded sheet may be waiting for import.
    #[default]
    Idle,
    Validating,
    ConflictPending(ImportConflict),
    Uploading,
    Done,
    Error(String),
}

impl PipelineState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::ConflictPending(_) => "conflict-pending",
            Self::Uploading => "uploading",
            Self::Done => "done",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    FileSelected,
    ImportRequested,
    Validated,
    ConflictFound(ImportConflict),
    UploadStarted,
    UploadFinished,
    /// The conflicting period was deleted.
    ConflictResolved,
    ConflictCancelled(String),
    Failed(String),
    Reset,
}

impl PipelineEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FileSelected => "file-selected",
            Self::ImportRequested => "import-requested",
            Self::Validated => "validated",
            Self::ConflictFound(_) => "conflict-found",
            Self::UploadStarted => "upload-started",
            Self::UploadFinished => "upload-finished",
            Self::ConflictResolved => "conflict-resolved",
            Self::ConflictCancelled(_) => "conflict-cancelled",
            Self::Failed(_) => "failed",
            Self::Reset => "reset",
        }
    }
}

/// Next state for `event`.
///
/// Selecting a file or resetting is always allowed and discards whatever was
/// in flight. Import is refused while a conflict is pending.
///
/// # Errors
///
/// [`ImportError::ConflictPending`] for an import request during a conflict,
/// [`ImportError::InvalidTransition`] for any other event the state does not
/// accept.
pub fn transition(state: &PipelineState, event: PipelineEvent) -> Result<PipelineState, ImportError> {
    use PipelineEvent as E;
    use PipelineState as S;

    let next = match (state, event) {
        (_, E::Reset) => S::Idle,
        (_, E::FileSelected) => S::Validating,
        (_, E::Failed(message)) => S::Error(message),
        (S::ConflictPending(_), E::ImportRequested) => return Err(ImportError::ConflictPending),
        (S::Idle | S::Done | S::Error(_), E::ImportRequested) => S::Validating,
        (S::Validating, E::Validated) => S::Idle,
        (S::Validating, E::ConflictFound(conflict)) => S::ConflictPending(conflict),
        (S::Validating, E::UploadStarted) => S::Uploading,
        (S::Uploading, E::UploadFinished) => S::Done,
        (S::ConflictPending(_), E::ConflictResolved) => S::Idle,
        (S::ConflictPending(_), E::ConflictCancelled(message)) => S::Error(message),
        (from, event) => {
            return Err(ImportError::InvalidTransition {
                from: from.name(),
                event: event.name(),
            })
        }
    };
    Ok(next)
}

// ---------------------------------------------------------------------------
// Message log
// ---------------------------------------------------------------------------

pub const DEFAULT_LOG_CAPACITY: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Level {
    Success,
    Warning,
    Error,
    Info,
}

impl Level {
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Success => "OoO",
            Self::Warning => ":)",
            Self::Error => "XxX",
            Self::Info => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub level: Level,
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level.tag() {
            "" => f.write_str(&self.text),
            tag => write!(f, "{tag} {}", self.text),
        }
    }
}

/// Rolling user-facing log, newest first. Every entry is also queued as a
/// toast until the front end drains it.
#[derive(Debug, Clone)]
pub struct MessageLog {
    capacity: usize,
    entries: VecDeque<LogEntry>,
    toasts: Vec<LogEntry>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl MessageLog {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            toasts: Vec::new(),
        }
    }

    pub fn push(&mut self, level: Level, text: impl Into<String>) {
        let entry = LogEntry {
            level,
            text: text.into(),
        };
        self.toasts.push(entry.clone());
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries pushed since the last drain, oldest first.
    pub fn drain_toasts(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.toasts)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Operator running the import.
#[derive(Debug, Clone)]
pub struct Operator {
    pub name: String,
    /// Required to confirm conflict deletions.
    pub credential: Option<CredentialHash>,
}

/// A file that made it through reading and transformation.
#[derive(Debug, Clone)]
pub struct LoadedSheet {
    pub kind: SheetKind,
    pub file_name: String,
    pub transformed: Transformed,
    pub row_errors: Vec<RowError>,
}

impl LoadedSheet {
    #[must_use]
    pub fn rows(&self) -> &SheetRows {
        &self.transformed.rows
    }

    #[must_use]
    pub fn blocks_import(&self) -> bool {
        validate::blocks_import(self.kind, &self.row_errors)
    }

    fn company(&self) -> Option<u32> {
        let from_rows = match &self.transformed.rows {
            SheetRows::Employee(_) => None,
            SheetRows::Payroll(rows) => rows.iter().find_map(|r| r.company),
            SheetRows::Overtime(rows) => rows.iter().find_map(|r| r.company),
        };
        from_rows.or(self.transformed.meta.company)
    }

    fn competence(&self) -> Option<NaiveDate> {
        let from_rows = match &self.transformed.rows {
            SheetRows::Payroll(rows) => rows.iter().find_map(transform::PayrollRow::competence_start),
            _ => None,
        };
        from_rows.or_else(|| {
            self.transformed
                .meta
                .competence
                .as_deref()
                .and_then(format::parse_competence)
        })
    }

    fn overtime_dates(&self) -> Vec<NaiveDate> {
        match &self.transformed.rows {
            SheetRows::Overtime(rows) => rows.iter().filter_map(transform::OvertimeRow::date_value).collect(),
            _ => Vec::new(),
        }
    }

    /// Period shown in history labels.
    fn period_label(&self) -> Option<String> {
        match self.kind {
            SheetKind::Employee => None,
            SheetKind::Payroll => self.competence().map(format::format_month_br),
            SheetKind::Overtime => self.overtime_dates().first().copied().map(format::format_date_br),
        }
    }
}

/// Result of [`ImportSession::import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported(ImportSummary),
    /// Paused; confirm or cancel the conflict before importing again.
    Conflict(ImportConflict),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub kind: SheetKind,
    pub inserted: usize,
    pub updated: usize,
    /// Rows left out of the upload (employee rows without a registration).
    pub skipped: usize,
    pub audit_label: String,
}

/// One import screen: the store, the registration cache and the live
/// pipeline state for the selected file.
pub struct ImportSession<S> {
    store: S,
    cache: RegistrationCache,
    operator: Operator,
    state: PipelineState,
    sheet: Option<LoadedSheet>,
    gate: ConflictGate,
    log: MessageLog,
}

impl<S: RecordStore> ImportSession<S> {
    #[must_use]
    pub fn new(store: S, cache: RegistrationCache, operator: Operator, log: MessageLog) -> Self {
        Self {
            store,
            cache,
            operator,
            state: PipelineState::Idle,
            sheet: None,
            gate: ConflictGate::new(),
            log,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &PipelineState {
        &self.state
    }

    #[must_use]
    pub const fn sheet(&self) -> Option<&LoadedSheet> {
        self.sheet.as_ref()
    }

    #[must_use]
    pub const fn gate(&self) -> &ConflictGate {
        &self.gate
    }

    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn apply(&mut self, event: PipelineEvent) -> Result<(), ImportError> {
        let next = transition(&self.state, event)?;
        self.state = next;
        Ok(())
    }

    /// Moves to `Error`, logs `err` and hands it back.
    fn fail(&mut self, err: ImportError) -> ImportError {
        let message = err.to_string();
        warn!(error = %message, "import step failed");
        self.log.push(Level::Error, message.clone());
        self.state = PipelineState::Error(message);
        err
    }

    /// Reads, transforms and row-validates a new file, replacing whatever was
    /// loaded before.
    ///
    /// # Errors
    ///
    /// Read, header and empty-sheet failures; nothing of the file is kept.
    pub fn select_file(&mut self, kind: SheetKind, name: &str, bytes: &[u8]) -> Result<&LoadedSheet, ImportError> {
        self.sheet = None;
        self.gate.cancel();
        self.apply(PipelineEvent::FileSelected)?;
        self.log.push(Level::Info, format!("Arquivo selecionado: {name}"));

        let transformed = match excel::read_source(name, bytes).and_then(|source| transform::transform(kind, &source)) {
            Ok(transformed) => transformed,
            Err(err) => return Err(self.fail(err)),
        };
        self.announce(kind, &transformed);

        let row_errors = validate::collect_row_errors(&transformed.rows);
        let sheet = LoadedSheet {
            kind,
            file_name: name.to_string(),
            transformed,
            row_errors,
        };
        self.report_row_errors(&sheet);
        self.apply(PipelineEvent::Validated)?;
        Ok(self.sheet.insert(sheet))
    }

    fn announce(&mut self, kind: SheetKind, transformed: &Transformed) {
        let rows = transformed.rows.len();
        let meta = &transformed.meta;
        match kind {
            SheetKind::Employee => self.log.push(Level::Success, format!("Planilha carregada ({rows} linha(s)).")),
            SheetKind::Payroll => {
                self.log.push(Level::Success, format!("Transformacao da folha pronta ({rows} linha(s))."));
                if let Some(competence) = &meta.competence {
                    self.log.push(Level::Info, format!("Competencia: {competence}"));
                }
            }
            SheetKind::Overtime => {
                self.log.push(Level::Success, format!("Transformacao pronta ({rows} linha(s))."));
                if let Some(date) = meta.header_date {
                    self.log.push(Level::Info, format!("Data: {}", format::format_date_br(date)));
                }
            }
        }
        if let Some(label) = meta.label() {
            self.log.push(Level::Info, format!("Empresa: {label}"));
        }
    }

    fn report_row_errors(&mut self, sheet: &LoadedSheet) {
        let count = sheet.row_errors.len();
        if count == 0 {
            return;
        }
        if sheet.blocks_import() {
            self.log.push(Level::Error, format!("{count} linha(s) com erro. Corrija antes de importar."));
        } else {
            self.log.push(Level::Warning, format!("{count} linha(s) com aviso."));
        }
    }

    /// Drops row `index` (position in the row list) from the loaded sheet and
    /// re-validates.
    ///
    /// # Errors
    ///
    /// [`ImportError::NoSheetLoaded`].
    pub fn remove_row(&mut self, index: usize) -> Result<bool, ImportError> {
        let sheet = self.sheet.as_mut().ok_or(ImportError::NoSheetLoaded)?;
        if !sheet.transformed.rows.remove(index) {
            return Ok(false);
        }
        sheet.row_errors = validate::collect_row_errors(&sheet.transformed.rows);
        Ok(true)
    }

    /// Runs validation, reference checks, conflict detection and, when clear,
    /// the store writes.
    ///
    /// # Errors
    ///
    /// [`ImportError::NoSheetLoaded`], [`ImportError::ConflictPending`],
    /// blocking row errors, unknown registrations and store failures.
    pub async fn import(&mut self) -> Result<ImportOutcome, ImportError> {
        let sheet = self.sheet.clone().ok_or(ImportError::NoSheetLoaded)?;
        if self.gate.pending().is_some() {
            self.log.push(Level::Warning, "Resolva o conflito antes de importar.");
            return Err(ImportError::ConflictPending);
        }
        self.apply(PipelineEvent::ImportRequested)?;
        self.log.push(Level::Info, format!("Validando a planilha \"{}\"...", sheet.file_name));

        if sheet.blocks_import() {
            return Err(self.fail(ImportError::BlockingRowErrors(sheet.row_errors.len())));
        }
        if sheet.rows().is_empty() {
            return Err(self.fail(ImportError::EmptySheet));
        }
        if let Err(err) = self.check_references(&sheet).await {
            return Err(self.fail(err));
        }
        match self.detect_conflict(&sheet).await {
            Ok(Some(conflict)) => {
                self.announce_conflict(&conflict);
                self.gate.open(conflict.clone());
                self.apply(PipelineEvent::ConflictFound(conflict.clone()))?;
                return Ok(ImportOutcome::Conflict(conflict));
            }
            Ok(None) => {}
            Err(err) => return Err(self.fail(err)),
        }

        self.apply(PipelineEvent::UploadStarted)?;
        self.log.push(Level::Info, "Enviando dados para o servidor...");
        let summary = match self.upload(&sheet).await {
            Ok(summary) => summary,
            Err(err) => return Err(self.fail(err)),
        };
        self.apply(PipelineEvent::UploadFinished)?;
        self.log.push(Level::Success, "Carga da tabela concluida com sucesso.");
        info!(kind = %sheet.kind, inserted = summary.inserted, updated = summary.updated, "import finished");
        Ok(ImportOutcome::Imported(summary))
    }

    async fn check_references(&mut self, sheet: &LoadedSheet) -> Result<(), ImportError> {
        if sheet.kind == SheetKind::Employee {
            return Ok(());
        }
        let referenced = sheet.rows().referenced_registrations();
        let known = self.cache.get_or_fetch(&self.store).await?;
        let missing = validate::missing_registrations(&referenced, known);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ImportError::UnknownRegistrations(missing))
        }
    }

    async fn detect_conflict(&self, sheet: &LoadedSheet) -> Result<Option<ImportConflict>, ImportError> {
        let company = sheet.company();
        let conflict = match sheet.kind {
            SheetKind::Employee => None,
            SheetKind::Payroll => match sheet.competence() {
                Some(competence) => conflict::detect_payroll_conflict(&self.store, company, competence).await?,
                None => None,
            },
            SheetKind::Overtime => {
                conflict::detect_overtime_conflict(&self.store, company, &sheet.overtime_dates()).await?
            }
        };
        Ok(conflict)
    }

    fn announce_conflict(&mut self, conflict: &ImportConflict) {
        let company = conflict.company.map_or_else(|| "-".to_string(), format::format_company);
        let text = match conflict.scope {
            ConflictScope::PayrollMonth => {
                format!("Empresa: {company} Competencia: {} ja fechada!", conflict.period_ref)
            }
            ConflictScope::OvertimeDate => {
                format!("Empresa: {company} Data: {} ja lancada!", conflict.period_ref)
            }
        };
        self.log.push(Level::Warning, text);
    }

    async fn upload(&mut self, sheet: &LoadedSheet) -> Result<ImportSummary, ImportError> {
        let user = self.operator.name.as_str();
        let (inserted, updated, skipped) = match sheet.rows() {
            SheetRows::Employee(rows) => {
                let counts = store::upsert_employees(&self.store, rows, user).await?;
                self.cache.invalidate();
                let mut parts = Vec::new();
                if counts.updated > 0 {
                    parts.push(format!("{} atualizado(s)", counts.updated));
                }
                if counts.inserted > 0 {
                    parts.push(format!("{} inserido(s)", counts.inserted));
                }
                if parts.is_empty() {
                    self.log.push(Level::Warning, "Nenhum funcionario novo ou alterado.");
                } else {
                    self.log.push(Level::Success, format!("Funcionarios: {}.", parts.join(" e ")));
                }
                if counts.skipped > 0 {
                    self.log.push(
                        Level::Warning,
                        format!("{} linha(s) sem cadastro ignorada(s).", counts.skipped),
                    );
                }
                (counts.inserted, counts.updated, counts.skipped)
            }
            SheetRows::Payroll(rows) => {
                let inserted = store::insert_payroll(&self.store, rows, user).await?;
                self.log.push(Level::Success, format!("Payroll: {inserted} linha(s) inseridas."));
                (inserted, 0, 0)
            }
            SheetRows::Overtime(rows) => {
                let inserted = store::insert_overtime(&self.store, rows, user).await?;
                self.log.push(Level::Success, format!("Horas extras: {inserted} linha(s) inseridas."));
                (inserted, 0, 0)
            }
        };

        let audit_label = store::import_label(sheet.kind, sheet.company(), sheet.period_label().as_deref());
        let entry = AuditEntry::new(audit_label.clone(), AuditAction::Inclusao, &sheet.file_name, user);
        if let Err(err) = store::insert_audit(&self.store, &entry).await {
            warn!(error = %err, "audit entry not recorded");
            self.log.push(Level::Error, "Falha ao registrar log de carga.");
        }

        Ok(ImportSummary {
            kind: sheet.kind,
            inserted,
            updated,
            skipped,
            audit_label,
        })
    }

    /// Checks the deletion password for the pending conflict; on success
    /// deletes the conflicting period so the sheet can be imported again.
    ///
    /// # Errors
    ///
    /// [`ImportError::NoConflict`], [`ImportError::Session`] without a
    /// session credential, and store failures while deleting.
    pub async fn confirm_conflict(&mut self, password: &str) -> Result<ConfirmOutcome, ImportError> {
        if self.gate.pending().is_none() {
            return Err(ImportError::NoConflict);
        }
        let Some(credential) = self.operator.credential.clone() else {
            self.log.push(Level::Error, "Sessao invalida. Faca login novamente.");
            return Err(ImportError::Session("sem credencial de sessao".to_string()));
        };

        let outcome = self.gate.confirm(password, &credential)?;
        match &outcome {
            ConfirmOutcome::PasswordRequired => self.log.push(Level::Warning, "Informe a senha."),
            ConfirmOutcome::Denied { attempts } => self.log.push(
                Level::Warning,
                format!("Senha invalida. Tentativa {attempts} de {MAX_ATTEMPTS}."),
            ),
            ConfirmOutcome::Locked => {
                let message = "Parece que voce nao tem acesso a exclusao".to_string();
                self.log.push(Level::Error, message.clone());
                self.apply(PipelineEvent::ConflictCancelled(message))?;
            }
            ConfirmOutcome::Approved(conflict) => self.resolve(conflict).await?,
        }
        Ok(outcome)
    }

    async fn resolve(&mut self, conflict: &ImportConflict) -> Result<(), ImportError> {
        let (deleting, deleted_from, done) = match conflict.scope {
            ConflictScope::PayrollMonth => (
                "Excluindo fechamento da folha pgto :",
                "da folha ref.",
                "Exclusao concluida. Voce ja pode importar a nova Folha Pgto.",
            ),
            ConflictScope::OvertimeDate => (
                "Excluindo horas extras da data:",
                "do dia",
                "Exclusao concluida. Voce ja pode importar as novas horas extras.",
            ),
        };
        self.log.push(Level::Info, format!("{deleting} {}", conflict.period_ref));

        let deleted = match conflict::delete_conflicting(&self.store, conflict).await {
            Ok(deleted) => deleted,
            Err(err) => return Err(self.fail(err.into())),
        };
        self.log.push(
            Level::Success,
            format!("Total {deleted} registro(s) excluido(s) {deleted_from} {}", conflict.period_ref),
        );

        let file_name = self.sheet.as_ref().map(|s| s.file_name.clone()).unwrap_or_default();
        let label = store::delete_label(conflict.scope, &conflict.period_ref);
        let entry = AuditEntry::new(label, AuditAction::Delete, &file_name, &self.operator.name);
        if let Err(err) = store::insert_audit(&self.store, &entry).await {
            warn!(error = %err, "audit entry not recorded");
            self.log.push(Level::Error, "Falha ao registrar log de exclusao.");
        }

        self.apply(PipelineEvent::ConflictResolved)?;
        self.log.push(Level::Success, done);
        Ok(())
    }

    /// Abandons the pending conflict.
    ///
    /// # Errors
    ///
    /// [`ImportError::NoConflict`].
    pub fn cancel_conflict(&mut self) -> Result<ImportConflict, ImportError> {
        let conflict = self.gate.cancel().ok_or(ImportError::NoConflict)?;
        let message = "Voce cancelou a operacao".to_string();
        self.log.push(Level::Error, message.clone());
        self.apply(PipelineEvent::ConflictCancelled(message))?;
        Ok(conflict)
    }

    /// Back to a fresh screen: no sheet, no conflict, empty cache.
    pub fn reset(&mut self) {
        self.sheet = None;
        self.gate.cancel();
        self.cache.invalidate();
        self.state = PipelineState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, AUDIT_TABLE, EMPLOYEE_TABLE, OVERTIME_TABLE, PAYROLL_TABLE};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const PASSWORD: &str = "s3nha";

    fn session(store: MemoryStore) -> ImportSession<MemoryStore> {
        ImportSession::new(
            store,
            RegistrationCache::new(),
            Operator {
                name: "maria".to_string(),
                credential: Some(CredentialHash::from_password(PASSWORD)),
            },
            MessageLog::default(),
        )
    }

    fn employees(registrations: &[u64]) -> Vec<serde_json::Value> {
        registrations.iter().map(|r| json!({"registration": r})).collect()
    }

    fn payroll_csv(rows: usize) -> Vec<u8> {
        let mut text = String::from("cadastro,Colaborador,Evento,Competencia,Referencia,valor,Empresa\n");
        for i in 0..rows {
            text.push_str(&format!("{},NOME {i},303,03/2024,8:00,\"150,00\",12\n", 100 + i));
        }
        text.into_bytes()
    }

    fn overtime_csv() -> Vec<u8> {
        b"Data,Cadastro,Nome,303,304,505,506,511,512,Empresa\n\
          2024-03-01,100,ANA,1:00,,,,,,12\n"
            .to_vec()
    }

    #[test]
    fn transition_table() {
        let conflict = ImportConflict {
            scope: ConflictScope::OvertimeDate,
            company: Some(12),
            period_ref: "01/03/2024".to_string(),
            period_key_for_delete: "2024-03-01".to_string(),
        };
        let pending = PipelineState::ConflictPending(conflict.clone());

        assert_eq!(
            transition(&PipelineState::Idle, PipelineEvent::ImportRequested).unwrap(),
            PipelineState::Validating
        );
        assert_eq!(
            transition(&PipelineState::Validating, PipelineEvent::ConflictFound(conflict)).unwrap(),
            pending
        );
        assert!(matches!(
            transition(&pending, PipelineEvent::ImportRequested),
            Err(ImportError::ConflictPending)
        ));
        assert_eq!(
            transition(&pending, PipelineEvent::ConflictResolved).unwrap(),
            PipelineState::Idle
        );
        assert_eq!(
            transition(&PipelineState::Uploading, PipelineEvent::FileSelected).unwrap(),
            PipelineState::Validating
        );
        assert!(matches!(
            transition(&PipelineState::Idle, PipelineEvent::UploadFinished),
            Err(ImportError::InvalidTransition { from: "idle", event: "upload-finished" })
        ));
        assert_eq!(transition(&pending, PipelineEvent::Reset).unwrap(), PipelineState::Idle);
    }

    #[test]
    fn message_log_is_capped_newest_first() {
        let mut log = MessageLog::new(2);
        log.push(Level::Info, "a");
        log.push(Level::Success, "b");
        log.push(Level::Error, "c");
        let shown: Vec<String> = log.entries().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["XxX c", "OoO b"]);
        assert_eq!(log.drain_toasts().len(), 3);
        assert!(log.drain_toasts().is_empty());
    }

    #[tokio::test]
    async fn clean_payroll_is_imported_and_audited() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, employees(&[100, 101, 102, 103, 104]));
        let mut session = session(store);

        let sheet = session.select_file(SheetKind::Payroll, "folha.csv", &payroll_csv(5)).unwrap();
        assert_eq!(sheet.rows().len(), 5);
        assert!(sheet.row_errors.is_empty());

        let outcome = session.import().await.unwrap();
        assert_eq!(
            outcome,
            ImportOutcome::Imported(ImportSummary {
                kind: SheetKind::Payroll,
                inserted: 5,
                updated: 0,
                skipped: 0,
                audit_label: "payroll 0012-03/2024".to_string(),
            })
        );
        assert_eq!(session.state(), &PipelineState::Done);
        assert_eq!(session.store().rows(PAYROLL_TABLE).len(), 5);
        assert_eq!(session.store().rows(AUDIT_TABLE)[0]["actions"], json!("Inclusao"));
    }

    #[tokio::test]
    async fn second_import_of_same_month_conflicts() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, employees(&[100, 101]));
        let mut session = session(store);
        session.select_file(SheetKind::Payroll, "folha.csv", &payroll_csv(2)).unwrap();
        session.import().await.unwrap();

        match session.import().await.unwrap() {
            ImportOutcome::Conflict(conflict) => {
                assert_eq!(conflict.scope, ConflictScope::PayrollMonth);
                assert_eq!(conflict.period_ref, "03/2024");
                assert_eq!(conflict.company, Some(12));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(session.import().await, Err(ImportError::ConflictPending)));
    }

    #[tokio::test]
    async fn overtime_conflict_then_delete_and_retry() {
        let store = MemoryStore::new()
            .with_rows(EMPLOYEE_TABLE, employees(&[100]))
            .with_rows(OVERTIME_TABLE, vec![json!({"company": 12, "date_": "2024-03-01"})]);
        let mut session = session(store);
        session.select_file(SheetKind::Overtime, "he.csv", &overtime_csv()).unwrap();

        let ImportOutcome::Conflict(conflict) = session.import().await.unwrap() else {
            panic!("expected conflict");
        };
        assert_eq!(conflict.scope, ConflictScope::OvertimeDate);
        assert_eq!(conflict.period_ref, "01/03/2024");
        assert!(matches!(session.state(), PipelineState::ConflictPending(_)));

        let outcome = session.confirm_conflict(PASSWORD).await.unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Approved(_)));
        assert_eq!(session.state(), &PipelineState::Idle);
        assert!(session.store().rows(OVERTIME_TABLE).is_empty());
        assert_eq!(
            session.store().rows(AUDIT_TABLE)[0]["registration"],
            json!("overtime Ref. 01/03/2024")
        );

        let ImportOutcome::Imported(summary) = session.import().await.unwrap() else {
            panic!("expected import");
        };
        assert_eq!(summary.inserted, 1);
        assert_eq!(session.store().rows(OVERTIME_TABLE)[0]["min_303"], json!(60));
    }

    #[tokio::test]
    async fn three_wrong_passwords_cancel_the_conflict() {
        let store = MemoryStore::new()
            .with_rows(EMPLOYEE_TABLE, employees(&[100]))
            .with_rows(OVERTIME_TABLE, vec![json!({"company": 12, "date_": "2024-03-01"})]);
        let mut session = session(store);
        session.select_file(SheetKind::Overtime, "he.csv", &overtime_csv()).unwrap();
        session.import().await.unwrap();

        assert_eq!(
            session.confirm_conflict("").await.unwrap(),
            ConfirmOutcome::PasswordRequired
        );
        for _ in 0..2 {
            assert!(matches!(
                session.confirm_conflict("errada").await.unwrap(),
                ConfirmOutcome::Denied { .. }
            ));
        }
        assert_eq!(session.confirm_conflict("errada").await.unwrap(), ConfirmOutcome::Locked);
        assert!(matches!(session.state(), PipelineState::Error(_)));
        assert!(matches!(
            session.confirm_conflict(PASSWORD).await,
            Err(ImportError::NoConflict)
        ));
        assert_eq!(session.store().rows(OVERTIME_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn unknown_registrations_block_import() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, employees(&[100]));
        let mut session = session(store);
        session.select_file(SheetKind::Payroll, "folha.csv", &payroll_csv(3)).unwrap();
        match session.import().await.unwrap_err() {
            ImportError::UnknownRegistrations(missing) => assert_eq!(missing, vec![101, 102]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.store().rows(PAYROLL_TABLE).is_empty());
    }

    #[tokio::test]
    async fn payroll_row_errors_block_until_row_removed() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, employees(&[100]));
        let mut session = session(store);
        let csv = b"cadastro,Colaborador,Evento,Competencia,Referencia,valor\n\
                    100,ANA,303,03/2024,1,10\n\
                    abc,BIA,303,03/2024,1,10\n";
        let sheet = session.select_file(SheetKind::Payroll, "folha.csv", csv).unwrap();
        assert_eq!(sheet.row_errors[0].row_index, 3);

        assert!(matches!(session.import().await, Err(ImportError::BlockingRowErrors(1))));
        assert!(session.remove_row(1).unwrap());
        assert!(session.sheet().unwrap().row_errors.is_empty());
        assert!(matches!(session.import().await.unwrap(), ImportOutcome::Imported(_)));
    }

    #[tokio::test]
    async fn employee_row_errors_do_not_block() {
        let header = "Empresa,Cadastro,Nome,CPF,Nascimento,Admissao,Situacao,Data Afastamento,\
                      Titulo Reduzido (Cargo),Descricao do Local,Descricao (Nacionalidade),\
                      Descricao (Instrucao),Sexo,Descricao (Estado Civil),Descricao (Raca/Etnia),\
                      Valor Salario,Descricao (Situacao)";
        let row = "12,100200,ANA,123,10/05/1990,15/01/2020,1,00/00/0000,ANALISTA,RH,Brasileira,\
                   Superior,F,Solteira,Parda,3500,Trabalhando";
        let csv = format!("{header}\n{row}\n");

        let mut session = session(MemoryStore::new());
        let sheet = session.select_file(SheetKind::Employee, "cadastro.csv", csv.as_bytes()).unwrap();
        assert_eq!(
            sheet.row_errors,
            vec![RowError {
                row_index: 2,
                errors: vec!["CPF invalido: deve ter 11 digitos".to_string()],
            }]
        );

        let ImportOutcome::Imported(summary) = session.import().await.unwrap() else {
            panic!("expected import");
        };
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.audit_label, "employee");
    }

    #[tokio::test]
    async fn store_failure_surfaces_body_and_keeps_sheet() {
        let store = MemoryStore::new().with_rows(EMPLOYEE_TABLE, employees(&[100]));
        store.reject_writes(PAYROLL_TABLE);
        let mut session = session(store);
        session.select_file(SheetKind::Payroll, "folha.csv", &payroll_csv(1)).unwrap();

        let err = session.import().await.unwrap_err();
        assert!(err.to_string().contains("writes to payroll are rejected"));
        assert!(matches!(session.state(), PipelineState::Error(_)));
        assert!(session.sheet().is_some());
    }

    #[test]
    fn unreadable_file_keeps_nothing() {
        let mut session = session(MemoryStore::new());
        let err = session
            .select_file(SheetKind::Payroll, "folha.xlsx", b"not a workbook")
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(session.sheet().is_none());
        assert!(matches!(session.state(), PipelineState::Error(_)));
    }

    #[tokio::test]
    async fn cancel_then_reset() {
        let store = MemoryStore::new()
            .with_rows(EMPLOYEE_TABLE, employees(&[100]))
            .with_rows(OVERTIME_TABLE, vec![json!({"company": 12, "date_": "2024-03-01"})]);
        let mut session = session(store);
        session.select_file(SheetKind::Overtime, "he.csv", &overtime_csv()).unwrap();
        session.import().await.unwrap();

        session.cancel_conflict().unwrap();
        assert_eq!(
            session.state(),
            &PipelineState::Error("Voce cancelou a operacao".to_string())
        );
        assert!(matches!(session.cancel_conflict(), Err(ImportError::NoConflict)));

        session.reset();
        assert_eq!(session.state(), &PipelineState::Idle);
        assert!(session.sheet().is_none());
        assert!(matches!(session.import().await, Err(ImportError::NoSheetLoaded)));
    }
}
