//! Error types.
//!
//! Row-level problems are data ([`crate::types::RowError`]), never errors.
//! Everything here ends or pauses the current import step.

use thiserror::Error;

/// Failure talking to the remote store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Non-success response; `body` is the store's raw error text.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected store payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("store is not configured: {0}")]
    NotConfigured(&'static str),
}

/// Failure of one import step.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The buffer is not a readable spreadsheet or text report.
    #[error("Erro ao ler o arquivo {file}: {reason}")]
    FileRead { file: String, reason: String },

    #[error("Colunas obrigatorias ausentes: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("Planilha vazia. Selecione um arquivo com dados.")]
    EmptySheet,

    #[error("Colaboradores nao encontrado: ({})", join_codes(.0))]
    UnknownRegistrations(Vec<u64>),

    #[error("{0} linha(s) com erro. Corrija a planilha antes de importar.")]
    BlockingRowErrors(usize),

    #[error("Existe um conflito pendente; confirme a exclusao ou cancele.")]
    ConflictPending,

    #[error("Nenhum conflito pendente.")]
    NoConflict,

    #[error("Nenhuma planilha carregada.")]
    NoSheetLoaded,

    #[error("transicao invalida: {from} -> {event}")]
    InvalidTransition { from: &'static str, event: &'static str },

    #[error("Erro no servidor: {0}")]
    Store(#[from] StoreError),

    /// Missing or unusable session credentials.
    #[error("sessao invalida: {0}")]
    Session(String),
}

fn join_codes(codes: &[u64]) -> String {
    codes
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ImportError {
    /// The only unconditionally fatal kind: nothing of the attempt survives.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FileRead { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_registrations_lists_every_code() {
        let err = ImportError::UnknownRegistrations(vec![123, 456]);
        assert_eq!(err.to_string(), "Colaboradores nao encontrado: (123, 456)");
    }

    #[test]
    fn store_error_keeps_raw_body() {
        let err = ImportError::from(StoreError::Status {
            status: 409,
            body: "duplicate key".to_string(),
        });
        assert_eq!(err.to_string(), "Erro no servidor: store returned 409: duplicate key");
        assert!(!err.is_fatal());
    }
}
