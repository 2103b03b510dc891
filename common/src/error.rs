use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errores del pipeline (split, jobs, monitor, índice y merge).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("error de E/S en {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuración inválida: {0}")]
    InvalidConfig(String),

    #[error("no se pudo cargar la configuración: {0}")]
    Config(#[from] config::ConfigError),

    #[error("patrón glob inválido: {0}")]
    Pattern(#[from] glob::PatternError),

    /// El scheduler rechazó el DAG (exit != 0).
    #[error("el scheduler rechazó el envío (exit {code:?}): {stderr}")]
    SubmitRejected { code: Option<i32>, stderr: String },

    /// El envío "funcionó" pero no hay cluster id en la salida.
    #[error("no se encontró el cluster id en la salida del envío:\n{stdout}")]
    MissingClusterId { stdout: String },

    /// El run-log todavía no existe.
    #[error("el run-log {0} todavía no existe")]
    StatusArtifactMissing(PathBuf),

    /// Bloque de estado escrito a medias.
    #[error("línea de estado incompleta: {0:?}")]
    MalformedStatus(String),

    #[error("no hay conteo de eventos para {key}")]
    MissingCount { key: String },

    #[error("archivo repetido en el orden de merge: {key}")]
    DuplicateKey { key: String },

    #[error("el orden de merge ya fue registrado en {0}")]
    MergeOrderExists(PathBuf),

    #[error(
        "índice construido con el orden {index_order}, pero el orden actual es {current_order}"
    )]
    StaleIndex {
        index_order: uuid::Uuid,
        current_order: uuid::Uuid,
    },

    #[error("el índice cubre {expected} eventos pero el vector tiene {actual}")]
    LengthMismatch { expected: u64, actual: usize },

    #[error("archivo desconocido en el índice: {0}")]
    UnknownFile(String),

    /// Los rangos del índice no cubren [0, total_events) exactamente.
    #[error("índice de eventos inconsistente: {0}")]
    InvalidIndex(String),

    #[error("identificador {id} de la tabla {table} no aparece en la tabla de ids de {source_db}")]
    UnmappedIdentifier {
        id: i64,
        table: String,
        source_db: PathBuf,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        // un NotFound del run-log se maneja aparte en status.rs
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Errores transitorios del monitor: se reintenta en el próximo ciclo.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StatusArtifactMissing(_) | Self::MalformedStatus(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solo_errores_de_polling_son_reintentables() {
        assert!(PipelineError::StatusArtifactMissing(PathBuf::from("x")).is_retryable());
        assert!(PipelineError::MalformedStatus("1 2".into()).is_retryable());

        let denied = PipelineError::io(
            "dagman.out",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(!denied.is_retryable());
        assert!(!PipelineError::MissingClusterId { stdout: String::new() }.is_retryable());
    }
}
