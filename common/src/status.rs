use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};
use crate::job::JobRunStatus;

/// Encabezado de la tabla de estado que el DAG manager escribe en su run-log.
pub const STATUS_HEADER: &str =
    "Done     Pre   Queued    Post   Ready   Un-Ready   Failed   Futile";

/// Algo que sabe responder "¿cómo va el DAG?".
/// `Ok(None)` = todavía no hay estado publicado.
pub trait StatusSource {
    fn read_status(&self) -> Result<Option<JobRunStatus>>;
}

/// Run-log del DAG manager (`<dag>.dagman.out`).
#[derive(Debug, Clone)]
pub struct DagmanLog {
    path: PathBuf,
    lines_after: usize,
}

impl DagmanLog {
    pub fn new(path: impl Into<PathBuf>, lines_after: usize) -> Self {
        Self {
            path: path.into(),
            lines_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSource for DagmanLog {
    fn read_status(&self) -> Result<Option<JobRunStatus>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PipelineError::StatusArtifactMissing(self.path.clone()));
            }
            Err(e) => return Err(PipelineError::io(&self.path, e)),
        };
        parse_status(&text, self.lines_after)
    }
}

/// Busca el último encabezado de estado y parsea la línea numérica que
/// está `lines_after` líneas más abajo.
pub fn parse_status(text: &str, lines_after: usize) -> Result<Option<JobRunStatus>> {
    let lines: Vec<&str> = text.lines().collect();

    let Some(header) = lines.iter().rposition(|l| l.contains(STATUS_HEADER)) else {
        return Ok(None);
    };

    let Some(line) = lines.get(header + lines_after) else {
        // el bloque todavía se está escribiendo
        return Err(PipelineError::MalformedStatus(String::new()));
    };

    // los tokens no numéricos (fecha y hora al inicio) se descartan
    let counts: Vec<u64> = line
        .split_whitespace()
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .filter_map(|t| t.parse().ok())
        .collect();

    JobRunStatus::from_counts(&counts)
        .map(Some)
        .ok_or_else(|| PipelineError::MalformedStatus(line.trim().to_string()))
}
