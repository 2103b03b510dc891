use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Un nodo del DAG: un job por cada entrada (archivo o directorio de batch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Número de secuencia, único dentro de una generación
    pub index: usize,

    /// Ruta absoluta de la entrada
    pub input_path: PathBuf,
    /// Ruta de salida: nombre de la entrada con la extensión reemplazada
    pub output_path: PathBuf,
}

impl JobSpec {
    pub fn node_name(&self) -> String {
        format!("job_{}", self.index)
    }
}

/// Foto del estado del DAG según el run-log del scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunStatus {
    pub done: u64,
    pub pre: u64,
    pub queued: u64,
    pub post: u64,
    pub ready: u64,
    pub unready: u64,
    pub failed: u64,
    pub futile: u64,
}

impl JobRunStatus {
    /// Arma el estado a partir de los contadores en el orden del run-log:
    /// Done, Pre, Queued, Post, Ready, Un-Ready, Failed, Futile.
    pub fn from_counts(values: &[u64]) -> Option<Self> {
        match *values {
            [done, pre, queued, post, ready, unready, failed, futile, ..] => Some(Self {
                done,
                pre,
                queued,
                post,
                ready,
                unready,
                failed,
                futile,
            }),
            _ => None,
        }
    }

    pub fn total(&self) -> u64 {
        self.done
            + self.pre
            + self.queued
            + self.post
            + self.ready
            + self.unready
            + self.failed
            + self.futile
    }

    /// Jobs que todavía pueden correr.
    pub fn remaining(&self) -> u64 {
        self.queued + self.ready
    }

    /// Jobs terminados, bien o mal.
    pub fn finished(&self) -> u64 {
        self.done + self.failed
    }

    /// Tamaño de la barra de progreso.
    pub fn progress_len(&self) -> u64 {
        self.remaining() + self.finished()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_counts_maps_positions_to_named_counters() {
        let s = JobRunStatus::from_counts(&[10, 0, 5, 0, 3, 0, 2, 0]).unwrap();
        assert_eq!(
            s,
            JobRunStatus {
                done: 10,
                pre: 0,
                queued: 5,
                post: 0,
                ready: 3,
                unready: 0,
                failed: 2,
                futile: 0,
            }
        );
        assert_eq!(s.total(), 20);
        assert_eq!(s.remaining(), 8);
        assert_eq!(s.finished(), 12);
        assert_eq!(s.progress_len(), 20);
        assert!(!s.is_complete());
    }

    #[test]
    fn from_counts_rechaza_lineas_cortas() {
        assert!(JobRunStatus::from_counts(&[1, 2, 3]).is_none());
    }

    #[test]
    fn node_name_usa_el_indice() {
        let spec = JobSpec {
            index: 7,
            input_path: PathBuf::from("/in/a.i3.zst"),
            output_path: PathBuf::from("/out/a.json"),
        };
        assert_eq!(spec.node_name(), "job_7");
    }
}
