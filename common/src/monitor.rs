use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::JobRunStatus;
use crate::status::StatusSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// Sin estado publicado todavía (o la última lectura falló de forma transitoria)
    AwaitingArtifact,
    Polling(JobRunStatus),
    /// Nada en cola ni listo para correr
    Terminal(JobRunStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub polls: u64,
    pub status: JobRunStatus,
}

/// Barra de progreso del monitor, con el mismo formato que el resto de las CLIs.
pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar
}

/// Máquina de estados del seguimiento de un DAG. No hace I/O: cada lectura
/// del run-log entra por `advance`.
pub struct Monitor {
    state: MonitorState,
    polls: u64,
    progress: ProgressBar,
    progress_ready: bool,
    /// Total de nodos de la primera lectura; no debería cambiar durante la corrida
    expected_total: Option<u64>,
    total_mismatches: u64,
}

impl Monitor {
    pub fn new(progress: ProgressBar) -> Self {
        Self {
            state: MonitorState::AwaitingArtifact,
            polls: 0,
            progress,
            progress_ready: false,
            expected_total: None,
            total_mismatches: 0,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Lecturas cuyo total de nodos difiere del de la primera.
    pub fn total_mismatches(&self) -> u64 {
        self.total_mismatches
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, MonitorState::Terminal(_))
    }

    /// Aplica el resultado de una lectura. Los errores no reintentables se
    /// devuelven tal cual; el resto deja al monitor esperando.
    pub fn advance(&mut self, read: Result<Option<JobRunStatus>>) -> Result<MonitorState> {
        if self.is_terminal() {
            return Ok(self.state);
        }
        self.polls += 1;

        let status = match read {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!("run-log sin tabla de estado todavía");
                self.state = MonitorState::AwaitingArtifact;
                return Ok(self.state);
            }
            Err(e) if e.is_retryable() => {
                debug!("lectura de estado fallida, se reintenta: {}", e);
                self.state = MonitorState::AwaitingArtifact;
                return Ok(self.state);
            }
            Err(e) => return Err(e),
        };

        match self.expected_total {
            None => self.expected_total = Some(status.total()),
            Some(expected) if expected != status.total() => {
                self.total_mismatches += 1;
                warn!(
                    "el total de nodos cambió de {} a {} durante la corrida",
                    expected,
                    status.total()
                );
            }
            Some(_) => {}
        }

        if !self.progress_ready {
            self.progress.set_length(status.progress_len());
            self.progress_ready = true;
        }
        self.progress.set_position(status.finished());
        self.progress.set_message(format!("fallidos: {}", status.failed));

        self.state = if status.is_complete() {
            self.progress.finish();
            MonitorState::Terminal(status)
        } else {
            MonitorState::Polling(status)
        };
        Ok(self.state)
    }

    pub fn report(&self) -> Option<MonitorReport> {
        match self.state {
            MonitorState::Terminal(status) => Some(MonitorReport {
                polls: self.polls,
                status,
            }),
            _ => None,
        }
    }
}

/// Lee el estado cada `interval` hasta que no queda nada en cola ni listo.
/// No tiene límite de reintentos: la cancelación se hace en el scheduler.
pub async fn run<S>(
    source: &S,
    interval: Duration,
    progress: ProgressBar,
) -> Result<MonitorReport>
where
    S: StatusSource + ?Sized,
{
    let mut monitor = Monitor::new(progress);

    loop {
        let state = monitor.advance(source.read_status())?;

        if let MonitorState::Terminal(status) = state {
            if status.failed > 0 {
                warn!("DAG terminado con {} jobs fallidos", status.failed);
            } else {
                info!("DAG terminado: {} jobs ok", status.done);
            }
            return Ok(MonitorReport {
                polls: monitor.polls(),
                status,
            });
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::{cell::RefCell, collections::VecDeque, path::PathBuf};

    type Read = Result<Option<JobRunStatus>>;

    /// Devuelve las lecturas en orden; la última se repite.
    struct Scripted {
        reads: RefCell<VecDeque<Read>>,
        calls: RefCell<u64>,
    }

    impl Scripted {
        fn new(reads: Vec<Read>) -> Self {
            Self {
                reads: RefCell::new(reads.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl StatusSource for Scripted {
        fn read_status(&self) -> Read {
            *self.calls.borrow_mut() += 1;
            let mut reads = self.reads.borrow_mut();
            if reads.len() > 1 {
                reads.pop_front().unwrap()
            } else {
                match reads.front() {
                    Some(Ok(s)) => Ok(*s),
                    _ => Ok(None),
                }
            }
        }
    }

    fn status(done: u64, queued: u64, ready: u64, failed: u64) -> JobRunStatus {
        JobRunStatus {
            done,
            queued,
            ready,
            failed,
            ..JobRunStatus::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_exactly_three_polls() {
        let source = Scripted::new(vec![
            Ok(Some(status(0, 15, 5, 0))),
            Ok(Some(status(12, 5, 1, 2))),
            Ok(Some(status(18, 0, 0, 2))),
        ]);

        let start = tokio::time::Instant::now();
        let report = run(&source, Duration::from_secs(1), ProgressBar::hidden())
            .await
            .unwrap();

        assert_eq!(report.polls, 3);
        assert_eq!(*source.calls.borrow(), 3);
        assert_eq!(report.status.failed, 2);
        // dos esperas entre tres lecturas
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_keep_waiting() {
        let source = Scripted::new(vec![
            Err(PipelineError::StatusArtifactMissing(PathBuf::from("dagman.out"))),
            Ok(None),
            Err(PipelineError::MalformedStatus("10 0".into())),
            Ok(Some(status(3, 0, 0, 0))),
        ]);

        let report = run(&source, Duration::from_secs(1), ProgressBar::hidden())
            .await
            .unwrap();
        assert_eq!(report.polls, 4);
        assert_eq!(report.status.done, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn error_no_reintentable_se_propaga() {
        let denied = PipelineError::io(
            "dagman.out",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let source = Scripted::new(vec![Ok(None), Err(denied), Ok(None)]);

        let err = run(&source, Duration::from_secs(1), ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
        assert_eq!(*source.calls.borrow(), 2);
    }

    #[test]
    fn advance_walks_awaiting_polling_terminal() {
        let mut m = Monitor::new(ProgressBar::hidden());
        assert_eq!(m.state(), MonitorState::AwaitingArtifact);

        let s1 = status(5, 3, 2, 0);
        assert_eq!(m.advance(Ok(Some(s1))).unwrap(), MonitorState::Polling(s1));

        // un bloque a medio escribir vuelve a esperar
        let st = m
            .advance(Err(PipelineError::MalformedStatus(String::new())))
            .unwrap();
        assert_eq!(st, MonitorState::AwaitingArtifact);
        assert!(m.report().is_none());

        let s2 = status(9, 0, 0, 1);
        assert_eq!(m.advance(Ok(Some(s2))).unwrap(), MonitorState::Terminal(s2));
        assert_eq!(m.report(), Some(MonitorReport { polls: 3, status: s2 }));

        // terminal es absorbente
        m.advance(Ok(None)).unwrap();
        assert_eq!(m.polls(), 3);
    }

    #[test]
    fn total_que_cambia_se_cuenta_como_inconsistencia() {
        let mut m = Monitor::new(ProgressBar::hidden());

        m.advance(Ok(Some(status(2, 4, 2, 0)))).unwrap();
        m.advance(Ok(Some(status(4, 3, 1, 0)))).unwrap();
        assert_eq!(m.total_mismatches(), 0);

        // el run-log de otro DAG, con más nodos
        m.advance(Ok(Some(status(4, 10, 1, 0)))).unwrap();
        assert_eq!(m.total_mismatches(), 1);

        m.advance(Ok(Some(status(8, 0, 0, 0)))).unwrap();
        assert_eq!(m.total_mismatches(), 1);
        assert!(m.is_terminal());
    }

    #[test]
    fn progress_tracks_finished_jobs() {
        let bar = ProgressBar::hidden();
        let mut m = Monitor::new(bar.clone());

        m.advance(Ok(Some(status(2, 4, 2, 1)))).unwrap();
        assert_eq!(bar.length(), Some(9));
        assert_eq!(bar.position(), 3);

        m.advance(Ok(Some(status(6, 1, 0, 2)))).unwrap();
        assert_eq!(bar.length(), Some(9));
        assert_eq!(bar.position(), 8);
    }
}
