use std::{
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Envío de un DAG al scheduler del cluster.
pub trait Scheduler {
    /// Devuelve el id del cluster asignado.
    fn submit(&self, dag_file: &Path) -> Result<String>;
}

/// Scheduler tipo HTCondor: `<submit_bin> -f <dag>`.
#[derive(Debug, Clone)]
pub struct CondorScheduler {
    submit_bin: PathBuf,
}

impl CondorScheduler {
    pub fn new(submit_bin: impl Into<PathBuf>) -> Self {
        Self {
            submit_bin: submit_bin.into(),
        }
    }
}

impl Scheduler for CondorScheduler {
    fn submit(&self, dag_file: &Path) -> Result<String> {
        info!(
            "enviando {} con {}",
            dag_file.display(),
            self.submit_bin.display()
        );

        let output = Command::new(&self.submit_bin)
            .arg("-f")
            .arg(dag_file)
            .output()
            .map_err(|e| PipelineError::io(&self.submit_bin, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!("salida del envío:\n{}", stdout);

        if !output.status.success() {
            return Err(PipelineError::SubmitRejected {
                code: output.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        let cluster = parse_cluster_id(&stdout)
            .ok_or_else(|| PipelineError::MissingClusterId { stdout })?;
        info!("DAG enviado, cluster {}", cluster);
        Ok(cluster)
    }
}

/// Último campo de la primera línea que menciona "cluster".
/// Ej: "1 job(s) submitted to cluster 12345." -> "12345"
pub fn parse_cluster_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find(|l| l.to_ascii_lowercase().contains("cluster"))
        .and_then(|l| l.split_whitespace().last())
        .map(|t| t.trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_trims_trailing_dot() {
        let out = "File for submitting this DAG to HTCondor : dagman.dag.condor.sub\n\
Log of DAGMan debugging messages : dagman.dag.dagman.out\n\
-----------------------------------------------------------------------\n\
Submitting job(s).\n\
1 job(s) submitted to cluster 4711.\n";
        assert_eq!(parse_cluster_id(out).as_deref(), Some("4711"));
    }

    #[test]
    fn cluster_marker_is_case_insensitive() {
        assert_eq!(
            parse_cluster_id("CLUSTER assigned: 99\n").as_deref(),
            Some("99")
        );
        assert_eq!(parse_cluster_id("Submitting job(s).\n"), None);
    }

    #[cfg(unix)]
    mod fake_bin {
        use super::*;
        use std::{
            fs,
            os::unix::fs::PermissionsExt,
            sync::{Mutex, MutexGuard},
        };

        // escribir un script y ejecutarlo mientras otro hilo hace fork puede dar ETXTBSY
        static SPAWN: Mutex<()> = Mutex::new(());

        fn spawn_lock() -> MutexGuard<'static, ()> {
            SPAWN.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn fake_submit(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake_submit_dag");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn submit_devuelve_el_cluster() {
            let _guard = spawn_lock();
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_submit(
                dir.path(),
                r#"[ "$1" = "-f" ] || exit 2
echo "Submitting job(s)."
echo "1 job(s) submitted to cluster 123."
"#,
            );

            let id = CondorScheduler::new(bin)
                .submit(&dir.path().join("dagman.dag"))
                .unwrap();
            assert_eq!(id, "123");
        }

        #[test]
        fn nonzero_exit_is_submit_rejected_with_stderr() {
            let _guard = spawn_lock();
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_submit(dir.path(), "echo 'ERROR: dag not found' >&2\nexit 1");

            let err = CondorScheduler::new(bin)
                .submit(Path::new("/no/existe.dag"))
                .unwrap_err();
            match err {
                PipelineError::SubmitRejected { code, stderr } => {
                    assert_eq!(code, Some(1));
                    assert!(stderr.contains("dag not found"));
                }
                other => panic!("error inesperado: {other}"),
            }
        }

        #[test]
        fn success_without_cluster_line_is_fatal() {
            let _guard = spawn_lock();
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_submit(dir.path(), "echo 'Submitting job(s).'");

            let err = CondorScheduler::new(bin)
                .submit(Path::new("dagman.dag"))
                .unwrap_err();
            assert!(matches!(err, PipelineError::MissingClusterId { .. }));
            assert!(!err.is_retryable());
        }
    }
}
