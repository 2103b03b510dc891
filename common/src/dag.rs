use std::{collections::BTreeMap, fmt::Write, path::PathBuf};

use crate::job::JobSpec;

/// DAG plano: todos los nodos son hojas independientes, sin PARENT/CHILD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dag {
    /// Archivo incluido con `CONFIG` (settings del DAG manager)
    pub config_file: PathBuf,
    /// Submit file compartido por todos los nodos
    pub submit_file: PathBuf,
    pub nodes: Vec<JobSpec>,
}

impl Dag {
    /// Texto del archivo .dag: `CONFIG`, y por nodo un `JOB` + `VARS`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CONFIG {}", self.config_file.display());
        out.push('\n');

        for node in &self.nodes {
            let name = node.node_name();
            let _ = writeln!(out, "JOB {} {}", name, self.submit_file.display());
            let _ = writeln!(
                out,
                "VARS {} infile=\"{}\" outfile=\"{}\"",
                name,
                node.input_path.display(),
                node.output_path.display()
            );
            out.push('\n');
        }

        out
    }
}

/// Archivo CONFIG del DAG: una línea `CLAVE = valor` por setting.
pub fn render_dag_config(settings: &BTreeMap<String, String>) -> String {
    settings
        .iter()
        .map(|(k, v)| format!("{} = {}\n", k.to_ascii_uppercase(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_emits_config_then_job_and_vars_per_node() {
        let dag = Dag {
            config_file: PathBuf::from("/jobs/conf/config.dag"),
            submit_file: PathBuf::from("/jobs/conf/job.sub"),
            nodes: vec![
                JobSpec {
                    index: 0,
                    input_path: PathBuf::from("/in/a.i3.zst"),
                    output_path: PathBuf::from("/out/a.json"),
                },
                JobSpec {
                    index: 1,
                    input_path: PathBuf::from("/in/b.i3.zst"),
                    output_path: PathBuf::from("/out/b.json"),
                },
            ],
        };

        let expected = "CONFIG /jobs/conf/config.dag\n\
\n\
JOB job_0 /jobs/conf/job.sub\n\
VARS job_0 infile=\"/in/a.i3.zst\" outfile=\"/out/a.json\"\n\
\n\
JOB job_1 /jobs/conf/job.sub\n\
VARS job_1 infile=\"/in/b.i3.zst\" outfile=\"/out/b.json\"\n\
\n";
        assert_eq!(dag.render(), expected);
    }

    #[test]
    fn dag_sin_nodos_solo_tiene_config() {
        let dag = Dag {
            config_file: PathBuf::from("/c.dag"),
            submit_file: PathBuf::from("/j.sub"),
            nodes: vec![],
        };
        assert_eq!(dag.render(), "CONFIG /c.dag\n\n");
    }

    #[test]
    fn render_dag_config_uppercases_keys() {
        let mut settings = BTreeMap::new();
        settings.insert("dagman_max_jobs_idle".to_string(), "5000".to_string());
        settings.insert("DAGMAN_USER_LOG_SCAN_INTERVAL".to_string(), "1".to_string());

        assert_eq!(
            render_dag_config(&settings),
            "DAGMAN_USER_LOG_SCAN_INTERVAL = 1\nDAGMAN_MAX_JOBS_IDLE = 5000\n"
        );
    }
}
