use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{PipelineError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_MERGE_BATCH_SIZE: usize = 10 * 1024;

/// Escala del offset por archivo en el merge: cada archivo puede aportar
/// hasta un millón de eventos sin pisarse con el siguiente.
pub const DEFAULT_OFFSET_SCALE: i64 = 1_000_000;

/// Prefijo de las env vars que sobreescriben la configuración,
/// ej: PIPELINE__JOBS__REQUEST_CPUS=4
pub const ENV_PREFIX: &str = "PIPELINE";

/// Configuración completa del pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Archivos por batch al hacer staging
    pub batch_size: usize,
    pub jobs: JobConfig,
    pub layout: JobLayout,
    pub monitor: MonitorConfig,
    pub merge: MergeConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            jobs: JobConfig::default(),
            layout: JobLayout::default(),
            monitor: MonitorConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Carga defaults, luego el archivo (si hay) y al final las env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let cfg: PipelineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "batch_size debe ser mayor a 0".into(),
            ));
        }
        if self.merge.batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "merge.batch_size debe ser mayor a 0".into(),
            ));
        }
        if self.jobs.request_cpus == 0 {
            return Err(PipelineError::InvalidConfig(
                "jobs.request_cpus debe ser mayor a 0".into(),
            ));
        }
        Ok(())
    }
}

/// Recursos y entorno de cada job (lo que va al submit file y al wrapper).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    pub request_cpus: u32,
    pub request_memory: String,
    pub request_disk: String,
    pub universe: String,
    pub should_transfer_files: String,
    pub when_to_transfer_output: String,

    /// Expresión `requirements` opcional, ej: `(Microarch == "x86_64-v3")`
    pub requirements: Option<String>,

    /// Intérprete que ejecuta el script de procesamiento
    pub interpreter: String,
    /// Líneas `KEY=VALUE` exportadas en el wrapper
    pub exports: Vec<String>,
    /// Comandos de setup del entorno, en orden
    pub setup_commands: Vec<String>,
    /// Script `activate` de un virtualenv
    pub venv_path: Option<PathBuf>,

    /// Settings del DAG manager (van al archivo CONFIG del DAG).
    /// Las claves se escriben en mayúsculas.
    pub dagman: BTreeMap<String, String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            request_cpus: 2,
            request_memory: "1GB".to_string(),
            request_disk: "2GB".to_string(),
            universe: "vanilla".to_string(),
            should_transfer_files: "YES".to_string(),
            when_to_transfer_output: "ON_EXIT".to_string(),
            requirements: None,
            interpreter: "python3".to_string(),
            exports: Vec::new(),
            setup_commands: Vec::new(),
            venv_path: None,
            dagman: BTreeMap::new(),
        }
    }
}

/// Dónde se escriben los archivos generados y los logs de cada job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobLayout {
    pub dag_file: PathBuf,
    pub config_file: PathBuf,
    pub submit_file: PathBuf,
    pub wrapper_file: PathBuf,
    pub log_dir: PathBuf,
    pub out_dir: PathBuf,
    pub err_dir: PathBuf,
}

impl Default for JobLayout {
    fn default() -> Self {
        Self::under("jobs")
    }
}

impl JobLayout {
    /// Layout estándar bajo un directorio base de jobs.
    pub fn under(job_dir: impl AsRef<Path>) -> Self {
        let base = job_dir.as_ref();
        Self {
            dag_file: base.join("dag").join("dagman.dag"),
            config_file: base.join("conf").join("config.dag"),
            submit_file: base.join("conf").join("job.sub"),
            wrapper_file: base.join("conf").join("job.sh"),
            log_dir: base.join("logs").join("log"),
            out_dir: base.join("logs").join("out"),
            err_dir: base.join("logs").join("err"),
        }
    }

    /// El DAG manager escribe su run-log al lado del archivo .dag
    pub fn dagman_out(&self) -> PathBuf {
        let mut name = self
            .dag_file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".dagman.out");
        self.dag_file.with_file_name(name)
    }

    pub fn log_dirs(&self) -> [&Path; 3] {
        [&self.log_dir, &self.out_dir, &self.err_dir]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Binario que recibe el DAG (`<bin> -f <dag>`)
    pub submit_bin: String,
    pub poll_interval_secs: u64,
    /// Líneas entre el encabezado de estado y la línea numérica
    pub lines_after: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            submit_bin: "condor_submit_dag".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            lines_after: 2,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    /// Tabla de donde salen los ids de evento de cada fuente
    pub id_table: String,
    pub id_column: String,
    pub batch_size: usize,
    pub offset_scale: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            id_table: "truth".to_string(),
            id_column: "event_no".to_string(),
            batch_size: DEFAULT_MERGE_BATCH_SIZE,
            offset_scale: DEFAULT_OFFSET_SCALE,
        }
    }
}
