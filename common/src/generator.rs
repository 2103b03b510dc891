use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::config::{JobConfig, JobLayout};
use crate::dag::{render_dag_config, Dag};
use crate::error::{PipelineError, Result};
use crate::input::{list_inputs, replace_extension};
use crate::job::JobSpec;

/// Genera los archivos que necesita el scheduler para correr un script
/// sobre cada entrada: el .dag, su CONFIG, el submit file y el wrapper.
#[derive(Debug, Clone)]
pub struct JobGenerator {
    inputs: Vec<PathBuf>,
    output_dir: PathBuf,
    script_path: PathBuf,
    input_ext: String,
    output_ext: String,
    layout: JobLayout,
    jobs: JobConfig,
}

impl JobGenerator {
    /// `inputs` pueden ser archivos o directorios de batch; se guardan
    /// absolutos y ordenados para que la generación sea determinista.
    pub fn new(
        inputs: Vec<PathBuf>,
        output_dir: impl AsRef<Path>,
        script_path: impl AsRef<Path>,
        input_ext: impl Into<String>,
        output_ext: impl Into<String>,
        layout: JobLayout,
        jobs: JobConfig,
    ) -> Result<Self> {
        let mut inputs = inputs
            .iter()
            .map(|p| absolute(p))
            .collect::<Result<Vec<_>>>()?;
        inputs.sort();
        inputs.dedup();

        Ok(Self {
            inputs,
            output_dir: absolute(output_dir.as_ref())?,
            script_path: absolute(script_path.as_ref())?,
            input_ext: input_ext.into(),
            output_ext: output_ext.into(),
            layout: absolute_layout(&layout)?,
            jobs,
        })
    }

    /// Un job por cada archivo `*input_ext` del directorio.
    pub fn from_dir(
        input_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        script_path: impl AsRef<Path>,
        input_ext: &str,
        output_ext: &str,
        layout: JobLayout,
        jobs: JobConfig,
    ) -> Result<Self> {
        let inputs = list_inputs(input_dir, input_ext)?
            .into_iter()
            .map(|f| f.path().to_path_buf())
            .collect();
        Self::new(
            inputs,
            output_dir,
            script_path,
            input_ext,
            output_ext,
            layout,
            jobs,
        )
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    pub fn job_specs(&self) -> Vec<JobSpec> {
        self.inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                let base_name = input
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                JobSpec {
                    index,
                    input_path: input.clone(),
                    output_path: self.output_dir.join(replace_extension(
                        &base_name,
                        &self.input_ext,
                        &self.output_ext,
                    )),
                }
            })
            .collect()
    }

    pub fn dag(&self) -> Dag {
        Dag {
            config_file: self.layout.config_file.clone(),
            submit_file: self.layout.submit_file.clone(),
            nodes: self.job_specs(),
        }
    }

    pub fn render_submit(&self) -> String {
        let l = &self.layout;
        let j = &self.jobs;
        let mut out = String::new();

        // $(Cluster).$(Process) hace único cada log por instancia de job
        for (key, dir, ext) in [
            ("log", &l.log_dir, "log"),
            ("output", &l.out_dir, "out"),
            ("error", &l.err_dir, "err"),
        ] {
            let pattern = dir.join(format!("$(Cluster).$(Process).{ext}"));
            let _ = writeln!(out, "{} = {}", key, pattern.display());
        }
        out.push('\n');

        let _ = writeln!(out, "request_cpus = {}", j.request_cpus);
        let _ = writeln!(out, "request_memory = {}", j.request_memory);
        let _ = writeln!(out, "request_disk = {}", j.request_disk);
        let _ = writeln!(out, "universe = {}", j.universe);
        let _ = writeln!(out, "should_transfer_files = {}", j.should_transfer_files);
        let _ = writeln!(out, "when_to_transfer_output = {}", j.when_to_transfer_output);
        if let Some(req) = &j.requirements {
            let _ = writeln!(out, "requirements = {}", req);
        }
        out.push('\n');

        let _ = writeln!(out, "executable = {}", l.wrapper_file.display());
        let _ = writeln!(out, "arguments = $(infile) $(outfile)");
        out.push('\n');
        out.push_str("queue\n");

        out
    }

    pub fn render_wrapper(&self) -> String {
        let j = &self.jobs;
        let mut out = String::from("#!/bin/sh\n\n");

        for export in &j.exports {
            let _ = writeln!(out, "export {}", export);
        }
        if !j.exports.is_empty() {
            out.push('\n');
        }

        for cmd in &j.setup_commands {
            let _ = writeln!(out, "{}", cmd);
        }
        if !j.setup_commands.is_empty() {
            out.push('\n');
        }

        if let Some(venv) = &j.venv_path {
            let _ = writeln!(out, ". \"{}\"", venv.display());
            out.push('\n');
        }

        out.push_str("input_file=$1\noutput_file=$2\n\n");
        let _ = writeln!(out, "script_path=\"{}\"", self.script_path.display());
        out.push('\n');
        let _ = writeln!(
            out,
            "{} \"$script_path\" -i \"$input_file\" -o \"$output_file\"",
            j.interpreter
        );

        out
    }

    /// Escribe todos los archivos. Con `clean` borra antes los logs y los
    /// restos de la corrida anterior.
    pub fn configure(&self, clean: bool) -> Result<()> {
        for dir in self.layout.log_dirs() {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }

        if clean {
            self.clean_logs()?;
        }

        info!("generando job.sh en {}", self.layout.wrapper_file.display());
        write_file(&self.layout.wrapper_file, &self.render_wrapper())?;
        make_executable(&self.layout.wrapper_file)?;

        info!("generando job.sub en {}", self.layout.submit_file.display());
        write_file(&self.layout.submit_file, &self.render_submit())?;

        write_file(
            &self.layout.config_file,
            &render_dag_config(&self.jobs.dagman),
        )?;

        let dag = self.dag();
        info!(
            "generando dagman con {} jobs en {}",
            dag.nodes.len(),
            self.layout.dag_file.display()
        );
        write_file(&self.layout.dag_file, &dag.render())?;

        Ok(())
    }

    /// Vacía los directorios de logs y borra todo lo que hay junto al .dag
    /// salvo el propio .dag (y los `.nfs*` que deja NFS).
    pub fn clean_logs(&self) -> Result<()> {
        for dir in self.layout.log_dirs() {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
                let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
                remove_path(&path)?;
            }
        }

        let dag_dir = parent_dir(&self.layout.dag_file);
        fs::create_dir_all(&dag_dir).map_err(|e| PipelineError::io(&dag_dir, e))?;

        let dag_name = self.layout.dag_file.file_name();
        for entry in fs::read_dir(&dag_dir).map_err(|e| PipelineError::io(&dag_dir, e))? {
            let entry = entry.map_err(|e| PipelineError::io(&dag_dir, e))?;
            let name = entry.file_name();
            if Some(name.as_os_str()) == dag_name || name.to_string_lossy().starts_with(".nfs") {
                continue;
            }
            debug!("borrando {}", entry.path().display());
            remove_path(&entry.path())?;
        }

        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| PipelineError::io(path, e))
}

fn absolute_layout(layout: &JobLayout) -> Result<JobLayout> {
    Ok(JobLayout {
        dag_file: absolute(&layout.dag_file)?,
        config_file: absolute(&layout.config_file)?,
        submit_file: absolute(&layout.submit_file)?,
        wrapper_file: absolute(&layout.wrapper_file)?,
        log_dir: absolute(&layout.log_dir)?,
        out_dir: absolute(&layout.out_dir)?,
        err_dir: absolute(&layout.err_dir)?,
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
    fs::write(path, content).map_err(|e| PipelineError::io(path, e))
}

fn remove_path(path: &Path) -> Result<()> {
    let res = if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    res.map_err(|e| PipelineError::io(path, e))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| PipelineError::io(path, e))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
