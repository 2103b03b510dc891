use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use common::{
    monitor, BatchSplitter, CondorScheduler, CountDir, DagmanLog, DbMerger, EventIndex,
    JobGenerator, JobLayout, MergeOrder, PipelineConfig, Scheduler, StatusSource,
};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

/// Binario de envío: CONDOR_SUBMIT_BIN, si no el de la configuración.
fn submit_bin(cfg: &PipelineConfig) -> String {
    env::var("CONDOR_SUBMIT_BIN").unwrap_or_else(|_| cfg.monitor.submit_bin.clone())
}

/// Intervalo entre lecturas del run-log: POLL_INTERVAL_SECS o la configuración.
fn poll_interval(cfg: &PipelineConfig) -> Duration {
    env::var("POLL_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| cfg.monitor.poll_interval())
}

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "CLI del pipeline: batches, DAG, envío, índice de eventos y merge")]
pub struct Cli {
    /// Archivo de configuración (TOML, JSON o YAML)
    #[arg(long, global = true, value_name = "ARCHIVO")]
    config: Option<PathBuf>,

    /// Directorio base para el DAG, el submit file y los logs
    #[arg(long, global = true, value_name = "DIR")]
    job_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reparte los archivos de entrada en directorios de batch (symlinks)
    Split {
        #[arg(value_name = "ORIGEN")]
        source: PathBuf,

        #[arg(long, default_value = ".i3.zst")]
        ext: String,

        /// Archivos por batch (por defecto el de la configuración)
        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, default_value = "temp")]
        scratch: PathBuf,
    },

    /// Genera el DAG, el submit file y el wrapper
    Configure {
        #[arg(long, value_name = "DIR")]
        input_dir: PathBuf,

        #[arg(long, value_name = "DIR")]
        output_dir: PathBuf,

        /// Script que corre cada job
        #[arg(long, value_name = "SCRIPT")]
        script: PathBuf,

        #[arg(long, default_value = ".i3.zst")]
        input_ext: String,

        #[arg(long, default_value = ".json")]
        output_ext: String,

        /// Un job por subdirectorio de batch en lugar de uno por archivo
        #[arg(long)]
        batches: bool,

        /// Borra logs y restos de la corrida anterior
        #[arg(long)]
        clean: bool,
    },

    /// Envía el DAG al scheduler
    Submit {
        /// Sigue el progreso hasta que no quede nada en cola
        #[arg(long)]
        monitor: bool,
    },

    /// Muestra el último estado publicado en el run-log
    Status,

    /// Sigue el progreso de un DAG ya enviado
    Monitor,

    /// Registra el orden de merge de los archivos de un directorio
    RecordOrder {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[arg(long, default_value = ".db")]
        ext: String,

        #[arg(long, default_value = "merge_order.json")]
        out: PathBuf,
    },

    /// Arma el índice de eventos a partir del orden y los conteos
    BuildIndex {
        #[arg(long, default_value = "merge_order.json")]
        order: PathBuf,

        /// Directorio con un <archivo>.json {"size": N} por entrada
        #[arg(long, value_name = "DIR")]
        counts: PathBuf,

        #[arg(long, default_value = "event_index.json")]
        out: PathBuf,
    },

    /// Extrae los pesos de un archivo desde el vector global
    SliceWeights {
        #[arg(long, default_value = "event_index.json")]
        index: PathBuf,

        #[arg(long, default_value = "merge_order.json")]
        order: PathBuf,

        /// JSON con un arreglo de números (uno por evento)
        #[arg(long, value_name = "ARCHIVO")]
        weights: PathBuf,

        #[arg(value_name = "CLAVE")]
        key: String,
    },

    /// Une las bases SQLite en una sola
    Merge {
        /// Orden registrado con record-order
        #[arg(long, conflicts_with = "dir")]
        order: Option<PathBuf>,

        /// Directorio con *.db (orden lexicográfico)
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long, value_name = "DESTINO")]
        target: PathBuf,
    },
}

fn layout(cli: &Cli, cfg: &PipelineConfig) -> JobLayout {
    match &cli.job_dir {
        Some(dir) => JobLayout::under(dir),
        None => cfg.layout.clone(),
    }
}

/// Subdirectorios de `dir` (los batches que deja `split`), ordenados.
fn batch_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("no se pudo leer {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn read_weights(path: &Path) -> Result<Vec<f64>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("no se pudo leer {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} no es un arreglo JSON de números", path.display()))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = PipelineConfig::load(cli.config.as_deref()).context("cargando configuración")?;
    let layout = layout(&cli, &cfg);

    match cli.command {
        Commands::Split {
            source,
            ext,
            batch_size,
            scratch,
        } => {
            let size = batch_size.unwrap_or(cfg.batch_size);
            let dirs = BatchSplitter::new(source, ext, size, scratch)?.stage()?;

            println!("{} batches:", dirs.len());
            for d in dirs {
                println!("  - {}", d.display());
            }
        }

        Commands::Configure {
            input_dir,
            output_dir,
            script,
            input_ext,
            output_ext,
            batches,
            clean,
        } => {
            let generator = if batches {
                JobGenerator::new(
                    batch_dirs(&input_dir)?,
                    &output_dir,
                    &script,
                    input_ext,
                    output_ext,
                    layout,
                    cfg.jobs.clone(),
                )?
            } else {
                JobGenerator::from_dir(
                    &input_dir,
                    &output_dir,
                    &script,
                    &input_ext,
                    &output_ext,
                    layout,
                    cfg.jobs.clone(),
                )?
            };
            generator.configure(clean)?;

            let l = generator.layout();
            println!("DAG generado:");
            println!("  jobs   : {}", generator.job_specs().len());
            println!("  dag    : {}", l.dag_file.display());
            println!("  submit : {}", l.submit_file.display());
            println!("  wrapper: {}", l.wrapper_file.display());
        }

        Commands::Submit { monitor } => {
            let scheduler = CondorScheduler::new(submit_bin(&cfg));
            let cluster = scheduler.submit(&layout.dag_file)?;
            println!("DAG enviado al cluster {}", cluster);

            if monitor {
                follow(&cfg, &layout).await?;
            }
        }

        Commands::Status => {
            let log = DagmanLog::new(layout.dagman_out(), cfg.monitor.lines_after);
            match log.read_status()? {
                Some(s) => {
                    println!("Estado del DAG:");
                    println!(
                        "  done={} pre={} queued={} post={}",
                        s.done, s.pre, s.queued, s.post
                    );
                    println!(
                        "  ready={} unready={} failed={} futile={}",
                        s.ready, s.unready, s.failed, s.futile
                    );
                    println!("  progreso: {}/{}", s.finished(), s.progress_len());
                }
                None => println!("El DAG todavía no publicó su estado"),
            }
        }

        Commands::Monitor => follow(&cfg, &layout).await?,

        Commands::RecordOrder { dir, ext, out } => {
            let order = MergeOrder::from_dir(&dir, &ext)?;
            order.record(&out)?;
            println!(
                "orden {} registrado en {} ({} archivos)",
                order.id,
                out.display(),
                order.paths.len()
            );
        }

        Commands::BuildIndex { order, counts, out } => {
            let order = MergeOrder::load(&order)?;
            let index = EventIndex::build(&order, &CountDir::new(counts))?;
            index.save(&out)?;
            println!(
                "índice con {} archivos y {} eventos en {}",
                index.files.len(),
                index.total_events,
                out.display()
            );
        }

        Commands::SliceWeights {
            index,
            order,
            weights,
            key,
        } => {
            let index = EventIndex::load(&index)?;
            index.ensure_matches(&MergeOrder::load(&order)?)?;
            let weights = read_weights(&weights)?;
            let slice = index.slice(&key, &weights)?;
            println!("{}", serde_json::to_string(slice)?);
        }

        Commands::Merge { order, dir, target } => {
            let merger = DbMerger::new(&cfg.merge);
            let report = match (order, dir) {
                (Some(order), _) => merger.merge_order(&MergeOrder::load(&order)?, &target)?,
                (None, Some(dir)) => merger.merge_dir(&dir, &target)?,
                (None, None) => bail!("hay que indicar --order o --dir"),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn follow(cfg: &PipelineConfig, layout: &JobLayout) -> Result<()> {
    let log = DagmanLog::new(layout.dagman_out(), cfg.monitor.lines_after);
    info!("siguiendo {}", log.path().display());

    let report = monitor::run(&log, poll_interval(cfg), monitor::progress_bar()).await?;
    println!(
        "DAG terminado tras {} lecturas: {} ok, {} fallidos",
        report.polls, report.status.done, report.status.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configure_with_batches_and_global_job_dir() {
        let cli = Cli::try_parse_from([
            "client",
            "configure",
            "--input-dir",
            "temp",
            "--output-dir",
            "backend",
            "--script",
            "convert.py",
            "--output-ext",
            "",
            "--batches",
            "--clean",
            "--job-dir",
            "/scratch/jobs",
        ])
        .unwrap();

        assert_eq!(cli.job_dir, Some(PathBuf::from("/scratch/jobs")));
        match cli.command {
            Commands::Configure {
                batches,
                clean,
                input_ext,
                output_ext,
                ..
            } => {
                assert!(batches && clean);
                assert_eq!(input_ext, ".i3.zst");
                assert_eq!(output_ext, "");
            }
            other => panic!("subcomando inesperado: {other:?}"),
        }
    }

    #[test]
    fn merge_no_acepta_orden_y_directorio_juntos() {
        let res = Cli::try_parse_from([
            "client", "merge", "--order", "o.json", "--dir", "dbs", "--target", "m.db",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn batch_dirs_lists_only_directories_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("batch_0001")).unwrap();
        fs::create_dir(tmp.path().join("batch_0000")).unwrap();
        fs::write(tmp.path().join("notas.txt"), "").unwrap();

        let dirs = batch_dirs(tmp.path()).unwrap();
        assert_eq!(
            dirs,
            vec![tmp.path().join("batch_0000"), tmp.path().join("batch_0001")]
        );
    }

    #[test]
    fn read_weights_rejects_non_numeric_json() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = tmp.path().join("w.json");
        let bad = tmp.path().join("bad.json");
        fs::write(&ok, "[0.5, 1, 2.25]").unwrap();
        fs::write(&bad, r#"{"w": 1}"#).unwrap();

        assert_eq!(read_weights(&ok).unwrap(), vec![0.5, 1.0, 2.25]);
        assert!(read_weights(&bad).is_err());
    }
}
