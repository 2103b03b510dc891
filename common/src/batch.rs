use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::input::{list_inputs, InputFile};

/// Grupo de archivos que se procesa como un solo job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub files: Vec<InputFile>,
}

impl Batch {
    pub fn dir_name(&self) -> String {
        format!("batch_{:04}", self.index)
    }
}

/// Parte la lista (ya ordenada) en bloques consecutivos de a lo sumo `batch_size`.
pub fn partition(files: &[InputFile], batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "el tamaño de batch debe ser mayor a 0".into(),
        ));
    }

    Ok(files
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            files: chunk.to_vec(),
        })
        .collect())
}

/// Staging de batches: cada batch queda en su propio directorio con
/// symlinks a los archivos originales.
#[derive(Debug, Clone)]
pub struct BatchSplitter {
    source_dir: PathBuf,
    extension: String,
    batch_size: usize,
    scratch_dir: PathBuf,
}

impl BatchSplitter {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        batch_size: usize,
        scratch_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "el tamaño de batch debe ser mayor a 0".into(),
            ));
        }
        Ok(Self {
            source_dir: source_dir.into(),
            extension: extension.into(),
            batch_size,
            scratch_dir: scratch_dir.into(),
        })
    }

    /// Limpia el área de scratch y deja un directorio por batch.
    /// Devuelve las rutas de los directorios, en orden.
    pub fn stage(&self) -> Result<Vec<PathBuf>> {
        let files = list_inputs(&self.source_dir, &self.extension)?;
        let batches = partition(&files, self.batch_size)?;

        reset_dir(&self.scratch_dir)?;

        if batches.is_empty() {
            info!(
                "no hay archivos *{} en {}, 0 batches",
                self.extension,
                self.source_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut staged = Vec::with_capacity(batches.len());
        for batch in &batches {
            let dir = self.scratch_dir.join(batch.dir_name());
            fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;

            let mut linked = 0usize;
            for file in &batch.files {
                let link = dir.join(file.file_name());
                // un link roto sólo afecta a ese archivo
                match symlink(file.path(), &link) {
                    Ok(()) => linked += 1,
                    Err(e) => warn!(
                        "no se pudo enlazar {} en {}: {}",
                        file.path().display(),
                        dir.display(),
                        e
                    ),
                }
            }

            debug!(
                "batch {} listo en {} ({}/{} archivos)",
                batch.index,
                dir.display(),
                linked,
                batch.files.len()
            );
            staged.push(dir);
        }

        info!(
            "{} archivos repartidos en {} batches (tamaño máx {}) bajo {}",
            files.len(),
            staged.len(),
            self.batch_size,
            self.scratch_dir.display()
        );

        Ok(staged)
    }
}

/// Borra y recrea un directorio de trabajo.
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn fake_inputs(n: usize) -> Vec<InputFile> {
        (0..n)
            .map(|i| InputFile::new(format!("/data/in/file.{i:06}.i3.zst")).unwrap())
            .collect()
    }

    fn write_inputs(dir: &Path, n: usize) {
        for i in 0..n {
            fs::write(dir.join(format!("NuMu.{i:06}.i3.zst")), b"x").unwrap();
        }
    }

    proptest! {
        #[test]
        fn partition_covers_every_file_once(n in 0usize..500, size in 1usize..150) {
            let files = fake_inputs(n);
            let batches = partition(&files, size).unwrap();

            prop_assert_eq!(batches.len(), n.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.files.is_empty() && b.files.len() <= size));

            let flat: Vec<InputFile> = batches.into_iter().flat_map(|b| b.files).collect();
            prop_assert_eq!(flat, files);
        }
    }

    #[test]
    fn partition_con_tamano_cero_falla() {
        assert!(partition(&fake_inputs(3), 0).is_err());
        assert!(BatchSplitter::new("/x", ".db", 0, "/tmp/y").is_err());
    }

    #[test]
    fn stage_symlinks_every_file_into_ceil_n_over_b_dirs() {
        let src = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        write_inputs(src.path(), 23);
        fs::write(src.path().join("ignorar.txt"), b"").unwrap();

        let splitter =
            BatchSplitter::new(src.path(), ".i3.zst", 10, scratch.path().join("temp")).unwrap();
        let dirs = splitter.stage().unwrap();
        assert_eq!(dirs.len(), 3);

        let mut seen = BTreeSet::new();
        let mut total = 0;
        for dir in &dirs {
            let mut count = 0;
            for entry in fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let meta = fs::symlink_metadata(entry.path()).unwrap();
                assert!(meta.file_type().is_symlink());
                seen.insert(entry.file_name().to_string_lossy().to_string());
                count += 1;
            }
            assert!(count <= 10);
            total += count;
        }

        assert_eq!(total, 23);
        assert_eq!(seen.len(), 23);
        assert!(seen.contains("NuMu.000000.i3.zst"));
    }

    #[test]
    fn stage_clears_stale_batches_from_previous_run() {
        let src = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let temp = scratch.path().join("temp");

        write_inputs(src.path(), 5);
        BatchSplitter::new(src.path(), ".i3.zst", 1, &temp)
            .unwrap()
            .stage()
            .unwrap();
        assert_eq!(fs::read_dir(&temp).unwrap().count(), 5);

        let dirs = BatchSplitter::new(src.path(), ".i3.zst", 100, &temp)
            .unwrap()
            .stage()
            .unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(fs::read_dir(&temp).unwrap().count(), 1);
    }

    #[test]
    fn stage_on_missing_source_yields_zero_batches() {
        let scratch = tempfile::tempdir().unwrap();
        let splitter = BatchSplitter::new(
            scratch.path().join("no_existe"),
            ".i3.zst",
            100,
            scratch.path().join("temp"),
        )
        .unwrap();

        assert!(splitter.stage().unwrap().is_empty());
    }
}
