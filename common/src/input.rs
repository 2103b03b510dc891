use glob::{glob, Pattern};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Archivo de entrada del pipeline (identidad = ruta absoluta).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputFile {
    path: PathBuf,
}

impl InputFile {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = std::path::absolute(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        file_name_lossy(&self.path)
    }

    /// Nombre sin la extensión dada (ej: ".i3.zst"), que puede tener varios puntos.
    pub fn stem(&self, ext: &str) -> String {
        strip_extension(&self.file_name(), ext)
    }

    /// Número al final del nombre (sin extensión), usado como semilla del
    /// offset en el merge. Ej: "NuMu.021002.009999.db" -> 9999
    pub fn identifier(&self, ext: &str) -> Option<u64> {
        trailing_number(&self.stem(ext))
    }
}

/// Lista los archivos de `dir` que terminan en `ext`, ordenados por ruta.
/// Un directorio inexistente devuelve una lista vacía.
pub fn list_inputs(dir: impl AsRef<Path>, ext: &str) -> Result<Vec<InputFile>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*{}",
        Pattern::escape(&dir.to_string_lossy()),
        Pattern::escape(ext)
    );

    let mut files = Vec::new();
    for entry in glob(&pattern)? {
        match entry {
            Ok(path) if path.is_file() => files.push(InputFile::new(path)?),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("no se pudo leer {}: {}", e.path().display(), e.error());
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Reemplaza el sufijo `from` por `to`. Si el nombre no termina en `from`,
/// sólo se agrega `to`.
pub fn replace_extension(file_name: &str, from: &str, to: &str) -> String {
    format!("{}{}", strip_extension(file_name, from), to)
}

/// Clave de un archivo en el índice de eventos: nombre sin extensión.
pub fn file_key(path: &Path, ext: &str) -> String {
    strip_extension(&file_name_lossy(path), ext)
}

fn strip_extension(file_name: &str, ext: &str) -> String {
    if ext.is_empty() {
        return file_name.to_string();
    }
    file_name
        .strip_suffix(ext)
        .unwrap_or(file_name)
        .to_string()
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn trailing_number(s: &str) -> Option<u64> {
    let digits: String = s
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
