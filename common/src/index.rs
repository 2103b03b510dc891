use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    ops::Range,
    path::{Path, PathBuf},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::frames::EventCount;
use crate::input::{file_key, list_inputs};

/// Orden en que se concatenan los archivos. Se registra una sola vez y
/// después lo usan tanto el índice como el merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOrder {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    /// Extensión que se saca del nombre para armar la clave de cada archivo
    pub extension: String,
    pub paths: Vec<PathBuf>,
}

impl MergeOrder {
    pub fn new(paths: Vec<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            extension: extension.into(),
            paths,
        }
    }

    /// Orden lexicográfico de los `*ext` del directorio.
    pub fn from_dir(dir: impl AsRef<Path>, extension: &str) -> Result<Self> {
        let paths = list_inputs(dir, extension)?
            .into_iter()
            .map(|f| f.path().to_path_buf())
            .collect();
        Ok(Self::new(paths, extension))
    }

    pub fn keys(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(|p| file_key(p, &self.extension))
            .collect()
    }

    /// Guarda el orden en `path`. Si ya existe un registro, falla: un orden
    /// registrado no se pisa.
    pub fn record(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(PipelineError::MergeOrderExists(path.to_path_buf()));
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };

        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())
            .map_err(|e| PipelineError::io(path, e))?;

        info!(
            "orden de merge {} registrado en {} ({} archivos)",
            self.id,
            path.display(),
            self.paths.len()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// De dónde salen los conteos de eventos por archivo.
pub trait EventCounts {
    /// `Ok(None)` si no hay conteo para esa clave.
    fn count(&self, key: &str) -> Result<Option<u64>>;
}

impl EventCounts for HashMap<String, u64> {
    fn count(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.get(key).copied())
    }
}

/// Directorio con un `<clave>.json` por archivo, como lo deja `worker count`.
#[derive(Debug, Clone)]
pub struct CountDir {
    dir: PathBuf,
}

impl CountDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl EventCounts for CountDir {
    fn count(&self, key: &str) -> Result<Option<u64>> {
        let path = self.dir.join(format!("{key}.json"));
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        let count: EventCount = serde_json::from_str(&text)?;
        Ok(Some(count.size))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIndexEntry {
    pub size: u64,
    pub index_start: u64,
}

impl EventIndexEntry {
    /// `None` si el final no entra en un u64.
    pub fn range(&self) -> Option<Range<u64>> {
        let end = self.index_start.checked_add(self.size)?;
        Some(self.index_start..end)
    }
}

/// Posición de cada archivo dentro del vector global de eventos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventIndex {
    pub merge_order_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub total_events: u64,
    #[serde(serialize_with = "sorted_map")]
    pub files: HashMap<String, EventIndexEntry>,
}

fn sorted_map<S>(
    map: &HashMap<String, EventIndexEntry>,
    ser: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    map.iter().collect::<BTreeMap<_, _>>().serialize(ser)
}

impl EventIndex {
    /// Recorre el orden una vez acumulando el total: cada archivo empieza
    /// donde termina el anterior.
    pub fn build<C>(order: &MergeOrder, counts: &C) -> Result<Self>
    where
        C: EventCounts + ?Sized,
    {
        let mut files = HashMap::with_capacity(order.paths.len());
        let mut total = 0u64;

        for key in order.keys() {
            let size = counts
                .count(&key)?
                .ok_or_else(|| PipelineError::MissingCount { key: key.clone() })?;

            if files.contains_key(&key) {
                return Err(PipelineError::DuplicateKey { key });
            }

            debug!("{}: {} eventos desde {}", key, size, total);
            files.insert(
                key,
                EventIndexEntry {
                    size,
                    index_start: total,
                },
            );
            total += size;
        }

        info!(
            "índice de eventos: {} archivos, {} eventos (orden {})",
            files.len(),
            total,
            order.id
        );

        Ok(Self {
            merge_order_id: order.id,
            built_at: Utc::now(),
            total_events: total,
            files,
        })
    }

    pub fn get(&self, key: &str) -> Option<&EventIndexEntry> {
        self.files.get(key)
    }

    /// Parte de `weights` que corresponde a `key`.
    pub fn slice<'a, T>(&self, key: &str, weights: &'a [T]) -> Result<&'a [T]> {
        if weights.len() as u64 != self.total_events {
            return Err(PipelineError::LengthMismatch {
                expected: self.total_events,
                actual: weights.len(),
            });
        }
        let entry = self
            .get(key)
            .ok_or_else(|| PipelineError::UnknownFile(key.to_string()))?;

        let out_of_range = || {
            PipelineError::InvalidIndex(format!(
                "{} apunta a {}+{} con {} eventos",
                key, entry.index_start, entry.size, self.total_events
            ))
        };
        let Range { start, end } = entry.range().ok_or_else(out_of_range)?;
        let start = usize::try_from(start).map_err(|_| out_of_range())?;
        let end = usize::try_from(end).map_err(|_| out_of_range())?;
        weights.get(start..end).ok_or_else(out_of_range)
    }

    /// Comprueba que los rangos de los archivos cubran `[0, total_events)`
    /// sin huecos ni solapamientos.
    pub fn validate(&self) -> Result<()> {
        let mut entries: Vec<(&String, &EventIndexEntry)> = self.files.iter().collect();
        entries.sort_by_key(|(key, e)| (e.index_start, e.size, *key));

        let mut next = 0u64;
        for (key, entry) in entries {
            if entry.index_start != next {
                return Err(PipelineError::InvalidIndex(format!(
                    "{} empieza en {} pero el anterior termina en {}",
                    key, entry.index_start, next
                )));
            }
            next = entry
                .range()
                .ok_or_else(|| PipelineError::InvalidIndex(format!("{key}: rango desbordado")))?
                .end;
        }

        if next != self.total_events {
            return Err(PipelineError::InvalidIndex(format!(
                "los archivos suman {} eventos pero total_events es {}",
                next, self.total_events
            )));
        }
        Ok(())
    }

    /// Falla si el índice se armó con otro orden de merge.
    pub fn ensure_matches(&self, order: &MergeOrder) -> Result<()> {
        if self.merge_order_id != order.id {
            return Err(PipelineError::StaleIndex {
                index_order: self.merge_order_id,
                current_order: order.id,
            });
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| PipelineError::io(path, e))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let index: Self = serde_json::from_str(&text)?;
        index.validate()?;
        Ok(index)
    }
}
