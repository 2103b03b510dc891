use rusqlite::{
    params_from_iter, types::Value, Connection, OpenFlags, OptionalExtension, Transaction,
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::{PipelineError, Result};
use crate::index::MergeOrder;
use crate::input::{list_inputs, InputFile};

pub const DB_EXTENSION: &str = ".db";

/// Fuente que no pudo usar su offset y recibió un bloque contiguo nuevo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fallback {
    pub source: PathBuf,
    pub first_id: i64,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub merged: Vec<PathBuf>,
    /// Fuentes sin identificadores, o el propio destino si aparece como fuente
    pub skipped: Vec<PathBuf>,
    pub fallbacks: Vec<Fallback>,
    pub rows: BTreeMap<String, u64>,
}

/// Cómo se traducen los ids de una fuente al destino.
#[derive(Debug, Clone)]
enum Remap {
    Offset(i64),
    Block(HashMap<i64, i64>),
}

impl Remap {
    fn apply(&self, id: i64, table: &str, source: &Path) -> Result<i64> {
        let mapped = match self {
            Remap::Offset(offset) => id.checked_add(*offset),
            Remap::Block(map) => map.get(&id).copied(),
        };
        mapped.ok_or_else(|| PipelineError::UnmappedIdentifier {
            id,
            table: table.to_string(),
            source_db: source.to_path_buf(),
        })
    }
}

/// Columna tal como la reporta `PRAGMA table_info`.
#[derive(Debug, Clone)]
struct Column {
    name: String,
    decl_type: String,
}

/// Une varias bases SQLite en una sola, evitando que los ids de evento
/// de archivos distintos choquen.
#[derive(Debug, Clone)]
pub struct DbMerger {
    id_table: String,
    id_column: String,
    batch_size: usize,
    offset_scale: i64,
}

impl DbMerger {
    pub fn new(cfg: &MergeConfig) -> Self {
        Self {
            id_table: cfg.id_table.clone(),
            id_column: cfg.id_column.clone(),
            batch_size: cfg.batch_size.max(1),
            offset_scale: cfg.offset_scale,
        }
    }

    /// Usa el orden registrado (y su extensión para sacar el identificador).
    pub fn merge_order(&self, order: &MergeOrder, target: &Path) -> Result<MergeReport> {
        self.merge(&order.paths, &order.extension, target)
    }

    /// Todos los `*.db` del directorio, en orden lexicográfico.
    pub fn merge_dir(&self, dir: &Path, target: &Path) -> Result<MergeReport> {
        let sources: Vec<PathBuf> = list_inputs(dir, DB_EXTENSION)?
            .into_iter()
            .map(|f| f.path().to_path_buf())
            .collect();
        self.merge(&sources, DB_EXTENSION, target)
    }

    /// Copia las fuentes en orden dentro de una sola transacción.
    /// Las fuentes se abren de sólo lectura; el destino nunca se lee como fuente.
    pub fn merge(
        &self,
        sources: &[PathBuf],
        extension: &str,
        target: &Path,
    ) -> Result<MergeReport> {
        if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        let mut conn = Connection::open(target)?;
        let target_path = fs::canonicalize(target).map_err(|e| PipelineError::io(target, e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch("PRAGMA cache_size = -64000; PRAGMA temp_store = MEMORY;")?;

        // ids que ya están en el destino (si es una base existente)
        let mut seen = self.existing_ids(&conn)?;
        let mut max_id = seen.iter().copied().max();
        if !seen.is_empty() {
            info!(
                "el destino {} ya tiene {} ids (máx {:?})",
                target.display(),
                seen.len(),
                max_id
            );
        }

        let mut report = MergeReport::default();
        let tx = conn.transaction()?;

        for source in sources {
            if fs::canonicalize(source).is_ok_and(|p| p == target_path) {
                warn!("{} es el destino del merge, no se copia", source.display());
                report.skipped.push(source.clone());
                continue;
            }

            let src = Connection::open_with_flags(
                source,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;

            let ids = self.source_ids(&src)?;
            if ids.is_empty() {
                info!("{} no tiene ids de evento, se salta", source.display());
                report.skipped.push(source.clone());
                continue;
            }

            let identifier = InputFile::new(source)?.identifier(extension);
            let remap = match self.offset_for(identifier, &ids, &seen) {
                Some(offset) => {
                    debug!("{}: offset {}", source.display(), offset);
                    Remap::Offset(offset)
                }
                None => {
                    let first_id = max_id.map_or(0, |m| m + 1);
                    // depende del orden de las fuentes: otro orden da otros ids
                    warn!(
                        "{}: los ids con offset chocan con los ya copiados, \
                         se renumera desde {} ({} ids)",
                        source.display(),
                        first_id,
                        ids.len()
                    );
                    report.fallbacks.push(Fallback {
                        source: source.clone(),
                        first_id,
                        count: ids.len(),
                    });
                    Remap::Block(
                        ids.iter()
                            .enumerate()
                            .map(|(k, id)| (*id, first_id + k as i64))
                            .collect(),
                    )
                }
            };

            for id in &ids {
                let new_id = remap.apply(*id, &self.id_table, source)?;
                seen.insert(new_id);
                max_id = Some(max_id.map_or(new_id, |m| m.max(new_id)));
            }

            for table in table_names(&src)? {
                let copied = self.copy_table(&src, &tx, &table, &remap, source)?;
                *report.rows.entry(table).or_default() += copied;
            }

            info!("{} copiada ({} eventos)", source.display(), ids.len());
            report.merged.push(source.clone());
        }

        tx.commit()?;

        info!(
            "merge en {}: {} fuentes, {} salteadas, {} renumeradas",
            target.display(),
            report.merged.len(),
            report.skipped.len(),
            report.fallbacks.len()
        );
        Ok(report)
    }

    /// Offset `identificador × escala` si no choca con nada ya copiado.
    fn offset_for(
        &self,
        identifier: Option<u64>,
        ids: &[i64],
        seen: &HashSet<i64>,
    ) -> Option<i64> {
        let offset = i64::try_from(identifier?)
            .ok()?
            .checked_mul(self.offset_scale)?;

        for id in ids {
            let new_id = id.checked_add(offset)?;
            if seen.contains(&new_id) {
                return None;
            }
        }
        Some(offset)
    }

    fn existing_ids(&self, conn: &Connection) -> Result<HashSet<i64>> {
        if !table_exists(conn, &self.id_table)? {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT {col} FROM {table} WHERE {col} IS NOT NULL",
            col = quote(&self.id_column),
            table = quote(&self.id_table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Ids distintos de la tabla de ids, ordenados.
    fn source_ids(&self, src: &Connection) -> Result<Vec<i64>> {
        if !table_exists(src, &self.id_table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = quote(&self.id_column),
            table = quote(&self.id_table)
        );
        let mut stmt = src.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn copy_table(
        &self,
        src: &Connection,
        tx: &Transaction<'_>,
        table: &str,
        remap: &Remap,
        source: &Path,
    ) -> Result<u64> {
        let columns = table_info(src, table)?;
        if columns.is_empty() {
            return Ok(0);
        }

        if !table_exists(tx, table)? {
            let defs: Vec<String> = columns
                .iter()
                .map(|c| format!("{} {}", quote(&c.name), c.decl_type).trim_end().to_string())
                .collect();
            tx.execute(
                &format!("CREATE TABLE {} ({})", quote(table), defs.join(", ")),
                [],
            )?;
            debug!("tabla {} creada en el destino", table);
        }

        let id_positions: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name.eq_ignore_ascii_case(&self.id_column))
            .map(|(i, _)| i)
            .collect();

        let names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        let select = format!("SELECT {} FROM {}", names.join(", "), quote(table));
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        );

        let mut stmt = src.prepare(&select)?;
        let mut rows = stmt.query([])?;
        let mut batch: Vec<Vec<Value>> = Vec::with_capacity(self.batch_size);
        let mut copied = 0u64;

        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(row.get::<_, Value>(i)?);
            }
            for &pos in &id_positions {
                if let Value::Integer(id) = values[pos] {
                    values[pos] = Value::Integer(remap.apply(id, table, source)?);
                }
            }
            batch.push(values);

            if batch.len() >= self.batch_size {
                copied += insert_batch(tx, &insert, &mut batch)?;
            }
        }
        copied += insert_batch(tx, &insert, &mut batch)?;

        debug!("{}: {} filas de {}", source.display(), copied, table);
        Ok(copied)
    }
}

fn insert_batch(tx: &Transaction<'_>, sql: &str, batch: &mut Vec<Vec<Value>>) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    let mut stmt = tx.prepare_cached(sql)?;
    let mut n = 0u64;
    for values in batch.drain(..) {
        stmt.execute(params_from_iter(values))?;
        n += 1;
    }
    Ok(n)
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn table_info(conn: &Connection, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(Column {
                name: row.get(1)?,
                decl_type: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}
