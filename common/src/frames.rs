use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};

/// Tipo de frame (el "stop" del stream del detector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stop {
    Physics,
    #[serde(rename = "DAQ")]
    Daq,
    Geometry,
    Calibration,
    DetectorStatus,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub stop: Stop,
}

/// Backend de lectura de frames: abre un archivo y lo recorre en orden.
pub trait FrameReader {
    type Stream: Iterator<Item = Result<Frame>>;

    fn open(&self, path: &Path) -> Result<Self::Stream>;
}

/// Dumps JSON-lines: un objeto por línea con al menos el campo `stop`.
/// Las líneas vacías se ignoran.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesFrames;

pub struct JsonLinesStream {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
}

impl Iterator for JsonLinesStream {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(PipelineError::io(&self.path, e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(PipelineError::from));
        }
    }
}

impl FrameReader for JsonLinesFrames {
    type Stream = JsonLinesStream;

    fn open(&self, path: &Path) -> Result<Self::Stream> {
        let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        Ok(JsonLinesStream {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
        })
    }
}

pub fn count_physics_frames<R: FrameReader>(reader: &R, path: &Path) -> Result<u64> {
    let mut count = 0;
    for frame in reader.open(path)? {
        if frame?.stop == Stop::Physics {
            count += 1;
        }
    }
    Ok(count)
}

/// Salida del conteo por archivo: `{"size": N}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCount {
    pub size: u64,
}
