use anyhow::{Context, Result};
use common::{count_physics_frames, EventCount, FrameReader};
use std::{fs, path::Path};
use tracing::info;

/// Cuenta los eventos de física de `input` y deja `{"size": N}` en `output`.
pub fn count<R: FrameReader>(reader: &R, input: &Path, output: &Path) -> Result<EventCount> {
    let size = count_physics_frames(reader, input)
        .with_context(|| format!("no se pudieron contar los frames de {}", input.display()))?;
    let result = EventCount { size };

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("no se pudo crear {}", dir.display()))?;
    }
    fs::write(output, serde_json::to_string(&result)?)
        .with_context(|| format!("no se pudo escribir {}", output.display()))?;

    info!("{}: {} eventos -> {}", input.display(), size, output.display());
    Ok(result)
}
