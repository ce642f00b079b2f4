use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use crate::error::PullError;

/// Packs every regular file under `source_dir` into a gzip-compressed tar
/// at `output`, named by its path relative to `source_dir`.
pub fn build_archive(source_dir: &Path, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }

    let file =
        File::create(output).with_context(|| format!("create archive {}", output.display()))?;
    let mut archive = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let walker = WalkDir::new(source_dir)
        .min_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| anyhow!(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.path().strip_prefix(source_dir)?;
        archive
            .append_path_with_name(entry.path(), name)
            .with_context(|| format!("archive {}", entry.path().display()))?;
    }

    archive.into_inner()?.finish()?;
    Ok(())
}

/// Refuses to overwrite an existing output file.
pub fn ensure_output_available(output: &Path) -> Result<(), PullError> {
    if output.exists() {
        return Err(PullError::OutputExists(output.to_path_buf()));
    }
    Ok(())
}
