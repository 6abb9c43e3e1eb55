use std::{fs, io::{self, Cursor, Write}, path::{Path, PathBuf}};

use anyhow::{Context, Result, bail};
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::ZipArchive;

/// Make sure `path` is a directory, creating it (and its parents) when absent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => bail!("{} exists and is not a directory", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path)
            .with_context(|| format!("create directory {}", path.display())),
        Err(e) => Err(e).with_context(|| format!("inspect {}", path.display())),
    }
}

/// Write `bytes` to `target` through a temp file in the same directory and an atomic rename.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    ensure_dir(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write {}", target.display()))?;
    tmp.as_file().sync_all().ok();
    tmp.persist(target)
        .with_context(|| format!("rename to {}", target.display()))?;
    Ok(())
}

/// Unpack a downloaded zip archive held in memory below `dest`; returns the entry count.
///
/// Entry paths are sanitized by the zip reader, so nothing lands outside `dest`.
pub fn unpack_archive(bytes: &[u8], dest: &Path) -> Result<usize> {
    ensure_dir(dest)?;
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("payload is not a zip archive")?;
    let entries = archive.len();
    archive.extract(dest)
        .with_context(|| format!("unpack {entries} entries into {}", dest.display()))?;
    Ok(entries)
}

/// Locate `<layer>.shp` anywhere below `dir` (archives differ in whether they nest a folder).
pub fn find_layer(dir: &Path, layer: &str) -> Result<PathBuf> {
    let wanted = format!("{layer}.shp");
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file()
            && entry.file_name().to_str().is_some_and(|name| name.eq_ignore_ascii_case(&wanted)))
        .map(|entry| entry.into_path())
        .with_context(|| format!("layer {wanted} not found under {}", dir.display()))
}
