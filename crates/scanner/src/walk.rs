use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Local};
use tracing::debug;

use porter_core::manifest::{FileKind, FileRecord};
use porter_core::CoreError;

use crate::emit::{ManifestKind, ManifestWriter};

/// Walks directories physically and emits one manifest row per entry.
///
/// Symbolic links whose resolved target is a directory under the local
/// storage root (but outside the directory being scanned) are descended into;
/// descendant rows keep their virtual path under the link source while the
/// real-path column records the node-local location.
pub struct Scanner {
    local_root: PathBuf,
    scan_root: PathBuf,
}

impl Scanner {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            scan_root: PathBuf::new(),
        }
    }

    /// Scan `dirs` and write the manifest to `manifest_path`.
    pub fn run(
        mut self,
        kind: ManifestKind,
        manifest_path: &Path,
        dirs: &[PathBuf],
    ) -> Result<(), CoreError> {
        if dirs.is_empty() {
            return Err(CoreError::Config("no directory to scan".into()));
        }
        if !self.local_root.is_dir() {
            return Err(CoreError::Config(format!(
                "the local directory '{}' does not exist",
                self.local_root.display()
            )));
        }
        for dir in dirs {
            if !dir.is_dir() {
                return Err(CoreError::Config(format!(
                    "the directory to search '{}' does not exist",
                    dir.display()
                )));
            }
            if !dir.starts_with(&self.local_root) {
                return Err(CoreError::Config(format!(
                    "the directory to search '{}' is not located in the local directory",
                    dir.display()
                )));
            }
        }

        let file = fs::File::create(manifest_path)?;
        let mut writer = ManifestWriter::new(file, kind);
        if kind == ManifestKind::Short {
            writer.write_wall_clock()?;
        }
        writer.write_root(&dirs[0])?;
        for dir in dirs {
            self.scan_root = dir.clone();
            self.walk_root(dir, &mut writer)?;
        }
        writer.finish()?;
        Ok(())
    }

    fn walk_root<W: Write>(
        &self,
        dir: &Path,
        writer: &mut ManifestWriter<W>,
    ) -> Result<(), CoreError> {
        let meta = fs::symlink_metadata(dir)?;
        writer.write_record(&make_record(dir, None, FileKind::Directory, &meta))?;
        self.walk_children(dir, dir, writer)
    }

    /// Emit rows for the children of `real_dir`, presenting them under
    /// `virtual_dir`. The two differ exactly while inside a symlink frame.
    fn walk_children<W: Write>(
        &self,
        real_dir: &Path,
        virtual_dir: &Path,
        writer: &mut ManifestWriter<W>,
    ) -> Result<(), CoreError> {
        let mut entries: Vec<fs::DirEntry> =
            fs::read_dir(real_dir)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let real = entry.path();
            let virt = virtual_dir.join(entry.file_name());
            let meta = fs::symlink_metadata(&real)?;
            let file_type = meta.file_type();

            if file_type.is_symlink() {
                self.visit_symlink(&real, &virt, &meta, writer)?;
            } else if file_type.is_dir() {
                writer.write_record(&make_record(
                    &virt,
                    rewritten(&real, &virt),
                    FileKind::Directory,
                    &meta,
                ))?;
                self.walk_children(&real, &virt, writer)?;
            } else if file_type.is_file() {
                writer.write_record(&make_record(
                    &virt,
                    rewritten(&real, &virt),
                    FileKind::RegularFile,
                    &meta,
                ))?;
            } else {
                debug!("Skipping non-regular entry {}", real.display());
            }
        }
        Ok(())
    }

    fn visit_symlink<W: Write>(
        &self,
        real: &Path,
        virt: &Path,
        link_meta: &fs::Metadata,
        writer: &mut ManifestWriter<W>,
    ) -> Result<(), CoreError> {
        let target = match fs::canonicalize(real) {
            Ok(target) => target,
            Err(_) => {
                // Dangling link: two-column row, nothing to descend into.
                writer.write_record(&missing_record(virt))?;
                return Ok(());
            }
        };
        writer.write_record(&make_record(
            virt,
            Some(target.clone()),
            FileKind::SymbolicLink,
            link_meta,
        ))?;

        // Descend only into local targets that are directories and are not
        // already covered by the scan itself.
        if !target.starts_with(&self.local_root) {
            return Ok(());
        }
        if target.starts_with(&self.scan_root) {
            return Ok(());
        }
        let target_meta = fs::metadata(&target)?;
        if target_meta.is_dir() {
            debug!(
                "Following symlink {} -> {}",
                virt.display(),
                target.display()
            );
            self.walk_children(&target, virt, writer)?;
        }
        Ok(())
    }
}

/// Real-path column for rows inside a symlink frame: the physical location
/// when it differs from the virtual one.
fn rewritten(real: &Path, virt: &Path) -> Option<PathBuf> {
    if real == virt {
        None
    } else {
        Some(real.to_path_buf())
    }
}

fn make_record(
    virt: &Path,
    real_path: Option<PathBuf>,
    kind: FileKind,
    meta: &fs::Metadata,
) -> FileRecord {
    let (creation, access, modification) = file_times(meta);
    FileRecord {
        virtual_path: virt.to_path_buf(),
        exists: true,
        link: real_path.is_some() || kind == FileKind::SymbolicLink,
        real_path,
        size: meta.len(),
        kind: Some(kind),
        creation_time: creation,
        access_time: access,
        modification_time: modification,
    }
}

fn missing_record(virt: &Path) -> FileRecord {
    FileRecord {
        virtual_path: virt.to_path_buf(),
        exists: false,
        real_path: None,
        size: 0,
        kind: None,
        creation_time: None,
        access_time: None,
        modification_time: None,
        link: true,
    }
}

#[cfg(unix)]
fn file_times(
    meta: &fs::Metadata,
) -> (
    Option<DateTime<FixedOffset>>,
    Option<DateTime<FixedOffset>>,
    Option<DateTime<FixedOffset>>,
) {
    use std::os::unix::fs::MetadataExt;
    // Status-change time stands in for the creation time.
    (
        to_local_time(meta.ctime(), meta.ctime_nsec()),
        to_local_time(meta.atime(), meta.atime_nsec()),
        to_local_time(meta.mtime(), meta.mtime_nsec()),
    )
}

#[cfg(not(unix))]
fn file_times(
    _meta: &fs::Metadata,
) -> (
    Option<DateTime<FixedOffset>>,
    Option<DateTime<FixedOffset>>,
    Option<DateTime<FixedOffset>>,
) {
    (None, None, None)
}

fn to_local_time(secs: i64, nanos: i64) -> Option<DateTime<FixedOffset>> {
    DateTime::from_timestamp(secs, nanos as u32).map(|t| t.with_timezone(&Local).fixed_offset())
}
