use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use porter_core::manifest::{parse_record, FileRecord};
use porter_core::Result;

use crate::local_path::LocalPath;

/// Visitor reply for `LocalFileWalker::walk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Drop every following record under the current one.
    SkipSubtree,
}

pub trait ManifestVisitor {
    fn pre_visit_directory(&mut self, path: LocalPath, record: &FileRecord) -> Visit;
    fn visit_file(&mut self, path: LocalPath, record: &FileRecord) -> Visit;
}

/// Builds the `LocalPath` handed to visitors; bound to the scheduler client
/// at run start so the walker itself stays client-agnostic.
pub type LocalPathFactory =
    Arc<dyn Fn(PathBuf, Option<FileRecord>, Option<PathBuf>) -> LocalPath + Send + Sync>;

/// A factory producing detached paths, for contexts without a scheduler.
pub fn detached_factory() -> LocalPathFactory {
    Arc::new(|path, attributes, workdir| {
        LocalPath::new(
            path,
            attributes,
            workdir,
            None,
            porter_core::config::LocalityConfig::default(),
            porter_core::shutdown::ShutdownSignal::never(),
        )
    })
}

/// Streams scanner manifests and surfaces each row as a `LocalPath`.
pub struct LocalFileWalker {
    factory: LocalPathFactory,
}

impl LocalFileWalker {
    pub fn new(factory: LocalPathFactory) -> Self {
        Self { factory }
    }

    /// Stream `manifest` one record at a time into `visitor`.
    ///
    /// A `SkipSubtree` reply arms a prefix filter: strict descendants of the
    /// replied path are dropped without a visitor call.
    pub fn walk(
        &self,
        manifest: &Path,
        visitor: &mut dyn ManifestVisitor,
        workdir: &Path,
    ) -> Result<()> {
        let reader = BufReader::new(File::open(manifest)?);
        let mut lines = reader.lines();
        let Some(header) = lines.next() else {
            return Ok(());
        };
        let _scan_root = header?;

        let mut skip_below: Option<PathBuf> = None;
        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record = parse_record(&line)?;
            if let Some(prefix) = &skip_below {
                if record.virtual_path != *prefix && record.virtual_path.starts_with(prefix) {
                    trace!(
                        "Skipping {} under {}",
                        record.virtual_path.display(),
                        prefix.display()
                    );
                    continue;
                }
                skip_below = None;
            }
            let path = (self.factory)(
                record.virtual_path.clone(),
                Some(record.clone()),
                Some(workdir.to_path_buf()),
            );
            let outcome = if record.is_directory() {
                visitor.pre_visit_directory(path, &record)
            } else {
                visitor.visit_file(path, &record)
            };
            if outcome == Visit::SkipSubtree {
                skip_below = Some(record.virtual_path.clone());
            }
        }
        Ok(())
    }

    /// Look a path up in a manifest written by an earlier task.
    ///
    /// The manifest's header carries the scan root; `wanted` is translated
    /// from the current workdir into that root before matching. An empty
    /// manifest means "not present".
    pub fn lookup(
        &self,
        manifest: &Path,
        wanted: &Path,
        workdir: &Path,
    ) -> Result<Option<LocalPath>> {
        let reader = BufReader::new(File::open(manifest)?);
        let mut lines = reader.lines();
        let Some(header) = lines.next() else {
            return Ok(None);
        };
        let scan_root = PathBuf::from(header?);
        let target = fake_path(wanted, workdir, &scan_root);

        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let record = parse_record(&line)?;
            if record.virtual_path == target {
                return Ok(Some((self.factory)(
                    wanted.to_path_buf(),
                    Some(record),
                    Some(workdir.to_path_buf()),
                )));
            }
        }
        Ok(None)
    }
}

/// Translate a current-workdir path into the path the scanner recorded:
/// plain prefix substitution of `workdir` by `scan_root`.
pub fn fake_path(path: &Path, workdir: &Path, scan_root: &Path) -> PathBuf {
    match path.strip_prefix(workdir) {
        Ok(rest) => scan_root.join(rest),
        Err(_) => path.to_path_buf(),
    }
}
