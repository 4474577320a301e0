use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use porter_core::config::LocalityConfig;
use porter_core::manifest::FileRecord;
use porter_core::shutdown::ShutdownSignal;
use porter_core::types::{FileLocation, FileLocationUpdate, SymlinkSpec};
use porter_core::{CoreError, Result};

use crate::ftp;

/// The scheduler-side operations a `LocalPath` needs: where a file lives,
/// reporting materialisations, and resolving a node's daemon address.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn file_location(&self, path: &Path) -> Result<FileLocation>;
    async fn report_location(&self, update: FileLocationUpdate, overwrite: bool) -> Result<()>;
    async fn daemon_on_node(&self, node: &str) -> Result<String>;
    /// Drop any cached daemon address for the node (used between FTP retries).
    fn invalidate_daemon(&self, node: &str);
}

/// A file path whose reads resolve to either a local open or an FTP fetch
/// from the node that owns the file.
///
/// Reads never change where the file lives. The closed set of mutating
/// operations (`write_bytes`, `append_bytes`, `set_modified`,
/// `open_writable`) first promotes the file to this node via `download`, and
/// reports the resulting location change back to the scheduler.
#[derive(Clone)]
pub struct LocalPath {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    attributes: Option<FileRecord>,
    workdir: Option<PathBuf>,
    client: Option<Weak<dyn LocationSource>>,
    locality: LocalityConfig,
    shutdown: ShutdownSignal,
    state: Mutex<PathState>,
}

#[derive(Default)]
struct PathState {
    /// Monotonic: flips to true once the file has been copied to this node.
    downloaded: bool,
    /// Monotonic: flips to true after the first materialisation pass.
    symlinks_materialised: bool,
}

enum ReadSource {
    Local,
    Remote(FileLocation),
}

impl LocalPath {
    pub fn new(
        path: PathBuf,
        attributes: Option<FileRecord>,
        workdir: Option<PathBuf>,
        client: Option<Weak<dyn LocationSource>>,
        locality: LocalityConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                attributes,
                workdir,
                client,
                locality,
                shutdown,
                state: Mutex::default(),
            }),
        }
    }

    /// Promote a plain path to a location-aware one.
    pub fn promote(path: impl Into<PathBuf>, client: &Arc<dyn LocationSource>, locality: LocalityConfig, shutdown: ShutdownSignal) -> Self {
        Self::new(
            path.into(),
            None,
            None,
            Some(Arc::downgrade(client)),
            locality,
            shutdown,
        )
    }

    /// A path with no scheduler attached; all operations act locally.
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        Self::new(
            path.into(),
            None,
            None,
            None,
            LocalityConfig::default(),
            ShutdownSignal::never(),
        )
    }

    pub fn underlying_path(&self) -> &Path {
        &self.inner.path
    }

    pub fn attributes(&self) -> Option<&FileRecord> {
        self.inner.attributes.as_ref()
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.inner.workdir.as_deref()
    }

    fn client(&self) -> Option<Arc<dyn LocationSource>> {
        self.inner.client.as_ref().and_then(Weak::upgrade)
    }

    /// New instance wrapping a transformed path, inheriting client, workdir
    /// and configuration.
    fn derive(&self, path: PathBuf) -> LocalPath {
        Self::new(
            path,
            None,
            self.inner.workdir.clone(),
            self.inner.client.clone(),
            self.inner.locality.clone(),
            self.inner.shutdown.clone(),
        )
    }

    fn absolute_underlying(&self) -> PathBuf {
        std::path::absolute(&self.inner.path).unwrap_or_else(|_| self.inner.path.clone())
    }

    // --- Attribute queries ---

    pub fn is_directory(&self) -> bool {
        match &self.inner.attributes {
            Some(record) => record.is_directory(),
            None => self.inner.path.is_dir(),
        }
    }

    pub fn exists(&self) -> bool {
        match &self.inner.attributes {
            Some(record) => record.exists,
            None => self.inner.path.exists(),
        }
    }

    pub fn size(&self) -> Result<u64> {
        match &self.inner.attributes {
            Some(record) => Ok(record.size),
            None => Ok(std::fs::metadata(&self.inner.path)?.len()),
        }
    }

    // --- Navigation; none of these touch the scheduler ---

    pub fn parent(&self) -> Option<LocalPath> {
        self.inner
            .path
            .parent()
            .map(|p| self.derive(p.to_path_buf()))
    }

    /// True path resolution: relative `other` is joined, absolute `other`
    /// replaces the path wholesale.
    pub fn resolve(&self, other: impl AsRef<Path>) -> LocalPath {
        self.derive(self.inner.path.join(other))
    }

    /// Lexical normalisation: drops `.` components and folds `..` into the
    /// preceding component.
    pub fn normalize(&self) -> LocalPath {
        self.derive(normalize_path(&self.inner.path))
    }

    /// The components in `[begin, end)`, as a relative path.
    pub fn subpath(&self, begin: usize, end: usize) -> Option<LocalPath> {
        let names: Vec<&OsStr> = self
            .inner
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .collect();
        if begin >= end || end > names.len() {
            return None;
        }
        let mut sub = PathBuf::new();
        for name in &names[begin..end] {
            sub.push(name);
        }
        Some(self.derive(sub))
    }

    pub fn to_absolute(&self) -> Result<LocalPath> {
        Ok(self.derive(std::path::absolute(&self.inner.path)?))
    }

    pub fn get_root(&self) -> Option<PathBuf> {
        match self.inner.path.components().next() {
            Some(Component::RootDir) => Some(PathBuf::from("/")),
            _ => None,
        }
    }

    pub fn file_name(&self) -> Option<&OsStr> {
        self.inner.path.file_name()
    }

    /// The `index`-th name component.
    pub fn name(&self, index: usize) -> Option<&OsStr> {
        self.inner
            .path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name),
                _ => None,
            })
            .nth(index)
    }

    /// The symlink destination recorded by the scanner when available, the
    /// filesystem's answer otherwise.
    pub fn to_real_path(&self) -> Result<PathBuf> {
        if let Some(record) = &self.inner.attributes {
            if let Some(real) = &record.real_path {
                return Ok(real.clone());
            }
        }
        Ok(std::fs::canonicalize(&self.inner.path)?)
    }

    // --- Reads ---

    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        match self.read_source().await? {
            ReadSource::Local => Ok(tokio::fs::read(&self.inner.path).await?),
            ReadSource::Remote(location) => self.fetch_remote(&location).await,
        }
    }

    pub async fn read_to_string(&self) -> Result<String> {
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    pub async fn reader(&self) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self.read_source().await? {
            ReadSource::Local => Ok(Box::new(tokio::fs::File::open(&self.inner.path).await?)),
            ReadSource::Remote(location) => {
                let bytes = self.fetch_remote(&location).await?;
                Ok(Box::new(io::Cursor::new(bytes)))
            }
        }
    }

    pub async fn lines(&self) -> Result<Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>> {
        Ok(BufReader::new(self.reader().await?).lines())
    }

    /// Iterate over the file's bytes.
    pub async fn bytes(&self) -> Result<std::vec::IntoIter<u8>> {
        Ok(self.read_bytes().await?.into_iter())
    }

    /// Run a closure over a blocking reader of the file's content.
    pub async fn with_reader<T>(
        &self,
        f: impl FnOnce(&mut dyn io::Read) -> io::Result<T>,
    ) -> Result<T> {
        let bytes = self.read_bytes().await?;
        let mut cursor = io::Cursor::new(bytes);
        Ok(f(&mut cursor)?)
    }

    // --- Mutations; each promotes the file to this node first ---

    pub async fn write_bytes(&self, data: &[u8]) -> Result<()> {
        let ctx = self.prepare_mutation().await?;
        if let Some(parent) = self.inner.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.inner.path, data).await?;
        self.finish_mutation(ctx).await
    }

    pub async fn append_bytes(&self, data: &[u8]) -> Result<()> {
        let ctx = self.prepare_mutation().await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.inner.path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        self.finish_mutation(ctx).await
    }

    pub async fn set_modified(&self, time: SystemTime) -> Result<()> {
        let ctx = self.prepare_mutation().await?;
        let path = self.inner.path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.set_modified(time)
        })
        .await
        .map_err(|e| CoreError::Io(io::Error::other(e)))??;
        self.finish_mutation(ctx).await
    }

    /// Open the underlying file for writing. The location report happens at
    /// open time; content written through the handle is visible locally.
    pub async fn open_writable(&self) -> Result<tokio::fs::File> {
        let ctx = self.prepare_mutation().await?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.inner.path)
            .await?;
        self.finish_mutation(ctx).await?;
        Ok(file)
    }

    // --- Resolution internals ---

    async fn location(&self) -> Result<Option<FileLocation>> {
        let Some(client) = self.client() else {
            return Ok(None);
        };
        let location = client.file_location(&self.absolute_underlying()).await?;
        self.materialise_symlinks(&location).await;
        Ok(Some(location))
    }

    async fn read_source(&self) -> Result<ReadSource> {
        let Some(location) = self.location().await? else {
            return Ok(ReadSource::Local);
        };
        if location.same_as_engine {
            return Ok(ReadSource::Local);
        }
        let state = self.inner.state.lock().await;
        if state.downloaded {
            Ok(ReadSource::Local)
        } else {
            Ok(ReadSource::Remote(location))
        }
    }

    async fn fetch_remote(&self, location: &FileLocation) -> Result<Vec<u8>> {
        let client = self
            .client()
            .ok_or_else(|| CoreError::Config("scheduler client is gone".into()))?;
        ftp::fetch_bytes(
            client.as_ref(),
            location,
            &self.inner.locality,
            &self.inner.shutdown,
        )
        .await
    }

    /// Create every symlink the location carries, at most once per instance.
    /// Filesystem failures are logged and skipped.
    async fn materialise_symlinks(&self, location: &FileLocation) {
        let mut state = self.inner.state.lock().await;
        if state.symlinks_materialised {
            return;
        }
        for link in &location.symlinks {
            if let Err(e) = materialise_one(link).await {
                warn!(
                    "Could not materialise symlink {} -> {}: {}",
                    link.src.display(),
                    link.dst.display(),
                    e
                );
            }
        }
        state.symlinks_materialised = true;
    }

    /// Copy the file from its owning node onto this one. Returns whether a
    /// transfer actually happened.
    async fn download(&self, location: &FileLocation) -> Result<bool> {
        if location.same_as_engine {
            return Ok(false);
        }
        let mut state = self.inner.state.lock().await;
        if state.downloaded {
            return Ok(false);
        }
        let client = self
            .client()
            .ok_or_else(|| CoreError::Config("scheduler client is gone".into()))?;
        if let Some(parent) = self.inner.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(
            "Downloading {} from {}",
            location.path.display(),
            location.daemon
        );
        ftp::fetch_to_file(
            client.as_ref(),
            location,
            &self.inner.path,
            &self.inner.locality,
            &self.inner.shutdown,
        )
        .await?;
        state.downloaded = true;
        Ok(true)
    }

    async fn prepare_mutation(&self) -> Result<MutationContext> {
        let Some(client) = self.client() else {
            return Ok(MutationContext::local());
        };
        let location = client.file_location(&self.absolute_underlying()).await?;
        self.materialise_symlinks(&location).await;
        let downloaded_now = self.download(&location).await?;
        // Snapshot after the download so only the user's own write counts as
        // a modification.
        let pre_state = file_state(&self.inner.path).await;
        Ok(MutationContext {
            client: Some(client),
            location: Some(location),
            pre_state,
            downloaded_now,
        })
    }

    async fn finish_mutation(&self, ctx: MutationContext) -> Result<()> {
        let (Some(client), Some(location)) = (ctx.client, ctx.location) else {
            return Ok(());
        };
        let path = self.absolute_underlying();
        let post_state = file_state(&self.inner.path).await;
        let update = FileLocationUpdate {
            path,
            size: post_state.map(|(_, size)| size).unwrap_or(0),
            timestamp: post_state
                .map(|(mtime, _)| millis_since_epoch(mtime))
                .unwrap_or(0),
            location_wrapper_id: location.location_wrapper_id,
            node: None,
        };
        let changed = match (ctx.pre_state, post_state) {
            (Some(before), Some(after)) => before != after,
            (None, Some(_)) => true,
            _ => false,
        };
        if changed {
            client.report_location(update, true).await?;
        } else if ctx.downloaded_now {
            client.report_location(update, false).await?;
        }
        Ok(())
    }
}

struct MutationContext {
    client: Option<Arc<dyn LocationSource>>,
    location: Option<FileLocation>,
    pre_state: Option<(SystemTime, u64)>,
    downloaded_now: bool,
}

impl MutationContext {
    fn local() -> Self {
        Self {
            client: None,
            location: None,
            pre_state: None,
            downloaded_now: false,
        }
    }
}

async fn materialise_one(link: &SymlinkSpec) -> io::Result<()> {
    match tokio::fs::symlink_metadata(&link.src).await {
        Ok(meta) => {
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&link.src).await?;
            } else {
                tokio::fs::remove_file(&link.src).await?;
            }
        }
        Err(_) => {
            if let Some(parent) = link.src.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }
    tokio::fs::symlink(&link.dst, &link.src).await
}

/// Modification time and size, the pair used to detect a mutation.
async fn file_state(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

fn millis_since_epoch(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(Component::ParentDir);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Factory bound to a live client, handed to `LocalFileWalker`.
pub fn client_bound_factory(
    client: &Arc<dyn LocationSource>,
    locality: LocalityConfig,
    shutdown: ShutdownSignal,
) -> crate::walker::LocalPathFactory {
    let weak = Arc::downgrade(client);
    Arc::new(move |path, attributes, workdir| {
        LocalPath::new(
            path,
            attributes,
            workdir,
            Some(weak.clone()),
            locality.clone(),
            shutdown.clone(),
        )
    })
}

// --- Comparisons: LocalPaths order by their underlying path ---

impl PartialEq for LocalPath {
    fn eq(&self, other: &Self) -> bool {
        self.inner.path == other.inner.path
    }
}

impl Eq for LocalPath {}

impl PartialOrd for LocalPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.inner.path.cmp(&other.inner.path)
    }
}

impl PartialEq<Path> for LocalPath {
    fn eq(&self, other: &Path) -> bool {
        self.inner.path.as_path() == other
    }
}

impl PartialEq<PathBuf> for LocalPath {
    fn eq(&self, other: &PathBuf) -> bool {
        &self.inner.path == other
    }
}

impl std::hash::Hash for LocalPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.path.hash(state);
    }
}

impl AsRef<Path> for LocalPath {
    fn as_ref(&self) -> &Path {
        &self.inner.path
    }
}

impl fmt::Debug for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPath")
            .field("path", &self.inner.path)
            .field("has_attributes", &self.inner.attributes.is_some())
            .finish()
    }
}

impl fmt::Display for LocalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.path.display())
    }
}
