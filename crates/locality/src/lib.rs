pub mod ftp;
pub mod local_path;
pub mod walker;

#[cfg(test)]
pub(crate) mod tests_common;

pub use local_path::{client_bound_factory, LocalPath, LocationSource};
pub use walker::{fake_path, LocalFileWalker, LocalPathFactory, ManifestVisitor, Visit};
