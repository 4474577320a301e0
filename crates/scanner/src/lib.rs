pub mod emit;
pub mod walk;

pub use emit::{ManifestKind, ManifestWriter};
pub use walk::Scanner;
