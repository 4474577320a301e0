use std::path::Path;

/// Input manifest written before user code runs.
pub const INFILES_MANIFEST: &str = ".command.infiles";

/// Output manifest written after user code finishes.
pub const OUTFILES_MANIFEST: &str = ".command.outfiles";

/// Shell line scanning the staged inputs into the task's input manifest.
pub fn infiles_scan_line(scratch_root: &Path, workdir: &Path) -> String {
    scan_line(scratch_root, workdir, INFILES_MANIFEST)
}

/// Shell line scanning the finished work directory into the output manifest.
pub fn outfiles_scan_line(scratch_root: &Path, workdir: &Path) -> String {
    scan_line(scratch_root, workdir, OUTFILES_MANIFEST)
}

fn scan_line(scratch_root: &Path, workdir: &Path, manifest: &str) -> String {
    format!(
        "porter-scan long '{}/{}' '{}' '{}'",
        workdir.display(),
        manifest,
        scratch_root.display(),
        workdir.display()
    )
}
