use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use porter_core::manifest::FileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// Eight columns per row, including the three timestamps.
    Long,
    /// Wall-clock header plus five columns per row.
    Short,
}

/// Writes manifest rows in the scanner's wire format.
pub struct ManifestWriter<W: Write> {
    out: io::BufWriter<W>,
    kind: ManifestKind,
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(out: W, kind: ManifestKind) -> Self {
        Self {
            out: io::BufWriter::new(out),
            kind,
        }
    }

    /// Short-form preamble: seconds and zero-padded nanoseconds concatenated
    /// into one numeric token.
    pub fn write_wall_clock(&mut self) -> io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::other(e.to_string()))?;
        writeln!(self.out, "{}{:09}", now.as_secs(), now.subsec_nanos())
    }

    /// The scan-root header line.
    pub fn write_root(&mut self, root: &Path) -> io::Result<()> {
        writeln!(self.out, "{}", root.display())
    }

    pub fn write_record(&mut self, record: &FileRecord) -> io::Result<()> {
        let line = match self.kind {
            ManifestKind::Long => record.to_manifest_line(),
            ManifestKind::Short => short_line(record),
        };
        writeln!(self.out, "{}", line)
    }

    pub fn finish(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn short_line(record: &FileRecord) -> String {
    if !record.exists {
        return format!("{};0", record.virtual_path.display());
    }
    format!(
        "{};1;{};{};{}",
        record.virtual_path.display(),
        record
            .real_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        record.size,
        record.kind.map(|k| k.to_string()).unwrap_or_default(),
    )
}
