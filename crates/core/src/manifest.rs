use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Column delimiter of the scanner's manifest rows.
pub const DELIMITER: char = ';';

/// Timestamp layout emitted by the scanner: nanosecond fraction, numeric zone.
const TIME_EMIT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f %z";

/// Accepted on parse; `%.f` tolerates 1-9 fractional digits.
const TIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    RegularFile,
    Directory,
    SymbolicLink,
}

impl FileKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "regular file" => Some(FileKind::RegularFile),
            "directory" => Some(FileKind::Directory),
            "symbolic link" => Some(FileKind::SymbolicLink),
            _ => None,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::RegularFile => write!(f, "regular file"),
            FileKind::Directory => write!(f, "directory"),
            FileKind::SymbolicLink => write!(f, "symbolic link"),
        }
    }
}

/// One row of a scanner manifest.
///
/// `virtual_path` is the path as the scanned task saw it; `real_path` is set
/// when the row is a symbolic link (the link target) or was emitted while
/// descending through one (the rewritten node-local location).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub virtual_path: PathBuf,
    pub exists: bool,
    pub real_path: Option<PathBuf>,
    pub size: u64,
    pub kind: Option<FileKind>,
    pub creation_time: Option<DateTime<FixedOffset>>,
    pub access_time: Option<DateTime<FixedOffset>>,
    pub modification_time: Option<DateTime<FixedOffset>>,
    /// True for symbolic-link rows, rows rewritten through a symlink frame,
    /// and missing-target rows.
    pub link: bool,
}

impl FileRecord {
    pub fn is_directory(&self) -> bool {
        self.kind == Some(FileKind::Directory)
    }

    /// Creation time, falling back to the modification time when the scanner
    /// could not determine one.
    pub fn creation_or_modification(&self) -> Option<DateTime<FixedOffset>> {
        self.creation_time.or(self.modification_time)
    }

    /// Render the record as a long-form manifest row.
    pub fn to_manifest_line(&self) -> String {
        if !self.exists {
            return format!("{};0", self.virtual_path.display());
        }
        format!(
            "{};1;{};{};{};{};{};{}",
            self.virtual_path.display(),
            self.real_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            self.size,
            self.kind.map(|k| k.to_string()).unwrap_or_default(),
            format_file_time(self.creation_time.as_ref()),
            format_file_time(self.access_time.as_ref()),
            format_file_time(self.modification_time.as_ref()),
        )
    }
}

/// Parse a manifest timestamp, truncating the fraction to milliseconds.
///
/// An empty string or `-` means the time is unknown and yields `None`.
pub fn parse_file_time(s: &str) -> Result<Option<DateTime<FixedOffset>>, CoreError> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return Ok(None);
    }
    let parsed = DateTime::parse_from_str(s, TIME_PARSE_FORMAT)
        .map_err(|e| CoreError::Parse(format!("bad timestamp '{}': {}", s, e)))?;
    let truncated = parsed
        .with_nanosecond(parsed.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(parsed);
    Ok(Some(truncated))
}

/// Render a timestamp in the scanner's wire format, `-` when unknown.
pub fn format_file_time(t: Option<&DateTime<FixedOffset>>) -> String {
    match t {
        Some(t) => t.format(TIME_EMIT_FORMAT).to_string(),
        None => "-".to_string(),
    }
}

/// Parse one manifest row.
///
/// Two shapes are accepted: the eight-column form for entries that exist, and
/// the two-column form (`<path>;0`) for a symbolic link whose target is
/// missing. Anything else is a hard parse error.
pub fn parse_record(line: &str) -> Result<FileRecord, CoreError> {
    let columns: Vec<&str> = line.split(DELIMITER).collect();
    let virtual_path = PathBuf::from(strip_quotes(columns[0]));

    match columns.len() {
        2 => {
            if columns[1] != "0" {
                return Err(CoreError::Parse(format!(
                    "two-column row must carry exists=0, got '{}'",
                    columns[1]
                )));
            }
            Ok(FileRecord {
                virtual_path,
                exists: false,
                real_path: None,
                size: 0,
                kind: None,
                creation_time: None,
                access_time: None,
                modification_time: None,
                link: true,
            })
        }
        8 => {
            let exists = match columns[1] {
                "1" => true,
                "0" => false,
                other => {
                    return Err(CoreError::Parse(format!(
                        "bad exists flag '{}' in row for {}",
                        other,
                        virtual_path.display()
                    )))
                }
            };
            let real_path = if columns[2].is_empty() {
                None
            } else {
                Some(PathBuf::from(columns[2]))
            };
            let size: u64 = columns[3].parse().map_err(|_| {
                CoreError::Parse(format!(
                    "bad size '{}' in row for {}",
                    columns[3],
                    virtual_path.display()
                ))
            })?;
            let kind = FileKind::parse(columns[4]);
            if kind.is_none() && !columns[4].is_empty() {
                return Err(CoreError::Parse(format!(
                    "unknown file type '{}' in row for {}",
                    columns[4],
                    virtual_path.display()
                )));
            }
            let link = real_path.is_some() || kind == Some(FileKind::SymbolicLink);
            Ok(FileRecord {
                virtual_path,
                exists,
                real_path,
                size,
                kind,
                creation_time: parse_file_time(columns[5])?,
                access_time: parse_file_time(columns[6])?,
                modification_time: parse_file_time(columns[7])?,
                link,
            })
        }
        n => Err(CoreError::Parse(format!(
            "expected 2 or 8 columns, got {} in '{}'",
            n, line
        ))),
    }
}

/// The first column may be single-quoted; strip exactly one leading and one
/// trailing quote.
fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_row() {
        let line = "/work/a.txt;1;;42;regular file;2024-03-01 10:00:00.123456789 +0000;2024-03-01 10:00:01.000000000 +0000;2024-03-01 10:00:02.500000000 +0000";
        let record = parse_record(line).unwrap();
        assert_eq!(record.virtual_path, PathBuf::from("/work/a.txt"));
        assert!(record.exists);
        assert!(record.real_path.is_none());
        assert_eq!(record.size, 42);
        assert_eq!(record.kind, Some(FileKind::RegularFile));
        assert!(!record.link);
        assert!(!record.is_directory());
    }

    #[test]
    fn test_parse_symlink_row() {
        let line = "/work/in.dat;1;/scratch/run1/in.dat;7;symbolic link;-;-;-";
        let record = parse_record(line).unwrap();
        assert_eq!(record.real_path, Some(PathBuf::from("/scratch/run1/in.dat")));
        assert_eq!(record.kind, Some(FileKind::SymbolicLink));
        assert!(record.link);
        assert!(record.creation_time.is_none());
    }

    #[test]
    fn test_parse_missing_symlink_target() {
        let record = parse_record("/work/dangling;0").unwrap();
        assert!(!record.exists);
        assert!(record.link);
        assert_eq!(record.size, 0);
        assert_eq!(record.kind, None);
        assert!(record.creation_time.is_none());
        assert!(record.access_time.is_none());
        assert!(record.modification_time.is_none());
    }

    #[test]
    fn test_parse_quoted_path() {
        let record = parse_record("'/work/odd name';0").unwrap();
        assert_eq!(record.virtual_path, PathBuf::from("/work/odd name"));
    }

    #[test]
    fn test_parse_bad_arity() {
        assert!(parse_record("/work/a;1;x").is_err());
        assert!(parse_record("/work/a").is_err());
    }

    #[test]
    fn test_parse_bad_two_column_flag() {
        assert!(parse_record("/work/a;1").is_err());
    }

    #[test]
    fn test_time_truncated_to_millis() {
        let t = parse_file_time("2024-03-01 10:00:00.123456789 +0100")
            .unwrap()
            .unwrap();
        assert_eq!(t.timestamp_subsec_millis(), 123);
        assert_eq!(t.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_time_unknown() {
        assert!(parse_file_time("-").unwrap().is_none());
        assert!(parse_file_time("").unwrap().is_none());
        assert!(parse_file_time("not a time").is_err());
    }

    #[test]
    fn test_time_round_trip_millis() {
        let t = parse_file_time("2024-03-01 10:00:00.123000000 +0200")
            .unwrap()
            .unwrap();
        let reparsed = parse_file_time(&format_file_time(Some(&t))).unwrap().unwrap();
        assert_eq!(t, reparsed);
    }

    #[test]
    fn test_record_round_trip() {
        let line = "/work/b;1;/scratch/b;1024;directory;2024-03-01 10:00:00.111000000 +0000;-;2024-03-01 10:00:00.222000000 +0000";
        let record = parse_record(line).unwrap();
        let reparsed = parse_record(&record.to_manifest_line()).unwrap();
        assert_eq!(record, reparsed);
    }

    #[test]
    fn test_creation_falls_back_to_modification() {
        let line = "/work/c;1;;0;regular file;-;-;2024-03-01 10:00:00.500000000 +0000";
        let record = parse_record(line).unwrap();
        assert_eq!(
            record.creation_or_modification(),
            record.modification_time
        );
    }
}
