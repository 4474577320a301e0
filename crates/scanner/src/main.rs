use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;

use porter_scanner::{ManifestKind, Scanner};

#[derive(Parser)]
#[command(name = "porter-scan", about = "Emit a file manifest for a task directory")]
struct Cli {
    /// Manifest flavour
    mode: Mode,

    /// Path the manifest is written to
    manifest: PathBuf,

    /// Node-local storage root; scan directories must live under it
    local_root: PathBuf,

    /// Directories to scan
    #[arg(required = true)]
    dirs: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Short,
    Long,
}

impl From<Mode> for ManifestKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Short => ManifestKind::Short,
            Mode::Long => ManifestKind::Long,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "porter_scanner=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let scanner = Scanner::new(&cli.local_root);
    match scanner.run(cli.mode.into(), &cli.manifest, &cli.dirs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Scan failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
