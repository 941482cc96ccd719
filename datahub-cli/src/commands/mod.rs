pub mod check;
pub mod hub;
pub mod status;
pub mod sync;
pub mod versions;

use std::path::PathBuf;

use clap::Args;

/// `-c/-s` pair shared by the hub-side commands.
#[derive(Args, Debug, Clone)]
pub struct HubPaths {
    /// Hub configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Hub state file.
    #[arg(short, long, default_value = ".state.json")]
    pub state: PathBuf,
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
