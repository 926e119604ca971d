use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use crate::error::Outcome;
use crate::logger::RotatingLogger;
use crate::paths::Paths;
use crate::session::Session;

mod audio;
mod cheats;
mod config;
mod core;
mod error;
mod logger;
mod m3u;
mod menu;
mod options;
mod pad;
mod paths;
mod persist;
mod platform;
mod session;
mod signal;
mod video;

/// Minimal libretro frontend for retro-gaming handhelds. The launcher
/// invokes it with a core and a ROM; everything else arrives through the
/// environment.
#[derive(clap::Parser)]
#[command(name = "pocketarch", version)]
struct Cli {
    /// Path to the libretro core (dynamic library)
    core: PathBuf,

    /// Path to the ROM, or an .m3u playlist for multi-disc games
    rom: PathBuf,

    #[clap(long, env = "PLATFORM", default_value = "desktop", hide = true)]
    platform: String,

    #[clap(long, env = "DEVICE", default_value = "default", hide = true)]
    device: String,

    #[clap(long, env = "SDCARD_PATH", default_value = ".", hide = true)]
    sdcard: PathBuf,

    #[clap(long, env = "SYSTEM_PATH", hide = true)]
    system: Option<PathBuf>,

    #[clap(long, env = "USERDATA_PATH", hide = true)]
    userdata: Option<PathBuf>,

    #[clap(long, env = "BIOS_PATH", hide = true)]
    bios: Option<PathBuf>,

    #[clap(long, env = "SAVES_PATH", hide = true)]
    saves: Option<PathBuf>,

    #[clap(long, env = "CORES_PATH", hide = true)]
    cores: Option<PathBuf>,

    #[clap(long, env = "LOGS_PATH", hide = true)]
    logs: Option<PathBuf>,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let paths = Paths::resolve(
        cli.platform,
        cli.device,
        cli.sdcard,
        cli.system,
        cli.userdata,
        cli.bios,
        cli.saves,
        cli.cores,
        cli.logs,
        cli.core,
        cli.rom,
    );

    if let Err(err) =
        RotatingLogger::new(paths.log_path(), RotatingLogger::level_from_env()).install()
    {
        eprintln!("logging unavailable: {err:#}");
    }

    info!(
        "starting: core `{}`, rom `{}`, device {}/{}",
        paths.core.display(),
        paths.rom.display(),
        paths.platform,
        paths.device,
    );

    let outcome = match Session::boot(paths) {
        Ok(session) => session.run(),
        Err(err) => Outcome::Fatal(err),
    };

    match &outcome {
        Outcome::Fatal(err) => error!("{err:#}"),
        outcome => info!("exiting with code {}", outcome.exit_code()),
    }

    log::logger().flush();

    ExitCode::from(&outcome)
}
