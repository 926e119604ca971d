use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

pub type Result<T, E = FrontendError> = std::result::Result<T, E>;

/// Error taxonomy of the frontend. Fatal kinds tear the session down with a
/// distinct exit code; non-fatal kinds surface as a toast and the tick loop
/// continues.
#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("platform init failed: {0}")]
    PlatformInit(String),

    #[error("failed to load core")]
    CoreLoad(#[source] anyhow::Error),

    #[error("core requires unsupported environment command {command}")]
    CoreEnvUnsupported { command: u32 },

    /// A tick, serialize, or restore that did not complete normally. Fatal
    /// to the operation, not the process.
    #[error("core fault")]
    CoreRun(#[source] anyhow::Error),

    #[error("core rejected content `{path}`")]
    GameLoad { path: PathBuf },

    #[error("incompatible save state: core wants {expected} bytes, file has {found}")]
    StateSize { expected: usize, found: usize },

    #[error("host is {actual}, operation requires {required}")]
    HostState {
        required: &'static str,
        actual: &'static str,
    },

    #[error("i/o failure on `{path}`")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sustained tick overrun")]
    Timing,
}

impl FrontendError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FrontendError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrontendError::PlatformInit(_)
                | FrontendError::CoreLoad(_)
                | FrontendError::GameLoad { .. }
        )
    }
}

/// How the session ended. The launcher dispatches on the exit code alone.
#[derive(Debug)]
pub enum Outcome {
    /// Clean exit, no follow-up requested.
    Normal,
    /// Menu Quit scheduled a next command; the resume token carries it.
    NextCommand,
    Fatal(FrontendError),
}

pub const EXIT_NORMAL: u8 = 0;
pub const EXIT_FATAL_INIT: u8 = 1;
pub const EXIT_CORE_LOAD: u8 = 2;
pub const EXIT_GAME_LOAD: u8 = 3;
pub const EXIT_NEXT_COMMAND: u8 = 4;

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Normal => EXIT_NORMAL,
            Outcome::NextCommand => EXIT_NEXT_COMMAND,
            Outcome::Fatal(FrontendError::CoreLoad(_)) => EXIT_CORE_LOAD,
            Outcome::Fatal(FrontendError::GameLoad { .. }) => EXIT_GAME_LOAD,
            Outcome::Fatal(_) => EXIT_FATAL_INIT,
        }
    }
}

impl From<&Outcome> for ExitCode {
    fn from(outcome: &Outcome) -> Self {
        ExitCode::from(outcome.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds_map_to_distinct_exit_codes() {
        let core = Outcome::Fatal(FrontendError::CoreLoad(anyhow::anyhow!("nope")));
        let game = Outcome::Fatal(FrontendError::GameLoad {
            path: PathBuf::from("rom.gb"),
        });
        let init = Outcome::Fatal(FrontendError::PlatformInit("no display".into()));

        assert_eq!(core.exit_code(), EXIT_CORE_LOAD);
        assert_eq!(game.exit_code(), EXIT_GAME_LOAD);
        assert_eq!(init.exit_code(), EXIT_FATAL_INIT);
        assert_eq!(Outcome::Normal.exit_code(), EXIT_NORMAL);
        assert_eq!(Outcome::NextCommand.exit_code(), EXIT_NEXT_COMMAND);
    }

    #[test]
    fn state_and_io_errors_are_not_fatal() {
        assert!(!FrontendError::StateSize {
            expected: 10,
            found: 12
        }
        .is_fatal());
        assert!(!FrontendError::io("x.sav", io::Error::from(io::ErrorKind::Other)).is_fatal());
        assert!(FrontendError::PlatformInit("gone".into()).is_fatal());
    }
}
