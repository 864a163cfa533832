use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures that stop the daemon. A wake sequence that times out is not one
/// of them, see [`crate::wake::WakeOutcome::TimedOut`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The target MAC file is missing, empty or malformed.
    #[error("config file {}{}: {reason}", path.display(), line.map(|l| format!(" line {l}")).unwrap_or_default())]
    Config {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },

    #[error("unable to read settings file {}: {source}", path.display())]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid settings file {}: {source}", path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    /// GPIO chip or line could not be acquired at startup.
    #[error("unable to initialize GPIO {what}: {source}")]
    HardwareInit {
        what: String,
        #[source]
        source: gpio_cdev::Error,
    },

    /// A GPIO line stopped responding while running.
    #[error("GPIO {line} failed: {reason}")]
    Hardware { line: &'static str, reason: String },

    /// The interface could not be found or its channel opened.
    #[error("unable to open capture on '{iface}': {reason}")]
    CaptureOpen { iface: String, reason: String },

    #[error("capture on '{iface}' failed: {reason}")]
    Capture { iface: String, reason: String },

    /// The dedicated wake thread exited while capture was still running.
    #[error("wake worker stopped")]
    WorkerStopped,
}

impl Error {
    pub fn config(path: impl Into<PathBuf>, line: Option<usize>, reason: impl Into<String>) -> Self {
        Error::Config {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Raised before the capture loop starts.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::SettingsIo { .. }
                | Error::Settings { .. }
                | Error::HardwareInit { .. }
                | Error::CaptureOpen { .. }
        )
    }
}
