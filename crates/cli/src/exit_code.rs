//! Process exit codes
//!
//! Scripts rely on these values; do not renumber them.

use objsync_core::{ErrorClass, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    /// At least one transfer failed
    GeneralError = 1,
    /// Bad arguments or locations
    UsageError = 2,
    /// The client could not be set up or the backend was unreachable
    NetworkError = 3,
    /// Interrupted by Ctrl-C
    Interrupted = 130,
}

impl ExitCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Exit code for a finished run
    pub fn from_report(report: &Report) -> Self {
        if report.cancelled {
            ExitCode::Interrupted
        } else if report.has_failures() {
            ExitCode::GeneralError
        } else {
            ExitCode::Success
        }
    }

    /// Exit code for an error raised before any transfer ran
    pub fn from_error(error: &objsync_core::Error) -> Self {
        match error.class() {
            ErrorClass::Transient => ExitCode::NetworkError,
            ErrorClass::Cancelled => ExitCode::Interrupted,
            _ => match error {
                objsync_core::Error::InvalidPath(_) | objsync_core::Error::Config(_) => {
                    ExitCode::UsageError
                }
                _ => ExitCode::GeneralError,
            },
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_u8())
    }
}
