use std::fmt;
use std::io;

/// Errors the daemon can raise. Per the host-side error taxonomy, local I/O
/// failure on the serial descriptor is the only class that is fatal — every
/// protocol-level error instead collapses into a re-init.
#[derive(Debug)]
pub enum HostdError {
    /// Failed to open or configure the serial port.
    Open { path: String, source: io::Error },
    /// A `read`/`write` on an already-open port failed.
    Io(io::Error),
}

impl fmt::Display for HostdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostdError::Open { path, .. } => write!(f, "failed to open serial port {path}"),
            HostdError::Io(_) => write!(f, "serial I/O failed"),
        }
    }
}

impl std::error::Error for HostdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HostdError::Open { source, .. } => Some(source),
            HostdError::Io(source) => Some(source),
        }
    }
}

impl From<io::Error> for HostdError {
    fn from(source: io::Error) -> Self {
        HostdError::Io(source)
    }
}
