use crate::error::HostdError;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

/// 9600 8N1, per the line's fixed serial configuration. There is no
/// negotiation: both peers are built against this rate.
pub const BAUD_RATE: u32 = 9600;

/// How long a single blocking read waits before returning with zero bytes.
/// Short enough that the event loop can service retry timers and RPC calls
/// between reads without a dedicated poller.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Open and configure the serial port at `path`.
pub fn open(path: impl AsRef<Path>) -> Result<Box<dyn serialport::SerialPort>, HostdError> {
    let path = path.as_ref();
    let path_str = path.to_string_lossy().into_owned();
    serialport::new(path_str.clone(), BAUD_RATE)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| HostdError::Open {
            path: path_str,
            source: io::Error::new(io::ErrorKind::Other, e),
        })
}

/// Read at most one byte, tolerating the timeout/would-block outcomes a
/// short-timeout blocking read produces when nothing arrived.
pub fn read_byte(port: &mut (impl Read + ?Sized)) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match port.read(&mut buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(buf[0])),
        Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn write_byte(port: &mut (impl Write + ?Sized), byte: u8) -> io::Result<()> {
    port.write_all(&[byte])
}

/// Discard whatever is sitting in the OS's serial read/write buffers.
///
/// Used when recovering a link after protocol loss, so bytes already
/// queued against the old session aren't misread against the new one.
pub trait FlushQueues {
    fn flush_queues(&mut self) -> io::Result<()>;
}

impl FlushQueues for Box<dyn serialport::SerialPort> {
    fn flush_queues(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}
