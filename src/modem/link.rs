//! Byte-level serial seam, so the session can run against real hardware or
//! the simulator.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::error::OpenCause;

/// An open serial connection.
pub trait SerialLink: Send {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read what is available within the link's poll interval; `Ok(0)` when
    /// nothing arrived.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop unread input (stale URCs, leftover echo).
    fn discard_input(&mut self) -> io::Result<()>;
}

pub trait SerialOpener: Send + Sync {
    fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenCause>;
}

/// Open with a hard deadline. Some drivers block indefinitely when another
/// process holds the port; past the deadline the attempt is abandoned and
/// whatever it eventually returns is dropped.
pub fn open_bounded(
    opener: Arc<dyn SerialOpener>,
    port: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialLink>, OpenCause> {
    let (tx, rx) = std::sync::mpsc::channel();
    let port_name = port.to_string();
    std::thread::Builder::new()
        .name("binwatch-serial-open".into())
        .spawn(move || {
            let _ = tx.send(opener.open(&port_name, baud_rate));
        })
        .map_err(|e| OpenCause::Other(format!("cannot spawn open thread: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(OpenCause::Timeout),
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
            Err(OpenCause::Other("open thread exited without a result".into()))
        }
    }
}

#[cfg(feature = "serial")]
pub use system::{SystemSerialLink, SystemSerialOpener};

#[cfg(feature = "serial")]
mod system {
    use std::io::{self, Read, Write};
    use std::time::Duration;

    use serialport::{ClearBuffer, SerialPort};

    use super::{SerialLink, SerialOpener};
    use crate::error::OpenCause;

    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Opens real ports, 8N1, exclusive.
    #[derive(Debug, Default)]
    pub struct SystemSerialOpener;

    impl SerialOpener for SystemSerialOpener {
        fn open(&self, port: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenCause> {
            let port = serialport::new(port, baud_rate)
                .timeout(POLL_INTERVAL)
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None)
                .flow_control(serialport::FlowControl::None)
                .open()
                .map_err(classify)?;
            Ok(Box::new(SystemSerialLink { port }))
        }
    }

    fn classify(err: serialport::Error) -> OpenCause {
        let description = err.description.to_ascii_lowercase();
        if description.contains("busy") || description.contains("locked") {
            return OpenCause::PortBusy;
        }
        match err.kind {
            serialport::ErrorKind::NoDevice => OpenCause::NotFound,
            serialport::ErrorKind::Io(io::ErrorKind::NotFound) => OpenCause::NotFound,
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => OpenCause::PermissionDenied,
            _ => OpenCause::Other(err.description),
        }
    }

    pub struct SystemSerialLink {
        port: Box<dyn SerialPort>,
    }

    impl SerialLink for SystemSerialLink {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.port.write_all(bytes)?;
            self.port.flush()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn discard_input(&mut self) -> io::Result<()> {
            self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
        }
    }
}
