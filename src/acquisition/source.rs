use std::io::{BufRead, BufReader, ErrorKind};
use std::time::Duration;

use log::{debug, warn};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::models::RawReading;

pub const BAUD_RATE: u32 = 115_200;
const WIRE_PREFIX: &str = "DADOS";
const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SourceError {
    /// No matching device on any scanned port. Retry after a backoff; the
    /// device may simply not be plugged in yet.
    #[error("no matching serial device found")]
    NotFound,

    #[error("serial device error: {0}")]
    Device(#[from] serialport::Error),

    /// The open stream ended. Fatal for this session only; the supervisor
    /// reconnects.
    #[error("device stream closed")]
    Disconnected,

    #[error("device i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source worker panicked")]
    Crashed,
}

/// Capability shared by the device reader and the simulator: produce the
/// next raw reading, blocking. `Ok(None)` is an idle tick (read timeout,
/// malformed line, cancellation observed) so the driving loop can re-check
/// its cancel token. Readings carry no timestamp; the pipeline boundary
/// stamps them.
pub trait SampleSource: Send {
    fn describe(&self) -> String;

    fn next_reading(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawReading>, SourceError>;
}

/// Parses one wire line of the form
/// `DADOS|<temp>|<umidAr>|<umidSolo>|<gasInflamavel>|<gasToxico>|<rain>`.
/// Anything else (wrong prefix, wrong arity, non-numeric fields) yields
/// `None` and is dropped by the caller.
pub fn parse_wire_line(line: &str) -> Option<RawReading> {
    let mut parts = line.trim().split('|');
    if parts.next()? != WIRE_PREFIX {
        return None;
    }

    let fields: Vec<&str> = parts.collect();
    if fields.len() != 6 {
        return None;
    }

    let mut numbers = [0f64; 5];
    for (slot, raw) in numbers.iter_mut().zip(&fields[..5]) {
        *slot = raw.parse().ok()?;
    }

    Some(RawReading {
        temp: numbers[0],
        humidity_air: numbers[1],
        humidity_soil: numbers[2],
        gas_flammable: numbers[3],
        gas_toxic: numbers[4],
        is_raining: fields[5] == "1",
    })
}

/// A physical sensor board on a serial port, read line by line.
pub struct DeviceSource {
    path: String,
    reader: BufReader<Box<dyn SerialPort>>,
}

impl DeviceSource {
    /// Opens the configured path, or scans for a matching board when none is
    /// configured. `NotFound` is recoverable; the caller retries.
    pub fn connect(preferred_path: Option<&str>) -> Result<Self, SourceError> {
        let path = match preferred_path {
            Some(path) => path.to_string(),
            None => discover_port()?,
        };

        let port = serialport::new(&path, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;

        Ok(Self {
            path,
            reader: BufReader::new(port),
        })
    }
}

impl SampleSource for DeviceSource {
    fn describe(&self) -> String {
        format!("serial device at {}", self.path)
    }

    fn next_reading(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<RawReading>, SourceError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Err(SourceError::Disconnected),
            Ok(_) => {
                if let Some(reading) = parse_wire_line(&line) {
                    Ok(Some(reading))
                } else {
                    debug!("dropping unrecognized line from {}: {:?}", self.path, line.trim());
                    Ok(None)
                }
            }
            Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn discover_port() -> Result<String, SourceError> {
    let ports = serialport::available_ports()?;
    match ports.into_iter().find(looks_like_sensor_board) {
        Some(port) => Ok(port.port_name),
        None => {
            warn!("no sensor board among available serial ports");
            Err(SourceError::NotFound)
        }
    }
}

fn looks_like_sensor_board(info: &SerialPortInfo) -> bool {
    if let SerialPortType::UsbPort(usb) = &info.port_type {
        if let Some(manufacturer) = &usb.manufacturer {
            if manufacturer.to_ascii_lowercase().contains("arduino") {
                return true;
            }
        }
    }

    // without udev metadata, fall back on the names USB CDC boards get
    let name = info.port_name.to_ascii_lowercase();
    name.contains("ttyacm") || name.contains("ttyusb") || name.contains("usbmodem")
}
