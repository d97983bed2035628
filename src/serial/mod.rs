//! UART link to the MH-Z19 CO2 sensor.
//!
//! [`frame`] holds the wire format and reassembly, [`client`] the two
//! request/response exchanges, and [`open`] attaches a client to a real serial
//! device.

pub mod client;
pub mod frame;

pub use client::{ExchangeOptions, SerialFrameClient};
pub use frame::Frame;

use std::io;
use thiserror::Error;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// The sensor talks 9600 baud, 8N1.
pub const BAUD_RATE: u32 = 9600;

/// Errors from a single exchange with the sensor.
///
/// None of these leave the client unusable; the next exchange starts afresh.
#[derive(Error, Debug)]
pub enum SerialError {
    /// The port rejected a read or write
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    /// Fewer than nine frame bytes arrived within the retry budget
    #[error(
        "timeout reading response after {attempts} attempts, read {collected} frame bytes \
         and {discarded} noise bytes"
    )]
    Timeout {
        attempts: u32,
        /// Bytes collected from the start byte on
        collected: usize,
        /// Bytes dropped ahead of the start byte
        discarded: usize,
    },
    /// A complete frame arrived that does not answer the command sent
    #[error("unexpected response format [{frame}], expected command {expected:#04X}")]
    UnexpectedFormat { expected: u8, frame: Frame },
    #[error("unexpected response start byte [{frame}], expected 0xFF")]
    MissingStartByte { frame: Frame },
    #[error("response checksum mismatch [{frame}]")]
    ChecksumMismatch { frame: Frame },
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        source: tokio_serial::Error,
    },
}

/// Open the sensor's serial device and wrap it in a client.
///
/// Input left in the driver from before the port was opened is discarded.
pub fn open(
    path: &str,
    options: ExchangeOptions,
) -> Result<SerialFrameClient<SerialStream>, SerialError> {
    let port = tokio_serial::new(path, BAUD_RATE)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .timeout(options.read_timeout)
        .open_native_async()
        .map_err(|source| SerialError::Open {
            path: path.to_string(),
            source,
        })?;
    port.clear(ClearBuffer::Input)
        .map_err(|source| SerialError::Open {
            path: path.to_string(),
            source,
        })?;
    Ok(SerialFrameClient::with_options(port, options))
}
