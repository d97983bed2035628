//! Request/response exchanges with the CO2 sensor over a byte stream.

use super::frame::{
    DISABLE_ABC_COMMAND, FRAME_LEN, Frame, FrameAssembler, READ_CO2, READ_CO2_COMMAND,
};
use super::SerialError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// Maximum number of reads spent on one response.
pub const MAX_READ_ATTEMPTS: u32 = 20;

/// Pause before the first read and after every read that left the frame incomplete.
pub const RETRY_DELAY: Duration = Duration::from_millis(1);

/// Upper bound for a single read.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Most stale bytes dropped before a command; a port that keeps producing
/// input beyond this is left to the response resynchronization.
const MAX_DRAIN_BYTES: usize = 256;

/// Tuning for the response-read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub read_timeout: Duration,
    /// Reject CO2 responses whose trailing checksum does not match.
    pub verify_checksum: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        ExchangeOptions {
            max_attempts: MAX_READ_ATTEMPTS,
            retry_delay: RETRY_DELAY,
            read_timeout: READ_TIMEOUT,
            verify_checksum: false,
        }
    }
}

/// Client for the MH-Z19 command set.
///
/// The client exclusively owns the underlying stream. A failed exchange does
/// not affect later ones: buffered input is dropped before every command and
/// every response read starts from an empty assembler.
#[derive(Debug)]
pub struct SerialFrameClient<T> {
    port: T,
    options: ExchangeOptions,
    assembler: FrameAssembler,
}

impl<T> SerialFrameClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(port: T) -> Self {
        Self::with_options(port, ExchangeOptions::default())
    }

    pub fn with_options(port: T, options: ExchangeOptions) -> Self {
        SerialFrameClient {
            port,
            options,
            assembler: FrameAssembler::new(),
        }
    }

    /// Switch off automatic baseline correction.
    ///
    /// The acknowledgement frame is consumed and discarded. A missing
    /// acknowledgement is logged but not treated as a failure; only I/O errors
    /// are returned.
    pub async fn disable_auto_calibration(&mut self) -> Result<(), SerialError> {
        match self.exchange(&DISABLE_ABC_COMMAND).await {
            Ok(frame) => {
                debug!(%frame, "ABC acknowledgement");
                Ok(())
            }
            Err(SerialError::Io(e)) => Err(SerialError::Io(e)),
            Err(e) => {
                warn!(error = %e, "no acknowledgement for ABC command");
                Ok(())
            }
        }
    }

    /// Read the CO2 concentration in ppm.
    pub async fn read_co2(&mut self) -> Result<u16, SerialError> {
        let frame = self.exchange(&READ_CO2_COMMAND).await?;
        if frame.command() != READ_CO2 {
            return Err(SerialError::UnexpectedFormat {
                expected: READ_CO2,
                frame,
            });
        }
        if self.options.verify_checksum && !frame.checksum_valid() {
            return Err(SerialError::ChecksumMismatch { frame });
        }
        Ok(frame.value())
    }

    async fn exchange(&mut self, command: &[u8; FRAME_LEN]) -> Result<Frame, SerialError> {
        self.drain_input().await?;
        self.port.write_all(command).await?;
        self.port.flush().await?;
        self.read_response().await
    }

    /// Drop input that is already buffered, such as a late acknowledgement or
    /// the reply to an exchange that failed, so it cannot be taken as the
    /// answer to the next command.
    async fn drain_input(&mut self) -> Result<(), SerialError> {
        let mut buf = [0u8; 64];
        let mut drained = 0;
        while drained < MAX_DRAIN_BYTES {
            match tokio::time::timeout(Duration::ZERO, self.port.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    debug!(bytes = ?&buf[..n], "dropping stale serial input");
                    drained += n;
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if drained > 0 {
            warn!(drained, "discarded stale input before command");
        }
        Ok(())
    }

    /// Read one response frame, resynchronizing on the start byte.
    ///
    /// Each read asks only for the bytes still missing from the frame, so
    /// nothing after the frame is consumed.
    async fn read_response(&mut self) -> Result<Frame, SerialError> {
        let options = self.options;
        let mut buf = [0u8; FRAME_LEN];
        self.assembler.reset();

        tokio::time::sleep(options.retry_delay).await;
        for attempt in 1..=options.max_attempts {
            let wanted = self.assembler.needed();
            match tokio::time::timeout(options.read_timeout, self.port.read(&mut buf[..wanted]))
                .await
            {
                Ok(Ok(n)) => {
                    trace!(attempt, bytes = ?&buf[..n], "serial read");
                    self.assembler.push(&buf[..n]);
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => trace!(attempt, "serial read timed out"),
            }

            if let Some(frame) = self.assembler.take_frame() {
                if self.assembler.discarded() > 0 {
                    debug!(
                        discarded = self.assembler.discarded(),
                        "skipped noise before frame start"
                    );
                }
                if !frame.starts_with_marker() {
                    return Err(SerialError::MissingStartByte { frame });
                }
                return Ok(frame);
            }

            if attempt < options.max_attempts {
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        Err(SerialError::Timeout {
            attempts: options.max_attempts,
            collected: self.assembler.collected(),
            discarded: self.assembler.discarded(),
        })
    }
}
