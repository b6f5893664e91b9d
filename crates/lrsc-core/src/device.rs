//! Session with the LRSC concentrator.
//!
//! `Disconnected → Connecting → Handshaking → Ready → Disconnected`. The
//! read loop turns telemetry lines into [`Event`]s; commands are written
//! back through [`DeviceConnection::send_command`] from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lrsc_api::codec::{self, DeviceMessage, HELLO, LINE_TERMINATOR, PROTOCOL_VERSION};
use lrsc_api::{Dialer, Error as ApiError};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::model::{Command, Event};
use crate::status::{OK, StatusReporter, keys};
use crate::supervisor::Supervised;

/// Default time allowed for the concentrator to answer the hello.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest line accepted from the concentrator, line ending included.
pub const MAX_LINE_LEN: usize = 4096;

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
}

// ── DeviceConnection ─────────────────────────────────────────────────

type Reader<S> = BufReader<ReadHalf<S>>;

pub struct DeviceConnection<D: Dialer> {
    dialer: D,
    status: StatusReporter,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
    handshake_timeout: Duration,
    reader: Mutex<Option<Reader<D::Stream>>>,
    writer: Mutex<Option<WriteHalf<D::Stream>>>,
    sequence_no: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

impl<D: Dialer> DeviceConnection<D> {
    pub fn new(
        dialer: D,
        events: mpsc::Sender<Event>,
        status: StatusReporter,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            dialer,
            status,
            events,
            cancel,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            sequence_no: AtomicU64::new(0),
            state,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.dialer.endpoint()
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Drop the current socket, if any.
    pub async fn close(&self) {
        self.reader.lock().await.take();
        if let Some(mut writer) = self.writer.lock().await.take() {
            // The peer may already be gone; nothing to do about a failed shutdown.
            let _ = writer.shutdown().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Dial and handshake. Replaces any previous socket.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.close().await;
        self.set_state(ConnectionState::Connecting);

        tracing::debug!(endpoint = self.endpoint(), "Dialing concentrator");
        let stream = match self.dialer.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(endpoint = self.endpoint(), error = %e, "Could not connect to concentrator");
                return Err(self.fail_connect(e));
            }
        };
        tracing::info!(endpoint = self.endpoint(), "Connected to concentrator");

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        self.set_state(ConnectionState::Handshaking);
        if let Err(e) = self.handshake(&mut reader, &mut writer).await {
            tracing::error!(endpoint = self.endpoint(), error = %e, "Could not perform handshake");
            return Err(self.fail_connect(e));
        }

        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        self.status.report(keys::CONNECTION, OK);
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    fn fail_connect(&self, err: ApiError) -> CoreError {
        self.status.report(keys::CONNECTION, err.to_string());
        self.set_state(ConnectionState::Disconnected);
        err.into()
    }

    async fn handshake<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), ApiError>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let endpoint = self.endpoint();
        let handshake_error = |e: std::io::Error| ApiError::Handshake {
            endpoint: endpoint.to_owned(),
            reason: e.to_string(),
        };

        writer
            .write_all(PROTOCOL_VERSION.as_bytes())
            .await
            .map_err(handshake_error)?;
        write_frame(writer, HELLO).await.map_err(handshake_error)?;

        let mut buf = String::new();
        let response = tokio::time::timeout(self.handshake_timeout, read_line(reader, &mut buf))
            .await
            .map_err(|_| ApiError::HandshakeTimeout {
                timeout_secs: self.handshake_timeout.as_secs(),
            })??;

        if validate_handshake(&response) {
            tracing::info!(endpoint, "Handshake completed");
        } else {
            tracing::error!(endpoint, %response, "Failed to validate handshake response");
        }
        Ok(())
    }

    /// Read telemetry until the socket fails, a line does not parse, or the
    /// token fires. Always leaves the connection closed.
    pub async fn run(&self) -> Result<(), CoreError> {
        let mut reader = self.reader.lock().await.take().ok_or(CoreError::NotConnected)?;

        let result = self.read_loop(&mut reader).await;
        drop(reader);

        if let Err(ref e) = result {
            tracing::warn!(endpoint = self.endpoint(), error = %e, "Concentrator read loop ended");
            self.status.report(keys::CONNECTION, e.to_string());
        }
        self.close().await;
        result
    }

    async fn read_loop(&self, reader: &mut Reader<D::Stream>) -> Result<(), CoreError> {
        let mut buf = String::new();

        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                line = read_line(reader, &mut buf) => line?,
            };

            let message = codec::parse(&line)?;
            let Some(event) = Event::from_message(message) else {
                tracing::debug!(%line, "Ignoring message without telemetry");
                continue;
            };

            tracing::debug!(device_id = %event.device_id, "Received telemetry");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                sent = self.events.send(event) => sent.map_err(|_| CoreError::ChannelClosed)?,
            }
        }
    }

    /// Write a downstream command and return the sequence number it used.
    pub async fn send_command(&self, command: &Command) -> Result<u64, CoreError> {
        let result = self.write_command(command).await;
        match &result {
            Ok(_) => self.status.report(keys::LAST_COMMAND, OK),
            Err(e) => self.status.report(keys::LAST_COMMAND, e.to_string()),
        }
        result
    }

    async fn write_command(&self, command: &Command) -> Result<u64, CoreError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(CoreError::NotConnected)?;

        let sequence_no = self.sequence_no.fetch_add(1, Ordering::SeqCst) + 1;
        let message = DeviceMessage::downstream(&command.device_id, &command.payload, sequence_no);
        let line = codec::serialize(&message)?;

        write_frame(writer, &line).await.map_err(ApiError::from)?;
        tracing::debug!(device_id = %command.device_id, sequence_no, ">>> {line}");
        Ok(sequence_no)
    }
}

impl<D: Dialer> Supervised for DeviceConnection<D> {
    fn name(&self) -> &str {
        "device"
    }

    async fn connect(&self) -> Result<(), CoreError> {
        DeviceConnection::connect(self).await
    }

    async fn run(&self) -> Result<(), CoreError> {
        DeviceConnection::run(self).await
    }
}

// ── Framing ──────────────────────────────────────────────────────────

async fn write_frame<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut frame = String::with_capacity(line.len() + LINE_TERMINATOR.len());
    frame.push_str(line);
    frame.push_str(LINE_TERMINATOR);
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

/// Next non-empty line, without its line ending.
///
/// A line longer than [`MAX_LINE_LEN`] is an error; the rest of it is
/// left unread.
async fn read_line<R>(reader: &mut R, buf: &mut String) -> Result<String, ApiError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let limit = MAX_LINE_LEN as u64;

    loop {
        buf.clear();
        let read = (&mut *reader).take(limit).read_line(buf).await?;
        if read == 0 {
            return Err(ApiError::Disconnected);
        }
        if read == MAX_LINE_LEN && !buf.ends_with('\n') {
            return Err(ApiError::LineTooLong {
                limit: MAX_LINE_LEN,
            });
        }

        let line = buf.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }
        tracing::trace!("<<< {line}");
        return Ok(line.to_owned());
    }
}

/// The concentrator's answer to the hello is not checked.
fn validate_handshake(_response: &str) -> bool {
    true
}

// ── Tests ────────────────────────────────────────────────────────────
