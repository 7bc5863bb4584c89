//! Two-direction byte relay between stream endpoints
//!
//! [`run`] copies A → B and B → A on two tasks. Each direction reads up to
//! `chunk_size` bytes, writes and flushes them, then logs a hex dump. When
//! either direction stops (end of stream, I/O error, cancellation) it
//! cancels the other, so a relay never outlives one of its endpoints.
//! Cancellation is only observed between chunks: a write in progress runs
//! to completion, and callers bound a stalled peer with a join timeout.

use std::sync::Arc;

use elmbridge_core::{hexdump, LogSink};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

/// Chunk size for Classic and Network ingress/egress
pub const STREAM_CHUNK_SIZE: usize = 1024;

/// Chunk size for BLE egress polling
pub const BLE_CHUNK_SIZE: usize = 512;

/// Names used in the log for one direction of a relay
#[derive(Debug, Clone)]
pub struct Direction {
    /// Short name used when the direction stops (`netToLoop`)
    pub name: String,
    /// Line logged before the hex dump of every chunk
    pub banner: String,
}

impl Direction {
    pub fn new(name: impl Into<String>, banner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            banner: banner.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub chunk_size: usize,
    pub a_to_b: Direction,
    pub b_to_a: Direction,
}

/// Why a direction stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectionEnd {
    Eof,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DirectionReport {
    /// Bytes written to the destination
    pub bytes: u64,
    pub end: DirectionEnd,
}

#[derive(Debug, Clone)]
pub struct RelayReport {
    pub a_to_b: DirectionReport,
    pub b_to_a: DirectionReport,
}

impl RelayReport {
    /// Either side hit an I/O error
    pub fn failed(&self) -> bool {
        matches!(self.a_to_b.end, DirectionEnd::Failed(_))
            || matches!(self.b_to_a.end, DirectionEnd::Failed(_))
    }
}

/// Relay bytes between `a` and `b` until one side ends or `cancel` fires.
///
/// Both endpoints are consumed and closed before this returns, `a` first.
pub async fn run<A, B>(
    a: A,
    b: B,
    options: &RelayOptions,
    cancel: &CancellationToken,
    log: Arc<dyn LogSink>,
) -> RelayReport
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let scope = cancel.child_token();

    let forward = tokio::spawn(copy_direction(
        a_read,
        b_write,
        options.chunk_size,
        options.a_to_b.clone(),
        scope.clone(),
        log.clone(),
    ));
    let backward = tokio::spawn(copy_direction(
        b_read,
        a_write,
        options.chunk_size,
        options.b_to_a.clone(),
        scope.clone(),
        log,
    ));

    let (forward, backward) = tokio::join!(forward, backward);

    match (forward, backward) {
        (Ok((a_to_b, a_read, b_write)), Ok((b_to_a, b_read, a_write))) => {
            drop(a_read.unsplit(a_write));
            drop(b_read.unsplit(b_write));
            RelayReport { a_to_b, b_to_a }
        }
        (forward, backward) => {
            // A panicked task already dropped its halves
            scope.cancel();
            RelayReport {
                a_to_b: report_of(forward),
                b_to_a: report_of(backward),
            }
        }
    }
}

type Joined<R, W> = Result<(DirectionReport, ReadHalf<R>, WriteHalf<W>), tokio::task::JoinError>;

fn report_of<R, W>(joined: Joined<R, W>) -> DirectionReport {
    match joined {
        Ok((report, _, _)) => report,
        Err(e) => DirectionReport {
            bytes: 0,
            end: DirectionEnd::Failed(e.to_string()),
        },
    }
}

async fn copy_direction<R, W>(
    mut reader: ReadHalf<R>,
    mut writer: WriteHalf<W>,
    chunk_size: usize,
    direction: Direction,
    scope: CancellationToken,
    log: Arc<dyn LogSink>,
) -> (DirectionReport, ReadHalf<R>, WriteHalf<W>)
where
    R: AsyncRead,
    W: AsyncWrite,
{
    let report = pump(&mut reader, &mut writer, chunk_size, &direction, &scope, &*log).await;

    match &report.end {
        DirectionEnd::Eof => log.debug(&format!("exiting {}: end of stream", direction.name)),
        DirectionEnd::Cancelled => log.debug(&format!("exiting {}: cancelled", direction.name)),
        DirectionEnd::Failed(e) => log.debug(&format!("exiting {}: {}", direction.name, e)),
    }

    scope.cancel();
    (report, reader, writer)
}

async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    direction: &Direction,
    scope: &CancellationToken,
    log: &dyn LogSink,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut bytes = 0u64;

    let end = loop {
        let n = tokio::select! {
            _ = scope.cancelled() => break DirectionEnd::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break DirectionEnd::Eof,
                Ok(n) => n,
                Err(e) => break DirectionEnd::Failed(e.to_string()),
            },
        };

        // A chunk that was read is always written out in full
        let chunk = &buf[..n];
        if let Err(e) = write_chunk(writer, chunk).await {
            break DirectionEnd::Failed(e.to_string());
        }

        bytes += n as u64;
        log.debug(&direction.banner);
        log.debug(&hexdump::dump(chunk));
    };

    DirectionReport { bytes, end }
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> std::io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}
