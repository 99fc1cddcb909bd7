//! Captured output delivery for supervised processes.
//!
//! Each redirected stream gets its own reader task that forwards lines, in
//! the order the process wrote them, into a bounded channel, followed by
//! exactly one end-of-stream marker. Delivery is concurrent with the
//! caller: lines may arrive before or after the exit notification, and
//! lines observed after it are still valid.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Default capacity for line channels.
pub const DEFAULT_LINE_BUFFER: usize = 64;

/// Origin stream of a captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One captured line, or the end-of-stream marker, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputLine {
    /// A line of text produced by the process.
    Line {
        /// Stream the line was read from.
        source: StreamSource,
        /// Line content, without the trailing newline.
        text: String,
    },
    /// End-of-stream marker; no further lines will arrive on this stream.
    Eof {
        /// Stream that ended.
        source: StreamSource,
    },
}

impl OutputLine {
    /// Returns the stream this event originated from.
    #[must_use]
    pub fn source(&self) -> StreamSource {
        match self {
            Self::Line { source, .. } | Self::Eof { source } => *source,
        }
    }

    /// Returns true if this is the end-of-stream marker.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Eof { .. })
    }

    /// Returns the line text, or `None` for the end-of-stream marker.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Line { text, .. } => Some(text),
            Self::Eof { .. } => None,
        }
    }
}

/// Reader that turns a process stream into a channel of [`OutputLine`]s.
#[derive(Debug)]
pub struct LineReader;

impl LineReader {
    /// Spawn a background task reading lines from `reader` into a bounded
    /// channel. The channel yields each line in order, then exactly one
    /// [`OutputLine::Eof`], then closes. A read failure ends the stream
    /// the same way after logging a warning.
    pub fn into_channel<R>(
        reader: R,
        source: StreamSource,
        capacity: usize,
    ) -> mpsc::Receiver<OutputLine>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            if let Err(err) = Self::pump(reader, source, &tx).await {
                tracing::warn!(stream = ?source, error = %err, "stopped reading process output");
                let _ = tx.send(OutputLine::Eof { source }).await;
            }
        });
        rx
    }

    /// Read lines from `reader` and forward them to `tx` until the stream
    /// ends or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if reading from the stream fails;
    /// no end-of-stream marker has been sent in that case.
    pub async fn pump<R>(
        reader: R,
        source: StreamSource,
        tx: &mpsc::Sender<OutputLine>,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(text) = lines.next_line().await? {
            if tx.send(OutputLine::Line { source, text }).await.is_err() {
                // Receiver dropped; nobody is listening anymore.
                return Ok(());
            }
        }
        let _ = tx.send(OutputLine::Eof { source }).await;
        Ok(())
    }
}

/// Expose a line channel as a [`futures_core::Stream`].
pub fn lines(rx: mpsc::Receiver<OutputLine>) -> impl futures_core::Stream<Item = OutputLine> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|line| (line, rx))
    })
}
