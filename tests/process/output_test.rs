//! Tests for output line capture and channel delivery.

use futures_util::StreamExt;
use procwrap::process::{self, LineReader, OutputLine, StreamSource, DEFAULT_LINE_BUFFER};
use tokio::io::AsyncWriteExt;

#[test]
fn default_line_buffer_size() {
    assert_eq!(DEFAULT_LINE_BUFFER, 64);
}

#[tokio::test]
async fn channel_delivers_lines_in_order() {
    let (reader, mut writer) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        writer.write_all(b"frame=1\n").await.unwrap();
        writer.write_all(b"frame=2\n").await.unwrap();
        drop(writer);
    });

    let mut rx = LineReader::into_channel(reader, StreamSource::Stdout, 16);

    assert_eq!(
        rx.recv().await.unwrap(),
        OutputLine::Line {
            source: StreamSource::Stdout,
            text: "frame=1".to_string()
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        OutputLine::Line {
            source: StreamSource::Stdout,
            text: "frame=2".to_string()
        }
    );
    assert_eq!(
        rx.recv().await.unwrap(),
        OutputLine::Eof {
            source: StreamSource::Stdout
        }
    );
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn empty_stream_yields_only_eof() {
    let (reader, writer) = tokio::io::duplex(64);
    drop(writer);

    let mut rx = LineReader::into_channel(reader, StreamSource::Stderr, 16);

    let only = rx.recv().await.unwrap();
    assert!(only.is_eof());
    assert_eq!(only.source(), StreamSource::Stderr);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn invalid_utf8_ends_the_stream_with_eof() {
    let (reader, mut writer) = tokio::io::duplex(64);

    tokio::spawn(async move {
        writer.write_all(b"good\n").await.unwrap();
        writer.write_all(b"\xff\xfe\n").await.unwrap();
        drop(writer);
    });

    let mut rx = LineReader::into_channel(reader, StreamSource::Stdout, 16);

    assert_eq!(rx.recv().await.unwrap().text(), Some("good"));
    assert!(rx.recv().await.unwrap().is_eof());
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stream_adapter_yields_lines() {
    let (reader, mut writer) = tokio::io::duplex(1024);

    tokio::spawn(async move {
        writer.write_all(b"a\nb\n").await.unwrap();
        drop(writer);
    });

    let rx = LineReader::into_channel(reader, StreamSource::Stdout, 16);
    let lines = process::lines(rx);
    futures_util::pin_mut!(lines);

    let collected: Vec<Option<String>> = {
        let mut out = Vec::new();
        while let Some(line) = lines.next().await {
            out.push(line.text().map(ToString::to_string));
        }
        out
    };
    assert_eq!(
        collected,
        vec![Some("a".to_string()), Some("b".to_string()), None]
    );
}

#[tokio::test]
async fn pump_reports_read_failures() {
    let (reader, mut writer) = tokio::io::duplex(64);
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        writer.write_all(b"ok\n").await.unwrap();
        writer.write_all(b"\xff\xff").await.unwrap();
        drop(writer);
    });

    let result = LineReader::pump(reader, StreamSource::Stdout, &tx).await;
    assert!(result.is_err());

    // The line before the failure was still delivered, and no end marker
    // was sent by pump itself.
    assert_eq!(rx.recv().await.unwrap().text(), Some("ok"));
    drop(tx);
    assert!(rx.recv().await.is_none());
}
