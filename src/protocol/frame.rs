// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Length-prefixed framing between the broker and the MCP front-end: a
//! 4-byte big-endian length, then exactly that many payload bytes.

use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single frame's payload (design target: 8 MiB).
pub const MAX_FRAME_LEN: u32 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("declared frame length {0} exceeds the {MAX_FRAME_LEN} byte cap")]
    TooLarge(u32),
    #[error("read timed out")]
    Timeout,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of attempting to read the next frame from an active session's
/// socket. `Hangup` is distinguished from `Error` so the reactor can
/// decide whether to move the session to idle (hangup) or drop it
/// outright (malformed/oversized/timed-out frame).
pub enum FrameOutcome {
    Frame(BytesMut),
    Hangup,
    Error(FrameError),
}

/// Reads one length-prefixed frame, bounding the whole operation
/// (header + payload) by `timeout`.
pub async fn read_frame<R>(reader: &mut R, timeout: Duration) -> FrameOutcome
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_frame_inner(reader)).await {
        Ok(outcome) => outcome,
        Err(_) => FrameOutcome::Error(FrameError::Timeout),
    }
}

async fn read_frame_inner<R>(reader: &mut R) -> FrameOutcome
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return FrameOutcome::Hangup,
        Err(e) => return FrameOutcome::Error(FrameError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return FrameOutcome::Error(FrameError::TooLarge(len));
    }
    let mut payload = BytesMut::zeroed(len as usize);
    if let Err(e) = reader.read_exact(&mut payload).await {
        return FrameOutcome::Error(FrameError::Io(e));
    }
    FrameOutcome::Frame(payload)
}

/// Writes exactly one length-prefixed frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(FrameError::TooLarge(payload.len() as u32));
    }
    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
