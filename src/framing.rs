// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Framing Adapter: makes a raw TCP stream and a WebSocket connection look identical to the
//! [`crate::session::Session`] state machine — read a chunk, write a chunk, shut down. Each side
//! can be split into an independent read half and write half so inbound↔upstream splicing can
//! run both directions concurrently, the same shape as `tokio::io::split` on a plain socket.

use std::io;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::RelayError;

const READ_CHUNK: usize = 64 * 1024;

/// One accepted inbound connection, in either raw-stream or WebSocket-message form.
pub enum Framing {
    Stream(TcpStream),
    Message(WebSocketStream<TcpStream>),
}

pub enum FramingRead {
    Stream(ReadHalf<TcpStream>),
    Message(SplitStream<WebSocketStream<TcpStream>>),
}

pub enum FramingWrite {
    Stream(WriteHalf<TcpStream>),
    Message(SplitSink<WebSocketStream<TcpStream>, Message>),
}

impl Framing {
    /// Accept a plain TCP client with no extra framing.
    pub fn stream(raw: TcpStream) -> Self {
        Framing::Stream(raw)
    }

    /// Complete a server-side WebSocket handshake on an already-accepted TCP client.
    pub async fn accept_websocket(raw: TcpStream) -> Result<Self, RelayError> {
        let ws = tokio_tungstenite::accept_async(raw)
            .await
            .map_err(|_| RelayError::BadHandshake("websocket upgrade failed"))?;
        Ok(Framing::Message(ws))
    }

    /// Read the next chunk of inbound data. `Ok(None)` means a clean EOF / WebSocket close.
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        match self {
            Framing::Stream(stream) => read_stream_chunk(stream).await,
            Framing::Message(ws) => read_message_chunk(ws).await,
        }
    }

    /// Write one chunk to the peer.
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), RelayError> {
        match self {
            Framing::Stream(stream) => {
                stream.write_all(data).await?;
                Ok(())
            }
            Framing::Message(ws) => write_message_chunk(ws, data).await,
        }
    }

    /// Half-close the write side (stream) or send a close frame (message).
    pub async fn shutdown(&mut self) -> Result<(), RelayError> {
        match self {
            Framing::Stream(stream) => {
                let _ = stream.shutdown().await;
            }
            Framing::Message(ws) => {
                let _ = ws.close(None).await;
            }
        }
        Ok(())
    }

    /// Split into an independently-owned read half and write half for concurrent splicing.
    pub fn split(self) -> (FramingRead, FramingWrite) {
        match self {
            Framing::Stream(stream) => {
                let (read, write) = tokio::io::split(stream);
                (FramingRead::Stream(read), FramingWrite::Stream(write))
            }
            Framing::Message(ws) => {
                let (sink, stream) = ws.split();
                (FramingRead::Message(stream), FramingWrite::Message(sink))
            }
        }
    }
}

impl FramingRead {
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        match self {
            FramingRead::Stream(stream) => read_stream_chunk(stream).await,
            FramingRead::Message(stream) => read_message_chunk(stream).await,
        }
    }
}

impl FramingWrite {
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), RelayError> {
        match self {
            FramingWrite::Stream(write) => {
                write.write_all(data).await?;
                Ok(())
            }
            FramingWrite::Message(sink) => write_message_chunk(sink, data).await,
        }
    }

    /// Send a keepalive ping. No-op on a raw stream, whose liveness is native TCP's concern.
    pub async fn keepalive_ping(&mut self) -> Result<(), RelayError> {
        if let FramingWrite::Message(sink) = self {
            sink.send(Message::Ping(Vec::new()))
                .await
                .map_err(|e| RelayError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), RelayError> {
        match self {
            FramingWrite::Stream(write) => {
                let _ = write.shutdown().await;
            }
            FramingWrite::Message(sink) => {
                let _ = sink.close().await;
            }
        }
        Ok(())
    }
}

async fn read_stream_chunk(stream: &mut (impl tokio::io::AsyncRead + Unpin)) -> Result<Option<Vec<u8>>, RelayError> {
    let mut buf = vec![0u8; READ_CHUNK];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(buf))
}

async fn read_message_chunk(
    stream: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> Result<Option<Vec<u8>>, RelayError> {
    loop {
        match stream.next().await {
            None => return Ok(None),
            Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_))) => {
                continue;
            }
            Some(Err(e)) => return Err(RelayError::Io(io::Error::new(io::ErrorKind::Other, e))),
        }
    }
}

async fn write_message_chunk(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    data: &[u8],
) -> Result<(), RelayError> {
    sink.send(Message::Binary(data.to_vec()))
        .await
        .map_err(|e| RelayError::Io(io::Error::new(io::ErrorKind::Other, e)))
}
