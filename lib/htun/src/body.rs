/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::io::limited_read_until;
use crate::parse;

const CHUNK_LINE_MAX: usize = 64;
const DRAIN_READ_SIZE: usize = 8192;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum HttpBodyType {
    ContentLength(u64),
    Chunked,
    ReadUntilEnd,
}

enum NextRead {
    FixedData(u64),
    ChunkSize,
    ChunkData(u64),
    ChunkDataEnd,
    Trailer,
    UntilEnd,
    End,
}

/// Sequential reader for a response body that owns its stream, so the
/// stream can be taken back for reuse once the body is finished.
pub(crate) struct HttpBodyReader<R> {
    stream: R,
    next_read: NextRead,
    line_buf: Vec<u8>,
}

impl<R> HttpBodyReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub(crate) fn new(stream: R, body_type: HttpBodyType) -> Self {
        let next_read = match body_type {
            HttpBodyType::ContentLength(0) => NextRead::End,
            HttpBodyType::ContentLength(n) => NextRead::FixedData(n),
            HttpBodyType::Chunked => NextRead::ChunkSize,
            HttpBodyType::ReadUntilEnd => NextRead::UntilEnd,
        };
        HttpBodyReader {
            stream,
            next_read,
            line_buf: Vec::with_capacity(CHUNK_LINE_MAX),
        }
    }

    pub(crate) fn finished(&self) -> bool {
        matches!(self.next_read, NextRead::End)
    }

    pub(crate) fn into_inner(self) -> R {
        self.stream
    }

    /// Read up to `max` body bytes. An empty return means the body is
    /// finished; for `ReadUntilEnd` bodies that is the close of the stream.
    pub(crate) async fn read_data(&mut self, max: usize) -> io::Result<Bytes> {
        loop {
            match self.next_read {
                NextRead::End => return Ok(Bytes::new()),
                NextRead::UntilEnd => {
                    let data = self.stream.fill_buf().await?;
                    if data.is_empty() {
                        self.next_read = NextRead::End;
                        return Ok(Bytes::new());
                    }
                    let nr = data.len().min(max);
                    let bytes = Bytes::copy_from_slice(&data[..nr]);
                    self.stream.consume(nr);
                    return Ok(bytes);
                }
                NextRead::FixedData(left) => {
                    let data = self.stream.fill_buf().await?;
                    if data.is_empty() {
                        return Err(unexpected_eof());
                    }
                    let nr = (left.min(max as u64) as usize).min(data.len());
                    let bytes = Bytes::copy_from_slice(&data[..nr]);
                    self.stream.consume(nr);
                    let left = left - nr as u64;
                    self.next_read = if left == 0 {
                        NextRead::End
                    } else {
                        NextRead::FixedData(left)
                    };
                    return Ok(bytes);
                }
                NextRead::ChunkSize => {
                    self.read_line(CHUNK_LINE_MAX).await?;
                    let size = parse::chunk_size(&self.line_buf)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    self.next_read = if size == 0 {
                        NextRead::Trailer
                    } else {
                        NextRead::ChunkData(size)
                    };
                }
                NextRead::ChunkData(left) => {
                    let data = self.stream.fill_buf().await?;
                    if data.is_empty() {
                        return Err(unexpected_eof());
                    }
                    let nr = (left.min(max as u64) as usize).min(data.len());
                    let bytes = Bytes::copy_from_slice(&data[..nr]);
                    self.stream.consume(nr);
                    let left = left - nr as u64;
                    self.next_read = if left == 0 {
                        NextRead::ChunkDataEnd
                    } else {
                        NextRead::ChunkData(left)
                    };
                    return Ok(bytes);
                }
                NextRead::ChunkDataEnd => {
                    self.read_line(2).await?;
                    if !line_is_blank(&self.line_buf) {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "missing chunk data terminator",
                        ));
                    }
                    self.next_read = NextRead::ChunkSize;
                }
                NextRead::Trailer => {
                    // skip trailer lines up to the final blank line
                    self.read_line(CHUNK_LINE_MAX).await?;
                    if line_is_blank(&self.line_buf) {
                        self.next_read = NextRead::End;
                        return Ok(Bytes::new());
                    }
                }
            }
        }
    }

    pub(crate) async fn drain(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        loop {
            let data = self.read_data(DRAIN_READ_SIZE).await?;
            if data.is_empty() {
                return Ok(total);
            }
            total += data.len() as u64;
        }
    }

    async fn read_line(&mut self, max_len: usize) -> io::Result<()> {
        self.line_buf.clear();
        let (found, nr) =
            limited_read_until(&mut self.stream, b'\n', max_len, &mut self.line_buf).await?;
        if !found {
            return if nr < max_len {
                Err(unexpected_eof())
            } else {
                Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "chunk line too long",
                ))
            };
        }
        Ok(())
    }
}

fn line_is_blank(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

fn unexpected_eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "body closed unexpectedly")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncRead, BufReader, Result};
    use tokio_util::io::StreamReader;

    fn scripted(frames: Vec<&'static [u8]>) -> BufReader<impl AsyncRead + Unpin> {
        let stream =
            tokio_stream::iter(frames.into_iter().map(|f| Result::Ok(Bytes::from_static(f))));
        BufReader::new(StreamReader::new(stream))
    }

    async fn collect<R: AsyncBufRead + Unpin>(
        reader: &mut HttpBodyReader<R>,
        max: usize,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let data = reader.read_data(max).await.unwrap();
            if data.is_empty() {
                return out;
            }
            out.extend_from_slice(&data);
        }
    }

    #[tokio::test]
    async fn fixed_length_single() {
        let stream = scripted(vec![b"test body"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ContentLength(9));
        let body = collect(&mut reader, 64).await;
        assert_eq!(body, b"test body");
        assert!(reader.finished());
    }

    #[tokio::test]
    async fn fixed_length_leaves_excess() {
        let stream = scripted(vec![b"test bodyEXTRA"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ContentLength(9));
        let body = collect(&mut reader, 64).await;
        assert_eq!(body, b"test body");

        let mut rest = reader.into_inner();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut rest, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"EXTRA");
    }

    #[tokio::test]
    async fn fixed_length_respects_max() {
        let stream = scripted(vec![b"test body"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ContentLength(9));
        let data = reader.read_data(4).await.unwrap();
        assert_eq!(data.as_ref(), b"test");
        assert!(!reader.finished());
    }

    #[tokio::test]
    async fn fixed_length_premature_close() {
        let stream = scripted(vec![b"tes"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ContentLength(9));
        let data = reader.read_data(64).await.unwrap();
        assert_eq!(data.as_ref(), b"tes");
        let err = reader.read_data(64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn chunked_multi_frame() {
        let stream = scripted(vec![b"4\r\nwa", b"rp\r\n3\r\nend\r\n", b"0\r\n\r\n"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::Chunked);
        let body = collect(&mut reader, 64).await;
        assert_eq!(body, b"warpend");
        assert!(reader.finished());
    }

    #[tokio::test]
    async fn chunked_skips_trailer() {
        let stream = scripted(vec![b"3\r\nfoo\r\n0\r\nx-checksum: 1\r\n\r\n"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::Chunked);
        let body = collect(&mut reader, 64).await;
        assert_eq!(body, b"foo");
        assert!(reader.finished());
    }

    #[tokio::test]
    async fn chunked_bad_terminator() {
        let stream = scripted(vec![b"3\r\nfooXX\r\n"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::Chunked);
        let data = reader.read_data(64).await.unwrap();
        assert_eq!(data.as_ref(), b"foo");
        let err = reader.read_data(64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn read_until_end() {
        let stream = scripted(vec![b"test body", b"hello world"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ReadUntilEnd);
        let body = collect(&mut reader, 64).await;
        assert_eq!(body, b"test bodyhello world");
        assert!(reader.finished());
    }

    #[tokio::test]
    async fn empty_fixed_length() {
        let stream = scripted(vec![]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::ContentLength(0));
        assert!(reader.finished());
        let data = reader.read_data(64).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn drain_chunked() {
        let stream = scripted(vec![b"3\r\nfoo\r\n0\r\n\r\n"]);
        let mut reader = HttpBodyReader::new(stream, HttpBodyType::Chunked);
        assert_eq!(reader.drain().await.unwrap(), 3);
        assert!(reader.finished());
    }
}
