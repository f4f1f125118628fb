/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read bytes into `buf` until `delimiter` is seen or `max_len` bytes have
/// been taken. Returns whether the delimiter was found and how many bytes
/// were read; a `(false, 0)` return means the stream was already at EOF.
pub(crate) async fn limited_read_until<R>(
    reader: &mut R,
    delimiter: u8,
    max_len: usize,
    buf: &mut Vec<u8>,
) -> io::Result<(bool, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok((false, total));
        }

        let left = max_len - total;
        let window = &available[..available.len().min(left)];
        match memchr::memchr(delimiter, window) {
            Some(p) => {
                buf.extend_from_slice(&window[..=p]);
                reader.consume(p + 1);
                return Ok((true, total + p + 1));
            }
            None => {
                let nr = window.len();
                buf.extend_from_slice(window);
                reader.consume(nr);
                total += nr;
                if total >= max_len {
                    return Ok((false, total));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_to_delimiter() {
        let mut stream: &[u8] = b"status line\nleft over";
        let mut buf = Vec::new();
        let (found, nr) = limited_read_until(&mut stream, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(found);
        assert_eq!(nr, 12);
        assert_eq!(buf, b"status line\n");
        assert_eq!(stream, b"left over");
    }

    #[tokio::test]
    async fn eof_before_delimiter() {
        let mut stream: &[u8] = b"no newline";
        let mut buf = Vec::new();
        let (found, nr) = limited_read_until(&mut stream, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(nr, 10);
        assert_eq!(buf, b"no newline");
    }

    #[tokio::test]
    async fn empty_stream() {
        let mut stream: &[u8] = b"";
        let mut buf = Vec::new();
        let (found, nr) = limited_read_until(&mut stream, b'\n', 64, &mut buf)
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(nr, 0);
    }

    #[tokio::test]
    async fn stops_at_max_len() {
        let mut stream: &[u8] = b"0123456789\n";
        let mut buf = Vec::new();
        let (found, nr) = limited_read_until(&mut stream, b'\n', 4, &mut buf)
            .await
            .unwrap();
        assert!(!found);
        assert_eq!(nr, 4);
        assert_eq!(buf, b"0123");
    }
}
