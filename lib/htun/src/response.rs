/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::AsyncBufRead;

use crate::body::HttpBodyType;
use crate::error::{TunnelRequestError, TunnelResponseError};
use crate::header;
use crate::io::limited_read_until;
use crate::parse::{HeaderLine, LineParseError, StatusLine};

pub(crate) struct TunnelResponse {
    pub(crate) code: u16,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    keep_alive: bool,
    content_length: u64,
    chunked_transfer: bool,
    has_transfer_encoding: bool,
    has_content_length: bool,
}

impl TunnelResponse {
    fn new(http11: bool, code: u16, reason: String) -> Self {
        TunnelResponse {
            code,
            reason,
            headers: HeaderMap::new(),
            keep_alive: http11,
            content_length: 0,
            chunked_transfer: false,
            has_transfer_encoding: false,
            has_content_length: false,
        }
    }

    pub(crate) async fn recv<R>(
        reader: &mut R,
        max_header_size: usize,
    ) -> Result<Self, TunnelRequestError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line_buf = Vec::<u8>::with_capacity(256);

        let (found, nr) = limited_read_until(reader, b'\n', max_header_size, &mut line_buf)
            .await
            .map_err(TunnelRequestError::ReadFailed)?;
        if nr == 0 {
            return Err(TunnelRequestError::RemoteClosed);
        }
        if !found {
            return if nr < max_header_size {
                Err(TunnelRequestError::RemoteClosed)
            } else {
                Err(TunnelResponseError::TooLargeHeader(max_header_size).into())
            };
        }
        let mut header_size = nr;

        let mut rsp = TunnelResponse::build_from_status_line(&line_buf)?;

        loop {
            if header_size >= max_header_size {
                return Err(TunnelResponseError::TooLargeHeader(max_header_size).into());
            }
            line_buf.clear();
            let max_len = max_header_size - header_size;
            let (found, nr) = limited_read_until(reader, b'\n', max_len, &mut line_buf)
                .await
                .map_err(TunnelRequestError::ReadFailed)?;
            if nr == 0 {
                return Err(TunnelRequestError::RemoteClosed);
            }
            if !found {
                return if nr < max_len {
                    Err(TunnelRequestError::RemoteClosed)
                } else {
                    Err(TunnelResponseError::TooLargeHeader(max_header_size).into())
                };
            }
            header_size += nr;
            if (line_buf.len() == 1 && line_buf[0] == b'\n')
                || (line_buf.len() == 2 && line_buf[0] == b'\r' && line_buf[1] == b'\n')
            {
                // header end line
                break;
            }

            rsp.parse_header_line(&line_buf)?;
        }

        Ok(rsp)
    }

    fn build_from_status_line(line_buf: &[u8]) -> Result<Self, TunnelResponseError> {
        let status =
            StatusLine::parse(line_buf).map_err(TunnelResponseError::InvalidStatusLine)?;
        Ok(TunnelResponse::new(
            status.http11,
            status.code,
            status.reason.to_string(),
        ))
    }

    fn parse_header_line(&mut self, line_buf: &[u8]) -> Result<(), TunnelResponseError> {
        let header =
            HeaderLine::parse(line_buf).map_err(TunnelResponseError::InvalidHeaderLine)?;
        self.handle_header(header)
    }

    fn handle_header(&mut self, header: HeaderLine<'_>) -> Result<(), TunnelResponseError> {
        let name = HeaderName::from_str(header.name).map_err(|_| {
            TunnelResponseError::InvalidHeaderLine(LineParseError::InvalidHeaderName)
        })?;

        match name.as_str() {
            "connection" => {
                let v = header.value.to_lowercase();
                if v.contains("close") {
                    self.keep_alive = false;
                } else if v.contains("keep-alive") {
                    self.keep_alive = true;
                }
            }
            "transfer-encoding" => {
                self.has_transfer_encoding = true;
                if self.has_content_length {
                    // chunked transfer wins over content-length
                    self.headers.remove(http::header::CONTENT_LENGTH);
                    self.content_length = 0;
                }

                let v = header.value.to_lowercase();
                if v.ends_with("chunked") {
                    self.chunked_transfer = true;
                } else if v.contains("chunked") {
                    return Err(TunnelResponseError::InvalidChunkedTransferEncoding);
                }
            }
            "content-length" => {
                if self.has_transfer_encoding {
                    // ignore content-length
                    return Ok(());
                }

                let content_length = u64::from_str(header.value)
                    .map_err(|_| TunnelResponseError::InvalidContentLength)?;

                if self.has_content_length && self.content_length != content_length {
                    return Err(TunnelResponseError::InvalidContentLength);
                }
                self.has_content_length = true;
                self.content_length = content_length;
            }
            _ => {}
        }

        let value = HeaderValue::from_str(header.value).map_err(|_| {
            TunnelResponseError::InvalidHeaderLine(LineParseError::InvalidHeaderValue)
        })?;
        self.headers.append(name, value);
        Ok(())
    }

    pub(crate) fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Body framing for responses whose body is an acknowledgement only.
    /// Absent content-length and transfer-encoding there is no body.
    pub(crate) fn body_type(&self) -> Option<HttpBodyType> {
        if self.chunked_transfer {
            Some(HttpBodyType::Chunked)
        } else if self.content_length > 0 {
            Some(HttpBodyType::ContentLength(self.content_length))
        } else {
            None
        }
    }

    /// Body framing for responses that carry tunnel data. Absent
    /// content-length and transfer-encoding the body runs to the close of
    /// the connection.
    pub(crate) fn stream_body_type(&self) -> HttpBodyType {
        if self.chunked_transfer {
            HttpBodyType::Chunked
        } else if self.has_content_length {
            HttpBodyType::ContentLength(self.content_length)
        } else {
            HttpBodyType::ReadUntilEnd
        }
    }

    /// FQDN the proxy reports itself as, if any.
    pub(crate) fn proxy_host(&self) -> Option<&str> {
        self.headers
            .get(header::PROXY_HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True end of the inbound stream, as opposed to a response the proxy
    /// closed to keep intermediaries from timing out.
    pub(crate) fn tunnel_eof(&self) -> bool {
        self.headers.contains_key(header::TUNNEL_EOF)
    }
}
