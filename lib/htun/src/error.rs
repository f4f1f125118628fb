/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use thiserror::Error;

use crate::parse::LineParseError;

#[derive(Debug, Error)]
pub enum TunnelResponseError {
    #[error("too large header, should be less than {0}")]
    TooLargeHeader(usize),
    #[error("invalid status line: {0}")]
    InvalidStatusLine(LineParseError),
    #[error("invalid header line: {0}")]
    InvalidHeaderLine(LineParseError),
    #[error("invalid chunked transfer-encoding")]
    InvalidChunkedTransferEncoding,
    #[error("invalid content length")]
    InvalidContentLength,
}

#[derive(Debug, Error)]
pub enum TunnelRequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(http::Error),
    #[error("dial failed: {0:?}")]
    DialFailed(io::Error),
    #[error("write failed: {0:?}")]
    WriteFailed(io::Error),
    #[error("read failed: {0:?}")]
    ReadFailed(io::Error),
    #[error("remote closed")]
    RemoteClosed,
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] TunnelResponseError),
    #[error("unexpected status code {0}")]
    UnexpectedStatusCode(u16),
}

#[derive(Debug, Error)]
pub enum TunnelProtocolError {
    #[error("no proxy host reported on first response")]
    MissingProxyHost,
    #[error("unexpected body on end-of-stream response")]
    UnexpectedEofBody,
}

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("connection closed")]
    Closed,
    #[error("request failed: {0}")]
    Request(#[from] TunnelRequestError),
    #[error("protocol violation: {0}")]
    Protocol(#[from] TunnelProtocolError),
    #[error("not supported: {0}")]
    Unsupported(&'static str),
}
