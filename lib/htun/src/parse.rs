/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::str::Utf8Error;

use atoi::{FromRadix10, FromRadix16};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LineParseError {
    #[error("not long enough")]
    NotLongEnough,
    #[error("invalid utf-8 encoding: {0}")]
    InvalidUtf8Encoding(#[from] Utf8Error),
    #[error("no delimiter '{0}' found")]
    NoDelimiterFound(char),
    #[error("invalid header name")]
    InvalidHeaderName,
    #[error("invalid header value")]
    InvalidHeaderValue,
    #[error("invalid version")]
    InvalidVersion,
    #[error("invalid status code")]
    InvalidStatusCode,
    #[error("invalid chunk size")]
    InvalidChunkSize,
}

pub(crate) struct StatusLine<'a> {
    pub(crate) http11: bool,
    pub(crate) code: u16,
    pub(crate) reason: &'a str,
}

impl<'a> StatusLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<StatusLine<'a>, LineParseError> {
        const MINIMAL_LENGTH: usize = 13; // HTTP/1.x XYZ\n

        if buf.len() < MINIMAL_LENGTH {
            return Err(LineParseError::NotLongEnough);
        }

        let Some(p) = memchr::memchr(b' ', buf) else {
            return Err(LineParseError::NoDelimiterFound(' '));
        };
        // the tunnel only ever speaks HTTP/1.x
        let http11 = match &buf[0..p] {
            b"HTTP/1.1" => true,
            b"HTTP/1.0" => false,
            _ => return Err(LineParseError::InvalidVersion),
        };

        let left = &buf[p + 1..];
        let (code, len) = u16::from_radix_10(left);
        if len != 3 {
            return Err(LineParseError::InvalidStatusCode);
        }

        if left.len() < len + 1 {
            return Err(LineParseError::NotLongEnough);
        }
        let reason = std::str::from_utf8(&left[len + 1..])?.trim();

        Ok(StatusLine {
            http11,
            code,
            reason,
        })
    }
}

pub(crate) struct HeaderLine<'a> {
    pub(crate) name: &'a str,
    pub(crate) value: &'a str,
}

impl<'a> HeaderLine<'a> {
    pub(crate) fn parse(buf: &'a [u8]) -> Result<HeaderLine<'a>, LineParseError> {
        let line = std::str::from_utf8(buf)?;
        let Some(p) = memchr::memchr(b':', line.as_bytes()) else {
            return Err(LineParseError::NoDelimiterFound(':'));
        };

        let name = line[0..p].trim();
        let value = line[p + 1..].trim();

        Ok(HeaderLine { name, value })
    }
}

/// Parse a chunk-size line. Chunk extensions are accepted and ignored.
pub(crate) fn chunk_size(buf: &[u8]) -> Result<u64, LineParseError> {
    let (size, offset) = u64::from_radix_16(buf);
    if offset == 0 {
        return Err(LineParseError::InvalidChunkSize);
    }

    match buf.get(offset) {
        Some(b'\r') | Some(b'\n') | Some(b';') => Ok(size),
        _ => Err(LineParseError::InvalidChunkSize),
    }
}
