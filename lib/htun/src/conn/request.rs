/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::body::HttpBodyReader;
use crate::error::TunnelRequestError;
use crate::response::TunnelResponse;

use super::{proxy_stream, ConnShared, SavedConnection};

/// One outbound request body handed over by the write processor: the
/// consumer end of the body pipe plus the channel the response head (or
/// failure) is reported back on.
pub(super) struct OutboundBody {
    pub(super) chunks: mpsc::Receiver<Bytes>,
    pub(super) report: oneshot::Sender<Result<TunnelResponse, TunnelRequestError>>,
}

/// Turns each body pipe into exactly one POST against the proxy. POST
/// response bodies never carry tunnel data; they are drained and used only
/// for acknowledgement and proxy host pinning.
pub(super) struct RequestIssuer {
    shared: Arc<ConnShared>,
    issue_rx: mpsc::Receiver<OutboundBody>,
    stop_rx: oneshot::Receiver<()>,
    saved: Option<SavedConnection>,
}

impl RequestIssuer {
    pub(super) fn new(
        shared: Arc<ConnShared>,
        issue_rx: mpsc::Receiver<OutboundBody>,
        stop_rx: oneshot::Receiver<()>,
    ) -> Self {
        RequestIssuer {
            shared,
            issue_rx,
            stop_rx,
            saved: None,
        }
    }

    pub(super) async fn into_running(mut self) {
        loop {
            let job = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                r = self.issue_rx.recv() => match r {
                    Some(job) => job,
                    None => break,
                },
            };
            let OutboundBody { chunks, report } = job;
            tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                r = Self::send_request(&self.shared, &mut self.saved, chunks) => {
                    let _ = report.send(r);
                }
            }
        }
        // dropping a pending report wakes the write processor with a stop
    }

    async fn send_request(
        shared: &ConnShared,
        saved: &mut Option<SavedConnection>,
        mut chunks: mpsc::Receiver<Bytes>,
    ) -> Result<TunnelResponse, TunnelRequestError> {
        let target = shared.target_host().to_string();
        let head = shared.build_request_head(&Method::POST, &target)?;
        let mut stream = proxy_stream(shared, saved, &target).await?;

        stream
            .write_all(&head)
            .await
            .map_err(TunnelRequestError::WriteFailed)?;

        // one chunk per pipe message; the pipe closing ends the body
        while let Some(data) = chunks.recv().await {
            let chunk_head = format!("{:x}\r\n", data.len());
            stream
                .write_all(chunk_head.as_bytes())
                .await
                .map_err(TunnelRequestError::WriteFailed)?;
            stream
                .write_all(&data)
                .await
                .map_err(TunnelRequestError::WriteFailed)?;
            stream
                .write_all(b"\r\n")
                .await
                .map_err(TunnelRequestError::WriteFailed)?;
        }
        stream
            .write_all(b"0\r\n\r\n")
            .await
            .map_err(TunnelRequestError::WriteFailed)?;
        stream
            .flush()
            .await
            .map_err(TunnelRequestError::WriteFailed)?;

        let rsp = TunnelResponse::recv(&mut stream, shared.config.max_header_size).await?;
        if let Some(body_type) = rsp.body_type() {
            let mut body_reader = HttpBodyReader::new(&mut stream, body_type);
            body_reader
                .drain()
                .await
                .map_err(TunnelRequestError::ReadFailed)?;
        }
        if rsp.code != 200 {
            return Err(TunnelRequestError::UnexpectedStatusCode(rsp.code));
        }

        shared.stats.add_post_request();
        if rsp.keep_alive() {
            *saved = Some(SavedConnection {
                host: target,
                stream,
            });
        }
        Ok(rsp)
    }
}
