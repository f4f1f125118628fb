/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use bytes::Bytes;
use http::Method;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::body::{HttpBodyReader, HttpBodyType};
use crate::connect::BoxAsyncStream;
use crate::error::{TunnelError, TunnelProtocolError, TunnelRequestError};
use crate::log_msg;
use crate::response::TunnelResponse;

use super::{proxy_stream, ConnShared, SavedConnection};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// The response currently being read from, kept across submissions until
/// its body is exhausted.
struct InboundBody {
    host: String,
    keep_alive: bool,
    reader: HttpBodyReader<BufReader<BoxAsyncStream>>,
}

/// Fills caller read submissions from the body of the current poll
/// response, issuing a fresh GET whenever the proxy has closed the previous
/// response without signalling the end of the stream.
pub(super) struct ReadProcessor {
    shared: Arc<ConnShared>,
    submit_rx: mpsc::Receiver<usize>,
    rsp_tx: mpsc::Sender<Result<Bytes, TunnelError>>,
    stop_rx: oneshot::Receiver<()>,
    saved: Option<SavedConnection>,
    current: Option<InboundBody>,
}

impl ReadProcessor {
    pub(super) fn new(
        shared: Arc<ConnShared>,
        submit_rx: mpsc::Receiver<usize>,
        rsp_tx: mpsc::Sender<Result<Bytes, TunnelError>>,
        stop_rx: oneshot::Receiver<()>,
    ) -> Self {
        ReadProcessor {
            shared,
            submit_rx,
            rsp_tx,
            stop_rx,
            saved: None,
            current: None,
        }
    }

    pub(super) async fn into_running(mut self) {
        loop {
            let want = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                r = self.submit_rx.recv() => match r {
                    Some(want) => want,
                    None => break,
                },
            };
            let fetched = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                r = Self::fetch(&self.shared, &mut self.saved, &mut self.current, want) => r,
            };
            match fetched {
                Ok(Some(data)) => {
                    self.shared.touch();
                    self.shared.stats.add_read_bytes(data.len() as u64);
                    if self.rsp_tx.send(Ok(data)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    // the remote end closed for real
                    let _ = self.rsp_tx.send(Ok(Bytes::new())).await;
                    break;
                }
                Err(e) => {
                    let fatal = matches!(e, TunnelError::Protocol(_));
                    if fatal {
                        log_msg!("conn {} read pipeline failed: {}", self.shared.id, e);
                    }
                    if self.rsp_tx.send(Err(e)).await.is_err() {
                        break;
                    }
                    if fatal {
                        self.shared.close();
                        break;
                    }
                    // transport errors recover: the next submission issues
                    // a fresh GET over a fresh connection
                }
            }
        }
    }

    /// Produce the next stretch of inbound bytes. `Ok(None)` is the true
    /// end of the stream. A clean response-body end without the EOF header
    /// loops straight into the next GET; callers never see it.
    async fn fetch(
        shared: &ConnShared,
        saved: &mut Option<SavedConnection>,
        current: &mut Option<InboundBody>,
        want: usize,
    ) -> Result<Option<Bytes>, TunnelError> {
        let max = want.min(READ_CHUNK_SIZE);
        loop {
            match current.take() {
                None => match Self::next_response(shared, saved).await? {
                    Some(inbound) => *current = Some(inbound),
                    None => return Ok(None),
                },
                Some(mut inbound) => {
                    let data = match inbound.reader.read_data(max).await {
                        Ok(data) => data,
                        Err(e) => return Err(TunnelRequestError::ReadFailed(e).into()),
                    };
                    if !data.is_empty() {
                        *current = Some(inbound);
                        return Ok(Some(data));
                    }
                    // this response is exhausted; the proxy paused the
                    // stream to keep intermediaries from timing out
                    if inbound.keep_alive {
                        *saved = Some(SavedConnection {
                            host: inbound.host,
                            stream: inbound.reader.into_inner(),
                        });
                    }
                }
            }
        }
    }

    /// Issue one GET and classify its response: data to read from, or the
    /// end-of-stream marker.
    async fn next_response(
        shared: &ConnShared,
        saved: &mut Option<SavedConnection>,
    ) -> Result<Option<InboundBody>, TunnelError> {
        let target = shared.target_host().to_string();
        let head = shared.build_request_head(&Method::GET, &target)?;
        let mut stream = proxy_stream(shared, saved, &target).await?;

        stream
            .write_all(&head)
            .await
            .map_err(TunnelRequestError::WriteFailed)?;
        stream
            .flush()
            .await
            .map_err(TunnelRequestError::WriteFailed)?;

        let rsp = TunnelResponse::recv(&mut stream, shared.config.max_header_size).await?;
        if rsp.code != 200 {
            return Err(TunnelRequestError::UnexpectedStatusCode(rsp.code).into());
        }
        shared.stats.add_get_request();

        if rsp.tunnel_eof() {
            // the end-of-stream response must not carry data
            if let Some(body_type) = rsp.body_type() {
                let mut body_reader = HttpBodyReader::new(&mut stream, body_type);
                let drained = body_reader
                    .drain()
                    .await
                    .map_err(TunnelRequestError::ReadFailed)?;
                if drained > 0 {
                    return Err(TunnelProtocolError::UnexpectedEofBody.into());
                }
            }
            return Ok(None);
        }

        let body_type = rsp.stream_body_type();
        let keep_alive = rsp.keep_alive() && body_type != HttpBodyType::ReadUntilEnd;
        Ok(Some(InboundBody {
            host: target,
            keep_alive,
            reader: HttpBodyReader::new(stream, body_type),
        }))
    }
}
