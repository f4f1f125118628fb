/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::{TunnelError, TunnelProtocolError, TunnelRequestError};
use crate::log_msg;
use crate::response::TunnelResponse;

use super::request::OutboundBody;
use super::ConnShared;

const REQUEST_PIPE_DEPTH: usize = 8;

enum RequestOutcome {
    /// The request was finalized, wait for the next submission.
    Continue,
    /// Stop observed or the conn handle went away.
    Terminate,
    /// The write pipeline is broken beyond recovery; close the conn.
    Fatal(TunnelError),
}

/// Feeds caller write submissions into the body of whichever outbound
/// request is currently open, finalizing the request once the writer has
/// been quiet for `idle_interval`.
pub(super) struct WriteProcessor {
    shared: Arc<ConnShared>,
    submit_rx: mpsc::Receiver<Bytes>,
    ack_tx: mpsc::Sender<Result<usize, TunnelError>>,
    issue_tx: mpsc::Sender<OutboundBody>,
    stop_rx: oneshot::Receiver<()>,
}

impl WriteProcessor {
    pub(super) fn new(
        shared: Arc<ConnShared>,
        submit_rx: mpsc::Receiver<Bytes>,
        ack_tx: mpsc::Sender<Result<usize, TunnelError>>,
        issue_tx: mpsc::Sender<OutboundBody>,
        stop_rx: oneshot::Receiver<()>,
    ) -> Self {
        WriteProcessor {
            shared,
            submit_rx,
            ack_tx,
            issue_tx,
            stop_rx,
        }
    }

    pub(super) async fn into_running(mut self) {
        loop {
            let first = tokio::select! {
                biased;
                _ = &mut self.stop_rx => break,
                r = self.submit_rx.recv() => match r {
                    Some(data) => data,
                    None => break,
                },
            };
            match self.serve_request(first).await {
                RequestOutcome::Continue => {}
                RequestOutcome::Terminate => break,
                RequestOutcome::Fatal(e) => {
                    log_msg!("conn {} write pipeline failed: {}", self.shared.id, e);
                    self.shared.close();
                    break;
                }
            }
        }
        // dropping ack_tx here delivers end-of-stream to pending callers
    }

    /// Open one outbound request seeded with `first` and keep feeding it
    /// until the writer goes idle, the conn stops, or the request breaks.
    async fn serve_request(&mut self, first: Bytes) -> RequestOutcome {
        let (pipe_tx, pipe_rx) = mpsc::channel(REQUEST_PIPE_DEPTH);
        let (report_tx, mut report_rx) = oneshot::channel();
        if self
            .issue_tx
            .send(OutboundBody {
                chunks: pipe_rx,
                report: report_tx,
            })
            .await
            .is_err()
        {
            return RequestOutcome::Terminate;
        }

        let mut pending = Some(first);
        loop {
            if let Some(data) = pending.take() {
                let len = data.len();
                // a zero length chunk would end the request body early
                if len > 0 && pipe_tx.send(data).await.is_err() {
                    // the request died under us; recover the real error
                    let err = match (&mut report_rx).await {
                        Ok(Err(e)) => TunnelError::Request(e),
                        Ok(Ok(_)) => TunnelError::Request(TunnelRequestError::RemoteClosed),
                        Err(_) => TunnelError::Closed,
                    };
                    let _ = self.ack_tx.send(Err(err)).await;
                    self.shared.close();
                    return RequestOutcome::Terminate;
                }
                self.shared.touch();
                self.shared.stats.add_write_bytes(len as u64);
                if self.ack_tx.send(Ok(len)).await.is_err() {
                    return RequestOutcome::Terminate;
                }
            }

            tokio::select! {
                biased;
                _ = &mut self.stop_rx => return RequestOutcome::Terminate,
                r = self.submit_rx.recv() => match r {
                    Some(data) => pending = Some(data),
                    None => return RequestOutcome::Terminate,
                },
                _ = tokio::time::sleep(self.shared.config.idle_interval) => {
                    // writer went quiet: finalize the request body so the
                    // proxy can flush what we have accumulated
                    drop(pipe_tx);
                    return self.finalize(report_rx).await;
                }
            }
        }
    }

    async fn finalize(
        &mut self,
        report_rx: oneshot::Receiver<Result<TunnelResponse, TunnelRequestError>>,
    ) -> RequestOutcome {
        tokio::select! {
            biased;
            _ = &mut self.stop_rx => RequestOutcome::Terminate,
            r = report_rx => match r {
                Ok(Ok(rsp)) => {
                    if !self.shared.proxy_host_pinned() {
                        match rsp.proxy_host() {
                            Some(host) => self.shared.pin_proxy_host(host),
                            None => {
                                return RequestOutcome::Fatal(
                                    TunnelProtocolError::MissingProxyHost.into(),
                                );
                            }
                        }
                    }
                    RequestOutcome::Continue
                }
                Ok(Err(e)) => RequestOutcome::Fatal(e.into()),
                Err(_) => RequestOutcome::Terminate,
            },
        }
    }
}
