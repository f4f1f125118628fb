/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use tokio::io::BufReader;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::TunnelConfig;
use crate::connect::{BoxAsyncStream, TunnelConnectionProvider};
use crate::error::{TunnelError, TunnelRequestError};
use crate::header;
use crate::stats::TunnelStats;
use crate::log_msg;

mod read;
mod request;
mod write;

use read::ReadProcessor;
use request::{OutboundBody, RequestIssuer};
use write::WriteProcessor;

/// Supervisory state shared by the caller-facing handle and the pipeline
/// tasks. Nothing in here is held across an await point.
pub(crate) struct ConnShared {
    id: String,
    dest_addr: String,
    initial_proxy: String,
    proxy_host: OnceLock<String>,
    last_activity: RwLock<Instant>,
    closed: watch::Sender<bool>,
    stop_txs: Mutex<Option<[oneshot::Sender<()>; 3]>>,
    provider: Arc<dyn TunnelConnectionProvider>,
    config: TunnelConfig,
    stats: Arc<TunnelStats>,
}

impl ConnShared {
    /// The proxy FQDN every request must go to: the pinned host once the
    /// proxy has reported one, the originally dialed name before that.
    pub(crate) fn target_host(&self) -> &str {
        self.proxy_host
            .get()
            .map(|s| s.as_str())
            .unwrap_or(self.initial_proxy.as_str())
    }

    pub(crate) fn proxy_host_pinned(&self) -> bool {
        self.proxy_host.get().is_some()
    }

    pub(crate) fn pin_proxy_host(&self, host: &str) {
        if self.proxy_host.set(host.to_string()).is_ok() {
            log_msg!("conn {} pinned to proxy host {}", self.id, host);
        }
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.write().unwrap() = Instant::now();
    }

    fn idle_time(&self) -> Duration {
        self.last_activity.read().unwrap().elapsed()
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Idempotent. The stop senders are taken out under the mutex but only
    /// fired after it is released.
    pub(crate) fn close(&self) {
        let newly_closed = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !newly_closed {
            return;
        }

        let stops = self.stop_txs.lock().unwrap().take();
        if let Some(stops) = stops {
            for stop_tx in stops {
                let _ = stop_tx.send(());
            }
        }
    }

    /// Serialize the head of a tunnel request to `target`. The provider's
    /// request builder contributes method routing and any caller headers;
    /// the tunnel control headers and body framing are appended here.
    pub(crate) fn build_request_head(
        &self,
        method: &Method,
        target: &str,
    ) -> Result<Vec<u8>, TunnelRequestError> {
        let req = self
            .provider
            .new_request(target, method.clone())
            .map_err(TunnelRequestError::InvalidRequest)?;
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut head = Vec::<u8>::with_capacity(256);
        head.extend_from_slice(format!("{method} {path} HTTP/1.1\r\n").as_bytes());
        head.extend_from_slice(format!("Host: {target}\r\n").as_bytes());
        head.extend_from_slice(b"Connection: keep-alive\r\n");
        for (name, value) in req.headers() {
            if name == &http::header::HOST {
                continue;
            }
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(format!("{}: {}\r\n", header::CONNECTION_ID, self.id).as_bytes());
        head.extend_from_slice(format!("{}: {}\r\n", header::DEST_ADDR, self.dest_addr).as_bytes());
        if let Some(pinned) = self.proxy_host.get() {
            head.extend_from_slice(format!("{}: {}\r\n", header::PROXY_HOST, pinned).as_bytes());
        }
        if *method == Method::POST {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        head.extend_from_slice(b"\r\n");
        Ok(head)
    }
}

/// A proxy connection kept alive after a fully read response, eligible for
/// the next request to the same host.
pub(crate) struct SavedConnection {
    pub(crate) host: String,
    pub(crate) stream: BufReader<BoxAsyncStream>,
}

/// Take the saved connection if it still points at `target`, dial a fresh
/// one otherwise.
pub(crate) async fn proxy_stream(
    shared: &ConnShared,
    saved: &mut Option<SavedConnection>,
    target: &str,
) -> Result<BufReader<BoxAsyncStream>, TunnelRequestError> {
    if let Some(conn) = saved.take() {
        if conn.host == target {
            return Ok(conn.stream);
        }
    }
    let stream = shared
        .provider
        .new_connection(target)
        .await
        .map_err(TunnelRequestError::DialFailed)?;
    Ok(BufReader::new(stream))
}

/// One logical duplex byte stream tunneled over sequential HTTP requests.
///
/// Outbound bytes are pipelined into POST request bodies, each finalized
/// after `idle_interval` of writer silence; inbound bytes are polled out of
/// GET response bodies. Intermediaries that refuse streaming bodies only
/// ever see complete request/response pairs, yet callers get a socket-like
/// contract: in-order bytes, explicit close, end-of-stream reads.
pub struct TunnelConn {
    shared: Arc<ConnShared>,
    write_req_tx: mpsc::Sender<Bytes>,
    write_rsp_rx: mpsc::Receiver<Result<usize, TunnelError>>,
    read_req_tx: mpsc::Sender<usize>,
    read_rsp_rx: mpsc::Receiver<Result<Bytes, TunnelError>>,
    tasks: Vec<JoinHandle<()>>,
}

impl TunnelConn {
    /// Set up a tunnel to `dest_addr` through the proxy at `proxy_addr`.
    /// The pipeline tasks start immediately; the first proxy request is
    /// issued on demand by the first read or write.
    pub fn new(
        dest_addr: impl Into<String>,
        proxy_addr: impl Into<String>,
        provider: Arc<dyn TunnelConnectionProvider>,
        mut config: TunnelConfig,
    ) -> Self {
        config.sanitize();

        let (stop_write_tx, stop_write_rx) = oneshot::channel();
        let (stop_request_tx, stop_request_rx) = oneshot::channel();
        let (stop_read_tx, stop_read_rx) = oneshot::channel();
        let (closed_tx, _) = watch::channel(false);

        let shared = Arc::new(ConnShared {
            id: Uuid::new_v4().to_string(),
            dest_addr: dest_addr.into(),
            initial_proxy: proxy_addr.into(),
            proxy_host: OnceLock::new(),
            last_activity: RwLock::new(Instant::now()),
            closed: closed_tx,
            stop_txs: Mutex::new(Some([stop_write_tx, stop_request_tx, stop_read_tx])),
            provider,
            config,
            stats: Arc::new(TunnelStats::default()),
        });

        let (write_req_tx, write_req_rx) = mpsc::channel(config.write_queue_depth);
        let (write_rsp_tx, write_rsp_rx) = mpsc::channel(1);
        let (read_req_tx, read_req_rx) = mpsc::channel(1);
        let (read_rsp_tx, read_rsp_rx) = mpsc::channel(1);
        let (issue_tx, issue_rx) = mpsc::channel::<OutboundBody>(1);

        let mut tasks = Vec::with_capacity(4);
        tasks.push(tokio::spawn(
            WriteProcessor::new(shared.clone(), write_req_rx, write_rsp_tx, issue_tx, stop_write_rx)
                .into_running(),
        ));
        tasks.push(tokio::spawn(
            RequestIssuer::new(shared.clone(), issue_rx, stop_request_rx).into_running(),
        ));
        tasks.push(tokio::spawn(
            ReadProcessor::new(shared.clone(), read_req_rx, read_rsp_tx, stop_read_rx)
                .into_running(),
        ));
        tasks.push(tokio::spawn(idle_watch(shared.clone())));

        TunnelConn {
            shared,
            write_req_tx,
            write_rsp_rx,
            read_req_tx,
            read_rsp_rx,
            tasks,
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn dest_addr(&self) -> &str {
        &self.shared.dest_addr
    }

    /// The proxy FQDN this conn is pinned to, once known.
    pub fn proxy_host(&self) -> Option<&str> {
        self.shared.proxy_host.get().map(|s| s.as_str())
    }

    pub fn stats(&self) -> Arc<TunnelStats> {
        self.shared.stats.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Queue `buf` for the tunnel and wait for the handoff acknowledgement.
    /// Consecutive writes less than `idle_interval` apart share one POST.
    /// Fails with [`TunnelError::Closed`] once the conn is closed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, TunnelError> {
        if self
            .write_req_tx
            .send(Bytes::copy_from_slice(buf))
            .await
            .is_err()
        {
            return Err(TunnelError::Closed);
        }
        match self.write_rsp_rx.recv().await {
            Some(r) => r,
            None => Err(TunnelError::Closed),
        }
    }

    /// Read tunneled bytes into `buf`. Returns `Ok(0)` only at the true end
    /// of the inbound stream or after the conn is closed; the proxy closing
    /// individual poll responses is invisible here.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read_req_tx.send(buf.len()).await.is_err() {
            return Ok(0);
        }
        match self.read_rsp_rx.recv().await {
            Some(Ok(data)) => {
                let len = data.len();
                buf[..len].copy_from_slice(&data);
                Ok(len)
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    /// Close the conn. Idempotent; pending reads and writes observe
    /// end-of-stream, the pipeline tasks stop and release their sockets.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TunnelError> {
        Err(TunnelError::Unsupported("local_addr"))
    }

    pub fn peer_addr(&self) -> Result<std::net::SocketAddr, TunnelError> {
        Err(TunnelError::Unsupported("peer_addr"))
    }

    pub fn set_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Err(TunnelError::Unsupported("set_deadline"))
    }

    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Err(TunnelError::Unsupported("set_read_deadline"))
    }

    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<(), TunnelError> {
        Err(TunnelError::Unsupported("set_write_deadline"))
    }
}

impl Drop for TunnelConn {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Self-destruct watchdog: closes the conn once no read or write activity
/// has been seen for `idle_timeout`, so abandoned tunnels do not pin proxy
/// resources forever.
async fn idle_watch(shared: Arc<ConnShared>) {
    let mut closed_rx = shared.closed.subscribe();
    loop {
        if *closed_rx.borrow() {
            break;
        }
        let idle = shared.idle_time();
        let timeout = shared.config.idle_timeout;
        if idle >= timeout {
            log_msg!("conn {} closed after {:?} idle", shared.id, idle);
            shared.close();
            break;
        }
        tokio::select! {
            biased;
            r = closed_rx.changed() => {
                if r.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(timeout - idle) => {}
        }
    }
}
