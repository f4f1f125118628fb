/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io;

use async_trait::async_trait;
use http::{Method, Request};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait AsyncStream: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncStream for T {}

pub type BoxAsyncStream = Box<dyn AsyncStream + Send + Unpin>;

/// Collaborators injected into a tunnel connection: how to reach the proxy
/// and how to shape the requests sent to it.
///
/// `new_request` exists so callers can inject authentication headers, a
/// fronting path, and the like; the tunnel appends its own control headers
/// and performs the wire serialization itself. The request body is always
/// supplied by the tunnel.
#[async_trait]
pub trait TunnelConnectionProvider: Send + Sync {
    async fn new_connection(&self, proxy_addr: &str) -> io::Result<BoxAsyncStream>;

    fn new_request(&self, proxy_addr: &str, method: Method) -> Result<Request<()>, http::Error> {
        Request::builder()
            .method(method)
            .uri(format!("http://{proxy_addr}/"))
            .body(())
    }
}

/// Plain TCP provider. Proxy addresses without an explicit port get
/// `default_port` appended.
pub struct TcpConnectionProvider {
    default_port: u16,
}

impl TcpConnectionProvider {
    pub fn new(default_port: u16) -> Self {
        TcpConnectionProvider { default_port }
    }

    fn addr_with_port(&self, proxy_addr: &str) -> String {
        if proxy_addr.contains(':') {
            proxy_addr.to_string()
        } else {
            format!("{proxy_addr}:{}", self.default_port)
        }
    }
}

impl Default for TcpConnectionProvider {
    fn default() -> Self {
        TcpConnectionProvider::new(80)
    }
}

#[async_trait]
impl TunnelConnectionProvider for TcpConnectionProvider {
    async fn new_connection(&self, proxy_addr: &str) -> io::Result<BoxAsyncStream> {
        let stream = TcpStream::connect(self.addr_with_port(proxy_addr)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
