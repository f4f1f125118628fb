/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! Wire names of the tunnel control headers.
//!
//! Requests carry the connection id and destination address on every
//! exchange; the pinned proxy host is echoed back once it is known. The
//! EOF header on a poll response marks the true end of the inbound stream
//! as opposed to a response the proxy closed to stay below intermediary
//! timeouts.

/// Opaque per-connection identifier, client to proxy.
pub const CONNECTION_ID: &str = "X-HTTPConn-Id";

/// host:port of the destination server, client to proxy.
pub const DEST_ADDR: &str = "X-HTTPConn-Dest-Addr";

/// Pinned proxy FQDN, proxy to client on the first response, then echoed
/// client to proxy on all following requests.
pub const PROXY_HOST: &str = "X-HTTPConn-Proxy-Host";

/// End of the inbound stream, proxy to client on the final poll response.
pub const TUNNEL_EOF: &str = "X-HTTPConn-EOF";
