//! Thin blocking client for the control plane.
//!
//! One TCP connection per call: write one request line, read one response
//! line. There is no retry policy; callers that want one build it on top.

use crate::protocol::{ToolRequest, ToolResponse};
use anyhow::{Context, Result, bail};
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

/// Send `request` to the control plane on `port` and wait for its response.
///
/// `timeout` bounds the connect, the write and the read separately.
///
/// # Errors
///
/// Returns an error if the connection cannot be established, the server
/// closes the connection without answering, or the answer is not a valid
/// [`ToolResponse`].
pub fn send_request(port: u16, request: &ToolRequest, timeout: Duration) -> Result<ToolResponse> {
    let stream = TcpStream::connect_timeout(&loopback(port), timeout)
        .with_context(|| format!("failed to connect to control plane on port {port}"))?;
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();

    let request_line = serde_json::to_string(request)?;
    {
        let mut writer = std::io::BufWriter::new(&stream);
        writer.write_all(request_line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    let read = reader
        .read_line(&mut response_line)
        .context("failed to read control plane response")?;
    if read == 0 {
        bail!("control plane on port {port} closed the connection without a response");
    }

    serde_json::from_str(response_line.trim()).context("control plane sent an invalid response")
}

/// Invoke `tool` with `arguments` on the control plane listening on `port`.
pub fn call_tool(
    port: u16,
    tool: &str,
    arguments: serde_json::Value,
    timeout: Duration,
) -> Result<ToolResponse> {
    send_request(port, &ToolRequest::new(tool, arguments), timeout)
}

/// `true` if something accepts TCP connections on the loopback `port`.
pub fn probe_port(port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&loopback(port), timeout).is_ok()
}
