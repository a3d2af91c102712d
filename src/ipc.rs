//! Daemon side: the frame worker, the dispatch layer and the Unix-socket
//! command surface, plus the client helper the CLI talks through.

mod dispatch;
mod pipeline;
mod runtime;
mod server;

use anyhow::{Result, anyhow};
use serde_json::Value;
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
};

pub use pipeline::replay;
pub use server::run_daemon;

/// Sends one JSON request line and reads one JSON response line.
pub fn client_request(req: Value) -> Result<Value> {
    let sock = runtime::socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "handctl daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(&sock)
        .map_err(|e| anyhow!("failed to connect to {}: {e}", sock.display()))?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    if resp.trim().is_empty() {
        return Err(anyhow!("daemon closed the connection without replying"));
    }
    Ok(serde_json::from_str(&resp)?)
}
