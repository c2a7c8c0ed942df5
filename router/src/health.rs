// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The balancer's HTTP health probe responder.

use crate::config::{HEALTH_READ_LIMIT, HEALTH_READ_TIMEOUT};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, warn};

fn http_response() -> String {
    let body = "Healthy\n";
    format!(
        "HTTP/1.1 200 OK\n\
         Content-Type: text/html; charset=utf-8\n\
         Content-Length: {len}\n\
         Connection: close\n\
         \n\
         {body}",
        len = body.len()
    )
}

/// Accept and answer every probe currently queued on the listener.
pub(crate) fn serve_probes(listener: &TcpListener) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => answer_probe(stream, peer),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("health probe accept failed: {e}");
                break;
            }
        }
    }
}

/// Read (and ignore) up to 1024 request bytes with a one second deadline,
/// then reply with a fixed 200. The connection closes on drop either way.
fn answer_probe(mut stream: TcpStream, peer: SocketAddr) {
    let deadline = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(HEALTH_READ_TIMEOUT)));
    if let Err(e) = deadline {
        warn!("failed to arm read deadline for health probe from {peer}: {e}");
        return;
    }
    let mut request = [0u8; HEALTH_READ_LIMIT];
    match stream.read(&mut request) {
        Ok(_) => {
            debug!("health check request from {peer}");
            if let Err(e) = stream.write_all(http_response().as_bytes()) {
                warn!("health check reply to {peer} failed: {e}");
            }
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            warn!("health check from {peer} timed out before sending a request");
        }
        Err(e) => warn!("health check read from {peer} failed: {e}"),
    }
}
