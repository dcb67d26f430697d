//! Echo server: accepts sessions and echoes every message back reliably.
//!
//! Run with:
//! - cargo run -p tether --example server -- 127.0.0.1:7777

use std::{env, time::Instant};

use tether::{OutboundMessage, SendMode, Server, SocketEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let bind_addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:7777".to_string());

    let mut server = Server::bind(&bind_addr[..])?;
    println!("Tether server listening on {}", server.local_addr()?);

    loop {
        server.manual_poll(Instant::now());

        while let Some(event) = server.recv() {
            match event {
                SocketEvent::Connect { address, handshake } => {
                    println!(
                        "[connect] {} handshake=\"{}\"",
                        address,
                        String::from_utf8_lossy(&handshake)
                    );
                }
                SocketEvent::Message { address, payload, mode } => {
                    println!(
                        "[message] from={} mode={:?} payload=\"{}\"",
                        address,
                        mode,
                        String::from_utf8_lossy(&payload)
                    );
                    server.send(OutboundMessage::new(address, payload, SendMode::Reliable))?;
                }
                SocketEvent::Disconnect { address, reason, payload } => {
                    println!(
                        "[disconnect] {} reason=\"{}\" payload={:?}",
                        address,
                        reason,
                        payload.map(|p| String::from_utf8_lossy(&p).into_owned())
                    );
                }
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
