//! Simple client that opens a session, sends messages and prints replies.
//!
//! Run the server first:
//! - cargo run -p tether --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p tether --example client -- 127.0.0.1 7777
//! - cargo run -p tether --example client -- 127.0.0.1 7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    thread,
    time::{Duration, Instant},
};

use tether::{Client, MessageBufferPool, SendMode, SocketEvent};
use tether_utilities::parse_ip;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Args: <server_ip> <server_port> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().unwrap_or_else(|| "7777".into()).parse()?;
    let count: usize = args.next().unwrap_or_else(|| "5".into()).parse().unwrap_or(5);
    let interval_ms: u64 = args
        .next()
        .unwrap_or_else(|| "300".into())
        .parse()
        .unwrap_or(300);

    let server_addr = parse_ip(&ip, port)?;
    let mut client = Client::connect(server_addr, b"example client", Duration::from_secs(5))?;
    println!(
        "Tether client {} connected to {} (rtt estimate {:.0}ms)",
        client.local_addr()?,
        server_addr,
        client.rtt_estimate_ms()
    );

    let mut pool = MessageBufferPool::new(Some(SendMode::Reliable), 256);

    for i in 0..count {
        let mut buffer = pool.rent()?;
        buffer.write_string(&format!("hello {}", i))?;
        client.send(&buffer)?;
        pool.release(buffer);

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);

        while start.elapsed() < wait {
            client.manual_poll(Instant::now());

            while let Some(event) = client.recv() {
                match event {
                    SocketEvent::Message { payload, mode, .. } => {
                        let mut reply = tether::MessageBuffer::from_bytes(&payload);
                        println!(
                            "[reply] mode={:?} payload=\"{}\"",
                            mode,
                            reply.read_string().unwrap_or_default()
                        );
                    }
                    SocketEvent::Disconnect { reason, .. } => {
                        println!("[disconnect] {}", reason);
                        return Ok(());
                    }
                    SocketEvent::Connect { .. } => {}
                }
            }

            thread::sleep(Duration::from_millis(10));
        }
    }

    client.disconnect(None)?;
    println!("done");
    Ok(())
}
