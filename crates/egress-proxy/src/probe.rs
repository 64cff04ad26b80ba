//! Liveness probes for the SOCKS5 listener

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// SOCKS5 greeting: version 5, one method, "no authentication".
pub const SOCKS5_GREETING: [u8; 3] = [0x05, 0x01, 0x00];

/// Whether a TCP connection to `addr` succeeds within `timeout`.
pub async fn port_open(addr: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Whether `addr` answers the SOCKS5 greeting with `05 00` within `timeout`.
///
/// The connection is dropped right after the method selection reply.
pub async fn socks5_handshake(addr: &str, timeout: Duration) -> bool {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&SOCKS5_GREETING).await?;
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await?;
        Ok::<_, std::io::Error>(reply)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(reply)) => reply == [0x05, 0x00],
        Ok(Err(err)) => {
            tracing::debug!(addr, error = %err, "SOCKS5 probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(
                addr,
                timeout_ms = timeout.as_millis() as u64,
                "SOCKS5 probe timed out"
            );
            false
        }
    }
}
