use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::debug;

/// Bounds the number of outbound dial attempts in flight at once, so a long
/// list of bootstrap/discovered peers cannot open unbounded concurrent
/// sockets during startup.
pub struct DialPool {
    semaphore: Arc<Semaphore>,
    dial_timeout: Duration,
}

impl DialPool {
    pub fn new(max_concurrent: usize, dial_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            dial_timeout,
        }
    }

    pub async fn dial(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore is never closed");
        debug!(%addr, "dialing peer");
        match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "dial timed out",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dial_connects_to_a_listening_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let pool = DialPool::new(4, Duration::from_secs(1));

        let accept = tokio::spawn(async move { listener.accept().await });
        let stream = pool.dial(addr).await.unwrap();
        assert!(stream.peer_addr().is_ok());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dial_times_out_against_unreachable_address() {
        let pool = DialPool::new(1, Duration::from_millis(50));
        let unreachable: SocketAddr = "10.255.255.1:65000".parse().unwrap();
        let result = pool.dial(unreachable).await;
        assert!(result.is_err());
    }
}
