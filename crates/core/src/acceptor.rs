//! Connection Acceptor (§4.6): listens for client connections, obtains an
//! upstream connection per client, and spawns the pump pair.

use std::sync::Arc;

use async_trait::async_trait;
use rfault_helpers::rng::PercentGate;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::applier::ApplyOptions;
use crate::errors::ConnectionError;
use crate::plan::{Direction, Plan};
use crate::pump;

/// Source of upstream Redis connections (§1, listed as an external
/// collaborator; this crate treats it as an injectable dependency rather
/// than implementing a full pool, per the Non-goals in §1).
#[async_trait]
pub trait UpstreamPool: Send + Sync {
    async fn acquire(&self) -> std::io::Result<TcpStream>;
}

/// Dials the configured upstream address fresh for each client connection.
/// This is the simplest pool that satisfies the trait: "one upstream
/// connection per client connection, no multiplexing" (§5) does not require
/// pre-warming or reuse across clients.
pub struct DialingPool {
    upstream_addr: String,
}

impl DialingPool {
    pub fn new(upstream_addr: impl Into<String>) -> Self {
        DialingPool {
            upstream_addr: upstream_addr.into(),
        }
    }
}

#[async_trait]
impl UpstreamPool for DialingPool {
    async fn acquire(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect(&self.upstream_addr).await
    }
}

/// Runs the accept loop until the listener errors or the process is
/// killed. Each accepted connection gets its own upstream dial and pump
/// pair; the acceptor does not wait for a connection to finish before
/// accepting the next one.
pub async fn run(
    listener: TcpListener,
    plan: Arc<Plan>,
    pool: Arc<dyn UpstreamPool>,
    gate: Arc<dyn PercentGate>,
    apply_opts: ApplyOptions,
) {
    loop {
        let (client, client_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed, continuing");
                continue;
            }
        };

        let plan = Arc::clone(&plan);
        let pool = Arc::clone(&pool);
        let gate = Arc::clone(&gate);

        tokio::spawn(async move {
            let upstream = match pool.acquire().await {
                Ok(stream) => stream,
                Err(err) => {
                    let err = ConnectionError::UpstreamDial(err);
                    warn!(%client_addr, error = %err, "upstream pool exhausted, dropping connection");
                    return;
                }
            };

            info!(%client_addr, "accepted connection");
            handle_connection(client, upstream, client_addr.to_string(), plan, gate, apply_opts)
                .await;
            info!(%client_addr, "connection closed");
        });
    }
}

async fn handle_connection(
    client: TcpStream,
    upstream: TcpStream,
    client_addr: String,
    plan: Arc<Plan>,
    gate: Arc<dyn PercentGate>,
    apply_opts: ApplyOptions,
) {
    let client = Arc::new(client);
    let upstream = Arc::new(upstream);

    let request_pump = tokio::spawn(pump::run(
        Direction::Request,
        Arc::clone(&client),
        Arc::clone(&upstream),
        client_addr.clone(),
        Arc::clone(&plan),
        Arc::clone(&gate),
        apply_opts,
    ));
    let response_pump = tokio::spawn(pump::run(
        Direction::Response,
        Arc::clone(&upstream),
        Arc::clone(&client),
        client_addr,
        plan,
        gate,
        apply_opts,
    ));

    let _ = tokio::join!(request_pump, response_pump);

    let _ = crate::sockutil::shutdown_both(&client);
    let _ = crate::sockutil::shutdown_both(&upstream);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfault_helpers::rng::ThreadRngGate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct LoopbackPool {
        addr: String,
    }

    #[async_trait]
    impl UpstreamPool for LoopbackPool {
        async fn acquire(&self) -> std::io::Result<TcpStream> {
            TcpStream::connect(&self.addr).await
        }
    }

    #[tokio::test]
    async fn accepts_and_pumps_a_connection_end_to_end() {
        // A fake "redis" that echoes whatever it receives.
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = upstream_listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        if sock.write_all(&buf[..n]).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let proxy_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let plan = Arc::new(Plan::new(crate::plan::MsgOrdering::Ordered));
        let pool: Arc<dyn UpstreamPool> = Arc::new(LoopbackPool {
            addr: upstream_addr.to_string(),
        });
        let gate: Arc<dyn PercentGate> = Arc::new(ThreadRngGate::new());

        tokio::spawn(run(proxy_listener, plan, pool, gate, ApplyOptions::default()));

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        client.write_all(b"+PING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PING\r\n");
    }
}
