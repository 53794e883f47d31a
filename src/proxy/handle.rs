//! Handles to running listeners.

use super::error::ProxyError;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to a running proxy listener.
///
/// Shutting down only stops the accept (or receive) loop. Connections that
/// were already accepted run to their own completion.
pub struct ServerHandle {
    name: &'static str,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub(crate) fn new(
        name: &'static str,
        local_addr: SocketAddr,
        shutdown_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            local_addr,
            shutdown_tx,
            task,
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Short name of the component behind this handle.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop accepting new connections and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        debug!("Shutting down {} on {}", self.name, self.local_addr);
        // The loop may already be gone if the listener failed.
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("{} accept loop ended abnormally: {}", self.name, e);
        }
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Wait until the shutdown flag flips to `true` (or its sender is dropped).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Bind a TCP listener, naming the address in the error.
pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener, ProxyError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accept connections until shutdown, spawning `handler` for each one.
///
/// Accept errors are logged and the loop keeps going.
pub(crate) async fn accept_loop<F, Fut>(
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
    name: &'static str,
    handler: F,
) where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!("Accepted {} connection from {}", name, peer);
                        tokio::spawn(handler(stream, peer));
                    }
                    Err(e) => {
                        warn!("Failed to accept {} connection: {}", name, e);
                    }
                }
            }
            _ = shutdown_requested(&mut shutdown_rx) => {
                info!("{} shutting down", name);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_accept_loop_dispatches_until_shutdown() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counter = served.clone();
        let task = tokio::spawn(accept_loop(listener, shutdown_rx, "test", move |_, _| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        let handle = ServerHandle::new("test", addr, shutdown_tx, task);

        for _ in 0..3 {
            TcpStream::connect(addr).await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while served.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await;
        // The listener is dropped with the loop, so the port refuses now.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        match bind(addr).await {
            Err(ProxyError::Bind { addr: named, .. }) => assert_eq!(named, addr.to_string()),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }
}
