//! Accept loop and server wiring.

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{info, warn};

use crate::{
    codec::DEFAULT_MAX_LINE_LENGTH,
    config::ServerConfig,
    connector::Downstream,
    dispatcher::{Dispatcher, DispatcherHandle},
    session,
};

pub struct Listener {
    listener: TcpListener,
    max_line_length: usize,
}

impl Listener {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Caps how many bytes of one line each session buffers.
    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    /// Binds `addr`. Failure here is fatal for the listener.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self::new(listener))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` resolves, spawning a session for
    /// each one. Accept errors are logged and the loop carries on.
    pub async fn run_until<F>(self, dispatcher: DispatcherHandle, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Listener {
            listener,
            max_line_length,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("listener shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &dispatcher, max_line_length);
                }
            }
        }

        Ok(())
    }
}

/// Resolves on ctrl-c, or never if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    dispatcher: &DispatcherHandle,
    max_line_length: usize,
) {
    match result {
        Ok((stream, peer)) => {
            tokio::spawn(session::handle_connection(
                stream,
                peer,
                dispatcher.clone(),
                max_line_length,
            ));
        }
        Err(err) => warn!(error = ?err, "error accepting connection"),
    }
}

/// Binds the configured address, starts the dispatcher and accepts clients
/// until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, downstream: Downstream, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let listener = Listener::bind(config.listen)
        .await?
        .with_max_line_length(config.max_line_length);
    let (dispatcher, handle) = Dispatcher::new(downstream, config.inbound_capacity);
    dispatcher.spawn();

    info!(addr = %listener.local_addr()?, "listening");
    listener.run_until(handle, shutdown).await
}
