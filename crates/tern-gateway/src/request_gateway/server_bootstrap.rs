//! Listener lifecycle and optional public tunnel.
use super::*;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayLifecycle {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl GatewayLifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
        }
    }
}

/// Exposes the local listener at a public URL.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    async fn open(&self, local_addr: SocketAddr) -> anyhow::Result<String>;
    async fn close(&self) -> anyhow::Result<()>;
}

pub(super) struct RunningServer {
    local_addr: SocketAddr,
    tunnel_opened: bool,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RequestGateway {
    pub fn lifecycle(&self) -> GatewayLifecycle {
        *lock_or_recover(&self.lifecycle)
    }

    fn set_lifecycle(&self, lifecycle: GatewayLifecycle) {
        *lock_or_recover(&self.lifecycle) = lifecycle;
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server
            .lock()
            .await
            .as_ref()
            .map(|server| server.local_addr)
    }

    /// Binds the listener, opens the tunnel if one is configured and serves
    /// until [`RequestGateway::stop`].
    pub async fn start(&self) -> Result<SocketAddr, GatewayError> {
        let mut server = self.server.lock().await;
        let current = self.lifecycle();
        if server.is_some() || current != GatewayLifecycle::Stopped {
            return Err(GatewayError::AlreadyRunning(current.as_str()));
        }
        self.set_lifecycle(GatewayLifecycle::Starting);

        let running = match self.bind_and_serve().await {
            Ok(running) => running,
            Err(error) => {
                self.set_lifecycle(GatewayLifecycle::Stopped);
                return Err(error);
            }
        };
        let local_addr = running.local_addr;
        *server = Some(running);
        self.set_lifecycle(GatewayLifecycle::Listening);
        info!(
            addr = %local_addr,
            public_url = %self.state.public_base_url(),
            "request gateway listening"
        );
        Ok(local_addr)
    }

    async fn bind_and_serve(&self) -> Result<RunningServer, GatewayError> {
        let bind = self.state.config.bind.trim();
        let bind_addr = bind
            .parse::<SocketAddr>()
            .map_err(|source| GatewayError::InvalidBind {
                bind: bind.to_string(),
                source,
            })?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let mut tunnel_opened = false;
        let mut public_url = self
            .state
            .config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{local_addr}"));
        if let Some(tunnel) = &self.tunnel {
            match tunnel.open(local_addr).await {
                Ok(url) => {
                    tunnel_opened = true;
                    public_url = url;
                }
                Err(error) => {
                    warn!(
                        error = %format!("{error:#}"),
                        "failed to open public tunnel; continuing on local address"
                    );
                }
            }
        }
        self.state.set_public_base_url(&public_url);

        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let app = build_request_gateway_router(Arc::clone(&self.state));
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_signal.await;
                })
                .await
        });
        Ok(RunningServer {
            local_addr,
            tunnel_opened,
            shutdown,
            task,
        })
    }

    /// Closes the tunnel, then the listener. Stopping a stopped gateway is a
    /// no-op.
    pub async fn stop(&self) -> Result<(), GatewayError> {
        let mut server = self.server.lock().await;
        let Some(running) = server.take() else {
            return Ok(());
        };
        self.set_lifecycle(GatewayLifecycle::Stopping);

        if running.tunnel_opened {
            if let Some(tunnel) = &self.tunnel {
                if let Err(error) = tunnel.close().await {
                    warn!(error = %format!("{error:#}"), "failed to close public tunnel");
                }
            }
        }

        let _ = running.shutdown.send(());
        let result = match running.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(GatewayError::Serve(error)),
            Err(error) => Err(GatewayError::Join(error.to_string())),
        };
        self.set_lifecycle(GatewayLifecycle::Stopped);
        info!(addr = %running.local_addr, "request gateway stopped");
        result
    }
}
