//! Driver task: one owner of [`ParProtocol`] serving requests and incoming
//! frames in arrival order.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch};

use super::protocol::{ParProtocol, ResourceReply};
use super::{DriverError, Result};
use crate::config::DriverConfig;
use crate::protocol::{DriverState, ProtocolEvent};
use crate::publish::Publisher;
use crate::transport::Connector;

type Responder<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
pub enum DriverRequest {
    Configure { comm: Value, responder: Responder<DriverState> },
    Connect { responder: Responder<DriverState> },
    Disconnect { responder: Responder<DriverState> },
    Initialize { responder: Responder<DriverState> },
    DiscoverState { responder: Responder<DriverState> },
    GetResource { names: Vec<String>, responder: Responder<Map<String, Value>> },
    GetConfig { responder: Responder<Map<String, Value>> },
    SetResource { entries: Map<String, Value>, responder: Responder<Map<String, Value>> },
    RestoreConfig { entries: Map<String, Value>, responder: Responder<()> },
    ExecuteResource { event: ProtocolEvent, responder: Responder<ResourceReply> },
    ExecuteDirect { data: Vec<u8>, responder: Responder<()> },
    Shutdown,
}

#[derive(Clone)]
pub struct DriverHandle {
    cmd_tx: mpsc::Sender<DriverRequest>,
    state_rx: watch::Receiver<DriverState>,
}

impl DriverHandle {
    async fn request<T>(&self, build: impl FnOnce(Responder<T>) -> DriverRequest) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(build(tx)).await.map_err(|_| DriverError::ChannelClosed)?;
        rx.await.map_err(|_| DriverError::ChannelClosed)?
    }

    /// Last state the driver confirmed.
    pub fn state(&self) -> DriverState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<DriverState> {
        self.state_rx.clone()
    }

    pub async fn configure(&self, comm: Value) -> Result<DriverState> {
        self.request(|responder| DriverRequest::Configure { comm, responder }).await
    }

    pub async fn connect(&self) -> Result<DriverState> {
        self.request(|responder| DriverRequest::Connect { responder }).await
    }

    pub async fn disconnect(&self) -> Result<DriverState> {
        self.request(|responder| DriverRequest::Disconnect { responder }).await
    }

    pub async fn initialize(&self) -> Result<DriverState> {
        self.request(|responder| DriverRequest::Initialize { responder }).await
    }

    pub async fn discover_state(&self) -> Result<DriverState> {
        self.request(|responder| DriverRequest::DiscoverState { responder }).await
    }

    pub async fn get_resource(&self, names: Vec<String>) -> Result<Map<String, Value>> {
        self.request(|responder| DriverRequest::GetResource { names, responder }).await
    }

    pub async fn get_config(&self) -> Result<Map<String, Value>> {
        self.request(|responder| DriverRequest::GetConfig { responder }).await
    }

    pub async fn set_resource(&self, entries: Map<String, Value>) -> Result<Map<String, Value>> {
        self.request(|responder| DriverRequest::SetResource { entries, responder }).await
    }

    pub async fn restore_config(&self, entries: Map<String, Value>) -> Result<()> {
        self.request(|responder| DriverRequest::RestoreConfig { entries, responder }).await
    }

    pub async fn execute_resource(&self, event: ProtocolEvent) -> Result<ResourceReply> {
        self.request(|responder| DriverRequest::ExecuteResource { event, responder }).await
    }

    pub async fn execute_direct(&self, data: Vec<u8>) -> Result<()> {
        self.request(|responder| DriverRequest::ExecuteDirect { data, responder }).await
    }

    /// Stop the driver task, closing any open link.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(DriverRequest::Shutdown).await;
    }
}

pub struct DriverBuilder {
    pub connector: Arc<dyn Connector>,
    pub publisher: Arc<dyn Publisher>,
    pub config: DriverConfig,
}

impl DriverBuilder {
    pub fn new(connector: Arc<dyn Connector>, publisher: Arc<dyn Publisher>) -> Self {
        Self { connector, publisher, config: DriverConfig::default() }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> DriverHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(self.config.request_queue_capacity);
        let protocol = ParProtocol::new(self.connector, self.publisher, self.config);
        let (state_tx, state_rx) = watch::channel(protocol.state());

        tokio::spawn(driver_task(protocol, cmd_rx, state_tx));

        DriverHandle { cmd_tx, state_rx }
    }
}

pub(crate) async fn driver_task(
    mut protocol: ParProtocol,
    mut cmd_rx: mpsc::Receiver<DriverRequest>,
    state_tx: watch::Sender<DriverState>,
) {
    use tokio::select;

    loop {
        select! {
            biased;
            request = cmd_rx.recv() => match request {
                Some(DriverRequest::Shutdown) | None => break,
                Some(request) => {
                    // data that arrived before the request belongs to the idle state
                    protocol.drain_frames();
                    serve(&mut protocol, request).await;
                    state_tx.send_replace(protocol.state());
                }
            },
            frame = protocol.next_frame() => match frame {
                Some(frame) => { protocol.handle_frame(&frame); }
                None => protocol.link_closed(),
            },
        }
    }

    if matches!(protocol.state(), DriverState::Connected(_)) {
        if let Err(e) = protocol.disconnect().await {
            log::warn!("Disconnect during shutdown failed: {}", e);
        }
        state_tx.send_replace(protocol.state());
    }
    log::debug!("Driver task stopped");
}

async fn serve(protocol: &mut ParProtocol, request: DriverRequest) {
    match request {
        DriverRequest::Configure { comm, responder } => {
            let _ = responder.send(protocol.configure(&comm));
        }
        DriverRequest::Connect { responder } => {
            let _ = responder.send(protocol.connect().await);
        }
        DriverRequest::Disconnect { responder } => {
            let _ = responder.send(protocol.disconnect().await);
        }
        DriverRequest::Initialize { responder } => {
            let _ = responder.send(protocol.initialize());
        }
        DriverRequest::DiscoverState { responder } => {
            let _ = responder.send(protocol.discover_state().await);
        }
        DriverRequest::GetResource { names, responder } => {
            let _ = responder.send(protocol.get_resource(&names).await);
        }
        DriverRequest::GetConfig { responder } => {
            let _ = responder.send(protocol.get_config().await);
        }
        DriverRequest::SetResource { entries, responder } => {
            let _ = responder.send(protocol.set_resource(&entries).await);
        }
        DriverRequest::RestoreConfig { entries, responder } => {
            let _ = responder.send(protocol.restore_config(&entries).await);
        }
        DriverRequest::ExecuteResource { event, responder } => {
            let _ = responder.send(protocol.execute_resource(event).await);
        }
        DriverRequest::ExecuteDirect { data, responder } => {
            let _ = responder.send(protocol.execute_direct(&data).await);
        }
        DriverRequest::Shutdown => {}
    }
}
