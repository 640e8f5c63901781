//! TCP client for the port agent's data port.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::{Connector, LineFramer, RawFrame, Result, Transport, TransportError};
use crate::config::CommConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpConnector {
    max_line_length: usize,
}

impl TcpConnector {
    pub fn new(max_line_length: usize) -> Self {
        Self { max_line_length }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, config: &CommConfig, frames: mpsc::Sender<RawFrame>) -> Result<Box<dyn Transport>> {
        let address = config.socket_addr();
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::ConnectionFailed(format!("{} did not answer within {:?}", address, CONNECT_TIMEOUT)))?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true)?;

        let (mut reader, writer) = stream.into_split();
        let mut framer = LineFramer::new(self.max_line_length);
        let peer = address.clone();

        let reader_task = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        log::info!("Port agent {} closed the connection", peer);
                        break;
                    }
                    Ok(n) => {
                        for line in framer.push(&buf[..n]) {
                            if frames.send(RawFrame::now(line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("Read from port agent {} failed: {}", peer, e);
                        break;
                    }
                }
            }
        });

        log::info!("Connected to port agent at {}", address);
        Ok(Box::new(PortAgentLink { writer, reader_task, address }))
    }
}

struct PortAgentLink {
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
    address: String,
}

#[async_trait]
impl Transport for PortAgentLink {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        if self.reader_task.is_finished() {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.reader_task.abort();
        let result = self.writer.shutdown().await;
        log::info!("Disconnected from port agent at {}", self.address);
        result.map_err(TransportError::from)
    }
}

impl Drop for PortAgentLink {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
