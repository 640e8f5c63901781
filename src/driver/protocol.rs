//! Satlantic PAR protocol state machine.
//!
//! `ParProtocol` owns the driver state and the instrument link. All methods
//! take `&mut self`; the driver task in [`super::task`] is the single owner
//! that serializes commands and incoming data.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use super::{DriverError, Result};
use crate::config::{CommConfig, DriverConfig};
use crate::protocol::commands::{Command, PROMPT, RESET_BANNER};
use crate::protocol::particle::ntp_now;
use crate::protocol::state::{transition, Action};
use crate::protocol::{
    extract, validate, DataParticle, DriverState, Parameter, ParameterError, ParameterRegistry, ProtocolEvent,
    ProtocolState, SAMPLE_REGEX,
};
use crate::publish::{DriverEvent, Publication, Publisher};
use crate::transport::{Connector, RawFrame, Transport, TransportError};

/// Sent in this order to walk the sensor from any mode to its console:
/// leave the console (reset into autosample), stop to polled mode, take one
/// sample, resume autosample, then break into the console.
pub const DISCOVERY_PROBES: [Command; 5] = [
    Command::Exit,
    Command::Stop,
    Command::Sample,
    Command::Autosample,
    Command::Break,
];

const FRAME_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReply {
    pub state: DriverState,
    /// Set by ACQUIRE_SAMPLE
    pub particle: Option<DataParticle>,
}

pub struct ParProtocol {
    state: DriverState,
    comm: Option<CommConfig>,
    config: DriverConfig,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    frames: Option<mpsc::Receiver<RawFrame>>,
    registry: ParameterRegistry,
    publisher: Arc<dyn Publisher>,
}

impl ParProtocol {
    pub fn new(connector: Arc<dyn Connector>, publisher: Arc<dyn Publisher>, config: DriverConfig) -> Self {
        Self {
            state: DriverState::Unconfigured,
            comm: None,
            config,
            connector,
            transport: None,
            frames: None,
            registry: ParameterRegistry::new(),
            publisher,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn comm_config(&self) -> Option<&CommConfig> {
        self.comm.as_ref()
    }

    /// Record a confirmed state and tell the subscriber about it.
    fn confirm(&mut self, state: DriverState) {
        if self.state != state {
            log::info!("Driver state {} -> {}", self.state, state);
        } else {
            log::info!("Driver state {} confirmed", state);
        }
        self.state = state;
        self.publisher.publish(Publication::Event(DriverEvent::StateChange { state }));
    }

    fn require_command_mode(&self, command: &str) -> Result<()> {
        match self.state {
            DriverState::Connected(ProtocolState::Command) => Ok(()),
            other => Err(DriverError::rejected(command, other)),
        }
    }

    pub fn configure(&mut self, comm: &Value) -> Result<DriverState> {
        if self.state != DriverState::Unconfigured {
            return Err(DriverError::rejected("configure", self.state));
        }
        let comm = CommConfig::from_value(comm)?;
        log::info!("Configured for port agent at {}", comm.socket_addr());
        self.comm = Some(comm);
        self.confirm(DriverState::Disconnected);
        Ok(self.state)
    }

    pub async fn connect(&mut self) -> Result<DriverState> {
        let comm = match (&self.state, &self.comm) {
            (DriverState::Disconnected, Some(comm)) => comm.clone(),
            _ => return Err(DriverError::rejected("connect", self.state)),
        };

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        match self.connector.open(&comm, frames_tx).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.frames = Some(frames_rx);
                self.confirm(DriverState::Connected(ProtocolState::Unknown));
                Ok(self.state)
            }
            Err(e) => {
                log::error!("Connect to {} failed: {}", comm.socket_addr(), e);
                Err(DriverError::State {
                    command: "connect".to_string(),
                    state: self.state,
                    reason: e.to_string(),
                })
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<DriverState> {
        if !matches!(self.state, DriverState::Connected(_)) {
            return Err(DriverError::rejected("disconnect", self.state));
        }
        self.frames = None;
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                log::warn!("Error closing instrument link: {}", e);
            }
        }
        self.confirm(DriverState::Disconnected);
        Ok(self.state)
    }

    pub fn initialize(&mut self) -> Result<DriverState> {
        if self.state != DriverState::Disconnected {
            return Err(DriverError::rejected("initialize", self.state));
        }
        self.comm = None;
        self.confirm(DriverState::Unconfigured);
        Ok(self.state)
    }

    pub async fn discover_state(&mut self) -> Result<DriverState> {
        if self.state != DriverState::Connected(ProtocolState::Unknown) {
            return Err(DriverError::rejected("discover_state", self.state));
        }
        self.probe_sequence("discover_state").await?;
        self.confirm(DriverState::Connected(ProtocolState::Command));
        Ok(self.state)
    }

    pub async fn execute_resource(&mut self, event: ProtocolEvent) -> Result<ResourceReply> {
        let step = self
            .state
            .protocol_state()
            .and_then(|state| transition(state, event))
            .ok_or_else(|| DriverError::rejected(event.as_str(), self.state))?;

        let command = event.as_str();
        let limit = self.config.response_timeout();
        let mut particle = None;

        match step.action {
            Action::EnterAutosample => {
                self.leave_console(command).await?;
                self.send_command(Command::Autosample).await?;
            }
            Action::EnterPoll => {
                self.leave_console(command).await?;
                self.send_command(Command::Stop).await?;
            }
            Action::LeaveAutosample | Action::LeavePoll | Action::BreakConsole => {
                self.send_command(Command::Break).await?;
                self.await_prompt(limit, command).await?;
            }
            Action::AcquireFromCommand => {
                let sample = self.probe_sequence(command).await?;
                particle = Some(sample.ok_or_else(|| DriverError::Timeout {
                    command: command.to_string(),
                    waited: self.config.probe_timeout(),
                })?);
            }
            Action::AcquireFromPoll => {
                self.send_command(Command::Sample).await?;
                particle = Some(self.await_sample(limit, command).await?);
            }
            Action::EnterDirect | Action::LeaveDirect => {}
            Action::PassThrough => {
                return Err(ParameterError::Missing("direct access data".to_string()).into());
            }
            Action::ResetInstrument => {
                self.send_command(Command::Reset).await?;
                self.await_optional(self.config.probe_timeout(), command, |line| line.contains(RESET_BANNER))
                    .await?;
                self.send_command(Command::Break).await?;
                match self.await_prompt(limit, command).await {
                    Ok(()) => {}
                    Err(DriverError::Timeout { .. }) => {
                        log::warn!("Sensor did not return to its console after reset");
                        self.confirm(DriverState::Connected(ProtocolState::Unknown));
                        return Ok(ResourceReply { state: self.state, particle: None });
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !matches!(step.action, Action::AcquireFromCommand | Action::AcquireFromPoll) {
            self.confirm(DriverState::Connected(step.target));
        }
        Ok(ResourceReply { state: self.state, particle })
    }

    /// Write raw bytes to the sensor while in direct access.
    pub async fn execute_direct(&mut self, data: &[u8]) -> Result<()> {
        self.state
            .protocol_state()
            .and_then(|state| transition(state, ProtocolEvent::ExecuteDirect))
            .ok_or_else(|| DriverError::rejected(ProtocolEvent::ExecuteDirect.as_str(), self.state))?;
        self.send_raw(data).await
    }

    pub async fn get_resource(&mut self, names: &[String]) -> Result<Map<String, Value>> {
        self.require_command_mode("get_resource")?;
        let params = self.registry.resolve(names)?;

        let mut values = Map::new();
        for param in params {
            let value = self.read_parameter(param).await?;
            values.insert(param.name().to_string(), value);
        }
        Ok(values)
    }

    /// Every registry parameter, read from the sensor.
    pub async fn get_config(&mut self) -> Result<Map<String, Value>> {
        let names: Vec<String> = Parameter::ALL.iter().map(|p| p.name().to_string()).collect();
        self.get_resource(&names).await
    }

    pub async fn set_resource(&mut self, entries: &Map<String, Value>) -> Result<Map<String, Value>> {
        self.require_command_mode("set_resource")?;
        self.apply_parameters("set_resource", entries).await
    }

    pub async fn restore_config(&mut self, entries: &Map<String, Value>) -> Result<()> {
        self.require_command_mode("restore_config")?;
        if entries.is_empty() {
            return Err(ParameterError::Missing("configuration to restore".to_string()).into());
        }
        self.apply_parameters("restore_config", entries).await.map(|_| ())
    }

    /// Checksum, extract and publish one incoming line.
    pub fn got_data(&self, frame: &RawFrame) -> Result<DataParticle> {
        let clean = validate(&frame.line)?;
        let fields = extract(&SAMPLE_REGEX, clean.as_str())?;
        let particle = DataParticle::build(clean.as_str(), &fields, frame.port_timestamp, None, ntp_now());
        self.publisher.publish_sample(self.config.publish_order.arrange(particle.clone()));
        Ok(particle)
    }

    /// Feed a frame through [`Self::got_data`], logging rather than returning
    /// the lines that are not samples.
    pub(crate) fn handle_frame(&self, frame: &RawFrame) -> Option<DataParticle> {
        match self.got_data(frame) {
            Ok(particle) => Some(particle),
            Err(e) if frame.line.starts_with("SATPAR") => {
                log::warn!("Dropped frame: {}", e);
                None
            }
            Err(_) => {
                log::debug!("<< {}", frame.line);
                None
            }
        }
    }

    /// Next frame from the link; never resolves while disconnected.
    pub(crate) async fn next_frame(&mut self) -> Option<RawFrame> {
        match self.frames.as_mut() {
            Some(frames) => frames.recv().await,
            None => std::future::pending().await,
        }
    }

    pub(crate) fn link_closed(&mut self) {
        log::error!("Instrument link closed in state {}", self.state);
        self.frames = None;
    }

    /// Process frames that arrived while no command was running.
    pub(crate) fn drain_frames(&mut self) {
        let mut drained = Vec::new();
        if let Some(frames) = self.frames.as_mut() {
            while let Ok(frame) = frames.try_recv() {
                drained.push(frame);
            }
        }
        for frame in &drained {
            self.handle_frame(frame);
        }
    }

    async fn probe_sequence(&mut self, command: &str) -> Result<Option<DataParticle>> {
        let probe_limit = self.config.probe_timeout();
        let mut sample = None;

        for probe in DISCOVERY_PROBES {
            self.send_command(probe).await?;
            match probe {
                Command::Exit => {
                    if !self.await_optional(probe_limit, command, |line| line.contains(RESET_BANNER)).await? {
                        log::debug!("No reset banner after EXIT; sensor was not at its console");
                    }
                }
                Command::Sample => match self.await_sample(probe_limit, command).await {
                    Ok(particle) => sample = Some(particle),
                    Err(DriverError::Timeout { .. }) => log::warn!("No sample answered the SAMPLE probe"),
                    Err(e) => return Err(e),
                },
                Command::Break => self.await_prompt(self.config.response_timeout(), command).await?,
                _ => {}
            }
        }
        Ok(sample)
    }

    /// `exit` drops the sensor out of its console; it resets and prints its
    /// banner before sampling.
    async fn leave_console(&mut self, command: &str) -> Result<()> {
        self.send_command(Command::Exit).await?;
        let limit = self.config.response_timeout();
        self.await_frame(limit, command, |frame, _| frame.line.contains(RESET_BANNER).then_some(()))
            .await
    }

    async fn read_parameter(&mut self, param: Parameter) -> Result<Value> {
        let limit = self.config.response_timeout();
        self.send_raw(param.render_get().as_bytes()).await?;
        let value = self
            .await_frame(limit, "get_resource", |frame, _| param.parse_response(&frame.line))
            .await?;
        self.await_prompt(limit, "get_resource").await?;
        Ok(value)
    }

    /// Set each entry in registry order, then save once. A value that fails
    /// validation aborts the batch; entries already sent stay sent and the
    /// save is skipped.
    async fn apply_parameters(&mut self, command: &str, entries: &Map<String, Value>) -> Result<Map<String, Value>> {
        let resolved = self.registry.resolve_entries(entries)?;
        if resolved.is_empty() {
            return Ok(Map::new());
        }

        let limit = self.config.response_timeout();
        let mut applied = Vec::with_capacity(resolved.len());
        for (param, requested) in resolved {
            let value = param.validate(requested)?;
            self.send_raw(param.render_set(&value).as_bytes()).await?;
            if let Err(reply) = self.await_console_reply(limit, command).await? {
                self.await_prompt(limit, command).await?;
                return Err(ParameterError::InvalidValue {
                    name: param.name().to_string(),
                    value: format!("{} ({})", value, reply),
                }
                .into());
            }
            applied.push((param, value));
        }

        self.send_command(Command::Save).await?;
        self.await_prompt(limit, command).await?;

        log::info!("Saved {} parameter(s)", applied.len());
        self.publisher.publish(Publication::Event(DriverEvent::ConfigChange { parameters: applied.clone() }));

        Ok(applied
            .into_iter()
            .map(|(param, value)| (param.name().to_string(), value))
            .collect())
    }

    async fn send_command(&mut self, command: Command) -> Result<()> {
        log::debug!("Sending {}", command);
        self.send_raw(command.wire()).await
    }

    async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        log::debug!(">> {:?}", String::from_utf8_lossy(data));
        transport.send_data(data).await?;
        Ok(())
    }

    /// Consume frames until `matcher` accepts one or `limit` passes. Samples
    /// that arrive in the meantime are published as usual.
    async fn await_frame<T>(
        &mut self,
        limit: Duration,
        command: &str,
        mut matcher: impl FnMut(&RawFrame, Option<&DataParticle>) -> Option<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + limit;
        loop {
            let frames = self.frames.as_mut().ok_or(TransportError::Closed)?;
            let received = timeout_at(deadline, frames.recv()).await;
            let frame = match received {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.link_closed();
                    return Err(TransportError::Closed.into());
                }
                Err(_) => {
                    log::warn!("{} got no answer within {:?}", command, limit);
                    return Err(DriverError::Timeout { command: command.to_string(), waited: limit });
                }
            };

            let particle = self.handle_frame(&frame);
            if let Some(found) = matcher(&frame, particle.as_ref()) {
                return Ok(found);
            }
        }
    }

    async fn await_prompt(&mut self, limit: Duration, command: &str) -> Result<()> {
        self.await_frame(limit, command, |frame, _| (frame.line == PROMPT).then_some(()))
            .await
    }

    async fn await_sample(&mut self, limit: Duration, command: &str) -> Result<DataParticle> {
        self.await_frame(limit, command, |_, particle| particle.cloned()).await
    }

    /// Wait for the console to accept or refuse a line.
    async fn await_console_reply(
        &mut self,
        limit: Duration,
        command: &str,
    ) -> Result<std::result::Result<(), String>> {
        self.await_frame(limit, command, |frame, _| {
            if frame.line == PROMPT {
                Some(Ok(()))
            } else if frame.line.starts_with("Invalid") {
                Some(Err(frame.line.clone()))
            } else {
                None
            }
        })
        .await
    }

    /// Like `await_frame` for a single line, but a timeout is not an error.
    async fn await_optional(&mut self, limit: Duration, command: &str, accept: impl Fn(&str) -> bool) -> Result<bool> {
        match self.await_frame(limit, command, |frame, _| accept(&frame.line).then_some(())).await {
            Ok(()) => Ok(true),
            Err(DriverError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
