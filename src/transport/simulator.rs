//! In-process stand-in for a Satlantic PAR sensor behind a port agent.
//!
//! The simulated sensor has the three modes of the real one: the command
//! console, autosample (frames at `maxrate` Hz) and polled sampling. Every
//! byte the driver writes is recorded so callers can assert on wire traffic.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::{Connector, LineFramer, RawFrame, Result, Transport, TransportError};
use crate::config::CommConfig;
use crate::protocol::checksum::frame_checksum;
use crate::protocol::commands::{Command, COMMAND_CONSOLE, PROMPT, RESET_BANNER};
use crate::protocol::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedMode {
    Command,
    Autosample,
    Poll,
}

#[derive(Debug, Clone)]
pub struct SimulatorOptions {
    pub serial_num: String,
    pub initial_mode: SimulatedMode,
    pub telbaud: u64,
    pub maxrate: f64,
    /// When false the sensor swallows input without answering
    pub responsive: bool,
    pub refuse_connections: bool,
}

impl Default for SimulatorOptions {
    fn default() -> Self {
        Self {
            serial_num: "0229".to_string(),
            initial_mode: SimulatedMode::Autosample,
            telbaud: 19200,
            maxrate: 1.0,
            responsive: true,
            refuse_connections: false,
        }
    }
}

enum SimInput {
    Wire(Vec<u8>),
    Emit(String),
}

struct Instrument {
    options: SimulatorOptions,
    mode: SimulatedMode,
    line: String,
    /// Values applied by `set` but not yet saved
    staged: Vec<(Parameter, Value)>,
    booted: Instant,
    frames_emitted: u64,
    sent: Vec<Vec<u8>>,
    input: Option<mpsc::Sender<SimInput>>,
}

impl Instrument {
    fn new(options: SimulatorOptions) -> Self {
        Self {
            mode: options.initial_mode,
            options,
            line: String::new(),
            staged: Vec::new(),
            booted: Instant::now(),
            frames_emitted: 0,
            sent: Vec::new(),
            input: None,
        }
    }

    fn sample_period(&self) -> Duration {
        // 0 means as fast as the link allows; the sensor tops out at 12 Hz
        let rate = if self.options.maxrate > 0.0 { self.options.maxrate } else { 12.0 };
        Duration::from_secs_f64(1.0 / rate)
    }

    fn sample_frame(&mut self) -> String {
        self.frames_emitted += 1;
        let timer = self.booted.elapsed().as_secs_f64() % 10_000_000.0;
        let counts = 2_200_000_000 + (self.frames_emitted * 7_919) % 99_999_999;
        let payload = format!("SATPAR{},{:.2},{:010},", self.options.serial_num, timer, counts);
        let checksum = frame_checksum(payload.as_bytes());
        format!("{}{}\r\n", payload, checksum)
    }

    fn reset(&mut self, out: &mut String) {
        self.booted = Instant::now();
        self.staged.clear();
        self.line.clear();
        self.mode = SimulatedMode::Autosample;
        out.push_str(&format!(
            "\r\n{}\r\nCopyright (C) 2003, Satlantic Inc. All rights reserved.\r\nInstrument: SATPAR\r\nS/N: {}\r\n",
            RESET_BANNER, self.options.serial_num
        ));
    }

    fn enter_console(&mut self, out: &mut String) {
        self.mode = SimulatedMode::Command;
        self.line.clear();
        out.push_str(&format!("\r\n{}\r\n{} ", COMMAND_CONSOLE, PROMPT));
    }

    fn feed(&mut self, byte: u8, out: &mut String) {
        if !self.options.responsive {
            return;
        }
        match (self.mode, Command::from_control_byte(byte)) {
            (_, Some(Command::Reset)) => self.reset(out),
            (SimulatedMode::Command, Some(Command::Break)) => {
                self.line.clear();
                out.push_str(&format!("\r\n{} ", PROMPT));
            }
            (_, Some(Command::Break)) => self.enter_console(out),
            (SimulatedMode::Command, _) => match byte {
                b'\n' | b'\r' => {
                    let line = std::mem::take(&mut self.line);
                    if !line.trim().is_empty() {
                        self.console_line(line.trim(), out);
                    }
                }
                b if b.is_ascii_graphic() || b == b' ' => self.line.push(b as char),
                _ => {}
            },
            (SimulatedMode::Autosample, Some(Command::Stop)) => self.mode = SimulatedMode::Poll,
            (SimulatedMode::Poll, Some(Command::Autosample)) => self.mode = SimulatedMode::Autosample,
            (SimulatedMode::Poll, Some(Command::Sample)) => {
                let frame = self.sample_frame();
                out.push_str(&frame);
            }
            (SimulatedMode::Autosample | SimulatedMode::Poll, _) => {}
        }
    }

    fn console_line(&mut self, line: &str, out: &mut String) {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["show", name] => match Parameter::from_wire_name(name) {
                Some(param) => {
                    let value = self.current(param);
                    out.push_str(&format!("{}\r\n", param.render_show_response(&value)));
                }
                None => out.push_str("Invalid parameter\r\n"),
            },
            ["set", name, raw] => {
                let parsed = Parameter::from_wire_name(name).and_then(|param| {
                    let value: Value = serde_json::from_str(raw).ok()?;
                    param.validate(&value).ok().map(|v| (param, v))
                });
                match parsed {
                    Some((param, value)) => {
                        self.staged.retain(|(p, _)| *p != param);
                        self.staged.push((param, value));
                    }
                    None => out.push_str("Invalid value\r\n"),
                }
            }
            ["save"] => {
                for (param, value) in std::mem::take(&mut self.staged) {
                    self.apply(param, &value);
                }
            }
            ["exit"] => {
                self.reset(out);
                return;
            }
            _ => out.push_str("Invalid command\r\n"),
        }
        out.push_str(&format!("{} ", PROMPT));
    }

    fn current(&self, param: Parameter) -> Value {
        if let Some((_, staged)) = self.staged.iter().find(|(p, _)| *p == param) {
            return staged.clone();
        }
        match param {
            Parameter::Telbaud => Value::from(self.options.telbaud),
            Parameter::Maxrate => Parameter::Maxrate
                .validate(&Value::from(self.options.maxrate))
                .unwrap_or(Value::Null),
        }
    }

    fn apply(&mut self, param: Parameter, value: &Value) {
        match param {
            Parameter::Telbaud => {
                if let Some(baud) = value.as_u64() {
                    self.options.telbaud = baud;
                }
            }
            Parameter::Maxrate => {
                if let Some(rate) = value.as_f64() {
                    self.options.maxrate = rate;
                }
            }
        }
    }
}

/// Connector handing out links to one simulated sensor. Clones share the
/// same sensor.
#[derive(Clone)]
pub struct SimulatedPar {
    instrument: Arc<Mutex<Instrument>>,
}

impl SimulatedPar {
    pub fn new(options: SimulatorOptions) -> Self {
        Self { instrument: Arc::new(Mutex::new(Instrument::new(options))) }
    }

    fn lock(&self) -> MutexGuard<'_, Instrument> {
        self.instrument.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn mode(&self) -> SimulatedMode {
        self.lock().mode
    }

    /// Every write the driver made, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    pub fn saved_value(&self, param: Parameter) -> Value {
        let instrument = self.lock();
        match param {
            Parameter::Telbaud => Value::from(instrument.options.telbaud),
            Parameter::Maxrate => Value::from(instrument.options.maxrate),
        }
    }

    pub fn set_responsive(&self, responsive: bool) {
        self.lock().options.responsive = responsive;
    }

    /// Push an arbitrary line out of the sensor, e.g. a corrupted frame.
    pub async fn emit_line(&self, line: &str) -> Result<()> {
        let input = self.lock().input.clone().ok_or(TransportError::Closed)?;
        input
            .send(SimInput::Emit(format!("{}\r\n", line)))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

impl Default for SimulatedPar {
    fn default() -> Self {
        Self::new(SimulatorOptions::default())
    }
}

#[async_trait]
impl Connector for SimulatedPar {
    async fn open(&self, config: &CommConfig, frames: mpsc::Sender<RawFrame>) -> Result<Box<dyn Transport>> {
        if self.lock().options.refuse_connections {
            return Err(TransportError::ConnectionFailed(format!("{} refused the connection", config.socket_addr())));
        }

        let (input_tx, input_rx) = mpsc::channel(64);
        self.lock().input = Some(input_tx.clone());
        tokio::spawn(run_instrument(self.instrument.clone(), input_rx, frames));

        log::info!("Simulated PAR sensor attached as {}", config.socket_addr());
        Ok(Box::new(SimulatedLink { instrument: self.instrument.clone(), input: Some(input_tx) }))
    }
}

async fn run_instrument(
    instrument: Arc<Mutex<Instrument>>,
    mut input_rx: mpsc::Receiver<SimInput>,
    frames: mpsc::Sender<RawFrame>,
) {
    let mut framer = LineFramer::new(4096);
    let mut next_sample: Option<Instant> = None;

    loop {
        let deadline = next_sample;
        let tick = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let mut out = String::new();
        tokio::select! {
            input = input_rx.recv() => match input {
                Some(SimInput::Wire(bytes)) => {
                    let mut guard = instrument.lock().unwrap_or_else(|p| p.into_inner());
                    for byte in bytes {
                        guard.feed(byte, &mut out);
                    }
                }
                Some(SimInput::Emit(text)) => out.push_str(&text),
                None => break,
            },
            _ = tick => {
                let mut guard = instrument.lock().unwrap_or_else(|p| p.into_inner());
                if guard.mode == SimulatedMode::Autosample && guard.options.responsive {
                    let frame = guard.sample_frame();
                    out.push_str(&frame);
                }
                next_sample = None;
            }
        }

        {
            let guard = instrument.lock().unwrap_or_else(|p| p.into_inner());
            next_sample = match (guard.mode, next_sample) {
                (SimulatedMode::Autosample, Some(at)) => Some(at),
                (SimulatedMode::Autosample, None) => Some(Instant::now() + guard.sample_period()),
                _ => None,
            };
        }

        for line in framer.push(out.as_bytes()) {
            if frames.send(RawFrame::now(line)).await.is_err() {
                return;
            }
        }
    }
    log::debug!("Simulated PAR sensor detached");
}

struct SimulatedLink {
    instrument: Arc<Mutex<Instrument>>,
    input: Option<mpsc::Sender<SimInput>>,
}

#[async_trait]
impl Transport for SimulatedLink {
    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let input = self.input.as_ref().ok_or(TransportError::Closed)?;
        self.instrument
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .sent
            .push(data.to_vec());
        input
            .send(SimInput::Wire(data.to_vec()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        self.input.take();
        self.instrument.lock().unwrap_or_else(|p| p.into_inner()).input = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{validate, Parameter};

    fn console() -> Instrument {
        Instrument::new(SimulatorOptions { initial_mode: SimulatedMode::Command, ..Default::default() })
    }

    fn feed_all(instrument: &mut Instrument, bytes: &[u8]) -> String {
        let mut out = String::new();
        for b in bytes {
            instrument.feed(*b, &mut out);
        }
        out
    }

    #[test]
    fn test_sample_frames_validate() {
        let mut instrument = console();
        for _ in 0..20 {
            let frame = instrument.sample_frame();
            assert!(validate(&frame).is_ok(), "{frame}");
        }
    }

    #[test]
    fn test_console_show_set_save() {
        let mut instrument = console();
        assert_eq!(feed_all(&mut instrument, b"show maxrate\n"), "Maximum Frame Rate: 1 Hz\r\n$ ");
        assert_eq!(feed_all(&mut instrument, b"set maxrate 10\n"), "$ ");
        assert_eq!(feed_all(&mut instrument, b"show maxrate\n"), "Maximum Frame Rate: 10 Hz\r\n$ ");
        assert_eq!(instrument.options.maxrate, 1.0);
        feed_all(&mut instrument, b"save\n");
        assert_eq!(instrument.options.maxrate, 10.0);
        assert_eq!(instrument.current(Parameter::Maxrate), Value::from(10));
    }

    #[test]
    fn test_mode_changes() {
        let mut instrument = console();
        let banner = feed_all(&mut instrument, Command::Exit.wire());
        assert!(banner.contains(RESET_BANNER));
        assert_eq!(instrument.mode, SimulatedMode::Autosample);

        feed_all(&mut instrument, Command::Stop.wire());
        assert_eq!(instrument.mode, SimulatedMode::Poll);
        assert!(feed_all(&mut instrument, Command::Sample.wire()).starts_with("SATPAR0229,"));

        feed_all(&mut instrument, Command::Autosample.wire());
        assert_eq!(instrument.mode, SimulatedMode::Autosample);

        let console_banner = feed_all(&mut instrument, Command::Break.wire());
        assert!(console_banner.contains(COMMAND_CONSOLE));
        assert_eq!(instrument.mode, SimulatedMode::Command);
    }

    #[test]
    fn test_unresponsive_sensor_is_silent() {
        let mut instrument = console();
        instrument.options.responsive = false;
        assert_eq!(feed_all(&mut instrument, b"show maxrate\n"), "");
    }
}
