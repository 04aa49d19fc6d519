//! One AT-command session over one serial port.
//!
//! The session is a plain blocking state machine:
//!
//! ```text
//! closed → opening → open → initialized → ready
//!              └──────┴────────┴────────────┴──→ failed
//! ```
//!
//! Every exchange is written, then read line by line until a final result
//! code or the deadline. A timeout is a failure, never "still pending".
//! Only the dispatcher thread owns a session.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::at::{self, AtResponse, AtStatus, CarrierCode, Registration};
use super::link::{SerialLink, SerialOpener, open_bounded};
use super::pdu;
use crate::error::ModemError;
use crate::notify::gsm;

const CTRL_Z: u8 = 0x1A;
const READ_CHUNK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModemState {
    Closed,
    Opening,
    Open,
    /// Handshake done, SMSC not yet confirmed.
    Initialized,
    Ready,
    Failed,
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModemState::Closed => "closed",
            ModemState::Opening => "opening",
            ModemState::Open => "open",
            ModemState::Initialized => "initialized",
            ModemState::Ready => "ready",
            ModemState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    #[default]
    Text,
    Pdu,
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendMode::Text => write!(f, "text"),
            SendMode::Pdu => write!(f, "pdu"),
        }
    }
}

/// What the modem acknowledged for one `send_sms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmsReceipt {
    pub mode: SendMode,
    /// `+CMGS` message references, one per part.
    pub references: Vec<u8>,
    /// True when text mode was rejected and PDU mode delivered.
    pub fell_back: bool,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub port: String,
    pub baud_rate: u32,
    /// SMSC to program; `None` keeps what the SIM has stored.
    pub smsc: Option<String>,
    pub open_timeout: Duration,
    pub command_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            smsc: None,
            open_timeout: Duration::from_millis(3000),
            command_timeout: Duration::from_secs(15),
            send_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot from [`ModemSession::diagnose`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemDiagnosis {
    pub port: String,
    pub state: ModemState,
    pub responsive: bool,
    pub sim: Option<String>,
    pub rssi: Option<u8>,
    pub registration: Option<Registration>,
    pub operator: Option<String>,
    pub smsc: Option<String>,
    pub last_error: Option<String>,
    /// Operator-facing findings, empty when nothing looks wrong.
    pub hints: Vec<String>,
}

pub struct ModemSession {
    settings: SessionSettings,
    opener: Arc<dyn SerialOpener>,
    link: Option<Box<dyn SerialLink>>,
    state: ModemState,
    rx: Vec<u8>,
    format: Option<SendMode>,
    configured_smsc: Option<String>,
    last_error: Option<ModemError>,
    next_reference: u8,
}

impl ModemSession {
    pub fn new(settings: SessionSettings, opener: Arc<dyn SerialOpener>) -> Self {
        Self {
            settings,
            opener,
            link: None,
            state: ModemState::Closed,
            rx: Vec::new(),
            format: None,
            configured_smsc: None,
            last_error: None,
            next_reference: 0,
        }
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// SMSC confirmed by the last successful `configure_smsc`.
    pub fn configured_smsc(&self) -> Option<&str> {
        self.configured_smsc.as_deref()
    }

    pub fn last_error(&self) -> Option<&ModemError> {
        self.last_error.as_ref()
    }

    /// open → initialize → configure SMSC, stopping at the first failure.
    /// Reopens the port if it was already open.
    pub fn connect(&mut self) -> Result<(), ModemError> {
        self.open()?;
        self.initialize()?;
        let smsc = self.settings.smsc.clone();
        self.configure_smsc(smsc.as_deref())
    }

    /// Open the port with a bounded wait. No retry.
    pub fn open(&mut self) -> Result<(), ModemError> {
        if self.link.is_some() {
            self.close();
        }
        self.state = ModemState::Opening;
        let port = self.settings.port.clone();
        tracing::info!("Opening modem on {port} at {} baud", self.settings.baud_rate);

        match open_bounded(
            self.opener.clone(),
            &port,
            self.settings.baud_rate,
            self.settings.open_timeout,
        ) {
            Ok(mut link) => {
                if let Err(e) = link.discard_input() {
                    tracing::debug!("Could not flush stale input on {port}: {e}");
                }
                self.link = Some(link);
                self.rx.clear();
                self.format = None;
                self.last_error = None;
                self.state = ModemState::Open;
                Ok(())
            }
            Err(cause) => Err(self.fail(ModemError::Open { port, cause })),
        }
    }

    /// Handshake: attention, echo off, numeric errors, SIM and network
    /// checks, GSM charset, text mode.
    pub fn initialize(&mut self) -> Result<(), ModemError> {
        self.require(&[ModemState::Open, ModemState::Initialized, ModemState::Ready])?;

        for command in ["AT", "ATE0", "AT+CMEE=1"] {
            self.init_step(command)?;
        }

        let cpin = self.init_step("AT+CPIN?")?;
        let sim = at::parse_cpin(&cpin);
        if sim.as_deref() != Some("READY") {
            return Err(self.fail(ModemError::Init {
                command: "AT+CPIN?".into(),
                reason: format!("SIM not ready ({})", sim.as_deref().unwrap_or("no status")),
            }));
        }

        let creg = self.init_step("AT+CREG?")?;
        match at::parse_creg(&creg) {
            Some(reg) if reg.is_registered() => {}
            other => {
                let seen = other.map_or("no status".to_string(), |r| r.to_string());
                return Err(self.fail(ModemError::Init {
                    command: "AT+CREG?".into(),
                    reason: format!("not registered on a network ({seen})"),
                }));
            }
        }

        self.init_step("AT+CSCS=\"GSM\"")?;
        self.init_step("AT+CMGF=1")?;
        self.format = Some(SendMode::Text);
        self.state = ModemState::Initialized;
        tracing::info!("Modem on {} initialized", self.settings.port);
        Ok(())
    }

    /// Program `smsc` (if given) and read it back. A read-back that differs
    /// is a mismatch, not a send failure. With no `smsc`, the SIM's stored
    /// address is used and must exist.
    pub fn configure_smsc(&mut self, smsc: Option<&str>) -> Result<(), ModemError> {
        self.require(&[ModemState::Initialized, ModemState::Ready])?;
        let timeout = self.settings.command_timeout;

        if let Some(number) = smsc {
            let kind = if number.trim_start().starts_with('+') { 145 } else { 129 };
            let command = format!("AT+CSCA=\"{number}\",{kind}");
            let resp = self.exchange(&command, timeout)?;
            if !resp.is_ok() {
                let err = match resp.status.carrier_code() {
                    Some(code) => ModemError::SmscRejected { code },
                    None => ModemError::Init {
                        command,
                        reason: resp.status.to_string(),
                    },
                };
                return Err(self.fail(err));
            }
        }

        let resp = self.exchange("AT+CSCA?", timeout)?;
        if !resp.is_ok() {
            return Err(self.fail(ModemError::Init {
                command: "AT+CSCA?".into(),
                reason: resp.status.to_string(),
            }));
        }
        let reported = at::parse_csca(&resp);

        match (smsc, reported) {
            (Some(expected), reported)
                if reported.as_deref().map(at::normalize_number)
                    != Some(at::normalize_number(expected)) =>
            {
                Err(self.fail(ModemError::SmscMismatch {
                    expected: expected.to_string(),
                    reported,
                }))
            }
            (None, None) => Err(self.fail(ModemError::Init {
                command: "AT+CSCA?".into(),
                reason: "no SMSC stored on the SIM and none configured".into(),
            })),
            (_, reported) => {
                tracing::info!("SMSC confirmed: {}", reported.as_deref().unwrap_or_default());
                self.configured_smsc = reported;
                self.state = ModemState::Ready;
                Ok(())
            }
        }
    }

    /// Submit one SMS. A text-mode rejection of a multi-segment message gets
    /// exactly one PDU-mode attempt; nothing else is retried.
    pub fn send_sms(&mut self, number: &str, message: &str, mode: SendMode) -> Result<SmsReceipt, ModemError> {
        self.require(&[ModemState::Ready])?;
        if at::normalize_number(number).is_empty() {
            return Err(self.record(ModemError::Send {
                carrier_code: None,
                message: format!("invalid destination number '{number}'"),
            }));
        }

        let text = gsm::sanitize(message);
        let result = match mode {
            SendMode::Text => self.send_text(number, &text),
            SendMode::Pdu => self.send_pdu(number, &text),
        };

        match result {
            Err(err @ ModemError::Send { .. })
                if mode == SendMode::Text && gsm::segment_count(&text) > 1 =>
            {
                tracing::warn!(
                    "Text-mode send to {number} rejected ({err}); trying PDU mode once"
                );
                let mut receipt = self.send_pdu(number, &text).map_err(|e| self.record(e))?;
                receipt.fell_back = true;
                Ok(receipt)
            }
            Err(err) => Err(self.record(err)),
            Ok(receipt) => {
                tracing::info!(
                    "SMS to {number} accepted ({} mode, {} part(s))",
                    receipt.mode,
                    receipt.references.len().max(1)
                );
                Ok(receipt)
            }
        }
    }

    /// One raw exchange. The response is returned whatever its status.
    pub fn execute(&mut self, command: &str) -> Result<AtResponse, ModemError> {
        if self.link.is_none() {
            return Err(ModemError::NotReady { state: self.state });
        }
        self.exchange(command.trim(), self.settings.command_timeout)
    }

    /// Probe SIM, signal, registration, operator and SMSC. Individual probe
    /// failures leave their field empty.
    pub fn diagnose(&mut self) -> ModemDiagnosis {
        let mut diagnosis = ModemDiagnosis {
            port: self.settings.port.clone(),
            state: self.state,
            responsive: false,
            sim: None,
            rssi: None,
            registration: None,
            operator: None,
            smsc: None,
            last_error: None,
            hints: Vec::new(),
        };

        if self.link.is_some() {
            let timeout = self.settings.command_timeout;
            diagnosis.responsive = self.exchange("AT", timeout).is_ok_and(|r| r.is_ok());
            if diagnosis.responsive {
                diagnosis.sim = self.probe("AT+CPIN?", at::parse_cpin);
                diagnosis.rssi = self.probe("AT+CSQ", at::parse_csq);
                diagnosis.registration = self.probe("AT+CREG?", at::parse_creg);
                diagnosis.operator = self.probe("AT+COPS?", at::parse_cops);
                diagnosis.smsc = self.probe("AT+CSCA?", at::parse_csca);
            }
        }

        diagnosis.state = self.state;
        diagnosis.last_error = self.last_error.as_ref().map(ToString::to_string);
        diagnosis.hints = self.hints(&diagnosis);
        diagnosis
    }

    /// Release the port. Safe to call in any state.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            tracing::info!("Closed modem port {}", self.settings.port);
        }
        self.rx.clear();
        self.format = None;
        self.configured_smsc = None;
        self.state = ModemState::Closed;
    }

    fn hints(&self, d: &ModemDiagnosis) -> Vec<String> {
        let mut hints = Vec::new();
        if self.link.is_none() {
            hints.push("port is not open".to_string());
            return hints;
        }
        if !d.responsive {
            hints.push("modem does not answer AT; check power, cable and baud rate".to_string());
            return hints;
        }
        if d.sim.as_deref() != Some("READY") {
            hints.push("SIM is not ready (missing, locked, or PIN required)".to_string());
        }
        match d.rssi {
            None => hints.push("no signal detected".to_string()),
            Some(rssi) if rssi < 10 => hints.push(format!(
                "weak signal ({} dBm)",
                at::rssi_dbm(rssi)
            )),
            Some(_) => {}
        }
        if !d.registration.is_some_and(Registration::is_registered) {
            hints.push(CarrierCode::NoNetworkService.description());
        }
        match (&self.settings.smsc, &d.smsc) {
            (_, None) => hints.push("no SMSC stored on the SIM".to_string()),
            (Some(expected), Some(actual))
                if at::normalize_number(expected) != at::normalize_number(actual) =>
            {
                hints.push(format!(
                    "SMSC {actual} differs from configured {expected}; messages may be silently dropped"
                ));
            }
            _ => {}
        }
        hints
    }

    fn probe<T>(&mut self, command: &str, parse: fn(&AtResponse) -> Option<T>) -> Option<T> {
        let resp = self.exchange(command, self.settings.command_timeout).ok()?;
        if resp.is_ok() { parse(&resp) } else { None }
    }

    fn require(&self, allowed: &[ModemState]) -> Result<(), ModemError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ModemError::NotReady { state: self.state })
        }
    }

    fn record(&mut self, err: ModemError) -> ModemError {
        self.last_error = Some(err.clone());
        err
    }

    fn fail(&mut self, err: ModemError) -> ModemError {
        tracing::warn!("Modem on {} failed: {err}", self.settings.port);
        self.state = ModemState::Failed;
        self.record(err)
    }

    fn init_step(&mut self, command: &str) -> Result<AtResponse, ModemError> {
        let resp = self.exchange(command, self.settings.command_timeout)?;
        if resp.is_ok() {
            return Ok(resp);
        }
        let reason = match resp.status.carrier_code() {
            Some(code) => format!("{} ({})", resp.status, code.description()),
            None => resp.status.to_string(),
        };
        Err(self.fail(ModemError::Init {
            command: command.to_string(),
            reason,
        }))
    }

    fn send_text(&mut self, number: &str, text: &str) -> Result<SmsReceipt, ModemError> {
        self.set_format(SendMode::Text)?;
        let reference = self.submit(&format!("AT+CMGS=\"{number}\""), text.as_bytes())?;
        Ok(SmsReceipt {
            mode: SendMode::Text,
            references: reference.into_iter().collect(),
            fell_back: false,
        })
    }

    fn send_pdu(&mut self, number: &str, text: &str) -> Result<SmsReceipt, ModemError> {
        self.set_format(SendMode::Pdu)?;
        let concat_ref = self.next_reference;
        self.next_reference = self.next_reference.wrapping_add(1);

        let mut references = Vec::new();
        for part in pdu::encode_submit(number, text, concat_ref) {
            let command = format!("AT+CMGS={}", part.tpdu_len);
            if let Some(r) = self.submit(&command, part.hex.as_bytes())? {
                references.push(r);
            }
        }
        Ok(SmsReceipt {
            mode: SendMode::Pdu,
            references,
            fell_back: false,
        })
    }

    fn set_format(&mut self, mode: SendMode) -> Result<(), ModemError> {
        if self.format == Some(mode) {
            return Ok(());
        }
        let command = match mode {
            SendMode::Text => "AT+CMGF=1",
            SendMode::Pdu => "AT+CMGF=0",
        };
        let resp = self.exchange(command, self.settings.command_timeout)?;
        if !resp.is_ok() {
            return Err(ModemError::Send {
                carrier_code: resp.status.carrier_code(),
                message: format!("cannot switch to {mode} mode: {}", resp.status),
            });
        }
        self.format = Some(mode);
        Ok(())
    }

    /// `AT+CMGS` two-step: command, wait for `>`, body + Ctrl-Z, wait for result.
    fn submit(&mut self, command: &str, body: &[u8]) -> Result<Option<u8>, ModemError> {
        self.write_command(command)?;
        if let Some(status) = self.await_prompt(command, self.settings.command_timeout)? {
            return Err(rejection(status));
        }

        let mut payload = body.to_vec();
        payload.push(CTRL_Z);
        self.write_raw(&payload)?;

        let resp = self.read_response(command, self.settings.send_timeout)?;
        if resp.is_ok() {
            Ok(at::parse_cmgs(&resp))
        } else {
            Err(rejection(resp.status))
        }
    }

    fn exchange(&mut self, command: &str, timeout: Duration) -> Result<AtResponse, ModemError> {
        self.write_command(command)?;
        self.read_response(command, timeout)
    }

    fn write_command(&mut self, command: &str) -> Result<(), ModemError> {
        tracing::debug!("AT > {command}");
        self.rx.clear();
        if let Some(link) = self.link.as_mut()
            && let Err(e) = link.discard_input()
        {
            tracing::debug!("discard_input failed: {e}");
        }
        self.write_raw(format!("{command}\r").as_bytes())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ModemError::NotReady { state: self.state });
        };
        let result = link.write_all(bytes);
        result.map_err(|e| self.fail(ModemError::Io(e.to_string())))
    }

    fn fill(&mut self) -> Result<(), ModemError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ModemError::NotReady { state: self.state });
        };
        let mut buf = [0u8; READ_CHUNK];
        match link.read(&mut buf) {
            Ok(n) => {
                self.rx.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(e) => Err(self.fail(ModemError::Io(e.to_string()))),
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.rx.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.rx.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&raw).trim().to_string())
    }

    fn timeout(&mut self, command: &str, timeout: Duration) -> ModemError {
        self.fail(ModemError::Timeout {
            command: command.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn read_response(&mut self, command: &str, timeout: Duration) -> Result<AtResponse, ModemError> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            while let Some(line) = self.next_line() {
                if line.is_empty() || line == command {
                    continue;
                }
                if let Some(status) = at::parse_final(&line) {
                    tracing::debug!("AT < {status} ({} data line(s))", lines.len());
                    return Ok(AtResponse { status, lines });
                }
                tracing::debug!("AT < {line}");
                lines.push(line);
            }
            if Instant::now() >= deadline {
                return Err(self.timeout(command, timeout));
            }
            self.fill()?;
        }
    }

    /// Wait for the `>` body prompt. A final result code instead means the
    /// command was refused.
    fn await_prompt(&mut self, command: &str, timeout: Duration) -> Result<Option<AtStatus>, ModemError> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.next_line() {
                if line.starts_with('>') {
                    return Ok(None);
                }
                if let Some(status) = at::parse_final(&line) {
                    return Ok(Some(status));
                }
            }
            // The prompt is usually not newline-terminated.
            if self
                .rx
                .iter()
                .find(|b| !b.is_ascii_whitespace())
                .is_some_and(|&b| b == b'>')
            {
                self.rx.clear();
                return Ok(None);
            }
            if Instant::now() >= deadline {
                return Err(self.timeout(command, timeout));
            }
            self.fill()?;
        }
    }
}

impl Drop for ModemSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn rejection(status: AtStatus) -> ModemError {
    match status.carrier_code() {
        Some(CarrierCode::SmscAddressUnknown) => ModemError::SmscRejected {
            code: CarrierCode::SmscAddressUnknown,
        },
        carrier_code => ModemError::Send {
            carrier_code,
            message: status.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpenCause;
    use crate::modem::sim::{SimProfile, SimulatedOpener};

    fn settings(smsc: Option<&str>) -> SessionSettings {
        SessionSettings {
            port: "/dev/ttySIM0".into(),
            smsc: smsc.map(str::to_string),
            open_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(300),
            send_timeout: Duration::from_millis(300),
            ..Default::default()
        }
    }

    fn session(profile: SimProfile, smsc: Option<&str>) -> (ModemSession, SimulatedOpener) {
        let opener = SimulatedOpener::new(profile);
        let session = ModemSession::new(settings(smsc), Arc::new(opener.clone()));
        (session, opener)
    }

    #[test]
    fn connect_runs_the_pipeline_in_order() {
        let (mut s, sim) = session(SimProfile::default(), Some("+12063130004"));
        s.connect().unwrap();
        assert_eq!(s.state(), ModemState::Ready);
        assert_eq!(s.configured_smsc(), Some("+12063130004"));
        assert_eq!(
            sim.commands(),
            vec![
                "AT",
                "ATE0",
                "AT+CMEE=1",
                "AT+CPIN?",
                "AT+CREG?",
                "AT+CSCS=\"GSM\"",
                "AT+CMGF=1",
                "AT+CSCA=\"+12063130004\",145",
                "AT+CSCA?",
            ]
        );
    }

    #[test]
    fn text_send_returns_reference() {
        let (mut s, sim) = session(SimProfile::default(), None);
        s.connect().unwrap();
        let receipt = s.send_sms("+15550100", "Bin bin1 full", SendMode::Text).unwrap();
        assert_eq!(receipt.mode, SendMode::Text);
        assert_eq!(receipt.references.len(), 1);
        assert!(!receipt.fell_back);

        let sent = sim.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body, "Bin bin1 full");
        assert_eq!(sent[0].number.as_deref(), Some("+15550100"));
    }

    #[test]
    fn rejected_multi_segment_text_falls_back_to_pdu_once() {
        let (mut s, sim) = session(SimProfile::default(), None);
        s.connect().unwrap();
        let receipt = s.send_sms("+15550100", &"a".repeat(200), SendMode::Text).unwrap();
        assert_eq!(receipt.mode, SendMode::Pdu);
        assert!(receipt.fell_back);
        assert_eq!(receipt.references.len(), 2);

        let sent = sim.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.mode == SendMode::Pdu));
        let commands = sim.commands();
        assert!(commands.contains(&"AT+CMGF=0".to_string()));
        assert_eq!(commands.iter().filter(|c| c.starts_with("AT+CMGS=\"")).count(), 1);
    }

    #[test]
    fn single_segment_failure_is_not_retried() {
        let profile = SimProfile {
            send_error: Some(331),
            ..Default::default()
        };
        let (mut s, sim) = session(profile, None);
        s.connect().unwrap();
        let err = s.send_sms("+15550100", "short", SendMode::Text).unwrap_err();
        assert_eq!(err.carrier_code(), Some(CarrierCode::NoNetworkService));
        assert!(matches!(err, ModemError::Send { .. }));
        assert_eq!(s.state(), ModemState::Ready);
        assert_eq!(s.last_error(), Some(&err));
        assert_eq!(
            sim.commands().iter().filter(|c| c.starts_with("AT+CMGS")).count(),
            1
        );
        assert!(sim.sent().is_empty());
    }

    #[test]
    fn smsc_unknown_on_send_is_reported_distinctly() {
        let profile = SimProfile {
            send_error: Some(330),
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        s.connect().unwrap();
        let err = s.send_sms("+15550100", &"b".repeat(200), SendMode::Text).unwrap_err();
        assert_eq!(
            err,
            ModemError::SmscRejected {
                code: CarrierCode::SmscAddressUnknown
            }
        );
    }

    #[test]
    fn smsc_read_back_mismatch_is_surfaced() {
        let profile = SimProfile {
            accept_csca: false,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, Some("+15551234567"));
        let err = s.connect().unwrap_err();
        assert_eq!(
            err,
            ModemError::SmscMismatch {
                expected: "+15551234567".into(),
                reported: Some("+12063130004".into()),
            }
        );
        assert_eq!(s.state(), ModemState::Failed);
    }

    #[test]
    fn missing_smsc_everywhere_fails_init() {
        let profile = SimProfile {
            smsc: None,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        assert!(matches!(s.connect(), Err(ModemError::Init { .. })));
    }

    #[test]
    fn busy_port_fails_fast() {
        let profile = SimProfile {
            busy: true,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        let err = s.open().unwrap_err();
        assert_eq!(
            err,
            ModemError::Open {
                port: "/dev/ttySIM0".into(),
                cause: OpenCause::PortBusy
            }
        );
        assert_eq!(s.state(), ModemState::Failed);
    }

    #[test]
    fn hung_open_is_bounded() {
        let profile = SimProfile {
            open_delay: Duration::from_secs(2),
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        let started = Instant::now();
        let err = s.open().unwrap_err();
        assert!(matches!(err, ModemError::Open { cause: OpenCause::Timeout, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn silent_modem_times_out_and_fails() {
        let profile = SimProfile {
            silent: true,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        s.open().unwrap();
        let err = s.initialize().unwrap_err();
        assert_eq!(
            err,
            ModemError::Timeout {
                command: "AT".into(),
                timeout_ms: 300
            }
        );
        assert_eq!(s.state(), ModemState::Failed);
        assert!(matches!(
            s.send_sms("+1555", "x", SendMode::Text),
            Err(ModemError::NotReady { state: ModemState::Failed })
        ));
    }

    #[test]
    fn sim_not_ready_fails_init() {
        let profile = SimProfile {
            sim_ready: false,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, None);
        s.open().unwrap();
        let err = s.initialize().unwrap_err();
        assert!(matches!(err, ModemError::Init { ref command, .. } if command == "AT+CPIN?"));
    }

    #[test]
    fn close_releases_the_port() {
        let (mut s, sim) = session(SimProfile::default(), None);
        s.connect().unwrap();
        assert!(sim.port_held());

        let mut other = ModemSession::new(settings(None), Arc::new(sim.clone()));
        assert!(matches!(
            other.open(),
            Err(ModemError::Open { cause: OpenCause::PortBusy, .. })
        ));

        s.close();
        assert_eq!(s.state(), ModemState::Closed);
        assert!(!sim.port_held());
        other.open().unwrap();
    }

    #[test]
    fn diagnose_reports_network_state() {
        let profile = SimProfile {
            registered: false,
            ..Default::default()
        };
        let (mut s, _sim) = session(profile, Some("+15551234567"));
        s.open().unwrap();
        let d = s.diagnose();
        assert!(d.responsive);
        assert_eq!(d.sim.as_deref(), Some("READY"));
        assert_eq!(d.rssi, Some(18));
        assert_eq!(d.registration, Some(Registration::Searching));
        assert_eq!(d.operator.as_deref(), Some("T-Mobile"));
        assert_eq!(d.smsc.as_deref(), Some("+12063130004"));
        assert!(d.hints.iter().any(|h| h.contains("no network service")));
        assert!(d.hints.iter().any(|h| h.contains("differs from configured")));
    }

    #[test]
    fn execute_returns_raw_response() {
        let (mut s, _sim) = session(SimProfile::default(), None);
        assert!(matches!(s.execute("AT"), Err(ModemError::NotReady { .. })));
        s.open().unwrap();
        let resp = s.execute("AT+CSQ").unwrap();
        assert_eq!(resp.status, AtStatus::Ok);
        assert_eq!(resp.lines, vec!["+CSQ: 18,99"]);
        let resp = s.execute("AT+BOGUS").unwrap();
        assert_eq!(resp.status, AtStatus::Error);
    }
}
