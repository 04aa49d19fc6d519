//! A scripted modem behind the serial seam. Answers the AT subset the
//! session uses, records every command, and counts exchanges that overlap
//! on the port. Drives `binwatch demo` and the modem tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::link::{SerialLink, SerialOpener};
use super::session::SendMode;
use crate::error::OpenCause;
use crate::notify::gsm;

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;
const IDLE_POLL: Duration = Duration::from_millis(5);

/// How the simulated modem and its SIM behave.
#[derive(Debug, Clone)]
pub struct SimProfile {
    /// SMSC stored on the SIM.
    pub smsc: Option<String>,
    pub sim_ready: bool,
    pub registered: bool,
    pub operator: String,
    pub rssi: u8,
    /// Longest text-mode body accepted, in septets.
    pub text_mode_max_len: usize,
    /// `+CMS ERROR` code returned for every submitted body.
    pub send_error: Option<u16>,
    /// When false, `AT+CSCA=` answers OK but the SIM keeps its old address.
    pub accept_csca: bool,
    /// Never answer anything.
    pub silent: bool,
    /// Port held by another process.
    pub busy: bool,
    pub open_delay: Duration,
    /// Time the modem spends on each submitted body.
    pub send_delay: Duration,
}

impl Default for SimProfile {
    fn default() -> Self {
        Self {
            smsc: Some("+12063130004".into()),
            sim_ready: true,
            registered: true,
            operator: "T-Mobile".into(),
            rssi: 18,
            text_mode_max_len: gsm::SINGLE_SEGMENT_SEPTETS,
            send_error: None,
            accept_csca: true,
            silent: false,
            busy: false,
            open_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
        }
    }
}

/// A message the simulated modem accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    /// Destination in text mode; PDU bodies carry it inside the hex.
    pub number: Option<String>,
    pub body: String,
    pub mode: SendMode,
}

#[derive(Debug, Default)]
struct SimState {
    commands: Vec<String>,
    sent: Vec<SentSms>,
    smsc: Option<String>,
    port_held: bool,
    in_flight: bool,
    overlaps: usize,
    next_reference: u8,
}

/// Opens [`SimulatedModem`]s that share one port state. Clones observe the
/// same port.
#[derive(Clone)]
pub struct SimulatedOpener {
    profile: SimProfile,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedOpener {
    pub fn new(profile: SimProfile) -> Self {
        let state = SimState {
            smsc: profile.smsc.clone(),
            ..Default::default()
        };
        Self {
            profile,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&SimState) -> T) -> T {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    pub fn commands(&self) -> Vec<String> {
        self.with_state(|s| s.commands.clone())
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.with_state(|s| s.sent.clone())
    }

    pub fn port_held(&self) -> bool {
        self.with_state(|s| s.port_held)
    }

    /// Commands that arrived while another exchange was still unanswered.
    pub fn overlaps(&self) -> usize {
        self.with_state(|s| s.overlaps)
    }
}

impl SerialOpener for SimulatedOpener {
    fn open(&self, _port: &str, _baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenCause> {
        if !self.profile.open_delay.is_zero() {
            std::thread::sleep(self.profile.open_delay);
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.profile.busy || state.port_held {
            return Err(OpenCause::PortBusy);
        }
        state.port_held = true;
        Ok(Box::new(SimulatedModem {
            profile: self.profile.clone(),
            state: self.state.clone(),
            input: Vec::new(),
            output: VecDeque::new(),
            echo: true,
            text_mode: true,
            pending: None,
            final_queued: false,
        }))
    }
}

enum PendingBody {
    Text { number: String },
    Pdu,
}

pub struct SimulatedModem {
    profile: SimProfile,
    state: Arc<Mutex<SimState>>,
    input: Vec<u8>,
    output: VecDeque<u8>,
    echo: bool,
    text_mode: bool,
    pending: Option<PendingBody>,
    final_queued: bool,
}

impl SimulatedModem {
    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reply(&mut self, line: &str) {
        self.output.extend(format!("\r\n{line}\r\n").bytes());
    }

    fn finish(&mut self, line: &str) {
        self.reply(line);
        self.final_queued = true;
    }

    fn process(&mut self) {
        loop {
            if self.pending.is_some() {
                let Some(end) = self.input.iter().position(|&b| b == CTRL_Z || b == ESC) else {
                    return;
                };
                let raw: Vec<u8> = self.input.drain(..=end).collect();
                let body = String::from_utf8_lossy(&raw[..raw.len() - 1]).to_string();
                let cancelled = raw[raw.len() - 1] == ESC;
                if let Some(pending) = self.pending.take() {
                    if cancelled {
                        self.finish("OK");
                    } else {
                        self.submit(pending, body);
                    }
                }
                continue;
            }

            let Some(end) = self.input.iter().position(|&b| b == b'\r') else {
                return;
            };
            let raw: Vec<u8> = self.input.drain(..=end).collect();
            let command = String::from_utf8_lossy(&raw).trim().to_string();
            if command.is_empty() {
                continue;
            }
            self.command(&command);
        }
    }

    fn command(&mut self, command: &str) {
        {
            let mut state = self.lock();
            if state.in_flight {
                state.overlaps += 1;
            }
            state.in_flight = true;
            state.commands.push(command.to_string());
        }
        if self.profile.silent {
            return;
        }
        if self.echo {
            self.output.extend(format!("{command}\r").bytes());
        }

        let upper = command.to_ascii_uppercase();
        match upper.as_str() {
            "AT" | "AT+CMEE=1" | "AT+CSCS=\"GSM\"" => self.finish("OK"),
            "ATE0" => {
                self.echo = false;
                self.finish("OK");
            }
            "ATE1" => {
                self.echo = true;
                self.finish("OK");
            }
            "AT+CPIN?" => {
                if self.profile.sim_ready {
                    self.reply("+CPIN: READY");
                    self.finish("OK");
                } else {
                    self.finish("+CME ERROR: 10");
                }
            }
            "AT+CREG?" => {
                let stat = if self.profile.registered { 1 } else { 2 };
                self.reply(&format!("+CREG: 0,{stat}"));
                self.finish("OK");
            }
            "AT+CSQ" => {
                self.reply(&format!("+CSQ: {},99", self.profile.rssi));
                self.finish("OK");
            }
            "AT+COPS?" => {
                self.reply(&format!("+COPS: 0,0,\"{}\",7", self.profile.operator));
                self.finish("OK");
            }
            "AT+CMGF=1" => {
                self.text_mode = true;
                self.finish("OK");
            }
            "AT+CMGF=0" => {
                self.text_mode = false;
                self.finish("OK");
            }
            "AT+CSCA?" => {
                let smsc = self.lock().smsc.clone();
                match smsc {
                    Some(number) => self.reply(&format!("+CSCA: \"{number}\",145")),
                    None => self.reply("+CSCA: \"\",129"),
                }
                self.finish("OK");
            }
            _ => {
                if let Some(args) = command.strip_prefix("AT+CSCA=") {
                    let number = args.split(',').next().unwrap_or_default().trim_matches('"');
                    if self.profile.accept_csca {
                        self.lock().smsc = Some(number.to_string());
                    }
                    self.finish("OK");
                } else if let Some(arg) = command.strip_prefix("AT+CMGS=") {
                    self.begin_submit(arg);
                } else {
                    self.finish("ERROR");
                }
            }
        }
    }

    fn begin_submit(&mut self, arg: &str) {
        let quoted = arg.starts_with('"');
        if self.text_mode && quoted {
            self.pending = Some(PendingBody::Text {
                number: arg.trim_matches('"').to_string(),
            });
        } else if !self.text_mode && arg.parse::<usize>().is_ok() {
            self.pending = Some(PendingBody::Pdu);
        } else {
            let code = if self.text_mode { 305 } else { 304 };
            self.finish(&format!("+CMS ERROR: {code}"));
            return;
        }
        self.output.extend(b"\r\n> ");
    }

    fn submit(&mut self, pending: PendingBody, body: String) {
        if !self.profile.send_delay.is_zero() {
            std::thread::sleep(self.profile.send_delay);
        }
        if let Some(code) = self.profile.send_error {
            self.finish(&format!("+CMS ERROR: {code}"));
            return;
        }
        let sent = match pending {
            PendingBody::Text { number } => {
                if gsm::septet_len(&body) > self.profile.text_mode_max_len {
                    self.finish("+CMS ERROR: 305");
                    return;
                }
                SentSms {
                    number: Some(number),
                    body,
                    mode: SendMode::Text,
                }
            }
            PendingBody::Pdu => SentSms {
                number: None,
                body,
                mode: SendMode::Pdu,
            },
        };
        let reference = {
            let mut state = self.lock();
            state.sent.push(sent);
            state.next_reference = state.next_reference.wrapping_add(1);
            state.next_reference
        };
        self.reply(&format!("+CMGS: {reference}"));
        self.finish("OK");
    }
}

impl SerialLink for SimulatedModem {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.input.extend_from_slice(bytes);
        self.process();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            std::thread::sleep(IDLE_POLL);
            return Ok(0);
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        if self.output.is_empty() && self.final_queued {
            self.final_queued = false;
            self.lock().in_flight = false;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.output.clear();
        if self.final_queued {
            self.final_queued = false;
            self.lock().in_flight = false;
        }
        Ok(())
    }
}

impl Drop for SimulatedModem {
    fn drop(&mut self) {
        let mut state = self.lock();
        state.port_held = false;
        state.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(link: &mut Box<dyn SerialLink>) -> String {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = link.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn answers_with_echo_until_disabled() {
        let opener = SimulatedOpener::new(SimProfile::default());
        let mut link = opener.open("/dev/ttySIM0", 115_200).unwrap();

        link.write_all(b"AT\r").unwrap();
        assert_eq!(read_all(&mut link), "AT\r\r\nOK\r\n");

        link.write_all(b"ATE0\r").unwrap();
        read_all(&mut link);
        link.write_all(b"AT+CSQ\r").unwrap();
        assert_eq!(read_all(&mut link), "\r\n+CSQ: 18,99\r\n\r\nOK\r\n");
        assert_eq!(opener.commands(), vec!["AT", "ATE0", "AT+CSQ"]);
    }

    #[test]
    fn second_open_sees_busy_port() {
        let opener = SimulatedOpener::new(SimProfile::default());
        let link = opener.open("p", 9600).unwrap();
        assert_eq!(opener.open("p", 9600).err(), Some(OpenCause::PortBusy));
        drop(link);
        assert!(opener.open("p", 9600).is_ok());
    }

    #[test]
    fn unanswered_command_counts_as_overlap() {
        let opener = SimulatedOpener::new(SimProfile::default());
        let mut link = opener.open("p", 9600).unwrap();
        link.write_all(b"AT\r").unwrap();
        link.write_all(b"AT\r").unwrap();
        assert_eq!(opener.overlaps(), 1);
        read_all(&mut link);
        link.write_all(b"AT\r").unwrap();
        assert_eq!(opener.overlaps(), 1);
    }
}
