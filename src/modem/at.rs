//! AT response parsing and carrier error decoding.

use std::fmt;

use serde::Serialize;

/// Final result code of one AT exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtStatus {
    Ok,
    Error,
    CmeError(u16),
    CmsError(u16),
}

impl AtStatus {
    pub fn is_ok(self) -> bool {
        self == AtStatus::Ok
    }

    /// The carrier diagnostic carried by an extended error, if any.
    pub fn carrier_code(self) -> Option<CarrierCode> {
        match self {
            AtStatus::CmsError(code) => Some(CarrierCode::from_cms(code)),
            AtStatus::CmeError(code) => Some(CarrierCode::from_cme(code)),
            _ => None,
        }
    }
}

impl fmt::Display for AtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtStatus::Ok => write!(f, "OK"),
            AtStatus::Error => write!(f, "ERROR"),
            AtStatus::CmeError(code) => write!(f, "+CME ERROR: {code}"),
            AtStatus::CmsError(code) => write!(f, "+CMS ERROR: {code}"),
        }
    }
}

/// Parse a line that terminates an exchange. Anything else is data.
pub fn parse_final(line: &str) -> Option<AtStatus> {
    let line = line.trim();
    match line {
        "OK" => return Some(AtStatus::Ok),
        "ERROR" | "NO CARRIER" => return Some(AtStatus::Error),
        _ => {}
    }
    if let Some(rest) = line.strip_prefix("+CME ERROR:") {
        return Some(rest.trim().parse().map_or(AtStatus::Error, AtStatus::CmeError));
    }
    if let Some(rest) = line.strip_prefix("+CMS ERROR:") {
        return Some(rest.trim().parse().map_or(AtStatus::Error, AtStatus::CmsError));
    }
    None
}

/// `{status, lines}` for one command. Echo and blank lines are not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AtResponse {
    pub status: AtStatus,
    pub lines: Vec<String>,
}

impl AtResponse {
    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Payload of the first line starting with `prefix` (e.g. `+CSQ:`), trimmed.
    pub fn field(&self, prefix: &str) -> Option<&str> {
        self.lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(str::trim)
    }
}

/// Carrier-side diagnostics decoded from `+CMS ERROR` / `+CME ERROR` numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CarrierCode {
    NoNetworkService,
    SmscAddressUnknown,
    NetworkTimeout,
    InvalidMessageFormat,
    SimRestriction,
    OperationNotAllowed,
    Other(u16),
}

impl CarrierCode {
    pub fn from_cms(code: u16) -> Self {
        match code {
            331 => CarrierCode::NoNetworkService,
            330 => CarrierCode::SmscAddressUnknown,
            332 => CarrierCode::NetworkTimeout,
            304 | 305 => CarrierCode::InvalidMessageFormat,
            // SIM states, operator barring, facility not subscribed
            310..=318 | 8 | 10 | 50 => CarrierCode::SimRestriction,
            302 => CarrierCode::OperationNotAllowed,
            other => CarrierCode::Other(other),
        }
    }

    pub fn from_cme(code: u16) -> Self {
        match code {
            30 => CarrierCode::NoNetworkService,
            31 => CarrierCode::NetworkTimeout,
            10..=18 => CarrierCode::SimRestriction,
            3 => CarrierCode::OperationNotAllowed,
            other => CarrierCode::Other(other),
        }
    }

    /// Operator-facing explanation.
    pub fn description(self) -> String {
        match self {
            CarrierCode::NoNetworkService => "no network service; check antenna and registration".into(),
            CarrierCode::SmscAddressUnknown => {
                "SMS center address unknown; SMSC does not match the SIM's carrier".into()
            }
            CarrierCode::NetworkTimeout => "network timed out delivering to the SMS center".into(),
            CarrierCode::InvalidMessageFormat => "invalid message format for the current mode".into(),
            CarrierCode::SimRestriction => "SIM restriction (PIN, barring, or no SMS subscription)".into(),
            CarrierCode::OperationNotAllowed => "operation not allowed by the modem".into(),
            CarrierCode::Other(code) => format!("carrier error {code}"),
        }
    }
}

impl fmt::Display for CarrierCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarrierCode::NoNetworkService => write!(f, "no_network_service"),
            CarrierCode::SmscAddressUnknown => write!(f, "smsc_address_unknown"),
            CarrierCode::NetworkTimeout => write!(f, "network_timeout"),
            CarrierCode::InvalidMessageFormat => write!(f, "invalid_message_format"),
            CarrierCode::SimRestriction => write!(f, "sim_restriction"),
            CarrierCode::OperationNotAllowed => write!(f, "operation_not_allowed"),
            CarrierCode::Other(code) => write!(f, "error_{code}"),
        }
    }
}

/// `+CREG` registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    NotRegistered,
    Home,
    Searching,
    Denied,
    Unknown,
    Roaming,
}

impl Registration {
    pub fn is_registered(self) -> bool {
        matches!(self, Registration::Home | Registration::Roaming)
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Registration::NotRegistered => "not registered",
            Registration::Home => "home",
            Registration::Searching => "searching",
            Registration::Denied => "denied",
            Registration::Unknown => "unknown",
            Registration::Roaming => "roaming",
        };
        f.write_str(s)
    }
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"')
}

/// `+CSCA: "+12063130004",145` → the SMSC number. An empty stored address is `None`.
pub fn parse_csca(resp: &AtResponse) -> Option<String> {
    let field = resp.field("+CSCA:")?;
    let number = unquote(field.split(',').next()?);
    (!number.is_empty()).then(|| number.to_string())
}

/// `+CREG: <n>,<stat>` (query form) or `+CREG: <stat>` (unsolicited form).
pub fn parse_creg(resp: &AtResponse) -> Option<Registration> {
    let field = resp.field("+CREG:")?;
    let parts: Vec<&str> = field.split(',').map(str::trim).collect();
    let stat = if parts.len() >= 2 { parts[1] } else { parts[0] };
    Some(match stat.parse::<u8>().ok()? {
        0 => Registration::NotRegistered,
        1 => Registration::Home,
        2 => Registration::Searching,
        3 => Registration::Denied,
        5 => Registration::Roaming,
        _ => Registration::Unknown,
    })
}

/// `+CSQ: <rssi>,<ber>`. 99 means not detectable.
pub fn parse_csq(resp: &AtResponse) -> Option<u8> {
    let field = resp.field("+CSQ:")?;
    let rssi: u8 = field.split(',').next()?.trim().parse().ok()?;
    (rssi != 99).then_some(rssi)
}

/// `+CSQ` rssi to dBm.
pub fn rssi_dbm(rssi: u8) -> i16 {
    -113 + 2 * i16::from(rssi)
}

/// `+COPS: 0,0,"Operator",7` → operator name.
pub fn parse_cops(resp: &AtResponse) -> Option<String> {
    let field = resp.field("+COPS:")?;
    let name = unquote(field.split(',').nth(2)?);
    (!name.is_empty()).then(|| name.to_string())
}

/// `+CPIN: READY` → `READY`.
pub fn parse_cpin(resp: &AtResponse) -> Option<String> {
    resp.field("+CPIN:").map(str::to_string)
}

/// `+CMGS: <mr>` → message reference.
pub fn parse_cmgs(resp: &AtResponse) -> Option<u8> {
    resp.field("+CMGS:")?.split(',').next()?.trim().parse().ok()
}

/// Digits of a phone number with the international `+` dropped, for comparison.
pub fn normalize_number(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}
