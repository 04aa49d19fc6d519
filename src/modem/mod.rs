//! AT-command modem transport: parsing, PDU encoding, the session state
//! machine, and the single-owner dispatcher in front of it.

pub mod at;
mod dispatcher;
pub mod link;
pub mod pdu;
mod session;
pub mod sim;

pub use at::{AtResponse, AtStatus, CarrierCode, Registration};
pub use dispatcher::{ModemDispatcher, ModemTransport};
pub use session::{ModemDiagnosis, ModemSession, ModemState, SendMode, SessionSettings, SmsReceipt};
