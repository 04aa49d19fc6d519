//! binwatch: waste-bin fill telemetry turned into collection tasks, with
//! staff notified over SMS (through an AT-command GSM modem) and push.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod interrupt;
pub mod modem;
pub mod notify;
pub mod tasks;
pub mod telemetry;
pub mod ui;
