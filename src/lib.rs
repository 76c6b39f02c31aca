//! School attendance tracking: sessions, barcode check-ins and the
//! statistics derived from them, served over a JSON-lines request channel.

pub mod analytics;
pub mod calc;
pub mod checkin;
pub mod clock;
pub mod codec;
pub mod config;
pub mod dashboard;
pub mod directory;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod notify;
pub mod reports;
pub mod store;
pub mod validate;
