//! Device features built on top of the link
//!
//! Each service is a thin sequence of device calls with its outcome shown
//! through a view or returned to the caller.

pub mod configuration;
pub mod firmware;
pub mod notification;
pub mod update_check;
pub mod wifi;
