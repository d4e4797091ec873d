//! OpenFlow 1.0 controller that slices switch traffic by transport.
//!
//! `ofp_controller` runs the control session of each switch and hands
//! `SwitchEvent`s to a controller; `slicing::SlicingController` answers them
//! using the static tables loaded by `config`.

mod bits;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod slicing;
pub mod tables;

pub use error::{Error, Result};
