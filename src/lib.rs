//! Capacitance, leakage, voltage loss and ESR measurement for a three probe
//! component tester.
//!
//! The analog front end is reached only through the traits in `hw`.  All
//! state shared with the rest of the tester travels in a `Context`.

#![cfg_attr(not(test), no_std)]

#[cfg_attr(feature = "debug", path = "debug.rs")]
#[cfg_attr(not(feature = "debug"), path = "nodebug.rs")]
pub mod debug;

pub mod calib;
pub mod cap;
pub mod check;
pub mod config;
pub mod esr;
pub mod hw;
pub mod large;
pub mod measure;
pub mod probes;
pub mod refcap;
pub mod small;
pub mod table;
pub mod utils;

#[cfg_attr(not(feature = "debug"), allow(dead_code))]
mod vcell;

#[cfg(test)]
mod sim;

use calib::Calibration;
use check::Check;
use config::{Config, Runtime};

pub use cap::{CapError, Capacitor};
pub use measure::{measure_cap, measure_esr};
pub use refcap::ref_cap;

/// The tester this build is for.
pub const CONFIG: Config = Config::new(8000000);

/// Everything the measurements read and update.
#[derive(Clone, Debug)]
pub struct Context<'a> {
    pub cfg: &'a Config,
    pub cal: Calibration,
    pub run: Runtime,
    pub check: Check,
}

impl<'a> Context<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Context {
            cfg,
            cal: Calibration::default(),
            run: Runtime::default(),
            check: Check::default(),
        }
    }
}

impl Default for Context<'static> {
    fn default() -> Self {Context::new(&CONFIG)}
}
