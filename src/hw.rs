//! Peripheral seams.  The measurement code sees the analog front end only
//! through these; a board crate implements them on the real registers and the
//! tests implement them on a circuit model.
//!
//! Every call is blocking.  Nothing here may yield: pulse and sample timing
//! depends on the exact order of calls.

use embedded_hal::delay::DelayNs;

use crate::config::{Reference, Runtime};

/// Probe lines, pull resistor lines and the converter.
pub trait FrontEnd {
    /// Direct probe lines: bits in `output` are driven, to the level given by
    /// the same bit in `high`; the rest are high impedance.
    fn probe_lines(&mut self, output: u8, high: u8);
    /// Pull resistor lines, same convention as `probe_lines`.
    fn resistor_lines(&mut self, output: u8, high: u8);
    /// Averaged, calibrated voltage in mV.  Honours the reference selection,
    /// auto-scaling and sample count in `run`.
    fn read_voltage(&mut self, channel: u8, run: &Runtime) -> u16;
    /// Converter input and reference for raw conversions.
    fn select(&mut self, channel: u8, reference: Reference);
    /// Start a single conversion on the next converter clock.
    fn start_conversion(&mut self);
    /// Wait for the running conversion and return its code.
    fn conversion_result(&mut self) -> u16;
    /// Discharge all probes.  False if the DUT keeps its charge.
    fn discharge(&mut self) -> bool;
    /// Extra discharge of a cap between two probes.
    fn discharge_pair(&mut self, a: u8, b: u8);
}

/// Analog comparator with the bandgap on its positive input.
pub trait Comparator {
    /// Compare `channel` against the bandgap and route the output to the
    /// capture input of the timer.  The converter is off while armed.
    fn arm(&mut self, channel: u8);
    /// Release the multiplexer and switch the converter back on.
    fn disarm(&mut self);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerFlags {
    pub capture: bool,
    pub overflow: bool,
}

/// 16 bit timer clocked at the MCU clock, with input capture.
pub trait CaptureTimer {
    /// Stop, zero the count and clear all flags.
    fn reset(&mut self);
    fn start(&mut self);
    fn stop(&mut self);
    fn flags(&mut self) -> TimerFlags;
    fn clear_overflow(&mut self);
    fn clear_capture(&mut self);
    /// Count latched by the capture event.
    fn captured(&mut self) -> u16;
    /// Current count.
    fn count(&mut self) -> u16;
}

/// Delays and watchdog.
pub trait Clock: DelayNs {
    fn watchdog(&mut self);
    /// Load the one-shot cycle delay.  `cycles` already excludes the call
    /// overhead of `run_cycles`.
    fn load_cycles(&mut self, cycles: u8);
    /// Run the loaded delay and return when it expires.
    fn run_cycles(&mut self);
}

/// State of a control line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line {
    Low,
    High,
    Open,
}

/// Control line charging and discharging the fixed reference cap through Rh.
pub trait AdjustLine {
    fn adjust_line(&mut self, line: Line);
}

/// Everything a capacitance or ESR measurement needs.
pub trait Board: FrontEnd + Comparator + CaptureTimer + Clock {}

impl<T: FrontEnd + Comparator + CaptureTimer + Clock> Board for T {}
