use crate::Context;
use crate::hw::Board;
use crate::probes::Assignment;

/// Result of a capacitance measurement.  `value × 10^scale` is in farads.
/// Only trusted when the estimator that filled it returned `Ok`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacitor {
    /// Probe pulled down.
    pub a: u8,
    /// Probe pulled up.
    pub b: u8,
    pub scale: i8,
    /// Before correction: uncompensated in the large range, without the zero
    /// offset in the small range.
    pub raw: u32,
    /// Corrected value.
    pub value: u32,
    /// Leakage current, `i_leak_value × 10^i_leak_scale` A.
    pub i_leak_value: u16,
    pub i_leak_scale: i8,
    /// Voltage loss in 0.1%.
    pub u_loss: u16,
}

impl Default for Capacitor {
    fn default() -> Self {
        Capacitor {
            a: 0, b: 0, scale: -12, raw: 0, value: 0,
            i_leak_value: 0, i_leak_scale: 0, u_loss: 0,
        }
    }
}

impl Capacitor {
    pub fn reset(&mut self) {
        *self = Capacitor::default();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapError {
    /// Below the range of the estimator; try the next one.
    TooLow,
    /// Charge threshold not reached in time.
    TooHigh,
    /// Does not hold its charge.
    NotCapacitor,
    /// Probes would not discharge.
    Discharge,
    /// Measurement not attempted for this probe pair.
    Skipped,
}

pub trait CapacitanceEstimator {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         probes: &Assignment, cap: &mut Capacitor)
                         -> Result<(), CapError>;
}

/// Discharge the probes, flagging the pair as an error if that fails.
pub fn discharge<B: Board>(board: &mut B, ctx: &mut Context)
                           -> Result<(), CapError> {
    if board.discharge() {
        Ok(())
    }
    else {
        crate::dbgln!("discharge failed");
        ctx.check.fail();
        Err(CapError::Discharge)
    }
}

#[test]
fn reset_defaults() {
    let mut cap = Capacitor {
        a: 1, b: 2, scale: -6, raw: 5, value: 4,
        i_leak_value: 9, i_leak_scale: -8, u_loss: 3};
    cap.reset();
    assert_eq!(cap.scale, -12);
    assert_eq!((cap.raw, cap.value, cap.a, cap.b), (0, 0, 0, 0));
    assert_eq!((cap.i_leak_value, cap.u_loss), (0, 0));
}
