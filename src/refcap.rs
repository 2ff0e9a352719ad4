//! Offset adjustment against a cap of known good quality.  With a fixed
//! reference cap on its own channel the bandgap and comparator offsets are
//! measured on demand; without one the small cap measurement uses the DUT.

use crate::Context;
use crate::dbgln;
use crate::hw::{AdjustLine, Board, FrontEnd, Line};
use crate::small::time_charge;

/// Discharged enough to start a timed charge.
const DISCHARGED_MV: u16 = 2;
/// Below the bandgap, where the converter can use it as reference.
const BELOW_BANDGAP_MV: u16 = 980;
/// Readings before giving up on bringing a cap below the bandgap.
const DISCHARGE_READS: u32 = 500;
/// Offset readings closer than this are converter noise.
const MIN_OFFSET: i32 = 4;
/// Plausible comparator offset.
const MAX_COMP_OFFSET: i32 = 50;

/// Wait for the voltage on `channel` to fall below the bandgap while the
/// caller discharges it.
pub(crate) fn discharge_below<B: Board>(board: &mut B, ctx: &Context,
                                        channel: u8) -> bool {
    for _ in 0 .. DISCHARGE_READS {
        if board.read_voltage(channel, &ctx.run) <= BELOW_BANDGAP_MV {
            return true;
        }
        board.watchdog();
    }
    false
}

/// Read the same voltage against Vcc and against the bandgap; the difference
/// is the bandgap error.  `u_c` is the voltage the comparator tripped at.
pub(crate) fn adjust_offsets<B: FrontEnd>(board: &mut B, ctx: &mut Context,
                                          channel: u8, u_c: u16,
                                          update_bandgap: bool) {
    let mut run = ctx.run;
    run.auto_scale = false;
    let u_vcc = board.read_voltage(channel, &run);
    run.auto_scale = true;
    let u_bg = board.read_voltage(channel, &run);

    let mut bandgap = ctx.run.bandgap as i32;
    let offset = u_vcc as i32 - u_bg as i32;
    if offset.abs() > MIN_OFFSET {
        let delta = (offset * bandgap / u_bg.max(1) as i32)
            .clamp(i8::MIN as i32, i8::MAX as i32) as i8;
        ctx.cal.ref_offset = ctx.cal.ref_offset.saturating_add(delta);
        bandgap += delta as i32;
        if update_bandgap {
            ctx.run.bandgap = bandgap.max(0) as u16;
        }
    }

    let offset = u_c as i32 - bandgap;
    if offset.abs() < MAX_COMP_OFFSET {
        ctx.cal.comp_offset = offset as i8;
    }
    dbgln!("adjust: vcc {} bg {} comp {}mV", u_vcc, u_bg, offset);
}

/// Measure the offsets with the reference cap.  False if the cap would not
/// discharge or did not charge in time, leaving the offsets untouched.
pub fn ref_cap<B: Board + AdjustLine>(board: &mut B, ctx: &mut Context)
                                      -> bool {
    let ch = ctx.cfg.ref_cap_channel;

    // Gnd -- cap -- Rh -- adjust line.
    board.adjust_line(Line::Low);
    let mut discharged = false;
    for _ in 0 ..= 50 {
        if board.read_voltage(ch, &ctx.run) <= DISCHARGED_MV {
            discharged = true;
            break;
        }
        board.delay_ms(20);
    }
    if !discharged {
        dbgln!("refcap: not discharged");
        return false;
    }

    board.arm(ch);
    board.delay_us(200);
    board.reset();
    let budget = ctx.cfg.overflow_budget();
    let charge = time_charge(
        board, budget, |b: &mut B| b.adjust_line(Line::High));
    board.adjust_line(Line::Open);
    if board.flags().overflow {
        board.clear_overflow();
    }
    board.disarm();

    let u_c = board.read_voltage(ch, &ctx.run);
    board.adjust_line(Line::Low);
    if charge.overflows >= budget {
        dbgln!("refcap: timeout");
        return false;
    }

    if discharge_below(board, ctx, ch) {
        board.adjust_line(Line::Open);
        adjust_offsets(board, ctx, ch, u_c, true);
    }
    board.adjust_line(Line::Low);
    true
}

#[test]
fn reference_cap() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    sim.reference(470e-9);
    sim.bandgap = 1.080;
    sim.comp_offset = 0.010;
    let mut ctx = Context::default();
    assert!(ref_cap(&mut sim, &mut ctx));
    assert!((-22 ..= -18).contains(&ctx.cal.ref_offset),
            "{}", ctx.cal.ref_offset);
    assert!((8 ..= 12).contains(&ctx.cal.comp_offset),
            "{}", ctx.cal.comp_offset);
    assert_eq!(ctx.run.bandgap as i32, 1100 + ctx.cal.ref_offset as i32);
}

#[test]
fn reference_cap_in_tolerance() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    sim.reference(470e-9);
    let mut ctx = Context::default();
    assert!(ref_cap(&mut sim, &mut ctx));
    assert_eq!(ctx.cal.ref_offset, 0);
    assert!(ctx.cal.comp_offset.abs() <= 2);
    assert_eq!(ctx.run.bandgap, 1100);
}

#[test]
fn reference_cap_missing() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    let mut ctx = Context::default();
    // No cap: the comparator trips at once and the timing is meaningless,
    // but nothing times out either.
    assert!(ref_cap(&mut sim, &mut ctx));
    let mut sim = Sim::new();
    sim.reference(1.0);
    let mut ctx = Context::default();
    assert!(!ref_cap(&mut sim, &mut ctx));
    assert_eq!(ctx.cal, crate::calib::Calibration::default());
}

#[test]
fn comp_offset_rejected() {
    struct Fixed(u16, u16);
    impl FrontEnd for Fixed {
        fn probe_lines(&mut self, _: u8, _: u8) {}
        fn resistor_lines(&mut self, _: u8, _: u8) {}
        fn read_voltage(&mut self, _: u8, run: &crate::config::Runtime)
                        -> u16 {
            if run.auto_scale {self.1} else {self.0}
        }
        fn select(&mut self, _: u8, _: crate::config::Reference) {}
        fn start_conversion(&mut self) {}
        fn conversion_result(&mut self) -> u16 {0}
        fn discharge(&mut self) -> bool {true}
        fn discharge_pair(&mut self, _: u8, _: u8) {}
    }
    let mut ctx = Context::default();
    // Same reading both ways: only the comparator offset moves.
    adjust_offsets(&mut Fixed(900, 900), &mut ctx, 0, 1130, false);
    assert_eq!((ctx.cal.ref_offset, ctx.cal.comp_offset), (0, 30));
    // Implausible comparator offset is ignored.
    adjust_offsets(&mut Fixed(900, 900), &mut ctx, 0, 1200, false);
    assert_eq!(ctx.cal.comp_offset, 30);
    // Noise-sized bandgap error is ignored.
    adjust_offsets(&mut Fixed(900, 904), &mut ctx, 0, 1100, true);
    assert_eq!((ctx.cal.ref_offset, ctx.run.bandgap), (0, 1100));
    adjust_offsets(&mut Fixed(900, 918), &mut ctx, 0, 1100, true);
    assert_eq!(ctx.cal.ref_offset, -21);
    assert_eq!(ctx.run.bandgap, 1079);
    assert_eq!(ctx.cal.comp_offset, 21);
}
