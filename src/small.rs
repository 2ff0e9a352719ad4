//! Caps below about 4.7µF: time the charge through Rh up to the bandgap
//! voltage with the analog comparator driving the timer capture input.

use crate::Context;
use crate::cap::{CapError, CapacitanceEstimator, Capacitor, discharge};
use crate::check::Kind;
use crate::dbgln;
use crate::hw::{Board, TimerFlags};
use crate::probes::{Assignment, Pins};
use crate::refcap::{adjust_offsets, discharge_below};
use crate::table::{Table, factor};
use crate::utils::{cmp_value, rescale};

/// Self-adjust on caps from 100nF, i.e. timings long enough to be precise.
const ADJUST_PF: u32 = 100000;
/// ... or up to 20µF at nF scale.
const ADJUST_NF: u32 = 20000;
/// Voltage loss measured above 50nF.
const VLOSS_NF: u32 = 50;

pub struct SmallCap;

/// Outcome of a timed charge.
pub(crate) struct Charge {
    pub ticks: u16,
    pub overflows: u32,
    pub flags: TimerFlags,
}

/// Start the timer, let `begin` start the charge and wait for the
/// comparator.  Stops after `budget` overflows.  The timer is left stopped
/// with the capture flag cleared.
pub(crate) fn time_charge<B: Board>(board: &mut B, budget: u32,
                                    begin: impl FnOnce(&mut B)) -> Charge {
    board.start();
    begin(board);
    let mut overflows = 0;
    let mut flags;
    loop {
        flags = board.flags();
        if flags.capture {
            break;
        }
        if flags.overflow {
            board.clear_overflow();
            board.watchdog();
            overflows += 1;
            if overflows >= budget {
                break;
            }
        }
    }
    board.stop();
    board.clear_capture();
    Charge {ticks: board.captured(), overflows, flags}
}

/// Compensated capacitance from the charge time, before the zero offset.
fn from_ticks(ctx: &Context, ticks: u16, overflows: u32) -> (u32, i8) {
    let mut raw = (overflows << 16) | ticks as u32;
    // Capture latency.
    if raw > 2 {
        raw -= 2;
    }
    let mut scale = -12;
    if raw > u32::MAX / 1000 {
        raw /= 1000;
        scale += 3;
    }
    let threshold = (ctx.run.bandgap as i32 + ctx.cal.comp_offset as i32)
        .max(0) as u16;
    let mut raw = raw as u64 * factor(Table::SmallCap, threshold) as u64;
    raw /= (ctx.cfg.cpu_freq / 10000) as u64;
    let comp = ctx.cfg.cap_factor_small;
    if comp != 0 {
        raw = raw * 1000 / (1000 - comp as i64).max(1) as u64;
    }
    (raw.min(u32::MAX as u64) as u32, scale)
}

impl CapacitanceEstimator for SmallCap {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         probes: &Assignment, cap: &mut Capacitor)
                         -> Result<(), CapError> {
        let Assignment {p1, p2, all, ..} = *probes;
        let cfg = ctx.cfg;
        discharge(board, ctx)?;

        // Hold everything low, Rh on probe-1 ready.
        board.resistor_lines(0, 0);
        board.probe_lines(all, 0);
        board.resistor_lines(p1.rh, 0);
        board.arm(p1.ch);
        board.delay_us(200);

        // Gnd -- probe-2 / probe-1 -- Rh -- Vcc.
        board.reset();
        board.resistor_lines(p1.rh, p1.rh);
        let hold = if ctx.check.found == Kind::Fet {all & !p1.pin}
                   else {p2.pin};
        let budget = cfg.overflow_budget();
        let mut charge = time_charge(
            board, budget, |b: &mut B| b.probe_lines(hold, 0));
        board.resistor_lines(0, 0);

        // Overflow that came in just before the capture.
        if board.count() > charge.ticks && charge.flags.overflow {
            board.clear_overflow();
            charge.overflows += 1;
        }
        board.disarm();

        let u_c = if cfg.hw_adjust {0}
                  else {board.read_voltage(p1.ch, &ctx.run)};
        // Discharge through Rh.
        board.resistor_lines(p1.rh, 0);

        if charge.overflows >= budget {
            dbgln!("small: timeout");
            return Err(CapError::TooHigh);
        }

        let (raw, scale) = from_ticks(ctx, charge.ticks, charge.overflows);
        let mut value = raw;
        if scale == -12 {
            let zero = ctx.cal.cap_zero(cfg.multi_offset, p1.id, p2.id);
            value = value.saturating_sub(zero as u32);
        }
        cap.a = p2.id;
        cap.b = p1.id;
        cap.scale = scale;
        cap.raw = raw;
        cap.value = value;
        dbgln!("small: {} ovf {} ticks -> {}e{}",
               charge.overflows, charge.ticks, value, scale);

        if !cfg.hw_adjust
            && (scale == -12 && value >= ADJUST_PF
                || scale == -9 && value <= ADJUST_NF) {
            self_adjust(board, ctx, p1, u_c);
        }

        if cfg.vloss && cmp_value(value, scale, VLOSS_NF, -9).is_gt() {
            voltage_loss(board, ctx, probes, cap)?;
        }
        Ok(())
    }
}

/// Use the DUT as reference: compare a Vcc and a bandgap reading of the same
/// voltage, and the comparator trip voltage with the bandgap.
fn self_adjust<B: Board>(board: &mut B, ctx: &mut Context, p1: Pins,
                         u_c: u16) {
    if !discharge_below(board, ctx, p1.ch) {
        dbgln!("small: no adjust, still charged");
        return;
    }
    board.resistor_lines(0, 0);
    adjust_offsets(board, ctx, p1.ch, u_c, false);
    board.resistor_lines(p1.rh, 0);
}

/// Charge for a time proportional to the capacitance, then compare two
/// readings taken the same time apart.
fn voltage_loss<B: Board>(board: &mut B, ctx: &mut Context,
                          probes: &Assignment, cap: &mut Capacitor)
                          -> Result<(), CapError> {
    let Assignment {p1, p2, ..} = *probes;
    // 10nF units.
    let units = rescale(cap.value, cap.scale, -8);
    discharge(board, ctx)?;

    // Gnd -- probe-2 / probe-1 -- Rl -- Gnd.
    board.probe_lines(p2.pin, 0);
    board.resistor_lines(p1.rl, 0);
    let u_zero = board.read_voltage(p1.ch, &ctx.run);

    // Up to about half the bandgap voltage.
    board.resistor_lines(p1.rl, p1.rl);
    board.delay_us(5 * (units / 2));
    board.resistor_lines(0, 0);
    board.watchdog();

    let mut run = ctx.run;
    run.samples = 5;
    let u_start = board.read_voltage(p1.ch, &run).saturating_sub(u_zero);
    board.delay_us(5 * units);
    let u_end = board.read_voltage(p1.ch, &run).saturating_sub(u_zero);
    board.watchdog();

    if u_start > u_end {
        cap.u_loss = ((u_start - u_end) as u32 * 500 / u_start as u32) as u16;
    }
    dbgln!("small: loss {} -> {}mV", u_start, u_end);
    Ok(())
}

#[cfg(test)]
fn run(c: f64, leak: f64, ctx: &mut Context, sim: &mut crate::sim::Sim)
       -> (Result<(), CapError>, Capacitor) {
    sim.cap(0, 1, c, 0.0, leak);
    let probes = Assignment::new(&ctx.cfg.layout, 0, 1);
    let mut cap = Capacitor::default();
    let r = SmallCap.measure(sim, ctx, &probes, &mut cap);
    (r, cap)
}

#[test]
fn hundred_nano() {
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    let (r, cap) = run(100e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert_eq!(cap.scale, -12);
    assert!((98000 ..= 102000).contains(&cap.value), "{}", cap.value);
    assert_eq!(cap.raw - cap.value, 43);
    assert_eq!((cap.a, cap.b), (1, 0));
    // Below the self-adjust limit.
    assert_eq!(ctx.cal.comp_offset, 0);
    assert_eq!(ctx.cal.ref_offset, 0);
}

#[test]
fn open_probes() {
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    let (r, cap) = run(30e-12, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert_eq!(cap.scale, -12);
    // Stray capacitance is eaten by the zero offset.
    assert!(cap.value < 10, "{}", cap.value);
}

#[test]
fn timeout() {
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    let (r, _) = run(1e-3, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Err(CapError::TooHigh));
    assert_eq!(sim.watchdogs as u32, ctx.cfg.overflow_budget());
}

#[test]
fn stuck_charge() {
    let mut sim = crate::sim::Sim::new();
    sim.stuck = true;
    let mut ctx = Context::default();
    let (r, cap) = run(100e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Err(CapError::Discharge));
    assert_eq!(ctx.check.found, Kind::Error);
    assert_eq!(cap, Capacitor::default());
}

#[test]
fn adjusts_offsets() {
    let mut sim = crate::sim::Sim::new();
    sim.bandgap = 1.080;
    sim.comp_offset = 0.010;
    let mut ctx = Context::default();
    let (r, cap) = run(470e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert!(cap.value > 400000);
    assert!((-22 ..= -18).contains(&ctx.cal.ref_offset),
            "{}", ctx.cal.ref_offset);
    assert!((8 ..= 12).contains(&ctx.cal.comp_offset),
            "{}", ctx.cal.comp_offset);
    // The runtime bandgap is only updated by the reference cap.
    assert_eq!(ctx.run.bandgap, 1100);
}

#[test]
fn voltage_loss_of_leaky_cap() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.vloss()};
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::new(&C);
    // Leaky enough to lose a few mV, still reaching the bandgap.
    let (r, cap) = run(470e-9, 150e3, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert!(cap.u_loss > 0);

    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::new(&C);
    let (r, cap) = run(470e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert_eq!(cap.u_loss, 0);
}

#[test]
fn fet_holds_gate_and_source() {
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    let (r, _) = run(47e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert_eq!(sim.timed_lines, Some(0b010));

    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    ctx.check.found = Kind::Fet;
    let (r, cap) = run(47e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    // Everything but probe-1 low.
    assert_eq!(sim.timed_lines, Some(0b110));
    assert!((45000 ..= 49000).contains(&cap.value), "{}", cap.value);
}

#[test]
fn no_adjust_with_reference_cap() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.hw_adjust(5)};
    let mut sim = crate::sim::Sim::new();
    sim.bandgap = 1.080;
    sim.comp_offset = 0.010;
    let mut ctx = Context::new(&C);
    let (r, cap) = run(470e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    assert!(cap.value > 400000);
    assert_eq!(ctx.cal.ref_offset, 0);
    assert_eq!(ctx.cal.comp_offset, 0);
}

#[test]
fn zero_offset_per_pair() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.multi_offset()};
    for (cfg, zero) in [(&C, 30), (&crate::CONFIG, 43)] {
        let mut sim = crate::sim::Sim::new();
        sim.cap(1, 2, 100e-9, 0.0, 1e15);
        let mut ctx = Context::new(cfg);
        ctx.cal.cap_zero = [43, 50, 30];
        let probes = Assignment::new(&ctx.cfg.layout, 1, 2);
        let mut cap = Capacitor::default();
        assert_eq!(SmallCap.measure(&mut sim, &mut ctx, &probes, &mut cap),
                   Ok(()));
        assert_eq!((cap.a, cap.b), (2, 1));
        assert_eq!(cap.raw - cap.value, zero);
    }
}

#[test]
fn small_compensation() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.cap_factors(20, -40, -90)};
    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::default();
    let (r, plain) = run(47e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));

    let mut sim = crate::sim::Sim::new();
    let mut ctx = Context::new(&C);
    let (r, cap) = run(47e-9, 1e15, &mut ctx, &mut sim);
    assert_eq!(r, Ok(()));
    // Compensated before the zero offset.
    assert_eq!(cap.raw as u64, plain.raw as u64 * 1000 / 980);
    assert_eq!(cap.raw - cap.value, 43);
    assert!(cap.value > plain.value);
}

#[test]
fn budget_stops_timing() {
    let mut sim = crate::sim::Sim::new();
    sim.cap(0, 1, 1e-3, 0.0, 1e15);
    let lines = Assignment::new(&crate::CONFIG.layout, 0, 1).p1.rh;
    crate::hw::FrontEnd::resistor_lines(&mut sim, lines, lines);
    let charge = time_charge(&mut sim, 3, |_| ());
    assert_eq!(charge.overflows, 3);
    assert!(!charge.flags.capture);
    assert_eq!(sim.watchdogs, 3);

    // A zero budget still stops at the first overflow.
    let mut sim = crate::sim::Sim::new();
    let charge = time_charge(&mut sim, 0, |_| ());
    assert_eq!(charge.overflows, 1);
}
