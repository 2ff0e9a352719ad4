//! Caps from about 4.7µF upwards: charge in 10ms (or 1ms) pulses through Rl
//! until the cap reaches 300mV, then scale the pulse count by the charge
//! factor for the voltage reached.

use crate::Context;
use crate::cap::{CapError, CapacitanceEstimator, Capacitor, discharge};
use crate::dbgln;
use crate::hw::Board;
use crate::probes::{Assignment, Pulse, pull_probe};
use crate::table::{Table, factor};

/// Charge target in mV.
const TARGET: u16 = 300;
/// Single pulse above this means the cap is too small for the pulse length.
const SATURATED: u16 = 1300;
/// Give up early if still below this after `EARLY_PULSES`.
const EARLY_MV: u16 = 75;
const EARLY_PULSES: u16 = 126;
const MAX_PULSES: u16 = 500;
/// Short-term drop that rules out a cap.
const MAX_DROP: u16 = 100;

pub struct LargeCap;

impl CapacitanceEstimator for LargeCap {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         probes: &Assignment, cap: &mut Capacitor)
                         -> Result<(), CapError> {
        for pulse in [Pulse::Ms10, Pulse::Ms1] {
            match attempt(board, ctx, probes, pulse, cap) {
                Err(CapError::TooLow) => dbgln!("large: {}ms saturated",
                                                pulse.ms()),
                r => return r,
            }
        }
        Err(CapError::TooLow)
    }
}

fn attempt<B: Board>(board: &mut B, ctx: &mut Context, probes: &Assignment,
                     pulse: Pulse, cap: &mut Capacitor)
                     -> Result<(), CapError> {
    let Assignment {p1, p2, ..} = *probes;
    discharge(board, ctx)?;
    let run = ctx.run;

    // Zero offset: Gnd -- probe-2 -- Rl -- Vcc, probe-1 open.
    board.probe_lines(p2.pin, 0);
    board.resistor_lines(p2.rl, p2.rl);
    let u_zero = board.read_voltage(p1.ch, &run) as i32
        - board.read_voltage(p2.ch, &run) as i32;
    board.resistor_lines(0, 0);

    // Charge: Gnd -- probe-2 / probe-1 -- Rl -- Vcc.
    let mut pulses: u16 = 0;
    let mut u_cap: u16;
    loop {
        pulses += 1;
        pull_probe(board, p1.rl, pulse, true);
        let u = board.read_voltage(p1.ch, &run) as i32;
        u_cap = (u - u_zero).max(0) as u16;
        board.watchdog();
        if (pulses == EARLY_PULSES && u_cap < EARLY_MV)
            || u_cap >= TARGET || pulses == MAX_PULSES {
            break;
        }
    }

    if pulses == 1 && u_cap > SATURATED {
        return Err(CapError::TooLow);
    }
    if u_cap < TARGET {
        dbgln!("large: {} pulses, {}mV", pulses, u_cap);
        return Err(CapError::TooHigh);
    }

    // Short-term drop over as many reads as there were pulses.
    let u_start = board.read_voltage(p1.ch, &run);
    let mut u_end = u_start;
    for _ in 0 .. pulses {
        u_end = board.read_voltage(p1.ch, &run);
        board.watchdog();
    }
    let u_drop = u_start.saturating_sub(u_end);
    if u_drop > MAX_DROP {
        dbgln!("large: drop {}mV", u_drop);
        return Err(CapError::NotCapacitor);
    }
    if ctx.cfg.vloss && u_drop > 0 {
        cap.u_loss = (u_drop as u32 * 1000 / u_cap as u32) as u16;
    }

    // Self-discharge over a longer period.
    let u_start = board.read_voltage(p1.ch, &run);
    board.delay_ms(match pulse {Pulse::Ms10 => 1000, Pulse::Ms1 => 100});
    let u_leak = u_start.saturating_sub(board.read_voltage(p1.ch, &run));

    let mut scale: i8 = -9;
    let mut raw = factor(Table::LargeCap, u_cap + u_drop) as u32
        * pulses as u32;
    if pulse == Pulse::Ms10 {
        raw *= 10;
    }
    if raw > u32::MAX / 1000 {
        raw /= 1000;
        scale += 3;
    }

    let comp = match pulse {
        Pulse::Ms10 => ctx.cfg.cap_factor_large,
        Pulse::Ms1 => ctx.cfg.cap_factor_mid,
    };
    let value = raw as u64 * 1000 / (1000 - comp as i64).max(1) as u64;

    cap.a = p2.id;
    cap.b = p1.id;
    cap.scale = scale;
    cap.raw = raw;
    cap.value = value.min(u32::MAX as u64) as u32;
    let (i_value, i_scale) = leakage(cap.value, scale, u_leak, pulse);
    cap.i_leak_value = i_value;
    cap.i_leak_scale = i_scale;
    dbgln!("large: {} pulses {}mV -> {}e{}", pulses, u_cap, cap.value, scale);
    Ok(())
}

/// Leakage current from the capacitance and the voltage lost over 1s (10ms
/// pulses) or 100ms (1ms pulses): I = C·ΔU/t.
fn leakage(value: u32, scale: i8, u_leak: u16, pulse: Pulse) -> (u16, i8) {
    let mut value = value as u64;
    let mut scale = scale;
    while value > 800000 {
        value /= 10;
        scale += 1;
    }
    value = value * u_leak as u64 / 1000;
    if pulse == Pulse::Ms1 {
        scale += 1;
    }
    while value > u16::MAX as u64 {
        value /= 10;
        scale += 1;
    }
    (value as u16, scale)
}

#[test]
fn leakage_current() {
    // 1000µF losing 10mV in 1s is 10µA.
    assert_eq!(leakage(1000000, -9, 10, Pulse::Ms10), (1000, -8));
    // 10µF losing 10mV in 100ms is 1µA.
    assert_eq!(leakage(10000, -9, 10, Pulse::Ms1), (100, -8));
    assert_eq!(leakage(10000, -9, 0, Pulse::Ms10), (0, -9));
}

#[test]
fn big_cap() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    sim.cap(0, 1, 1000e-6, 0.1, 100e3);
    let mut ctx = Context::default();
    let probes = Assignment::new(&ctx.cfg.layout, 0, 1);
    let mut cap = Capacitor::default();
    LargeCap.measure(&mut sim, &mut ctx, &probes, &mut cap).unwrap();
    assert_eq!(cap.scale, -9);
    assert!((900000 ..= 1000000).contains(&cap.value), "{}", cap.value);
    assert!(cap.raw > cap.value);
    assert_eq!((cap.a, cap.b), (1, 0));
    assert!(cap.i_leak_value > 0);
    assert!(cap.i_leak_scale <= -7);
}

#[test]
fn small_cap_is_too_low() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-9, 0.0, 1e15);
    let mut ctx = Context::default();
    let probes = Assignment::new(&ctx.cfg.layout, 0, 1);
    let mut cap = Capacitor::default();
    assert_eq!(LargeCap.measure(&mut sim, &mut ctx, &probes, &mut cap),
               Err(CapError::TooLow));
    // One discharge per pulse length.
    assert_eq!(sim.discharges, 2);
    assert_eq!(cap, Capacitor::default());
}

#[test]
fn short_is_not_charging() {
    use crate::sim::Sim;
    let mut sim = Sim::new();
    // 1F never reaches 300mV in 500 pulses.
    sim.cap(0, 2, 1.0, 0.0, 1e15);
    let mut ctx = Context::default();
    let probes = Assignment::new(&ctx.cfg.layout, 2, 0);
    let mut cap = Capacitor::default();
    assert_eq!(LargeCap.measure(&mut sim, &mut ctx, &probes, &mut cap),
               Err(CapError::TooHigh));
}

#[test]
fn mid_range_compensation() {
    use crate::sim::Sim;
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.cap_factors(0, 0, -90)};
    // 33µF saturates a 10ms pulse, so it is measured with 1ms pulses.
    let mut sim = Sim::new();
    sim.cap(0, 1, 33e-6, 0.0, 1e15);
    let mut ctx = Context::new(&C);
    let probes = Assignment::new(&ctx.cfg.layout, 0, 1);
    let mut plain = Capacitor::default();
    LargeCap.measure(&mut sim, &mut ctx, &probes, &mut plain).unwrap();
    assert_eq!(plain.value, plain.raw);
    assert!((25000 ..= 40000).contains(&plain.value), "{}", plain.value);

    let mut sim = Sim::new();
    sim.cap(0, 1, 33e-6, 0.0, 1e15);
    let mut ctx = Context::default();
    let mut cap = Capacitor::default();
    LargeCap.measure(&mut sim, &mut ctx, &probes, &mut cap).unwrap();
    assert_eq!(cap.raw, plain.raw);
    assert_eq!(cap.value as u64, cap.raw as u64 * 1000 / 1040);
}

#[test]
fn leaky_is_not_capacitor() {
    use crate::sim::Sim;
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.vloss()};
    let mut sim = Sim::new();
    sim.cap(0, 1, 10e-6, 0.0, 300.0);
    let mut ctx = Context::new(&C);
    let probes = Assignment::new(&ctx.cfg.layout, 0, 1);
    let mut cap = Capacitor::default();
    assert_eq!(LargeCap.measure(&mut sim, &mut ctx, &probes, &mut cap),
               Err(CapError::NotCapacitor));
    assert_eq!(cap.u_loss, 0);
    assert_eq!(cap, Capacitor::default());
}
