//! Equivalent series resistance.
//!
//! Both methods compare the voltage across the cap with and without a charge
//! current through Rl.  The difference is the drop across the ESR, scaled
//! against the known drop across the MCU port's low side resistance (RiL):
//!
//!   ESR = RiL · (U_loaded − U_unloaded) / U_unloaded
//!
//! The readings are summed over 255 pulses in both directions so the cap's
//! own charge cancels out.

use crate::Context;
use crate::cap::Capacitor;
use crate::config::{Config, Reference};
use crate::dbgln;
use crate::hw::{Board, FrontEnd};
use crate::probes::{Assignment, Pins};
use crate::utils::cmp_value;

/// Raw sentinel for "no ESR".
pub const NO_ESR: u16 = u16::MAX;

/// Call overhead of the cycle delay.
const CYCLE_OFFSET: i32 = 17;
const PASSES: u32 = 255;

/// ESR in 0.01Ω of the cap, or `None` if it is too small or the method gives
/// no usable result.
pub trait EsrEstimator {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         cap: &Capacitor) -> Option<u16>;
}

/// Short current pulses, timed so the sample-and-hold lands inside them.
#[derive(Clone, Copy, Debug, Default)]
pub struct PulseEsr;
/// Older method: longer pulses, for caps from 180nF.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyEsr;

#[cfg(not(feature = "legacy-esr"))]
pub type Esr = PulseEsr;
#[cfg(feature = "legacy-esr")]
pub type Esr = LegacyEsr;

/// Cycle delay value, or None if the converter clock is too fast for the
/// pulse to fit before the sample-and-hold.
fn cycle_delay(n: i32) -> Option<u8> {
    let n = n - CYCLE_OFFSET;
    if (0 ..= u8::MAX as i32).contains(&n) {Some(n as u8)} else {None}
}

/// Cycles from conversion start to pulse start.  The sample-and-hold is at
/// 1.5 converter clocks after the first rising edge; subtract the 10µs lead
/// in, a 2µs pulse and the loop overhead.
fn pulse_delay(cfg: &Config) -> Option<u8> {
    let cpu = cfg.cycles_per_us() as i32;
    let mut n = cfg.cycles_per_adc as i32 * 25 / 10 - cpu * 10 - cpu * 2 - 10;
    if cfg.cpu_freq == 8000000 {
        n -= 4;
    }
    cycle_delay(n)
}

/// As `pulse_delay` with a 5µs lead in.
fn legacy_delay(cfg: &Config) -> Option<u8> {
    let cpu = cfg.cycles_per_us() as i32;
    cycle_delay(cfg.cycles_per_adc as i32 * 25 / 10 - cpu * 5 - 10)
}

/// Two conversions of `channel` against the bandgap, the first one settling
/// the multiplexer.
fn sample<B: FrontEnd>(board: &mut B, channel: u8) -> u16 {
    board.select(channel, Reference::Bandgap);
    board.start_conversion();
    board.conversion_result();
    board.start_conversion();
    board.conversion_result()
}

/// Drive `probe` directly to ground and pull it up through Rl: the drop over
/// RiL without current through the cap.
fn unloaded<B: Board>(board: &mut B, probe: Pins) -> u16 {
    board.probe_lines(probe.pin, 0);
    board.resistor_lines(probe.rl, probe.rl);
    sample(board, probe.ch)
}

/// Common setup: discharged cap, bandgap reference selected and settled.
fn prepare<B: Board>(board: &mut B, ctx: &mut Context, cap: &Capacitor,
                     cycles: Option<u8>) -> Option<Assignment> {
    if !board.discharge() {
        ctx.check.fail();
        return None;
    }
    board.discharge_pair(cap.a, cap.b);
    board.load_cycles(cycles?);
    let probes = Assignment::new(&ctx.cfg.layout, cap.a, cap.b);
    board.probe_lines(0, 0);
    board.select(probes.p1.ch, Reference::Bandgap);
    board.delay_ms(10);
    Some(probes)
}

fn finish<B: Board>(board: &mut B, ctx: &mut Context) {
    board.probe_lines(0, 0);
    board.resistor_lines(0, 0);
    ctx.run.reference = Reference::Bandgap;
    if !board.discharge() {
        ctx.check.fail();
    }
}

/// ESR in 0.01Ω from the summed readings, before the zero offset.
pub fn esr_from_sums(ril: u16, unloaded: u32, loaded: u32) -> Option<u32> {
    if loaded <= unloaded || unloaded == 0 {
        return None;
    }
    let v = ril as u64 * 10 * (loaded - unloaded) as u64 / unloaded as u64;
    Some(v.min(u32::MAX as u64) as u32)
}

/// Subtract the probe resistance.  Large caps may legitimately be below it
/// and report zero.
pub fn remove_offset(esr: u32, r_zero: u16, cap: &Capacitor) -> Option<u16> {
    if esr > r_zero as u32 {
        let v = esr - r_zero as u32;
        if v < NO_ESR as u32 {Some(v as u16)} else {None}
    }
    else if cmp_value(cap.value, cap.scale, 1000, -6).is_gt() {
        Some(0)
    }
    else {
        None
    }
}

impl EsrEstimator for PulseEsr {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         cap: &Capacitor) -> Option<u16> {
        if cmp_value(cap.value, cap.scale, 10, -9).is_lt() {
            return None;
        }
        let slow = ctx.cfg.cpu_freq < 8000000;
        let cycles = pulse_delay(ctx.cfg);
        let Assignment {p1, p2, ..} = prepare(board, ctx, cap, cycles)?;

        // Readings start below the top-up limits on purpose: the first pass
        // tops up the negative side only.
        let (mut u2, mut u4) = (50u16, 0u16);
        let (mut sum1, mut sum2) = (1u32, 1u32);
        for _ in 0 .. PASSES {
            board.watchdog();
            if u4 < 50 {
                half_pulse(board, p2, p1);
            }
            if u2 < 50 {
                half_pulse(board, p1, p2);
            }
            let u1 = unloaded(board, p1);
            u2 = loaded(board, p2, slow);
            let u3 = unloaded(board, p2);
            u4 = loaded(board, p1, slow);
            sum1 += u1 as u32 + u3 as u32;
            sum2 += u2 as u32 + u4 as u32;
        }
        finish(board, ctx);

        let r_zero = ctx.cal.r_zero(ctx.cfg.multi_offset, p1.id, p2.id);
        let esr = esr_from_sums(ctx.cal.ril, sum1, sum2)
            .and_then(|v| remove_offset(v, r_zero, cap));
        dbgln!("esr: {} {} -> {:?}", sum1, sum2, esr);
        esr
    }
}

/// Top-up charge: `low` driven to ground, `high` pulled up for 2µs.
fn half_pulse<B: Board>(board: &mut B, low: Pins, high: Pins) {
    board.probe_lines(low.pin, 0);
    board.resistor_lines(high.rl, high.rl);
    board.delay_us(2);
    board.resistor_lines(0, 0);
}

/// Sample `probe` while a short pulse through its Rl is running.  The other
/// probe is still driven low from the unloaded reading.
fn loaded<B: Board>(board: &mut B, probe: Pins, slow: bool) -> u16 {
    board.select(probe.ch, Reference::Bandgap);
    board.start_conversion();
    board.conversion_result();
    board.start_conversion();
    board.delay_us(10);
    board.run_cycles();
    board.resistor_lines(probe.rl, probe.rl);
    board.delay_us(2);
    if slow {
        board.delay_us(2);
    }
    board.resistor_lines(0, 0);
    board.conversion_result()
}

impl EsrEstimator for LegacyEsr {
    fn measure<B: Board>(&self, board: &mut B, ctx: &mut Context,
                         cap: &Capacitor) -> Option<u16> {
        if cmp_value(cap.value, cap.scale, 180, -9).is_lt() {
            return None;
        }
        let cycles = legacy_delay(ctx.cfg);
        let Assignment {p1, p2, ..} = prepare(board, ctx, cap, cycles)?;

        // Start with a negative half pulse.
        board.probe_lines(p2.pin, 0);
        board.resistor_lines(p1.rl, p1.rl);
        board.run_cycles();
        board.resistor_lines(0, 0);

        let (mut sum1, mut sum2) = (1u32, 1u32);
        for _ in 0 .. PASSES {
            board.watchdog();
            let u1 = unloaded(board, p1);
            let u2 = legacy_loaded(board, p2);
            if u2 <= 100 {
                legacy_top_up(board, p2);
            }
            board.watchdog();
            let u3 = unloaded(board, p2);
            let u4 = legacy_loaded(board, p1);
            if u4 <= 100 {
                legacy_top_up(board, p1);
            }
            sum1 += u1 as u32 + u3 as u32;
            sum2 += u2 as u32 + u4 as u32;
        }
        finish(board, ctx);

        let esr = esr_from_sums(ctx.cal.ril, sum1, sum2).unwrap_or(0);
        let r_zero = ctx.cal.r_zero(ctx.cfg.multi_offset, p1.id, p2.id);
        dbgln!("esr (legacy): {} {} -> {}", sum1, sum2, esr);
        if esr > r_zero as u32 && esr - (r_zero as u32) < NO_ESR as u32 {
            Some((esr - r_zero as u32) as u16)
        }
        else {
            None
        }
    }
}

fn legacy_loaded<B: Board>(board: &mut B, probe: Pins) -> u16 {
    board.select(probe.ch, Reference::Bandgap);
    board.start_conversion();
    board.conversion_result();
    board.start_conversion();
    board.delay_us(5);
    board.resistor_lines(probe.rl, probe.rl);
    board.run_cycles();
    board.run_cycles();
    board.resistor_lines(0, 0);
    board.conversion_result()
}

fn legacy_top_up<B: Board>(board: &mut B, probe: Pins) {
    board.resistor_lines(probe.rl, probe.rl);
    board.delay_us(2);
    board.run_cycles();
    board.resistor_lines(0, 0);
}

#[test]
fn delays() {
    let c8 = Config::new(8000000);
    assert_eq!(pulse_delay(&c8), Some(50 - 17));
    assert_eq!(legacy_delay(&c8), Some(110 - 17));
    let c16 = Config::new(16000000);
    assert_eq!(pulse_delay(&c16), Some(118 - 17));
    let c20 = Config::new(20000000);
    assert_eq!(pulse_delay(&c20), Some(70 - 17));
    assert_eq!(cycle_delay(16), None);
    assert_eq!(cycle_delay(17), Some(0));
    assert_eq!(cycle_delay(300), None);
}

#[test]
fn sums() {
    // 20Ω port, loaded reading 5% up: 1Ω.
    assert_eq!(esr_from_sums(200, 100000, 105000), Some(100));
    assert_eq!(esr_from_sums(200, 100000, 100000), None);
    assert_eq!(esr_from_sums(200, 100000, 90000), None);
}

#[test]
fn offsets() {
    let small = Capacitor {value: 470, scale: -9, ..Capacitor::default()};
    let huge = Capacitor {value: 2200, scale: -6, ..Capacitor::default()};
    assert_eq!(remove_offset(120, 20, &small), Some(100));
    assert_eq!(remove_offset(15, 20, &small), None);
    assert_eq!(remove_offset(20, 20, &small), None);
    assert_eq!(remove_offset(15, 20, &huge), Some(0));
    assert_eq!(remove_offset(70000, 20, &small), None);
}

#[cfg(test)]
fn esr_of(est: &impl EsrEstimator, c: f64, esr: f64)
          -> (Option<u16>, Context<'static>) {
    let mut sim = crate::sim::Sim::new();
    sim.cap(0, 1, c, esr, 1e15);
    let mut ctx = Context::default();
    ctx.cal.r_zero = [0; 3];
    let (value, scale) = if c >= 1e-6 {((c * 1e9) as u32, -9)}
                         else {((c * 1e12) as u32, -12)};
    let cap = Capacitor {a: 1, b: 0, value, scale, ..Capacitor::default()};
    let r = est.measure(&mut sim, &mut ctx, &cap);
    (r, ctx)
}

#[test]
fn pulse_method() {
    let (esr, ctx) = esr_of(&PulseEsr, 100e-6, 1.0);
    let esr = esr.unwrap();
    assert!((60 ..= 160).contains(&esr), "{esr}");
    assert_eq!(ctx.run.reference, Reference::Bandgap);
    // Ideal cap: only quantisation left.
    let (esr, _) = esr_of(&PulseEsr, 100e-6, 0.0);
    assert!(esr.map_or(true, |v| v < 40), "{esr:?}");
    // Too small for the method.
    assert_eq!(esr_of(&PulseEsr, 4.7e-9, 1.0).0, None);
}

#[test]
fn legacy_method() {
    let (esr, _) = esr_of(&LegacyEsr, 100e-6, 1.0);
    let esr = esr.unwrap();
    assert!((60 ..= 200).contains(&esr), "{esr}");
    assert_eq!(esr_of(&LegacyEsr, 100e-9, 1.0).0, None);
}

#[test]
fn probe_resistance_per_pair() {
    const C: Config = {
        let mut c = Config::new(8000000);
        *c.multi_offset()};
    let esr = |cfg: &Config, r_zero: [u16; 3]| {
        let mut sim = crate::sim::Sim::new();
        sim.cap(1, 2, 100e-6, 1.0, 1e15);
        let mut ctx = Context::new(cfg);
        ctx.cal.r_zero = r_zero;
        let cap = Capacitor {a: 2, b: 1, value: 100000, scale: -9,
                             ..Capacitor::default()};
        PulseEsr.measure(&mut sim, &mut ctx, &cap)
    };
    let plain = esr(&C, [0; 3]).unwrap();
    assert!(plain > 60, "{plain}");
    // Probes 2-3 use the third offset.
    assert_eq!(esr(&C, [0, 0, 50]), Some(plain - 50));
    assert_eq!(esr(&crate::CONFIG, [0, 0, 50]), Some(plain));
    assert_eq!(esr(&crate::CONFIG, [50, 0, 0]), Some(plain - 50));
}

#[test]
fn stuck_cap_has_no_esr() {
    let mut sim = crate::sim::Sim::new();
    sim.cap(0, 1, 100e-6, 1.0, 1e15);
    sim.stuck = true;
    let mut ctx = Context::default();
    let cap = Capacitor {a: 1, b: 0, value: 100000, scale: -9,
                         ..Capacitor::default()};
    assert_eq!(Esr::default().measure(&mut sim, &mut ctx, &cap), None);
    assert_eq!(ctx.check.found, crate::check::Kind::Error);
}
