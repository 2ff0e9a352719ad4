use crate::Context;
use crate::cap::{CapError, CapacitanceEstimator, Capacitor};
use crate::check::Kind;
use crate::dbgln;
use crate::esr::{Esr, EsrEstimator};
use crate::hw::Board;
use crate::large::LargeCap;
use crate::probes::Assignment;
use crate::small::SmallCap;
use crate::utils::cmp_value;

/// Diodes with a forward voltage below this hide any capacitance.
const DIODE_VF: u16 = 1500;

/// Measure the capacitance between `probe1` (pulled up) and `probe2`
/// (pulled down) into `ctx.check.caps[id]`, and classify the pair as a
/// capacitor if that is plausible.
pub fn measure_cap<B: Board>(board: &mut B, ctx: &mut Context, probe1: u8,
                             probe2: u8, id: usize) -> Result<(), CapError> {
    ctx.check.caps[id].reset();
    if ctx.check.found == Kind::Error {
        return Err(CapError::Skipped);
    }
    // A large cap may have been taken for a low value resistor.
    if ctx.check.found == Kind::Resistor
        && !ctx.check.resistors.iter().any(
            |r| r.connects(probe1, probe2) && r.is_low()) {
        return Err(CapError::Skipped);
    }
    if ctx.check.diode(probe1, probe2).is_some_and(|d| d.v_f < DIODE_VF) {
        return Err(CapError::Skipped);
    }

    let probes = Assignment::new(&ctx.cfg.layout, probe1, probe2);
    let mut cap = Capacitor::default();
    let mut result = LargeCap.measure(board, ctx, &probes, &mut cap);
    if result == Err(CapError::TooLow) {
        result = SmallCap.measure(board, ctx, &probes, &mut cap);
    }
    dbgln!("cap {}-{}: {:?} {}e{}", probe1, probe2, result, cap.value,
           cap.scale);

    if result.is_ok() {
        classify(ctx, &cap);
        ctx.check.caps[id] = cap;
    }

    if !board.discharge() {
        ctx.check.fail();
    }
    board.probe_lines(0, 0);
    board.resistor_lines(0, 0);
    result
}

fn classify(ctx: &mut Context, cap: &Capacitor) {
    let found = ctx.check.found;
    if found >= Kind::Diode || found == Kind::Error {
        return;
    }
    let plausible = if found == Kind::Resistor {
        // Above 4.3µF, beyond what the small cap range can mistake.
        cmp_value(cap.value, cap.scale, 43, -7).is_gt()
    }
    else {
        cap.scale > -12 || cap.value >= 5
    };
    if plausible {
        ctx.check.found = Kind::Capacitor;
    }
}

/// ESR of the cap in `ctx.check.caps[id]`, with the method chosen at build
/// time.  `None` also for caps outside the method's range.
pub fn measure_esr<B: Board>(board: &mut B, ctx: &mut Context, id: usize)
                             -> Option<u16> {
    let cap = ctx.check.caps[id];
    Esr::default().measure(board, ctx, &cap)
}

#[cfg(test)]
use crate::sim::Sim;
#[cfg(test)]
use crate::check::{Diode, Resistor};

#[test]
fn hundred_nano() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-9, 0.0, 1e15);
    let mut ctx = Context::default();
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0), Ok(()));
    let cap = ctx.check.caps[0];
    assert_eq!(cap.scale, -12);
    assert!((98000 ..= 102000).contains(&cap.value), "{}", cap.value);
    assert_eq!(ctx.check.found, Kind::Capacitor);
    // Two large cap attempts, one small, one after.
    assert_eq!(sim.discharges, 4);
    assert!(sim.released());
}

#[test]
fn big_cap_taken_for_resistor() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 1000e-6, 0.1, 100e3);
    let mut ctx = Context::default();
    ctx.check.found = Kind::Resistor;
    ctx.check.resistors.push(Resistor {a: 0, b: 1, value: 20, scale: -1});
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 1), Ok(()));
    let cap = ctx.check.caps[1];
    assert_eq!(cap.scale, -9);
    assert!((900000 ..= 1000000).contains(&cap.value), "{}", cap.value);
    assert!(cap.i_leak_value > 0);
    assert_eq!(ctx.check.found, Kind::Capacitor);
    assert_eq!(sim.discharges, 2);
}

#[test]
fn resistor_not_low() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 1000e-6, 0.1, 100e3);
    let mut ctx = Context::default();
    ctx.check.found = Kind::Resistor;
    ctx.check.resistors.push(Resistor {a: 0, b: 1, value: 47, scale: 0});
    ctx.check.caps[2].value = 7;
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 2),
               Err(CapError::Skipped));
    assert_eq!(ctx.check.caps[2], Capacitor::default());
    assert_eq!(ctx.check.found, Kind::Resistor);
    assert_eq!(sim.discharges, 0);
}

#[test]
fn diode_skipped() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-9, 0.0, 1e15);
    let mut ctx = Context::default();
    ctx.check.found = Kind::Diode;
    ctx.check.diodes.push(Diode {anode: 1, cathode: 0, v_f: 650});
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0),
               Err(CapError::Skipped));
    assert_eq!(ctx.check.caps[0], Capacitor::default());
    assert_eq!(ctx.check.found, Kind::Diode);
    assert_eq!(sim.discharges, 0);
}

#[test]
fn diode_keeps_kind() {
    // A high Vf diode (e.g. an LED) still gets its capacitance measured,
    // but stays a diode.
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-9, 0.0, 1e15);
    let mut ctx = Context::default();
    ctx.check.found = Kind::Diode;
    ctx.check.diodes.push(Diode {anode: 1, cathode: 0, v_f: 1800});
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0), Ok(()));
    assert!(ctx.check.caps[0].value > 90000);
    assert_eq!(ctx.check.found, Kind::Diode);
}

#[test]
fn previous_error() {
    let mut sim = Sim::new();
    let mut ctx = Context::default();
    ctx.check.found = Kind::Error;
    assert_eq!(measure_cap(&mut sim, &mut ctx, 1, 2, 0),
               Err(CapError::Skipped));
    assert_eq!(sim.discharges, 0);
}

#[test]
fn open_probes_are_stable() {
    let mut sim = Sim::new();
    sim.cap(1, 2, 30e-12, 0.0, 1e15);
    let mut ctx = Context::default();
    assert_eq!(measure_cap(&mut sim, &mut ctx, 2, 1, 0), Ok(()));
    let first = ctx.check.caps[0];
    assert_eq!(ctx.check.found, Kind::None);
    assert_eq!(measure_cap(&mut sim, &mut ctx, 2, 1, 0), Ok(()));
    assert_eq!(ctx.check.caps[0], first);
    assert_eq!(ctx.check.found, Kind::None);
    assert!(first.value < 5);
}

#[test]
fn stuck_charge() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-9, 0.0, 1e15);
    sim.stuck = true;
    let mut ctx = Context::default();
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0),
               Err(CapError::Discharge));
    assert_eq!(ctx.check.found, Kind::Error);
    assert_eq!(ctx.check.caps[0], Capacitor::default());
    assert!(sim.released());
}

#[test]
fn esr_after_capacitance() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-6, 1.0, 1e15);
    let mut ctx = Context::default();
    ctx.cal.r_zero = [0; 3];
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0), Ok(()));
    assert_eq!(ctx.check.found, Kind::Capacitor);
    let esr = measure_esr(&mut sim, &mut ctx, 0).unwrap();
    assert!((60 ..= 200).contains(&esr), "{esr}");
}

#[test]
fn leaky_leaves_no_record() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.vloss()};
    let mut sim = Sim::new();
    sim.cap(0, 1, 10e-6, 0.0, 300.0);
    let mut ctx = Context::new(&C);
    ctx.check.caps[0].u_loss = 9;
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0),
               Err(CapError::NotCapacitor));
    assert_eq!(ctx.check.caps[0], Capacitor::default());
    assert_eq!(ctx.check.found, Kind::None);
    assert!(sim.released());
}

#[test]
fn discharge_fails_in_voltage_loss() {
    const C: crate::config::Config = {
        let mut c = crate::config::Config::new(8000000);
        *c.vloss()};
    let mut sim = Sim::new();
    sim.cap(0, 1, 470e-9, 0.0, 1e15);
    // Two large cap attempts and the small one still discharge.
    sim.discharge_limit = Some(3);
    let mut ctx = Context::new(&C);
    assert_eq!(measure_cap(&mut sim, &mut ctx, 0, 1, 0),
               Err(CapError::Discharge));
    assert_eq!(ctx.check.caps[0], Capacitor::default());
    assert_eq!(ctx.check.found, Kind::Error);
    assert!(sim.released());
}
