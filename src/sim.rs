//! Circuit model of the probe network for host tests.
//!
//! The probes and the reference cap are nodes, the DUT and the reference cap
//! RC elements between two nodes.  All drivers of a node (direct port line,
//! Rl and Rh lines, adjust line) combine into one Thévenin source, and the
//! element voltage is advanced analytically, so the timer can jump straight
//! to the next capture or overflow.

use embedded_hal::delay::DelayNs;

use crate::CONFIG;
use crate::config::{Reference, Runtime};
use crate::hw::{AdjustLine, CaptureTimer, Clock, Comparator, FrontEnd, Line,
                TimerFlags};
use crate::probes::Layout;

const VCC: f64 = 5.0;
const RI_L: f64 = 20.0;
const RI_H: f64 = 22.0;
const R_L: f64 = 680.0;
const R_H: f64 = 470e3;
const REF: usize = 3;
const GND: usize = 4;

#[derive(Clone, Copy, Debug)]
struct Element {
    x: usize,
    y: usize,
    c: f64,
    esr: f64,
    /// Parallel leakage resistance.
    leak: f64,
    /// V(x) - V(y).
    vc: f64,
}

#[derive(Clone)]
pub struct Sim {
    layout: Layout,
    cpu_freq: f64,
    /// Seconds per converter clock.
    adc_clock: f64,
    ref_channel: u8,
    now: f64,
    dut: Option<Element>,
    ref_cap: Option<Element>,
    probe_out: u8,
    probe_high: u8,
    r_out: u8,
    r_high: u8,
    adjust: Line,
    /// True bandgap voltage.
    pub bandgap: f64,
    /// True comparator input offset.
    pub comp_offset: f64,
    /// DUT keeps its charge.
    pub stuck: bool,
    /// Discharging works this many times, then the DUT keeps its charge.
    pub discharge_limit: Option<u32>,
    /// Direct probe lines set while the timer was running.
    pub timed_lines: Option<u8>,
    pub discharges: u32,
    pub watchdogs: u64,
    mux: u8,
    reference: Reference,
    sample_at: Option<f64>,
    sampled: f64,
    conv_end: f64,
    comparator: Option<u8>,
    t_start: f64,
    frozen: Option<u64>,
    wraps_seen: u64,
    overflow: bool,
    capture: bool,
    icr: u16,
    loaded: u8,
}

/// Source on one driver line.
fn drive(out: u8, high: u8, bit: u8, r: f64) -> Option<(f64, f64)> {
    if out & 1 << bit == 0 {
        None
    }
    else if high & 1 << bit != 0 {
        Some((VCC, r + RI_H))
    }
    else {
        Some((0.0, r + RI_L))
    }
}

impl Sim {
    pub fn new() -> Sim {
        let cpu_freq = CONFIG.cpu_freq as f64;
        Sim {
            layout: CONFIG.layout,
            cpu_freq,
            adc_clock: CONFIG.cycles_per_adc as f64 / cpu_freq,
            ref_channel: CONFIG.ref_cap_channel,
            now: 0.0,
            dut: None,
            ref_cap: None,
            probe_out: 0,
            probe_high: 0,
            r_out: 0,
            r_high: 0,
            adjust: Line::Open,
            bandgap: 1.1,
            comp_offset: 0.0,
            stuck: false,
            discharge_limit: None,
            timed_lines: None,
            discharges: 0,
            watchdogs: 0,
            mux: 0,
            reference: Reference::Vcc,
            sample_at: None,
            sampled: 0.0,
            conv_end: 0.0,
            comparator: None,
            t_start: 0.0,
            frozen: Some(0),
            wraps_seen: 0,
            overflow: false,
            capture: false,
            icr: 0,
            loaded: 0,
        }
    }

    /// Put a cap between probes `a` and `b`.
    pub fn cap(&mut self, a: u8, b: u8, c: f64, esr: f64, leak: f64) {
        self.dut = Some(Element {
            x: a as usize, y: b as usize, c, esr, leak, vc: 0.0});
    }

    /// Fit the reference cap.
    pub fn reference(&mut self, c: f64) {
        self.ref_cap = Some(Element {
            x: REF, y: GND, c, esr: 0.0, leak: 1e15, vc: 0.0});
    }

    /// All probe and resistor lines high impedance.
    pub fn released(&self) -> bool {
        self.probe_out == 0 && self.r_out == 0
    }

    fn source(&self, n: usize) -> Option<(f64, f64)> {
        let lines = match n {
            GND => [Some((0.0, 1e-3)), None, None],
            REF => [match self.adjust {
                Line::High => Some((VCC, R_H + RI_H)),
                Line::Low => Some((0.0, R_H + RI_L)),
                Line::Open => None,
            }, None, None],
            _ => [
                drive(self.probe_out, self.probe_high, self.layout.pin[n], 0.0),
                drive(self.r_out, self.r_high, self.layout.rl[n], R_L),
                drive(self.r_out, self.r_high, self.layout.rh[n], R_H),
            ],
        };
        let (mut g, mut i) = (0.0, 0.0);
        for (v, r) in lines.into_iter().flatten() {
            g += 1.0 / r;
            i += v / r;
        }
        if g == 0.0 {None} else {Some((i / g, 1.0 / g))}
    }

    fn evolve(&self, mut e: Element, dt: f64) -> Element {
        match (self.source(e.x), self.source(e.y)) {
            (Some((vx, rx)), Some((vy, ry))) => {
                let rs = rx + ry + e.esr;
                let v_inf = (vx - vy) * e.leak / (rs + e.leak);
                let tau = e.c * rs * e.leak / (rs + e.leak);
                e.vc = v_inf + (e.vc - v_inf) * (-dt / tau).exp();
            }
            _ => e.vc *= (-dt / (e.c * e.leak)).exp(),
        }
        e
    }

    fn node(&self, n: usize) -> f64 {
        for e in [self.dut, self.ref_cap].into_iter().flatten() {
            if e.x != n && e.y != n {
                continue;
            }
            return match (self.source(e.x), self.source(e.y)) {
                (Some((vx, rx)), Some((vy, ry))) => {
                    let i = (vx - vy - e.vc) / (rx + ry + e.esr);
                    if n == e.x {vx - i * rx} else {vy + i * ry}
                }
                (Some((vx, _)), None) => if n == e.x {vx} else {vx - e.vc},
                (None, Some((vy, _))) => if n == e.x {vy + e.vc} else {vy},
                (None, None) => if n == e.x {e.vc} else {0.0},
            };
        }
        self.source(n).map_or(0.0, |(v, _)| v)
    }

    fn channel(&self, ch: u8) -> f64 {
        if ch == self.ref_channel {
            return self.node(REF);
        }
        match self.layout.ch.iter().position(|&c| c == ch) {
            Some(n) => self.node(n),
            None => 0.0,
        }
    }

    fn step(&mut self, dt: f64) {
        if let Some(e) = self.dut {
            self.dut = Some(self.evolve(e, dt));
        }
        if let Some(e) = self.ref_cap {
            self.ref_cap = Some(self.evolve(e, dt));
        }
        self.now += dt;
    }

    fn advance(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let end = self.now + dt;
        if let Some(t) = self.sample_at && t <= end {
            self.step((t - self.now).max(0.0));
            self.sampled = self.channel(self.mux);
            self.sample_at = None;
        }
        self.step(end - self.now);
    }

    fn ticks(&self) -> u64 {
        self.frozen.unwrap_or_else(
            || ((self.now - self.t_start) * self.cpu_freq) as u64)
    }

    /// Time until the comparator trips, if within `horizon`.
    fn crossing(&self, ch: u8, horizon: f64) -> Option<f64> {
        let trip = self.bandgap + self.comp_offset;
        if self.channel(ch) >= trip {
            return Some(0.0);
        }
        let at = |dt: f64| {
            let mut s = self.clone();
            s.step(dt);
            s.channel(ch)
        };
        if at(horizon) < trip {
            return None;
        }
        let (mut lo, mut hi) = (0.0, horizon);
        for _ in 0 .. 60 {
            let mid = (lo + hi) / 2.0;
            if at(mid) >= trip {hi = mid} else {lo = mid}
        }
        Some(hi)
    }
}

impl FrontEnd for Sim {
    fn probe_lines(&mut self, output: u8, high: u8) {
        if self.frozen.is_none() {
            self.timed_lines = Some(output);
        }
        self.probe_out = output;
        self.probe_high = high;
    }
    fn resistor_lines(&mut self, output: u8, high: u8) {
        self.r_out = output;
        self.r_high = high;
    }
    fn read_voltage(&mut self, channel: u8, run: &Runtime) -> u16 {
        self.advance(run.samples.max(1) as f64 * 13.0 * self.adc_clock);
        let mut mv = self.channel(channel).max(0.0) * 1000.0;
        if run.auto_scale && mv < 990.0 {
            mv *= run.bandgap as f64 / (self.bandgap * 1000.0);
        }
        mv.round().min(VCC * 1000.0) as u16
    }
    fn select(&mut self, channel: u8, reference: Reference) {
        self.mux = channel;
        self.reference = reference;
    }
    fn start_conversion(&mut self) {
        self.sample_at = Some(
            self.now + 2.5 * self.adc_clock - 16.0 / self.cpu_freq);
        self.conv_end = self.now + 14.0 * self.adc_clock;
    }
    fn conversion_result(&mut self) -> u16 {
        self.advance(self.conv_end - self.now);
        let vref = match self.reference {
            Reference::Bandgap => self.bandgap,
            Reference::Vcc => VCC,
        };
        (self.sampled / vref * 1024.0).floor().clamp(0.0, 1023.0) as u16
    }
    fn discharge(&mut self) -> bool {
        self.discharges += 1;
        if self.stuck
            || self.discharge_limit.is_some_and(|n| self.discharges > n) {
            return false;
        }
        if let Some(e) = &mut self.dut {
            e.vc = 0.0;
        }
        self.probe_out = 0;
        self.r_out = 0;
        self.advance(1e-3);
        true
    }
    fn discharge_pair(&mut self, _a: u8, _b: u8) {
        if !self.stuck && let Some(e) = &mut self.dut {
            e.vc = 0.0;
        }
    }
}

impl Comparator for Sim {
    fn arm(&mut self, channel: u8) {
        self.comparator = Some(channel);
    }
    fn disarm(&mut self) {
        self.comparator = None;
    }
}

impl CaptureTimer for Sim {
    fn reset(&mut self) {
        self.frozen = Some(0);
        self.wraps_seen = 0;
        self.overflow = false;
        self.capture = false;
        self.icr = 0;
    }
    fn start(&mut self) {
        self.t_start = self.now - self.frozen.unwrap_or(0) as f64 / self.cpu_freq;
        self.frozen = None;
    }
    fn stop(&mut self) {
        self.frozen = Some(self.ticks());
    }
    fn flags(&mut self) -> TimerFlags {
        if self.frozen.is_none() && !self.capture && !self.overflow {
            let next_wrap = self.t_start
                + ((self.wraps_seen + 1) * 65536) as f64 / self.cpu_freq;
            let horizon = next_wrap - self.now;
            match self.comparator.and_then(|ch| self.crossing(ch, horizon)) {
                Some(dt) => {
                    self.advance(dt);
                    self.capture = true;
                    self.icr = (self.ticks() % 65536) as u16;
                }
                None => self.advance(horizon + 0.5 / self.cpu_freq),
            }
        }
        if self.frozen.is_none() {
            let wraps = self.ticks() / 65536;
            if wraps > self.wraps_seen {
                self.overflow = true;
                self.wraps_seen = wraps;
            }
        }
        TimerFlags {capture: self.capture, overflow: self.overflow}
    }
    fn clear_overflow(&mut self) {
        self.overflow = false;
    }
    fn clear_capture(&mut self) {
        self.capture = false;
    }
    fn captured(&mut self) -> u16 {
        self.icr
    }
    fn count(&mut self) -> u16 {
        (self.ticks() % 65536) as u16
    }
}

impl DelayNs for Sim {
    fn delay_ns(&mut self, ns: u32) {
        self.advance(ns as f64 * 1e-9);
    }
    fn delay_us(&mut self, us: u32) {
        self.advance(us as f64 * 1e-6);
    }
    fn delay_ms(&mut self, ms: u32) {
        self.advance(ms as f64 * 1e-3);
    }
}

impl Clock for Sim {
    fn watchdog(&mut self) {
        self.watchdogs += 1;
    }
    fn load_cycles(&mut self, cycles: u8) {
        self.loaded = cycles;
    }
    fn run_cycles(&mut self) {
        self.advance((self.loaded as f64 + 17.0) / self.cpu_freq);
    }
}

impl AdjustLine for Sim {
    fn adjust_line(&mut self, line: Line) {
        self.adjust = line;
    }
}

#[test]
fn time_constant() {
    let mut sim = Sim::new();
    sim.cap(0, 1, 100e-6, 0.0, 1e15);
    // Gnd -- probe-2 / probe-1 -- Rl -- Vcc, τ = 72.2ms.
    sim.probe_lines(0x02, 0);
    sim.resistor_lines(0x01, 0x01);
    sim.delay_us(72200);
    sim.resistor_lines(0, 0);
    let mut run = Runtime::default();
    run.samples = 1;
    let mv = sim.read_voltage(0, &run);
    assert!((3140 ..= 3180).contains(&mv), "{mv}");
    // Probe-2 reads ground through RiL.
    assert_eq!(sim.read_voltage(1, &run), 0);
}

#[test]
fn timer_overflows() {
    let mut sim = Sim::new();
    sim.reset();
    sim.start();
    let f = sim.flags();
    assert!(f.overflow && !f.capture);
    assert_eq!(sim.count(), 0);
    sim.clear_overflow();
    assert!(sim.flags().overflow);
    sim.stop();
    assert_eq!(sim.ticks(), 2 * 65536);
}
