use crate::hw::Clock;
use crate::hw::FrontEnd;
use crate::utils::make_mask;

/// Port bit positions of the three test probes.  Direct probe lines and the
/// converter channels share a port; the pull resistors sit on a second one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub pin: [u8; 3],
    pub ch: [u8; 3],
    /// 680Ω resistor line per probe.
    pub rl: [u8; 3],
    /// 470kΩ resistor line per probe.
    pub rh: [u8; 3],
}

impl Layout {
    pub const STANDARD: Layout = Layout {
        pin: [0, 1, 2],
        ch: [0, 1, 2],
        rl: [0, 2, 4],
        rh: [1, 3, 5],
    };

    pub const fn all_pins(&self) -> u8 {make_mask(&self.pin)}

    pub const fn pins(&self, id: u8) -> Pins {
        let i = id as usize;
        Pins {
            id,
            pin: make_mask(&[self.pin[i]]),
            ch: self.ch[i],
            rl: make_mask(&[self.rl[i]]),
            rh: make_mask(&[self.rh[i]]),
        }
    }
}

/// Register bits for one probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Pins {
    pub id: u8,
    pub pin: u8,
    pub ch: u8,
    pub rl: u8,
    pub rh: u8,
}

/// Roles of the probes for one measurement.  Probe-1 is the one pulled up,
/// probe-2 the one pulled down, probe-3 the spare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub p1: Pins,
    pub p2: Pins,
    pub p3: Pins,
    /// Direct lines of all probes.
    pub all: u8,
}

impl Assignment {
    pub const fn new(layout: &Layout, probe1: u8, probe2: u8) -> Assignment {
        assert!(probe1 < 3 && probe2 < 3 && probe1 != probe2);
        let probe3 = 3 - probe1 - probe2;
        Assignment {
            p1: layout.pins(probe1),
            p2: layout.pins(probe2),
            p3: layout.pins(probe3),
            all: layout.all_pins(),
        }
    }
}

/// Length of a charge pulse through Rl.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pulse {
    Ms10,
    Ms1,
}

impl Pulse {
    pub const fn ms(self) -> u32 {
        match self {
            Pulse::Ms10 => 10,
            Pulse::Ms1 => 1,
        }
    }
}

/// Pull the probes on the resistor lines in `mask` up (or down) for the
/// pulse length, then leave the whole resistor port high impedance.
pub fn pull_probe<B: FrontEnd + Clock>(board: &mut B, mask: u8, pulse: Pulse,
                                       up: bool) {
    board.resistor_lines(mask, if up {mask} else {0});
    board.delay_ms(pulse.ms());
    board.resistor_lines(0, 0);
}

#[test]
fn assignment() {
    let a = Assignment::new(&Layout::STANDARD, 0, 1);
    assert_eq!(a.p1, Pins {id: 0, pin: 1, ch: 0, rl: 0x01, rh: 0x02});
    assert_eq!(a.p2, Pins {id: 1, pin: 2, ch: 1, rl: 0x04, rh: 0x08});
    assert_eq!(a.p3.id, 2);
    assert_eq!(a.all, 7);

    let a = Assignment::new(&Layout::STANDARD, 2, 0);
    assert_eq!(a.p1.rh, 0x20);
    assert_eq!(a.p2.pin, 1);
    assert_eq!(a.p3.id, 1);
}

#[test]
fn pulse_lengths() {
    assert_eq!(Pulse::Ms10.ms(), 10);
    assert_eq!(Pulse::Ms1.ms(), 1);
}
