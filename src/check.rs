use arrayvec::ArrayVec;

use crate::cap::Capacitor;
use crate::utils::cmp_value;

/// Component found so far.  The order matters: everything below `Diode` may
/// still be replaced by a capacitor.
#[allow(dead_code)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kind {
    #[default]
    None = 0,
    Error = 1,
    Resistor = 10,
    Capacitor = 11,
    Inductor = 12,
    Diode = 20,
    Bjt = 30,
    Fet = 31,
    Igbt = 32,
    Triac = 40,
    Thyristor = 41,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Diode {
    pub anode: u8,
    pub cathode: u8,
    /// Forward voltage in mV.
    pub v_f: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resistor {
    pub a: u8,
    pub b: u8,
    pub value: u32,
    pub scale: i8,
}

impl Resistor {
    pub fn connects(&self, p1: u8, p2: u8) -> bool {
        (self.a == p1 && self.b == p2) || (self.a == p2 && self.b == p1)
    }
    /// Below 10Ω, where a large cap looks like a resistor.
    pub fn is_low(&self) -> bool {
        cmp_value(self.value, self.scale, 10, 0).is_lt()
    }
}

/// Classification shared with the rest of the tester.  The diode and
/// resistor lists are filled by the other checks and only queried here.
#[derive(Clone, Debug, Default)]
pub struct Check {
    pub found: Kind,
    pub diodes: ArrayVec<Diode, 6>,
    pub resistors: ArrayVec<Resistor, 3>,
    pub caps: [Capacitor; 3],
}

impl Check {
    /// Diode between the two probes, either polarity.
    pub fn diode(&self, p1: u8, p2: u8) -> Option<&Diode> {
        self.diodes.iter().find(
            |d| (d.anode == p1 && d.cathode == p2)
                || (d.anode == p2 && d.cathode == p1))
    }
    pub fn resistor(&self, p1: u8, p2: u8) -> Option<&Resistor> {
        self.resistors.iter().find(|r| r.connects(p1, p2))
    }
    /// Record a failure for the present probe pair.
    pub fn fail(&mut self) {
        self.found = Kind::Error;
    }
}

#[test]
fn ranks() {
    assert!(Kind::Resistor < Kind::Diode);
    assert!(Kind::Capacitor < Kind::Diode);
    assert!(Kind::Error < Kind::Diode);
    assert!(Kind::Fet > Kind::Diode);
}

#[test]
fn queries() {
    let mut check = Check::default();
    check.diodes.push(Diode {anode: 2, cathode: 0, v_f: 700});
    check.resistors.push(Resistor {a: 1, b: 2, value: 47, scale: -1});
    check.resistors.push(Resistor {a: 0, b: 1, value: 12, scale: 0});
    assert_eq!(check.diode(0, 2).map(|d| d.v_f), Some(700));
    assert!(check.diode(0, 1).is_none());
    assert!(check.resistor(2, 1).unwrap().is_low());
    assert!(!check.resistor(0, 1).unwrap().is_low());
    assert!(check.resistor(0, 2).is_none());
}
