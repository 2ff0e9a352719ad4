
/// Adjustment values kept in non-volatile storage.  Loading and saving is up
/// to the owner; the measurement code only reads them, apart from the offset
/// self-adjustment which updates `comp_offset` and `ref_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Calibration {
    /// Internal resistance of the MCU port when driving low, in 0.1Ω.
    pub ril: u16,
    /// Probe resistance offset in 0.01Ω, per probe pair.
    pub r_zero: [u16; 3],
    /// Capacitance offset in pF, per probe pair.
    pub cap_zero: [u8; 3],
    /// Input offset of the analog comparator in mV.
    pub comp_offset: i8,
    /// Bandgap reference trim in mV.
    pub ref_offset: i8,
}

pub const R_MCU_LOW: u16 = 200;
pub const R_ZERO: u16 = 20;
pub const C_ZERO: u8 = 43;

impl Default for Calibration {
    fn default() -> Self {
        Calibration {
            ril: R_MCU_LOW,
            r_zero: [R_ZERO; 3],
            cap_zero: [C_ZERO; 3],
            comp_offset: 0,
            ref_offset: 0,
        }
    }
}

/// Index for the probe pair: 1-2 → 0, 1-3 → 1, 2-3 → 2.  Probe ids are zero
/// based.
pub const fn offset_index(a: u8, b: u8) -> usize {
    let i = (a + b) as usize;
    if i == 0 {0} else if i > 3 {2} else {i - 1}
}

impl Calibration {
    fn index(multi: bool, a: u8, b: u8) -> usize {
        if multi {offset_index(a, b)} else {0}
    }
    pub fn r_zero(&self, multi: bool, a: u8, b: u8) -> u16 {
        self.r_zero[Self::index(multi, a, b)]
    }
    pub fn cap_zero(&self, multi: bool, a: u8, b: u8) -> u8 {
        self.cap_zero[Self::index(multi, a, b)]
    }
}

#[test]
fn pair_index() {
    assert_eq!(offset_index(0, 1), 0);
    assert_eq!(offset_index(1, 0), 0);
    assert_eq!(offset_index(0, 2), 1);
    assert_eq!(offset_index(2, 0), 1);
    assert_eq!(offset_index(1, 2), 2);
    assert_eq!(offset_index(2, 1), 2);
}

#[test]
fn single_offset() {
    let mut cal = Calibration::default();
    cal.cap_zero = [10, 20, 30];
    cal.r_zero = [1, 2, 3];
    assert_eq!(cal.cap_zero(false, 1, 2), 10);
    assert_eq!(cal.cap_zero(true, 1, 2), 30);
    assert_eq!(cal.r_zero(false, 0, 2), 1);
    assert_eq!(cal.r_zero(true, 2, 0), 2);
}
