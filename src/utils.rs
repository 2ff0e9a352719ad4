use core::cmp::Ordering;

pub const fn make_mask(bits: &[u8]) -> u8 {
    let mut mask = 0;
    let mut i = 0;
    while i < bits.len() {
        mask |= 1 << bits[i];
        i += 1;
    }
    mask
}

/// v × 10^d, saturating far beyond anything a u32 can be compared against.
fn widen(v: u32, d: u32) -> u128 {
    if d > 20 {u128::MAX} else {v as u128 * 10u128.pow(d)}
}

/// Compare value1 × 10^scale1 with value2 × 10^scale2.
pub fn cmp_value(value1: u32, scale1: i8, value2: u32, scale2: i8) -> Ordering {
    if value1 == 0 || value2 == 0 {
        return value1.cmp(&value2);
    }
    let (a, b) = if scale1 >= scale2 {
        (widen(value1, (scale1 as i32 - scale2 as i32) as u32), value2 as u128)
    }
    else {
        (value1 as u128, widen(value2, (scale2 as i32 - scale1 as i32) as u32))
    };
    a.cmp(&b)
}

/// Re-express value × 10^scale with exponent new_scale.  Precision lost
/// going up is truncated, going down saturates.
pub fn rescale(value: u32, scale: i8, new_scale: i8) -> u32 {
    let d = new_scale as i32 - scale as i32;
    if d >= 0 {
        if d > 9 {0} else {value / 10u32.pow(d as u32)}
    }
    else {
        let d = -d as u32;
        if d > 9 {
            if value == 0 {0} else {u32::MAX}
        }
        else {
            value.saturating_mul(10u32.pow(d))
        }
    }
}

#[test]
fn test_mask() {
    assert_eq!(make_mask(&[]), 0);
    assert_eq!(make_mask(&[0, 2, 4]), 0x15);
    const M: u8 = make_mask(&[7]);
    assert_eq!(M, 0x80);
}

#[test]
fn test_cmp_value() {
    use Ordering::*;
    assert_eq!(cmp_value(10, -9, 10, -9), Equal);
    assert_eq!(cmp_value(9999, -12, 10, -9), Less);
    assert_eq!(cmp_value(10000, -12, 10, -9), Equal);
    assert_eq!(cmp_value(180, -9, 1, -6), Less);
    assert_eq!(cmp_value(1001, -6, 1000, -6), Greater);
    assert_eq!(cmp_value(950000, -9, 1000, -6), Less);
    assert_eq!(cmp_value(5, 0, 10, 0), Less);
    assert_eq!(cmp_value(0, 3, 1, -12), Less);
    assert_eq!(cmp_value(1, 30, u32::MAX, -12), Greater);
    assert_eq!(cmp_value(u32::MAX, -12, 1, 30), Less);
}

#[test]
fn test_rescale() {
    assert_eq!(rescale(470000, -12, -8), 47);
    assert_eq!(rescale(123, -9, -9), 123);
    assert_eq!(rescale(4, -6, -9), 4000);
    assert_eq!(rescale(5, -6, -18), u32::MAX);
    assert_eq!(rescale(5, -12, 0), 0);
    assert_eq!(rescale(0, 0, -12), 0);
}
