//! Timestamp arithmetic: time bases, rescaling and wrap handling.

use std::cmp::Ordering;

/// A rational time base, `num / den` seconds per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }
}

/// 90 kHz PES clock
pub const TIME_BASE_90KHZ: Rational = Rational::new(1, 90_000);
/// 27 MHz system clock
pub const TIME_BASE_27MHZ: Rational = Rational::new(1, 27_000_000);
/// Microseconds
pub const TIME_BASE_MICROS: Rational = Rational::new(1, 1_000_000);

/// Number of bits in a PTS/DTS field
pub const PTS_WRAP_BITS: u32 = 33;

/// Rescales `value` from `from` to `to`, rounding to nearest (ties away from zero).
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let mut num = value as i128 * from.num as i128 * to.den as i128;
    let mut den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    if den < 0 {
        num = -num;
        den = -den;
    }
    let rounded = if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    };
    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// A tick count tagged with its time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub value: i64,
    pub base: Rational,
}

impl Timestamp {
    pub const fn new(value: i64, base: Rational) -> Self {
        Self { value, base }
    }

    /// A 90 kHz PES timestamp.
    pub const fn from_90khz(value: i64) -> Self {
        Self::new(value, TIME_BASE_90KHZ)
    }

    pub fn rescale(&self, to: Rational) -> Timestamp {
        Timestamp::new(rescale(self.value, self.base, to), to)
    }

    pub fn as_micros(&self) -> i64 {
        rescale(self.value, self.base, TIME_BASE_MICROS)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let a = self.value as i128 * self.base.num as i128 * other.base.den as i128;
        let b = other.value as i128 * other.base.num as i128 * self.base.den as i128;
        Some(a.cmp(&b))
    }
}

/// Compares two timestamps on a circle of `1 << bits` ticks.
///
/// `a` is less than `b` when going forward from `a` reaches `b` in less than
/// half the circle.
pub fn compare_mod(a: u64, b: u64, bits: u32) -> Ordering {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let c = a.wrapping_sub(b) & mask;
    if c == 0 {
        Ordering::Equal
    } else if c > (mask >> 1) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// How timestamps relative to a wrap reference are adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapBehavior {
    #[default]
    Ignore,
    /// Values below the reference have wrapped and gain one period
    AddOffset,
    /// Values at or above the reference belong before the wrap and lose one period
    SubOffset,
}

/// Wrap state of one stream or program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapReference {
    pub reference: i64,
    pub behavior: WrapBehavior,
}

impl WrapReference {
    /// Derives the reference from the first timestamp seen on a stream.
    ///
    /// The reference sits 60 seconds before `first`; a first timestamp in the
    /// last eighth of the range means the wrap is ahead of us.
    pub fn from_first(first: i64, wrap_bits: u32, time_base: Rational) -> Option<Self> {
        if wrap_bits >= 63 {
            return None;
        }
        let period = 1i64 << wrap_bits;
        let first = first & (period - 1);
        let sixty = rescale(60, Rational::new(1, 1), time_base);
        let reference = first - sixty;

        let behavior = if first < period - (period >> 3) || first < period - sixty {
            WrapBehavior::AddOffset
        } else {
            WrapBehavior::SubOffset
        };
        Some(Self { reference, behavior })
    }

    /// Applies the wrap correction to `ts`.
    pub fn wrap(&self, ts: i64, wrap_bits: u32) -> i64 {
        if wrap_bits >= 63 {
            return ts;
        }
        let period = 1i64 << wrap_bits;
        match self.behavior {
            WrapBehavior::AddOffset if ts < self.reference => ts + period,
            WrapBehavior::SubOffset if ts >= self.reference => ts - period,
            _ => ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(90_000, TIME_BASE_90KHZ, TIME_BASE_MICROS), 1_000_000);
        assert_eq!(rescale(27_000_000, TIME_BASE_27MHZ, TIME_BASE_90KHZ), 90_000);
        assert_eq!(rescale(1, TIME_BASE_90KHZ, TIME_BASE_MICROS), 11);
        assert_eq!(rescale(-1, TIME_BASE_90KHZ, TIME_BASE_MICROS), -11);
        let ts = Timestamp::from_90khz(45_000);
        assert_eq!(ts.as_micros(), 500_000);
        assert_eq!(ts.rescale(TIME_BASE_27MHZ).value, 13_500_000);
    }

    #[test]
    fn test_timestamp_ordering_across_bases() {
        let a = Timestamp::from_90khz(90_000);
        let b = Timestamp::new(999_999, TIME_BASE_MICROS);
        assert!(a > b);
    }

    #[test]
    fn test_compare_mod() {
        let top = (1u64 << 33) - 10;
        assert_eq!(compare_mod(top, 5, 33), Ordering::Less);
        assert_eq!(compare_mod(5, top, 33), Ordering::Greater);
        assert_eq!(compare_mod(100, 100, 33), Ordering::Equal);
        assert_eq!(compare_mod(100, 200, 33), Ordering::Less);
    }

    #[test]
    fn test_wrap_reference_add_offset() {
        let wrap = WrapReference::from_first(10 * 90_000, 33, TIME_BASE_90KHZ).unwrap();
        assert_eq!(wrap.behavior, WrapBehavior::AddOffset);
        assert_eq!(wrap.reference, 10 * 90_000 - 60 * 90_000);
        assert_eq!(wrap.wrap(20 * 90_000, 33), 20 * 90_000);
    }

    #[test]
    fn test_wrap_reference_sub_offset_near_end() {
        let period = 1i64 << 33;
        let first = period - 5 * 90_000;
        let wrap = WrapReference::from_first(first, 33, TIME_BASE_90KHZ).unwrap();
        assert_eq!(wrap.behavior, WrapBehavior::SubOffset);
        assert_eq!(wrap.wrap(first, 33), first - period);
        // after the wrap the counter restarts near zero and is left alone
        assert_eq!(wrap.wrap(1000, 33), 1000);
    }

    #[quickcheck]
    fn prop_compare_mod_antisymmetric(a: u64, b: u64) -> bool {
        let (a, b) = (a & ((1 << 33) - 1), b & ((1 << 33) - 1));
        compare_mod(a, b, 33) == compare_mod(b, a, 33).reverse() || a.abs_diff(b) == 1 << 32
    }
}
