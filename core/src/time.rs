//! Emulated time: absolute instants and signed spans of master clock ticks.
//!
//! All arithmetic is exact integer arithmetic against [`MAIN_FREQ`]. Conversions
//! into a device's own clock domain that do not divide evenly are handled by the
//! types in [`crate::clock`], which carry the fractional remainder.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw amount of master clock ticks.
pub type Ticks = u64;

/// Master clock frequency (Hz). Every instant and duration is expressed in
/// ticks of this clock. It is a multiple of the common MSX clocks
/// (3.58 MHz CPU/PSG, 21.48 MHz VDP) so those convert without remainder.
pub const MAIN_FREQ: u64 = 3_579_545 * 960;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    #[error("Frequency of 0 Hz")]
    ZeroFrequency,
    #[error("Frequency {0} Hz exceeds the master clock")]
    FrequencyTooHigh(u64),
    #[error("Emulated time overflow")]
    Overflow,
    #[error("{0} is not a valid current time")]
    InvalidTime(EmuTime),
}

/// Computes `a * b / c` without intermediate overflow, truncating.
#[inline(always)]
pub(crate) const fn mul_div(a: u64, b: u64, c: u64) -> u64 {
    ((a as u128 * b as u128) / c as u128) as u64
}

/// A signed span of master clock ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EmuDuration(i64);

impl EmuDuration {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// Duration of one period of a clock running at `freq` Hz.
    ///
    /// Truncates when `freq` does not divide [`MAIN_FREQ`]; use a
    /// [`DynamicClock`](crate::clock::DynamicClock) for drift-free stepping at such rates.
    pub const fn hz(freq: u64) -> Self {
        Self((MAIN_FREQ / freq) as i64)
    }

    /// Checked variant of [`EmuDuration::hz`].
    pub const fn try_hz(freq: u64) -> Result<Self, TimeError> {
        if freq == 0 {
            Err(TimeError::ZeroFrequency)
        } else if freq > MAIN_FREQ {
            Err(TimeError::FrequencyTooHigh(freq))
        } else {
            Ok(Self::hz(freq))
        }
    }

    /// Duration of `n` seconds.
    pub const fn sec(n: i64) -> Self {
        Self(n * MAIN_FREQ as i64)
    }

    /// Duration of `n` milliseconds (truncated to whole ticks).
    pub const fn msec(n: i64) -> Self {
        Self(((n as i128 * MAIN_FREQ as i128) / 1_000) as i64)
    }

    /// Duration of `n` microseconds (truncated to whole ticks).
    pub const fn usec(n: i64) -> Self {
        Self(((n as i128 * MAIN_FREQ as i128) / 1_000_000) as i64)
    }

    pub const fn ticks(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Amount of whole periods of a `freq` Hz clock within this span.
    /// Rounds towards zero.
    pub const fn get_ticks_at(self, freq: u64) -> i64 {
        ((self.0 as i128 * freq as i128) / MAIN_FREQ as i128) as i64
    }

    /// How many times `other` fits in this span.
    pub const fn div_duration(self, other: Self) -> i64 {
        self.0 / other.0
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self, TimeError> {
        self.0.checked_add(rhs.0).map(Self).ok_or(TimeError::Overflow)
    }

    pub fn checked_mul(self, rhs: i64) -> Result<Self, TimeError> {
        self.0.checked_mul(rhs).map(Self).ok_or(TimeError::Overflow)
    }

    /// Span in seconds, for display purposes only.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MAIN_FREQ as f64
    }
}

impl Add for EmuDuration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for EmuDuration {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for EmuDuration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for EmuDuration {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for EmuDuration {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Mul<i64> for EmuDuration {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i64> for EmuDuration {
    type Output = Self;

    fn div(self, rhs: i64) -> Self {
        Self(self.0 / rhs)
    }
}

impl fmt::Display for EmuDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks ({:.6}s)", self.0, self.as_secs_f64())
    }
}

/// An absolute point in emulated time, in master clock ticks since power-on.
///
/// The [`EmuTime::ASAP`] sentinel orders before every finite instant, including
/// [`EmuTime::zero`]. It is only meaningful as a scheduling target and must not
/// be used in arithmetic.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct EmuTime(Ticks);

impl EmuTime {
    /// As soon as possible; sorts before any finite instant.
    pub const ASAP: Self = Self(Ticks::MAX);

    const INFINITY: Self = Self(Ticks::MAX - 1);

    pub const fn zero() -> Self {
        Self(0)
    }

    /// Later than any reachable instant.
    pub const fn infinity() -> Self {
        Self::INFINITY
    }

    pub const fn from_ticks(ticks: Ticks) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> Ticks {
        self.0
    }

    pub const fn is_asap(self) -> bool {
        self.0 == Self::ASAP.0
    }

    /// Position in the total order: ASAP maps to 0, zero to 1, etc.
    #[inline(always)]
    pub(crate) const fn key(self) -> u64 {
        self.0.wrapping_add(1)
    }

    #[inline(always)]
    pub(crate) const fn from_key(key: u64) -> Self {
        Self(key.wrapping_sub(1))
    }

    /// Amount of whole periods of a `freq` Hz clock elapsed since power-on.
    pub const fn get_ticks_at(self, freq: u64) -> u64 {
        mul_div(self.0, freq, MAIN_FREQ)
    }

    pub fn checked_add(self, d: EmuDuration) -> Result<Self, TimeError> {
        debug_assert!(!self.is_asap());
        self.0
            .checked_add_signed(d.0)
            .filter(|&t| t < Self::INFINITY.0)
            .map(Self)
            .ok_or(TimeError::Overflow)
    }

    /// Span since `earlier`, clamped to zero if `earlier` is later.
    pub fn saturating_sub(self, earlier: Self) -> EmuDuration {
        debug_assert!(!self.is_asap() && !earlier.is_asap());
        EmuDuration(self.0.saturating_sub(earlier.0) as i64)
    }

    /// Instant in seconds since power-on, for display purposes only.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MAIN_FREQ as f64
    }
}

impl Default for EmuTime {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for EmuTime {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for EmuTime {}

impl Hash for EmuTime {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for EmuTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EmuTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Add<EmuDuration> for EmuTime {
    type Output = Self;

    fn add(self, rhs: EmuDuration) -> Self {
        debug_assert!(!self.is_asap());
        debug_assert!(
            self.0.checked_add_signed(rhs.0).is_some(),
            "emulated time out of range"
        );
        Self(self.0.wrapping_add_signed(rhs.0))
    }
}

impl AddAssign<EmuDuration> for EmuTime {
    fn add_assign(&mut self, rhs: EmuDuration) {
        *self = *self + rhs;
    }
}

impl Sub<EmuDuration> for EmuTime {
    type Output = Self;

    fn sub(self, rhs: EmuDuration) -> Self {
        self + (-rhs)
    }
}

impl Sub for EmuTime {
    type Output = EmuDuration;

    fn sub(self, rhs: Self) -> EmuDuration {
        debug_assert!(!self.is_asap() && !rhs.is_asap());
        EmuDuration((self.0 as i64).wrapping_sub(rhs.0 as i64))
    }
}

impl fmt::Debug for EmuTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_asap() {
            write!(f, "EmuTime(ASAP)")
        } else if *self == Self::INFINITY {
            write!(f, "EmuTime(inf)")
        } else {
            write!(f, "EmuTime({})", self.0)
        }
    }
}

impl fmt::Display for EmuTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_asap() {
            write!(f, "ASAP")
        } else if *self == Self::INFINITY {
            write!(f, "never")
        } else {
            write!(f, "{} ({:.6}s)", self.0, self.as_secs_f64())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asap_sorts_first() {
        assert!(EmuTime::ASAP < EmuTime::zero());
        assert!(EmuTime::ASAP < EmuTime::from_ticks(1234));
        assert!(EmuTime::zero() < EmuTime::infinity());
        assert!(EmuTime::from_ticks(u64::MAX - 2) < EmuTime::infinity());
        assert_eq!(EmuTime::ASAP, EmuTime::ASAP);
    }

    #[test]
    fn key_roundtrip() {
        for t in [EmuTime::ASAP, EmuTime::zero(), EmuTime::from_ticks(99), EmuTime::infinity()] {
            assert_eq!(EmuTime::from_key(t.key()), t);
        }
    }

    #[test]
    fn instant_arithmetic() {
        let t = EmuTime::from_ticks(1000);
        let later = t + EmuDuration::from_ticks(500);
        assert_eq!(later.ticks(), 1500);
        assert_eq!(later - t, EmuDuration::from_ticks(500));
        assert_eq!(t - later, EmuDuration::from_ticks(-500));
        assert_eq!(later - EmuDuration::from_ticks(1500), EmuTime::zero());
        assert_eq!(t.saturating_sub(later), EmuDuration::zero());

        let mut t2 = t;
        t2 += EmuDuration::from_ticks(-1);
        assert_eq!(t2.ticks(), 999);
    }

    #[test]
    fn checked_add_rejects_overflow() {
        assert_eq!(
            EmuTime::from_ticks(u64::MAX - 10).checked_add(EmuDuration::from_ticks(100)),
            Err(TimeError::Overflow)
        );
        assert_eq!(
            EmuTime::zero().checked_add(EmuDuration::from_ticks(-1)),
            Err(TimeError::Overflow)
        );
        assert_eq!(
            EmuDuration::from_ticks(i64::MAX).checked_add(EmuDuration::from_ticks(1)),
            Err(TimeError::Overflow)
        );
    }

    #[test]
    fn hz_exact_for_divisors() {
        // MSX CPU clock
        let d = EmuDuration::hz(3_579_545);
        assert_eq!(d.ticks(), 960);
        assert_eq!(d.get_ticks_at(3_579_545), 1);
        assert_eq!((d * 3_579_545).ticks() as u64, MAIN_FREQ);
        assert_eq!(EmuDuration::sec(1).get_ticks_at(3_579_545), 3_579_545);
    }

    #[test]
    fn try_hz() {
        assert_eq!(EmuDuration::try_hz(0), Err(TimeError::ZeroFrequency));
        assert_eq!(
            EmuDuration::try_hz(MAIN_FREQ + 1),
            Err(TimeError::FrequencyTooHigh(MAIN_FREQ + 1))
        );
        assert_eq!(EmuDuration::try_hz(MAIN_FREQ), Ok(EmuDuration::from_ticks(1)));
    }

    #[test]
    fn msec_usec() {
        assert_eq!(EmuDuration::msec(1000), EmuDuration::sec(1));
        assert_eq!(EmuDuration::usec(1_000_000), EmuDuration::sec(1));
        // 3436363.2 ticks per millisecond, truncated
        assert_eq!(EmuDuration::msec(1).ticks(), 3_436_363);
        assert_eq!(EmuDuration::msec(-1).ticks(), -3_436_363);
    }

    #[test]
    fn instant_ticks_at() {
        let t = EmuTime::zero() + EmuDuration::sec(2);
        assert_eq!(t.get_ticks_at(96_000), 192_000);
        assert_eq!(t.get_ticks_at(1), 2);
        let t = EmuTime::from_ticks(MAIN_FREQ - 1);
        assert_eq!(t.get_ticks_at(1), 0);
    }

    #[test]
    fn duration_ops() {
        let d = EmuDuration::from_ticks(100);
        assert_eq!(d / 3, EmuDuration::from_ticks(33));
        assert_eq!((-d).abs(), d);
        assert!((-d).is_negative());
        assert_eq!(d.div_duration(EmuDuration::from_ticks(30)), 3);
        assert_eq!(d - d, EmuDuration::zero());
    }

    #[test]
    fn serde_transparent_ticks() {
        let t = EmuTime::from_ticks(42);
        let s = serde_json::to_string(&t).unwrap();
        assert_eq!(s, "42");
        let back: EmuTime = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }
}
