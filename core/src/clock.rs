//! Device clock domains on top of the master clock.
//!
//! A device clock is anchored at an [`EmuTime`] and counts its own ticks from
//! there. The instant of tick `n` is always computed from the anchor as
//! `floor(n * period)` with an exact rational period, so stepping a clock a
//! billion times lands on exactly the same instant as jumping there directly.

use log::*;

use crate::time::{EmuDuration, EmuTime, MAIN_FREQ, TimeError};

/// Converts tick counts between two clock domains, carrying the fractional
/// remainder from one call to the next.
///
/// The sum of all results always equals the exact rational total, rounded
/// down, no matter how the input is split up.
#[derive(Clone, Debug)]
pub struct FrequencyConverter {
    from: u64,
    to: u64,
    remainder: u64,
}

impl FrequencyConverter {
    pub fn new(from_hz: u64, to_hz: u64) -> Result<Self, TimeError> {
        if from_hz == 0 || to_hz == 0 {
            return Err(TimeError::ZeroFrequency);
        }
        Ok(Self {
            from: from_hz,
            to: to_hz,
            remainder: 0,
        })
    }

    /// Converter from master clock ticks to `to_hz` ticks.
    pub fn from_master(to_hz: u64) -> Result<Self, TimeError> {
        Self::new(MAIN_FREQ, to_hz)
    }

    /// Converts `ticks` of the source domain, returns whole ticks in the
    /// destination domain.
    #[inline]
    pub fn convert(&mut self, ticks: u64) -> u64 {
        let total = u128::from(ticks) * u128::from(self.to) + u128::from(self.remainder);
        self.remainder = (total % u128::from(self.from)) as u64;
        (total / u128::from(self.from)) as u64
    }

    /// Converts a master clock span. Negative spans convert to nothing.
    pub fn convert_duration(&mut self, d: EmuDuration) -> u64 {
        debug_assert!(!d.is_negative());
        self.convert(d.ticks().max(0) as u64)
    }

    /// Fraction of a destination tick carried over, in units of `1 / from`.
    pub fn remainder(&self) -> u64 {
        self.remainder
    }

    pub fn reset(&mut self) {
        self.remainder = 0;
    }
}

/// Shared tick arithmetic: a clock of `num / den` Hz anchored at `base`,
/// currently positioned `count` ticks after it.
#[derive(Clone, Debug)]
struct ClockPosition {
    base: EmuTime,
    count: u64,
    /// Period in master ticks is `step_num / step_den`.
    step_num: u128,
    step_den: u128,
}

impl ClockPosition {
    fn new(base: EmuTime, num: u32, den: u32) -> Self {
        Self {
            base,
            count: 0,
            step_num: u128::from(MAIN_FREQ) * u128::from(den),
            step_den: u128::from(num),
        }
    }

    /// Offset of tick `n` from the anchor, in master ticks.
    #[inline]
    fn offset_of(&self, n: u64) -> u64 {
        (u128::from(n) * self.step_num / self.step_den) as u64
    }

    /// Index of the last tick at or before `time`.
    #[inline]
    fn last_tick_at(&self, time: EmuTime) -> u64 {
        debug_assert!(time >= self.base);
        let d = u128::from(time.ticks() - self.base.ticks());
        (((d + 1) * self.step_den - 1) / self.step_num) as u64
    }

    fn time_of(&self, n: u64) -> EmuTime {
        EmuTime::from_ticks(self.base.ticks() + self.offset_of(n))
    }

    fn get_time(&self) -> EmuTime {
        self.time_of(self.count)
    }

    fn get_ticks_till(&self, time: EmuTime) -> u64 {
        if time < self.base {
            return 0;
        }
        self.last_tick_at(time).saturating_sub(self.count)
    }

    fn advance(&mut self, time: EmuTime) {
        debug_assert!(time >= self.get_time());
        self.count = self.count.max(self.last_tick_at(time));
    }

    /// Moves the anchor to the current tick; keeps future arithmetic small.
    fn rebase(&mut self) {
        self.base = self.get_time();
        self.count = 0;
    }

    fn set_ratio(&mut self, num: u32, den: u32) {
        self.rebase();
        self.step_num = u128::from(MAIN_FREQ) * u128::from(den);
        self.step_den = u128::from(num);
    }

    fn period(&self) -> EmuDuration {
        EmuDuration::from_ticks((self.step_num / self.step_den) as i64)
    }
}

/// A clock with a frequency fixed at compile time.
#[derive(Clone, Debug)]
pub struct Clock<const FREQ: u64> {
    pos: ClockPosition,
}

impl<const FREQ: u64> Clock<FREQ> {
    const VALID: () = assert!(FREQ > 0 && FREQ <= MAIN_FREQ, "clock frequency out of range");

    pub fn new(time: EmuTime) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID;
        Self {
            pos: ClockPosition::new(time, FREQ as u32, 1),
        }
    }

    pub const fn get_freq(&self) -> u64 {
        FREQ
    }

    /// Period of one tick, truncated to whole master ticks.
    pub fn get_period(&self) -> EmuDuration {
        self.pos.period()
    }

    /// Instant of the last tick this clock was advanced to.
    pub fn get_time(&self) -> EmuTime {
        self.pos.get_time()
    }

    /// Number of ticks between the current position and the last tick at or
    /// before `time`.
    pub fn get_ticks_till(&self, time: EmuTime) -> u64 {
        self.pos.get_ticks_till(time)
    }

    /// Instant of the `n`-th tick after the current position.
    pub fn get_time_after(&self, n: u64) -> EmuTime {
        self.pos.time_of(self.pos.count + n)
    }

    /// Advances to the last tick at or before `time`.
    pub fn advance(&mut self, time: EmuTime) {
        self.pos.advance(time);
    }

    pub fn fast_forward(&mut self, n: u64) {
        self.pos.count += n;
    }

    /// Re-anchors the clock so that its current tick is at `time`.
    pub fn reset(&mut self, time: EmuTime) {
        self.pos.base = time;
        self.pos.count = 0;
    }
}

/// A clock whose frequency can change at run-time.
#[derive(Clone, Debug)]
pub struct DynamicClock {
    pos: ClockPosition,
    freq_num: u32,
    freq_den: u32,
}

impl DynamicClock {
    pub fn new(time: EmuTime, freq: u64) -> Result<Self, TimeError> {
        let mut clock = Self {
            pos: ClockPosition::new(time, 1, 1),
            freq_num: 1,
            freq_den: 1,
        };
        clock.set_freq(freq)?;
        Ok(clock)
    }

    /// Sets the frequency to `freq` Hz, starting at the current tick.
    pub fn set_freq(&mut self, freq: u64) -> Result<(), TimeError> {
        self.set_freq_ratio(freq, 1)
    }

    /// Sets the frequency to `num / den` Hz, starting at the current tick.
    pub fn set_freq_ratio(&mut self, num: u64, den: u64) -> Result<(), TimeError> {
        if num == 0 || den == 0 {
            return Err(TimeError::ZeroFrequency);
        }
        if num / den > MAIN_FREQ {
            return Err(TimeError::FrequencyTooHigh(num / den));
        }
        let (Ok(n), Ok(d)) = (u32::try_from(num), u32::try_from(den)) else {
            return Err(TimeError::Overflow);
        };
        trace!("Clock frequency {}/{} Hz -> {}/{} Hz", self.freq_num, self.freq_den, n, d);
        self.pos.set_ratio(n, d);
        self.freq_num = n;
        self.freq_den = d;
        Ok(())
    }

    /// Frequency in whole Hz.
    pub fn get_freq(&self) -> u64 {
        u64::from(self.freq_num) / u64::from(self.freq_den)
    }

    /// Period of one tick, truncated to whole master ticks.
    pub fn get_period(&self) -> EmuDuration {
        self.pos.period()
    }

    pub fn get_time(&self) -> EmuTime {
        self.pos.get_time()
    }

    pub fn get_ticks_till(&self, time: EmuTime) -> u64 {
        self.pos.get_ticks_till(time)
    }

    pub fn get_time_after(&self, n: u64) -> EmuTime {
        self.pos.time_of(self.pos.count + n)
    }

    pub fn advance(&mut self, time: EmuTime) {
        self.pos.advance(time);
    }

    pub fn fast_forward(&mut self, n: u64) {
        self.pos.count += n;
    }

    pub fn reset(&mut self, time: EmuTime) {
        self.pos.base = time;
        self.pos.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converter_no_drift() {
        // 1000 ticks at 3.5 MHz into 96 kHz samples, 1000 times over
        let mut conv = FrequencyConverter::new(3_500_000, 96_000).unwrap();
        let total: u64 = (0..1000).map(|_| conv.convert(1000)).sum();

        // Exact total: 1_000_000 * 96_000 / 3_500_000 = 27428.57..
        let exact = 1_000_000u128 * 96_000 / 3_500_000;
        assert_eq!(u128::from(total), exact);
        assert_eq!(total, 27_428);

        // Each conversion on its own would truncate 27.43 to 27
        assert_ne!(total, 27 * 1000);
    }

    #[test]
    fn converter_split_independent() {
        let mut a = FrequencyConverter::from_master(44_100).unwrap();
        let mut b = FrequencyConverter::from_master(44_100).unwrap();
        let mut sum_a = 0;
        for i in 1..=5000u64 {
            sum_a += a.convert(i * 7);
        }
        let sum_b = b.convert((1..=5000u64).map(|i| i * 7).sum());
        assert!(sum_a.abs_diff(sum_b) <= 1);
        assert_eq!(sum_a, sum_b);
    }

    #[test]
    fn converter_zero_freq() {
        assert_eq!(
            FrequencyConverter::new(0, 5).unwrap_err(),
            TimeError::ZeroFrequency
        );
        assert!(FrequencyConverter::new(5, 0).is_err());
    }

    #[test]
    fn converter_reset() {
        let mut conv = FrequencyConverter::new(3, 1).unwrap();
        assert_eq!(conv.convert(2), 0);
        assert_eq!(conv.remainder(), 2);
        conv.reset();
        assert_eq!(conv.convert(2), 0);
        assert_eq!(conv.convert(1), 1);
    }

    #[test]
    fn fixed_clock_exact() {
        let mut clk = Clock::<3_579_545>::new(EmuTime::zero());
        assert_eq!(clk.get_period(), EmuDuration::from_ticks(960));
        assert_eq!(clk.get_time_after(10).ticks(), 9600);

        clk.advance(EmuTime::from_ticks(9599));
        assert_eq!(clk.get_time().ticks(), 9 * 960);
        assert_eq!(clk.get_ticks_till(EmuTime::from_ticks(9600)), 1);

        clk.fast_forward(1);
        assert_eq!(clk.get_time().ticks(), 9600);
    }

    #[test]
    fn fixed_clock_non_divisor() {
        // 96 kHz does not divide the master clock
        let mut clk = Clock::<96_000>::new(EmuTime::zero());
        let one_sec = EmuTime::zero() + EmuDuration::sec(1);
        assert_eq!(clk.get_ticks_till(one_sec), 96_000);

        // Step one sample at a time; must land exactly on one second
        for _ in 0..96_000 {
            let next = clk.get_time_after(1);
            clk.advance(next);
        }
        assert_eq!(clk.get_time(), one_sec);
    }

    #[test]
    fn clock_last_tick_at_boundaries() {
        // Period of 1.5 master ticks: ticks at 0, 1, 3, 4, 6..
        let mut clk = DynamicClock::new(EmuTime::zero(), MAIN_FREQ).unwrap();
        clk.set_freq(MAIN_FREQ / 3 * 2).unwrap();
        let expected = [0, 1, 3, 4, 6];
        for (n, &t) in expected.iter().enumerate() {
            assert_eq!(clk.get_time_after(n as u64).ticks(), t);
        }
        assert_eq!(clk.get_ticks_till(EmuTime::from_ticks(1)), 1);
        assert_eq!(clk.get_ticks_till(EmuTime::from_ticks(2)), 1);
        assert_eq!(clk.get_ticks_till(EmuTime::from_ticks(3)), 2);
        clk.advance(EmuTime::from_ticks(5));
        assert_eq!(clk.get_time().ticks(), 4);
    }

    #[test]
    fn dynamic_clock_freq_change() {
        let mut clk = DynamicClock::new(EmuTime::zero(), 1_000).unwrap();
        clk.advance(EmuTime::zero() + EmuDuration::msec(10));
        let t10 = clk.get_time();
        assert_eq!(t10, EmuTime::zero() + EmuDuration::msec(10));

        // Rebased on the current tick
        clk.set_freq(2_000).unwrap();
        assert_eq!(clk.get_time(), t10);
        assert_eq!(clk.get_freq(), 2_000);
        assert_eq!(
            clk.get_ticks_till(t10 + EmuDuration::msec(1)),
            2
        );
    }

    #[test]
    fn dynamic_clock_invalid() {
        assert_eq!(
            DynamicClock::new(EmuTime::zero(), 0).unwrap_err(),
            TimeError::ZeroFrequency
        );
        assert_eq!(
            DynamicClock::new(EmuTime::zero(), MAIN_FREQ * 2).unwrap_err(),
            TimeError::FrequencyTooHigh(MAIN_FREQ * 2)
        );
    }

    #[test]
    fn ticks_before_anchor() {
        let clk = DynamicClock::new(EmuTime::from_ticks(1000), 1_000).unwrap();
        assert_eq!(clk.get_ticks_till(EmuTime::from_ticks(10)), 0);
    }
}
