use anyhow::Result;

pub use crate::time::Ticks;

/// A component stepped forward in master clock ticks, normally the CPU.
pub trait Tickable {
    /// Executes for a budget of about `ticks` master clock ticks.
    ///
    /// Always makes progress (at least one instruction) and returns the
    /// amount of ticks actually consumed, which may exceed the budget.
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
