pub mod clock;
pub mod debuggable;
pub mod emulator;
pub mod schedulable;
pub mod scheduler;
pub mod tickable;
pub mod time;
