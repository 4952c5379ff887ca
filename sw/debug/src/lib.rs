#![no_std]
//! Level-filtered debug logger for `no_std` targets.
//!
//! This crate used to write straight to a memory-mapped UART. That tied the
//! logger to one specific peripheral, which doesn't belong in a crate other
//! code depends on for its own console. Instead, the embedding application
//! registers a [`Sink`] once at startup with [`init`], and every `log!` /
//! `logln!` call goes through it. Until `init` is called, log output is
//! silently dropped rather than panicking, so libraries that log before the
//! application has set up its console don't need special-casing.

use core::cell::Cell;
use core::fmt::{self, Write};

/// Byte-oriented output the logger writes through.
///
/// `putc` takes `&self` rather than `&mut self` because the sink is almost
/// always backed by memory-mapped hardware (a UART transmit register) or
/// some other form of interior mutability, and is shared as `&'static dyn
/// Sink` for the life of the program.
pub trait Sink {
    fn putc(&self, c: u8);
}

#[derive(PartialOrd, PartialEq, Copy, Clone)]
#[allow(dead_code)]
pub enum LL {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

static mut LOG_LEVEL: LL = LL::Info;
static mut SINK: Option<&'static dyn Sink> = None;

/// Register the sink that `log!`/`logln!`/`loghexln!` write to.
///
/// Must be called at most once, before any logging happens on another
/// execution context; this crate assumes the single-threaded cooperative
/// super-loop model its callers run under and does no synchronization.
pub fn init(sink: &'static dyn Sink) {
    unsafe {
        SINK = Some(sink);
    }
}

pub fn set_log_level(level: LL) {
    unsafe {
        LOG_LEVEL = level;
    }
}

pub fn log_level() -> LL {
    unsafe { LOG_LEVEL }
}

/// Adapter so `core::fmt::write!` can target the registered [`Sink`].
pub struct LogWriter;
impl Write for LogWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = unsafe { SINK } {
            for c in s.bytes() {
                sink.putc(c);
            }
        }
        Ok(())
    }
}

/// A [`Sink`] that just counts bytes written; handy as a test double so unit
/// tests can assert that something was (or wasn't) logged without standing
/// up real hardware.
pub struct CountingSink {
    count: Cell<usize>,
}
impl CountingSink {
    pub const fn new() -> Self {
        Self {
            count: Cell::new(0),
        }
    }
    pub fn byte_count(&self) -> usize {
        self.count.get()
    }
}
impl Sink for CountingSink {
    fn putc(&self, _c: u8) {
        self.count.set(self.count.get() + 1);
    }
}

#[macro_export]
macro_rules! sprint {
    ($($args:tt)+) => ({
        use core::fmt::Write;
        let _ = write!($crate::LogWriter {}, $($args)+);
    });
}

#[macro_export]
macro_rules! sprintln {
    () => ({
        $crate::sprint!("\r\n")
    });
    ($fmt:expr) => ({
        $crate::sprint!(concat!($fmt, "\r\n"))
    });
    ($fmt:expr, $($args:tt)+) => ({
        $crate::sprint!(concat!($fmt, "\r\n"), $($args)+)
    });
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($e:expr),+) => {
        if $crate::log_level() <= $level {
            $crate::sprint!($($e),+)
        }
    }
}

#[macro_export]
macro_rules! logln {
    ($level:expr, $($e:expr),*) => {
        if $crate::log_level() <= $level {
            $crate::sprintln!($($e),*)
        }
    }
}

/// Log a label followed by a value's hex representation, no trailing newline.
#[macro_export]
macro_rules! loghex {
    ($level:expr, $label:expr, $val:expr) => {
        $crate::log!($level, "{}{:X}", $label, $val)
    };
}

/// Log a label followed by a value's hex representation, with trailing newline.
#[macro_export]
macro_rules! loghexln {
    ($level:expr, $label:expr, $val:expr) => {
        $crate::logln!($level, "{}{:X}", $label, $val)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_filter_suppresses_below_threshold() {
        static SINK: CountingSink = CountingSink::new();
        init(&SINK);
        set_log_level(LL::Warn);
        logln!(LL::Debug, "should not appear");
        assert_eq!(SINK.byte_count(), 0);
        logln!(LL::Error, "should appear");
        assert!(SINK.byte_count() > 0);
    }
}
