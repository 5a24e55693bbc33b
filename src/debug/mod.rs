//! Debug output and structured logging.
//!
//! Log level is fixed at compile time via cargo features (`log-error`
//! .. `log-trace`), the same feature-gated `LogLevel` pattern as the console
//! backend in `config`. Per-subsystem tracing (`kipc_debug!`, `ktimer_debug!`,
//! `ksyscall_debug!`) compiles to nothing unless the matching `debug-*`
//! feature is enabled, so release builds pay zero cost for it.

use crate::components::console::Console;
use core::fmt;

pub struct DebugWriter;

impl fmt::Write for DebugWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        crate::config::console().puts(s);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

#[inline(always)]
pub const fn current_log_level() -> LogLevel {
    #[cfg(feature = "log-trace")]
    return LogLevel::Trace;

    #[cfg(all(feature = "log-debug", not(feature = "log-trace")))]
    return LogLevel::Debug;

    #[cfg(all(feature = "log-info", not(any(feature = "log-debug", feature = "log-trace"))))]
    return LogLevel::Info;

    #[cfg(all(feature = "log-warn", not(any(feature = "log-info", feature = "log-debug", feature = "log-trace"))))]
    return LogLevel::Warn;

    #[cfg(all(feature = "log-error", not(any(feature = "log-warn", feature = "log-info", feature = "log-debug", feature = "log-trace"))))]
    return LogLevel::Error;

    #[cfg(not(any(feature = "log-error", feature = "log-warn", feature = "log-info", feature = "log-debug", feature = "log-trace")))]
    return LogLevel::Info;
}

#[inline(always)]
pub const fn should_log(level: LogLevel) -> bool {
    level as u8 <= current_log_level() as u8
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = write!($crate::debug::DebugWriter, $($arg)*);
    });
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = writeln!($crate::debug::DebugWriter, $($arg)*);
    });
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Error) {
            $crate::kprintln!("[ERROR] {}", format_args!($($arg)*));
        }
    });
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Warn) {
            $crate::kprintln!("[WARN]  {}", format_args!($($arg)*));
        }
    });
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Info) {
            $crate::kprintln!("[INFO]  {}", format_args!($($arg)*));
        }
    });
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Debug) {
            $crate::kprintln!("[DEBUG] {}", format_args!($($arg)*));
        }
    });
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => ({
        if $crate::debug::should_log($crate::debug::LogLevel::Trace) {
            $crate::kprintln!("[TRACE] {}", format_args!($($arg)*));
        }
    });
}

/// Syscall dispatch tracing, gated on `debug-syscall`.
#[macro_export]
macro_rules! ksyscall_debug {
    ($($arg:tt)*) => ({
        #[cfg(feature = "debug-syscall")]
        {
            $crate::kprintln!($($arg)*);
        }
    });
}

/// RPC/notification tracing, gated on `debug-ipc`.
#[macro_export]
macro_rules! kipc_debug {
    ($($arg:tt)*) => ({
        #[cfg(feature = "debug-ipc")]
        {
            $crate::kprintln!($($arg)*);
        }
    });
}

/// Timer-list tracing, gated on `debug-timer`.
#[macro_export]
macro_rules! ktimer_debug {
    ($($arg:tt)*) => ({
        #[cfg(feature = "debug-timer")]
        {
            $crate::kprintln!($($arg)*);
        }
    });
}
