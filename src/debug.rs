// Curvature: a stereo dynamics processor with a freely drawn transfer curve
// Copyright (C) 2026 the Curvature authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Macros for logging and debug assertions. [`curv_trace!()`] and the `curv_debug_assert_*!()`
//! macros are compiled out during release builds, so they can be used for checking additional
//! invariants inside of the engine. None of the logging functions are realtime-safe. Outside of
//! debug builds nothing that runs as part of [`Engine::process_block()`][crate::Engine] logs
//! anything.

// NOTE: `#[macro_export]` exports these macros from the crate root. They are also re-exported from
//       this module for the documentation. Inside of this crate `#[macro_use]` makes them
//       available everywhere.

/// Log an informational message. Use this for things that happen on the control thread, like
/// preparing the engine or restoring state.
#[macro_export]
macro_rules! curv_log {
    ($($args:tt)*) => (
        $crate::log::info!($($args)*)
    );
}
#[doc(inline)]
pub use curv_log;

/// Similar to `curv_log!()`, but for warnings.
#[macro_export]
macro_rules! curv_warn {
    ($($args:tt)*) => (
        $crate::log::warn!($($args)*)
    );
}
#[doc(inline)]
pub use curv_warn;

/// A trace message that may also be used from the audio thread. The `log` crate's
/// `release_max_level_info` feature compiles these out of release builds.
#[macro_export]
macro_rules! curv_trace {
    ($($args:tt)*) => (
        $crate::util::permit_alloc(|| $crate::log::trace!($($args)*))
    );
}
#[doc(inline)]
pub use curv_trace;

/// A `debug_assert!()` analogue that logs a warning instead of panicking. Panicking on the audio
/// thread would take the host down with it. During tests this is upgraded to a regular panicking
/// `debug_assert!()`.
#[macro_export]
macro_rules! curv_debug_assert {
    ($cond:expr $(,)?) => (
        #[allow(clippy::neg_cmp_op_on_partial_ord)]
        if cfg!(test) {
            debug_assert!($cond);
        } else if cfg!(debug_assertions) && !$cond {
            $crate::util::permit_alloc(|| {
                $crate::log::warn!(concat!("Debug assertion failed: ", stringify!($cond)))
            });
        }
    );
    ($cond:expr, $format:expr $(, $($args:tt)*)?) => (
        #[allow(clippy::neg_cmp_op_on_partial_ord)]
        if cfg!(test) {
            debug_assert!($cond, $format, $($($args)*)?);
        } else if cfg!(debug_assertions) && !$cond {
            $crate::util::permit_alloc(|| {
                $crate::log::warn!(
                    concat!("Debug assertion failed: ", stringify!($cond), ", ", $format),
                    $($($args)*)?
                )
            });
        }
    );
}
#[doc(inline)]
pub use curv_debug_assert;

/// An unconditional debug assertion failure, for when the condition has already been checked.
/// See [`curv_debug_assert!()`].
#[macro_export]
macro_rules! curv_debug_assert_failure {
    () => (
        if cfg!(test) {
            debug_assert!(false, "Debug assertion failed");
        } else if cfg!(debug_assertions) {
            $crate::util::permit_alloc(|| $crate::log::warn!("Debug assertion failed"));
        }
    );
    ($format:expr $(, $($args:tt)*)?) => (
        if cfg!(test) {
            debug_assert!(false, concat!("Debug assertion failed: ", $format), $($($args)*)?);
        } else if cfg!(debug_assertions) {
            $crate::util::permit_alloc(|| {
                $crate::log::warn!(concat!("Debug assertion failed: ", $format), $($($args)*)?)
            });
        }
    );
}
#[doc(inline)]
pub use curv_debug_assert_failure;

/// A `debug_assert_eq!()` analogue. See [`curv_debug_assert!()`].
#[macro_export]
macro_rules! curv_debug_assert_eq {
    ($left:expr, $right:expr $(,)?) => (
        #[allow(clippy::neg_cmp_op_on_partial_ord)]
        if cfg!(test) {
            debug_assert_eq!($left, $right);
        } else if cfg!(debug_assertions) && $left != $right {
            $crate::util::permit_alloc(|| {
                $crate::log::warn!(concat!(
                    "Debug assertion failed: ",
                    stringify!($left),
                    " != ",
                    stringify!($right)
                ))
            });
        }
    );
}
#[doc(inline)]
pub use curv_debug_assert_eq;

/// Install a terminal logger for the `curv_*!()` macros. Hosts that embed the engine usually
/// bring their own logger, in which case this should not be called. Calling this more than once
/// is harmless, only the first call installs a logger.
///
/// Everything down to trace messages is shown in debug builds, release builds only show
/// informational messages and above.
pub fn setup_logger() {
    let log_level = if cfg!(debug_assertions) {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };

    let config = simplelog::ConfigBuilder::new()
        .set_thread_level(log::LevelFilter::Debug)
        .set_target_level(log::LevelFilter::Error)
        .build();

    // This only fails if a logger has already been set up, which is fine
    let _ = simplelog::TermLogger::init(
        log_level,
        config,
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    );
}
