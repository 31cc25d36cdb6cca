//! Instrumented spinlocks and lock contention statistics.
//!
//! This crate provides a [`Spinlock`] that measures, for every acquisition,
//! how long the acquirer spun before winning the lock and how long the lock
//! was then held. Those measurements are aggregated per lock name in a
//! bounded [`Registry`], which can be [exported](Registry::export) as a flat
//! array of fixed-layout [`RawRecord`]s for offline analysis.
//!
//! The crate is `no_std` on bare-metal targets. Everything it needs from the
//! machine (masking interrupts, reading a clock, naming the current
//! execution unit) is supplied through the [`Platform`] trait. On hosted
//! targets, the [`hosted`] module provides a [`Platform`] that treats each
//! OS thread as an execution unit.
#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
mod macros;

pub mod config;
pub mod export;
#[cfg(all(not(target_os = "none"), not(loom)))]
pub mod hosted;
pub mod interrupt;
pub mod record;
pub mod registry;
pub mod spin;

pub(crate) mod loom;

pub use hal_core;

pub use self::{
    config::{Config, MAX_LOCKS},
    export::{buffer_len, get_lock_stats, CopyFault, CopyOut, Dump, ExportError},
    interrupt::{push_off, IrqGuard, Nesting},
    record::{LockName, RawRecord},
    registry::Registry,
    spin::{Spinlock, SpinlockGuard},
};

/// A machine that instrumented locks can run on.
///
/// In addition to the interrupt controller, clock, and execution unit
/// identity provided by [`hal_core::Architecture`], a platform owns the
/// interrupt [`Nesting`] state for each of its execution units.
pub trait Platform: hal_core::Architecture {
    /// Returns the interrupt nesting state of the *current* execution unit.
    fn nesting(&self) -> &Nesting;
}

impl<P: Platform> Platform for &P {
    #[inline]
    fn nesting(&self) -> &Nesting {
        P::nesting(*self)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    #[cfg(not(loom))]
    pub(crate) fn trace_init() -> impl Drop {
        use tracing_subscriber::{prelude::*, EnvFilter};
        let filter = EnvFilter::from_env("RUST_LOG");
        tracing_subscriber::fmt()
            .with_test_writer()
            .without_time()
            .with_env_filter(filter)
            .with_thread_names(true)
            .set_default()
    }

    #[cfg(loom)]
    pub(crate) fn trace_init() -> impl Drop {
        use tracing_subscriber::{prelude::*, EnvFilter};
        let filter = EnvFilter::from_env("LOOM_LOG");
        tracing_subscriber::fmt()
            .with_test_writer()
            .without_time()
            .with_env_filter(filter)
            .set_default()
    }
}
