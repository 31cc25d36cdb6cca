//! A built-in lock stress workload.
//!
//! When no snapshot file is given, `lockprof` profiles itself: a number of
//! worker threads hammer a small set of named locks on the hosted platform,
//! and the resulting registry is exported exactly as the kernel would export
//! it.
use crate::Result;
use color_eyre::eyre::WrapErr;
use lockstat::{hosted::Hosted, Config, Registry, Spinlock, MAX_LOCKS};
use std::{hint, thread};

/// The locks the workload exercises, hottest first.
pub const LOCK_NAMES: [&str; 6] = ["proc", "pid_lock", "tickslock", "kmem", "bcache", "cons"];

/// Configures the built-in workload.
#[derive(Debug, Clone, clap::Args)]
#[command(next_help_heading = "Workload Options")]
pub struct WorkloadOptions {
    /// Number of worker threads to run.
    #[arg(long, default_value_t = 5)]
    pub workers: usize,

    /// Number of iterations each worker runs.
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,

    /// Busy-wait spins inside each critical section.
    #[arg(long, default_value_t = 64)]
    pub hold_spins: usize,

    /// How many distinct lock names the registry may track.
    #[arg(long, default_value_t = MAX_LOCKS)]
    pub capacity: usize,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            workers: 5,
            iterations: 100,
            hold_spins: 64,
            capacity: MAX_LOCKS,
        }
    }
}

impl WorkloadOptions {
    /// Runs the workload and returns the exported snapshot bytes.
    #[tracing::instrument(
        level = "info",
        name = "workload",
        skip(self),
        fields(workers = self.workers, iterations = self.iterations),
    )]
    pub fn run(&self) -> Result<Vec<u8>> {
        let platform = Hosted::new();
        let config = Config::new().with_capacity(self.capacity);
        let registry = Registry::new(&platform, config);
        registry.init();

        let locks = LOCK_NAMES.map(|name| registry.new_lock(name));
        let [proc, rest @ ..] = &locks;
        // the console transmit path is never profiled
        let uart = &registry.new_lock("uart_tx").untracked();

        thread::scope(|s| {
            (0..self.workers).try_for_each(|worker| {
                thread::Builder::new()
                    .name(format!("worker-{worker}"))
                    .spawn_scoped(s, move || self.worker(worker, proc, rest, uart))
                    .map(drop)
                    .wrap_err("failed to spawn a workload thread")
            })
        })?;

        tracing::debug!("\n{registry}");

        let mut snapshot = Vec::new();
        let count = registry
            .export(&mut snapshot, MAX_LOCKS)
            .wrap_err("exporting the workload's lock statistics failed")?;
        tracing::info!(locks = count, bytes = snapshot.len(), "workload complete");
        Ok(snapshot)
    }

    fn worker(
        &self,
        worker: usize,
        proc: &Spinlock<'_, Hosted>,
        rest: &[Spinlock<'_, Hosted>],
        uart: &Spinlock<'_, Hosted>,
    ) {
        for i in 0..self.iterations {
            // every "syscall" looks up its process...
            {
                let _proc = proc.lock();
                self.busy();
            }

            // ...then touches one other subsystem, staggered by worker
            let _guard = rest[(worker + i) % rest.len()].lock();
            self.busy();

            if i % 10 == 0 {
                let _uart = uart.lock();
            }
        }
    }

    fn busy(&self) {
        for _ in 0..self.hold_spins {
            hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstat::RawRecord;

    #[test]
    fn exports_every_lock() {
        let opts = WorkloadOptions {
            workers: 3,
            iterations: 50,
            hold_spins: 8,
            ..WorkloadOptions::default()
        };
        let bytes = opts.run().expect("workload runs");
        let records = RawRecord::decode_all(&bytes)
            .collect::<Result<Vec<_>, _>>()
            .expect("snapshot decodes");

        assert_eq!(records.len(), LOCK_NAMES.len());
        assert_eq!(records[0].name.as_str(), "proc");
        assert_eq!(records[0].acquire_count, 150);
        let others: u64 = records[1..].iter().map(|r| r.acquire_count).sum();
        assert_eq!(others, 150);
        assert!(records.iter().all(|r| r.contention_count <= r.acquire_count));
        assert!(!records.iter().any(|r| r.name.as_str() == "uart_tx"));
    }

    #[test]
    fn capacity_limits_tracked_names() {
        let opts = WorkloadOptions {
            workers: 2,
            iterations: 20,
            capacity: 2,
            ..WorkloadOptions::default()
        };
        let bytes = opts.run().expect("workload runs");
        assert_eq!(bytes.len(), 2 * lockstat::record::RECORD_SIZE);
    }
}
