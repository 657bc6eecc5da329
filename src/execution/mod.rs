// src/execution/mod.rs
//! Scheduling of per-particle loops
//!
//! A phase kernel only says what it reads and which owner slots it writes.
//! The policy decides how the loop over particles runs. Host policies hand
//! each particle its own `&mut` slots, so a parallel loop cannot write into a
//! neighbor's state; returning from `for_each` is the phase barrier.

pub mod device;

use rayon::prelude::*;

/// Per-particle writable storage zipped across one or more field arrays
///
/// Implemented for `&mut [A]` and for tuples of two to five mutable slices,
/// which yield one tuple of element references per particle.
pub trait ParticleSlots: Send {
    type Item: Send;

    fn slot_count(&self) -> usize;

    fn into_seq_iter(self) -> impl Iterator<Item = Self::Item>;

    fn into_par_iter_slots(self) -> impl IndexedParallelIterator<Item = Self::Item>;
}

impl<'a, A: Send> ParticleSlots for &'a mut [A] {
    type Item = &'a mut A;

    fn slot_count(&self) -> usize {
        self.len()
    }

    fn into_seq_iter(self) -> impl Iterator<Item = Self::Item> {
        self.iter_mut()
    }

    fn into_par_iter_slots(self) -> impl IndexedParallelIterator<Item = Self::Item> {
        self.par_iter_mut()
    }
}

macro_rules! impl_particle_slots {
    ($(($T:ident, $idx:tt, $it:ident)),+) => {
        impl<'a, $($T: Send),+> ParticleSlots for ($(&'a mut [$T],)+) {
            type Item = ($(&'a mut $T,)+);

            fn slot_count(&self) -> usize {
                let lengths = [$(self.$idx.len()),+];
                debug_assert!(
                    lengths.iter().all(|&l| l == lengths[0]),
                    "zipped particle fields differ in length"
                );
                lengths[0]
            }

            fn into_seq_iter(self) -> impl Iterator<Item = Self::Item> {
                $(let mut $it = self.$idx.iter_mut();)+
                std::iter::from_fn(move || Some(($($it.next()?,)+)))
            }

            fn into_par_iter_slots(self) -> impl IndexedParallelIterator<Item = Self::Item> {
                ($(self.$idx.par_iter_mut(),)+).into_par_iter()
            }
        }
    };
}

impl_particle_slots!((A, 0, a), (B, 1, b));
impl_particle_slots!((A, 0, a), (B, 1, b), (C, 2, c));
impl_particle_slots!((A, 0, a), (B, 1, b), (C, 2, c), (D, 3, d));
impl_particle_slots!((A, 0, a), (B, 1, b), (C, 2, c), (D, 3, d), (E, 4, e));

/// Host-side loop scheduler
pub trait ExecutionPolicy: Copy + Default + Send + Sync + 'static {
    const NAME: &'static str;

    /// Runs `f(i, slot_i)` for every particle and returns after all finished
    fn for_each<S, F>(&self, slots: S, f: F)
    where
        S: ParticleSlots,
        F: Fn(usize, S::Item) + Sync + Send;

    /// Collects `f(i)` for `i in 0..n` in index order
    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send;

    /// Folds `f(i)` over `0..n` with an associative `op`
    fn reduce<T, F, Op>(&self, n: usize, identity: T, f: F, op: Op) -> T
    where
        T: Copy + Send + Sync,
        F: Fn(usize) -> T + Sync + Send,
        Op: Fn(T, T) -> T + Sync + Send;
}

/// Single thread, index order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencedPolicy;

/// Data-parallel over the rayon pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParallelPolicy;

/// Tag for kernels bound to device-resident buffers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffloadPolicy;

impl ExecutionPolicy for SequencedPolicy {
    const NAME: &'static str = "sequenced";

    fn for_each<S, F>(&self, slots: S, f: F)
    where
        S: ParticleSlots,
        F: Fn(usize, S::Item) + Sync + Send,
    {
        for (i, slot) in slots.into_seq_iter().enumerate() {
            f(i, slot);
        }
    }

    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..n).map(f).collect()
    }

    fn reduce<T, F, Op>(&self, n: usize, identity: T, f: F, op: Op) -> T
    where
        T: Copy + Send + Sync,
        F: Fn(usize) -> T + Sync + Send,
        Op: Fn(T, T) -> T + Sync + Send,
    {
        (0..n).map(f).fold(identity, op)
    }
}

impl ExecutionPolicy for ParallelPolicy {
    const NAME: &'static str = "parallel";

    fn for_each<S, F>(&self, slots: S, f: F)
    where
        S: ParticleSlots,
        F: Fn(usize, S::Item) + Sync + Send,
    {
        slots
            .into_par_iter_slots()
            .enumerate()
            .for_each(|(i, slot)| f(i, slot));
    }

    fn map<T, F>(&self, n: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        (0..n).into_par_iter().map(f).collect()
    }

    fn reduce<T, F, Op>(&self, n: usize, identity: T, f: F, op: Op) -> T
    where
        T: Copy + Send + Sync,
        F: Fn(usize) -> T + Sync + Send,
        Op: Fn(T, T) -> T + Sync + Send,
    {
        (0..n).into_par_iter().map(f).reduce(|| identity, op)
    }
}

/// Run-time backend choice
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    Sequential,
    #[default]
    Parallel,
    Offload,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Sequential => SequencedPolicy::NAME,
            Backend::Parallel => ParallelPolicy::NAME,
            Backend::Offload => "offload",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sizes the global rayon pool
///
/// The global pool can only be built once per process. A second call keeps
/// the existing pool and logs a warning.
pub fn configure_worker_pool(threads: Option<usize>) -> usize {
    let requested = threads.unwrap_or_else(num_cpus::get).max(1);
    match rayon::ThreadPoolBuilder::new()
        .num_threads(requested)
        .build_global()
    {
        Ok(()) => {
            log::info!("Worker pool started with {} threads", requested);
            requested
        }
        Err(e) => {
            let current = rayon::current_num_threads();
            log::warn!(
                "Worker pool already initialised with {} threads ({}), keeping it",
                current,
                e
            );
            current
        }
    }
}
