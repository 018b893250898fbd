use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};
use log::trace;
use spin::{Mutex, MutexGuard};

const NO_CPU: usize = usize::MAX;

// The big kernel lock. One CPU at a time runs kernel code: the scheduler's
// table scan and fork's page-by-page walk each happen under a single
// acquisition, so no other CPU sees a half-applied duplication pass.
#[derive(Debug)]
pub struct KernelLock<T> {
    inner: Mutex<T>,
    // CPU holding the lock, NO_CPU when free
    holder: AtomicUsize,
}

impl<T> KernelLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: AtomicUsize::new(NO_CPU),
        }
    }

    pub fn lock(&self, cpu: usize) -> KernelGuard<'_, T> {
        // spinning on our own lock would never end
        assert!(
            !self.holding(cpu),
            "CPU {}: kernel lock taken recursively",
            cpu
        );
        let guard = self.inner.lock();
        self.holder.store(cpu, Ordering::Relaxed);
        trace!("CPU {}: kernel lock taken", cpu);
        KernelGuard { lock: self, guard }
    }

    pub fn try_lock(&self, cpu: usize) -> Option<KernelGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        self.holder.store(cpu, Ordering::Relaxed);
        Some(KernelGuard { lock: self, guard })
    }

    pub fn holding(&self, cpu: usize) -> bool {
        self.holder.load(Ordering::Relaxed) == cpu
    }

    pub fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::Relaxed) {
            NO_CPU => None,
            cpu => Some(cpu),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct KernelGuard<'a, T> {
    lock: &'a KernelLock<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for KernelGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for KernelGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for KernelGuard<'_, T> {
    fn drop(&mut self) {
        // cleared before the mutex guard itself is dropped
        self.lock.holder.store(NO_CPU, Ordering::Relaxed);
    }
}
