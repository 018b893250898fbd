mod kernel_lock;

pub use kernel_lock::{KernelGuard, KernelLock};
