use crate::arch::Trapframe;
use log::info;

/// Diagnostic console the scheduler falls back to when no work is left.
/// `run` is called in a loop and is not expected to make the kernel resume.
pub trait Console {
    fn run(&mut self, tf: Option<&Trapframe>);
}

// Announces itself through the log once, then spins.
#[derive(Debug, Default)]
pub struct LogConsole {
    entered: bool,
}

impl Console for LogConsole {
    fn run(&mut self, tf: Option<&Trapframe>) {
        if !self.entered {
            self.entered = true;
            info!("Welcome to the kernel monitor!");
            if let Some(tf) = tf {
                info!("trap frame: {:#x?}", tf);
            }
        }
        core::hint::spin_loop();
    }
}
