use super::Kernel;
use crate::config::SchedConfig;
use crate::env::{Env, EnvId, EnvStatus, EnvTable};
use crate::error::SysError;
use core::fmt;
use log::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    // the CPU's idle env is missing or not runnable
    NoIdle { cpu: usize },
    NoSuchCpu { cpu: usize },
    // switching to the chosen env failed
    Run(SysError),
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::NoIdle { cpu } => write!(f, "CPU {}: No idle environment!", cpu),
            SchedError::NoSuchCpu { cpu } => write!(f, "CPU {} does not exist", cpu),
            SchedError::Run(err) => write!(f, "sched_yield: env_run: {}", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Env(EnvId),
    Idle,
    // nothing but idle envs left anywhere
    Console,
}

// One pass over the table, starting just past the env this CPU last ran.
// Among runnable non-idle envs the lowest priority value wins, ties going to
// whichever comes first in scan order; with a ceiling, envs at or above it
// only get the first-found fallback.
pub fn select(envs: &EnvTable, prev: Option<EnvId>, config: &SchedConfig) -> Choice {
    let start = prev.map_or(0, |prev| prev.index() + 1);

    let mut first: Option<&Env> = None;
    let mut best: Option<&Env> = None;
    let mut busy = false;
    for env in envs.scan_from(start) {
        busy |= env.is_busy();
        if !env.is_schedulable() {
            continue;
        }
        first.get_or_insert(env);
        if config
            .priority_ceiling
            .map_or(false, |ceiling| env.priority >= ceiling)
        {
            continue;
        }
        if best.map_or(true, |best| env.priority < best.priority) {
            best = Some(env);
        }
    }

    match best.or(first) {
        Some(env) => Choice::Env(env.id),
        None if busy => Choice::Idle,
        None => Choice::Console,
    }
}

impl Kernel {
    // Picks what runs next on `cpu` and switches to it. With nothing left to
    // run anywhere the console takes over for good.
    pub fn sched_yield(&mut self, cpu: usize) -> Result<EnvId, SchedError> {
        if cpu >= self.cpus.len() {
            return Err(SchedError::NoSuchCpu { cpu });
        }
        let prev = self.curenv(cpu);
        let next = match select(&self.envs, prev, &self.config.sched) {
            Choice::Env(id) => id,
            Choice::Idle => self.idle_env(cpu)?,
            Choice::Console => {
                warn!("No more runnable environments!");
                loop {
                    self.console.run(None);
                }
            }
        };
        trace!("cpu {}: sched_yield picked {}", cpu, next);
        self.env_run(cpu, next).map_err(SchedError::Run)
    }

    // the idle env of `cpu` lives in slot `cpu`
    fn idle_env(&self, cpu: usize) -> Result<EnvId, SchedError> {
        match self.envs.slot(cpu) {
            Some(idle)
                if idle.is_idle()
                    && matches!(idle.status, EnvStatus::Runnable | EnvStatus::Running) =>
            {
                Ok(idle.id)
            }
            _ => Err(SchedError::NoIdle { cpu }),
        }
    }
}
