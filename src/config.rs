use crate::env::ENV_INDEX_BITS;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    // Only priorities strictly below the ceiling take part in the priority
    // rule; everything else is picked round-robin. `None` ranks everyone.
    pub priority_ceiling: Option<u32>,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            priority_ceiling: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub nenv: usize,
    pub ncpu: usize,
    pub nframes: usize,
    // lower value runs first
    pub default_priority: u32,
    pub sched: SchedConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            nenv: 1 << ENV_INDEX_BITS,
            ncpu: 1,
            nframes: 1024,
            default_priority: 2,
            sched: SchedConfig::default(),
        }
    }
}

impl KernelConfig {
    pub fn with_nenv(mut self, nenv: usize) -> Self {
        self.nenv = nenv;
        self
    }

    pub fn with_ncpu(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    pub fn with_nframes(mut self, nframes: usize) -> Self {
        self.nframes = nframes;
        self
    }

    pub fn with_default_priority(mut self, priority: u32) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_priority_ceiling(mut self, ceiling: Option<u32>) -> Self {
        self.sched.priority_ceiling = ceiling;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ncpu == 0 {
            return Err(ConfigError::NoCpus);
        }
        if self.nenv > 1 << ENV_INDEX_BITS {
            return Err(ConfigError::TooManyEnvs(self.nenv));
        }
        // every CPU reserves a slot for its idle env
        if self.nenv <= self.ncpu {
            return Err(ConfigError::NoUserSlots {
                nenv: self.nenv,
                ncpu: self.ncpu,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NoCpus,
    TooManyEnvs(usize),
    NoUserSlots { nenv: usize, ncpu: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoCpus => write!(f, "at least one CPU is required"),
            ConfigError::TooManyEnvs(n) => {
                write!(f, "{} envs requested, at most {}", n, 1 << ENV_INDEX_BITS)
            }
            ConfigError::NoUserSlots { nenv, ncpu } => write!(
                f,
                "{} env slots leave no room for user envs next to {} idle envs",
                nenv, ncpu
            ),
        }
    }
}
