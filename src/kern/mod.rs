pub mod monitor;
pub mod sched;
pub mod syscall;
pub mod user;

#[cfg(test)]
pub(crate) mod testutil;

use crate::config::{ConfigError, KernelConfig};
use crate::env::{Env, EnvId, EnvStatus, EnvTable};
use crate::error::{SysError, SysResult};
use crate::mem::allocator::BitMapAllocator;
use alloc::{boxed::Box, vec::Vec};
use log::{info, trace};
use monitor::{Console, LogConsole};

pub use user::UserEnv;

// eflags interrupt enable bit, set for every user env
const FL_IF: u32 = 1 << 9;

#[derive(Debug, Clone, Copy, Default)]
pub struct Cpu {
    pub(crate) curenv: Option<EnvId>,
}

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) envs: EnvTable,
    pub(crate) frames: BitMapAllocator,
    pub(crate) cpus: Vec<Cpu>,
    pub(crate) console: Box<dyn Console + Send>,
}

impl Kernel {
    // Sets up the env table with one runnable idle env per CPU, in the slot
    // matching the CPU number.
    pub fn boot(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut kernel = Self {
            config,
            envs: EnvTable::new(config.nenv, config.ncpu),
            frames: BitMapAllocator::new(config.nframes),
            cpus: vec![Cpu::default(); config.ncpu],
            console: Box::new(LogConsole::default()),
        };
        for cpu in 0..config.ncpu {
            let id = kernel
                .envs
                .alloc_reserved(cpu, u32::MAX)
                .map_err(|_| ConfigError::NoUserSlots {
                    nenv: config.nenv,
                    ncpu: config.ncpu,
                })?;
            if let Some(idle) = kernel.envs.get_mut(id) {
                idle.status = EnvStatus::Runnable;
            }
        }

        info!(
            "booted: {} env slots, {} cpus, {} frames",
            config.nenv, config.ncpu, config.nframes
        );
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn set_console(&mut self, console: Box<dyn Console + Send>) {
        self.console = console;
    }

    pub fn env(&self, id: EnvId) -> Option<&Env> {
        self.envs.get(id)
    }

    pub fn envs(&self) -> &EnvTable {
        &self.envs
    }

    pub fn frames(&self) -> &BitMapAllocator {
        &self.frames
    }

    pub fn curenv(&self, cpu: usize) -> Option<EnvId> {
        self.cpus.get(cpu)?.curenv
    }

    pub fn user(&mut self, id: EnvId) -> UserEnv<'_> {
        UserEnv::new(self, id)
    }

    pub(crate) fn env_alloc(
        &mut self,
        parent_id: Option<EnvId>,
        priority: u32,
    ) -> SysResult<EnvId> {
        let id = self.envs.alloc(parent_id, priority)?;
        if let Some(env) = self.envs.get_mut(id) {
            env.tf.eflags = FL_IF;
        }
        trace!("[{:?}] new env {}", parent_id, id);
        Ok(id)
    }

    // A runnable user env with an empty address space. Loading a program
    // into it is up to the caller.
    pub fn env_create(&mut self, priority: u32) -> SysResult<EnvId> {
        let id = self.env_alloc(None, priority)?;
        if let Some(env) = self.envs.get_mut(id) {
            env.status = EnvStatus::Runnable;
        }
        Ok(id)
    }

    pub fn spawn(&mut self) -> SysResult<EnvId> {
        self.env_create(self.config.default_priority)
    }

    // Makes `id` the env running on `cpu`. On hardware this ends in the trap
    // return into the env and never comes back. Only a runnable env, or the
    // one already current on `cpu`, can be switched to.
    pub fn env_run(&mut self, cpu: usize, id: EnvId) -> SysResult<EnvId> {
        let current = self.cpus.get(cpu).ok_or(SysError::Invalid)?.curenv;
        let env = self.envs.get(id).ok_or(SysError::BadEnv)?;
        match env.status {
            EnvStatus::Runnable => {}
            EnvStatus::Running if current == Some(id) => {}
            _ => return Err(SysError::Invalid),
        }
        let Some(slot) = self.cpus.get_mut(cpu) else {
            return Err(SysError::Invalid);
        };
        let prev = slot.curenv.replace(id);

        if let Some(prev) = prev.and_then(|prev| self.envs.get_mut(prev)) {
            if prev.status == EnvStatus::Running {
                prev.status = EnvStatus::Runnable;
            }
        }
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        env.status = EnvStatus::Running;
        env.runs += 1;
        env.cpu = Some(cpu);

        trace!("cpu {}: {:?} --> {}", cpu, prev, id);
        Ok(id)
    }

    fn is_current(&self, id: EnvId) -> bool {
        self.cpus.iter().any(|cpu| cpu.curenv == Some(id))
    }

    // Envs current on some CPU are only marked; `reap` frees them once they
    // are off the CPU.
    pub fn env_destroy(&mut self, id: EnvId) -> SysResult<()> {
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        env.status = EnvStatus::Dying;
        if !self.is_current(id) {
            self.env_free(id);
        }
        Ok(())
    }

    pub(crate) fn env_free(&mut self, id: EnvId) {
        if let Some(mut env) = self.envs.free(id) {
            env.address_space.clear(&mut self.frames);
            info!("[{:?}] free env {}", env.parent_id, id);
        }
        for cpu in self.cpus.iter_mut().filter(|cpu| cpu.curenv == Some(id)) {
            cpu.curenv = None;
        }
    }

    /// Frees dying envs that are no longer current anywhere.
    pub fn reap(&mut self) -> usize {
        let dying: Vec<EnvId> = self
            .envs
            .iter()
            .filter(|env| env.status == EnvStatus::Dying)
            .map(Env::id)
            .filter(|&id| !self.is_current(id))
            .collect();
        for &id in &dying {
            self.env_free(id);
        }
        dying.len()
    }
}
