mod id;
mod table;

pub use id::{EnvId, ENV_INDEX_BITS};
pub use table::EnvTable;

use crate::arch::{AddressSpace, Trapframe};
use crate::user::PgfaultUpcall;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    Free,
    Runnable,
    // executing on exactly one CPU
    Running,
    NotRunnable,
    // destroyed while current on some CPU, waiting to be reaped
    Dying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvType {
    User,
    // one per CPU, only run when nothing else is
    Idle,
}

// Process control block.
#[derive(Debug)]
pub struct Env {
    pub(crate) id: EnvId,
    pub(crate) parent_id: Option<EnvId>,
    pub(crate) env_type: EnvType,
    pub(crate) status: EnvStatus,
    pub(crate) priority: u32,
    pub(crate) runs: u32,
    // CPU the env last ran on
    pub(crate) cpu: Option<usize>,
    pub(crate) tf: Trapframe,
    pub(crate) pgfault_upcall: Option<PgfaultUpcall>,
    // faults currently being handled on the exception stack
    pub(crate) upcall_depth: u32,
    pub(crate) address_space: AddressSpace,
}

impl Env {
    pub(crate) fn new(
        id: EnvId,
        parent_id: Option<EnvId>,
        env_type: EnvType,
        priority: u32,
    ) -> Self {
        Self {
            id,
            parent_id,
            env_type,
            status: EnvStatus::NotRunnable,
            priority,
            runs: 0,
            cpu: None,
            tf: Trapframe::default(),
            pgfault_upcall: None,
            upcall_depth: 0,
            address_space: AddressSpace::new(),
        }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn parent_id(&self) -> Option<EnvId> {
        self.parent_id
    }

    pub fn env_type(&self) -> EnvType {
        self.env_type
    }

    pub fn status(&self) -> EnvStatus {
        self.status
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn tf(&self) -> &Trapframe {
        &self.tf
    }

    pub fn has_pgfault_upcall(&self) -> bool {
        self.pgfault_upcall.is_some()
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    pub fn is_idle(&self) -> bool {
        self.env_type == EnvType::Idle
    }

    // eligible for the priority / round-robin pick
    pub fn is_schedulable(&self) -> bool {
        self.status == EnvStatus::Runnable && !self.is_idle()
    }

    // counts against dropping into the monitor
    pub fn is_busy(&self) -> bool {
        !self.is_idle() && matches!(self.status, EnvStatus::Runnable | EnvStatus::Running)
    }
}
