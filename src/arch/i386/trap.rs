use crate::mem::VirtualAddress;
use bitflags::bitflags;

bitflags! {
    // error code pushed by the CPU on a page fault
    pub struct FaultCause: u32 {
        // set: protection violation on a present page, clear: page not present
        const PROTECTION = 1 << 0;
        const WRITE =      1 << 1;
        const USER =       1 << 2;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
}

// Register state saved on entry to the kernel. Owned by the env it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trapframe {
    pub regs: PushRegs,
    pub trapno: u32,
    pub err: u32,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

// What the fault upcall gets to see, pushed onto the exception stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: VirtualAddress,
    pub err: FaultCause,
    pub regs: PushRegs,
    pub eip: u32,
    pub eflags: u32,
    pub esp: u32,
}

impl UTrapframe {
    // bytes taken on the exception stack, plus the scratch word left between
    // nested frames
    pub const STACK_FOOTPRINT: u32 = (core::mem::size_of::<u32>() * 13 + 4) as u32;

    pub fn new(tf: &Trapframe, fault_va: VirtualAddress, err: FaultCause) -> Self {
        Self {
            fault_va,
            err,
            regs: tf.regs,
            eip: tf.eip,
            eflags: tf.eflags,
            esp: tf.esp,
        }
    }
}
