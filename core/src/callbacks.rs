//! The callback state machine: the component the host emulator actually
//! drives. Owns the Correlation Tables and the Sender, and turns the five
//! host callback kinds into submissions or parked scratch state.

use log::{error, warn};
use std::sync::OnceLock;

use crate::arena::{ScratchId, ScratchIdAllocator};
use crate::events::{
    Event, EventRecord, InstrEvent, LoadEvent, MemAccessEvent, PcEvent, SyscallEvent,
    NUM_SYSCALL_ARGS, SYSCALL_RV_PLACEHOLDER,
};
use crate::flags::FlagSet;
use crate::sender::EventSink;
use crate::tables::{MemoryTable, SyscallTable, TableCap, TranslationTable};

/// The guest program image's address range and entry point, queried once
/// from the host on the first translation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub start_code: u64,
    pub end_code: u64,
    pub entry_code: u64,
}

/// The host's view of one translation block: enough to enumerate its
/// instructions without the core needing to know how the host represents
/// one internally.
pub trait TranslationBlock {
    fn instruction_count(&self) -> usize;
    fn vaddr(&self, index: usize) -> u64;
    fn opcode(&self, index: usize) -> Vec<u8>;
}

/// Which host callback the plugin shim should register for a given
/// instruction, carrying the scratch identity that callback must pass back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Execute,
    MemoryExecute,
    MemoryAccess,
}

/// A request, produced by [`CallbackState::on_translation`], for the plugin
/// shim to register one host callback against one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackRegistration {
    pub instruction_index: usize,
    pub kind: CallbackKind,
    pub id: ScratchId,
}

/// The process-wide tracing context, threaded through every callback. One
/// instance lives for the plugin's lifetime; the host's opaque user-data
/// channel is how its `ScratchId`s travel back in.
pub struct CallbackState<S> {
    request: FlagSet,
    image: OnceLock<ImageDescriptor>,
    translation: TranslationTable,
    memory: MemoryTable,
    syscalls: SyscallTable,
    ids: ScratchIdAllocator,
    sender: S,
}

impl<S: EventSink> CallbackState<S> {
    pub fn new(request: FlagSet, sender: S, cap: TableCap) -> Self {
        CallbackState {
            request,
            image: OnceLock::new(),
            translation: TranslationTable::new(cap),
            memory: MemoryTable::new(cap),
            syscalls: SyscallTable::new(),
            ids: ScratchIdAllocator::new(),
            sender,
        }
    }

    pub fn request(&self) -> FlagSet {
        self.request
    }

    /// Access to the underlying sender, mainly useful for test doubles that
    /// expose what was submitted.
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Per-translation-block callback. `query_image` is invoked at most
    /// once per plugin lifetime, the first time the image descriptor is
    /// needed.
    pub fn on_translation(
        &self,
        tb: &dyn TranslationBlock,
        query_image: impl FnOnce() -> ImageDescriptor,
    ) -> Vec<CallbackRegistration> {
        if self.image.get().is_none() {
            let descriptor = *self.image.get_or_init(query_image);
            self.sender.submit(EventRecord::new(
                FlagSet::LOAD,
                Event::Load(LoadEvent {
                    start_code: descriptor.start_code,
                    end_code: descriptor.end_code,
                    entry_code: descriptor.entry_code,
                }),
            ));
        }

        let n = tb.instruction_count();
        if n == 0 {
            return Vec::new();
        }
        let i_start = if FlagSet::branch_only(self.request) {
            n - 1
        } else {
            0
        };

        let mut registrations = Vec::new();
        for i in i_start..n {
            let pc = tb.vaddr(i);
            let branch = i == n - 1;

            if self.request.contains(FlagSet::PC) {
                let id = self.ids.alloc();
                let record = EventRecord::new(FlagSet::PC, Event::Pc(PcEvent { pc, branch }));
                match self.translation.insert(id, record) {
                    Ok(()) => registrations.push(CallbackRegistration {
                        instruction_index: i,
                        kind: CallbackKind::Execute,
                        id,
                    }),
                    Err(e) => warn!("dropping Pc event at pc={pc:#x}: {e}"),
                }
            }

            if self.request.contains(FlagSet::INSTRS) {
                let id = self.ids.alloc();
                let record = EventRecord::new(
                    FlagSet::INSTRS,
                    Event::Instr(InstrEvent::new(pc, &tb.opcode(i))),
                );
                match self.translation.insert(id, record) {
                    Ok(()) => registrations.push(CallbackRegistration {
                        instruction_index: i,
                        kind: CallbackKind::Execute,
                        id,
                    }),
                    Err(e) => warn!("dropping Instr event at pc={pc:#x}: {e}"),
                }
            }

            if self.request.contains(FlagSet::READS_WRITES) {
                let id = self.ids.alloc();
                let record = EventRecord::new(
                    FlagSet::READS_WRITES,
                    Event::MemAccess(MemAccessEvent {
                        pc,
                        addr: 0,
                        is_write: false,
                    }),
                );
                match self.memory.insert(id, record) {
                    Ok(()) => {
                        registrations.push(CallbackRegistration {
                            instruction_index: i,
                            kind: CallbackKind::MemoryExecute,
                            id,
                        });
                        registrations.push(CallbackRegistration {
                            instruction_index: i,
                            kind: CallbackKind::MemoryAccess,
                            id,
                        });
                    }
                    Err(e) => warn!("dropping MemAccess event at pc={pc:#x}: {e}"),
                }
            }
        }
        registrations
    }

    /// Execute callback for a `Pc`/`Instr` scratch event. The VCPU index is
    /// part of the host ABI but unused here: correlation is by identity
    /// alone.
    pub fn on_execute(&self, id: ScratchId) {
        if let Some(record) = self.translation.remove(id) {
            self.sender.submit(record);
        }
    }

    /// Memory-execute callback for a `MemAccess` scratch event.
    pub fn on_memory_execute(&self, id: ScratchId) {
        if let Some(record) = self.memory.mark_exec(id) {
            self.sender.submit(record);
        }
    }

    /// Memory-access callback for a `MemAccess` scratch event.
    pub fn on_memory_access(&self, id: ScratchId, addr: u64, is_write: bool) {
        if let Some(record) = self.memory.mark_mem(id, addr, is_write) {
            self.sender.submit(record);
        }
    }

    /// Syscall-entry callback.
    pub fn on_syscall_entry(&self, vcpu: usize, num: i64, args: [u64; NUM_SYSCALL_ARGS]) {
        if !self.request.contains(FlagSet::SYSCALLS) {
            return;
        }
        let record = EventRecord::new(
            FlagSet::SYSCALLS,
            Event::Syscall(SyscallEvent {
                num,
                rv: SYSCALL_RV_PLACEHOLDER,
                args,
            }),
        );
        self.syscalls.put(vcpu, record);
    }

    /// Syscall-return callback.
    pub fn on_syscall_return(&self, vcpu: usize, num: i64, rv: i64) {
        match self.syscalls.take(vcpu, num) {
            Some(mut record) => {
                if let Event::Syscall(ref mut sys) = record.event {
                    sys.rv = rv;
                }
                self.sender.submit(record);
            }
            None => {
                error!("vcpu {vcpu}: syscall return for num={num} matched no pending entry");
            }
        }
    }

    /// At-exit callback: tears down the Sender.
    pub fn on_exit(&self) {
        self.sender.teardown();
    }
}
