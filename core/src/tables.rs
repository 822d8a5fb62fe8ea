//! The three Correlation Tables: the parking structures that hold a scratch
//! event between the callback that creates it and the callback(s) that
//! complete it.
//!
//! `TranslationTable` and `MemoryTable` are sharded concurrent maps: park
//! partially finished work, keyed by id, under per-bucket locking.
//! `SyscallTable` is a fixed-size array of per-slot locks instead, so the
//! "at most one entry per VCPU" invariant is structural rather than just
//! conventionally enforced in a hash map.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::warn;
use std::sync::{Mutex, RwLock};

use crate::arena::ScratchId;
use crate::events::EventRecord;
use crate::error::{Result, TracerError};

/// Soft cap applied to `TranslationTable`/`MemoryTable` insertion, so a
/// host that never fires completing callbacks exhausts memory loudly
/// instead of silently. `None` means uncapped.
#[derive(Debug, Clone, Copy)]
pub struct TableCap(pub Option<usize>);

impl Default for TableCap {
    fn default() -> Self {
        TableCap(None)
    }
}

fn check_cap(len: usize, cap: TableCap) -> Result<()> {
    match cap.0 {
        Some(max) if len >= max => Err(TracerError::OutOfMemory),
        _ => Ok(()),
    }
}

/// Parks `Pc`/`Instr` scratch events between their translation callback and
/// their execute callback.
#[derive(Debug, Default)]
pub struct TranslationTable {
    entries: DashMap<ScratchId, EventRecord>,
    cap: TableCap,
}

impl TranslationTable {
    pub fn new(cap: TableCap) -> Self {
        TranslationTable {
            entries: DashMap::new(),
            cap,
        }
    }

    pub fn insert(&self, id: ScratchId, record: EventRecord) -> Result<()> {
        check_cap(self.entries.len(), self.cap)?;
        self.entries.insert(id, record);
        Ok(())
    }

    /// Removes and returns the entry for `id`. Absence is expected: it
    /// means a concurrent callback already claimed it, or it never
    /// belonged to this table.
    pub fn remove(&self, id: ScratchId) -> Option<EventRecord> {
        self.entries.remove(&id).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How much of a `MemAccess` event's two completing callbacks have arrived.
///
/// A single tagged state instead of two independent booleans: the
/// completion transition, the only one that submits, falls naturally out
/// of matching on this enum instead of re-deriving it from two flags at
/// every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoryProgress {
    Neither,
    ExecOnly,
    MemOnly,
}

struct MemoryEntry {
    record: EventRecord,
    progress: MemoryProgress,
}

/// Parks `MemAccess` scratch events between translation and their two
/// completing callbacks (execute and memory-access), which may arrive in
/// either order.
#[derive(Default)]
pub struct MemoryTable {
    entries: DashMap<ScratchId, MemoryEntry>,
    cap: TableCap,
}

impl MemoryTable {
    pub fn new(cap: TableCap) -> Self {
        MemoryTable {
            entries: DashMap::new(),
            cap,
        }
    }

    pub fn insert(&self, id: ScratchId, record: EventRecord) -> Result<()> {
        check_cap(self.entries.len(), self.cap)?;
        self.entries.insert(
            id,
            MemoryEntry {
                record,
                progress: MemoryProgress::Neither,
            },
        );
        Ok(())
    }

    /// Records that the memory-execute callback fired for `id`. Returns the
    /// completed event if the memory-access callback had already arrived.
    ///
    /// The check-then-remove happens under the single `DashMap` shard entry
    /// held by this call: no observer can ever see a wrapper with both
    /// callbacks recorded that hasn't already been removed.
    pub fn mark_exec(&self, id: ScratchId) -> Option<EventRecord> {
        let Entry::Occupied(mut occ) = self.entries.entry(id) else {
            return None;
        };
        match occ.get().progress {
            MemoryProgress::Neither => {
                occ.get_mut().progress = MemoryProgress::ExecOnly;
                None
            }
            MemoryProgress::MemOnly => Some(occ.remove().record),
            MemoryProgress::ExecOnly => None,
        }
    }

    /// Records that the memory-access callback fired for `id`, stamping the
    /// accessed address and read/write discriminator. Returns the completed
    /// event if the memory-execute callback had already arrived.
    pub fn mark_mem(&self, id: ScratchId, addr: u64, is_write: bool) -> Option<EventRecord> {
        let Entry::Occupied(mut occ) = self.entries.entry(id) else {
            return None;
        };
        {
            let entry = occ.get_mut();
            if let crate::events::Event::MemAccess(ref mut mem) = entry.record.event {
                mem.addr = addr;
                mem.is_write = is_write;
            }
        }
        match occ.get().progress {
            MemoryProgress::Neither => {
                occ.get_mut().progress = MemoryProgress::MemOnly;
                None
            }
            MemoryProgress::ExecOnly => Some(occ.remove().record),
            MemoryProgress::MemOnly => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// At most one in-flight `Syscall` event per VCPU, stored in a dense array
/// of per-slot locks rather than a general map.
#[derive(Default)]
pub struct SyscallTable {
    slots: RwLock<Vec<Mutex<Option<EventRecord>>>>,
}

impl SyscallTable {
    pub fn new() -> Self {
        SyscallTable {
            slots: RwLock::new(Vec::new()),
        }
    }

    fn ensure_len(&self, vcpu: usize) {
        if self.slots.read().unwrap().len() > vcpu {
            return;
        }
        let mut slots = self.slots.write().unwrap();
        while slots.len() <= vcpu {
            slots.push(Mutex::new(None));
        }
    }

    /// Replaces any prior entry for `vcpu`. The replaced entry (if any) is
    /// dropped and a warning logged: a second syscall entry before a return
    /// means either a host bug or an execution path we can't follow.
    pub fn put(&self, vcpu: usize, record: EventRecord) {
        self.ensure_len(vcpu);
        let slots = self.slots.read().unwrap();
        let mut slot = slots[vcpu].lock().unwrap();
        if slot.replace(record).is_some() {
            warn!(
                "vcpu {vcpu}: syscall entry replaced a pending syscall with no return; dropping the prior entry"
            );
        }
    }

    /// Removes and returns the entry for `vcpu` iff its syscall number
    /// matches `expected_num`. A mismatch drops the stale entry and
    /// returns `None`; the caller is responsible for reporting the
    /// mismatch as an error.
    pub fn take(&self, vcpu: usize, expected_num: i64) -> Option<EventRecord> {
        self.ensure_len(vcpu);
        let slots = self.slots.read().unwrap();
        let mut slot = slots[vcpu].lock().unwrap();
        match slot.take() {
            Some(record) => {
                let matches = matches!(
                    &record.event,
                    crate::events::Event::Syscall(sys) if sys.num == expected_num
                );
                if matches {
                    Some(record)
                } else {
                    None
                }
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, MemAccessEvent, PcEvent, SyscallEvent, NUM_SYSCALL_ARGS};
    use crate::flags::FlagSet;

    fn pc_record(pc: u64) -> EventRecord {
        EventRecord::new(FlagSet::PC, Event::Pc(PcEvent { pc, branch: false }))
    }

    fn mem_record() -> EventRecord {
        EventRecord::new(
            FlagSet::READS_WRITES,
            Event::MemAccess(MemAccessEvent {
                pc: 0,
                addr: 0,
                is_write: false,
            }),
        )
    }

    fn syscall_record(num: i64) -> EventRecord {
        EventRecord::new(
            FlagSet::SYSCALLS,
            Event::Syscall(SyscallEvent {
                num,
                rv: -1,
                args: [0; NUM_SYSCALL_ARGS],
            }),
        )
    }

    #[test]
    fn translation_table_round_trips() {
        let table = TranslationTable::new(TableCap(None));
        let id = ScratchId::default_for_test(1);
        table.insert(id, pc_record(0x1000)).unwrap();
        assert_eq!(table.len(), 1);
        let removed = table.remove(id).unwrap();
        assert_eq!(removed.event, Event::Pc(PcEvent { pc: 0x1000, branch: false }));
        assert!(table.remove(id).is_none());
    }

    #[test]
    fn translation_table_enforces_cap() {
        let table = TranslationTable::new(TableCap(Some(1)));
        table.insert(ScratchId::default_for_test(1), pc_record(1)).unwrap();
        let err = table.insert(ScratchId::default_for_test(2), pc_record(2));
        assert!(matches!(err, Err(TracerError::OutOfMemory)));
    }

    #[test]
    fn memory_table_completes_on_exec_then_mem() {
        let table = MemoryTable::new(TableCap(None));
        let id = ScratchId::default_for_test(1);
        table.insert(id, mem_record()).unwrap();
        assert!(table.mark_exec(id).is_none());
        let done = table.mark_mem(id, 0xdead0000, false);
        assert!(done.is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn memory_table_completes_on_mem_then_exec() {
        let table = MemoryTable::new(TableCap(None));
        let id = ScratchId::default_for_test(1);
        table.insert(id, mem_record()).unwrap();
        assert!(table.mark_mem(id, 0x1234, true).is_none());
        let done = table.mark_exec(id);
        assert!(done.is_some());
        if let Event::MemAccess(mem) = done.unwrap().event {
            assert_eq!(mem.addr, 0x1234);
            assert!(mem.is_write);
        } else {
            panic!("expected MemAccess event");
        }
    }

    #[test]
    fn syscall_table_replaces_pending_entry() {
        let table = SyscallTable::new();
        table.put(0, syscall_record(1));
        table.put(0, syscall_record(2));
        assert!(table.take(0, 1).is_none());
        assert!(table.take(0, 2).is_some());
    }

    #[test]
    fn syscall_table_mismatch_drops_entry() {
        let table = SyscallTable::new();
        table.put(0, syscall_record(5));
        assert!(table.take(0, 99).is_none());
        assert!(table.take(0, 5).is_none());
    }

    impl ScratchId {
        fn default_for_test(n: u64) -> ScratchId {
            // `ScratchId` only exposes `as_u64`; tests construct a distinct
            // id via the allocator to keep the type opaque elsewhere.
            let allocator = crate::arena::ScratchIdAllocator::new();
            for _ in 0..n {
                let _ = allocator.alloc();
            }
            allocator.alloc()
        }
    }
}
