//! The event data model: every kind of record the callback state machine
//! can produce, plus the envelope that carries one to the Sender.

use serde::{Deserialize, Serialize};

/// Upper bound on the number of opcode bytes carried by an `Instr` event.
pub const MAX_OPCODE_SIZE: usize = 16;

/// Fixed argument-word count carried by a `Syscall` event.
pub const NUM_SYSCALL_ARGS: usize = 8;

/// Initial "no value yet" placeholder for a syscall's return value, chosen
/// so a dropped/never-returned syscall's wire record can never be mistaken
/// for a genuine `rv == 0` success.
pub const SYSCALL_RV_PLACEHOLDER: i64 = -1;

/// One guest program-image description, emitted exactly once per plugin
/// lifetime, before any other event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadEvent {
    pub start_code: u64,
    pub end_code: u64,
    pub entry_code: u64,
}

/// A single executed instruction's program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcEvent {
    pub pc: u64,
    /// True iff this is the last instruction of its translation block.
    pub branch: bool,
}

/// An executed instruction's program counter and raw opcode bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrEvent {
    pub pc: u64,
    pub opcode_size: u8,
    pub opcode: [u8; MAX_OPCODE_SIZE],
}

impl InstrEvent {
    /// Build an `InstrEvent`, truncating `data` to `MAX_OPCODE_SIZE` bytes.
    pub fn new(pc: u64, data: &[u8]) -> Self {
        let len = data.len().min(MAX_OPCODE_SIZE);
        let mut opcode = [0u8; MAX_OPCODE_SIZE];
        opcode[..len].copy_from_slice(&data[..len]);
        InstrEvent {
            pc,
            opcode_size: len as u8,
            opcode,
        }
    }

    pub fn opcode_bytes(&self) -> &[u8] {
        &self.opcode[..self.opcode_size as usize]
    }
}

/// A memory access performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemAccessEvent {
    pub pc: u64,
    pub addr: u64,
    pub is_write: bool,
}

/// A syscall's entry arguments and (once known) return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallEvent {
    pub num: i64,
    pub rv: i64,
    pub args: [u64; NUM_SYSCALL_ARGS],
}

/// The tagged payload of one event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Load(LoadEvent),
    Pc(PcEvent),
    Instr(InstrEvent),
    MemAccess(MemAccessEvent),
    Syscall(SyscallEvent),
}

impl Event {
    /// The `FlagSet` bit naming this event's kind (plus the `LOAD` marker
    /// bit for `Load` events, which isn't a request bit).
    pub fn kind_flags(&self) -> crate::flags::FlagSet {
        use crate::flags::FlagSet;
        match self {
            Event::Load(_) => FlagSet::LOAD,
            Event::Pc(_) => FlagSet::PC,
            Event::Instr(_) => FlagSet::INSTRS,
            Event::MemAccess(_) => FlagSet::READS_WRITES,
            Event::Syscall(_) => FlagSet::SYSCALLS,
        }
    }
}

/// A complete event, tagged with the flags that were set when it was
/// submitted. Heap-allocated individually; ownership transfers to the
/// Sender on submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub flags: crate::flags::FlagSet,
    pub event: Event,
}

impl EventRecord {
    pub fn new(flags: crate::flags::FlagSet, event: Event) -> Self {
        EventRecord { flags, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instr_event_truncates_to_max_opcode_size() {
        let data = [0xAAu8; 32];
        let ev = InstrEvent::new(0x1000, &data);
        assert_eq!(ev.opcode_size as usize, MAX_OPCODE_SIZE);
        assert_eq!(ev.opcode_bytes().len(), MAX_OPCODE_SIZE);
    }

    #[test]
    fn instr_event_keeps_short_opcode_exact() {
        let data = [0x90u8, 0x90];
        let ev = InstrEvent::new(0x2000, &data);
        assert_eq!(ev.opcode_size, 2);
        assert_eq!(ev.opcode_bytes(), &[0x90, 0x90]);
    }
}
