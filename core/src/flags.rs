//! The 32-bit request/progress bitset shared by every in-flight event.
//!
//! Built with `bitflags` rather than hand-rolled constants: it's the
//! standard way to express "ABI-facing named bits in a machine word" in
//! Rust, and keeps the request mask and the per-event progress bits as
//! ordinary composable values instead of magic integers.

use bitflags::bitflags;

bitflags! {
    /// Request bits name which event classes the user asked to trace;
    /// progress bits record what a given in-flight event has observed so
    /// far. Both live in the same word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlagSet: u32 {
        /// Program-counter events requested.
        const PC = 1 << 0;
        /// Memory read/write events requested (covers both reads and writes).
        const READS_WRITES = 1 << 1;
        /// Raw instruction-byte events requested.
        const INSTRS = 1 << 2;
        /// Syscall events requested.
        const SYSCALLS = 1 << 3;
        /// Branch-only PC events requested (last instruction of a TB only).
        const BRANCHES = 1 << 4;

        /// Progress bit: the execute callback has fired for this event.
        const EXECUTED = 1 << 5;
        /// Progress bit reserved for a future completion signal; no
        /// current submission path sets it (see DESIGN.md).
        const FINISHED = 1 << 6;
        /// Marker bit: this event is the one-time `Load` event.
        const LOAD = 1 << 7;
    }
}

/// The subset of bits that can appear in a *request* mask (as opposed to
/// progress bits tracked on a single in-flight event).
const REQUEST_MASK: FlagSet = FlagSet::PC
    .union(FlagSet::READS_WRITES)
    .union(FlagSet::INSTRS)
    .union(FlagSet::SYSCALLS)
    .union(FlagSet::BRANCHES);

impl FlagSet {
    /// Build a request mask from the plugin's boolean trace options.
    pub fn from_config(
        trace_pc: bool,
        trace_reads: bool,
        trace_writes: bool,
        trace_instrs: bool,
        trace_syscalls: bool,
        trace_branches: bool,
    ) -> FlagSet {
        let mut flags = FlagSet::empty();
        flags.set(FlagSet::PC, trace_pc);
        flags.set(FlagSet::READS_WRITES, trace_reads || trace_writes);
        flags.set(FlagSet::INSTRS, trace_instrs);
        flags.set(FlagSet::SYSCALLS, trace_syscalls);
        flags.set(FlagSet::BRANCHES, trace_branches);
        flags
    }

    /// True iff `progress` has observed everything `request` asked for,
    /// ignoring `SYSCALLS` (syscalls complete via their own table, not the
    /// translation/memory tables' progress bits).
    pub fn ready(request: FlagSet, progress: FlagSet) -> bool {
        let mask = !FlagSet::SYSCALLS;
        (request & mask) == (progress & mask)
    }

    /// True iff the request mask only asks for branch events.
    pub fn branch_only(request: FlagSet) -> bool {
        request & REQUEST_MASK == FlagSet::BRANCHES
    }

    /// True iff the request mask asks for none of the per-instruction event
    /// classes (PC, reads/writes, raw instructions, branches).
    pub fn no_insn(request: FlagSet) -> bool {
        let insn_bits = FlagSet::PC | FlagSet::READS_WRITES | FlagSet::INSTRS | FlagSet::BRANCHES;
        (request & insn_bits).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_collapses_reads_and_writes() {
        let flags = FlagSet::from_config(false, true, false, false, false, false);
        assert!(flags.contains(FlagSet::READS_WRITES));
        let flags = FlagSet::from_config(false, false, true, false, false, false);
        assert!(flags.contains(FlagSet::READS_WRITES));
        let flags = FlagSet::from_config(false, false, false, false, false, false);
        assert!(!flags.contains(FlagSet::READS_WRITES));
    }

    #[test]
    fn ready_ignores_syscalls_bit() {
        let request = FlagSet::PC | FlagSet::SYSCALLS;
        let progress = FlagSet::PC;
        assert!(FlagSet::ready(request, progress));
    }

    #[test]
    fn ready_requires_matching_progress() {
        let request = FlagSet::PC | FlagSet::INSTRS;
        let progress = FlagSet::PC;
        assert!(!FlagSet::ready(request, progress));
    }

    #[test]
    fn branch_only_detects_single_bit() {
        assert!(FlagSet::branch_only(FlagSet::BRANCHES));
        assert!(!FlagSet::branch_only(FlagSet::BRANCHES | FlagSet::PC));
        assert!(!FlagSet::branch_only(FlagSet::PC));
    }

    #[test]
    fn no_insn_detects_absence_of_all_instruction_classes() {
        assert!(FlagSet::no_insn(FlagSet::SYSCALLS));
        assert!(!FlagSet::no_insn(FlagSet::SYSCALLS | FlagSet::PC));
    }
}
