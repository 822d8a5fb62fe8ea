//! Host-ABI boundary: the thin `cdylib` shim a dynamic-binary-instrumentation
//! host loads, wiring its callback ABI to [`cannonball_core::callbacks`].
//!
//! The host's translation machinery and callback registration protocol are
//! external collaborators, not respecified here: this crate only adapts
//! `extern "C"` calls in and out, converting raw pointers/integers to the
//! core's typed API and back. All tracing logic lives in `cannonball-core`.

use std::ffi::{c_char, c_void, CStr};
use std::os::raw::c_int;
use std::path::Path;
use std::sync::OnceLock;

use cannonball_core::callbacks::{
    CallbackKind, CallbackState, ImageDescriptor, TranslationBlock,
};
use cannonball_core::config::PluginOptions;
use cannonball_core::flags::FlagSet;
use cannonball_core::sender::{BatchSender, DEFAULT_BATCH_SIZE};
use cannonball_core::tables::TableCap;
use log::error;

/// Function pointers the host provides for one translation block, letting
/// the core enumerate its instructions without knowing the host's
/// internal TB representation.
#[repr(C)]
pub struct HostTbOps {
    pub tb: *const c_void,
    pub n_insns: extern "C" fn(tb: *const c_void) -> usize,
    pub insn_vaddr: extern "C" fn(tb: *const c_void, index: usize) -> u64,
    /// Writes up to `MAX_OPCODE_SIZE` opcode bytes into `out` and returns
    /// the number written.
    pub insn_opcode: extern "C" fn(tb: *const c_void, index: usize, out: *mut u8) -> usize,
}

struct HostTb<'a>(&'a HostTbOps);

impl TranslationBlock for HostTb<'_> {
    fn instruction_count(&self) -> usize {
        (self.0.n_insns)(self.0.tb)
    }

    fn vaddr(&self, index: usize) -> u64 {
        (self.0.insn_vaddr)(self.0.tb, index)
    }

    fn opcode(&self, index: usize) -> Vec<u8> {
        let mut buf = [0u8; cannonball_core::events::MAX_OPCODE_SIZE];
        // SAFETY: the host ABI contracts `insn_opcode` to write at most
        // `MAX_OPCODE_SIZE` bytes into `buf`.
        let len = (self.0.insn_opcode)(self.0.tb, index, buf.as_mut_ptr());
        buf[..len.min(buf.len())].to_vec()
    }
}

/// Function pointers the host provides for the core to request callback
/// registration against a specific instruction.
#[repr(C)]
pub struct HostRegistrar {
    pub ctx: *mut c_void,
    pub register_execute: extern "C" fn(ctx: *mut c_void, insn_index: usize, id: u64),
    pub register_memory_execute: extern "C" fn(ctx: *mut c_void, insn_index: usize, id: u64),
    pub register_memory_access: extern "C" fn(ctx: *mut c_void, insn_index: usize, id: u64),
}

/// Function pointers the host provides for the one-time image-descriptor
/// query on the first translation callback.
#[repr(C)]
pub struct HostImageQuery {
    pub ctx: *const c_void,
    pub query: extern "C" fn(ctx: *const c_void, start: *mut u64, end: *mut u64, entry: *mut u64),
}

static STATE: OnceLock<CallbackState<BatchSender>> = OnceLock::new();

fn state() -> Option<&'static CallbackState<BatchSender>> {
    STATE.get()
}

/// Plugin install entry point. `raw_args` is the host-supplied
/// comma-separated `key=value` string; a non-zero return aborts plugin
/// install per the host ABI's install-failure channel.
///
/// # Safety
/// `raw_args` must be a valid, NUL-terminated C string for the duration of
/// this call.
#[no_mangle]
pub unsafe extern "C" fn cannonball_install(raw_args: *const c_char) -> c_int {
    let raw = if raw_args.is_null() {
        ""
    } else {
        match CStr::from_ptr(raw_args).to_str() {
            Ok(s) => s,
            Err(_) => return -1,
        }
    };

    let options = match PluginOptions::parse(raw) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("cannonball: argument error: {e}");
            return -1;
        }
    };

    if let Err(e) = cannonball_core::logging::init(&options.log_file, options.log_level) {
        eprintln!("cannonball: logging setup failed: {e}");
        return -1;
    }

    let request = FlagSet::from_config(
        options.trace_pc,
        options.trace_reads,
        options.trace_writes,
        options.trace_instrs,
        options.trace_syscalls,
        options.trace_branches,
    );

    let sender = match BatchSender::connect(Path::new(&options.sock_path), DEFAULT_BATCH_SIZE) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to connect sender: {e}");
            return -1;
        }
    };

    if STATE
        .set(CallbackState::new(request, sender, TableCap(None)))
        .is_err()
    {
        error!("cannonball_install called more than once");
        return -1;
    }
    0
}

/// Per-translation-block callback.
///
/// # Safety
/// `tb_ops` and `image` must point to valid, correctly populated structs
/// for the duration of this call.
#[no_mangle]
pub unsafe extern "C" fn cannonball_on_translation(
    tb_ops: *const HostTbOps,
    image: *const HostImageQuery,
    registrar: *const HostRegistrar,
) {
    let (Some(state), Some(tb_ops), Some(image), Some(registrar)) = (
        state(),
        tb_ops.as_ref(),
        image.as_ref(),
        registrar.as_ref(),
    ) else {
        return;
    };
    let tb = HostTb(tb_ops);
    let registrations = state.on_translation(&tb, || {
        let (mut start, mut end, mut entry) = (0u64, 0u64, 0u64);
        (image.query)(image.ctx, &mut start, &mut end, &mut entry);
        ImageDescriptor {
            start_code: start,
            end_code: end,
            entry_code: entry,
        }
    });
    for reg in registrations {
        match reg.kind {
            CallbackKind::Execute => {
                (registrar.register_execute)(registrar.ctx, reg.instruction_index, reg.id.as_u64())
            }
            CallbackKind::MemoryExecute => (registrar.register_memory_execute)(
                registrar.ctx,
                reg.instruction_index,
                reg.id.as_u64(),
            ),
            CallbackKind::MemoryAccess => (registrar.register_memory_access)(
                registrar.ctx,
                reg.instruction_index,
                reg.id.as_u64(),
            ),
        }
    }
}

#[no_mangle]
pub extern "C" fn cannonball_on_execute(_vcpu: usize, id: u64) {
    if let Some(state) = state() {
        state.on_execute(cannonball_core::arena::ScratchId::from_u64(id));
    }
}

#[no_mangle]
pub extern "C" fn cannonball_on_memory_execute(_vcpu: usize, id: u64) {
    if let Some(state) = state() {
        state.on_memory_execute(cannonball_core::arena::ScratchId::from_u64(id));
    }
}

#[no_mangle]
pub extern "C" fn cannonball_on_memory_access(_vcpu: usize, id: u64, addr: u64, is_write: c_int) {
    if let Some(state) = state() {
        state.on_memory_access(
            cannonball_core::arena::ScratchId::from_u64(id),
            addr,
            is_write != 0,
        );
    }
}

#[no_mangle]
pub extern "C" fn cannonball_on_syscall_entry(
    vcpu: usize,
    num: i64,
    args: *const u64,
    n_args: usize,
) {
    let Some(state) = state() else { return };
    let mut buf = [0u64; cannonball_core::events::NUM_SYSCALL_ARGS];
    if !args.is_null() {
        let n = n_args.min(buf.len());
        // SAFETY: caller contracts `args` to point at `n_args` valid u64s.
        let slice = unsafe { std::slice::from_raw_parts(args, n) };
        buf[..n].copy_from_slice(slice);
    }
    state.on_syscall_entry(vcpu, num, buf);
}

#[no_mangle]
pub extern "C" fn cannonball_on_syscall_return(vcpu: usize, num: i64, rv: i64) {
    if let Some(state) = state() {
        state.on_syscall_return(vcpu, num, rv);
    }
}

#[no_mangle]
pub extern "C" fn cannonball_on_exit() {
    if let Some(state) = state() {
        state.on_exit();
    }
}
