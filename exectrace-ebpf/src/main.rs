#![no_std]
#![no_main]

mod task;

use aya_ebpf::{
    macros::{map, tracepoint},
    maps::{PerCpuArray, RingBuf},
    programs::TracePointContext,
};
use aya_log_ebpf::{debug, warn};
use exectrace_common::{
    emit::{EmitError, EventSink},
    probe::{handle_exec, ProbeError, ScratchPool},
    ExecEvent, ProbeConfig, RINGBUF_SIZE,
};

use task::CurrentExec;

// Patched by the loader through EbpfLoader::set_global.
#[unsafe(no_mangle)]
static PROBE_CONFIG: ProbeConfig = ProbeConfig::zeroed();

#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RINGBUF_SIZE, 0);

// ExecEvent is far beyond the 512 bytes of eBPF stack
#[map]
static SCRATCH: PerCpuArray<ExecEvent> = PerCpuArray::with_max_entries(1, 0);

struct PerCpuScratch;

impl ScratchPool for PerCpuScratch {
    #[inline(always)]
    fn acquire(&mut self) -> Option<&mut ExecEvent> {
        // only this CPU touches its slot until the program returns
        SCRATCH.get_ptr_mut(0).map(|event| unsafe { &mut *event })
    }
}

struct RingSink;

impl EventSink for RingSink {
    #[inline(always)]
    fn output(&self, data: &[u8]) -> Result<(), EmitError> {
        EVENTS.output(data, 0).map_err(EmitError::Dropped)
    }
}

#[tracepoint(category = "sched", name = "sched_process_exec")]
pub fn exectrace(ctx: TracePointContext) -> u32 {
    match try_exectrace(&ctx) {
        Ok(ret) => ret,
        Err(ret) => ret as u32,
    }
}

fn try_exectrace(ctx: &TracePointContext) -> Result<u32, i64> {
    let config = unsafe { core::ptr::read_volatile(&PROBE_CONFIG) };
    let exec = CurrentExec::new(ctx, &config.offsets);

    match handle_exec(&exec, &config, &mut PerCpuScratch, &RingSink) {
        Ok(captured) => {
            if captured.argv_degraded {
                debug!(ctx, "argv unreadable, emitted without arguments");
            }
        }
        Err(ProbeError::NoScratch | ProbeError::Unconfigured) => {}
        Err(ProbeError::Filename(e)) => warn!(ctx, "failed to read filename: {}", e.0),
        Err(ProbeError::Cwd(_)) => warn!(ctx, "failed to resolve cwd"),
        Err(ProbeError::OutOfBound) => warn!(ctx, "record length out of bound"),
        Err(ProbeError::Emit(EmitError::Dropped(rc))) => {
            debug!(ctx, "ring buffer full, record dropped: {}", rc)
        }
        Err(ProbeError::Emit(EmitError::OutOfBound)) => warn!(ctx, "emit length out of bound"),
    }

    Ok(0)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
