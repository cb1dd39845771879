use std::path::PathBuf;

use anyhow::Context as _;
use aya::{maps::RingBuf, programs::TracePoint, EbpfLoader};
use chrono::Utc;
use clap::Parser;
use exectrace_common::{record::ExecRecord, ProbeConfig, Segments};
use tokio::{io::unix::AsyncFd, signal};
use tracing::{debug, info, warn};

mod btf;
mod offsets;
mod output;

use output::ExecLine;

#[derive(Debug, Parser)]
#[command(version, about = "Trace process executions with their arguments and working directory")]
struct Cli {
    /// Do not capture the argument vector
    #[arg(long)]
    no_argv: bool,

    /// Do not capture the working directory
    #[arg(long)]
    no_cwd: bool,

    /// TOML file with the kernel structure offsets, skips BTF discovery
    #[arg(long, value_name = "FILE")]
    offsets: Option<PathBuf>,

    /// Print the resolved offsets as TOML and exit
    #[arg(long)]
    dump_offsets: bool,

    /// Print one JSON object per execution
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn segments(&self) -> Segments {
        let mut segments = Segments::ALL;
        if self.no_argv {
            segments = segments.without(Segments::ARGV);
        }
        if self.no_cwd {
            segments = segments.without(Segments::CWD);
        }
        segments
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let offsets = match &cli.offsets {
        Some(path) => offsets::load(path)?,
        None => offsets::discover()?,
    };
    if cli.dump_offsets {
        print!("{}", offsets::to_toml(&offsets)?);
        return Ok(());
    }

    // Bump the memlock rlimit. This is needed for older kernels that don't use the
    // new memcg based accounting, see https://lwn.net/Articles/837122/
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }

    let segments = cli.segments();
    let config = ProbeConfig::new(segments, offsets);

    let mut ebpf = EbpfLoader::new()
        .set_global("PROBE_CONFIG", &config, true)
        .load(aya::include_bytes_aligned!(concat!(
            env!("OUT_DIR"),
            "/exectrace"
        )))?;
    if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
        // This can happen if you remove all log statements from your eBPF program.
        warn!("failed to initialize eBPF logger: {e}");
    }
    let program: &mut TracePoint = ebpf
        .program_mut("exectrace")
        .context("eBPF program exectrace not found")?
        .try_into()?;
    program.load()?;
    program.attach("sched", "sched_process_exec")?;

    info!(
        argv = segments.contains(Segments::ARGV),
        cwd = segments.contains(Segments::CWD),
        "eBPF program loaded and attached"
    );

    let events = RingBuf::try_from(ebpf.take_map("EVENTS").context("map EVENTS not found")?)?;
    let mut events = AsyncFd::new(events)?;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                break;
            }
            guard = events.readable_mut() => {
                let mut guard = guard?;
                let ring = guard.get_inner_mut();
                while let Some(item) = ring.next() {
                    match ExecRecord::parse(&item) {
                        Ok(record) => {
                            let line = ExecLine::new(&record, segments, Utc::now());
                            if cli.json {
                                println!("{}", line.to_json()?);
                            } else {
                                line.log();
                            }
                        }
                        Err(e) => warn!("dropping malformed record: {e}"),
                    }
                }
                guard.clear_ready();
            }
        }
    }

    info!("Exiting...");
    Ok(())
}
