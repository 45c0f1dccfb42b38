use anyhow::{Context, Result};
use clap::Parser;
use emu_x86::bus::ArrayMemory;
use emu_x86::config::{CpuConfig, CpuModel};
use emu_x86::cpu::{Cpu386, SliceExit};
use emu_x86::logging::LogConfig;
use emu_x86::registers::RegId;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

/// Parse a number written in decimal or with a `0x` prefix
fn parse_number(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_word(s: &str) -> Result<u16, String> {
    let value = parse_number(s)?;
    u16::try_from(value).map_err(|_| format!("'{}' does not fit in 16 bits", s))
}

#[derive(Parser)]
struct Args {
    /// Raw binary image to load (boot sector, COM file, BIOS dump)
    image: PathBuf,

    /// Segment the image is loaded into and started at
    #[arg(long, value_parser = parse_word, default_value = "0x0000")]
    load_segment: u16,

    /// Offset within the load segment
    #[arg(long, value_parser = parse_word, default_value = "0x7C00")]
    load_offset: u16,

    /// CPU configuration as JSON; overrides the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// CPU model: "386" or "486" (overrides --config)
    #[arg(long)]
    model: Option<String>,

    /// Disable the decoded-instruction cache
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Number of time slices to run
    #[arg(long, default_value_t = 100)]
    slices: u32,

    /// Stop once this many instructions have retired
    #[arg(long)]
    max_instructions: Option<u64>,

    /// Core log filter, e.g. "warn" or "info,cpu=trace,interrupts=debug"
    #[arg(long)]
    log_level: Option<String>,

    /// Write core logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Dump the final CPU state to this file as JSON
    #[arg(long, default_value = "state.json")]
    state: PathBuf,

    /// Do not print the final state to stdout
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn load_config(args: &Args) -> Result<CpuConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            CpuConfig::from_json(&json)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => CpuConfig::default(),
    };
    if let Some(model) = args.model.as_deref() {
        config.model = match model {
            "386" | "80386" => CpuModel::Intel80386,
            "486" | "80486" => CpuModel::Intel80486,
            other => anyhow::bail!("Unsupported CPU model: {}", other),
        };
    }
    if args.no_cache {
        config.instruction_cache = false;
    }
    Ok(config)
}

/// Instructions the next slice may retire under `--max-instructions`
fn slice_budget(limit: Option<u64>, retired: u64) -> u64 {
    limit.map_or(u64::MAX, |limit| limit.saturating_sub(retired))
}

fn configure_logging(args: &Args) -> Result<()> {
    let logs = LogConfig::global();
    if let Some(filter) = args.log_level.as_deref() {
        logs.configure_from_str(filter)
            .map_err(|item| anyhow::anyhow!("invalid log filter item '{}'", item))?;
    }
    if let Some(path) = args.log_file.as_ref() {
        logs.set_log_file(path.clone())
            .with_context(|| format!("opening log file {}", path.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    configure_logging(&args)?;
    let config = load_config(&args)?;

    let image = fs::read(&args.image)
        .with_context(|| format!("reading image {}", args.image.display()))?;
    let load_address = ((args.load_segment as u32) << 4) + args.load_offset as u32;
    let mut memory = ArrayMemory::new();
    if load_address as usize + image.len() > memory.len() {
        anyhow::bail!(
            "image of {} bytes does not fit at {:05X}",
            image.len(),
            load_address
        );
    }
    memory.load_program(load_address, &image);
    log::info!(
        "loaded {} bytes at {:04X}:{:04X} ({})",
        image.len(),
        args.load_segment,
        args.load_offset,
        config.model.name()
    );

    let mut cpu = Cpu386::with_config(memory, config);
    cpu.jump_to(args.load_segment, args.load_offset as u32);
    cpu.regs.write(RegId::SS, args.load_segment as u32);
    cpu.regs.write(RegId::SP, 0xFFFE);

    let mut outcome = Ok(());
    for slice in 1..=args.slices {
        match cpu.run_with_budget(slice_budget(args.max_instructions, cpu.instructions())) {
            Ok(SliceExit::Halted) => {
                log::info!("CPU halted after {} slices", slice);
                break;
            }
            Ok(SliceExit::BudgetExhausted) => {
                log::info!("instruction limit reached after {} slices", slice);
                break;
            }
            Ok(SliceExit::Yield) => {}
            Err(err) => {
                log::error!("emulation stopped: {}", err);
                outcome = Err(err);
                break;
            }
        }
    }

    let state = cpu.get_state();
    let json = serde_json::to_string_pretty(&state)?;
    let mut f = File::create(&args.state)
        .with_context(|| format!("creating {}", args.state.display()))?;
    write!(f, "{}", json)?;
    if !args.quiet {
        println!("{}", json);
    }

    outcome.map_err(anyhow::Error::from)
}
