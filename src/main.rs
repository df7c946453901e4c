//! CLI front end for the PLDM firmware update package codec.
//!
//! Argument parsing, path plumbing and logging live here; the traversal
//! logic itself is in [`pldm_fwpkg`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info};

use pldm_fwpkg::{error_inject, repack, unpack, FaultMode};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Unpack,
    Repack,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fault {
    Descriptor,
    #[value(alias = "uuid")]
    Uuid,
    Image,
    Signkey,
    Largefile,
}

impl From<Fault> for FaultMode {
    fn from(f: Fault) -> Self {
        match f {
            Fault::Descriptor => FaultMode::Descriptor,
            Fault::Uuid => FaultMode::Uuid,
            Fault::Image => FaultMode::Image,
            Fault::Signkey => FaultMode::Signkey,
            Fault::Largefile => FaultMode::Largefile,
        }
    }
}

/// Unpack, repack, or fault-inject a PLDM (DSP0267) firmware update package
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input .fwpkg file (required for unpack and error injection)
    #[clap(short = 'F', long = "fwpkg")]
    fwpkg: Option<PathBuf>,

    /// Spec version to interpret the package against
    #[clap(short = 'S', long = "spec", default_value = "pldm_spec_1.0.0")]
    spec: String,

    /// Pipeline to run: unpack or repack
    #[clap(short = 'N', long = "mode", value_enum)]
    mode: Option<Mode>,

    /// Fault-injection mode; implies unpack, mutate, repack
    #[clap(short = 'E', long = "error", value_enum)]
    error: Option<Fault>,

    /// Dump header.json only, skip image/trailing extraction
    #[clap(short = 'D', long = "dump-header", action)]
    dump_header: bool,

    /// Output directory for unpack/, repack/ and diagnostic files
    #[clap(short = 'O', long = "output", default_value = ".")]
    output: PathBuf,
}

fn main() -> ExitCode {
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env).init();

    let cli = Cli::parse();

    if let Some(fault) = cli.error {
        return match require_input(&cli.fwpkg) {
            Ok(input) => run_error_inject(input, &cli.spec, &cli.output, fault.into()),
            Err(code) => code,
        };
    }

    if cli.dump_header {
        return match require_input(&cli.fwpkg) {
            Ok(input) => run_unpack(input, &cli.spec, &cli.output, true),
            Err(code) => code,
        };
    }

    match cli.mode {
        Some(Mode::Unpack) | None => match require_input(&cli.fwpkg) {
            Ok(input) => run_unpack(input, &cli.spec, &cli.output, false),
            Err(code) => code,
        },
        Some(Mode::Repack) => run_repack(&cli.spec, &cli.output),
    }
}

fn require_input(fwpkg: &Option<PathBuf>) -> Result<&PathBuf, ExitCode> {
    fwpkg.as_ref().ok_or_else(|| {
        error!("-F/--fwpkg is required for this mode");
        ExitCode::FAILURE
    })
}

fn run_unpack(input: &PathBuf, spec: &str, output: &PathBuf, dump_header: bool) -> ExitCode {
    info!("Unpacking {} ({spec})...", input.display());
    match unpack(input, spec, output, dump_header) {
        Ok(report) => {
            println!("Unpacked to {}", report.unpack_dir.display());
            if report.compliant() {
                println!("CRC matches. Package is PLDM compliant.");
            } else {
                println!("CRC mismatch detected. Package is NOT PLDM compliant.");
                println!("  header checksum match:  {}", report.header_crc_match);
                if let Some(payload_ok) = report.payload_crc_match {
                    println!("  payload checksum match: {payload_ok}");
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("unpack failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_repack(spec: &str, output: &PathBuf) -> ExitCode {
    info!("Repacking from {} ({spec})...", output.display());
    match repack(output, spec) {
        Ok(path) => {
            println!("Repacked file available at {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("repack failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_error_inject(input: &PathBuf, spec: &str, output: &PathBuf, mode: FaultMode) -> ExitCode {
    info!("Injecting {mode:?} fault into {} ({spec})...", input.display());
    match error_inject(input, spec, output, mode) {
        Ok(path) => {
            println!("Corrupted package available at {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("error injection failed: {e}");
            ExitCode::FAILURE
        }
    }
}
