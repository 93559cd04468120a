//! stencilc Command Line Interface
//!
//! Usage:
//!   stencilc [OPTIONS] <input-file>
//!   stencilc --help
//!
//! Examples:
//!   stencilc blur.json -o blur.c                 # Writes blur.c and kernel.h
//!   stencilc --target=openmp pyramid.json -o p.c  # OpenMP loop nests
//!   stencilc --kernel-name=isp --header=isp.h camera.json -o isp.c
//!   stencilc --emit=domains blur.json             # Dump inferred domains

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use stencilc::codegen::Target;
use stencilc::ir::print::print_domains;
use stencilc::utils::PrettyPrint;
use stencilc::{CompileConfig, CompileContext};
use std::fs;
use std::path::{Path, PathBuf};

/// stencilc - Stencil Pipeline Compiler
#[derive(Parser, Debug)]
#[command(name = "stencilc")]
#[command(author = "stencilc Contributors")]
#[command(version)]
#[command(about = "An ahead-of-time compiler from stencil pipelines to C", long_about = None)]
struct Cli {
    /// Input program (JSON serialization of the program tree)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output source file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Name of the generated C function
    #[arg(long, default_value = "kernel")]
    kernel_name: String,

    /// Header file to write (defaults to <kernel-name>.h next to the output)
    #[arg(long, value_name = "FILE")]
    header: Option<PathBuf>,

    /// DOT graph output (accepted, not produced)
    #[arg(long, value_name = "FILE")]
    dot: Option<String>,

    /// Code generation target
    #[arg(short, long, default_value = "c")]
    target: TargetArg,

    /// What to emit
    #[arg(long, default_value = "code")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    /// Plain C code
    C,
    /// C with OpenMP pragmas
    Openmp,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::C => Target::C,
            TargetArg::Openmp => Target::OpenMP,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Generated source (and header)
    Code,
    /// Generated header only
    Header,
    /// The input program, pretty printed
    Ast,
    /// Inferred domains of every statement
    Domains,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("stencilc v{}", stencilc::VERSION);
    debug!("Input file: {:?}", cli.input);

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let program = stencilc::load_program(&source)?;

    if matches!(cli.emit, EmitKind::Ast) {
        write_output(&cli.output, &program.pretty())?;
        return Ok(());
    }

    let config = build_config(&cli);
    debug!("Compile config: {:?}", config);

    if matches!(cli.emit, EmitKind::Domains) {
        let ctx = CompileContext::new(&program, config)?;
        let pipeline = stencilc::lower(&ctx)?;
        write_output(&cli.output, &print_domains(&pipeline))?;
        return Ok(());
    }

    info!("Compiling...");
    let kernel = match stencilc::compile(&program, &config) {
        Ok(kernel) => kernel,
        Err(e) => {
            error!("Compilation failed: {:#}", e);
            return Err(e);
        }
    };

    if matches!(cli.emit, EmitKind::Header) {
        write_output(&cli.output, &kernel.header)?;
        return Ok(());
    }

    write_output(&cli.output, &kernel.source)?;
    match header_path(&cli, &config) {
        Some(path) => {
            fs::write(&path, &kernel.header)
                .with_context(|| format!("Failed to write header file: {:?}", path))?;
            info!("Wrote header {:?}", path);
        }
        None => warn!("No output file given; header `{}` not written", config.header_file_name),
    }

    Ok(())
}

fn build_config(cli: &Cli) -> CompileConfig {
    let header_file_name = cli
        .header
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.h", cli.kernel_name));

    CompileConfig {
        kernel_name: cli.kernel_name.clone(),
        header_file_name,
        dot_file_name: cli.dot.clone(),
        target: cli.target.into(),
        verbosity: cli.verbose,
    }
}

/// The header goes where `--header` says, else next to the output file.
fn header_path(cli: &Cli, config: &CompileConfig) -> Option<PathBuf> {
    if let Some(path) = &cli.header {
        return Some(path.clone());
    }
    let output = cli.output.as_ref()?;
    Some(match output.parent() {
        Some(dir) => dir.join(&config.header_file_name),
        None => PathBuf::from(&config.header_file_name),
    })
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
