use std::fs;
use std::process::ExitCode;

use callisto::lower::uxn::UxnBackend;
use callisto::lower::{lower, Backend};
use callisto::{lexer, parser, span::Code, CallistoError};
use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

/// The Callisto compiler driver: tokenizes, parses, and lowers a source file
/// to assembly for the selected backend.
#[derive(Debug, ClapParser)]
#[command(name = "callistoc", version, about)]
struct Cli {
    /// Source file to compile.
    input: String,

    /// Output assembly path. Defaults to the input path with its extension
    /// replaced by the backend's native assembly extension.
    #[arg(short, long)]
    output: Option<String>,

    /// Target backend. Only `uxn` is built in today.
    #[arg(short, long, default_value = "uxn")]
    backend: String,

    /// Keep the intermediate assembly file alongside the final binary.
    #[arg(short = 'k', long)]
    keep_asm: bool,

    /// Backend-specific option, `KEY=VALUE`. Repeatable.
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// Increase log verbosity. Repeatable (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(cli: &Cli) -> Result<(), CallistoError> {
    let source = fs::read(&cli.input).unwrap_or_else(|err| {
        eprintln!("{}: {err}", cli.input);
        std::process::exit(1);
    });
    let code = Code::new(cli.input.clone(), &source);

    let tokens = lexer::tokenize(&code)?;
    let ast = parser::parse(&tokens)?;

    let mut backend = UxnBackend::new();
    for option in &cli.options {
        if let Some((key, value)) = option.split_once('=') {
            backend.handle_option(key, &[value.to_string()]);
        } else {
            backend.handle_option(option, &[]);
        }
    }

    let assembly = lower(&mut backend, &ast)?;

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| format!("{}.rom", strip_extension(&cli.input)));
    fs::write(format!("{output_path}.tal"), &assembly).unwrap_or_else(|err| {
        eprintln!("{output_path}.tal: {err}");
        std::process::exit(1);
    });

    for command in backend.final_commands(&cli.input, &output_path, cli.keep_asm) {
        tracing::info!(program = %command.program, args = ?command.args, "would run assembler/linker step");
    }

    Ok(())
}

fn strip_extension(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => path.to_string(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: error: {err}", err.span());
            ExitCode::FAILURE
        }
    }
}
