use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use scmbridge::SchemeExt;
use scmbridge::boot::{BootConfig, Session};
use scmbridge::registry;

const LOG_VAR: &str = "SCMBRIDGE_LOG";

/// Run Scheme code on one of the bridged interpreter backends
#[derive(Debug, Parser)]
#[command(name = "scmbridge", version)]
struct Cli {
    /// Interpreter backend to use
    #[arg(short = 'g', long = "scheme", value_name = "NAME")]
    scheme: Option<String>,

    /// Print the available backends and exit
    #[arg(long)]
    list_schemes: bool,

    /// Evaluate an expression (repeatable)
    #[arg(short = 'x', long = "execute", value_name = "EXPR")]
    execute: Vec<String>,

    /// Base directory of the init scripts
    #[arg(long, value_name = "DIR")]
    progs_path: Option<PathBuf>,

    /// Per-user directory for overrides and preferences
    #[arg(long, value_name = "DIR")]
    home_path: Option<PathBuf>,

    /// Skip the init scripts
    #[arg(long)]
    no_init: bool,

    /// Start an interactive session after running files and expressions
    #[arg(long)]
    repl: bool,

    /// More logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Files to load in order
    files: Vec<PathBuf>,
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_schemes() {
    for name in registry::scheme_names() {
        eprintln!("  {name}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.list_schemes {
        eprintln!("Available schemes:");
        print_schemes();
        return ExitCode::SUCCESS;
    }
    if let Some(name) = &cli.scheme
        && !registry::scheme_names().contains(name)
    {
        eprintln!("Unknown scheme '{name}'. Available schemes:");
        print_schemes();
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = BootConfig::resolve(cli.scheme, cli.progs_path, cli.home_path);
    config.load_init = !cli.no_init;
    let session = Session::start(config).context("could not start the interpreter")?;

    let mut failed = false;
    for file in &cli.files {
        if let Err(err) = SchemeExt::eval_file(session.scheme().as_ref(), file) {
            eprintln!("{}: {err}", file.display());
            failed = true;
        }
        session.drain_delayed();
    }
    for expr in &cli.execute {
        match session.eval(expr) {
            Ok(value) if !value.is_unspecified() => println!("{value}"),
            Ok(_) => {}
            Err(err) => {
                eprintln!("Error: {err}");
                failed = true;
            }
        }
        session.drain_delayed();
    }

    let interactive = cli.repl || (cli.files.is_empty() && cli.execute.is_empty());
    if interactive {
        run_repl(&session)?;
    }
    session.shutdown();
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn run_repl(session: &Session) -> Result<()> {
    let scheme = session.scheme();
    println!("scmbridge on the {} backend ({})", scheme.name(), scheme.dialect());
    let message = session.startup_message();
    if !message.is_empty() {
        println!("{message}");
    }
    println!("Type :help for commands, or Ctrl+D to exit.");

    let mut rl = DefaultEditor::new().context("could not initialize the line editor")?;
    loop {
        match rl.readline("scheme> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":schemes" => {
                        for name in registry::scheme_names() {
                            println!("  {name}");
                        }
                        continue;
                    }
                    ":pending" => {
                        println!("{} delayed command(s) pending", session.delayed().len());
                        continue;
                    }
                    ":quit" | ":exit" => break,
                    _ => {}
                }

                match session.eval(line) {
                    Ok(value) if !value.is_unspecified() => println!("{value}"),
                    Ok(_) => {}
                    Err(err) => println!("Error: {err}"),
                }
                session.drain_delayed();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => return Err(err).context("reading input"),
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :help      show this message");
    println!("  :schemes   list the available backends");
    println!("  :pending   count delayed commands waiting to run");
    println!("  :quit      leave");
    println!("Anything else is evaluated as Scheme; delayed commands run after each line.");
}
