use std::{io::Read as _, path::PathBuf, process::ExitCode};

use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use remo::{
    ast,
    pipeline::{self, SnapshotKind},
    Config,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
    /// CFG renderings after each HIR-level pass.
    Hir,
    /// Tree renderings after each reactive pass.
    Reactive,
    /// The final output AST only.
    Ast,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON-encoded function AST to compile; reads stdin when omitted.
    input: Option<PathBuf>,

    /// JSON compiler configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print intermediate renderings for the given stage.
    #[arg(long, value_enum)]
    emit: Option<Emit>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let source = match &args.input {
        Some(path) => {
            if !path.is_file() {
                Args::command()
                    .error(
                        ErrorKind::InvalidValue,
                        format!("Input path '{}' is not a file!", path.display()),
                    )
                    .exit()
            }
            match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(error) => {
                    eprintln!("{} {error}", "error:".red().bold());
                    return ExitCode::FAILURE;
                }
            }
        }
        None => {
            let mut contents = String::new();
            if let Err(error) = std::io::stdin().read_to_string(&mut contents) {
                eprintln!("{} {error}", "error:".red().bold());
                return ExitCode::FAILURE;
            }
            contents
        }
    };

    let function: ast::Function = match serde_json::from_str(&source) {
        Ok(function) => function,
        Err(error) => {
            eprintln!("{} invalid input AST: {error}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let config = match &args.config {
        Some(path) => {
            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(error) => {
                    eprintln!("{} {error}", "error:".red().bold());
                    return ExitCode::FAILURE;
                }
            };
            match serde_json::from_str::<Config>(&contents) {
                Ok(config) => config,
                Err(error) => {
                    eprintln!("{} invalid configuration: {error}", "error:".red().bold());
                    return ExitCode::FAILURE;
                }
            }
        }
        None => Config::default(),
    };

    let (result, snapshots) = pipeline::compile_with_snapshots(&function, config);

    if let Some(emit) = args.emit {
        let wanted = match emit {
            Emit::Hir => SnapshotKind::Hir,
            Emit::Reactive => SnapshotKind::Reactive,
            Emit::Ast => SnapshotKind::Ast,
        };
        for snapshot in snapshots.iter().filter(|s| s.kind == wanted) {
            println!("{} {}", "==".dimmed(), snapshot.pass.cyan().bold());
            println!("{}", snapshot.rendered);
        }
    }

    match result {
        Ok(output) => {
            if args.emit != Some(Emit::Ast) {
                match serde_json::to_string_pretty(&output) {
                    Ok(rendered) => println!("{rendered}"),
                    Err(error) => {
                        eprintln!("{} {error}", "error:".red().bold());
                        return ExitCode::FAILURE;
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("{} {error}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
