use clap::{value_parser, Arg, ArgAction, Command};
use pseudo::runner::{self, RunOptions};
use pseudo::EngineConfig;
use std::path::Path;
use std::process::ExitCode;

fn main() -> ExitCode {
    let matches = Command::new("pseudo")
        .about("Runs classroom pseudo-code, repairing and explaining syntax mistakes")
        .arg(
            Arg::new("file")
                .help("The program file to run")
                .value_name("FILE")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Report diagnostics without running the program")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("outline")
                .long("outline")
                .help("Print classes, routines and globals with their lines")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("max-depth")
                .long("max-depth")
                .value_name("N")
                .help("Maximum routine call depth before the run is stopped")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("no-main")
                .long("no-main")
                .help("Do not call Module main after the top-level statements")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log engine activity to stderr (-v debug, -vv trace)")
                .action(ArgAction::Count),
        )
        .get_matches();

    init_tracing(matches.get_count("verbose"));

    let mut config = EngineConfig::default().with_auto_main(!matches.get_flag("no-main"));
    if let Some(depth) = matches.get_one::<usize>("max-depth") {
        config = config.with_max_call_depth(*depth);
    }
    let options = RunOptions {
        config,
        check_only: matches.get_flag("check"),
        outline: matches.get_flag("outline"),
    };

    let Some(file) = matches.get_one::<String>("file") else {
        return ExitCode::FAILURE;
    };
    match runner::run_file(Path::new(file), &options) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("Error: {}", error);
            ExitCode::FAILURE
        }
    }
}

/// Logging stays off unless `-v` is given or `RUST_LOG` is set.
fn init_tracing(verbosity: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match (verbosity, EnvFilter::try_from_default_env()) {
        (0, Ok(filter)) => filter,
        (0, Err(_)) => return,
        (1, _) => EnvFilter::new("pseudo=debug"),
        _ => EnvFilter::new("pseudo=trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true).with_level(true))
        .with(filter)
        .init();
}
