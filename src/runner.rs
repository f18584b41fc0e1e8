use crate::config::EngineConfig;
use crate::error::Diagnostic;
use crate::evaluator::Interpreter;
use crate::host::ConsoleHost;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// How the command line wants a file handled.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config: EngineConfig,
    /// Report diagnostics without running the program.
    pub check_only: bool,
    /// Print the program outline before anything else.
    pub outline: bool,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("file '{}' not found", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn run_file(path: &Path, options: &RunOptions) -> Result<bool, RunError> {
    if !path.exists() {
        return Err(RunError::NotFound(path.to_path_buf()));
    }
    let source = fs::read_to_string(path).map_err(|source| RunError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path.to_string_lossy();
    Ok(run(&source, Some(&filename), options))
}

/// Parse, report and, when the program is free of errors, execute against
/// the console. Returns whether the whole run was error free.
pub fn run(source: &str, filename: Option<&str>, options: &RunOptions) -> bool {
    // Parsing
    let (program, diagnostics) = crate::parse(source);
    report(&diagnostics, source, filename);

    if options.outline {
        for entry in program.outline() {
            println!("{}", entry);
        }
    }

    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    if errors > 0 {
        eprintln!("{} error(s) found; the program was not run", errors);
        return false;
    }
    if options.check_only {
        debug!(warnings = diagnostics.len(), "check finished");
        return true;
    }

    // Evaluation
    let mut host = ConsoleHost;
    let outcome = Interpreter::new(&program, &mut host)
        .with_config(options.config.clone())
        .execute();
    report(&outcome.diagnostics, source, filename);
    !outcome.has_errors()
}

fn report(diagnostics: &[Diagnostic], source: &str, filename: Option<&str>) {
    for diagnostic in diagnostics {
        if let Err(error) = diagnostic.report(source, filename) {
            warn!(%error, "could not render diagnostic");
        }
    }
}
