//! The narrow callback surface the engine uses to reach the outside world.

use crate::value::Value;
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Implemented by whatever embeds the engine. All calls are synchronous and
/// made from the evaluating thread.
pub trait Host {
    /// Next line of input without its line terminator, or `None` at end of input.
    fn read_line(&mut self) -> Option<String>;

    fn write_line(&mut self, line: &str);

    /// Run a routine the program calls but does not define. `None` means the
    /// host does not know it either.
    fn invoke(&mut self, _name: &str, _args: &[Value]) -> Option<Value> {
        None
    }
}

/// Standard input and output.
#[derive(Debug, Default)]
pub struct ConsoleHost;

impl Host for ConsoleHost {
    fn read_line(&mut self) -> Option<String> {
        // Output written without a newline must be visible before blocking.
        let _ = io::stdout().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    fn write_line(&mut self, line: &str) {
        println!("{}", line);
    }
}

type HostRoutine = Box<dyn FnMut(&[Value]) -> Value>;

/// In-memory host: scripted input, captured output and closures that stand
/// in for host-side routines.
#[derive(Default)]
pub struct BufferHost {
    input: VecDeque<String>,
    pub output: Vec<String>,
    routines: HashMap<String, HostRoutine>,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn register<F>(&mut self, name: &str, routine: F)
    where
        F: FnMut(&[Value]) -> Value + 'static,
    {
        self.routines.insert(name.to_string(), Box::new(routine));
    }

    pub fn output_text(&self) -> String {
        self.output.join("\n")
    }
}

impl Host for BufferHost {
    fn read_line(&mut self) -> Option<String> {
        self.input.pop_front()
    }

    fn write_line(&mut self, line: &str) {
        self.output.push(line.to_string());
    }

    fn invoke(&mut self, name: &str, args: &[Value]) -> Option<Value> {
        self.routines.get_mut(name).map(|routine| routine(args))
    }
}

/// Cooperative cancellation flag, checked between statements. Clones share
/// the flag, so a UI thread can hold one while the evaluator holds another.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
