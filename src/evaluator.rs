//! Tree-walking evaluator.
//!
//! Every statement yields a [`Flow`] signal that tells the enclosing
//! construct how to continue. Variables live in one [`RuntimeStack`] and are
//! addressed by the offsets the parser assigned; the evaluator never looks a
//! name up at run time.

mod call;
mod expression;

use crate::ast::{Block, Case, Declaration, Expr, Initializer, Program, Stmt};
use crate::config::EngineConfig;
use crate::error::{Diagnostic, Span};
use crate::host::{Host, StopHandle};
use crate::native_stack::ensure_sufficient_stack;
use crate::stack::{Cell, Place, RuntimeStack};
use crate::symbols::{Storage, Variable};
use crate::value::{Array, Kind, ObjectRef, Value};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Control signal produced by executing a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Next,
    Continue,
    Break,
    /// Ends the whole run, however deep the current call.
    Stop,
    Return(Value),
}

/// Expression evaluation was cut short and the run is stopping. The
/// diagnostic, if any, has already been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Halt;

pub(crate) type Eval<T> = Result<T, Halt>;

/// What a run produced.
#[derive(Debug)]
pub struct Outcome {
    pub signal: Flow,
    /// Value returned by `call_routine`; `None` for whole-program runs.
    pub value: Option<Value>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Outcome {
    pub fn stopped(&self) -> bool {
        self.signal == Flow::Stop
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// One active routine call, or a new object's field initialization.
#[derive(Debug, Clone)]
struct CallRecord {
    this: Option<ObjectRef>,
}

pub struct Interpreter<'p, 'h> {
    program: &'p Program,
    host: &'h mut dyn Host,
    config: EngineConfig,
    stop: StopHandle,
    stop_reported: bool,
    stack: RuntimeStack,
    calls: Vec<CallRecord>,
    diagnostics: Vec<Diagnostic>,
}

impl<'p, 'h> Interpreter<'p, 'h> {
    pub fn new(program: &'p Program, host: &'h mut dyn Host) -> Self {
        Self {
            program,
            host,
            config: EngineConfig::default(),
            stop: StopHandle::new(),
            stop_reported: false,
            stack: RuntimeStack::with_statics(program.symbols.static_count),
            calls: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing stop flag, e.g. one a UI thread already holds.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current value of a static (global) variable.
    pub fn global(&self, name: &str) -> Option<Value> {
        let program = self.program;
        let var = program.symbols.statics().find(|var| var.name == name)?;
        self.read_place(&Place::Stack(var.offset as usize))
    }

    /// Run the top-level statements, then `main` when it exists and
    /// `auto_main` is set. Statics start fresh on every call.
    pub fn execute(&mut self) -> Outcome {
        self.stack = RuntimeStack::with_statics(self.program.symbols.static_count);
        self.calls.clear();
        self.stop_reported = false;
        debug!(
            statements = self.program.statements.len(),
            statics = self.program.symbols.static_count,
            "executing program"
        );

        let program = self.program;
        let mut signal = match self.execute_statements(&program.statements) {
            Flow::Stop => Flow::Stop,
            _ => Flow::Next,
        };

        if signal == Flow::Next && self.config.auto_main {
            if let Some(&main) = program.routine_index.get("main") {
                if program.routines[main].params.is_empty() {
                    let span = program.routines[main].span;
                    if self.run_routine(main, None, Vec::new(), span).is_err() {
                        signal = Flow::Stop;
                    }
                }
            }
        }

        debug!(signal = ?signal, diagnostics = self.diagnostics.len(), "program finished");
        Outcome {
            signal,
            value: None,
            diagnostics: std::mem::take(&mut self.diagnostics),
        }
    }

    /// Call a free routine by name with by-value arguments. Static state
    /// left by an earlier `execute` is kept.
    pub fn call_routine(&mut self, name: &str, args: Vec<Value>) -> Outcome {
        let program = self.program;
        let result = match program.routine_index.get(name) {
            Some(&id) => {
                let routine = &program.routines[id];
                let cells = routine
                    .params
                    .iter()
                    .enumerate()
                    .map(|(position, param)| {
                        let var = program.symbols.variable(*param);
                        let value = args.get(position).cloned().unwrap_or_else(|| Value::default_for(&var.ty));
                        let kind = if var.is_array() { Kind::Array } else { var.ty.kind() };
                        Cell::Direct(self.coerce(value, kind, routine.span))
                    })
                    .collect();
                self.run_routine(id, None, cells, routine.span)
            }
            None => {
                self.diagnostics.push(Diagnostic::semantic_error(
                    Span::default(),
                    format!("No routine named '{}' is defined", name),
                ));
                Ok(Value::Null)
            }
        };

        Outcome {
            signal: if result.is_ok() { Flow::Next } else { Flow::Stop },
            value: result.ok(),
            diagnostics: std::mem::take(&mut self.diagnostics),
        }
    }

    fn execute_statements(&mut self, statements: &[Stmt]) -> Flow {
        for stmt in statements {
            match self.execute_statement(stmt) {
                Flow::Next => {}
                other => return other,
            }
        }
        Flow::Next
    }

    pub(crate) fn execute_block(&mut self, block: &Block) -> Flow {
        self.execute_statements(&block.statements)
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Flow {
        if self.stop_requested(*stmt.span()) {
            return Flow::Stop;
        }
        ensure_sufficient_stack(|| self.run_statement(stmt)).unwrap_or(Flow::Stop)
    }

    /// Records the stop diagnostic the first time the host's flag is seen.
    fn stop_requested(&mut self, span: Span) -> bool {
        if !self.stop.is_requested() {
            return false;
        }
        if !self.stop_reported {
            self.stop_reported = true;
            self.fatal(span, "Execution stopped by the host".to_string());
        }
        true
    }

    fn run_statement(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match stmt {
            Stmt::Declare { declarations, .. } => {
                for declaration in declarations {
                    self.execute_declaration(declaration)?;
                }
                Ok(Flow::Next)
            }
            Stmt::Assign { target, value, span } => {
                let value = self.evaluate_expression(value)?;
                if let Some((place, kind)) = self.place(target)? {
                    let value = self.coerce(value, kind, *span);
                    self.write_place(&place, value, *span);
                }
                Ok(Flow::Next)
            }
            Stmt::Display { items, .. } => {
                let mut line = String::new();
                for item in items {
                    let value = self.evaluate_expression(item)?;
                    line.push_str(&value.to_string());
                }
                self.host.write_line(&line);
                Ok(Flow::Next)
            }
            Stmt::Input { target, span } => {
                let Some((place, kind)) = self.place(target)? else {
                    return Ok(Flow::Next);
                };
                let value = match self.host.read_line() {
                    Some(line) => self.coerce(Value::String(line), kind, *span),
                    None => {
                        self.diagnostics.push(Diagnostic::conversion_error(
                            *span,
                            format!("No input available; using the default {}", kind),
                        ));
                        Value::default_of_kind(kind)
                    }
                };
                self.write_place(&place, value, *span);
                Ok(Flow::Next)
            }
            Stmt::Call { call, .. } => {
                self.evaluate_expression(call)?;
                Ok(Flow::Next)
            }
            Stmt::If {
                branches,
                else_branch,
                ..
            } => {
                for (condition, block) in branches {
                    if self.test(condition)? {
                        return Ok(self.execute_block(block));
                    }
                }
                Ok(match else_branch {
                    Some(block) => self.execute_block(block),
                    None => Flow::Next,
                })
            }
            Stmt::Select {
                subject,
                cases,
                default,
                ..
            } => self.execute_select(subject, cases, default.as_ref()),
            Stmt::While { condition, body, .. } => {
                while self.test(condition)? {
                    if let Some(flow) = leave_loop(self.execute_block(body)) {
                        return Ok(flow);
                    }
                    if self.stop_requested(body.span) {
                        return Ok(Flow::Stop);
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::DoLoop {
                body,
                condition,
                until,
                ..
            } => {
                loop {
                    if let Some(flow) = leave_loop(self.execute_block(body)) {
                        return Ok(flow);
                    }
                    if self.stop_requested(body.span) {
                        return Ok(Flow::Stop);
                    }
                    if self.test(condition)? == *until {
                        return Ok(Flow::Next);
                    }
                }
            }
            Stmt::For {
                counter,
                start,
                end,
                step,
                body,
                span,
            } => self.execute_for(counter, start, end, step.as_ref(), body, *span),
            Stmt::ForEach {
                item,
                array,
                body,
                span,
            } => self.execute_for_each(item, array, body, *span),
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate_expression(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Stop { span } => {
                debug!(line = span.line, "Stop statement");
                Ok(Flow::Stop)
            }
        }
    }

    fn execute_select(
        &mut self,
        subject: &Expr,
        cases: &[Case],
        default: Option<&Block>,
    ) -> Eval<Flow> {
        let subject = self.evaluate_expression(subject)?;
        for case in cases {
            for label in &case.labels {
                let value = self.evaluate_expression(label)?;
                match subject.equals(&value) {
                    Ok(true) => return Ok(self.execute_block(&case.body)),
                    Ok(false) => {}
                    Err(error) => self
                        .diagnostics
                        .push(Diagnostic::conversion_error(*label.span(), error.to_string())),
                }
            }
        }
        Ok(match default {
            Some(block) => self.execute_block(block),
            None => Flow::Next,
        })
    }

    fn execute_for(
        &mut self,
        counter: &Expr,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Block,
        span: Span,
    ) -> Eval<Flow> {
        let start = self.evaluate_expression(start)?;
        let end = self.evaluate_expression(end)?;
        let step = match step {
            Some(expr) => self.evaluate_expression(expr)?,
            None => Value::Integer(1),
        };
        let Some((place, kind)) = self.place(counter)? else {
            return Ok(Flow::Next);
        };

        let ascending = match step.compare(&Value::Integer(0)) {
            Ok(Ordering::Greater) => true,
            Ok(Ordering::Less) => false,
            Ok(Ordering::Equal) => {
                self.diagnostics.push(Diagnostic::arithmetic_error(
                    span,
                    "For loop step cannot be 0; the loop is skipped".to_string(),
                ));
                return Ok(Flow::Next);
            }
            Err(error) => {
                self.diagnostics.push(Diagnostic::conversion_error(span, error.to_string()));
                return Ok(Flow::Next);
            }
        };

        if let Value::Real(fraction) = step {
            if kind == Kind::Integer && fraction.fract() != 0.0 {
                self.diagnostics.push(Diagnostic::conversion_error(
                    span,
                    format!("step {} is not a whole number but the counter is Integer; the loop is skipped", fraction),
                ));
                return Ok(Flow::Next);
            }
        }

        let first = self.coerce(start, kind, span);
        self.write_place(&place, first, span);
        loop {
            let current = self.read_place(&place).unwrap_or(Value::Null);
            let finished = match current.compare(&end) {
                Ok(order) if ascending => order == Ordering::Greater,
                Ok(order) => order == Ordering::Less,
                Err(error) => {
                    self.diagnostics.push(Diagnostic::conversion_error(span, error.to_string()));
                    true
                }
            };
            if finished {
                return Ok(Flow::Next);
            }

            if let Some(flow) = leave_loop(self.execute_block(body)) {
                return Ok(flow);
            }
            if self.stop_requested(span) {
                return Ok(Flow::Stop);
            }

            // The body may have assigned the counter; step from what it holds now.
            let current = self.read_place(&place).unwrap_or(Value::Null);
            match current.add(&step) {
                Ok(next) => {
                    let next = self.coerce(next, kind, span);
                    if current.equals(&next) == Ok(true) {
                        self.diagnostics.push(Diagnostic::arithmetic_error(
                            span,
                            format!("For loop counter does not advance from {}; the loop ends", current),
                        ));
                        return Ok(Flow::Next);
                    }
                    self.write_place(&place, next, span);
                }
                Err(error) => {
                    self.diagnostics.push(Diagnostic::conversion_error(span, error.to_string()));
                    return Ok(Flow::Next);
                }
            }
        }
    }

    fn execute_for_each(
        &mut self,
        item: &Expr,
        array: &Expr,
        body: &Block,
        span: Span,
    ) -> Eval<Flow> {
        if matches!(array, Expr::Error { .. }) {
            return Ok(Flow::Next);
        }
        let array = match self.evaluate_expression(array)? {
            Value::Array(array) => array,
            other => {
                self.diagnostics.push(Diagnostic::conversion_error(
                    span,
                    format!("For Each needs an array, found {}", other.kind()),
                ));
                return Ok(Flow::Next);
            }
        };
        let Some((place, kind)) = self.place(item)? else {
            return Ok(Flow::Next);
        };

        let mut position = 0;
        loop {
            let element = array.borrow().elements.get(position).cloned();
            let Some(element) = element else {
                return Ok(Flow::Next);
            };
            let element = self.coerce(element, kind, span);
            self.write_place(&place, element, span);

            if let Some(flow) = leave_loop(self.execute_block(body)) {
                return Ok(flow);
            }
            if self.stop_requested(span) {
                return Ok(Flow::Stop);
            }
            position += 1;
        }
    }

    /// (Re)initialize one declared variable. Runs every time control
    /// reaches the declaration.
    fn execute_declaration(&mut self, declaration: &Declaration) -> Eval<()> {
        let program = self.program;
        let var = program.symbols.variable(declaration.var);
        let place = self.variable_place(var, declaration.span)?;

        let value = if var.is_array() {
            let mut dims = Vec::with_capacity(declaration.dims.len());
            for dim in &declaration.dims {
                dims.push(self.extent(dim)?);
            }
            let limit = self.config.max_array_elements;
            if !Array::element_count(&dims).is_some_and(|count| count <= limit) {
                self.diagnostics.push(Diagnostic::index_error(
                    declaration.span,
                    format!(
                        "array '{}' would need more than {} elements; it is left empty",
                        var.name, limit
                    ),
                ));
                dims = vec![0; dims.len()];
            }
            let mut array = Array::new(var.ty.clone(), dims);
            match &declaration.init {
                Some(init @ Initializer::List(_)) => {
                    let kind = var.ty.kind();
                    let items = init.flatten();
                    if items.len() > array.len() {
                        self.diagnostics.push(Diagnostic::index_error(
                            declaration.span,
                            format!(
                                "{} initial value(s) given for {} element(s) of '{}'; the rest are ignored",
                                items.len(),
                                array.len(),
                                var.name
                            ),
                        ));
                    }
                    for (position, expr) in items.into_iter().enumerate() {
                        let value = self.evaluate_expression(expr)?;
                        if position < array.len() {
                            array.elements[position] = self.coerce(value, kind, *expr.span());
                        }
                    }
                    Value::Array(array.into_ref())
                }
                Some(Initializer::Expr(expr)) => {
                    let value = self.evaluate_expression(expr)?;
                    self.coerce(value, Kind::Array, *expr.span())
                }
                None => Value::Array(array.into_ref()),
            }
        } else {
            match &declaration.init {
                Some(Initializer::Expr(expr)) => {
                    let value = self.evaluate_expression(expr)?;
                    self.coerce(value, var.ty.kind(), *expr.span())
                }
                _ => Value::default_for(&var.ty),
            }
        };

        self.write_place(&place, value, declaration.span);
        Ok(())
    }

    /// Array extent from a dimension expression; negative sizes become 0.
    fn extent(&mut self, dim: &Expr) -> Eval<usize> {
        let value = self.evaluate_expression(dim)?;
        let size = match value.as_integer() {
            Ok(size) => size,
            Err(error) => {
                self.diagnostics.push(Diagnostic::conversion_error(*dim.span(), error.to_string()));
                0
            }
        };
        if size < 0 {
            self.diagnostics.push(Diagnostic::index_error(
                *dim.span(),
                format!("array size {} is negative; using 0", size),
            ));
            return Ok(0);
        }
        Ok(size as usize)
    }

    /// Store location of a declared variable in the current frame.
    pub(crate) fn variable_place(&mut self, var: &Variable, span: Span) -> Eval<Place> {
        match var.storage {
            Storage::Static => Ok(Place::Stack(var.offset as usize)),
            Storage::Local | Storage::Argument => self.frame_place(var.offset, &var.name, span),
            Storage::RefArgument => {
                let place = self.frame_place(var.offset, &var.name, span)?;
                if let Place::Stack(slot) = place {
                    if let Some(Cell::Slot(alias)) = self.stack.read(slot) {
                        return Ok(alias.clone());
                    }
                }
                Ok(place)
            }
            Storage::Field => match self.this() {
                Some(object) => Ok(Place::Field(object, var.offset as usize)),
                None => Err(self.fatal(span, format!("Field '{}' used outside of an object", var.name))),
            },
        }
    }

    fn frame_place(&mut self, offset: i64, name: &str, span: Span) -> Eval<Place> {
        match self.stack.frame_slot(offset) {
            Some(slot) => Ok(Place::Stack(slot)),
            None => Err(self.fatal(
                span,
                format!("'{}' (offset {}) is outside the current frame", name, offset),
            )),
        }
    }

    pub(crate) fn read_place(&self, place: &Place) -> Option<Value> {
        match place {
            Place::Stack(slot) => match self.stack.read(*slot)? {
                Cell::Direct(value) => Some(value.clone()),
                Cell::Slot(alias) => self.read_place(alias),
            },
            Place::Element(array, offset) => array.borrow().elements.get(*offset).cloned(),
            Place::Field(object, offset) => object.borrow().fields.get(*offset).cloned(),
        }
    }

    pub(crate) fn write_place(&mut self, place: &Place, value: Value, span: Span) {
        let written = match place {
            Place::Stack(slot) => {
                if let Some(Cell::Slot(alias)) = self.stack.read(*slot) {
                    let alias = alias.clone();
                    return self.write_place(&alias, value, span);
                }
                self.stack.write(*slot, Cell::Direct(value))
            }
            Place::Element(array, offset) => match array.borrow_mut().elements.get_mut(*offset) {
                Some(element) => {
                    *element = value;
                    true
                }
                None => false,
            },
            Place::Field(object, offset) => match object.borrow_mut().fields.get_mut(*offset) {
                Some(field) => {
                    *field = value;
                    true
                }
                None => false,
            },
        };
        if !written {
            warn!(line = span.line, ?place, "write to a missing slot");
        }
    }

    /// Convert for storage; a failure is reported and the kind's default is used.
    pub(crate) fn coerce(&mut self, value: Value, kind: Kind, span: Span) -> Value {
        match value.convert_to(kind) {
            Ok(value) => value,
            Err(error) => {
                self.diagnostics.push(Diagnostic::conversion_error(span, error.to_string()));
                Value::default_of_kind(kind)
            }
        }
    }

    pub(crate) fn this(&self) -> Option<ObjectRef> {
        self.calls.last().and_then(|record| record.this.clone())
    }

    pub(crate) fn fatal(&mut self, span: Span, message: String) -> Halt {
        warn!(line = span.line, "{}", message);
        self.diagnostics.push(Diagnostic::fatal(span, message));
        Halt
    }
}

/// How a loop reacts to its body's signal: `None` keeps looping.
fn leave_loop(flow: Flow) -> Option<Flow> {
    match flow {
        Flow::Next | Flow::Continue => None,
        Flow::Break => Some(Flow::Next),
        other => Some(other),
    }
}

/// Execute `program` once against `host`.
pub fn run(program: &Program, host: &mut dyn Host, config: EngineConfig) -> Outcome {
    Interpreter::new(program, host).with_config(config).execute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferHost;

    fn run_source(source: &str) -> (Outcome, Vec<String>) {
        let (program, diagnostics) = crate::parse(source);
        assert!(
            diagnostics.iter().all(|d| !d.is_error()),
            "unexpected parse errors: {:?}",
            diagnostics
        );
        let mut host = BufferHost::new();
        let outcome = run(&program, &mut host, EngineConfig::default());
        (outcome, host.output)
    }

    #[test]
    fn break_leaves_only_the_innermost_loop() {
        let source = "Declare Integer i\n\
                      Declare Integer j\n\
                      For i = 1 To 2\n\
                      For j = 1 To 5\n\
                      If j == 2 Then\n\
                      Break\n\
                      End If\n\
                      Display i, \":\", j\n\
                      End For\n\
                      End For\n";
        let (outcome, output) = run_source(source);
        assert_eq!(outcome.signal, Flow::Next);
        assert_eq!(output, vec!["1:1", "2:1"]);
    }

    #[test]
    fn continue_skips_the_rest_of_the_body() {
        let source = "Declare Integer i\n\
                      For i = 1 To 4\n\
                      If i MOD 2 == 0 Then\n\
                      Continue\n\
                      End If\n\
                      Display i\n\
                      End For\n";
        let (_, output) = run_source(source);
        assert_eq!(output, vec!["1", "3"]);
    }

    #[test]
    fn stop_unwinds_nested_calls() {
        let source = "Module inner()\n\
                      Display \"inner\"\n\
                      Stop\n\
                      End Module\n\
                      Module outer()\n\
                      Call inner()\n\
                      Display \"unreachable\"\n\
                      End Module\n\
                      Call outer()\n\
                      Display \"unreachable\"\n";
        let (outcome, output) = run_source(source);
        assert!(outcome.stopped());
        assert_eq!(output, vec!["inner"]);
        assert!(!outcome.has_errors());
    }

    #[test]
    fn select_runs_first_matching_case() {
        let source = "Declare Integer n = 2\n\
                      Select n\n\
                      Case 1:\n\
                      Display \"one\"\n\
                      Case 2, 3:\n\
                      Display \"two or three\"\n\
                      Default:\n\
                      Display \"other\"\n\
                      End Select\n";
        let (_, output) = run_source(source);
        assert_eq!(output, vec!["two or three"]);
    }

    #[test]
    fn do_loop_runs_body_at_least_once() {
        let source = "Declare Integer n = 10\n\
                      Do\n\
                      Display n\n\
                      Set n = n + 1\n\
                      Loop Until n > 5\n";
        let (_, output) = run_source(source);
        assert_eq!(output, vec!["10"]);
    }

    #[test]
    fn zero_step_skips_the_loop() {
        let source = "Declare Integer i\n\
                      For i = 1 To 3 Step 0\n\
                      Display i\n\
                      End For\n";
        let (outcome, output) = run_source(source);
        assert!(output.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, crate::error::DiagnosticKind::Arithmetic);
    }

    #[test]
    fn requested_stop_halts_before_the_next_statement() {
        let (program, _) = crate::parse("Display \"a\"\nDisplay \"b\"\n");
        let mut host = BufferHost::new();
        let stop = StopHandle::new();
        stop.request_stop();
        let outcome = Interpreter::new(&program, &mut host).with_stop_handle(stop).execute();
        assert!(outcome.stopped());
        assert!(host.output.is_empty());
        assert_eq!(outcome.diagnostics.len(), 1);
    }
}
