// End-to-end tests: parse a program, run it against an in-memory host and
// check what it printed and which diagnostics it raised.

use pretty_assertions::assert_eq;
use pseudo::{parse, BufferHost, DiagnosticKind, EngineConfig, Interpreter, Outcome, StopHandle, Value};

fn run_with_host(source: &str, host: &mut BufferHost) -> Outcome {
    let (program, diagnostics) = parse(source);
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(errors.is_empty(), "unexpected parse errors: {:#?}", errors);
    Interpreter::new(&program, host).execute()
}

fn run(source: &str) -> (Outcome, Vec<String>) {
    let mut host = BufferHost::new();
    let outcome = run_with_host(source, &mut host);
    (outcome, host.output)
}

fn kinds(outcome: &Outcome) -> Vec<DiagnosticKind> {
    outcome.diagnostics.iter().map(|d| d.kind).collect()
}

#[test]
fn ref_parameters_alias_and_value_parameters_copy() {
    let source = "\
Module change(Integer Ref r, Integer v)
    Set r = r + 10
    Set v = v + 10
End Module
Declare Integer a = 1
Declare Integer b = 1
Call change(a, b)
Display a, \" \", b
";
    let (outcome, output) = run(source);
    assert!(outcome.diagnostics.is_empty(), "{:#?}", outcome.diagnostics);
    assert_eq!(output, vec!["11 1"]);
}

#[test]
fn ref_parameter_can_alias_an_array_element() {
    let source = "\
Module clear(Integer Ref slot)
    Set slot = 0
End Module
Declare Integer values[3] = [5, 6, 7]
Call clear(values[1])
Display values[0], values[1], values[2]
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["507"]);
}

#[test]
fn ref_parameter_passed_on_still_writes_the_callers_variable() {
    let source = "\
Module twice(Integer Ref x)
    Set x = x * 2
End Module
Module relay(Integer Ref y)
    Call twice(y)
    Call twice(y)
End Module
Declare Integer n = 3
Call relay(n)
Display n
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["12"]);
}

#[test]
fn out_of_range_index_reports_once_and_reads_element_zero() {
    let source = "\
Declare Integer a[3] = [1, 2, 3]
Display a[5]
Display \"still running\"
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["1", "still running"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Index]);
}

#[test]
fn nested_initializer_follows_flat_index_order() {
    // Element (i, j) of a [2][3] array lives at i + 2 * j.
    let source = "\
Declare Integer grid[2][3] = [[1, 2, 3], [4, 5, 6]]
Display grid[1][0], grid[0][1], grid[1][2]
";
    let (outcome, output) = run(source);
    assert!(outcome.diagnostics.is_empty(), "{:#?}", outcome.diagnostics);
    assert_eq!(output, vec!["236"]);
}

#[test]
fn too_many_initial_values_are_reported_and_dropped() {
    let source = "\
Declare Integer a[2] = [1, 2, 3]
Display a[0], a[1]
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["12"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Index]);
}

#[test]
fn while_without_test_reports_one_error_and_never_loops() {
    let source = "\
Declare Integer n = 0
While
    Set n = n + 1
End While
Display \"done \", n
";
    let (program, diagnostics) = parse(source);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::Syntax);

    let mut host = BufferHost::new();
    let outcome = Interpreter::new(&program, &mut host).execute();
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(host.output, vec!["done 0"]);
}

#[test]
fn while_false_never_runs_its_body() {
    let (_, output) = run("While False\n    Display \"body\"\nEnd While\nDisplay \"after\"\n");
    assert_eq!(output, vec!["after"]);
}

#[test]
fn parsing_is_deterministic_for_broken_input() {
    let source = "\
Declare Integer x = (1 +
If x > 0
    Display x
Set = 4
While
End Module
";
    let first = parse(source);
    let second = parse(source);
    assert_eq!(first.1, second.1);
    assert_eq!(first.0, second.0);
    assert!(first.1.iter().any(|d| d.is_error()));
}

#[test]
fn recursion_keeps_locals_per_frame() {
    let source = "\
Function Integer fact(Integer n)
    Declare Integer result = 1
    If n > 1 Then
        Set result = n * fact(n - 1)
    End If
    Return result
End Function
Display fact(10)
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["3628800"]);
}

#[test]
fn deep_recursion_within_the_limit_completes() {
    let source = "\
Function Integer countdown(Integer n)
    If n == 0 Then
        Return 0
    End If
    Return 1 + countdown(n - 1)
End Function
Display countdown(200)
";
    let (outcome, output) = run(source);
    assert!(!outcome.stopped());
    assert_eq!(output, vec!["200"]);
}

#[test]
fn declarations_reinitialize_each_time_they_run() {
    let source = "\
Declare Integer i
For i = 1 To 3
    Declare Integer count = 0
    Set count = count + i
    Display count
End For
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["1", "2", "3"]);
}

#[test]
fn for_loop_honours_step_and_counter_changes() {
    let source = "\
Declare Integer i
For i = 10 To 1 Step -4
    Display i
End For
For i = 1 To 10
    Display i
    Set i = i + 4
End For
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["10", "6", "2", "1", "6"]);
}

#[test]
fn for_each_visits_every_element() {
    let source = "\
Declare String names[] = [\"ada\", \"alan\"]
Declare String item
For Each item In names
    Display toUpper(item)
End For
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["ADA", "ALAN"]);
}

#[test]
fn values_display_in_their_canonical_form() {
    let (_, output) = run("Display 1.5 + 1, \" \", 3 > 2, \" \", 7 / 2, \" \", 4.0\n");
    assert_eq!(output, vec!["2.5 True 3 4.0"]);
}

#[test]
fn function_result_converts_to_the_return_type() {
    let source = "\
Function Real half(Integer n)
    Return n / 2
End Function
Display half(7)
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["3.0"]);
}

#[test]
fn division_by_zero_is_reported_and_execution_continues() {
    let source = "\
Declare Integer zero = 0
Declare Integer x = 10 / zero
Display \"x = \", x
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["x = 0"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Arithmetic]);
}

#[test]
fn input_converts_to_the_target_type() {
    let source = "\
Declare Integer n
Input n
Display n + 1
Input n
Display n
Input n
";
    let mut host = BufferHost::with_input(["41", "abc"]);
    let outcome = run_with_host(source, &mut host);
    assert_eq!(host.output, vec!["42", "0"]);
    assert_eq!(
        kinds(&outcome),
        vec![DiagnosticKind::Conversion, DiagnosticKind::Conversion]
    );
}

#[test]
fn stop_ends_the_run_without_errors() {
    let source = "\
Display \"before\"
Stop
Display \"after\"
";
    let (outcome, output) = run(source);
    assert!(outcome.stopped());
    assert!(!outcome.has_errors());
    assert_eq!(output, vec!["before"]);
}

#[test]
fn main_runs_after_top_level_statements() {
    let source = "\
Module main()
    Display \"main\"
End Module
Display \"top\"
";
    let (_, output) = run(source);
    assert_eq!(output, vec!["top", "main"]);

    let (program, _) = parse(source);
    let mut host = BufferHost::new();
    Interpreter::new(&program, &mut host)
        .with_config(EngineConfig::default().with_auto_main(false))
        .execute();
    assert_eq!(host.output, vec!["top"]);
}

#[test]
fn host_supplies_routines_the_program_does_not_define() {
    let mut host = BufferHost::new();
    host.register("triple", |args: &[Value]| match args.first() {
        Some(Value::Integer(n)) => Value::Integer(n * 3),
        _ => Value::Null,
    });
    let outcome = run_with_host("Display triple(14)\n", &mut host);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(host.output, vec!["42"]);
}

#[test]
fn unknown_routine_is_reported_at_run_time() {
    let (outcome, output) = run("Display \"[\", mystery(), \"]\"\n");
    assert_eq!(output, vec!["[Null]"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Semantic]);
}

#[test]
fn host_can_request_a_stop_mid_run() {
    let stop = StopHandle::new();
    let remote = stop.clone();
    let mut host = BufferHost::new();
    host.register("halt", move |_| {
        remote.request_stop();
        Value::Null
    });

    let (program, _) = parse("Display \"one\"\nCall halt()\nDisplay \"two\"\n");
    let outcome = Interpreter::new(&program, &mut host).with_stop_handle(stop).execute();
    assert!(outcome.stopped());
    assert_eq!(host.output, vec!["one"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Fatal]);
}

#[test]
fn routines_can_be_called_by_name_after_a_run() {
    let source = "\
Declare Integer total = 5
Function Integer addTotal(Integer n)
    Return n + total
End Function
";
    let (program, _) = parse(source);
    let mut host = BufferHost::new();
    let mut interpreter = Interpreter::new(&program, &mut host);
    interpreter.execute();

    let outcome = interpreter.call_routine("addTotal", vec![Value::Integer(10)]);
    assert_eq!(outcome.value, Some(Value::Integer(15)));
    assert_eq!(interpreter.global("total"), Some(Value::Integer(5)));

    let missing = interpreter.call_routine("nothing", Vec::new());
    assert_eq!(missing.diagnostics.len(), 1);
}

#[test]
fn objects_share_state_through_references() {
    let source = "\
Class Box
    Integer content = 0
    Public Module put(Integer n)
        Set content = n
    End Module
End Class
Declare Box first = New Box()
Declare Box second = first
Call second.put(9)
Display first.content
";
    let (outcome, output) = run(source);
    assert!(outcome.diagnostics.is_empty(), "{:#?}", outcome.diagnostics);
    assert_eq!(output, vec!["9"]);
}

#[test]
fn oversized_array_is_reported_and_left_empty() {
    let source = "\
Declare Integer n = 4294967296
Declare Integer a[n][n]
Display \"alive \", size(a)
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["alive 0"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Index]);
}

#[test]
fn array_element_limit_comes_from_the_config() {
    let source = "\
Declare Integer grid[100][100]
Set grid[1][1] = 5
Display \"done\"
";
    let (program, _) = parse(source);
    let mut host = BufferHost::new();
    let outcome = Interpreter::new(&program, &mut host)
        .with_config(EngineConfig::default().with_max_array_elements(1000))
        .execute();
    assert_eq!(host.output, vec!["done"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Index, DiagnosticKind::Index]);
}

#[test]
fn deeply_nested_expressions_parse_and_run() {
    let depth = 1000;
    let source = format!("Display {}1{}\n", "(".repeat(depth), ")".repeat(depth));
    let (outcome, output) = run(&source);
    assert!(outcome.diagnostics.is_empty());
    assert_eq!(output, vec!["1"]);

    let source = format!("Display {}False\n", "NOT ".repeat(depth + 1));
    let (_, output) = run(&source);
    assert_eq!(output, vec!["True"]);
}

#[test]
fn fractional_step_on_an_integer_counter_skips_the_loop() {
    let source = "\
Declare Integer i
For i = 1 To 3 Step 0.5
    Display i
End For
Display \"after\"
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["after"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Conversion]);
}

#[test]
fn fractional_step_on_a_real_counter_advances() {
    let source = "\
Declare Real r
For r = 1 To 2 Step 0.5
    Display r
End For
";
    let (outcome, output) = run(source);
    assert!(outcome.diagnostics.is_empty(), "{:#?}", outcome.diagnostics);
    assert_eq!(output, vec!["1.0", "1.5", "2.0"]);
}

#[test]
fn stop_inside_a_loop_unwinds_past_the_loop_and_the_call() {
    let source = "\
Module worker()
    Declare Integer i
    For i = 1 To 5
        If i == 3 Then
            Stop
        End If
        Display i
    End For
    Display \"after loop\"
End Module
Call worker()
Display \"after call\"
";
    let (outcome, output) = run(source);
    assert!(outcome.stopped());
    assert!(!outcome.has_errors());
    assert_eq!(output, vec!["1", "2"]);
}

#[test]
fn negative_index_reports_once_and_uses_element_zero() {
    let source = "\
Declare Integer a[3] = [4, 5, 6]
Display a[-1]
Set a[-2] = 9
Display a[0], a[1]
";
    let (outcome, output) = run(source);
    assert_eq!(output, vec!["4", "95"]);
    assert_eq!(kinds(&outcome), vec![DiagnosticKind::Index, DiagnosticKind::Index]);
}

#[test]
fn duplicate_declaration_still_runs() {
    let source = "\
Declare Integer x = 1
Declare Integer x = 2
Declare Integer y = 3
Display x, \" \", y
";
    let (program, diagnostics) = parse(source);
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].kind, DiagnosticKind::Semantic);

    let mut host = BufferHost::new();
    let outcome = Interpreter::new(&program, &mut host).execute();
    assert!(outcome.diagnostics.is_empty(), "{:#?}", outcome.diagnostics);
    // Later uses bind to the first declaration; the duplicate has its own slot.
    assert_eq!(host.output, vec!["1 3"]);
}
