// Parser robustness tests
//
// Every input, however broken, must parse without panicking into a program
// plus diagnostics. Cases that should succeed must produce no errors; cases
// that should fail must produce at least one, optionally with a given text.

use pseudo::{parse, Diagnostic};

/// Test result for a single test case
#[derive(Debug)]
pub enum TestResult {
    Pass,
    Fail(String),
    Crash(String),
}

/// Individual test case
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub input: String,
    pub should_succeed: bool,
    pub expected_error_contains: Option<String>,
}

/// Test suite containing multiple test cases
#[derive(Debug)]
pub struct TestSuite {
    pub name: String,
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tests: Vec::new(),
        }
    }

    pub fn add_test(&mut self, test: TestCase) {
        self.tests.push(test);
    }

    /// Run all tests in this suite
    pub fn run(&self) -> TestSuiteResults {
        let mut results = TestSuiteResults::new(&self.name);

        println!("Running test suite: {}", self.name);
        println!("{}", "=".repeat(50));

        for test in &self.tests {
            let result = run_single_test(test);
            results.add_result(&test.name, result);
        }

        results.print_summary();
        results
    }
}

/// Results for a test suite run
#[derive(Debug)]
pub struct TestSuiteResults {
    pub suite_name: String,
    pub results: Vec<(String, TestResult)>,
    pub passed: usize,
    pub failed: usize,
    pub crashed: usize,
}

impl TestSuiteResults {
    pub fn new(suite_name: &str) -> Self {
        Self {
            suite_name: suite_name.to_string(),
            results: Vec::new(),
            passed: 0,
            failed: 0,
            crashed: 0,
        }
    }

    pub fn add_result(&mut self, test_name: &str, result: TestResult) {
        match &result {
            TestResult::Pass => {
                self.passed += 1;
                println!("  ✓ {}", test_name);
            }
            TestResult::Fail(msg) => {
                self.failed += 1;
                println!("  ✗ {}: {}", test_name, msg);
            }
            TestResult::Crash(msg) => {
                self.crashed += 1;
                println!("  💥 {}: CRASHED - {}", test_name, msg);
            }
        }
        self.results.push((test_name.to_string(), result));
    }

    pub fn print_summary(&self) {
        println!();
        println!("Test Suite: {} - Summary", self.suite_name);
        println!("{}", "-".repeat(30));
        println!("Passed:  {}", self.passed);
        println!("Failed:  {}", self.failed);
        println!("Crashed: {}", self.crashed);
        println!("Total:   {}", self.results.len());
        println!();
    }

    pub fn is_all_passed(&self) -> bool {
        self.crashed == 0 && self.failed == 0
    }
}

/// Run a single test case
fn run_single_test(test: &TestCase) -> TestResult {
    // Catch any panics to detect crashes
    let result = std::panic::catch_unwind(|| parse(&test.input));

    let (_, diagnostics) = match result {
        Ok(parsed) => parsed,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic".to_string()
            };
            return TestResult::Crash(panic_msg);
        }
    };

    let errors: Vec<&Diagnostic> = diagnostics.iter().filter(|d| d.is_error()).collect();
    match (errors.is_empty(), test.should_succeed) {
        (true, true) => TestResult::Pass,
        (true, false) => TestResult::Fail("Expected an error, but the program parsed cleanly".to_string()),
        (false, true) => TestResult::Fail(format!(
            "Expected a clean parse, but got: {}",
            errors[0].message
        )),
        (false, false) => match &test.expected_error_contains {
            Some(expected) if !errors.iter().any(|e| e.message.contains(expected.as_str())) => {
                let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
                TestResult::Fail(format!(
                    "No error contains '{}'; got {:?}",
                    expected, messages
                ))
            }
            _ => TestResult::Pass,
        },
    }
}

/// Test case builder for convenience
impl TestCase {
    pub fn should_succeed(name: &str, input: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: true,
            expected_error_contains: None,
        }
    }

    pub fn should_fail(name: &str, input: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: false,
            expected_error_contains: None,
        }
    }

    pub fn should_fail_with_message(name: &str, input: &str, expected_msg: &str) -> Self {
        Self {
            name: name.to_string(),
            input: input.to_string(),
            should_succeed: false,
            expected_error_contains: Some(expected_msg.to_string()),
        }
    }
}

// ============================================================================
// Test Suite Creation Functions
// ============================================================================

fn create_malformed_expressions_tests() -> TestSuite {
    let mut suite = TestSuite::new("Malformed Expressions");

    suite.add_test(TestCase::should_fail_with_message(
        "unmatched_opening_paren",
        "Declare Integer x = (1 + 2\n",
        "Expected ')' after the expression",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unmatched_closing_paren",
        "Declare Integer x = 1 + 2)\n",
        "after the end of the statement",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "empty_parentheses",
        "Declare Integer x = ()\n",
        "Expected a value",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_right_operand",
        "Declare Integer x = 1 +\n",
        "Expected a value",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unclosed_index",
        "Declare Integer a[3]\nDisplay a[1\n",
        "Expected ']' after the index",
    ));

    suite.add_test(TestCase::should_fail("unclosed_value_list", "Declare Integer a[3] = [1, 2\n"));

    suite
}

fn create_edge_case_tests() -> TestSuite {
    let mut suite = TestSuite::new("Edge Cases");

    suite.add_test(TestCase::should_succeed("empty_input", ""));
    suite.add_test(TestCase::should_succeed("only_whitespace", "   \n\t  "));
    suite.add_test(TestCase::should_succeed("only_comment", "// nothing to run\n"));

    let deep_parens = format!("Declare Integer x = {}1{}\n", "(".repeat(100), ")".repeat(100));
    suite.add_test(TestCase::should_succeed("deeply_nested_parens", &deep_parens));

    suite.add_test(TestCase::should_fail("lone_end", "End\n"));
    suite.add_test(TestCase::should_fail("stray_else", "Else\nDisplay 1\n"));

    suite
}

fn create_lexical_tests() -> TestSuite {
    let mut suite = TestSuite::new("Lexical Tests");

    suite.add_test(TestCase::should_fail_with_message(
        "unterminated_string",
        "Display \"hello\n",
        "Unterminated string",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unexpected_character",
        "Display 1 @ 2\n",
        "Unexpected character: '@'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "wrong_case_keyword",
        "display 1\n",
        "must be written 'Display'",
    ));

    suite.add_test(TestCase::should_succeed(
        "name_spelled_like_a_keyword",
        "Declare Integer step = 1\nSet step = step + 1\nDisplay step\n",
    ));

    suite.add_test(TestCase::should_succeed("character_literal", "Declare Character c = 'x'\n"));
    suite.add_test(TestCase::should_succeed("real_literal", "Declare Real r = 3.25\n"));

    suite
}

fn create_control_flow_tests() -> TestSuite {
    let mut suite = TestSuite::new("Control Flow Tests");

    suite.add_test(TestCase::should_succeed(
        "valid_if",
        "Declare Integer x = 1\nIf x > 0 Then\nDisplay x\nElse If x < 0 Then\nDisplay 0 - x\nElse\nDisplay 0\nEnd If\n",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "if_missing_then",
        "Declare Integer x = 1\nIf x > 0\nDisplay x\nEnd If\n",
        "Missing 'Then' after the If test",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "if_missing_test",
        "If Then\nDisplay 1\nEnd If\n",
        "Missing test after 'If'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "if_missing_end",
        "Declare Integer x = 1\nIf x > 0 Then\nDisplay x\n",
        "Missing 'End If' for the If on line 2",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "while_missing_test",
        "While\nDisplay 1\nEnd While\n",
        "Missing test after 'While'",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_do_loop",
        "Declare Integer n = 0\nDo\nSet n = n + 1\nLoop Until n > 3\n",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "do_missing_loop",
        "Do\nDisplay 1\n",
        "Missing 'Loop While' or 'Loop Until' for the Do on line 1",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "for_missing_to",
        "Declare Integer i\nFor i = 1 10\nDisplay i\nEnd For\n",
        "Expected 'To' after the start value",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_for_each",
        "Declare Integer a[3] = [1, 2, 3]\nDeclare Integer item\nFor Each item In a\nDisplay item\nEnd For\n",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_select",
        "Declare Integer n = 2\nSelect n\nCase 1:\nDisplay \"one\"\nDefault:\nDisplay \"many\"\nEnd Select\n",
    ));

    suite.add_test(TestCase::should_fail("break_outside_loop", "Break\n"));

    suite
}

fn create_declaration_tests() -> TestSuite {
    let mut suite = TestSuite::new("Declaration Tests");

    suite.add_test(TestCase::should_succeed(
        "valid_declarations",
        "Declare Integer x = 1, y = 2\nDeclare Real values[2][3]\nConstant Integer LIMIT = 10\n",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_declare",
        "Integer x = 5\n",
        "Missing 'Declare' before the variable declaration",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_set",
        "Declare Integer x\nx = 5\n",
        "Missing 'Set' before the assignment",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "assign_to_constant",
        "Constant Integer LIMIT = 3\nSet LIMIT = 4\n",
        "Cannot change the constant 'LIMIT'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "constant_without_value",
        "Constant Integer LIMIT\n",
        "Constant 'LIMIT' needs a value",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "undefined_variable",
        "Display total\n",
        "Undefined variable 'total'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "literal_type_mismatch",
        "Declare Integer x = \"five\"\n",
        "cannot be stored in",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "list_on_scalar",
        "Declare Integer x = [1, 2]\n",
        "A list of values can only initialise an array",
    ));

    suite.add_test(TestCase::should_fail("duplicate_variable", "Declare Integer x\nDeclare Integer x\n"));

    suite.add_test(TestCase::should_fail_with_message(
        "undefined_type",
        "Declare Widget w\n",
        "Undefined type 'Widget'",
    ));

    suite
}

fn create_routine_tests() -> TestSuite {
    let mut suite = TestSuite::new("Routine Tests");

    suite.add_test(TestCase::should_succeed(
        "valid_module_call",
        "Module greet(String who)\nDisplay \"Hi \", who\nEnd Module\nCall greet(\"Ann\")\n",
    ));

    suite.add_test(TestCase::should_succeed(
        "valid_function",
        "Function Integer square(Integer n)\nReturn n * n\nEnd Function\nDisplay square(4)\n",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "missing_call",
        "Module beep()\nEnd Module\nbeep()\n",
        "Missing 'Call' before the routine call",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "ref_argument_not_a_variable",
        "Module bump(Integer Ref n)\nSet n = n + 1\nEnd Module\nCall bump(3)\n",
        "is 'Ref'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "module_returns_value",
        "Module m()\nReturn 1\nEnd Module\n",
        "A Module cannot return a value",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "function_without_return_type",
        "Function half(Integer n)\nReturn n / 2\nEnd Function\n",
        "Missing return type after 'Function'",
    ));

    // Unknown routines may come from the host: a warning, not an error.
    suite.add_test(TestCase::should_succeed("host_routine_call", "Call beep()\n"));

    suite.add_test(TestCase::should_fail_with_message(
        "end_closes_outer_routine",
        "Module m()\nDeclare Integer x = 1\nIf x > 0 Then\nDisplay x\nEnd Module\n",
        "Missing 'End If' for the If on line 3",
    ));

    suite
}

fn create_class_tests() -> TestSuite {
    let mut suite = TestSuite::new("Class Tests");

    suite.add_test(TestCase::should_succeed(
        "valid_class",
        "Class Point\nPrivate Integer x = 0\nPublic Module Point(Integer startX)\nSet x = startX\nEnd Module\nPublic Function Integer getX()\nReturn x\nEnd Function\nEnd Class\nDeclare Point p = New Point(3)\nDisplay p.getX()\n",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "class_inside_module",
        "Module m()\nClass Inner\nEnd Class\nEnd Module\n",
        "Classes must be defined at the top level of the program",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "statement_in_class_body",
        "Class Point\nDisplay 1\nEnd Class\n",
        "Expected a field or method inside Class 'Point'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "method_arity_mismatch",
        "Class Box\nInteger v = 0\nPublic Module put(Integer n)\nSet v = n\nEnd Module\nEnd Class\nDeclare Box b = New Box()\nCall b.put(1, 2)\n",
        "'put' expects 1 argument(s) but 2 were given",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "method_ref_argument_not_a_variable",
        "Class Box\nPublic Module fill(Integer Ref n)\nSet n = 1\nEnd Module\nEnd Class\nDeclare Box b = New Box()\nCall b.fill(3 + 4)\n",
        "must be a variable because parameter 'n' is 'Ref'",
    ));

    suite.add_test(TestCase::should_fail_with_message(
        "unknown_method",
        "Class Box\nInteger v = 0\nEnd Class\nDeclare Box b = New Box()\nCall b.missing()\n",
        "Class 'Box' has no method 'missing'",
    ));

    suite
}

// ============================================================================
// Main Test Function
// ============================================================================

#[test]
fn comprehensive_parser_tests() {
    let suites = vec![
        create_malformed_expressions_tests(),
        create_edge_case_tests(),
        create_lexical_tests(),
        create_control_flow_tests(),
        create_declaration_tests(),
        create_routine_tests(),
        create_class_tests(),
    ];

    let mut failing = Vec::new();
    for suite in suites {
        let results = suite.run();
        if !results.is_all_passed() {
            failing.push(results.suite_name);
        }
    }

    assert!(failing.is_empty(), "suites with failures: {:?}", failing);
}
