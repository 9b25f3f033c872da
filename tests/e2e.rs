//! End-to-end compiles: each program should make it through parsing,
//! semantic analysis, and SSA construction without diagnostics, or should
//! be rejected for the specific reason named in the test.

use loomc::Compilation;

fn compiles(src: &str) {
    let result = Compilation::compile(src, "test.loom");
    assert!(result.is_ok(), "expected `{src}` to compile cleanly, got: {:?}", result.err());
}

fn rejected(src: &str) {
    let result = Compilation::compile(src, "test.loom");
    assert!(result.is_err(), "expected `{src}` to be rejected");
}

#[test]
fn arithmetic_and_precedence() {
    compiles("var x = -4 ** 2 + 1234 * (2.34 - 1);");
}

#[test]
fn chained_assignment_and_short_circuit() {
    compiles("var a = 0; var b = 0; a = b = 3 && 4;");
}

#[test]
fn tuples_and_destructuring() {
    compiles("var (a, b) = (1, 2); a = b;");
}

#[test]
fn records_and_field_access() {
    compiles("var p = record { x: 1, y: 2 }; var x = p.x;");
}

#[test]
fn optional_chaining_short_circuits() {
    compiles("var m = null; var v = m?.field?[0]?(1);");
}

#[test]
fn control_flow_and_loops() {
    compiles(
        "
        func sum(n) {
            var total = 0;
            for (var i = 0; i < n; i += 1) {
                if (i == 3) { continue; }
                if (i == 7) { break; }
                total += i;
            }
            return total;
        }
        ",
    );
}

#[test]
fn closures_capture_outer_locals_by_reference() {
    compiles(
        "
        func make_counter() {
            var count = 0;
            return func() {
                count += 1;
                return count;
            };
        }
        ",
    );
}

#[test]
fn string_interpolation() {
    compiles("var name = 'loom'; var greeting = \"hello, ${name}!\";");
}

#[test]
fn unresolved_identifier_is_rejected() {
    rejected("print(missing);");
}

#[test]
fn duplicate_declaration_in_same_scope_is_rejected() {
    rejected("var a = 1; var a = 2;");
}

#[test]
fn using_a_valueless_if_in_a_value_context_is_rejected() {
    rejected("var x = 1 + (if (true) { 1 });");
}
