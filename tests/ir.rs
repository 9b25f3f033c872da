//! Structural checks on the SSA IR produced for small programs: that the
//! closure-capture scenario actually allocates an environment and a
//! `MakeClosure`, and that basic arithmetic lowers to the expected shape.

use loomc::ir::{ModuleMember, Value};
use loomc::{Compilation, IrModule};

fn compile_ok(src: &str) -> IrModule {
    Compilation::build_ir(src, "test.loom").unwrap_or_else(|d| panic!("expected a clean compile, got: {d:?}"))
}

#[test]
fn closure_over_an_outer_local_allocates_an_environment() {
    let module = compile_ok("func outer() { var b = 2; return func() { b }; }");

    let outer = module
        .members
        .iter()
        .find_map(|m| match m {
            ModuleMember::Function { func, .. } if func.name.is_some() => Some(func),
            _ => None,
        })
        .expect("expected the named `outer` function as a module member");

    let has_env = outer.insts.iter().any(|inst| matches!(inst.value, Value::MakeEnvironment { .. }));
    assert!(has_env, "outer() should allocate an environment for its captured local `b`");

    let has_closure = outer.insts.iter().any(|inst| matches!(inst.value, Value::MakeClosure { .. }));
    assert!(has_closure, "outer() should emit MakeClosure for the returned closure literal");

    let reads_env_arg = module.members.iter().any(|m| match m {
        ModuleMember::Function { func, .. } => func.insts.iter().any(|inst| matches!(inst.value, Value::EnvArg)),
        _ => false,
    });
    assert!(reads_env_arg, "the inner closure should read its incoming environment to reach `b`");
}

#[test]
fn arithmetic_lowers_to_binary_ops_without_phis() {
    let module = compile_ok("var x = -4 ** 2 + 1234 * (2.34 - 1);");
    let ModuleMember::Function { func, .. } = &module.members[0] else {
        panic!("expected a function module member");
    };
    let has_pow = func.insts.iter().any(|inst| matches!(inst.value, Value::BinaryOp(loomc::ast::BinaryOp::Pow, ..)));
    assert!(has_pow, "expected a Pow binary op in the lowered IR");
    // Straight-line arithmetic with no branches needs no phi.
    let has_phi = func.insts.iter().any(|inst| matches!(inst.value, Value::Phi(_)));
    assert!(!has_phi, "straight-line arithmetic should not introduce any phi");
}

#[test]
fn if_else_join_introduces_a_phi() {
    let module = compile_ok("var x = if (true) { 1 } else { 2 };");
    let ModuleMember::Function { func, .. } = &module.members[0] else {
        panic!("expected a function module member");
    };
    let has_phi = func.insts.iter().any(|inst| matches!(inst.value, Value::Phi(_)) || matches!(inst.value, Value::Alias(_)));
    assert!(has_phi, "an if/else with two value branches should join through a phi (or its trivial-phi alias)");
}
