//! Error-path tests: every one of these scripts must fail to compile, with
//! the right classification and a positioned message.

use calculon::{CompilationError, Compiler, ErrorKind, Precision, SymbolTable};

fn compile(signature: &str, script: &str) -> Result<(), CompilationError> {
    Compiler::new(Precision::Double)
        .compile(signature, script, &SymbolTable::standard())
        .map(|_| ())
}

fn fails(script: &str) -> CompilationError {
    compile("(n: real) : (r: real)", script)
        .expect_err(&format!("expected {:?} to fail", script))
}

#[test]
fn test_unknown_identifier() {
    let err = fails("foo");
    assert_eq!(err.kind, ErrorKind::Symbol);
    assert!(err.message.contains("unresolved symbol 'foo'"));
}

#[test]
fn test_unknown_function() {
    let err = fails("frobnicate(n)");
    assert_eq!(err.kind, ErrorKind::Symbol);
}

#[test]
fn test_calling_a_variable() {
    let err = fails("n(1)");
    assert_eq!(err.kind, ErrorKind::Symbol);
    assert!(err.message.contains("not a function"));
}

#[test]
fn test_wrong_arity() {
    let err = fails("let sq(x) = x*x in sq(1, 2)");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("argument"));
}

#[test]
fn test_vector_width_mismatch() {
    let err = fails("{1,2,3} + {1,2}");
    assert_eq!(err.kind, ErrorKind::IntrinsicType);
    assert!(err.message.contains("method +"));
}

#[test]
fn test_vector_ordering_rejected() {
    let err = fails("if {1,2} < {1,2} then 1 else 0");
    assert_eq!(err.kind, ErrorKind::IntrinsicType);
}

#[test]
fn test_zero_width_vector_in_signature() {
    assert!(compile("(v: vector*0) : (r: real)", "1").is_err());
    assert!(compile("(v: vector) : (r: real)", "1").is_err());
}

#[test]
fn test_not_a_single_expression() {
    let err = fails("1 2");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(err.message.contains("end of script"));
}

#[test]
fn test_boolean_not_marshallable() {
    let err = compile("(b: boolean) : (r: real)", "1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_operand_type_errors() {
    // Arithmetic on booleans, negating a boolean, not on a real.
    assert_eq!(fails("true + 1").kind, ErrorKind::IntrinsicType);
    assert_eq!(fails("-(n > 0)").kind, ErrorKind::IntrinsicType);
    assert_eq!(fails("not n").kind, ErrorKind::IntrinsicType);
}

#[test]
fn test_condition_requires_boolean() {
    let err = fails("if n then 1 else 2");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("boolean"));
}

#[test]
fn test_condition_branch_mismatch() {
    let err = fails("if n > 0 then 1 else {1,2}");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("branches"));
}

#[test]
fn test_function_return_type_mismatch() {
    let err = fails("let f(x): vector*2 = x in f(1).x");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("does not return the type"));
}

#[test]
fn test_argument_type_mismatch() {
    let err = fails("let f(v: vector*2) = v.x in f(1)");
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_declared_let_type_mismatch() {
    let err = fails("let v: vector*3 = 1 in n");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("declared as"));
}

#[test]
fn test_subscript_must_be_constant() {
    let err = fails("{1,2}{n}");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("constant"));
}

#[test]
fn test_subscript_out_of_range() {
    let err = fails("{1,2}{5}");
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("out of range"));
}

#[test]
fn test_lane_accessor_needs_width() {
    // z needs at least three lanes; x/y/z only exist on vectors.
    assert_eq!(fails("{1,2}.z").kind, ErrorKind::IntrinsicType);
    assert_eq!(fails("n.x").kind, ErrorKind::IntrinsicType);
}

#[test]
fn test_script_type_must_match_output() {
    let err = compile("(n: real) : (w: vector*2)", "n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
}

#[test]
fn test_multi_output_needs_return() {
    let err = compile("(n: real) : (a: real, b: real)", "n").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.message.contains("return"));
}

#[test]
fn test_output_never_assigned() {
    let err = fails("return");
    assert_eq!(err.kind, ErrorKind::Symbol);
    assert!(err.message.contains("never given a value"));
}

#[test]
fn test_return_only_at_tail() {
    assert!(
        fails("let r = 1 in 1 + return")
            .message
            .contains("end of the script")
    );
    assert!(
        fails("let f(x) = return in f(n)")
            .message
            .contains("end of the script")
    );
    assert!(
        fails("let r = 1 in if n > 0 then return else n")
            .message
            .contains("end of the script")
    );
}

#[test]
fn test_no_cross_function_captures() {
    let err = fails("let y = 1 in let f(x) = x + y in f(n)");
    assert_eq!(err.kind, ErrorKind::Symbol);
    assert!(err.message.contains("nested function"));
}

#[test]
fn test_reading_an_unassigned_output() {
    let err = fails("r + 1");
    assert_eq!(err.kind, ErrorKind::Symbol);
    assert!(err.message.contains("before it has a value"));
}

#[test]
fn test_empty_script() {
    let err = fails("");
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert!(err.message.contains("expected an expression"));
}

#[test]
fn test_errors_carry_positions() {
    let err = fails("let x = 1 in\n  x + foo");
    assert_eq!(err.position.line, 2);
    assert!(err.to_string().starts_with("2:"));
}

#[test]
fn test_malformed_tokens() {
    assert_eq!(fails("1e+").kind, ErrorKind::Lex);
    assert_eq!(fails("n @ 2").kind, ErrorKind::Lex);
}
