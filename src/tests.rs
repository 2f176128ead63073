//! End-to-end scenarios: inference round trips, annotation propagation,
//! lambda signatures, overload narrowing, and reduction.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use crate::expr::{Expr, ExprRef, Literal};
use crate::{Environment, InferError};

fn ty(name: &str) -> ExprRef {
    Expr::type_term(name)
}

fn apply_parts(expr: &ExprRef) -> (ExprRef, ExprRef, ExprRef) {
    match &**expr {
        Expr::Apply {
            function,
            argument,
            higher_order,
        } => (function.clone(), argument.clone(), higher_order.clone()),
        other => panic!("expected an application, got {other}"),
    }
}

fn lambda_parts(expr: &ExprRef) -> (ExprRef, ExprRef, ExprRef) {
    match &**expr {
        Expr::Lambda {
            parameter,
            body,
            higher_order,
        } => (parameter.clone(), body.clone(), higher_order.clone()),
        other => panic!("expected a lambda, got {other}"),
    }
}

fn arrow_parts(expr: &ExprRef) -> (ExprRef, ExprRef) {
    match &**expr {
        Expr::Function {
            parameter, result, ..
        } => (parameter.clone(), result.clone()),
        other => panic!("expected a function type, got {other}"),
    }
}

// `a b` infers to `(a:('0 -> '1) b:'0):'1`: the function side is forced
// into an arrow whose parameter is the argument's type and whose result is
// the application's type.
#[test]
fn application_round_trip() {
    let env = Environment::new();
    let expr = Expr::apply(Expr::variable("a"), Expr::variable("b"));
    let inferred = env.infer(&expr).unwrap();

    let (function, argument, higher_order) = apply_parts(&inferred);
    let (parameter, result) = arrow_parts(&function.higher_order());
    assert_eq!(
        parameter.placeholder_index(),
        argument.higher_order().placeholder_index()
    );
    assert_eq!(
        result.placeholder_index(),
        higher_order.placeholder_index()
    );
    assert!(parameter.placeholder_index().is_some());
    assert!(result.placeholder_index().is_some());
}

// `a:(bool -> _) b` propagates the annotated parameter type onto `b`.
#[test]
fn annotation_propagates_to_the_argument() {
    let env = Environment::new();
    let annotated_fn =
        Expr::variable_with("a", Expr::function_of(ty("bool"), Expr::unspecified()));
    let expr = Expr::apply(annotated_fn, Expr::variable("b"));
    let inferred = env.infer(&expr).unwrap();

    let (function, argument, higher_order) = apply_parts(&inferred);
    assert_eq!(argument.higher_order(), ty("bool"));
    let (parameter, _) = arrow_parts(&function.higher_order());
    assert_eq!(parameter, ty("bool"));
    // The annotated result slot stayed open, so the overall type is still
    // a placeholder.
    assert!(higher_order.placeholder_index().is_some());
}

// `(a -> a):(bool -> _)` infers to `(a:bool -> a:bool):(bool -> bool)`.
#[test]
fn lambda_annotation_propagates_into_the_body() {
    let env = Environment::new();
    let expr = Expr::lambda_with(
        Expr::bound_variable("a", Expr::unspecified()),
        Expr::variable("a"),
        Expr::function_of(ty("bool"), Expr::unspecified()),
    );
    let inferred = env.infer(&expr).unwrap();

    let (parameter, body, higher_order) = lambda_parts(&inferred);
    assert_eq!(parameter.higher_order(), ty("bool"));
    assert_eq!(body.higher_order(), ty("bool"));
    let (ho_parameter, ho_result) = arrow_parts(&higher_order);
    assert_eq!(ho_parameter, ty("bool"));
    assert_eq!(ho_result, ty("bool"));
}

// An unannotated lambda keeps both tower ends linked: the signature arrow
// mentions the same placeholders as parameter and body.
#[test]
fn identity_lambda_links_parameter_and_body() {
    let env = Environment::new();
    let expr = Expr::lambda(
        Expr::bound_variable("x", Expr::unspecified()),
        Expr::variable("x"),
    );
    let inferred = env.infer(&expr).unwrap();

    let (parameter, body, _) = lambda_parts(&inferred);
    assert_eq!(
        parameter.higher_order().placeholder_index(),
        body.higher_order().placeholder_index()
    );
}

#[test]
fn identity_application_reduces_to_the_argument() {
    let env = Environment::new();
    let identity = Expr::lambda(
        Expr::bound_variable("x", Expr::unspecified()),
        Expr::variable("x"),
    );
    let reduced = env
        .reduce(&Expr::apply(identity, Expr::bool_literal(true)))
        .unwrap();
    assert_eq!(reduced, Expr::bool_literal(true));
}

// `(a b) c` has nothing to step: reduction must hit its fixpoint and
// return the chain unchanged instead of rebuilding it forever.
#[test]
fn free_application_chain_reduces_to_itself() {
    let env = Environment::new();
    let expr = Expr::apply(
        Expr::apply(Expr::variable("a"), Expr::variable("b")),
        Expr::variable("c"),
    );
    let reduced = env.reduce(&expr).unwrap();
    assert_eq!(format!("{reduced}"), "(a b) c");
}

// A combination in function position is not callable; the application
// around it must survive reduction instead of looping.
#[test]
fn combination_in_function_position_reduces_to_itself() {
    let env = Environment::new();
    let expr = Expr::apply(Expr::and(ty("bool"), ty("int")), Expr::int_literal(1));
    let reduced = env.reduce(&expr).unwrap();
    assert_eq!(format!("{reduced}"), "(bool && int) 1");
}

// `(x -> y -> x) 1 2` reduces to `1`: the inner binding shadows nothing
// and call-by-name substitution flows through both frames.
#[test]
fn nested_application_reduces_left_outermost() {
    let env = Environment::new();
    let constant = Expr::lambda(
        Expr::bound_variable("x", Expr::unspecified()),
        Expr::lambda(
            Expr::bound_variable("y", Expr::unspecified()),
            Expr::variable("x"),
        ),
    );
    let expr = Expr::apply(
        Expr::apply(constant, Expr::int_literal(1)),
        Expr::int_literal(2),
    );
    let reduced = env.reduce(&expr).unwrap();
    assert_eq!(reduced, Expr::int_literal(1));
}

fn bind_incr_overloads(env: &mut Environment) {
    env.bind(
        "incr",
        Expr::native("incr", Expr::function_of(ty("int"), ty("int")), |arg| {
            match &*arg {
                Expr::Literal {
                    value: Literal::Int(value),
                } => Ok(Expr::int_literal(value + 1)),
                _ => Ok(arg),
            }
        }),
    )
    .unwrap();
    env.bind(
        "incr!",
        Expr::native("incr!", Expr::function_of(ty("string"), ty("string")), |arg| {
            Ok(arg)
        }),
    )
    .unwrap();
    // The second overload of `incr` proper.
    env.bind_with(
        "incr",
        Expr::function_of(ty("string"), ty("string")),
        Expr::native("incr$s", Expr::function_of(ty("string"), ty("string")), |arg| {
            match &*arg {
                Expr::Literal {
                    value: Literal::Str(value),
                } => Ok(Expr::string_literal(&format!("{value}!"))),
                _ => Ok(arg),
            }
        }),
    )
    .unwrap();
}

// Applying an overloaded symbol narrows the candidate set to the single
// overload whose parameter type accepts the argument.
#[test]
fn overloads_narrow_by_argument_type() {
    let mut env = Environment::new();
    bind_incr_overloads(&mut env);
    let expr = Expr::apply(Expr::variable("incr"), Expr::int_literal(1));
    let inferred = env.infer(&expr).unwrap();

    let (function, _, higher_order) = apply_parts(&inferred);
    match &*function {
        Expr::Variable {
            candidates: Some(candidates),
            ..
        } => {
            assert_eq!(candidates.len(), 1);
            assert_eq!(
                candidates[0].higher_order(),
                Expr::function_of(ty("int"), ty("int"))
            );
        }
        other => panic!("expected the overloaded variable, got {other}"),
    }
    assert_eq!(higher_order, ty("int"));
}

#[test]
fn overload_application_reduces_through_the_native() {
    let mut env = Environment::new();
    bind_incr_overloads(&mut env);

    let reduced = env
        .reduce(&Expr::apply(Expr::variable("incr"), Expr::int_literal(41)))
        .unwrap();
    assert_eq!(reduced, Expr::int_literal(42));

    let reduced = env
        .reduce(&Expr::apply(
            Expr::variable("incr"),
            Expr::string_literal("hey"),
        ))
        .unwrap();
    assert_eq!(reduced, Expr::string_literal("hey!"));
}

#[test]
fn unrelated_annotation_fails_to_unify() {
    let env = Environment::new();
    let expr = Expr::apply(
        Expr::variable_with("a", ty("bool")),
        Expr::variable("b"),
    );
    let err = env.infer(&expr).unwrap_err();
    assert!(matches!(err, InferError::CouldNotUnify { .. }));
}

#[test]
fn rebinding_the_same_expression_is_rejected() {
    let mut env = Environment::new();
    env.bind("a", Expr::int_literal(1)).unwrap();
    let err = env.bind("a", Expr::int_literal(1)).unwrap_err();
    assert_eq!(
        err,
        InferError::DuplicateBinding {
            symbol: "a".to_string()
        }
    );
    // A different expression under the same symbol is an overload, not a
    // duplicate.
    env.bind("a", Expr::int_literal(2)).unwrap();
}

#[test]
fn bound_variables_reduce_through_the_environment() {
    let mut env = Environment::new();
    env.bind("answer", Expr::int_literal(42)).unwrap();
    let reduced = env.reduce(&Expr::variable("answer")).unwrap();
    assert_eq!(reduced, Expr::int_literal(42));
}

#[test]
fn algebraic_combinations_reduce_via_the_calculator() {
    let env = Environment::new();
    let expr = Expr::and(ty("bool"), ty("bool"));
    let reduced = env.reduce(&expr).unwrap();
    assert_eq!(reduced, ty("bool"));
}

#[test]
fn pretty_printing_reads_naturally() {
    let lambda = Expr::lambda(
        Expr::bound_variable("x", ty("bool")),
        Expr::variable("x"),
    );
    assert_eq!(format!("{lambda}"), "x -> x");
    let apply = Expr::apply(Expr::variable("f"), Expr::bool_literal(false));
    assert_eq!(format!("{apply}"), "f false");
    let combined = Expr::or(ty("int"), Expr::and(ty("bool"), ty("string")));
    assert_eq!(format!("{combined}"), "int || (bool && string)");
    assert_eq!(format!("{}", Expr::double_literal(1.0)), "1.0");
    assert_eq!(
        crate::annotated(&Expr::bool_literal(true)),
        "true:bool"
    );
}

#[test]
fn inference_is_repeatable_across_sessions() {
    let env = Environment::new();
    let expr = Expr::apply(Expr::variable("a"), Expr::variable("b"));
    let first = env.infer(&expr).unwrap();
    let second = env.infer(&expr).unwrap();
    // Placeholder numbering restarts per session, so both runs agree.
    let (_, first_arg, _) = apply_parts(&first);
    let (_, second_arg, _) = apply_parts(&second);
    assert_eq!(
        first_arg.higher_order().placeholder_index(),
        second_arg.higher_order().placeholder_index()
    );
}

#[test]
fn shared_subtrees_keep_reference_identity_through_reduce() {
    let env = Environment::new();
    let literal = Expr::int_literal(7);
    let reduced = env.reduce(&literal).unwrap();
    assert!(Rc::ptr_eq(&literal, &reduced));
}
