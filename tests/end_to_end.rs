//! End-to-end scenarios (SPEC_FULL.md §8) driven through the public
//! `Engine` API, the way this codebase's `tests/test_closures.rs`
//! calls its runtime library directly rather than shelling out to a
//! built binary.

use mes_engine::bootstrap;
use mes_engine::config::Config;
use mes_engine::constructors::number_value;
use mes_engine::error::{ConditionKind, EngineError};
use mes_engine::eval::Engine;
use mes_engine::reader;

fn engine() -> Engine {
    let mut e = Engine::new(Config::default()).unwrap();
    bootstrap::init_specials(&mut e).unwrap();
    bootstrap::register_builtins(&mut e).unwrap();
    e
}

fn run(e: &mut Engine, text: &str) -> i64 {
    let v = bootstrap::run_boot_text(e, text).unwrap();
    number_value(&e.store, v)
}

#[test]
fn scenario_1_lambda_application() {
    let mut e = engine();
    assert_eq!(run(&mut e, "((lambda (x) (+ x 1)) 41)"), 42);
}

#[test]
fn scenario_2_define_set_reference() {
    let mut e = engine();
    assert_eq!(run(&mut e, "(begin (define x 1) (set! x 2) x)"), 2);
}

#[test]
fn scenario_3_call_with_current_continuation() {
    let mut e = engine();
    assert_eq!(
        run(&mut e, "(call-with-current-continuation (lambda (k) (+ 1 (k 7))))"),
        7
    );
}

#[test]
fn scenario_4_define_macro_when() {
    let mut e = engine();
    assert_eq!(
        run(
            &mut e,
            "(define-macro (when c . b) (cons 'if (cons c (cons (cons 'begin b) '(#f))))) (when #t 1 2 3)"
        ),
        3
    );
}

#[test]
fn scenario_5_call_with_values() {
    let mut e = engine();
    assert_eq!(run(&mut e, "(call-with-values (lambda () (values 1 2)) +)"), 3);
}

#[test]
fn scenario_6_car_of_empty_list_raises_and_surfaces_key_and_form() {
    let mut e = engine();
    let form = reader::read_one(&mut e, "(car '())").unwrap();
    let module = e.module;
    let err = e.eval_top(form, module).unwrap_err();
    match err {
        EngineError::Condition(c) => {
            assert!(matches!(c.kind, ConditionKind::NotAPair | ConditionKind::WrongTypeArg))
        }
        other => panic!("expected a surfaced Scheme condition, got {other:?}"),
    }
}

#[test]
fn reverse_append_and_pairlis_laws_hold() {
    let mut e = engine();
    // reverse!(reverse!(xs, ()), ()) == xs; append2(xs, ()) == xs;
    // pairlis(keys, values, a) then assq(k, ...) yields the value
    // paired with every key — calling the registered `reverse!`,
    // `append2`, `pairlis`, and `assq` primitives directly, not a
    // hand-rolled Scheme stand-in for them.
    let text = r#"
        (define xs (cons 1 (cons 2 (cons 3 '()))))
        (define reverse-round-trip (equal? xs (reverse! (reverse! xs '()) '())))
        (define append-identity (equal? xs (append2 xs '())))
        (define al (pairlis '(a b c) '(1 2 3) '()))
        (define pairlis-assq-law
          (if (equal? (cdr (assq 'a al)) 1)
              (if (equal? (cdr (assq 'b al)) 2)
                  (equal? (cdr (assq 'c al)) 3)
                  #f)
              #f))
        (if reverse-round-trip
            (if append-identity pairlis-assq-law #f)
            #f)
    "#;
    let v = bootstrap::run_boot_text(&mut e, text).unwrap();
    assert_eq!(v, e.symbols.well_known_cached(mes_engine::symbols::WellKnown::True));
}

#[test]
fn wrong_number_of_args_law_holds_for_declared_arity() {
    let mut e = engine();
    let form = reader::read_one(&mut e, "((lambda (x y) (+ x y)) 1)").unwrap();
    let module = e.module;
    let err = e.eval_top(form, module).unwrap_err();
    assert!(matches!(err, EngineError::Condition(c) if c.kind == ConditionKind::WrongNumberOfArgs));
}

#[test]
fn boot_file_search_path_is_honored_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let boot_path = dir.path().join("boot-0.scm");
    std::fs::write(&boot_path, "(+ 40 2)").unwrap();

    let mut config = Config::default();
    config.boot = boot_path.to_str().unwrap().to_string();

    let mut e = Engine::new(config).unwrap();
    bootstrap::init_specials(&mut e).unwrap();
    bootstrap::register_builtins(&mut e).unwrap();

    let text = bootstrap::locate_boot_file(&e.config).unwrap();
    let v = bootstrap::run_boot_text(&mut e, &text).unwrap();
    assert_eq!(number_value(&e.store, v), 42);
}

#[test]
fn call_cc_after_allocation_still_reinstates_the_saved_stack() {
    let mut e = engine();
    // Force a handful of allocations between the continuation capture
    // and its invocation so the saved stack slice is exercised against
    // real heap growth, not just a trivial empty stack.
    let text = r#"
        (define saved #f)
        (define (use-some-heap n)
          (if (= n 0) 0 (+ 1 (use-some-heap (- n 1)))))
        (+ 100
           (call-with-current-continuation
             (lambda (k)
               (set! saved k)
               (use-some-heap 20)
               (k 5))))
    "#;
    assert_eq!(run(&mut e, text), 105);
}
