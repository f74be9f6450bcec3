//! The builtin layer (C4): uniform application of host-implemented
//! primitives through a struct-tagged applicable value.
//!
//! A builtin is built by [`make_builtin`] as a `Struct` whose type
//! descriptor is the interned [`WellKnown::BuiltinTag`] marker (see
//! [`crate::eval::is_builtin_struct`]) and whose three fields are
//! `(name, arity, function-index)`, matching §4.4 exactly except that
//! `function-index` indexes `Engine::builtins` rather than casting a
//! raw function pointer (§9's redesign note).

use crate::cell::{Cell, CellIdx, Tag};
use crate::constructors::{
    car, cdr, cons, make_number, make_struct, make_values, number_value, struct_field,
    values_count, values_list,
};
use crate::error::{ConditionKind, EngineResult, SchemeCondition};
use crate::eval::{is_builtin_struct, list_from_cells, BuiltinFn, Engine};
use crate::symbols::WellKnown;

/// `is_builtin(f)`: is `f` a `Struct` carrying the builtin marker?
pub fn is_builtin(engine: &Engine, f: CellIdx) -> bool {
    engine.store.get(f).tag == Tag::Struct && is_builtin_struct(engine, f)
}

fn builtin_name(engine: &Engine, f: CellIdx) -> String {
    let name_cell = struct_field(&engine.store, f, 0);
    crate::constructors::string_value(&engine.store, name_cell.cdr)
}

fn builtin_arity(engine: &Engine, f: CellIdx) -> i64 {
    struct_field(&engine.store, f, 1).car
}

fn builtin_fn_index(engine: &Engine, f: CellIdx) -> usize {
    struct_field(&engine.store, f, 2).car as usize
}

/// Looks up the registered [`BuiltinFn`] variant `f` was built with.
/// Used by [`crate::eval::Engine::begin_apply`] to recognize the three
/// control-transferring primitives before dispatching through
/// [`apply_builtin`], which only ever sees the others.
pub(crate) fn builtin_variant(engine: &Engine, f: CellIdx) -> BuiltinFn {
    engine.builtins[builtin_fn_index(engine, f)]
}

/// Registers `name` under `fn_` with the arity implied by `fn_`'s
/// variant, returning the struct value `eval`/`apply_builtin` operate
/// on. Does not bind it anywhere — callers (the bootstrap driver) are
/// responsible for `environment::define`-ing it into the initial
/// module.
pub fn make_builtin(engine: &mut Engine, name: &str, fn_: BuiltinFn) -> EngineResult<CellIdx> {
    let arity: i64 = match fn_ {
        BuiltinFn::Arity0(_) => 0,
        BuiltinFn::Arity1(_) => 1,
        BuiltinFn::Arity2(_) => 2,
        BuiltinFn::Arity3(_) => 3,
        BuiltinFn::Variadic(_) => -1,
        BuiltinFn::CallCc => 1,
        BuiltinFn::CallWithValues => 2,
        BuiltinFn::Apply => -1,
    };
    let fn_index = engine.builtins.len() as i64;
    engine.builtins.push(fn_);

    let marker_idx = engine.symbols.well_known_cached(WellKnown::BuiltinTag);
    let marker = engine.store.get(marker_idx);
    let name_idx = engine.symbols.intern(&mut engine.store, name)?;
    let name_cell = engine.store.get(name_idx);
    let arity_cell = Cell::new(Tag::Number, arity, 0);
    let fn_index_cell = Cell::new(Tag::Number, fn_index, 0);
    // The struct's slot-1 "printer" field is unused here — printing is
    // out of scope (§1) — so it carries the same marker as a harmless
    // placeholder rather than inventing a second special.
    make_struct(&mut engine.store, marker, marker, &[name_cell, arity_cell, fn_index_cell])
}

/// Unwraps a `values` compound to its first value (§4.4, §9 "Open
/// questions": only the first value of a multiple result is used
/// unless the consumer is `call-with-values`). A zero-value `(values)`
/// unwraps to `*unspecified*`.
pub fn unwrap_first_value(engine: &Engine, v: CellIdx) -> CellIdx {
    if engine.store.get(v).tag != Tag::Values {
        return v;
    }
    if values_count(&engine.store, v) == 0 {
        return engine.unspecified();
    }
    car(&engine.store, values_list(&engine.store, v))
}

fn collect_list(engine: &Engine, mut list: CellIdx) -> Vec<CellIdx> {
    let nil = engine.nil();
    let mut out = Vec::new();
    while list != nil && engine.store.get(list).tag == Tag::Pair {
        out.push(car(&engine.store, list));
        list = cdr(&engine.store, list);
    }
    out
}

/// `apply_builtin(fn, argsList)` (§4.4): unwraps leading `values`
/// arguments, checks the declared arity against the supplied argument
/// count, then dispatches to the registered host function.
pub fn apply_builtin(engine: &mut Engine, f: CellIdx, args: CellIdx) -> EngineResult<CellIdx> {
    let arity = builtin_arity(engine, f);
    let fn_index = builtin_fn_index(engine, f);
    let mut items = collect_list(engine, args);

    if !items.is_empty() && (arity >= 1 || arity == -1) {
        items[0] = unwrap_first_value(engine, items[0]);
    }
    if items.len() > 1 && (arity >= 2 || arity == -1) {
        items[1] = unwrap_first_value(engine, items[1]);
    }

    if arity >= 0 && items.len() as i64 != arity {
        let name_sym = engine.symbols.intern(&mut engine.store, &builtin_name(engine, f))?;
        return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![name_sym, args]).into());
    }

    let func = engine.builtins[fn_index];
    match func {
        BuiltinFn::Arity0(host) => host(engine),
        BuiltinFn::Arity1(host) => host(engine, items[0]),
        BuiltinFn::Arity2(host) => host(engine, items[0], items[1]),
        BuiltinFn::Arity3(host) => host(engine, items[0], items[1], items[2]),
        BuiltinFn::Variadic(host) => {
            let list = list_from_cells(engine, &items)?;
            host(engine, list)
        }
        BuiltinFn::CallCc | BuiltinFn::CallWithValues | BuiltinFn::Apply => {
            unreachable!("begin_apply intercepts these variants before apply_builtin is called")
        }
    }
}

/// `call-with-current-continuation`'s argument check: exactly one
/// procedure argument, unwrapped if it arrived as a `values` compound.
pub(crate) fn call_cc_proc(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let items = collect_list(engine, args);
    if items.len() != 1 {
        let name_sym = engine.symbols.intern(&mut engine.store, "call-with-current-continuation")?;
        return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![name_sym, args]).into());
    }
    Ok(unwrap_first_value(engine, items[0]))
}

/// `call-with-values`'s argument check: exactly a producer and a
/// consumer, either unwrapped if it arrived as a `values` compound.
pub(crate) fn call_with_values_args(engine: &mut Engine, args: CellIdx) -> EngineResult<(CellIdx, CellIdx)> {
    let mut items = collect_list(engine, args);
    if items.len() != 2 {
        let name_sym = engine.symbols.intern(&mut engine.store, "call-with-values")?;
        return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![name_sym, args]).into());
    }
    items[1] = unwrap_first_value(engine, items[1]);
    items[0] = unwrap_first_value(engine, items[0]);
    Ok((items[0], items[1]))
}

/// `apply`: `(apply proc arg1 ... args)` — every argument but the
/// last is passed through as-is; the last must be a list and is
/// spliced onto the assembled argument list. Returns the procedure and
/// the fully-assembled argument list rather than applying it directly,
/// so [`crate::eval::Engine::begin_apply`] can tail-delegate.
pub(crate) fn apply_splice(engine: &mut Engine, args: CellIdx) -> EngineResult<(CellIdx, CellIdx)> {
    let nil = engine.nil();
    if args == nil || engine.store.get(args).tag != Tag::Pair {
        return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![args]).into());
    }
    let proc = unwrap_first_value(engine, car(&engine.store, args));
    let mut rest = cdr(&engine.store, args);
    let mut leading = Vec::new();
    let mut tail = nil;
    while rest != nil {
        if engine.store.get(rest).tag != Tag::Pair {
            break;
        }
        let item = car(&engine.store, rest);
        let next = cdr(&engine.store, rest);
        if next == nil {
            tail = item; // last positional argument is the trailing list
        } else {
            leading.push(item);
        }
        rest = next;
    }
    let mut full = tail;
    for &item in leading.iter().rev() {
        full = cons(&mut engine.store, item, full)?;
    }
    Ok((proc, full))
}

fn require_pair(engine: &Engine, x: CellIdx) -> EngineResult<()> {
    if engine.store.get(x).tag == Tag::Pair {
        Ok(())
    } else {
        Err(SchemeCondition::new(ConditionKind::NotAPair, vec![x]).into())
    }
}

// --- Primitive set (§4.4 "Minimal primitive set") ---

pub fn prim_cons(engine: &mut Engine, a: CellIdx, b: CellIdx) -> EngineResult<CellIdx> {
    cons(&mut engine.store, a, b)
}

pub fn prim_car(engine: &mut Engine, p: CellIdx) -> EngineResult<CellIdx> {
    require_pair(engine, p)?;
    Ok(car(&engine.store, p))
}

pub fn prim_cdr(engine: &mut Engine, p: CellIdx) -> EngineResult<CellIdx> {
    require_pair(engine, p)?;
    Ok(cdr(&engine.store, p))
}

pub fn prim_set_car(engine: &mut Engine, p: CellIdx, v: CellIdx) -> EngineResult<CellIdx> {
    require_pair(engine, p)?;
    crate::constructors::set_car(&mut engine.store, p, v);
    Ok(engine.unspecified())
}

pub fn prim_set_cdr(engine: &mut Engine, p: CellIdx, v: CellIdx) -> EngineResult<CellIdx> {
    require_pair(engine, p)?;
    crate::constructors::set_cdr(&mut engine.store, p, v);
    Ok(engine.unspecified())
}

pub fn prim_pair_p(engine: &mut Engine, x: CellIdx) -> EngineResult<CellIdx> {
    Ok(engine.truth(engine.store.get(x).tag == Tag::Pair))
}

pub fn prim_null_p(engine: &mut Engine, x: CellIdx) -> EngineResult<CellIdx> {
    Ok(engine.truth(x == engine.nil()))
}

/// `eq?` (§3 "Invariants"): index equality, with numbers and
/// characters additionally compared by stored value since this crate
/// does not intern small fixnums.
pub fn prim_eq_p(engine: &mut Engine, a: CellIdx, b: CellIdx) -> EngineResult<CellIdx> {
    Ok(engine.truth(eq(engine, a, b)))
}

fn eq(engine: &Engine, a: CellIdx, b: CellIdx) -> bool {
    if a == b {
        return true;
    }
    let ca = engine.store.get(a);
    let cb = engine.store.get(b);
    match (ca.tag, cb.tag) {
        (Tag::Number, Tag::Number) => ca.car == cb.car,
        (Tag::Char, Tag::Char) => ca.car == cb.car,
        _ => false,
    }
}

/// `equal?`: structural equality over pairs, vectors, and
/// bytes/strings; falls back to `eq?` for everything else.
pub fn prim_equal_p(engine: &mut Engine, a: CellIdx, b: CellIdx) -> EngineResult<CellIdx> {
    Ok(engine.truth(equal(engine, a, b)))
}

fn equal(engine: &Engine, a: CellIdx, b: CellIdx) -> bool {
    if eq(engine, a, b) {
        return true;
    }
    let ca = engine.store.get(a);
    let cb = engine.store.get(b);
    if ca.tag != cb.tag {
        return false;
    }
    match ca.tag {
        Tag::Pair => equal(engine, ca.car, cb.car) && equal(engine, ca.cdr, cb.cdr),
        Tag::Bytes => crate::constructors::bytes_data(&engine.store, a) == crate::constructors::bytes_data(&engine.store, b),
        Tag::Vector => {
            let len = crate::constructors::vector_len(&engine.store, a);
            if len != crate::constructors::vector_len(&engine.store, b) {
                return false;
            }
            (0..len).all(|i| {
                let ea = crate::constructors::vector_ref(&engine.store, a, i);
                let eb = crate::constructors::vector_ref(&engine.store, b, i);
                equal(engine, ea, eb)
            })
        }
        _ => false,
    }
}

pub fn prim_not(engine: &mut Engine, x: CellIdx) -> EngineResult<CellIdx> {
    Ok(engine.truth(engine.is_false(x)))
}

fn numeric_args(engine: &Engine, list: CellIdx) -> EngineResult<Vec<i64>> {
    collect_list(engine, list)
        .into_iter()
        .map(|c| {
            if engine.store.get(c).tag == Tag::Number {
                Ok(number_value(&engine.store, c))
            } else {
                Err(SchemeCondition::new(ConditionKind::WrongTypeArg, vec![c]).into())
            }
        })
        .collect()
}

pub fn prim_add(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nums = numeric_args(engine, args)?;
    make_number(&mut engine.store, nums.iter().sum())
}

pub fn prim_mul(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nums = numeric_args(engine, args)?;
    make_number(&mut engine.store, nums.iter().product())
}

pub fn prim_sub(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nums = numeric_args(engine, args)?;
    let result = match nums.len() {
        0 => 0,
        1 => -nums[0],
        _ => nums[1..].iter().fold(nums[0], |acc, n| acc - n),
    };
    make_number(&mut engine.store, result)
}

pub fn prim_lt(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nums = numeric_args(engine, args)?;
    Ok(engine.truth(nums.windows(2).all(|w| w[0] < w[1])))
}

pub fn prim_num_eq(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nums = numeric_args(engine, args)?;
    Ok(engine.truth(nums.windows(2).all(|w| w[0] == w[1])))
}

/// `values`: zero arguments unwraps to `*unspecified*`, one argument
/// passes through unwrapped (a single value needs no container), two
/// or more build a `Values` compound (§4.7).
pub fn prim_values(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let items = collect_list(engine, args);
    match items.len() {
        0 => Ok(engine.unspecified()),
        1 => Ok(items[0]),
        n => make_values(&mut engine.store, n as CellIdx, args),
    }
}

/// `throw`: the bootstrap-registered default handler (§4.7, §7). When
/// looked up unmodified, [`crate::eval::Engine::eval_top`] treats its
/// struct-tagged (non-closure) value as "still the default" and
/// surfaces the condition to the caller to print and exit on — this
/// primitive exists so `(throw key . args)` called directly from
/// Scheme has somewhere to go, converting its arguments back into the
/// same `EngineError::Condition` shape raised internally.
pub fn prim_throw(engine: &mut Engine, args: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    if args == nil || engine.store.get(args).tag != Tag::Pair {
        return Err(SchemeCondition::new(ConditionKind::SystemError, vec![]).into());
    }
    let key = car(&engine.store, args);
    let rest = cdr(&engine.store, args);
    let kind = condition_kind_for(engine, key);
    Err(SchemeCondition::new(kind, collect_list(engine, rest)).into())
}

/// `append2` (§8 "Round-trip/laws"): a fresh, non-destructive
/// concatenation of `x` in front of `y` — `x` itself is never mutated,
/// matching `mes.c`'s `append2`, which builds a reversed copy of `x`
/// then destructively reverses that copy back onto `y`.
pub fn prim_append2(engine: &mut Engine, x: CellIdx, y: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    if x == nil {
        return Ok(y);
    }
    require_pair(engine, x)?;
    let mut r = nil;
    let mut cur = x;
    while cur != nil {
        r = cons(&mut engine.store, car(&engine.store, cur), r)?;
        cur = cdr(&engine.store, cur);
    }
    Ok(reverse_onto(engine, r, y))
}

/// `reverse!` (§8): destructively reverses the proper list `x`,
/// appending `t` as the new tail, reusing `x`'s own pairs (`mes.c`'s
/// `reverse_x_`: each pair's `cdr` is overwritten to point at the
/// accumulator instead of allocating fresh cons cells).
pub fn prim_reverse_x(engine: &mut Engine, x: CellIdx, t: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    if x != nil {
        require_pair(engine, x)?;
    }
    Ok(reverse_onto(engine, x, t))
}

fn reverse_onto(engine: &mut Engine, mut x: CellIdx, t: CellIdx) -> CellIdx {
    let nil = engine.nil();
    let mut r = t;
    while x != nil {
        let next = cdr(&engine.store, x);
        crate::constructors::set_cdr(&mut engine.store, x, r);
        r = x;
        x = next;
    }
    r
}

/// `pairlis` (§8): builds an alist by consing `(car x . car y)` onto
/// `a` for each corresponding pair of `x`/`y`, recursing down both
/// lists in lockstep; a dotted tail in `x` (not a pair, not `nil`) is
/// consed onto `a` whole, matching `mes.c`'s `pairlis`.
pub fn prim_pairlis(engine: &mut Engine, x: CellIdx, y: CellIdx, a: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    if x == nil {
        return Ok(a);
    }
    if engine.store.get(x).tag != Tag::Pair {
        let pair = cons(&mut engine.store, x, y)?;
        return cons(&mut engine.store, pair, a);
    }
    let rest = prim_pairlis(engine, cdr(&engine.store, x), cdr(&engine.store, y), a)?;
    let pair = cons(&mut engine.store, car(&engine.store, x), car(&engine.store, y))?;
    cons(&mut engine.store, pair, rest)
}

/// `assq` (§8): walks the alist `a` for a pair whose `car` is `eq?` to
/// `x`, returning that pair (not just its value) or `#f`, matching
/// `mes.c`'s `assq`.
pub fn prim_assq(engine: &mut Engine, x: CellIdx, a: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    let mut cur = a;
    while cur != nil && engine.store.get(cur).tag == Tag::Pair {
        let entry = car(&engine.store, cur);
        if engine.store.get(entry).tag == Tag::Pair && eq(engine, car(&engine.store, entry), x) {
            return Ok(entry);
        }
        cur = cdr(&engine.store, cur);
    }
    Ok(engine.truth(false))
}

fn condition_kind_for(engine: &Engine, key: CellIdx) -> ConditionKind {
    let name = if engine.store.get(key).tag == Tag::Symbol {
        crate::constructors::string_value(&engine.store, engine.store.get(key).cdr)
    } else {
        String::new()
    };
    match name.as_str() {
        "not-a-pair" => ConditionKind::NotAPair,
        "unbound-variable" => ConditionKind::UnboundVariable,
        "wrong-number-of-args" => ConditionKind::WrongNumberOfArgs,
        "wrong-type-arg" => ConditionKind::WrongTypeArg,
        _ => ConditionKind::SystemError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::config::Config;
    use crate::reader;

    fn engine() -> Engine {
        let mut e = Engine::new(Config::default()).unwrap();
        bootstrap::init_specials(&mut e).unwrap();
        bootstrap::register_builtins(&mut e).unwrap();
        e
    }

    fn eval_text(e: &mut Engine, text: &str) -> CellIdx {
        let form = reader::read_one(e, text).unwrap();
        let module = e.module;
        e.eval_top(form, module).unwrap()
    }

    #[test]
    fn arithmetic_variadic_primitives() {
        let mut e = engine();
        assert_eq!(number_value(&e.store, eval_text(&mut e, "(+ 1 2 3)")), 6);
        assert_eq!(number_value(&e.store, eval_text(&mut e, "(* 2 3 4)")), 24);
        assert_eq!(number_value(&e.store, eval_text(&mut e, "(- 10 3 2)")), 5);
        assert_eq!(number_value(&e.store, eval_text(&mut e, "(- 5)")), -5);
    }

    #[test]
    fn comparison_primitives() {
        let mut e = engine();
        assert_eq!(eval_text(&mut e, "(< 1 2 3)"), e.symbols.well_known_cached(WellKnown::True));
        assert_eq!(eval_text(&mut e, "(< 1 3 2)"), e.symbols.well_known_cached(WellKnown::False));
        assert_eq!(eval_text(&mut e, "(= 2 2 2)"), e.symbols.well_known_cached(WellKnown::True));
    }

    #[test]
    fn eq_and_equal_distinguish_identity_from_structure() {
        let mut e = engine();
        assert_eq!(eval_text(&mut e, "(eq? 'a 'a)"), e.symbols.well_known_cached(WellKnown::True));
        assert_eq!(
            eval_text(&mut e, "(eq? (cons 1 2) (cons 1 2))"),
            e.symbols.well_known_cached(WellKnown::False)
        );
        assert_eq!(
            eval_text(&mut e, "(equal? (cons 1 2) (cons 1 2))"),
            e.symbols.well_known_cached(WellKnown::True)
        );
    }

    #[test]
    fn apply_splices_leading_args_and_trailing_list() {
        let mut e = engine();
        let v = eval_text(&mut e, "(apply + 1 2 (cons 3 (cons 4 '())))");
        assert_eq!(number_value(&e.store, v), 10);
    }

    #[test]
    fn wrong_arity_on_a_fixed_arity_builtin_raises_condition() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "(car 1 2)").unwrap();
        let module = e.module;
        let err = e.eval(form, module).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Condition(c) if c.kind == ConditionKind::WrongNumberOfArgs
        ));
    }

    #[test]
    fn car_of_non_pair_raises_not_a_pair() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "(car 5)").unwrap();
        let module = e.module;
        let err = e.eval(form, module).unwrap_err();
        assert!(matches!(
            err,
            crate::error::EngineError::Condition(c) if c.kind == ConditionKind::NotAPair
        ));
    }

    fn scheme_list(e: &Engine, mut list: CellIdx) -> Vec<i64> {
        let nil = e.nil();
        let mut out = Vec::new();
        while list != nil {
            out.push(number_value(&e.store, car(&e.store, list)));
            list = cdr(&e.store, list);
        }
        out
    }

    #[test]
    fn prim_append2_builds_a_fresh_non_destructive_concatenation() {
        let mut e = engine();
        let xs = eval_text(&mut e, "'(1 2)");
        let ys = eval_text(&mut e, "'(3 4)");
        let result = prim_append2(&mut e, xs, ys).unwrap();
        assert_eq!(scheme_list(&e, result), vec![1, 2, 3, 4]);
        // x itself must be untouched by the call.
        assert_eq!(scheme_list(&e, xs), vec![1, 2]);
    }

    #[test]
    fn prim_append2_of_nil_returns_y_unchanged() {
        let mut e = engine();
        let nil = e.nil();
        let ys = eval_text(&mut e, "'(1 2 3)");
        let result = prim_append2(&mut e, nil, ys).unwrap();
        assert_eq!(result, ys);
    }

    #[test]
    fn prim_reverse_x_destructively_reverses_onto_a_tail() {
        let mut e = engine();
        let xs = eval_text(&mut e, "'(1 2 3)");
        let tail = eval_text(&mut e, "'(4 5)");
        let result = prim_reverse_x(&mut e, xs, tail).unwrap();
        assert_eq!(scheme_list(&e, result), vec![3, 2, 1, 4, 5]);
    }

    #[test]
    fn reverse_twice_onto_nil_round_trips_the_original_list() {
        let mut e = engine();
        let xs = eval_text(&mut e, "'(1 2 3)");
        let nil = e.nil();
        let once = prim_reverse_x(&mut e, xs, nil).unwrap();
        let twice = prim_reverse_x(&mut e, once, nil).unwrap();
        assert_eq!(scheme_list(&e, twice), vec![1, 2, 3]);
    }

    #[test]
    fn prim_pairlis_and_assq_round_trip_every_key() {
        let mut e = engine();
        let keys = eval_text(&mut e, "'(a b c)");
        let vals = eval_text(&mut e, "'(1 2 3)");
        let nil = e.nil();
        let alist = prim_pairlis(&mut e, keys, vals, nil).unwrap();

        for (name, expected) in [("a", 1), ("b", 2), ("c", 3)] {
            let key = e.symbols.intern(&mut e.store, name).unwrap();
            let found = prim_assq(&mut e, key, alist).unwrap();
            assert_eq!(number_value(&e.store, cdr(&e.store, found)), expected);
        }
    }

    #[test]
    fn assq_of_an_absent_key_returns_false() {
        let mut e = engine();
        let alist = eval_text(&mut e, "(cons (cons 'a 1) '())");
        let missing = e.symbols.intern(&mut e.store, "z").unwrap();
        let result = prim_assq(&mut e, missing, alist).unwrap();
        assert_eq!(result, e.symbols.well_known_cached(WellKnown::False));
    }

    #[test]
    fn scheme_level_append2_reverse_and_pairlis_laws_hold() {
        let mut e = engine();
        // reverse!(reverse!(xs, ()), ()) equals xs.
        let v = eval_text(&mut e, "(reverse! (reverse! '(1 2 3) '()) '())");
        assert_eq!(scheme_list(&e, v), vec![1, 2, 3]);

        // append2(xs, ()) equals xs.
        let v = eval_text(&mut e, "(append2 '(1 2 3) '())");
        assert_eq!(scheme_list(&e, v), vec![1, 2, 3]);

        // pairlis(keys, values, a) then assq(k, ...) yields the matching value.
        eval_text(&mut e, "(define al (pairlis '(x y z) '(10 20 30) '()))");
        for (name, expected) in [("x", 10), ("y", 20), ("z", 30)] {
            let v = eval_text(&mut e, &format!("(cdr (assq '{name} al))"));
            assert_eq!(number_value(&e.store, v), expected);
        }
    }
}
