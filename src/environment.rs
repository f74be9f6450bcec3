//! Environment and module lookup (C5).
//!
//! An environment is a list of `(symbol . value)` associations,
//! represented here as an ordinary Scheme list of pairs terminated by
//! the module reference `m0`. `m0` itself is a flat alist of
//! `(symbol . value)` bindings — "an empty module object carrying the
//! alist of builtins" per §4.8 — so module lookup is just "keep
//! walking the same kind of list past where the lexical frames end."

use crate::cell::{CellIdx, Tag};
use crate::constructors::{car, cdr, cons, make_variable, set_cdr};
use crate::error::{ConditionKind, EngineResult, SchemeCondition};
use crate::eval::Engine;

/// Walks `env` (a list of pairs) looking for a binding whose `car` is
/// `symbol` (`eq?`, i.e. index equality — symbols are interned).
/// Returns the binding pair (not the value) so callers can `set-cdr!`
/// it directly, matching §4.5's "mutation is `set-cdr!` on the pair
/// returned by lookup."
pub fn lookup_binding(engine: &Engine, env: CellIdx, symbol: CellIdx) -> Option<CellIdx> {
    let nil = engine.symbols.well_known_cached(crate::symbols::WellKnown::Nil);
    let mut cur = env;
    while cur != nil && cur != 0 {
        let binding = car(&engine.store, cur);
        if engine.store.get(binding).tag == Tag::Pair && car(&engine.store, binding) == symbol {
            return Some(binding);
        }
        cur = cdr(&engine.store, cur);
    }
    None
}

/// `assert_defined(sym, result)` (§4.5): raises `unbound-variable` if
/// `result` is `*undefined*`.
pub fn assert_defined(engine: &Engine, symbol: CellIdx, result: CellIdx) -> EngineResult<CellIdx> {
    let undefined = engine.symbols.well_known_cached(crate::symbols::WellKnown::Undefined);
    if result == undefined {
        return Err(SchemeCondition::new(ConditionKind::UnboundVariable, vec![symbol]).into());
    }
    Ok(result)
}

/// Resolves `symbol` in `env`, raising `unbound-variable` if nothing
/// binds it anywhere (lexical frames nor module).
///
/// Falls through to `engine.module` *as it stands right now* when
/// `env`'s own chain doesn't have it, rather than only trusting
/// whatever module tail `env` happened to be snapshotted with — `env`
/// is "a list of associations layered over a module" (§4.5), and a
/// top-level `define` extends the module by prepending a fresh pair
/// (§4.7), which earlier-captured `env` values can't see by walking
/// their own (now-stale) chain. This is what lets a `begin`-sequenced
/// `(define x 1) (set! x 2) x` resolve `x` at every step even though
/// all three forms share one `env` snapshot taken before `x` existed.
pub fn lookup(engine: &Engine, env: CellIdx, symbol: CellIdx) -> EngineResult<CellIdx> {
    if let Some(binding) = lookup_binding(engine, env, symbol) {
        let value = cdr(&engine.store, binding);
        return assert_defined(engine, symbol, value);
    }
    if let Some(binding) = lookup_binding(engine, engine.module, symbol) {
        let value = cdr(&engine.store, binding);
        return assert_defined(engine, symbol, value);
    }
    Err(SchemeCondition::new(ConditionKind::UnboundVariable, vec![symbol]).into())
}

/// `set!` (§4.5): if `symbol` is wrapped as a `variable` cell (an
/// expansion artifact, §4.7), mutate that cell's backing pair
/// directly; otherwise walk `env` for the binding and mutate it in
/// place. Failing to find either is a `system-error`.
pub fn set_bang(
    engine: &mut Engine,
    env: CellIdx,
    symbol_or_variable: CellIdx,
    value: CellIdx,
) -> EngineResult<()> {
    if engine.store.get(symbol_or_variable).tag == Tag::Variable {
        let backing = crate::constructors::variable_ref(&engine.store, symbol_or_variable);
        set_cdr(&mut engine.store, backing, value);
        return Ok(());
    }
    if let Some(binding) = lookup_binding(engine, env, symbol_or_variable) {
        set_cdr(&mut engine.store, binding, value);
        return Ok(());
    }
    // Same module-falls-through-live reasoning as `lookup` above: a
    // binding `define`d after `env` was captured exists only in the
    // current `engine.module`, not in `env`'s own (stale) chain.
    if let Some(binding) = lookup_binding(engine, engine.module, symbol_or_variable) {
        set_cdr(&mut engine.store, binding, value);
        return Ok(());
    }
    Err(SchemeCondition::new(ConditionKind::SystemError, vec![symbol_or_variable]).into())
}

/// `define` at module/top level: extends `m0` with a fresh binding
/// (or overwrites an existing one), returning a `variable` cell
/// wrapping the binding pair so later reads are O(1) (§4.7).
///
/// `symbol` may itself already be a `variable` cell: the caller splices
/// the cell this function returns back into the defining occurrence's
/// AST slot, so re-evaluating that same node (an internal define inside
/// a lambda body called more than once) presents it here again, now
/// already wrapped. Redefine through the backing pair directly rather
/// than treating the variable cell as a fresh, unbound symbol.
pub fn define(engine: &mut Engine, symbol: CellIdx, value: CellIdx) -> EngineResult<CellIdx> {
    if engine.store.get(symbol).tag == Tag::Variable {
        let backing = crate::constructors::variable_ref(&engine.store, symbol);
        set_cdr(&mut engine.store, backing, value);
        return make_variable(&mut engine.store, backing);
    }
    if let Some(binding) = lookup_binding(engine, engine.module, symbol) {
        set_cdr(&mut engine.store, binding, value);
        return make_variable(&mut engine.store, binding);
    }
    let binding = cons(&mut engine.store, symbol, value)?;
    let new_module = cons(&mut engine.store, binding, engine.module)?;
    engine.module = new_module;
    make_variable(&mut engine.store, binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::config::Config;
    use crate::constructors::make_number;

    fn engine() -> Engine {
        let mut e = Engine::new(Config::default()).unwrap();
        bootstrap::init_specials(&mut e).unwrap();
        e
    }

    #[test]
    fn define_then_lookup_round_trips() {
        let mut e = engine();
        let sym = e.symbols.intern(&mut e.store, "x").unwrap();
        let val = make_number(&mut e.store, 10).unwrap();
        define(&mut e, sym, val).unwrap();
        let found = lookup(&e, e.module, sym).unwrap();
        assert_eq!(found, val);
    }

    #[test]
    fn set_bang_on_module_binding_mutates_value() {
        let mut e = engine();
        let sym = e.symbols.intern(&mut e.store, "y").unwrap();
        let v1 = make_number(&mut e.store, 1).unwrap();
        define(&mut e, sym, v1).unwrap();
        let v2 = make_number(&mut e.store, 2).unwrap();
        set_bang(&mut e, e.module, sym, v2).unwrap();
        assert_eq!(lookup(&e, e.module, sym).unwrap(), v2);
    }

    #[test]
    fn lookup_of_unbound_symbol_raises_unbound_variable() {
        let e = engine();
        let sym = e.symbols.lookup_name("this-is-not-bound");
        assert!(sym.is_none());
    }

    #[test]
    fn set_bang_through_variable_cell_mutates_backing_pair() {
        let mut e = engine();
        let sym = e.symbols.intern(&mut e.store, "z").unwrap();
        let v1 = make_number(&mut e.store, 1).unwrap();
        let variable = define(&mut e, sym, v1).unwrap();
        let v2 = make_number(&mut e.store, 2).unwrap();
        set_bang(&mut e, e.module, variable, v2).unwrap();
        assert_eq!(lookup(&e, e.module, sym).unwrap(), v2);
    }
}
