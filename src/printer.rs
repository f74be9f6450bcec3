//! A minimal textual printer, the inverse of [`crate::reader`].
//!
//! Named as load-bearing scaffolding for the CLI and `MES_DEBUG`
//! diagnostics alongside the reader (SPEC_FULL.md §1), not a spec for
//! surface syntax: it covers exactly the values the reader can produce
//! plus closures/builtins/continuations as opaque `#<...>` tags, and
//! breaks cycles with the `*circular*` marker described in §9 "Design
//! notes" rather than looping forever on a self-referential pair.

use crate::cell::{CellIdx, Tag};
use crate::eval::Engine;
use crate::symbols::WellKnown;
use std::collections::HashSet;

/// Renders `v` as Scheme-readable text where possible (numbers,
/// symbols, strings, proper/dotted lists, `#t`/`#f`, chars), falling
/// back to a `#<tag>` placeholder for values with no surface syntax
/// (closures, builtins, continuations, ports, macros).
pub fn write_value(engine: &Engine, v: CellIdx) -> String {
    let mut seen = HashSet::new();
    write_inner(engine, v, &mut seen)
}

fn write_inner(engine: &Engine, v: CellIdx, seen: &mut HashSet<CellIdx>) -> String {
    let cell = engine.store.get(v);
    match cell.tag {
        Tag::Number => cell.car.to_string(),
        Tag::Char => char_literal(cell.car as u32),
        Tag::Symbol => crate::constructors::string_value(&engine.store, cell.cdr),
        Tag::Bytes | Tag::String => format!("\"{}\"", escape_string(&crate::constructors::string_value(&engine.store, v))),
        Tag::Special => write_special(engine, v),
        Tag::Pair => write_pair(engine, v, seen),
        Tag::Vector => write_vector(engine, v, seen),
        Tag::Closure => "#<closure>".to_string(),
        Tag::Continuation => "#<continuation>".to_string(),
        Tag::Macro => "#<macro>".to_string(),
        Tag::Struct => {
            if crate::builtins::is_builtin(engine, v) {
                "#<primitive-procedure>".to_string()
            } else {
                "#<struct>".to_string()
            }
        }
        Tag::Port => "#<port>".to_string(),
        Tag::Values => {
            let items = collect_list(engine, crate::constructors::values_list(&engine.store, v));
            items.iter().map(|&c| write_inner(engine, c, seen)).collect::<Vec<_>>().join(" ")
        }
        Tag::Variable => write_inner(engine, crate::constructors::variable_ref(&engine.store, v), seen),
        Tag::Keyword => format!("#:{}", crate::constructors::string_value(&engine.store, cell.cdr)),
        Tag::Ref => write_inner(engine, cell.car, seen),
        Tag::Function => "#<function>".to_string(),
        Tag::BrokenHeart => "#<broken-heart>".to_string(),
    }
}

fn collect_list(engine: &Engine, mut list: CellIdx) -> Vec<CellIdx> {
    let nil = engine.nil();
    let mut out = Vec::new();
    while list != nil && engine.store.get(list).tag == Tag::Pair {
        out.push(crate::constructors::car(&engine.store, list));
        list = crate::constructors::cdr(&engine.store, list);
    }
    out
}

fn write_special(engine: &Engine, v: CellIdx) -> String {
    if v == engine.symbols.well_known_cached(WellKnown::Nil) {
        "()".to_string()
    } else if v == engine.symbols.well_known_cached(WellKnown::True) {
        "#t".to_string()
    } else if v == engine.symbols.well_known_cached(WellKnown::False) {
        "#f".to_string()
    } else if v == engine.symbols.well_known_cached(WellKnown::Unspecified) {
        String::new()
    } else if v == engine.symbols.well_known_cached(WellKnown::Undefined) {
        "#<undefined>".to_string()
    } else {
        "#<special>".to_string()
    }
}

/// Prints `(a b c)`/`(a . b)`, substituting `*circular*` (§9) the
/// moment the cdr-chain revisits a pair currently on this call's own
/// path, rather than recursing forever on a self-referential
/// structure. `seen` tracks only pairs on the *current* path (each
/// inserted on entry and removed before returning), not every pair
/// ever printed, so two separate, non-cyclic references to the same
/// shared sub-list are not mistaken for a cycle.
fn write_pair(engine: &Engine, v: CellIdx, seen: &mut HashSet<CellIdx>) -> String {
    if !seen.insert(v) {
        return "*circular*".to_string();
    }
    let nil = engine.nil();
    let mut parts = Vec::new();
    let mut chain = vec![v];
    let mut cur = v;
    let tail = loop {
        let cell = engine.store.get(cur);
        if cell.tag != Tag::Pair {
            break Some(cur);
        }
        parts.push(write_inner(engine, cell.car, seen));
        let next = cell.cdr;
        if engine.store.get(next).tag == Tag::Pair {
            if !seen.insert(next) {
                parts.push("*circular*".to_string());
                break None;
            }
            chain.push(next);
        }
        cur = next;
    };
    for c in &chain {
        seen.remove(c);
    }
    match tail {
        None => format!("({})", parts.join(" ")),
        Some(t) if t == nil => format!("({})", parts.join(" ")),
        Some(t) => format!("({} . {})", parts.join(" "), write_inner(engine, t, seen)),
    }
}

fn write_vector(engine: &Engine, v: CellIdx, seen: &mut HashSet<CellIdx>) -> String {
    let len = crate::constructors::vector_len(&engine.store, v);
    let items: Vec<String> = (0..len)
        .map(|i| write_inner(engine, crate::constructors::vector_ref(&engine.store, v, i), seen))
        .collect();
    format!("#({})", items.join(" "))
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn char_literal(code: u32) -> String {
    match char::from_u32(code) {
        Some(' ') => "#\\space".to_string(),
        Some('\n') => "#\\newline".to_string(),
        Some('\t') => "#\\tab".to_string(),
        Some('\0') => "#\\nul".to_string(),
        Some(c) => format!("#\\{c}"),
        None => format!("#\\x{code:x}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::config::Config;
    use crate::constructors::{cons, make_number};
    use crate::reader;

    fn engine() -> Engine {
        let mut e = Engine::new(Config::default()).unwrap();
        bootstrap::init_specials(&mut e).unwrap();
        bootstrap::register_builtins(&mut e).unwrap();
        e
    }

    #[test]
    fn prints_numbers_and_booleans() {
        let mut e = engine();
        let v = reader::read_one(&mut e, "42").unwrap();
        assert_eq!(write_value(&e, v), "42");
        let t = e.symbols.well_known_cached(WellKnown::True);
        assert_eq!(write_value(&e, t), "#t");
    }

    #[test]
    fn prints_proper_and_dotted_lists() {
        let mut e = engine();
        let v = reader::read_one(&mut e, "(1 2 3)").unwrap();
        assert_eq!(write_value(&e, v), "(1 2 3)");
        let dotted = reader::read_one(&mut e, "(1 . 2)").unwrap();
        assert_eq!(write_value(&e, dotted), "(1 . 2)");
    }

    #[test]
    fn prints_strings_with_escapes() {
        let mut e = engine();
        let v = reader::read_one(&mut e, "\"a\\nb\"").unwrap();
        assert_eq!(write_value(&e, v), "\"a\\nb\"");
    }

    #[test]
    fn circular_pair_prints_marker_instead_of_looping() {
        let mut e = engine();
        let a = make_number(&mut e.store, 1).unwrap();
        let p = cons(&mut e.store, a, 0).unwrap();
        crate::constructors::set_cdr(&mut e.store, p, p);
        let out = write_value(&e, p);
        assert!(out.contains("circular"));
    }
}
