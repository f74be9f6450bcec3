//! The copying garbage collector (C2): a classic Cheney two-space
//! collector operating over cell indices, with broken-heart
//! forwarding and arena growth.

use crate::cell::{Cell, CellIdx, Tag};
use crate::error::{EngineError, EngineResult};
use crate::eval::Engine;
use crate::store::bytes_cells;
use tracing::{debug, trace};

/// `gc_check()` (§4.2 "Safe point"): called before any evaluator step
/// that may allocate. Runs a full collection if headroom is gone.
pub fn gc_check(engine: &mut Engine) -> EngineResult<()> {
    if engine.store.free() + engine.gc_safety > engine.store.arena_size {
        collect(engine)?;
    }
    Ok(())
}

/// `gc()`: pushes a sentinel frame so the collector's own call does
/// not lose an activation record, runs the collection, pops it.
pub fn collect(engine: &mut Engine) -> EngineResult<()> {
    let saved = engine.regs;
    engine.stack.push_frame([0, saved.r0, saved.r1, saved.r2, saved.r3])?;
    let result = collect_inner(engine);
    engine.stack.pop_frame();
    result
}

fn collect_inner(engine: &mut Engine) -> EngineResult<()> {
    let free_before = engine.store.free();
    trace!(free = free_before, arena_size = engine.store.arena_size, "gc start");

    engine.store.open_scratch();

    // Forward every root, in the order named by §4.2 "Roots".
    let r0 = copy(engine, engine.regs.r0);
    let r1 = copy(engine, engine.regs.r1);
    let r2 = copy(engine, engine.regs.r2);
    let r3 = copy(engine, engine.regs.r3);
    engine.regs.r0 = r0;
    engine.regs.r1 = r1;
    engine.regs.r2 = r2;
    engine.regs.r3 = r3;

    // Disjoint field borrows: `store` and `symbols`/`macros`/`ports`
    // are separate fields of `engine`, so this does not re-borrow
    // `engine` as a whole the way a closure over `copy(engine, ..)`
    // would.
    {
        let store = &mut engine.store;
        for v in engine.symbols.values_mut() {
            *v = copy_raw(store, *v);
        }
    }
    {
        let store = &mut engine.store;
        for v in engine.macros.values_mut() {
            *v = copy_raw(store, *v);
        }
    }
    for port in engine.ports.iter_mut() {
        *port = copy_raw(&mut engine.store, *port);
    }
    engine.module = copy(engine, engine.module);

    let live = engine.stack.live_slots_snapshot();
    let forwarded: Vec<CellIdx> = live.iter().map(|&idx| copy(engine, idx)).collect();
    engine.stack.restore_live_slots(&forwarded);

    gc_loop(engine)?;

    let live_after = engine.store.free();
    debug!(
        free_before,
        free_after = live_after,
        arena_size = engine.store.arena_size,
        "gc done"
    );

    if engine.store.arena_size < engine.store.max_arena_size {
        grow_arena(engine);
    } else if live_after > engine.store.jam_size {
        engine.store.grow_jam_to(live_after);
    }

    Ok(())
}

fn grow_arena(engine: &mut Engine) {
    engine.store.grow();
    engine.gc_safety = engine.gc_safety.saturating_mul(2);
}

/// `copy(old) -> new` (§4.2 "Forwarding"). Index 0 is the out-of-band
/// sentinel and is never relocated; cells whose tag's unused field
/// happens to hold a literal 0 (e.g. a `Closure`'s descriptor word)
/// forward it as a no-op rather than corrupting the sentinel slot.
fn copy(engine: &mut Engine, old: CellIdx) -> CellIdx {
    copy_raw(&mut engine.store, old)
}

fn copy_raw(store: &mut crate::store::CellStore, old: CellIdx) -> CellIdx {
    if old == 0 {
        return 0;
    }
    let o = store.get(old);
    if o.tag == Tag::BrokenHeart {
        return o.car;
    }

    let new = store.alloc_scratch(1);
    let mut n = o;

    if o.tag.has_vector_payload() {
        let length = o.length();
        let payload_new = store.alloc_scratch(length);
        n = Cell::new(o.tag, length, payload_new);
        for i in 0..length {
            let src = store.get(o.vector_start() + i);
            store.set_scratch(payload_new + i, src);
        }
    } else if o.tag == Tag::Bytes {
        let length = o.length() as usize;
        let extra = bytes_cells(length) as CellIdx - 1;
        // Payload cells are reserved contiguously right after the
        // header we just reserved, matching the header's own layout.
        for _ in 0..extra {
            store.alloc_scratch(1);
        }
        let src = store.bytes_ptr(old);
        let dst = store.scratch_bytes_ptr(new);
        unsafe { std::ptr::copy_nonoverlapping(src, dst, length + 1) };
    }

    store.set_scratch(new, n);

    let mut old_broken = o;
    old_broken.tag = Tag::BrokenHeart;
    old_broken.car = new;
    store.set(old, old_broken);

    new
}

/// `gc_loop()` (§4.2 "Scan loop"): a single `scan` pointer advances
/// through scratch space, forwarding each cell's live subfields
/// according to its tag, then flips scratch into active.
fn gc_loop(engine: &mut Engine) -> EngineResult<()> {
    let mut scan: CellIdx = 1;

    while scan < engine.store.scratch_free() {
        let s = engine.store.get_scratch(scan);

        if s.tag == Tag::BrokenHeart {
            return Err(EngineError::BrokenHeartDuringScan);
        }

        if s.tag.forwards_both() {
            let forwarded = copy(engine, s.car);
            let mut cur = engine.store.get_scratch(scan);
            cur.car = forwarded;
            engine.store.set_scratch(scan, cur);
        }

        if s.tag.forwards_cdr_only() {
            if s.cdr != 0 {
                let forwarded = copy(engine, s.cdr);
                let mut cur = engine.store.get_scratch(scan);
                cur.cdr = forwarded;
                engine.store.set_scratch(scan, cur);
            }
        } else if s.tag.forwards_both() {
            let forwarded = copy(engine, s.cdr);
            let mut cur = engine.store.get_scratch(scan);
            cur.cdr = forwarded;
            engine.store.set_scratch(scan, cur);
        }

        if s.tag == Tag::Bytes {
            let extra = bytes_cells(s.length() as usize) as CellIdx - 1;
            scan += extra;
        }

        scan += 1;
    }

    engine.store.flip();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constructors::*;

    fn tiny_engine() -> Engine {
        let mut cfg = Config::default();
        cfg.arena_size = 64;
        cfg.jam_size = 64;
        cfg.max_arena_size = 4096;
        cfg.gc_safety = 4;
        cfg.stack_size = 32;
        Engine::new(cfg).unwrap()
    }

    #[test]
    fn collecting_preserves_reachable_pair_chain() {
        let mut e = tiny_engine();
        let a = make_number(&mut e.store, 1).unwrap();
        let b = make_number(&mut e.store, 2).unwrap();
        let p = cons(&mut e.store, a, b).unwrap();
        e.regs.r1 = p;

        collect(&mut e).unwrap();

        let p2 = e.regs.r1;
        assert_eq!(number_value(&e.store, car(&e.store, p2)), 1);
        assert_eq!(number_value(&e.store, cdr(&e.store, p2)), 2);
    }

    #[test]
    fn collecting_preserves_vector_contents() {
        let mut e = tiny_engine();
        let fill = e.store.get(make_number(&mut e.store, 0).unwrap());
        let v = make_vector(&mut e.store, 3, fill).unwrap();
        let seven = make_number(&mut e.store, 7).unwrap();
        let seven_cell = e.store.get(seven);
        vector_set(&mut e.store, v, 1, seven_cell);
        e.regs.r1 = v;

        collect(&mut e).unwrap();

        let v2 = e.regs.r1;
        let slot = vector_ref(&e.store, v2, 1);
        assert_eq!(e.store.get(slot).car, 7);
    }

    #[test]
    fn unreachable_cells_do_not_block_reuse_of_space() {
        let mut e = tiny_engine();
        for i in 0..10 {
            let _ = make_number(&mut e.store, i).unwrap();
        }
        let keep = make_number(&mut e.store, 999).unwrap();
        e.regs.r1 = keep;
        let free_before = e.store.free();
        collect(&mut e).unwrap();
        assert!(e.store.free() < free_before);
        assert_eq!(number_value(&e.store, e.regs.r1), 999);
    }

    #[test]
    fn gc_check_triggers_when_headroom_exhausted() {
        let mut e = tiny_engine();
        while e.store.free() + e.gc_safety <= e.store.arena_size {
            let _ = make_number(&mut e.store, 0).unwrap();
        }
        let before = e.store.free();
        gc_check(&mut e).unwrap();
        assert!(e.store.free() <= before);
    }
}
