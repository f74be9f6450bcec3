//! Typed builders and accessors over the cell store (C3): `cons`,
//! closures, variables, macros, continuations, strings, vectors,
//! structs, bytes.

use crate::cell::{Cell, CellIdx, Tag};
use crate::error::EngineResult;
use crate::store::{bytes_cells, CellStore};

pub fn cons(store: &mut CellStore, car: CellIdx, cdr: CellIdx) -> EngineResult<CellIdx> {
    store.make_cell(Tag::Pair, car, cdr)
}

pub fn car(store: &CellStore, pair: CellIdx) -> CellIdx {
    store.get(pair).car
}

pub fn cdr(store: &CellStore, pair: CellIdx) -> CellIdx {
    store.get(pair).cdr
}

pub fn set_car(store: &mut CellStore, pair: CellIdx, value: CellIdx) {
    let mut cell = store.get(pair);
    cell.car = value;
    store.set(pair, cell);
}

pub fn set_cdr(store: &mut CellStore, pair: CellIdx, value: CellIdx) {
    let mut cell = store.get(pair);
    cell.cdr = value;
    store.set(pair, cell);
}

/// A closure pairs formals+body+environment. Per §4.2's scan rules, a
/// `Closure` cell forwards only `cdr`; this crate stores that single
/// reachable reference as `cdr = cons(formals, cons(body, env))`, so
/// the whole triple is discovered once that one pair is forwarded and
/// the scan loop later reaches its own car/cdr in turn. `car` is an
/// unused descriptor word (reserved for a future closure-name/arity
/// cache).
pub fn make_closure(
    store: &mut CellStore,
    formals: CellIdx,
    body: CellIdx,
    env: CellIdx,
) -> EngineResult<CellIdx> {
    let body_env = cons(store, body, env)?;
    let payload = cons(store, formals, body_env)?;
    store.make_cell(Tag::Closure, 0, payload)
}

pub fn closure_formals(store: &CellStore, closure: CellIdx) -> CellIdx {
    let payload = store.get(closure).cdr;
    car(store, payload)
}

pub fn closure_body(store: &CellStore, closure: CellIdx) -> CellIdx {
    let payload = store.get(closure).cdr;
    let body_env = cdr(store, payload);
    car(store, body_env)
}

pub fn closure_env(store: &CellStore, closure: CellIdx) -> CellIdx {
    let payload = store.get(closure).cdr;
    let body_env = cdr(store, payload);
    cdr(store, body_env)
}

/// An expansion-inserted indirection cell (§4.7): `cdr` is the
/// variable's backing pair (the one `set!` eventually mutates with
/// `set_cdr`), `car` is unused.
pub fn make_variable(store: &mut CellStore, backing_pair: CellIdx) -> EngineResult<CellIdx> {
    store.make_cell(Tag::Variable, 0, backing_pair)
}

pub fn variable_ref(store: &CellStore, variable: CellIdx) -> CellIdx {
    store.get(variable).cdr
}

/// A macro cell: `cdr` is the transformer (a closure), `car` unused.
pub fn make_macro(store: &mut CellStore, transformer: CellIdx) -> EngineResult<CellIdx> {
    store.make_cell(Tag::Macro, 0, transformer)
}

pub fn macro_transformer(store: &CellStore, macro_cell: CellIdx) -> CellIdx {
    store.get(macro_cell).cdr
}

/// Reifies a slice of the explicit stack (§4.7 "call/cc") as a
/// continuation value. `car` holds the saved stack depth (an
/// immediate, not a reference); `cdr` holds a `Vector` snapshot of the
/// frame slots from that depth to the stack's capacity, so multi-shot
/// invocation does not alias the live stack.
pub fn make_continuation(
    store: &mut CellStore,
    saved_depth: CellIdx,
    snapshot: &[CellIdx],
) -> EngineResult<CellIdx> {
    let vector = make_vector_from(store, snapshot)?;
    store.make_cell(Tag::Continuation, saved_depth, vector)
}

pub fn continuation_depth(store: &CellStore, k: CellIdx) -> CellIdx {
    store.get(k).car
}

pub fn continuation_snapshot(store: &CellStore, k: CellIdx) -> Vec<CellIdx> {
    let vector = store.get(k).cdr;
    vector_to_cells(store, vector)
        .into_iter()
        .map(|c| c.car)
        .collect()
}

/// `make_bytes`: a `Bytes` header packing `length` raw bytes plus a
/// defensive NUL into the payload region, per `bytes_cells` (§3, §4.3
/// supplement). Never interpreted as a sequence of tagged cells.
pub fn make_bytes(store: &mut CellStore, data: &[u8]) -> EngineResult<CellIdx> {
    let length = data.len();
    let size = bytes_cells(length) as CellIdx;
    let start = store.alloc(size)?;
    store.set(start, Cell::new(Tag::Bytes, length as CellIdx, 0));
    let dst = store.bytes_ptr(start);
    unsafe {
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, length);
        *dst.add(length) = 0;
    }
    Ok(start)
}

pub fn bytes_len(store: &CellStore, bytes: CellIdx) -> usize {
    store.get(bytes).length() as usize
}

pub fn bytes_data(store: &CellStore, bytes: CellIdx) -> Vec<u8> {
    let length = bytes_len(store, bytes);
    let src = store.bytes_ptr(bytes);
    let mut out = vec![0u8; length];
    unsafe { std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), length) };
    out
}

/// `make_string`: a Scheme string is a `Bytes` cell holding the UTF-8
/// payload directly; there is no separate `String`-tagged wrapper in
/// this crate since nothing besides the bytes needs to be reachable.
pub fn make_string(store: &mut CellStore, s: &str) -> EngineResult<CellIdx> {
    make_bytes(store, s.as_bytes())
}

pub fn string_value(store: &CellStore, string: CellIdx) -> String {
    String::from_utf8_lossy(&bytes_data(store, string)).into_owned()
}

/// `make_vector(n)`: a header cell immediately followed by `n`
/// payload cells, each initialized to a copy of `fill` (§4.3). Payload
/// cells hold full `Cell` copies of their contained value, not
/// indices into it — `vector-ref` simply returns `vector_start + i`,
/// which is itself a valid, independently addressable cell.
pub fn make_vector(store: &mut CellStore, n: CellIdx, fill: Cell) -> EngineResult<CellIdx> {
    let total = 1 + n;
    let start = store.alloc(total)?;
    let payload_start = start + 1;
    store.set(start, Cell::new(Tag::Vector, n, payload_start));
    for i in 0..n {
        store.set(payload_start + i, fill);
    }
    Ok(start)
}

fn make_vector_from(store: &mut CellStore, values: &[CellIdx]) -> EngineResult<CellIdx> {
    let n = values.len() as CellIdx;
    let start = store.alloc(1 + n)?;
    let payload_start = start + 1;
    store.set(start, Cell::new(Tag::Vector, n, payload_start));
    for (i, &v) in values.iter().enumerate() {
        // Store a pointer-shaped cell (car = the referenced index,
        // tag reused from Ref) so the snapshot can be read back as
        // plain indices by `continuation_snapshot`.
        store.set(payload_start + i as CellIdx, Cell::new(Tag::Ref, v, 0));
    }
    Ok(start)
}

pub fn vector_len(store: &CellStore, vector: CellIdx) -> CellIdx {
    store.get(vector).length()
}

pub fn vector_ref(store: &CellStore, vector: CellIdx, i: CellIdx) -> CellIdx {
    store.get(vector).vector_start() + i
}

pub fn vector_set(store: &mut CellStore, vector: CellIdx, i: CellIdx, value: Cell) {
    let slot = store.get(vector).vector_start() + i;
    store.set(slot, value);
}

fn vector_to_cells(store: &CellStore, vector: CellIdx) -> Vec<Cell> {
    let len = vector_len(store, vector);
    let start = store.get(vector).vector_start();
    (0..len).map(|i| store.get(start + i)).collect()
}

/// `make_struct(type, printer, fields)` (§4.3): header cell followed
/// by `2 + fields.len()` payload cells: slot 0 = type descriptor, slot
/// 1 = printer, slots 2.. = fields, each a full `Cell` copy.
pub fn make_struct(
    store: &mut CellStore,
    type_descriptor: Cell,
    printer: Cell,
    fields: &[Cell],
) -> EngineResult<CellIdx> {
    let size = 2 + fields.len() as CellIdx;
    let start = store.alloc(1 + size)?;
    let payload_start = start + 1;
    store.set(start, Cell::new(Tag::Struct, size, payload_start));
    store.set(payload_start, type_descriptor);
    store.set(payload_start + 1, printer);
    for (i, f) in fields.iter().enumerate() {
        store.set(payload_start + 2 + i as CellIdx, *f);
    }
    Ok(start)
}

pub fn struct_type(store: &CellStore, s: CellIdx) -> Cell {
    let start = store.get(s).vector_start();
    store.get(start)
}

pub fn struct_printer(store: &CellStore, s: CellIdx) -> Cell {
    let start = store.get(s).vector_start();
    store.get(start + 1)
}

pub fn struct_field(store: &CellStore, s: CellIdx, i: CellIdx) -> Cell {
    let start = store.get(s).vector_start();
    store.get(start + 2 + i)
}

/// A first-class multiple-values compound (§4.7 "values /
/// call-with-values"): `car` holds the value count as a plain integer
/// descriptor (not a reference — `Values` forwards `cdr` only, §4.2),
/// `cdr` holds the proper list of the values themselves.
pub fn make_values(store: &mut CellStore, count: CellIdx, list: CellIdx) -> EngineResult<CellIdx> {
    store.make_cell(Tag::Values, count, list)
}

pub fn values_count(store: &CellStore, v: CellIdx) -> CellIdx {
    store.get(v).car
}

pub fn values_list(store: &CellStore, v: CellIdx) -> CellIdx {
    store.get(v).cdr
}

/// Exact (fixnum) constructor, used throughout the evaluator and
/// builtins for anything that needs a number cell.
pub fn make_number(store: &mut CellStore, value: i64) -> EngineResult<CellIdx> {
    store.make_cell(Tag::Number, value, 0)
}

pub fn number_value(store: &CellStore, n: CellIdx) -> i64 {
    store.get(n).car
}
