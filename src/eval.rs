//! The evaluator core (C7): the `Engine` that owns every other
//! component, the register file, the explicit frame stack, and the
//! `eval`/`apply` entry points.
//!
//! The distilled contract (§4.7) describes a single loop dispatching on
//! a continuation tag held in `r3` until the tag is `vm_return`, with
//! `r0`/`r1`/`r2` carrying the environment/value/auxiliary state and
//! every suspended non-tail evaluation reified as a five-slot frame on
//! the explicit, GC-scanned stack. [`Engine::run`] is exactly that
//! loop: it holds no Rust-level recursion for Scheme control flow at
//! all. `r3` only ever holds `vm_eval` or `vm_return` between
//! iterations — applying a procedure (`vm_apply`/`vm_apply2` in §4.7's
//! terms) is resolved to one or the other immediately, inside
//! [`Engine::begin_apply`], rather than kept as a third loop state, the
//! same way `call/cc` is folded into ordinary application rather than
//! given its own loop state. Tail position (the body of an applied
//! closure, the chosen branch of `if`, the last form of a `begin`) is a
//! direct register rewrite — `self.regs` is updated and the loop
//! continues, so `self.stack` provably does not grow across a tail call
//! (§8). Every non-tail sub-evaluation (operator/operand positions,
//! `if`'s test, all but the last form of a `begin`, a `define`/`set!`
//! value expression, a macro transformer application,
//! `call-with-values`'s producer) pushes one frame tagged with the
//! `VmTag` naming what to do with the value once it comes back, and
//! [`Engine::resume_frame`] resumes by popping and matching that tag.
//!
//! Because the frame stack — not the Rust call stack — is the only
//! record of "what happens next", `call/cc` (§4.7, §5) is genuinely
//! re-enterable: capturing a continuation snapshots `self.stack`
//! (`Stack::snapshot`), and invoking it at any later point, in or out
//! of the capturing call's dynamic extent, replaces `self.stack` with
//! that snapshot and resumes the loop (`Stack::restore`) — there is no
//! Rust call frame to resume, so none needs to still exist. `gc_check`
//! runs once per iteration of this loop rather than once per recursive
//! `eval` call as in an earlier revision of this module; every value
//! live across that check is therefore always exactly what
//! `self.regs` holds plus whatever is already pushed onto
//! `self.stack`, both of which [`crate::gc`] forwards unconditionally
//! — no intermediate Rust local ever needs separate rooting.
//!
//! See DESIGN.md for the grounding of this design in the corpus.

use crate::cell::{CellIdx, Tag};
use crate::config::Config;
use crate::constructors::{car, cdr, closure_body, closure_env, closure_formals, cons, make_closure, set_car, struct_type, values_list, variable_ref};
use crate::error::{ConditionKind, EngineError, EngineResult, SchemeCondition};
use crate::macros::MacroTable;
use crate::store::CellStore;
use crate::symbols::{SymbolTable, VmTag, WellKnown};
use crate::{builtins, environment, gc};

/// The four machine registers (§4.7). `Copy` so the collector can save
/// and restore them by value around a collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registers {
    pub r0: CellIdx,
    pub r1: CellIdx,
    pub r2: CellIdx,
    pub r3: CellIdx,
}

/// One activation record (§4.7: "exactly five slots"). This crate uses
/// the slots as `[unused, saved env, saved aux, second aux, next tag]`
/// rather than literally `(procedure, r0, r1, r2, r3)` — see the module
/// doc comment and DESIGN.md; the shape (five `CellIdx` words, pushed
/// and popped as a unit, scanned whole by the collector) is unchanged.
pub type Frame = [CellIdx; Stack::FRAME_SIZE];

/// The explicit stack of activation frames (§4.7). Every slot is a
/// cell-index and is therefore a GC root while it is live.
pub struct Stack {
    frames: Vec<Frame>,
    capacity: usize,
}

impl Stack {
    pub const FRAME_SIZE: usize = 5;

    pub fn new(capacity: usize) -> Self {
        Stack { frames: Vec::new(), capacity }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push_frame(&mut self, frame: Frame) -> EngineResult<()> {
        if self.frames.len() >= self.capacity {
            return Err(EngineError::StackOverflow);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("pop_frame on empty stack")
    }

    /// Every live slot, oldest frame first — the root set the
    /// collector forwards (§4.2 "Roots").
    pub fn live_slots_snapshot(&self) -> Vec<CellIdx> {
        self.frames.iter().flatten().copied().collect()
    }

    /// Writes forwarded values back into the same slot positions
    /// `live_slots_snapshot` read them from. Panics if the length
    /// doesn't match — the collector never changes frame count.
    pub fn restore_live_slots(&mut self, values: &[CellIdx]) {
        let mut it = values.iter();
        for frame in self.frames.iter_mut() {
            for slot in frame.iter_mut() {
                *slot = *it.next().expect("restore_live_slots length mismatch");
            }
        }
    }

    /// `call/cc`'s capture: the whole stack, flattened, independent of
    /// frame boundaries (a continuation's snapshot is stored as a
    /// `Vector` of plain cell-indices, see [`crate::constructors::make_continuation`]).
    pub fn snapshot(&self) -> Vec<CellIdx> {
        self.live_slots_snapshot()
    }

    /// `call/cc`'s resume: rebuilds `frames` from a flat snapshot,
    /// discarding whatever the stack held before.
    pub fn restore(&mut self, values: &[CellIdx]) {
        assert!(values.len() % Self::FRAME_SIZE == 0, "continuation snapshot length must be a multiple of the frame size");
        self.frames = values
            .chunks(Self::FRAME_SIZE)
            .map(|c| [c[0], c[1], c[2], c[3], c[4]])
            .collect();
    }
}

/// One registered host primitive (§4.4 "Host function registry"). A
/// separate variant per fixed arity plus one variadic variant, so
/// dispatch never needs an unchecked cast of function pointers (§9).
///
/// `CallCc`, `CallWithValues`, and `Apply` carry no function pointer:
/// unlike every other primitive, these three don't just compute a
/// value and return it — they transfer control to another procedure
/// (§4.7 `vm_call_with_current_continuation2`/`vm_call_with_values2`/
/// `vm_apply`), so [`Engine::run`] recognizes and dispatches them
/// directly rather than calling through `apply_builtin`.
#[derive(Clone, Copy)]
pub enum BuiltinFn {
    Arity0(fn(&mut Engine) -> EngineResult<CellIdx>),
    Arity1(fn(&mut Engine, CellIdx) -> EngineResult<CellIdx>),
    Arity2(fn(&mut Engine, CellIdx, CellIdx) -> EngineResult<CellIdx>),
    Arity3(fn(&mut Engine, CellIdx, CellIdx, CellIdx) -> EngineResult<CellIdx>),
    Variadic(fn(&mut Engine, CellIdx) -> EngineResult<CellIdx>),
    CallCc,
    CallWithValues,
    Apply,
}

/// The single owned value (§5 "Process-globals as an owned value")
/// holding the cell store, registers, stack, tables, and config for
/// one process run. Exactly one exists per invocation.
pub struct Engine {
    pub store: CellStore,
    pub regs: Registers,
    pub stack: Stack,
    pub symbols: SymbolTable,
    pub macros: MacroTable,
    pub ports: Vec<CellIdx>,
    pub module: CellIdx,
    pub gc_safety: CellIdx,
    pub config: Config,
    pub builtins: Vec<BuiltinFn>,
}

impl Engine {
    pub fn new(config: Config) -> EngineResult<Self> {
        let store = CellStore::new(config.arena_size, config.jam_size, config.max_arena_size);
        // `config.stack_size` is a slot count (§4.7/§7's "stack overflow
        // (g_stack < 5)"), five slots per frame, so the frame-count
        // capacity is that divided by the frame width.
        let stack = Stack::new((config.stack_size / Stack::FRAME_SIZE as CellIdx) as usize);
        Ok(Engine {
            store,
            regs: Registers::default(),
            stack,
            symbols: SymbolTable::new(),
            macros: MacroTable::new(),
            ports: Vec::new(),
            module: 0,
            gc_safety: config.gc_safety,
            config,
            builtins: Vec::new(),
        })
    }

    pub(crate) fn nil(&self) -> CellIdx {
        self.symbols.well_known_cached(WellKnown::Nil)
    }

    pub(crate) fn unspecified(&self) -> CellIdx {
        self.symbols.well_known_cached(WellKnown::Unspecified)
    }

    pub(crate) fn is_false(&self, v: CellIdx) -> bool {
        v == self.symbols.well_known_cached(WellKnown::False)
    }

    pub(crate) fn truth(&self, b: bool) -> CellIdx {
        if b {
            self.symbols.well_known_cached(WellKnown::True)
        } else {
            self.symbols.well_known_cached(WellKnown::False)
        }
    }

    /// Reads a list's symbol head, for special-form dispatch. Returns
    /// `None` for anything that isn't `(symbol . rest)`.
    fn head_name(&self, expr: CellIdx) -> Option<String> {
        if self.store.get(expr).tag != Tag::Pair {
            return None;
        }
        let head = car(&self.store, expr);
        if self.store.get(head).tag != Tag::Symbol {
            return None;
        }
        Some(crate::constructors::string_value(&self.store, self.store.get(head).cdr))
    }

    /// `eval(expr, env)` (§4.7): seeds the registers with `vm_eval` and
    /// runs the loop to `vm_return`.
    pub fn eval(&mut self, expr: CellIdx, env: CellIdx) -> EngineResult<CellIdx> {
        self.regs.r0 = env;
        self.regs.r1 = expr;
        self.regs.r2 = 0;
        self.regs.r3 = self.symbols.vm_tag_cached(VmTag::Eval);
        self.run()
    }

    /// Applies `f` to already-evaluated `args` (a proper list, or the
    /// dotted tail produced by an improper argument-position list).
    /// Seeds the registers via [`Engine::begin_apply`] (whose one step
    /// resolves immediately to either `vm_eval` — a closure's body, in
    /// tail position — or `vm_return`) and runs the loop to
    /// `vm_return`. Used by host call sites (`eval_top`'s `throw`
    /// dispatch) and, indirectly, by `eval`'s non-tail application.
    pub fn apply(&mut self, f: CellIdx, args: CellIdx) -> EngineResult<CellIdx> {
        self.begin_apply(f, args)?;
        self.run()
    }

    /// The evaluator loop (§4.7 "single loop ... until vm_return"). No
    /// Rust-level recursion for Scheme control flow: every step either
    /// rewrites `self.regs` in place (tail position) or pushes one
    /// frame and rewrites `self.regs` to evaluate the pending
    /// sub-expression, returning control to the top of this loop
    /// either way. `gc::gc_check` runs exactly once per iteration, with
    /// every live value already in `self.regs` or `self.stack` — see
    /// the module doc comment.
    fn run(&mut self) -> EngineResult<CellIdx> {
        loop {
            gc::gc_check(self)?;
            let vm_return = self.symbols.vm_tag_cached(VmTag::Return);
            if self.regs.r3 == vm_return {
                if self.stack.depth() == 0 {
                    return Ok(self.regs.r1);
                }
                self.resume_frame()?;
            } else {
                self.step_eval()?;
            }
        }
    }

    fn return_value(&mut self, value: CellIdx) {
        self.regs.r1 = value;
        self.regs.r3 = self.symbols.vm_tag_cached(VmTag::Return);
    }

    fn tail_eval(&mut self, env: CellIdx, expr: CellIdx) {
        self.regs.r0 = env;
        self.regs.r1 = expr;
        self.regs.r3 = self.symbols.vm_tag_cached(VmTag::Eval);
    }

    /// One `vm_eval` step: dispatches on `self.regs.r1` (the pending
    /// expression) under `self.regs.r0` (the current environment).
    /// Non-tail sub-expressions push a frame tagged with the `VmTag`
    /// naming how [`Engine::resume_frame`] should continue once the
    /// value comes back; tail sub-expressions call [`Engine::tail_eval`]
    /// directly, pushing nothing, so `self.stack`'s depth reflects only
    /// pending (not-yet-returned) evaluations (§8).
    fn step_eval(&mut self) -> EngineResult<()> {
        let env = self.regs.r0;
        let expr = self.regs.r1;
        let cell = self.store.get(expr);
        match cell.tag {
            Tag::Symbol => {
                let v = environment::lookup(self, env, expr)?;
                self.return_value(v);
                return Ok(());
            }
            Tag::Variable => {
                let v = variable_ref(&self.store, expr);
                self.return_value(v);
                return Ok(());
            }
            Tag::Pair => {}
            _ => {
                // self-evaluating: numbers, strings, #t/#f, vectors, closures, ...
                self.return_value(expr);
                return Ok(());
            }
        }

        match self.head_name(expr).as_deref() {
            Some("quote") => {
                let v = car(&self.store, cdr(&self.store, expr));
                self.return_value(v);
            }
            Some("if") => {
                let rest = cdr(&self.store, expr);
                let test_expr = car(&self.store, rest);
                let branches = cdr(&self.store, rest);
                let then_expr = car(&self.store, branches);
                let else_tail = cdr(&self.store, branches);
                let tag = self.symbols.vm_tag_cached(VmTag::If);
                self.stack.push_frame([tag, env, then_expr, else_tail, 0])?;
                self.tail_eval(env, test_expr);
            }
            Some("begin") => {
                let body = cdr(&self.store, expr);
                self.begin_step(env, body)?;
            }
            Some("lambda") => {
                let rest = cdr(&self.store, expr);
                let formals = car(&self.store, rest);
                let body = cdr(&self.store, rest);
                let begin_sym = self.symbols.intern(&mut self.store, "begin")?;
                let body_form = cons(&mut self.store, begin_sym, body)?;
                let closure = make_closure(&mut self.store, formals, body_form, env)?;
                self.return_value(closure);
            }
            Some("define") => {
                let rest = cdr(&self.store, expr);
                let target = car(&self.store, rest);
                let value_forms = cdr(&self.store, rest);
                if self.store.get(target).tag == Tag::Pair {
                    // (define (name . formals) body...) sugar.
                    let name = car(&self.store, target);
                    let formals = cdr(&self.store, target);
                    let begin_sym = self.symbols.intern(&mut self.store, "begin")?;
                    let body_form = cons(&mut self.store, begin_sym, value_forms)?;
                    let closure = make_closure(&mut self.store, formals, body_form, env)?;
                    let variable = environment::define(self, name, closure)?;
                    // Splice the variable cell into the defining occurrence
                    // (target's car holds `name`) so a later re-evaluation of
                    // this same `(define (name . formals) ...)` node finds
                    // the fast-path `Tag::Variable` instead of the bare
                    // symbol, mirroring GNU Mes's `CAR(x) = make_variable_(v)`.
                    set_car(&mut self.store, target, variable);
                    let v = self.unspecified();
                    self.return_value(v);
                } else {
                    let value_expr = if value_forms == self.nil() { self.unspecified() } else { car(&self.store, value_forms) };
                    let tag = self.symbols.vm_tag_cached(VmTag::EvalDefine);
                    self.stack.push_frame([tag, env, target, rest, 0])?;
                    self.tail_eval(env, value_expr);
                }
            }
            Some("set!") => {
                let rest = cdr(&self.store, expr);
                let target = car(&self.store, rest);
                let value_expr = car(&self.store, cdr(&self.store, rest));
                let tag = self.symbols.vm_tag_cached(VmTag::EvalSetX);
                self.stack.push_frame([tag, env, target, 0, 0])?;
                self.tail_eval(env, value_expr);
            }
            Some("define-macro") => {
                let rest = cdr(&self.store, expr);
                let target = car(&self.store, rest);
                let body = cdr(&self.store, rest);
                let name = car(&self.store, target);
                let formals = cdr(&self.store, target);
                let begin_sym = self.symbols.intern(&mut self.store, "begin")?;
                let body_form = cons(&mut self.store, begin_sym, body)?;
                let transformer = make_closure(&mut self.store, formals, body_form, env)?;
                let macro_cell = crate::constructors::make_macro(&mut self.store, transformer)?;
                let name_str = crate::constructors::string_value(&self.store, self.store.get(name).cdr);
                self.macros.set(&name_str, macro_cell);
                let v = self.unspecified();
                self.return_value(v);
            }
            _ => {
                // Macro invocation: the head symbol (if any) has a
                // macro binding. Expand by applying the transformer to
                // the unevaluated argument list (not a typo: macro
                // arguments are passed as literal forms, never
                // evaluated), then evaluate the result in place (§4.7
                // "vm_begin_expand").
                if let Some(name) = self.head_name(expr) {
                    if let Some(macro_cell) = self.macros.get(&name) {
                        let transformer = crate::constructors::macro_transformer(&self.store, macro_cell);
                        let args = cdr(&self.store, expr);
                        let tag = self.symbols.vm_tag_cached(VmTag::MacroExpand);
                        self.stack.push_frame([tag, env, 0, 0, 0])?;
                        self.begin_apply(transformer, args)?;
                        return Ok(());
                    }
                }

                // Ordinary application: evaluate the operator first
                // (non-tail), remembering the unevaluated argument
                // list in the frame so `resume_frame` can start
                // evaluating operands once the operator's value comes
                // back.
                let head = car(&self.store, expr);
                let args_expr = cdr(&self.store, expr);
                let tag = self.symbols.vm_tag_cached(VmTag::EvalCheckFunc);
                self.stack.push_frame([tag, env, args_expr, 0, 0])?;
                self.tail_eval(env, head);
            }
        }
        Ok(())
    }

    /// Shared tail of `begin` and of `Begin`-frame resumption: evaluates
    /// `body`'s first form, pushing a `Begin` frame remembering the
    /// rest unless this is the last form (true tail position).
    fn begin_step(&mut self, env: CellIdx, body: CellIdx) -> EngineResult<()> {
        if body == self.nil() {
            let v = self.unspecified();
            self.return_value(v);
            return Ok(());
        }
        let form = car(&self.store, body);
        let rest = cdr(&self.store, body);
        if rest == self.nil() {
            self.tail_eval(env, form);
        } else {
            let tag = self.symbols.vm_tag_cached(VmTag::Begin);
            self.stack.push_frame([tag, env, rest, 0, 0])?;
            self.tail_eval(env, form);
        }
        Ok(())
    }

    /// Dispatches a `vm_return` whose value is meant for the frame on
    /// top of the stack, matching the popped frame's tag (slot 0)
    /// against each `VmTag` this evaluator pushes frames for.
    fn resume_frame(&mut self) -> EngineResult<()> {
        let frame = self.stack.pop_frame();
        let value = self.regs.r1;
        let tag = frame[0];

        if tag == self.symbols.vm_tag_cached(VmTag::If) {
            let env = frame[1];
            let then_expr = frame[2];
            let else_tail = frame[3];
            if !self.is_false(value) {
                self.tail_eval(env, then_expr);
            } else if self.store.get(else_tail).tag == Tag::Pair {
                let branch = car(&self.store, else_tail);
                self.tail_eval(env, branch);
            } else {
                let v = self.unspecified();
                self.return_value(v);
            }
        } else if tag == self.symbols.vm_tag_cached(VmTag::Begin) {
            let env = frame[1];
            let rest = frame[2];
            self.begin_step(env, rest)?;
        } else if tag == self.symbols.vm_tag_cached(VmTag::EvalDefine) {
            let target = frame[2];
            let rest = frame[3];
            let variable = environment::define(self, target, value)?;
            // Splice the variable cell back into `rest`'s car (the pair
            // that held the bare symbol at this defining occurrence) so a
            // later re-evaluation of this same `(define target ...)` node
            // hits the `Tag::Variable` fast path instead of an alist walk.
            set_car(&mut self.store, rest, variable);
            let v = self.unspecified();
            self.return_value(v);
        } else if tag == self.symbols.vm_tag_cached(VmTag::EvalSetX) {
            let env = frame[1];
            let target = frame[2];
            environment::set_bang(self, env, target, value)?;
            let v = self.unspecified();
            self.return_value(v);
        } else if tag == self.symbols.vm_tag_cached(VmTag::MacroExpand) {
            let env = frame[1];
            self.tail_eval(env, value); // evaluate the expansion, in place
        } else if tag == self.symbols.vm_tag_cached(VmTag::EvalCheckFunc) {
            let env = frame[1];
            let args_expr = frame[2];
            let f = value;
            let nil = self.nil();
            if args_expr == nil {
                self.begin_apply(f, nil)?;
            } else if self.store.get(args_expr).tag == Tag::Pair {
                let first = car(&self.store, args_expr);
                let rest = cdr(&self.store, args_expr);
                let tag2 = self.symbols.vm_tag_cached(VmTag::Evlis2);
                self.stack.push_frame([tag2, env, rest, nil, f])?;
                self.tail_eval(env, first);
            } else {
                // An improper argument-position list: evaluate the
                // whole tail as a single expression and use its value
                // as the (dotted) rest of the argument list, matching
                // how a literal non-pair, non-nil value in argument
                // position behaves when applied.
                let tag2 = self.symbols.vm_tag_cached(VmTag::Evlis3);
                self.stack.push_frame([tag2, env, nil, f, 0])?;
                self.tail_eval(env, args_expr);
            }
        } else if tag == self.symbols.vm_tag_cached(VmTag::Evlis2) {
            let env = frame[1];
            let remaining = frame[2];
            let acc = frame[3];
            let f = frame[4];
            let new_acc = cons(&mut self.store, value, acc)?;
            let nil = self.nil();
            if remaining == nil {
                let args = build_list_with_tail(self, new_acc, nil)?;
                self.begin_apply(f, args)?;
            } else if self.store.get(remaining).tag == Tag::Pair {
                let next = car(&self.store, remaining);
                let rest = cdr(&self.store, remaining);
                let tag2 = self.symbols.vm_tag_cached(VmTag::Evlis2);
                self.stack.push_frame([tag2, env, rest, new_acc, f])?;
                self.tail_eval(env, next);
            } else {
                let tag2 = self.symbols.vm_tag_cached(VmTag::Evlis3);
                self.stack.push_frame([tag2, env, new_acc, f, 0])?;
                self.tail_eval(env, remaining);
            }
        } else if tag == self.symbols.vm_tag_cached(VmTag::Evlis3) {
            let acc = frame[2];
            let f = frame[3];
            let args = build_list_with_tail(self, acc, value)?;
            self.begin_apply(f, args)?;
        } else if tag == self.symbols.vm_tag_cached(VmTag::CallWithValues2) {
            let consumer = frame[2];
            let args = if self.store.get(value).tag == Tag::Values {
                values_list(&self.store, value)
            } else {
                let nil = self.nil();
                cons(&mut self.store, value, nil)?
            };
            self.begin_apply(consumer, args)?;
        } else {
            unreachable!("resume_frame: unrecognized frame tag");
        }
        Ok(())
    }

    /// `vm_apply`/`vm_apply2` (§4.7): applies `f` to already-evaluated
    /// `args`, resolving in one step to either `vm_eval` (a closure's
    /// body, in tail position relative to whatever called
    /// `begin_apply` — no frame is pushed here, so a frame pushed by
    /// the *caller* before this call is what makes the application
    /// non-tail) or `vm_return` (a continuation's resumed value, or a
    /// builtin's computed result).
    ///
    /// `call-with-current-continuation`, `call-with-values`, and
    /// `apply` are the three builtins that transfer control to another
    /// procedure instead of just computing a value (§4.4), so they are
    /// recognized here by [`BuiltinFn`] variant and dispatched directly
    /// rather than through `builtins::apply_builtin`. Capturing a
    /// continuation snapshots `self.stack` (`Stack::snapshot`);
    /// invoking one later replaces `self.stack` with that snapshot
    /// (`Stack::restore`) unconditionally — there is no Rust call frame
    /// to still be live, so the continuation is genuinely re-enterable
    /// (§5, §8), not a one-shot escape.
    fn begin_apply(&mut self, f: CellIdx, args: CellIdx) -> EngineResult<()> {
        check_apply(self, f)?;
        match self.store.get(f).tag {
            Tag::Closure => {
                let formals = closure_formals(&self.store, f);
                let closed_env = closure_env(&self.store, f);
                let new_env = bind_formals(self, formals, args, closed_env)?;
                let body = closure_body(&self.store, f);
                self.tail_eval(new_env, body);
                Ok(())
            }
            Tag::Continuation => {
                let snapshot = crate::constructors::continuation_snapshot(&self.store, f);
                let nil = self.nil();
                let unspecified = self.unspecified();
                let arg0 = if args == nil { unspecified } else { car(&self.store, args) };
                let value = builtins::unwrap_first_value(self, arg0);
                self.stack.restore(&snapshot);
                self.return_value(value);
                Ok(())
            }
            _ => match builtins::builtin_variant(self, f) {
                BuiltinFn::CallCc => {
                    let proc = builtins::call_cc_proc(self, args)?;
                    let snapshot = self.stack.snapshot();
                    let depth_marker = self.stack.depth() as CellIdx;
                    let k = crate::constructors::make_continuation(&mut self.store, depth_marker, &snapshot)?;
                    let nil = self.nil();
                    let kargs = cons(&mut self.store, k, nil)?;
                    self.begin_apply(proc, kargs)
                }
                BuiltinFn::Apply => {
                    let (proc, full_args) = builtins::apply_splice(self, args)?;
                    self.begin_apply(proc, full_args)
                }
                BuiltinFn::CallWithValues => {
                    let (producer, consumer) = builtins::call_with_values_args(self, args)?;
                    let tag = self.symbols.vm_tag_cached(VmTag::CallWithValues2);
                    self.stack.push_frame([tag, 0, consumer, 0, 0])?;
                    let nil = self.nil();
                    self.begin_apply(producer, nil)
                }
                _ => {
                    let result = builtins::apply_builtin(self, f, args)?;
                    self.return_value(result);
                    Ok(())
                }
            },
        }
    }

    /// Top-level driver used by the bootstrap/CLI (§4.7 "Failure
    /// semantics", §4.8): evaluates `expr` in `env` and, if it raises
    /// a Scheme-level condition, looks up `throw` in `env` before
    /// giving up. A user `(define (throw key . args) ...)` is applied
    /// to `(key . args)` and its result becomes this call's result. If
    /// `throw` is still bound to the bootstrap default (or not bound
    /// at all), the diagnostic is returned unchanged for the caller to
    /// print and exit on, matching "if throw is undefined, print a
    /// diagnostic ... and terminate".
    pub fn eval_top(&mut self, expr: CellIdx, env: CellIdx) -> EngineResult<CellIdx> {
        match self.eval(expr, env) {
            Err(EngineError::Condition(condition)) => self.dispatch_condition(env, condition),
            other => other,
        }
    }

    fn dispatch_condition(&mut self, env: CellIdx, condition: SchemeCondition) -> EngineResult<CellIdx> {
        let throw_sym = self.symbols.intern(&mut self.store, "throw")?;
        let handler = match environment::lookup(self, env, throw_sym) {
            Ok(h) => h,
            Err(_) => return Err(EngineError::Condition(condition)),
        };
        if self.store.get(handler).tag != Tag::Closure {
            // Still the bootstrap-registered default (or some other
            // non-closure value) — it IS the "print and abort" path,
            // just realized as a builtin rather than inline here.
            return Err(EngineError::Condition(condition));
        }
        let key = self.symbols.intern(&mut self.store, condition.kind.key())?;
        let args_list = list_from_cells(self, &condition.args)?;
        let call_args = cons(&mut self.store, key, args_list)?;
        self.apply(handler, call_args)
    }
}

/// Builds a proper Scheme list from a slice of already-allocated
/// cells, tail-first so no intermediate reversal is needed.
pub(crate) fn list_from_cells(engine: &mut Engine, items: &[CellIdx]) -> EngineResult<CellIdx> {
    let mut out = engine.nil();
    for &item in items.iter().rev() {
        out = cons(&mut engine.store, item, out)?;
    }
    Ok(out)
}

/// Folds a reverse-accumulated argument list `acc` (newest argument
/// first, as built up by [`Engine::resume_frame`]'s `Evlis2` chain)
/// onto `tail` via repeated `cons`, producing the argument list in
/// evaluation order. `tail` is `nil` for a proper argument list, or the
/// evaluated dotted tail for an improper one (`(f a b . rest-expr)`).
fn build_list_with_tail(engine: &mut Engine, acc: CellIdx, tail: CellIdx) -> EngineResult<CellIdx> {
    let nil = engine.nil();
    let mut out = tail;
    let mut cur = acc;
    while cur != nil {
        let item = car(&engine.store, cur);
        out = cons(&mut engine.store, item, out)?;
        cur = cdr(&engine.store, cur);
    }
    Ok(out)
}

/// `check_apply(f)` (§4.7): rejects application of non-applicable
/// values with `wrong-type-arg`.
pub fn check_apply(engine: &Engine, f: CellIdx) -> EngineResult<()> {
    let applicable = match engine.store.get(f).tag {
        Tag::Closure | Tag::Continuation => true,
        Tag::Struct => builtins::is_builtin(engine, f),
        _ => false,
    };
    if applicable {
        Ok(())
    } else {
        Err(SchemeCondition::new(ConditionKind::WrongTypeArg, vec![f]).into())
    }
}

/// `formal_p(x, formals)` (§4.7): is `x` bound by this formals list
/// (fixed, dotted-rest, or bare rest-symbol)?
pub fn formal_p(store: &CellStore, x: CellIdx, formals: CellIdx, nil: CellIdx) -> bool {
    let mut f = formals;
    loop {
        if f == x {
            return true; // bare rest-symbol formals
        }
        if f == nil {
            return false;
        }
        if store.get(f).tag != Tag::Pair {
            return f == x;
        }
        if car(store, f) == x {
            return true;
        }
        f = cdr(store, f);
    }
}

/// `check_formals(formals, args)` (§4.7): raises `wrong-number-of-args`
/// when both sides are concrete lists of differing length.
pub fn check_formals(engine: &Engine, formals: CellIdx, args: CellIdx) -> EngineResult<()> {
    let nil = engine.nil();
    let mut f = formals;
    let mut a = args;
    loop {
        let f_is_pair = engine.store.get(f).tag == Tag::Pair;
        let a_is_pair = engine.store.get(a).tag == Tag::Pair;
        match (f == nil, f_is_pair, a == nil, a_is_pair) {
            (true, _, true, _) => return Ok(()),
            (true, _, false, _) => return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![formals, args]).into()),
            (false, false, _, _) => return Ok(()), // bare rest-symbol: any arity matches
            (false, true, true, _) => return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![formals, args]).into()),
            (false, true, false, false) => return Err(SchemeCondition::new(ConditionKind::WrongNumberOfArgs, vec![formals, args]).into()),
            (false, true, false, true) => {
                f = cdr(&engine.store, f);
                a = cdr(&engine.store, a);
            }
        }
    }
}

/// Extends `captured_env` with one frame binding `formals` to `args`.
fn bind_formals(engine: &mut Engine, formals: CellIdx, args: CellIdx, captured_env: CellIdx) -> EngineResult<CellIdx> {
    check_formals(engine, formals, args)?;
    let nil = engine.nil();
    let mut env = captured_env;
    let mut f = formals;
    let mut a = args;
    loop {
        if f == nil {
            return Ok(env);
        }
        if engine.store.get(f).tag != Tag::Pair {
            let binding = cons(&mut engine.store, f, a)?;
            env = cons(&mut engine.store, binding, env)?;
            return Ok(env);
        }
        let sym = car(&engine.store, f);
        let val = car(&engine.store, a);
        let binding = cons(&mut engine.store, sym, val)?;
        env = cons(&mut engine.store, binding, env)?;
        f = cdr(&engine.store, f);
        a = cdr(&engine.store, a);
    }
}

/// Used by [`crate::builtins::make_builtin`] to compare a struct's
/// type-descriptor field against the interned builtin marker.
pub(crate) fn is_builtin_struct(engine: &Engine, s: CellIdx) -> bool {
    let marker_idx = engine.symbols.well_known_cached(WellKnown::BuiltinTag);
    let marker = engine.store.get(marker_idx);
    struct_type(&engine.store, s) == marker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::constructors::{make_number, number_value};
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
        e.eval(form, module).unwrap()
    }

    #[test]
    fn applies_lambda_tail_call_without_growing_stack() {
        let mut e = engine();
        let depth_before = e.stack.depth();
        let v = eval_text(&mut e, "((lambda (x) (+ x 1)) 41)");
        assert_eq!(number_value(&e.store, v), 42);
        assert_eq!(e.stack.depth(), depth_before);
    }

    #[test]
    fn define_then_set_then_reference() {
        let mut e = engine();
        let v = eval_text(&mut e, "(begin (define x 1) (set! x 2) x)");
        assert_eq!(number_value(&e.store, v), 2);
    }

    #[test]
    fn call_with_current_continuation_escapes_with_value() {
        let mut e = engine();
        let v = eval_text(&mut e, "(call-with-current-continuation (lambda (k) (+ 1 (k 7))))");
        assert_eq!(number_value(&e.store, v), 7);
    }

    #[test]
    fn call_with_current_continuation_re_enters_after_its_capturing_call_has_returned() {
        // The generator/counter idiom: a continuation captured once is
        // invoked repeatedly, each time after the `call/cc` that
        // captured it has long since returned — a one-shot escape
        // cannot pass this.
        let mut e = engine();
        eval_text(&mut e, "(define k #f)");
        eval_text(&mut e, "(define n (call-with-current-continuation (lambda (c) (set! k c) 0)))");
        let v1 = eval_text(&mut e, "n");
        assert_eq!(number_value(&e.store, v1), 0);

        eval_text(&mut e, "(if (< n 3) (k (+ n 1)))");
        let v2 = eval_text(&mut e, "n");
        assert_eq!(number_value(&e.store, v2), 1);

        eval_text(&mut e, "(if (< n 3) (k (+ n 1)))");
        let v3 = eval_text(&mut e, "n");
        assert_eq!(number_value(&e.store, v3), 2);
    }

    #[test]
    fn define_macro_expands_and_evaluates() {
        let mut e = engine();
        eval_text(
            &mut e,
            "(define-macro (when c . b) (cons 'if (cons c (cons (cons 'begin b) '(#f)))))",
        );
        let v = eval_text(&mut e, "(when #t 1 2 3)");
        assert_eq!(number_value(&e.store, v), 3);
    }

    #[test]
    fn call_with_values_splices_into_consumer() {
        let mut e = engine();
        let v = eval_text(&mut e, "(call-with-values (lambda () (values 1 2)) +)");
        assert_eq!(number_value(&e.store, v), 3);
    }

    #[test]
    fn car_of_empty_list_raises_not_a_pair_or_wrong_type() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "(car '())").unwrap();
        let module = e.module;
        let err = e.eval(form, module).unwrap_err();
        match err {
            EngineError::Condition(c) => {
                assert!(matches!(c.kind, ConditionKind::NotAPair | ConditionKind::WrongTypeArg))
            }
            other => panic!("expected a Scheme condition, got {other:?}"),
        }
    }

    #[test]
    fn wrong_number_of_args_is_raised_on_arity_mismatch() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "((lambda (x y) x) 1)").unwrap();
        let module = e.module;
        let err = e.eval(form, module).unwrap_err();
        assert!(matches!(err, EngineError::Condition(c) if c.kind == ConditionKind::WrongNumberOfArgs));
    }

    #[test]
    fn formal_p_detects_fixed_and_rest_formals() {
        let mut e = engine();
        let nil = e.nil();
        let a = e.symbols.intern(&mut e.store, "a").unwrap();
        let b = e.symbols.intern(&mut e.store, "b").unwrap();
        let formals = cons(&mut e.store, a, b).unwrap(); // (a . b) dotted
        assert!(formal_p(&e.store, a, formals, nil));
        assert!(formal_p(&e.store, b, formals, nil));
        let unbound = make_number(&mut e.store, 99).unwrap();
        assert!(!formal_p(&e.store, unbound, formals, nil));
    }

    #[test]
    fn define_splices_a_variable_cell_into_the_defining_occurrence() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "(define x 10)").unwrap();
        let module = e.module;
        e.eval(form, module).unwrap();
        let rest = cdr(&e.store, form);
        let target = car(&e.store, rest);
        assert_eq!(e.store.get(target).tag, Tag::Variable);
    }

    #[test]
    fn define_function_sugar_splices_a_variable_cell_into_the_name_slot() {
        let mut e = engine();
        let form = reader::read_one(&mut e, "(define (f x) x)").unwrap();
        let module = e.module;
        e.eval(form, module).unwrap();
        let rest = cdr(&e.store, form);
        let target = car(&e.store, rest); // (f . (x))
        let name_slot = car(&e.store, target);
        assert_eq!(e.store.get(name_slot).tag, Tag::Variable);
    }

    #[test]
    fn internal_define_in_a_repeatedly_invoked_lambda_redefines_correctly() {
        // Regression check for the variable-cell splice: once the first
        // call spliced this `(define y ...)` node's target into a
        // `Tag::Variable`, a second call must still redefine `y` through
        // the backing pair instead of treating the spliced cell as a
        // fresh, unbound symbol.
        let mut e = engine();
        eval_text(&mut e, "(define (f n) (define y (+ n 1)) y)");
        let v1 = eval_text(&mut e, "(f 1)");
        assert_eq!(number_value(&e.store, v1), 2);
        let v2 = eval_text(&mut e, "(f 5)");
        assert_eq!(number_value(&e.store, v2), 6);
    }

    #[test]
    fn stack_capacity_is_the_configured_slot_count_divided_by_frame_width() {
        let mut config = Config::default();
        config.stack_size = 100; // 100 slots / 5 per frame = 20 frames
        let mut e = Engine::new(config).unwrap();
        for _ in 0..20 {
            e.stack.push_frame([0, 0, 0, 0, 0]).unwrap();
        }
        assert!(e.stack.push_frame([0, 0, 0, 0, 0]).is_err());
    }
}
