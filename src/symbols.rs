//! Symbol interning, well-known singletons, and the VM continuation
//! tags (§3 "well-known singleton indices", §4.7 "Tags").
//!
//! The symbol table is, conceptually, "a hash structure mapping
//! string payloads to symbol cells" (§3) that the collector treats as
//! a root. This crate keeps that table host-side as a `HashMap<String,
//! CellIdx>` rather than as Scheme-level cells: the table is keyed by
//! the symbol's *name*, which is stable across collections, so only
//! the `CellIdx` values need remapping after a collection — keying by
//! `CellIdx` directly would require rebuilding the whole map's keys on
//! every GC for no benefit, since names are already a perfectly good,
//! collection-stable key.

use crate::cell::{CellIdx, Tag};
use crate::error::EngineResult;
use crate::store::CellStore;
use std::collections::HashMap;

/// The VM continuation tags from §4.7. All are interned specials;
/// comparing `r3` against one of these is how the evaluator dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmTag {
    Apply,
    Apply2,
    Begin,
    BeginEval,
    BeginExpand,
    BeginExpandEval,
    BeginExpandMacro,
    BeginExpandPrimitiveLoad,
    BeginPrimitiveLoad,
    BeginReadInputFile,
    CallWithCurrentContinuation2,
    CallWithValues2,
    Eval,
    Eval2,
    EvalCheckFunc,
    EvalDefine,
    EvalMacroExpandEval,
    EvalMacroExpandExpand,
    EvalPmatchCar,
    EvalPmatchCdr,
    EvalSetX,
    Evlis,
    Evlis2,
    Evlis3,
    If,
    IfExpr,
    MacroExpand,
    MacroExpandCar,
    MacroExpandCdr,
    MacroExpandDefine,
    MacroExpandDefineMacro,
    MacroExpandLambda,
    MacroExpandSetX,
    Return,
}

impl VmTag {
    pub const ALL: [VmTag; 33] = [
        VmTag::Apply,
        VmTag::Apply2,
        VmTag::Begin,
        VmTag::BeginEval,
        VmTag::BeginExpand,
        VmTag::BeginExpandEval,
        VmTag::BeginExpandMacro,
        VmTag::BeginExpandPrimitiveLoad,
        VmTag::BeginPrimitiveLoad,
        VmTag::BeginReadInputFile,
        VmTag::CallWithCurrentContinuation2,
        VmTag::CallWithValues2,
        VmTag::Eval,
        VmTag::Eval2,
        VmTag::EvalCheckFunc,
        VmTag::EvalDefine,
        VmTag::EvalMacroExpandEval,
        VmTag::EvalMacroExpandExpand,
        VmTag::EvalPmatchCar,
        VmTag::EvalPmatchCdr,
        VmTag::EvalSetX,
        VmTag::Evlis,
        VmTag::Evlis2,
        VmTag::Evlis3,
        VmTag::If,
        VmTag::IfExpr,
        VmTag::MacroExpand,
        VmTag::MacroExpandCar,
        VmTag::MacroExpandCdr,
        VmTag::MacroExpandDefine,
        VmTag::MacroExpandDefineMacro,
        VmTag::MacroExpandLambda,
        VmTag::MacroExpandSetX,
        VmTag::Return,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VmTag::Apply => "vm_apply",
            VmTag::Apply2 => "vm_apply2",
            VmTag::Begin => "vm_begin",
            VmTag::BeginEval => "vm_begin_eval",
            VmTag::BeginExpand => "vm_begin_expand",
            VmTag::BeginExpandEval => "vm_begin_expand_eval",
            VmTag::BeginExpandMacro => "vm_begin_expand_macro",
            VmTag::BeginExpandPrimitiveLoad => "vm_begin_expand_primitive_load",
            VmTag::BeginPrimitiveLoad => "vm_begin_primitive_load",
            VmTag::BeginReadInputFile => "vm_begin_read_input_file",
            VmTag::CallWithCurrentContinuation2 => "vm_call_with_current_continuation2",
            VmTag::CallWithValues2 => "vm_call_with_values2",
            VmTag::Eval => "vm_eval",
            VmTag::Eval2 => "vm_eval2",
            VmTag::EvalCheckFunc => "vm_eval_check_func",
            VmTag::EvalDefine => "vm_eval_define",
            VmTag::EvalMacroExpandEval => "vm_eval_macro_expand_eval",
            VmTag::EvalMacroExpandExpand => "vm_eval_macro_expand_expand",
            VmTag::EvalPmatchCar => "vm_eval_pmatch_car",
            VmTag::EvalPmatchCdr => "vm_eval_pmatch_cdr",
            VmTag::EvalSetX => "vm_eval_set_x",
            VmTag::Evlis => "vm_evlis",
            VmTag::Evlis2 => "vm_evlis2",
            VmTag::Evlis3 => "vm_evlis3",
            VmTag::If => "vm_if",
            VmTag::IfExpr => "vm_if_expr",
            VmTag::MacroExpand => "vm_macro_expand",
            VmTag::MacroExpandCar => "vm_macro_expand_car",
            VmTag::MacroExpandCdr => "vm_macro_expand_cdr",
            VmTag::MacroExpandDefine => "vm_macro_expand_define",
            VmTag::MacroExpandDefineMacro => "vm_macro_expand_define_macro",
            VmTag::MacroExpandLambda => "vm_macro_expand_lambda",
            VmTag::MacroExpandSetX => "vm_macro_expand_set_x",
            VmTag::Return => "vm_return",
        }
    }
}

/// The non-VM-tag well-known singletons from §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnown {
    Nil,
    True,
    False,
    Unspecified,
    Undefined,
    ClosureTag,
    Circular,
    BeginTag,
    /// [AMBIENT] struct type-discriminator marking a builtin-primitive
    /// value (§4.4) — not named as a singleton in §3, but needed so
    /// `check_apply`/`vm_apply` can recognize one by its struct type
    /// field rather than by a separate Rust-level tag.
    BuiltinTag,
}

impl WellKnown {
    pub const ALL: [WellKnown; 9] = [
        WellKnown::Nil,
        WellKnown::True,
        WellKnown::False,
        WellKnown::Unspecified,
        WellKnown::Undefined,
        WellKnown::ClosureTag,
        WellKnown::Circular,
        WellKnown::BeginTag,
        WellKnown::BuiltinTag,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WellKnown::Nil => "()",
            WellKnown::True => "#t",
            WellKnown::False => "#f",
            WellKnown::Unspecified => "*unspecified*",
            WellKnown::Undefined => "*undefined*",
            WellKnown::ClosureTag => "*closure*",
            WellKnown::Circular => "*circular*",
            WellKnown::BeginTag => "*begin*",
            WellKnown::BuiltinTag => "*builtin*",
        }
    }
}

/// Symbol table (C6 neighbor): name→cell interning, plus the
/// well-known singletons and VM tags, all addressed by stable string
/// keys.
pub struct SymbolTable {
    interned: HashMap<String, CellIdx>,
    vm_tags: HashMap<VmTag, CellIdx>,
    well_known: HashMap<WellKnown, CellIdx>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable {
            interned: HashMap::new(),
            vm_tags: HashMap::new(),
            well_known: HashMap::new(),
        }
    }

    /// Interns `name`, allocating a fresh `Symbol` cell (with a
    /// backing `Bytes` cell holding the name) the first time it is
    /// seen. Idempotent: re-interning returns the same index.
    pub fn intern(&mut self, store: &mut CellStore, name: &str) -> EngineResult<CellIdx> {
        if let Some(&idx) = self.interned.get(name) {
            return Ok(idx);
        }
        let bytes_idx = crate::constructors::make_bytes(store, name.as_bytes())?;
        // Symbol: car unused (no hash-chain needed, interning lives
        // host-side), cdr = backing bytes cell. Per §4.2 scan rules,
        // only cdr is a live reference for TSYMBOL.
        let idx = store.make_cell(Tag::Symbol, 0, bytes_idx)?;
        self.interned.insert(name.to_string(), idx);
        Ok(idx)
    }

    pub fn lookup_name(&self, name: &str) -> Option<CellIdx> {
        self.interned.get(name).copied()
    }

    /// Every interned name (`MES_DEBUG=4`'s "dump symbol table", §6).
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.interned.keys().map(|s| s.as_str())
    }

    pub fn vm_tag(&mut self, store: &mut CellStore, tag: VmTag) -> EngineResult<CellIdx> {
        if let Some(&idx) = self.vm_tags.get(&tag) {
            return Ok(idx);
        }
        let idx = store.make_cell(Tag::Special, tag as CellIdx, 0)?;
        self.vm_tags.insert(tag, idx);
        self.interned.insert(tag.name().to_string(), idx);
        Ok(idx)
    }

    /// Read-only lookup of an already-interned VM tag. Panics if
    /// called before [`SymbolTable::intern_all_specials`]; every
    /// bootstrapped `Engine` has already run that.
    pub fn vm_tag_cached(&self, tag: VmTag) -> CellIdx {
        *self
            .vm_tags
            .get(&tag)
            .unwrap_or_else(|| panic!("vm tag {:?} not interned", tag))
    }

    /// Read-only lookup of an already-interned well-known singleton.
    pub fn well_known_cached(&self, w: WellKnown) -> CellIdx {
        *self
            .well_known
            .get(&w)
            .unwrap_or_else(|| panic!("well-known singleton {:?} not interned", w))
    }

    pub fn well_known(&mut self, store: &mut CellStore, w: WellKnown) -> EngineResult<CellIdx> {
        if let Some(&idx) = self.well_known.get(&w) {
            return Ok(idx);
        }
        let idx = store.make_cell(Tag::Special, w as CellIdx, 0)?;
        self.well_known.insert(w, idx);
        self.interned.insert(w.name().to_string(), idx);
        Ok(idx)
    }

    /// Interns every VM tag and well-known singleton; called once by
    /// the bootstrap driver (C8) before anything else runs.
    pub fn intern_all_specials(&mut self, store: &mut CellStore) -> EngineResult<()> {
        for tag in VmTag::ALL {
            self.vm_tag(store, tag)?;
        }
        for w in WellKnown::ALL {
            self.well_known(store, w)?;
        }
        Ok(())
    }

    /// Every interned value, for the collector to forward in place
    /// (kept as disjoint field borrows from the cell store rather
    /// than a closure, so the two borrows don't have to overlap).
    pub(crate) fn values_mut(&mut self) -> impl Iterator<Item = &mut CellIdx> {
        self.interned
            .values_mut()
            .chain(self.vm_tags.values_mut())
            .chain(self.well_known.values_mut())
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CellStore {
        CellStore::new(256, 64, 1024)
    }

    #[test]
    fn interning_is_idempotent() {
        let mut s = store();
        let mut syms = SymbolTable::new();
        let a = syms.intern(&mut s, "foo").unwrap();
        let b = syms.intern(&mut s, "foo").unwrap();
        assert_eq!(a, b);
        let c = syms.intern(&mut s, "bar").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn vm_tags_are_distinct() {
        let mut s = store();
        let mut syms = SymbolTable::new();
        let apply = syms.vm_tag(&mut s, VmTag::Apply).unwrap();
        let ret = syms.vm_tag(&mut s, VmTag::Return).unwrap();
        assert_ne!(apply, ret);
    }

    #[test]
    fn intern_all_specials_registers_every_name() {
        let mut s = store();
        let mut syms = SymbolTable::new();
        syms.intern_all_specials(&mut s).unwrap();
        assert_eq!(syms.lookup_name("vm_return"), syms.vm_tags.get(&VmTag::Return).copied());
        assert!(syms.lookup_name("*unspecified*").is_some());
    }
}
