//! Bytecode link object (§3.4, §6): the output of code generation.
//!
//! A `LinkObject` is a numbered table of `LinkItem`s plus a numbered table
//! of `LinkFunction`s. Definitions are de-duplicated by structural value —
//! the same float, string, symbol, or import name requested twice returns
//! the same id — mirroring the teacher's `ConstPool` in `bytecode/code.rs`,
//! generalized from a plain `Vec<Value>` to a hash-deduplicated pool.

use indexmap::IndexMap;

use crate::ir::{Constant, FloatConst, ModuleMemberId, RecordSchema};
use crate::intern::StringId;

crate::arena_id!(LinkItemId);
crate::arena_id!(LinkFunctionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Normal,
    Closure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberPayload {
    Integer(i64),
    Float(FloatConst),
    String(StringId),
    Symbol(StringId),
    Import(StringId),
    Variable { name: StringId, init: Option<LinkItemId> },
    Function(LinkFunctionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkItem {
    Use(ModuleMemberId),
    Definition(Option<ModuleMemberId>, MemberPayload),
}

/// Bytecode and metadata for one function, keyed into the `LinkObject`'s
/// function table by `LinkFunctionId`.
#[derive(Debug, Clone)]
pub struct LinkFunction {
    pub name: Option<StringId>,
    pub kind: MemberKind,
    pub param_count: usize,
    pub local_count: usize,
    pub bytecode: Vec<u8>,
    /// `(bytecode offset, LinkItem id)` pairs the linker must resolve.
    pub fixups: Vec<(u32, LinkItemId)>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkObject {
    pub items: Vec<LinkItem>,
    pub functions: Vec<LinkFunction>,
    /// Carried over verbatim from `ir::Module::record_schemas`; a
    /// `Value::Record`'s `RecordTypeId` indexes straight into this table,
    /// so record field layout survives into the link object unchanged.
    pub record_schemas: Vec<RecordSchema>,
    /// Dedup table for value-keyed definitions (everything but `Function`
    /// and `Variable`, which are 1:1 with an `ir::ModuleMemberId` and so
    /// never need re-requesting). `IndexMap` keeps insertion order, which
    /// is what makes the link object's ordering — and therefore its ids —
    /// deterministic across two compiles of the same source (§5).
    dedup: IndexMap<DedupKey, LinkItemId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Integer(i64),
    Float(u64),
    String(StringId),
    Symbol(StringId),
    Import(StringId),
}

impl LinkObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_function(&mut self, origin: ModuleMemberId, func: LinkFunction) -> LinkItemId {
        let func_id = LinkFunctionId::from_index(self.functions.len());
        self.functions.push(func);
        self.push_item(LinkItem::Definition(Some(origin), MemberPayload::Function(func_id)))
    }

    pub fn push_import(&mut self, origin: ModuleMemberId, name: StringId) -> LinkItemId {
        if let Some(&id) = self.dedup.get(&DedupKey::Import(name)) {
            return id;
        }
        let id = self.push_item(LinkItem::Definition(Some(origin), MemberPayload::Import(name)));
        self.dedup.insert(DedupKey::Import(name), id);
        id
    }

    pub fn push_variable(&mut self, origin: ModuleMemberId, name: StringId, init: Option<LinkItemId>) -> LinkItemId {
        self.push_item(LinkItem::Definition(Some(origin), MemberPayload::Variable { name, init }))
    }

    /// Interns a constant as a `LinkItem`, reusing the existing entry when
    /// the same value was requested before. Used for `Constant::Str`/`Symbol`
    /// (no immediate-operand opcode exists for them, unlike `Int`/`Float`).
    pub fn intern_constant(&mut self, c: Constant) -> LinkItemId {
        let (key, payload) = match c {
            Constant::Int(i) => (DedupKey::Integer(i), MemberPayload::Integer(i)),
            Constant::Float(f) => (DedupKey::Float(nan_canonical_bits(f)), MemberPayload::Float(f)),
            Constant::Str(s) => (DedupKey::String(s), MemberPayload::String(s)),
            Constant::Symbol(s) => (DedupKey::Symbol(s), MemberPayload::Symbol(s)),
            Constant::Null | Constant::True | Constant::False => {
                unreachable!("Null/True/False have dedicated immediate opcodes and never need a LinkItem")
            }
        };
        if let Some(&id) = self.dedup.get(&key) {
            return id;
        }
        let id = self.push_item(LinkItem::Definition(None, payload));
        self.dedup.insert(key, id);
        id
    }

    fn push_item(&mut self, item: LinkItem) -> LinkItemId {
        let id = LinkItemId::from_index(self.items.len());
        self.items.push(item);
        id
    }
}

fn nan_canonical_bits(f: FloatConst) -> u64 {
    if f.0.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        f.0.to_bits()
    }
}
