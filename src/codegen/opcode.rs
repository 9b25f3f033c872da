//! Bytecode instruction set (§6): one byte op code followed by a
//! fixed-width, instruction-specific sequence of operands.
//!
//! Operands referring to a physical local are encoded as `u16` (slot
//! index); operands referring to the link object are encoded as `u16`
//! (`LinkItem`/`LinkFunction` index); jump offsets are `i32`, relative to
//! the byte immediately following the offset itself — wider than the
//! teacher's `i16` since this bytecode has no stack-machine-sized function
//! limit assumption to lean on.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    LoadNull,
    LoadTrue,
    LoadFalse,
    LoadInt,
    LoadFloat,
    LoadModule,
    LoadParam,
    StoreParam,
    LoadEnv,
    StoreEnv,
    LoadMember,
    StoreMember,
    LoadTupleMember,
    StoreTupleMember,
    LoadIndex,
    StoreIndex,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lsh,
    Rsh,
    BAnd,
    BOr,
    BXor,
    UAdd,
    UNeg,
    BNot,
    LNot,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,

    Jmp,
    JmpTrue,
    JmpFalse,
    Return,
    AssertFail,

    Push,
    Call,
    MethodCall,
    Env,
    Closure,
    Array,
    Tuple,
    Set,
    Map,
    Formatter,
    AppendFormat,
    FormatResult,
    Copy,
    MakeIterator,
    EnvParent,
    Record,
    /// Reads the active closure's incoming environment. Zero operand
    /// sources: the VM supplies it from the call's own closure reference,
    /// not from a local slot.
    EnvArg,
}
