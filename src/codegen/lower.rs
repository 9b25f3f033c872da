//! Out-of-SSA conversion and bytecode emission (§4.4).
//!
//! Converts one function at a time: split critical edges, turn phis into
//! conventional-SSA parallel copies, pick a deterministic physical local
//! slot per value, then emit bytecode in reverse-postorder so every forward
//! jump target has either already been seen (`Copy`/straight-line code) or
//! gets patched by `CodeBuilder::patch_pending` once the whole function has
//! been walked.

use ahash::AHashMap;

use crate::ast::{BinaryOp, UnaryOp};
use crate::intern::StringTable;
use crate::ir::{
    Block, Constant, ContainerKind, Function, Inst, InstId, LValue, Module, ModuleMember, ModuleMemberKind, Terminator, Value,
};

use super::builder::CodeBuilder;
use super::link::{LinkFunction, LinkItemId, LinkObject, MemberKind};
use super::opcode::Opcode;

/// Lowers a whole module to a link object.
///
/// Module members are processed in index order, which is also the order
/// `irbuild` pushes them in: a closure's template function is always pushed
/// before the function that builds it (`build_closure` pushes the child,
/// then returns to let the parent emit its own `MakeClosure`), so by the
/// time a `Value::MakeClosure { template, .. }` is lowered, `member_link`
/// already holds an entry for `template`.
#[must_use]
pub fn generate(module: Module, strings: &StringTable) -> LinkObject {
    // Field/member-name and parameter-count operands are raw `StringId`
    // indices already baked into the IR (see `intern::StringId::from_index`);
    // the link object itself never needs to resolve a string, only carry
    // enough indices for the runtime to do so against the same table.
    let _ = strings;
    let mut link = LinkObject::new();
    link.record_schemas = module.record_schemas.clone();
    let mut member_link: Vec<Option<LinkItemId>> = vec![None; module.members.len()];

    for (index, member) in module.members.into_iter().enumerate() {
        let origin = crate::ir::ModuleMemberId::from_index(index);
        let id = match member {
            ModuleMember::Function { kind, func } => {
                let lowered = lower_function(func, kind, &member_link, &mut link);
                link.push_function(origin, lowered)
            }
            ModuleMember::Import { name } => link.push_import(origin, name),
            ModuleMember::Variable { name, init } => {
                let init_id = init.map(|f| {
                    let lowered = lower_function(f, ModuleMemberKind::Normal, &member_link, &mut link);
                    link.push_function(origin, lowered)
                });
                link.push_variable(origin, name, init_id)
            }
            ModuleMember::Constant(c) => link.intern_constant(c),
        };
        member_link[index] = Some(id);
    }

    link
}

fn lower_function(mut func: Function, kind: ModuleMemberKind, member_link: &[Option<LinkItemId>], link: &mut LinkObject) -> LinkFunction {
    split_critical_edges(&mut func);
    let unify = insert_parallel_copies(&mut func);
    let order = reverse_postorder(&func);
    let (slot_of, local_count) = allocate_slots(&func, &order, &unify);

    let mut builder = CodeBuilder::new();
    let mut known_offsets: Vec<Option<usize>> = vec![None; func.blocks.len()];

    for &block in &order {
        known_offsets[block.index()] = Some(builder.offset());
        let insts = func.block(block).insts.clone();
        for inst_id in insts {
            emit_inst(&mut builder, link, &func, &unify, &slot_of, member_link, inst_id);
        }
        emit_terminator(&mut builder, &func, &unify, &slot_of, block, &known_offsets);
    }
    builder.patch_pending(&known_offsets);

    let (bytecode, fixups) = builder.into_parts();
    LinkFunction {
        name: func.name,
        kind: match kind {
            ModuleMemberKind::Normal => MemberKind::Normal,
            ModuleMemberKind::Closure => MemberKind::Closure,
        },
        param_count: func.param_count,
        local_count,
        bytecode,
        fixups,
    }
}

// --- critical-edge splitting -------------------------------------------------

/// Splits every edge from a multi-successor block into a multi-predecessor
/// block, so a later parallel copy inserted for one predecessor of a phi
/// never lands on an edge another successor also uses.
fn split_critical_edges(func: &mut Function) {
    let original_block_count = func.blocks.len();
    for u in 0..original_block_count {
        let u_id = crate::ir::BlockId::from_index(u);
        let succs = func.blocks[u].term.successors();
        if succs.len() < 2 {
            continue;
        }
        for v in succs {
            if func.blocks[v.index()].preds.len() > 1 {
                let w = crate::ir::BlockId::from_index(func.blocks.len());
                func.blocks.push(Block { insts: Vec::new(), preds: vec![u_id], term: Terminator::Jump(v), sealed: true });
                redirect_successor(&mut func.blocks[u].term, v, w);
                if let Some(p) = func.blocks[v.index()].preds.iter_mut().find(|p| **p == u_id) {
                    *p = w;
                }
            }
        }
    }
}

fn redirect_successor(term: &mut Terminator, from: crate::ir::BlockId, to: crate::ir::BlockId) {
    match term {
        Terminator::Jump(t) if *t == from => *t = to,
        Terminator::Branch { taken, fallthrough, .. } => {
            if *taken == from {
                *taken = to;
            } else if *fallthrough == from {
                *fallthrough = to;
            }
        }
        _ => {}
    }
}

// --- conventional-SSA construction -------------------------------------------

/// Replaces every phi operand with a fresh `Value::Copy` appended to the
/// corresponding predecessor, and records which copies share a physical slot
/// with which phi. Values in this IR are never redefined, so sequencing the
/// copies in any order is safe — no predecessor's copy ever reads a value
/// another copy in the same batch is about to overwrite.
fn insert_parallel_copies(func: &mut Function) -> AHashMap<InstId, InstId> {
    let mut unify = AHashMap::default();
    let block_count = func.blocks.len();
    for b in 0..block_count {
        let inst_ids = func.blocks[b].insts.clone();
        for inst_id in inst_ids {
            let Value::Phi(list_id) = func.insts[inst_id.index()].value else { continue };
            let preds = func.blocks[b].preds.clone();
            let operands = func.inst_lists[list_id.index()].clone();
            debug_assert_eq!(preds.len(), operands.len(), "phi operand count must match predecessor count");
            let mut new_operands = Vec::with_capacity(operands.len());
            for (&pred, &operand) in preds.iter().zip(operands.iter()) {
                let copy_id = append_inst(func, pred, Value::Copy(operand));
                unify.insert(copy_id, inst_id);
                new_operands.push(copy_id);
            }
            func.inst_lists[list_id.index()] = new_operands;
        }
    }
    unify
}

fn append_inst(func: &mut Function, block: crate::ir::BlockId, value: Value) -> InstId {
    let id = InstId::from_index(func.insts.len());
    func.insts.push(Inst { block, value });
    func.blocks[block.index()].insts.push(id);
    id
}

// --- slot allocation ----------------------------------------------------------

fn reverse_postorder(func: &Function) -> Vec<crate::ir::BlockId> {
    let mut visited = vec![false; func.blocks.len()];
    let mut order = Vec::with_capacity(func.blocks.len());
    let mut stack: Vec<(crate::ir::BlockId, usize)> = vec![(func.entry, 0)];
    visited[func.entry.index()] = true;
    while let Some(&mut (b, ref mut i)) = stack.last_mut() {
        let succs = func.blocks[b.index()].term.successors();
        if *i < succs.len() {
            let next = succs[*i];
            *i += 1;
            if !visited[next.index()] {
                visited[next.index()] = true;
                stack.push((next, 0));
            }
        } else {
            order.push(b);
            stack.pop();
        }
    }
    order.reverse();
    order
}

/// The physical slot a value (or, if it's a `Copy` unified with a phi, the
/// phi's own slot) is keyed under. `Alias` instructions are resolved away
/// first via `Function::canonical`, so a reference to a long-eliminated
/// trivial phi still lands on the slot of whatever actually computes it.
fn alloc_key(func: &Function, unify: &AHashMap<InstId, InstId>, id: InstId) -> InstId {
    let base = func.canonical(id);
    *unify.get(&base).unwrap_or(&base)
}

/// Assigns a dense `u32` slot to every distinct allocation key, walking
/// instructions in reverse postorder so the numbering is stable across two
/// compiles of identical source (§5) rather than depending on arena order,
/// which critical-edge splitting and parallel-copy insertion both perturb.
fn allocate_slots(func: &Function, order: &[crate::ir::BlockId], unify: &AHashMap<InstId, InstId>) -> (AHashMap<InstId, u32>, usize) {
    let mut slot_of: AHashMap<InstId, u32> = AHashMap::default();
    let mut next = 0u32;
    for &b in order {
        for &inst_id in &func.blocks[b.index()].insts {
            if matches!(func.insts[inst_id.index()].value, Value::Alias(_) | Value::Write(..)) {
                continue;
            }
            let key = alloc_key(func, unify, inst_id);
            slot_of.entry(key).or_insert_with(|| {
                let s = next;
                next += 1;
                s
            });
        }
    }
    (slot_of, next as usize)
}

fn operand_slot(func: &Function, unify: &AHashMap<InstId, InstId>, slot_of: &AHashMap<InstId, u32>, id: InstId) -> u16 {
    let key = alloc_key(func, unify, id);
    u16::try_from(slot_of[&key]).expect("function has more locals than fit a u16 slot")
}

fn u16_len(list: &[InstId]) -> u16 {
    u16::try_from(list.len()).expect("argument list longer than u16::MAX")
}

// --- instruction emission -----------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn emit_inst(
    b: &mut CodeBuilder,
    link: &mut LinkObject,
    func: &Function,
    unify: &AHashMap<InstId, InstId>,
    slot_of: &AHashMap<InstId, u32>,
    member_link: &[Option<LinkItemId>],
    id: InstId,
) {
    let value = func.inst(id).value.clone();
    let slot = |o: InstId| operand_slot(func, unify, slot_of, o);
    let dst = || operand_slot(func, unify, slot_of, id);

    match value {
        // Resolved transitively at every use site via `Function::canonical`;
        // never needs a slot or bytecode of its own.
        Value::Alias(_) => {}
        // Lives in the slot its predecessors' copies were unified onto.
        Value::Phi(_) => {}
        Value::Write(lvalue, v) => emit_write(b, &lvalue, slot(v), &slot),
        Value::Read(lvalue) => emit_read(b, &lvalue, dst(), &slot),
        Value::Constant(c) => emit_constant(b, link, c, dst()),
        Value::OuterEnvironment(env) => b.emit(Opcode::EnvParent, &[slot(env), dst()]),
        Value::Copy(src) => {
            let (s, d) = (slot(src), dst());
            if s != d {
                b.emit(Opcode::Copy, &[s, d]);
            }
        }
        Value::BinaryOp(op, l, r) => b.emit(binary_opcode(op), &[slot(l), slot(r), dst()]),
        Value::UnaryOp(op, v) => b.emit(unary_opcode(op), &[slot(v), dst()]),
        Value::Call(callee, args) => {
            for &a in func.list(args) {
                b.emit(Opcode::Push, &[slot(a)]);
            }
            b.emit(Opcode::Call, &[slot(callee), u16_len(func.list(args)), dst()]);
        }
        // `handle` is a `MethodHandle` `Aggregate([receiver, Symbol(method)])`.
        Value::MethodCall(handle, args) => {
            for &a in func.list(args) {
                b.emit(Opcode::Push, &[slot(a)]);
            }
            b.emit(Opcode::MethodCall, &[slot(handle), u16_len(func.list(args)), dst()]);
        }
        // No dedicated opcode: an aggregate is just a tuple nothing else
        // in the pipeline currently reads back via `GetAggregateMember`.
        Value::Aggregate(list) => {
            for &e in func.list(list) {
                b.emit(Opcode::Push, &[slot(e)]);
            }
            b.emit(Opcode::Tuple, &[u16_len(func.list(list)), dst()]);
        }
        Value::GetAggregateMember(agg, idx) => {
            b.emit(Opcode::LoadTupleMember, &[slot(agg), u16::try_from(idx).expect("tuple index fits u16"), dst()]);
        }
        Value::MakeEnvironment { parent, size } => {
            let parent_slot = parent.map_or(u16::MAX, slot);
            b.emit(Opcode::Env, &[parent_slot, u16::try_from(size).expect("environment size fits u16"), dst()]);
        }
        Value::MakeClosure { env, template } => {
            let link_id = member_link[template.index()]
                .expect("a closure's template function is always lowered before the closure that builds it");
            b.emit_link_ref(Opcode::Closure, &[slot(env), dst()], link_id);
        }
        Value::EnvArg => b.emit(Opcode::EnvArg, &[dst()]),
        Value::MakeIterator(v) => b.emit(Opcode::MakeIterator, &[slot(v), dst()]),
        Value::Container(kind, list) => {
            for &e in func.list(list) {
                b.emit(Opcode::Push, &[slot(e)]);
            }
            b.emit(container_opcode(kind), &[u16_len(func.list(list)), dst()]);
        }
        Value::Format(list) => {
            let d = dst();
            b.emit(Opcode::Formatter, &[d]);
            for &e in func.list(list) {
                b.emit(Opcode::AppendFormat, &[d, slot(e)]);
            }
            b.emit(Opcode::FormatResult, &[d, d]);
        }
        Value::Record(schema, list) => {
            for &e in func.list(list) {
                b.emit(Opcode::Push, &[slot(e)]);
            }
            b.emit(Opcode::Record, &[u16::try_from(schema.index()).expect("record schema index fits u16"), dst()]);
        }
        Value::Error => unreachable!("Value::Error reached code generation; should have been caught by Diagnostics::has_errors()"),
        // Reachable as the tail of a block ending in `break`/`continue`
        // whose result is always discarded; a cheap no-op placeholder.
        Value::Nop => b.emit(Opcode::LoadNull, &[dst()]),
    }
}

fn emit_write(b: &mut CodeBuilder, lvalue: &LValue, v: u16, slot: &dyn Fn(InstId) -> u16) {
    match lvalue {
        LValue::Param(idx) => b.emit(Opcode::StoreParam, &[u16::try_from(*idx).expect("param index fits u16"), v]),
        LValue::Closure { env, levels_up, slot: s } => b.emit(
            Opcode::StoreEnv,
            &[slot(*env), u16::try_from(*levels_up).expect("capture depth fits u16"), u16::try_from(*s).expect("env slot fits u16"), v],
        ),
        LValue::Module(_) => unreachable!("no module-level store opcode exists; ModuleMember writes never lower through LValue::Module"),
        LValue::Field(obj, name) => {
            let name_idx = u16::try_from(name.index()).expect("string table fits u16");
            b.emit(Opcode::StoreMember, &[slot(*obj), name_idx, v]);
        }
        LValue::TupleField(agg, idx) => b.emit(Opcode::StoreTupleMember, &[slot(*agg), u16::try_from(*idx).expect("tuple index fits u16"), v]),
        LValue::Index(obj, idx) => b.emit(Opcode::StoreIndex, &[slot(*obj), slot(*idx), v]),
    }
}

fn emit_read(b: &mut CodeBuilder, lvalue: &LValue, dst: u16, slot: &dyn Fn(InstId) -> u16) {
    match lvalue {
        LValue::Param(idx) => b.emit(Opcode::LoadParam, &[u16::try_from(*idx).expect("param index fits u16"), dst]),
        LValue::Closure { env, levels_up, slot: s } => b.emit(
            Opcode::LoadEnv,
            &[slot(*env), u16::try_from(*levels_up).expect("capture depth fits u16"), u16::try_from(*s).expect("env slot fits u16"), dst],
        ),
        LValue::Module(_) => unreachable!("no module-level load opcode exists; ModuleMember reads never lower through LValue::Module"),
        LValue::Field(obj, name) => {
            let name_idx = u16::try_from(name.index()).expect("string table fits u16");
            b.emit(Opcode::LoadMember, &[slot(*obj), name_idx, dst]);
        }
        LValue::TupleField(agg, idx) => b.emit(Opcode::LoadTupleMember, &[slot(*agg), u16::try_from(*idx).expect("tuple index fits u16"), dst]),
        LValue::Index(obj, idx) => b.emit(Opcode::LoadIndex, &[slot(*obj), slot(*idx), dst]),
    }
}

fn emit_constant(b: &mut CodeBuilder, link: &mut LinkObject, c: Constant, dst: u16) {
    match c {
        Constant::Null => b.emit(Opcode::LoadNull, &[dst]),
        Constant::True => b.emit(Opcode::LoadTrue, &[dst]),
        Constant::False => b.emit(Opcode::LoadFalse, &[dst]),
        Constant::Int(i) => b.emit_i64(Opcode::LoadInt, dst, i),
        Constant::Float(f) => b.emit_f64(Opcode::LoadFloat, dst, f.0),
        Constant::Str(_) | Constant::Symbol(_) => {
            let link_id = link.intern_constant(c);
            b.emit_link_ref(Opcode::LoadModule, &[dst], link_id);
        }
    }
}

fn emit_terminator(b: &mut CodeBuilder, func: &Function, unify: &AHashMap<InstId, InstId>, slot_of: &AHashMap<InstId, u32>, block: crate::ir::BlockId, known_offsets: &[Option<usize>]) {
    let slot = |o: InstId| operand_slot(func, unify, slot_of, o);
    match func.block(block).term {
        Terminator::None | Terminator::Never => {}
        Terminator::Jump(target) => b.emit_jump(Opcode::Jmp, None, target, known_offsets),
        Terminator::Branch { kind, value, taken, fallthrough } => {
            let op = match kind {
                crate::ir::BranchKind::IfTrue => Opcode::JmpTrue,
                crate::ir::BranchKind::IfFalse => Opcode::JmpFalse,
            };
            b.emit_jump(op, Some(slot(value)), taken, known_offsets);
            b.emit_jump(Opcode::Jmp, None, fallthrough, known_offsets);
        }
        Terminator::Return(v) => b.emit(Opcode::Return, &[slot(v)]),
        Terminator::Exit => {}
        Terminator::AssertFail(cond, msg) => {
            let msg_slot = msg.map_or(u16::MAX, slot);
            b.emit(Opcode::AssertFail, &[slot(cond), msg_slot]);
        }
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Pow => Opcode::Pow,
        BinaryOp::Shl => Opcode::Lsh,
        BinaryOp::Shr => Opcode::Rsh,
        BinaryOp::BitOr => Opcode::BOr,
        BinaryOp::BitXor => Opcode::BXor,
        BinaryOp::BitAnd => Opcode::BAnd,
        BinaryOp::Eq => Opcode::Eq,
        BinaryOp::Ne => Opcode::Neq,
        BinaryOp::Lt => Opcode::Lt,
        BinaryOp::Le => Opcode::Lte,
        BinaryOp::Gt => Opcode::Gt,
        BinaryOp::Ge => Opcode::Gte,
        // Short-circuit evaluation and `??` are lowered to control flow by
        // `irbuild`, not to a binary-op instruction; no opcode needed.
        BinaryOp::And | BinaryOp::Or | BinaryOp::NullCoalesce => {
            unreachable!("{op:?} is lowered to branches during IR construction, never reaches codegen as a BinaryOp")
        }
    }
}

fn unary_opcode(op: UnaryOp) -> Opcode {
    match op {
        UnaryOp::Plus => Opcode::UAdd,
        UnaryOp::Neg => Opcode::UNeg,
        UnaryOp::Not => Opcode::LNot,
        UnaryOp::BitNot => Opcode::BNot,
    }
}

fn container_opcode(kind: ContainerKind) -> Opcode {
    match kind {
        ContainerKind::Array => Opcode::Array,
        ContainerKind::Tuple => Opcode::Tuple,
        ContainerKind::Set => Opcode::Set,
        ContainerKind::Map => Opcode::Map,
    }
}
