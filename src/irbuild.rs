//! Lowers an analyzed AST to SSA IR, one function at a time (§4.3).
//!
//! SSA is constructed on the fly, Braun et al.-style: each block tracks a
//! write-map from symbol to defining instruction; reads of a sealed block
//! with more than one predecessor insert a phi and immediately attempt
//! trivial-phi elimination, forwarding through `Value::Alias` rather than
//! rewriting every use site.

use ahash::AHashMap;

use crate::ast::*;
use crate::intern::StringTable;
use crate::ir::*;
use crate::sema::{Analysis, SymbolId};

#[must_use]
pub fn build_module(file: &File, analysis: &Analysis, strings: &StringTable) -> Module {
    let mut module = Module::new();
    let func = {
        let mut fb = FuncBuilder::new(&mut module, analysis, strings, file.id, 0, Vec::new());
        fb.build_entry(|fb| {
            let mut last = None;
            for item in &file.items {
                last = fb.build_item(item);
            }
            last
        });
        fb.finish()
    };
    module.push_member(ModuleMember::Function { kind: ModuleMemberKind::Normal, func });
    module
}

/// An assignment target with its non-value subexpressions already lowered,
/// so a `Field`/`Index` target's `object`/`index` can be built once and
/// reused by both a preceding read (compound assignment) and a later write.
enum BuiltTarget {
    Var(SymbolId),
    Field(InstId, crate::intern::StringId),
    Index(InstId, InstId),
    Tuple(Vec<BuiltTarget>),
    Error,
}

struct FuncBuilder<'m, 'a> {
    module: &'m mut Module,
    analysis: &'a Analysis,
    strings: &'a StringTable,
    func: Function,
    current: BlockId,
    defs: AHashMap<(BlockId, SymbolId), InstId>,
    incomplete_phis: AHashMap<BlockId, Vec<(SymbolId, InstId)>>,
    phi_users: AHashMap<InstId, Vec<InstId>>,
    loop_stack: Vec<(BlockId, BlockId)>,
    func_node: NodeId,
    env_arg: Option<InstId>,
    own_env: Option<InstId>,
    own_slots: AHashMap<SymbolId, usize>,
    /// Slot maps of enclosing functions, immediate parent first, used to
    /// compute `levels_up` for variables captured from further out.
    ancestor_slots: Vec<AHashMap<SymbolId, usize>>,
}

impl<'m, 'a> FuncBuilder<'m, 'a> {
    fn new(
        module: &'m mut Module,
        analysis: &'a Analysis,
        strings: &'a StringTable,
        func_node: NodeId,
        param_count: usize,
        ancestor_slots: Vec<AHashMap<SymbolId, usize>>,
    ) -> Self {
        let entry = Block::default();
        let func = Function {
            name: None,
            param_count,
            blocks: vec![entry],
            insts: Vec::new(),
            inst_lists: Vec::new(),
            entry: BlockId::from_index(0),
            exit: BlockId::from_index(0),
        };
        Self {
            module,
            analysis,
            strings,
            func,
            current: BlockId::from_index(0),
            defs: AHashMap::default(),
            incomplete_phis: AHashMap::default(),
            phi_users: AHashMap::default(),
            loop_stack: Vec::new(),
            func_node,
            env_arg: None,
            own_env: None,
            own_slots: AHashMap::default(),
            ancestor_slots,
        }
    }

    /// Sets up the entry block (sealed, no predecessors), allocates the
    /// incoming-environment read and this function's own environment if
    /// needed, runs `body`, then closes off the function with an implicit
    /// return of the body's value.
    fn build_entry(&mut self, body: impl FnOnce(&mut Self) -> Option<InstId>) {
        self.seal_block(self.func.entry);

        if self.analysis.captures.get(&self.func_node).is_some_and(|c| !c.is_empty()) {
            self.env_arg = Some(self.new_inst(self.current, Value::EnvArg));
        }

        let owned_captured = self.captured_locals();
        if !owned_captured.is_empty() {
            for (slot, sym) in owned_captured.iter().enumerate() {
                self.own_slots.insert(*sym, slot);
            }
            let parent = self.env_arg;
            let env = self.new_inst(self.current, Value::MakeEnvironment { parent, size: owned_captured.len() });
            self.own_env = Some(env);
        }

        let result = body(self);
        if matches!(self.func.blocks[self.current.index()].term, Terminator::None) {
            let v = result.unwrap_or_else(|| self.new_inst(self.current, Value::Constant(Constant::Null)));
            self.func.blocks[self.current.index()].term = Terminator::Return(v);
        }
    }

    fn finish(self) -> Function {
        self.func
    }

    fn captured_locals(&self) -> Vec<SymbolId> {
        let mut owned: Vec<SymbolId> = self
            .analysis
            .symbols
            .iter()
            .enumerate()
            .filter(|(i, s)| {
                s.captured && self.analysis.symbol_owner.get(&SymbolId::from_index(*i)) == Some(&self.func_node)
            })
            .map(|(i, _)| SymbolId::from_index(i))
            .collect();
        owned.sort_by_key(SymbolId::index);
        owned
    }

    // ---- arena helpers ----

    fn new_inst(&mut self, block: BlockId, value: Value) -> InstId {
        let id = InstId::from_index(self.func.insts.len());
        self.func.insts.push(Inst { block, value });
        self.func.blocks[block.index()].insts.push(id);
        id
    }

    fn new_inst_list(&mut self, items: Vec<InstId>) -> InstListId {
        let id = InstListId::from_index(self.func.inst_lists.len());
        self.func.inst_lists.push(items);
        id
    }

    fn new_block(&mut self) -> BlockId {
        let id = BlockId::from_index(self.func.blocks.len());
        self.func.blocks.push(Block::default());
        id
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.func.blocks[to.index()].preds.push(from);
    }

    fn set_term(&mut self, block: BlockId, term: Terminator) {
        for succ in term.successors() {
            self.add_edge(block, succ);
        }
        self.func.blocks[block.index()].term = term;
    }

    // ---- Braun et al. SSA construction ----

    fn write_variable(&mut self, block: BlockId, sym: SymbolId, value: InstId) {
        self.defs.insert((block, sym), value);
    }

    fn read_variable(&mut self, block: BlockId, sym: SymbolId) -> InstId {
        if let Some(&v) = self.defs.get(&(block, sym)) {
            return v;
        }
        self.read_variable_recursive(block, sym)
    }

    fn read_variable_recursive(&mut self, block: BlockId, sym: SymbolId) -> InstId {
        let val = if !self.func.blocks[block.index()].sealed {
            let phi = self.new_phi(block);
            self.incomplete_phis.entry(block).or_default().push((sym, phi));
            phi
        } else {
            let preds = self.func.blocks[block.index()].preds.clone();
            match preds.len() {
                0 => self.new_inst(block, Value::Error),
                1 => self.read_variable(preds[0], sym),
                _ => {
                    let phi = self.new_phi(block);
                    // Write the (still operandless) phi before recursing so a
                    // cycle through this block reads the phi, not infinite
                    // recursion.
                    self.write_variable(block, sym, phi);
                    let operands: Vec<InstId> = preds.iter().map(|&p| self.read_variable(p, sym)).collect();
                    self.set_phi_operands(phi, operands)
                }
            }
        };
        self.write_variable(block, sym, val);
        val
    }

    fn new_phi(&mut self, block: BlockId) -> InstId {
        let empty = self.new_inst_list(Vec::new());
        self.new_inst(block, Value::Phi(empty))
    }

    fn set_phi_operands(&mut self, phi: InstId, operands: Vec<InstId>) -> InstId {
        for &op in &operands {
            if matches!(self.func.insts[op.index()].value, Value::Phi(_)) {
                self.phi_users.entry(op).or_default().push(phi);
            }
        }
        let Value::Phi(list_id) = self.func.insts[phi.index()].value else {
            unreachable!("set_phi_operands called on a non-phi instruction");
        };
        self.func.inst_lists[list_id.index()] = operands;
        self.try_remove_trivial(phi)
    }

    fn try_remove_trivial(&mut self, phi: InstId) -> InstId {
        let Value::Phi(list_id) = self.func.insts[phi.index()].value else {
            return phi;
        };
        let operands = self.func.inst_lists[list_id.index()].clone();
        let mut same: Option<InstId> = None;
        for op in operands {
            if op == phi || Some(op) == same {
                continue;
            }
            if same.is_some() {
                return phi; // merges more than one distinct value: not trivial
            }
            same = Some(op);
        }
        let same = same.unwrap_or_else(|| self.new_inst(self.func.insts[phi.index()].block, Value::Error));

        let users = self.phi_users.remove(&phi).unwrap_or_default();
        self.func.insts[phi.index()].value = Value::Alias(same);

        for user in users {
            let Value::Phi(user_list) = self.func.insts[user.index()].value else { continue };
            for slot in &mut self.func.inst_lists[user_list.index()] {
                if *slot == phi {
                    *slot = same;
                }
            }
            self.try_remove_trivial(user);
        }
        same
    }

    fn seal_block(&mut self, block: BlockId) {
        self.func.blocks[block.index()].sealed = true;
        let pending = self.incomplete_phis.remove(&block).unwrap_or_default();
        for (sym, phi) in pending {
            let preds = self.func.blocks[block.index()].preds.clone();
            let operands: Vec<InstId> = preds.iter().map(|&p| self.read_variable(p, sym)).collect();
            self.set_phi_operands(phi, operands);
        }
    }

    // ---- variable access respecting capture ----

    fn read_symbol(&mut self, sym: SymbolId) -> InstId {
        if let Some(&slot) = self.own_slots.get(&sym) {
            let env = self.own_env.expect("own_slots implies own_env exists");
            return self.new_inst(self.current, Value::Read(LValue::Closure { env, levels_up: 0, slot }));
        }
        if let Some((levels_up, slot)) = self.find_ancestor_slot(sym) {
            let env = self.env_arg.expect("a captured read implies this function has an env arg");
            return self.new_inst(self.current, Value::Read(LValue::Closure { env, levels_up, slot }));
        }
        self.read_variable(self.current, sym)
    }

    fn write_symbol(&mut self, sym: SymbolId, value: InstId) {
        if let Some(&slot) = self.own_slots.get(&sym) {
            let env = self.own_env.expect("own_slots implies own_env exists");
            self.new_inst(self.current, Value::Write(LValue::Closure { env, levels_up: 0, slot }, value));
            return;
        }
        if let Some((levels_up, slot)) = self.find_ancestor_slot(sym) {
            let env = self.env_arg.expect("a captured write implies this function has an env arg");
            self.new_inst(self.current, Value::Write(LValue::Closure { env, levels_up, slot }, value));
            return;
        }
        self.write_variable(self.current, sym, value);
    }

    fn find_ancestor_slot(&self, sym: SymbolId) -> Option<(u32, usize)> {
        for (i, slots) in self.ancestor_slots.iter().enumerate() {
            if let Some(&slot) = slots.get(&sym) {
                return Some((u32::try_from(i).expect("ancestor depth fits u32"), slot));
            }
        }
        None
    }

    // ---- statements / items ----

    fn build_item(&mut self, item: &Item) -> Option<InstId> {
        match &item.kind {
            ItemKind::Decl(d) => {
                self.build_decl(d);
                None
            }
            ItemKind::Stmt(s) => self.build_stmt(s),
        }
    }

    fn build_stmt(&mut self, stmt: &Stmt) -> Option<InstId> {
        match &stmt.kind {
            StmtKind::Expr(e) => Some(self.build_expr(e)),
            StmtKind::Decl(d) => {
                self.build_decl(d);
                None
            }
        }
    }

    fn build_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::Binding { binding, value, .. } => {
                let v = match value {
                    Some(e) => self.build_expr(e),
                    None => self.new_inst(self.current, Value::Constant(Constant::Null)),
                };
                self.bind_pattern(&binding.spec, v);
            }
            DeclKind::Func(f) => {
                let closure = self.build_closure(f);
                if let Some(name) = f.name {
                    let sym = self.analysis.node_symbol[&name.id];
                    self.write_symbol(sym, closure);
                }
            }
            DeclKind::Import { .. } => {
                // Module imports resolve at link time; nothing to lower here.
            }
        }
    }

    /// Binds a (possibly tuple-destructuring) pattern to an already
    /// evaluated value, emitting `TupleField` reads left-to-right.
    fn bind_pattern(&mut self, spec: &BindingSpec, value: InstId) {
        match spec {
            BindingSpec::Name(id) => {
                let sym = self.analysis.node_symbol[&id.id];
                self.write_symbol(sym, value);
            }
            BindingSpec::Tuple(parts) => {
                for (idx, part) in parts.iter().enumerate() {
                    let field = self.new_inst(self.current, Value::Read(LValue::TupleField(value, idx)));
                    self.bind_pattern(part, field);
                }
            }
        }
    }

    // ---- expressions ----

    fn build_expr(&mut self, expr: &Expr) -> InstId {
        match &expr.kind {
            ExprKind::Literal(lit) => self.build_literal(lit),
            ExprKind::Var(id) => {
                let sym = self.analysis.node_ref[&id.id];
                self.read_symbol(sym)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.build_expr(operand);
                self.new_inst(self.current, Value::UnaryOp(*op, v))
            }
            ExprKind::Binary { op: BinaryOp::And, lhs, rhs } => self.build_short_circuit(lhs, rhs, true),
            ExprKind::Binary { op: BinaryOp::Or, lhs, rhs } => self.build_short_circuit(lhs, rhs, false),
            ExprKind::Binary { op: BinaryOp::NullCoalesce, lhs, rhs } => self.build_null_coalesce(lhs, rhs),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.build_expr(lhs);
                let r = self.build_expr(rhs);
                self.new_inst(self.current, Value::BinaryOp(*op, l, r))
            }
            ExprKind::Assign { target, value } => {
                // Targets evaluate before the rhs (unlike a declaration's
                // initializer, which is rhs-first): `arr[i()] = f()` must
                // call `i()` before `f()`.
                let built = self.build_target(target);
                let v = self.build_expr(value);
                self.write_built_target(&built, v);
                v
            }
            ExprKind::CompoundAssign { op, target, value } => self.build_compound_assign(*op, target, value),
            ExprKind::Call { callee, args, access } => {
                let f = self.build_expr(callee);
                let arg_ids: Vec<InstId> = args.iter().map(|a| self.build_expr(a)).collect();
                self.build_optional(*access, f, move |me| {
                    let list = me.new_inst_list(arg_ids);
                    me.new_inst(me.current, Value::Call(f, list))
                })
            }
            ExprKind::MethodCall { receiver, method, args, access } => {
                let recv = self.build_expr(receiver);
                let method_name = method.name;
                let arg_ids: Vec<InstId> = args.iter().map(|a| self.build_expr(a)).collect();
                self.build_optional(*access, recv, move |me| {
                    let method_sym = me.new_inst(me.current, Value::Constant(Constant::Symbol(method_name)));
                    let handle_list = me.new_inst_list(vec![recv, method_sym]);
                    let handle = me.new_inst(me.current, Value::Aggregate(handle_list));
                    let list = me.new_inst_list(arg_ids);
                    me.new_inst(me.current, Value::MethodCall(handle, list))
                })
            }
            ExprKind::Field { object, name, access } => {
                let obj = self.build_expr(object);
                let field_name = name.name;
                self.build_optional(*access, obj, move |me| me.new_inst(me.current, Value::Read(LValue::Field(obj, field_name))))
            }
            ExprKind::Index { object, index, access } => {
                let obj = self.build_expr(object);
                let idx = self.build_expr(index);
                self.build_optional(*access, obj, move |me| me.new_inst(me.current, Value::Read(LValue::Index(obj, idx))))
            }
            ExprKind::Tuple(elems) => self.build_container(ContainerKind::Tuple, elems),
            ExprKind::Array(elems) => self.build_container(ContainerKind::Array, elems),
            ExprKind::Set(elems) => self.build_container(ContainerKind::Set, elems),
            ExprKind::Map(items) => {
                let mut flat = Vec::with_capacity(items.len() * 2);
                for item in items {
                    flat.push(self.build_expr(&item.key));
                    flat.push(self.build_expr(&item.value));
                }
                let list = self.new_inst_list(flat);
                self.new_inst(self.current, Value::Container(ContainerKind::Map, list))
            }
            ExprKind::Record(items) => {
                let fields: Vec<_> = items.iter().map(|i| i.name.name).collect();
                let schema = self.module.push_record_schema(fields);
                let values: Vec<InstId> = items.iter().map(|i| self.build_expr(&i.value)).collect();
                let list = self.new_inst_list(values);
                self.new_inst(self.current, Value::Record(schema, list))
            }
            ExprKind::StringGroup(pieces) => {
                let parts: Vec<InstId> = pieces
                    .iter()
                    .map(|p| match p {
                        StringPiece::Literal(s) => self.new_inst(self.current, Value::Constant(Constant::Str(*s))),
                        StringPiece::Expr(e) => self.build_expr(e),
                    })
                    .collect();
                let list = self.new_inst_list(parts);
                self.new_inst(self.current, Value::Format(list))
            }
            ExprKind::If { cond, then_branch, else_branch } => self.build_if(cond, then_branch, else_branch.as_deref()),
            ExprKind::While { cond, body } => self.build_while(cond, body),
            ExprKind::For { init, cond, step, body } => self.build_for(init.as_deref(), cond.as_deref(), step.as_deref(), body),
            ExprKind::Block(stmts) => self.build_block(stmts),
            ExprKind::Return(value) => {
                let v = match value {
                    Some(e) => self.build_expr(e),
                    None => self.new_inst(self.current, Value::Constant(Constant::Null)),
                };
                self.set_term(self.current, Terminator::Return(v));
                self.start_dead_block();
                v
            }
            ExprKind::Break => {
                let (brk, _) = *self.loop_stack.last().expect("break outside a loop");
                self.set_term(self.current, Terminator::Jump(brk));
                self.start_dead_block();
                self.new_inst(self.current, Value::Nop)
            }
            ExprKind::Continue => {
                let (_, cont) = *self.loop_stack.last().expect("continue outside a loop");
                self.set_term(self.current, Terminator::Jump(cont));
                self.start_dead_block();
                self.new_inst(self.current, Value::Nop)
            }
            ExprKind::Assert { cond, message } => {
                let c = self.build_expr(cond);
                let msg = message.as_ref().map(|m| self.build_expr(m));
                let fail_block = self.new_block();
                let ok_block = self.new_block();
                self.set_term(
                    self.current,
                    Terminator::Branch {
                        kind: BranchKind::IfFalse,
                        value: c,
                        taken: fail_block,
                        fallthrough: ok_block,
                    },
                );
                self.seal_block(fail_block);
                self.seal_block(ok_block);
                self.current = fail_block;
                self.set_term(self.current, Terminator::AssertFail(c, msg));
                self.current = ok_block;
                self.new_inst(self.current, Value::Constant(Constant::Null))
            }
            ExprKind::Func(f) => self.build_closure(f),
            ExprKind::Error => self.new_inst(self.current, Value::Error),
        }
    }

    fn build_literal(&mut self, lit: &Literal) -> InstId {
        let c = match lit {
            Literal::Int(i) => Constant::Int(*i),
            Literal::Float(f) => Constant::Float(FloatConst(*f)),
            Literal::Str(s) => Constant::Str(*s),
            Literal::Bool(true) => Constant::True,
            Literal::Bool(false) => Constant::False,
            Literal::Null => Constant::Null,
        };
        self.new_inst(self.current, Value::Constant(c))
    }

    fn build_container(&mut self, kind: ContainerKind, elems: &[Expr]) -> InstId {
        let ids: Vec<InstId> = elems.iter().map(|e| self.build_expr(e)).collect();
        let list = self.new_inst_list(ids);
        self.new_inst(self.current, Value::Container(kind, list))
    }

    /// Builds the non-value subexpressions of an assignment target (the
    /// object/index of a `Field`/`Index` lvalue) without writing anything,
    /// so callers can sequence them relative to the rhs and reuse the built
    /// `InstId`s for a later read and/or write of the same lvalue.
    fn build_target(&mut self, target: &Expr) -> BuiltTarget {
        match &target.kind {
            ExprKind::Var(id) => BuiltTarget::Var(self.analysis.node_ref[&id.id]),
            ExprKind::Field { object, name, .. } => BuiltTarget::Field(self.build_expr(object), name.name),
            ExprKind::Index { object, index, .. } => {
                let obj = self.build_expr(object);
                let idx = self.build_expr(index);
                BuiltTarget::Index(obj, idx)
            }
            ExprKind::Tuple(elems) => BuiltTarget::Tuple(elems.iter().map(|e| self.build_target(e)).collect()),
            _ => BuiltTarget::Error,
        }
    }

    fn write_built_target(&mut self, target: &BuiltTarget, value: InstId) {
        match target {
            BuiltTarget::Var(sym) => self.write_symbol(*sym, value),
            BuiltTarget::Field(obj, name) => {
                self.new_inst(self.current, Value::Write(LValue::Field(*obj, *name), value));
            }
            BuiltTarget::Index(obj, idx) => {
                self.new_inst(self.current, Value::Write(LValue::Index(*obj, *idx), value));
            }
            BuiltTarget::Tuple(parts) => {
                for (idx, part) in parts.iter().enumerate() {
                    let field = self.new_inst(self.current, Value::Read(LValue::TupleField(value, idx)));
                    self.write_built_target(part, field);
                }
            }
            BuiltTarget::Error => {
                self.new_inst(self.current, Value::Error);
            }
        }
    }

    /// `read lvalue -> binary op -> write back`, with the lvalue's
    /// subexpressions (object/index) built exactly once and shared between
    /// the read and the write: `arr[i()] += 1` calls `i()` once.
    fn build_compound_assign(&mut self, op: BinaryOp, target: &Expr, value: &Expr) -> InstId {
        match &target.kind {
            ExprKind::Var(id) => {
                let sym = self.analysis.node_ref[&id.id];
                let cur = self.read_symbol(sym);
                let rhs = self.build_expr(value);
                let result = self.new_inst(self.current, Value::BinaryOp(op, cur, rhs));
                self.write_symbol(sym, result);
                result
            }
            ExprKind::Field { object, name, .. } => {
                let obj = self.build_expr(object);
                let field = name.name;
                let cur = self.new_inst(self.current, Value::Read(LValue::Field(obj, field)));
                let rhs = self.build_expr(value);
                let result = self.new_inst(self.current, Value::BinaryOp(op, cur, rhs));
                self.new_inst(self.current, Value::Write(LValue::Field(obj, field), result));
                result
            }
            ExprKind::Index { object, index, .. } => {
                let obj = self.build_expr(object);
                let idx = self.build_expr(index);
                let cur = self.new_inst(self.current, Value::Read(LValue::Index(obj, idx)));
                let rhs = self.build_expr(value);
                let result = self.new_inst(self.current, Value::BinaryOp(op, cur, rhs));
                self.new_inst(self.current, Value::Write(LValue::Index(obj, idx), result));
                result
            }
            _ => {
                let _ = self.build_expr(value);
                self.new_inst(self.current, Value::Error)
            }
        }
    }

    /// Starts a fresh, immediately sealed block after a terminator with no
    /// fallthrough (return/break/continue); any statements textually
    /// following it in the source compile into dead code here.
    fn start_dead_block(&mut self) {
        let dead = self.new_block();
        self.seal_block(dead);
        self.current = dead;
    }

    fn build_short_circuit(&mut self, lhs: &Expr, rhs: &Expr, is_and: bool) -> InstId {
        let l = self.build_expr(lhs);
        let rhs_block = self.new_block();
        let join = self.new_block();
        let (taken, fallthrough) = if is_and { (rhs_block, join) } else { (join, rhs_block) };
        self.set_term(
            self.current,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                value: l,
                taken,
                fallthrough,
            },
        );
        let short_circuit_pred = self.current;
        self.seal_block(rhs_block);
        self.current = rhs_block;
        let r = self.build_expr(rhs);
        self.set_term(self.current, Terminator::Jump(join));
        let rhs_pred = self.current;
        self.seal_block(join);
        self.current = join;
        let phi = self.new_phi(join);
        let _ = short_circuit_pred;
        self.set_phi_operands(phi, vec![l, r])
    }

    fn build_null_coalesce(&mut self, lhs: &Expr, rhs: &Expr) -> InstId {
        let l = self.build_expr(lhs);
        let is_null = self.new_inst(self.current, Value::BinaryOp(BinaryOp::Eq, l, {
            self.new_inst(self.current, Value::Constant(Constant::Null))
        }));
        let rhs_block = self.new_block();
        let join = self.new_block();
        self.set_term(
            self.current,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                value: is_null,
                taken: rhs_block,
                fallthrough: join,
            },
        );
        self.seal_block(rhs_block);
        self.current = rhs_block;
        let r = self.build_expr(rhs);
        self.set_term(self.current, Terminator::Jump(join));
        self.seal_block(join);
        self.current = join;
        // `join`'s predecessor order is [fallthrough edge added by the branch
        // above (the non-null path, value `l`), then the later `rhs_block`
        // jump (value `r`)] — operands below must track that order.
        let phi = self.new_phi(join);
        self.set_phi_operands(phi, vec![l, r])
    }

    /// Guards `compute` behind a null check on `obj` when `access` is
    /// `Optional` (`?.`/`?[`/`?(`), short-circuiting the whole access to
    /// `null` without evaluating it.
    fn build_optional(&mut self, access: AccessType, obj: InstId, compute: impl FnOnce(&mut Self) -> InstId) -> InstId {
        if access == AccessType::Direct {
            return compute(self);
        }
        let null = self.new_inst(self.current, Value::Constant(Constant::Null));
        let is_null = self.new_inst(self.current, Value::BinaryOp(BinaryOp::Eq, obj, null));
        let some_block = self.new_block();
        let join = self.new_block();
        self.set_term(
            self.current,
            Terminator::Branch { kind: BranchKind::IfTrue, value: is_null, taken: join, fallthrough: some_block },
        );
        self.seal_block(some_block);
        self.current = some_block;
        let v = compute(self);
        self.set_term(self.current, Terminator::Jump(join));
        self.seal_block(join);
        self.current = join;
        let phi = self.new_phi(join);
        self.set_phi_operands(phi, vec![null, v])
    }

    fn build_if(&mut self, cond: &Expr, then_branch: &Expr, else_branch: Option<&Expr>) -> InstId {
        let c = self.build_expr(cond);
        let then_block = self.new_block();
        let join = self.new_block();
        let else_block = if else_branch.is_some() { Some(self.new_block()) } else { None };
        self.set_term(
            self.current,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                value: c,
                taken: then_block,
                fallthrough: else_block.unwrap_or(join),
            },
        );
        self.seal_block(then_block);
        self.current = then_block;
        let then_val = self.build_expr(then_branch);
        let then_terminated = !matches!(self.func.blocks[self.current.index()].term, Terminator::None);
        if !then_terminated {
            self.set_term(self.current, Terminator::Jump(join));
        }
        let then_end = self.current;

        let (else_val, else_terminated, else_end) = if let (Some(else_block), Some(else_expr)) = (else_block, else_branch) {
            self.seal_block(else_block);
            self.current = else_block;
            let v = self.build_expr(else_expr);
            let terminated = !matches!(self.func.blocks[self.current.index()].term, Terminator::None);
            if !terminated {
                self.set_term(self.current, Terminator::Jump(join));
            }
            (Some(v), terminated, self.current)
        } else {
            (None, false, else_block.unwrap_or(then_end))
        };

        self.seal_block(join);
        self.current = join;

        match (else_val, then_terminated, else_terminated) {
            (Some(ev), false, false) => {
                let phi = self.new_phi(join);
                self.set_phi_operands(phi, vec![then_val, ev])
            }
            (Some(ev), true, false) => {
                let _ = then_end;
                ev
            }
            (Some(_), false, true) => {
                let _ = else_end;
                then_val
            }
            (Some(_), true, true) => self.new_inst(join, Value::Error),
            (None, _, _) => self.new_inst(join, Value::Constant(Constant::Null)),
        }
    }

    fn build_while(&mut self, cond: &Expr, body: &Expr) -> InstId {
        let header = self.new_block();
        self.set_term(self.current, Terminator::Jump(header));
        self.current = header;
        let c = self.build_expr(cond);
        let body_block = self.new_block();
        let exit_block = self.new_block();
        self.set_term(
            self.current,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                value: c,
                taken: body_block,
                fallthrough: exit_block,
            },
        );
        self.loop_stack.push((exit_block, header));
        self.seal_block(body_block);
        self.current = body_block;
        self.build_expr(body);
        if matches!(self.func.blocks[self.current.index()].term, Terminator::None) {
            self.set_term(self.current, Terminator::Jump(header));
        }
        self.loop_stack.pop();
        // All of the header's predecessors (entry edge + body back-edge)
        // are now known.
        self.seal_block(header);
        self.seal_block(exit_block);
        self.current = exit_block;
        self.new_inst(self.current, Value::Constant(Constant::Null))
    }

    fn build_for(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Expr>, body: &Expr) -> InstId {
        if let Some(init) = init {
            self.build_stmt(init);
        }
        let header = self.new_block();
        self.set_term(self.current, Terminator::Jump(header));
        self.current = header;
        let body_block = self.new_block();
        let exit_block = self.new_block();
        let c = match cond {
            Some(c) => self.build_expr(c),
            None => self.new_inst(self.current, Value::Constant(Constant::True)),
        };
        self.set_term(
            self.current,
            Terminator::Branch {
                kind: BranchKind::IfTrue,
                value: c,
                taken: body_block,
                fallthrough: exit_block,
            },
        );
        let continue_block = self.new_block();
        self.loop_stack.push((exit_block, continue_block));
        self.seal_block(body_block);
        self.current = body_block;
        self.build_expr(body);
        if matches!(self.func.blocks[self.current.index()].term, Terminator::None) {
            self.set_term(self.current, Terminator::Jump(continue_block));
        }
        self.loop_stack.pop();
        self.seal_block(continue_block);
        self.current = continue_block;
        if let Some(step) = step {
            self.build_expr(step);
        }
        self.set_term(self.current, Terminator::Jump(header));
        self.seal_block(header);
        self.seal_block(exit_block);
        self.current = exit_block;
        self.new_inst(self.current, Value::Constant(Constant::Null))
    }

    fn build_block(&mut self, stmts: &[Stmt]) -> InstId {
        let mut last = None;
        for stmt in stmts {
            last = self.build_stmt(stmt);
        }
        last.unwrap_or_else(|| self.new_inst(self.current, Value::Constant(Constant::Null)))
    }

    fn build_closure(&mut self, f: &FuncDef) -> InstId {
        let mut child_ancestors = Vec::with_capacity(self.ancestor_slots.len() + 1);
        child_ancestors.push(self.own_slots.clone());
        child_ancestors.extend(self.ancestor_slots.iter().cloned());

        let child_func = {
            let mut child = FuncBuilder::new(self.module, self.analysis, self.strings, f.id, f.params.len(), child_ancestors);
            child.build_entry(|child| {
                for (idx, param) in f.params.iter().enumerate() {
                    let sym = child.analysis.node_symbol[&param.id];
                    let read = child.new_inst(child.current, Value::Read(LValue::Param(idx)));
                    child.write_symbol(sym, read);
                }
                Some(child.build_expr(&f.body))
            });
            let mut func = child.finish();
            if let Some(name) = f.name {
                func.name = Some(name.name);
            }
            func
        };
        let template = self.module.push_member(ModuleMember::Function { kind: ModuleMemberKind::Closure, func: child_func });

        let captures_of_child = self.analysis.captures.get(&f.id).cloned().unwrap_or_default();
        if captures_of_child.is_empty() {
            let env = self.own_env.or(self.env_arg).unwrap_or_else(|| self.new_inst(self.current, Value::Constant(Constant::Null)));
            return self.new_inst(self.current, Value::MakeClosure { env, template });
        }
        let env = self
            .own_env
            .expect("a function whose locals are captured by this closure must have allocated its own environment");
        self.new_inst(self.current, Value::MakeClosure { env, template })
    }
}

