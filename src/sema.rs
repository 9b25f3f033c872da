//! Semantic analysis (§4.2): scope construction, identifier resolution,
//! capture-set computation, and expression-category tagging.
//!
//! Scopes are built and resolved in one recursive walk rather than the two
//! separate traversals spec.md describes: each block first declares all of
//! its immediate `var`/`const`/`func`/`import` children, then resolves
//! every statement against that scope plus its ancestors. This gives the
//! same forward-visibility semantics as "declare, then resolve" without a
//! second pass over the whole tree.

use ahash::AHashMap;

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::intern::{StringId, StringTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("symbol id overflow"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Const,
    Param,
    Func,
    Import,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: StringId,
    pub kind: SymbolKind,
    pub declaring_node: NodeId,
    pub captured: bool,
    pub assigned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprCategory {
    Value,
    None,
    Never,
}

/// Result of running the analyzer over one `File`: the side tables later
/// passes (mainly the IR builder) need, keyed by `NodeId`.
#[derive(Debug, Default)]
pub struct Analysis {
    pub symbols: Vec<Symbol>,
    /// Declaring-node (the `Identifier` in a binding/param/func name) -> symbol.
    pub node_symbol: AHashMap<NodeId, SymbolId>,
    /// Using-node (a `Var` expression's identifier) -> resolved symbol.
    pub node_ref: AHashMap<NodeId, SymbolId>,
    pub categories: AHashMap<NodeId, ExprCategory>,
    /// Function (`FuncDef.id`, or the root file's id for top-level code) ->
    /// ordered set of symbols it captures from an enclosing function.
    pub captures: AHashMap<NodeId, Vec<SymbolId>>,
    /// Symbol -> the function that declares it (its `FuncDef.id`, or the
    /// file id for top-level declarations).
    pub symbol_owner: AHashMap<SymbolId, NodeId>,
    /// Function -> its immediately enclosing function (`None` for the file
    /// root). Lets the IR builder compute `levels_up` for `LValue::Closure`.
    pub func_parent: AHashMap<NodeId, Option<NodeId>>,
}

struct Scope {
    parent: Option<usize>,
    func: NodeId,
    names: AHashMap<StringId, SymbolId>,
}

struct Analyzer<'a> {
    strings: &'a StringTable,
    diags: &'a mut Diagnostics,
    analysis: Analysis,
    scopes: Vec<Scope>,
    scope_stack: Vec<usize>,
    func_stack: Vec<NodeId>,
}

#[must_use]
pub fn analyze(file: &File, strings: &StringTable, diags: &mut Diagnostics) -> Analysis {
    let mut analyzer = Analyzer {
        strings,
        diags,
        analysis: Analysis::default(),
        scopes: Vec::new(),
        scope_stack: Vec::new(),
        func_stack: vec![file.id],
    };
    analyzer.analysis.func_parent.insert(file.id, None);
    analyzer.push_scope(file.id);
    for item in &file.items {
        analyzer.declare_item(item);
    }
    for item in &file.items {
        analyzer.resolve_item(item);
    }
    analyzer.pop_scope();
    analyzer.analysis
}

impl<'a> Analyzer<'a> {
    fn push_scope(&mut self, func: NodeId) {
        let parent = self.scope_stack.last().copied();
        self.scopes.push(Scope {
            parent,
            func,
            names: AHashMap::default(),
        });
        self.scope_stack.push(self.scopes.len() - 1);
    }

    fn pop_scope(&mut self) {
        self.scope_stack.pop();
    }

    fn current_scope(&self) -> usize {
        *self.scope_stack.last().expect("analyzer always has an active scope")
    }

    fn declare(&mut self, name: StringId, kind: SymbolKind, node: NodeId, span: crate::span::Span) -> SymbolId {
        let scope_idx = self.current_scope();
        let func = self.scopes[scope_idx].func;
        if let Some(&existing) = self.scopes[scope_idx].names.get(&name) {
            let existing_name = self.strings.resolve(self.analysis.symbols[existing.index()].name);
            self.diags.error(span, format!("'{existing_name}' is already declared in this scope"));
        }
        let id = SymbolId(self.analysis.symbols.len() as u32);
        self.analysis.symbols.push(Symbol {
            name,
            kind,
            declaring_node: node,
            captured: false,
            assigned: false,
        });
        self.scopes[scope_idx].names.insert(name, id);
        self.analysis.node_symbol.insert(node, id);
        self.analysis.symbol_owner.insert(id, func);
        id
    }

    /// Resolves `name` starting from the current scope, marking the symbol
    /// captured (and recording it in every crossed function's capture set)
    /// if the declaration lives outside the current function.
    fn resolve(&mut self, name: StringId, use_node: NodeId, span: crate::span::Span) -> Option<SymbolId> {
        let current_func = *self.func_stack.last().expect("always inside a function context");
        let mut scope_idx = Some(self.current_scope());
        while let Some(idx) = scope_idx {
            if let Some(&sym) = self.scopes[idx].names.get(&name) {
                self.analysis.node_ref.insert(use_node, sym);
                let owner = self.analysis.symbol_owner[&sym];
                if owner != current_func {
                    self.analysis.symbols[sym.index()].captured = true;
                    let entry = self.analysis.captures.entry(current_func).or_default();
                    if !entry.contains(&sym) {
                        entry.push(sym);
                    }
                }
                return Some(sym);
            }
            scope_idx = self.scopes[idx].parent;
        }
        let text = self.strings.resolve(name);
        self.diags.error(span, format!("unresolved identifier '{text}'"));
        None
    }

    fn set_category(&mut self, node: NodeId, cat: ExprCategory) {
        self.analysis.categories.insert(node, cat);
    }

    fn category_of(&self, node: NodeId) -> ExprCategory {
        *self.analysis.categories.get(&node).unwrap_or(&ExprCategory::Value)
    }

    fn require_value(&mut self, expr: &Expr) {
        if self.category_of(expr.id) == ExprCategory::None {
            self.diags.error(expr.span, "expression does not produce a value in this context");
        }
    }

    // ---- declare pass ----

    fn declare_item(&mut self, item: &Item) {
        match &item.kind {
            ItemKind::Decl(d) => self.declare_decl(d),
            ItemKind::Stmt(_) => {}
        }
    }

    fn declare_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::Binding { binding, .. } => self.declare_binding(binding, decl),
            DeclKind::Func(f) => {
                if let Some(name) = f.name {
                    self.declare(name.name, SymbolKind::Func, name.id, name.span);
                }
            }
            DeclKind::Import { name, alias } => {
                let bound = alias.unwrap_or(*name);
                self.declare(bound.name, SymbolKind::Import, bound.id, bound.span);
            }
        }
    }

    fn declare_binding(&mut self, binding: &Binding, decl: &Decl) {
        let kind = match &decl.kind {
            DeclKind::Binding { modifier: Modifier::Var, .. } => SymbolKind::Var,
            DeclKind::Binding { modifier: Modifier::Const, .. } => SymbolKind::Const,
            _ => unreachable!("declare_binding only called for bindings"),
        };
        self.declare_binding_spec(&binding.spec, kind);
    }

    fn declare_binding_spec(&mut self, spec: &BindingSpec, kind: SymbolKind) {
        match spec {
            BindingSpec::Name(id) => {
                self.declare(id.name, kind, id.id, id.span);
            }
            BindingSpec::Tuple(parts) => {
                for part in parts {
                    self.declare_binding_spec(part, kind);
                }
            }
        }
    }

    fn declare_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::Decl(d) = &stmt.kind {
            self.declare_decl(d);
        }
    }

    // ---- resolve + category pass ----

    fn resolve_item(&mut self, item: &Item) {
        match &item.kind {
            ItemKind::Decl(d) => self.resolve_decl(d),
            ItemKind::Stmt(s) => self.resolve_stmt(s),
        }
    }

    fn resolve_decl(&mut self, decl: &Decl) {
        match &decl.kind {
            DeclKind::Binding { value, .. } => {
                if let Some(v) = value {
                    self.resolve_expr(v);
                    self.require_value(v);
                }
            }
            DeclKind::Func(f) => self.resolve_func(f),
            DeclKind::Import { .. } => {}
        }
    }

    fn resolve_func(&mut self, f: &FuncDef) {
        self.func_stack.push(f.id);
        self.analysis.func_parent.insert(f.id, self.func_stack.get(self.func_stack.len().wrapping_sub(2)).copied());
        self.push_scope(f.id);
        for param in &f.params {
            self.declare(param.name, SymbolKind::Param, param.id, param.span);
        }
        self.resolve_expr(&f.body);
        self.pop_scope();
        self.func_stack.pop();
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) => self.resolve_expr(e),
            StmtKind::Decl(d) => self.resolve_decl(d),
        }
    }

    fn resolve_block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.declare_stmt(stmt);
        }
        for stmt in stmts {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Error => self.set_category(expr.id, ExprCategory::Value),
            ExprKind::Var(id) => {
                self.resolve(id.name, id.id, id.span);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Unary { operand, .. } => {
                self.resolve_expr(operand);
                self.require_value(operand);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Binary { lhs, rhs, .. } => {
                self.resolve_expr(lhs);
                self.require_value(lhs);
                self.resolve_expr(rhs);
                self.require_value(rhs);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
                self.resolve_expr(target);
                self.mark_assigned(target);
                self.resolve_expr(value);
                self.require_value(value);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Call { callee, args, .. } => {
                self.resolve_expr(callee);
                self.require_value(callee);
                for a in args {
                    self.resolve_expr(a);
                    self.require_value(a);
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.resolve_expr(receiver);
                self.require_value(receiver);
                for a in args {
                    self.resolve_expr(a);
                    self.require_value(a);
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Field { object, .. } => {
                self.resolve_expr(object);
                self.require_value(object);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Index { object, index, .. } => {
                self.resolve_expr(object);
                self.require_value(object);
                self.resolve_expr(index);
                self.require_value(index);
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Tuple(elems) | ExprKind::Array(elems) | ExprKind::Set(elems) => {
                for e in elems {
                    self.resolve_expr(e);
                    self.require_value(e);
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Map(items) => {
                for item in items {
                    self.resolve_expr(&item.key);
                    self.require_value(&item.key);
                    self.resolve_expr(&item.value);
                    self.require_value(&item.value);
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::Record(items) => {
                for item in items {
                    self.resolve_expr(&item.value);
                    self.require_value(&item.value);
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::StringGroup(pieces) => {
                for piece in pieces {
                    if let StringPiece::Expr(e) = piece {
                        self.resolve_expr(e);
                        self.require_value(e);
                    }
                }
                self.set_category(expr.id, ExprCategory::Value);
            }
            ExprKind::If { cond, then_branch, else_branch } => {
                self.resolve_expr(cond);
                self.require_value(cond);
                self.resolve_expr(then_branch);
                let then_cat = self.category_of(then_branch.id);
                let cat = match else_branch {
                    None => ExprCategory::None,
                    Some(e) => {
                        self.resolve_expr(e);
                        let else_cat = self.category_of(e.id);
                        match (then_cat, else_cat) {
                            (ExprCategory::Never, ExprCategory::Never) => ExprCategory::Never,
                            (ExprCategory::Value, ExprCategory::Value) => ExprCategory::Value,
                            _ => ExprCategory::None,
                        }
                    }
                };
                self.set_category(expr.id, cat);
            }
            ExprKind::While { cond, body } => {
                self.resolve_expr(cond);
                self.require_value(cond);
                self.resolve_expr(body);
                self.set_category(expr.id, ExprCategory::None);
            }
            ExprKind::For { init, cond, step, body } => {
                self.push_scope(*self.func_stack.last().expect("inside a function"));
                if let Some(init) = init {
                    self.declare_stmt(init);
                    self.resolve_stmt(init);
                }
                if let Some(c) = cond {
                    self.resolve_expr(c);
                    self.require_value(c);
                }
                if let Some(s) = step {
                    self.resolve_expr(s);
                }
                self.resolve_expr(body);
                self.pop_scope();
                self.set_category(expr.id, ExprCategory::None);
            }
            ExprKind::Block(stmts) => {
                self.push_scope(*self.func_stack.last().expect("inside a function"));
                self.resolve_block(stmts);
                self.pop_scope();
                let cat = match stmts.last() {
                    Some(Stmt { kind: StmtKind::Expr(e), .. }) => self.category_of(e.id),
                    _ => ExprCategory::None,
                };
                self.set_category(expr.id, cat);
            }
            ExprKind::Return(value) => {
                if let Some(v) = value {
                    self.resolve_expr(v);
                    self.require_value(v);
                }
                self.set_category(expr.id, ExprCategory::Never);
            }
            ExprKind::Break | ExprKind::Continue => {
                self.set_category(expr.id, ExprCategory::Never);
            }
            ExprKind::Assert { cond, message } => {
                self.resolve_expr(cond);
                self.require_value(cond);
                if let Some(m) = message {
                    self.resolve_expr(m);
                    self.require_value(m);
                }
                self.set_category(expr.id, ExprCategory::None);
            }
            ExprKind::Func(f) => {
                self.resolve_func(f);
                self.set_category(expr.id, ExprCategory::Value);
            }
        }
    }

    fn mark_assigned(&mut self, target: &Expr) {
        if let ExprKind::Var(id) = &target.kind {
            if let Some(&sym) = self.analysis.node_ref.get(&id.id) {
                self.analysis.symbols[sym.index()].assigned = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    fn run(src: &str) -> (File, Analysis, Diagnostics) {
        let mut strings = StringTable::new();
        let mut diags = Diagnostics::new();
        let file = parse_file(src, &mut strings, &mut diags);
        let analysis = analyze(&file, &strings, &mut diags);
        (file, analysis, diags)
    }

    #[test]
    fn unresolved_identifier_is_an_error() {
        let (_, _, diags) = run("x;");
        assert!(diags.has_errors());
    }

    #[test]
    fn duplicate_declaration_is_an_error() {
        let (_, _, diags) = run("var a = 1; var a = 2;");
        assert!(diags.has_errors());
    }

    #[test]
    fn closure_capture_is_recorded() {
        let (file, analysis, diags) = run("func outer() { var b = 2; return func() { b }; }");
        assert!(!diags.has_errors());
        let ItemKind::Decl(Decl { kind: DeclKind::Func(outer), .. }) = &file.items[0].kind else {
            panic!("expected a func decl");
        };
        let ExprKind::Block(stmts) = &outer.body.kind else { panic!("expected block body") };
        let StmtKind::Expr(Expr { kind: ExprKind::Return(Some(inner)), .. }) = &stmts[1].kind else {
            panic!("expected return of inner closure");
        };
        let ExprKind::Func(inner_func) = &inner.kind else { panic!("expected func literal") };
        assert_eq!(analysis.captures.get(&inner_func.id).map(Vec::len), Some(1));
    }

    #[test]
    fn if_without_else_is_none() {
        let (file, analysis, diags) = run("if true { 1 };");
        assert!(!diags.has_errors());
        let ItemKind::Stmt(Stmt { kind: StmtKind::Expr(e), .. }) = &file.items[0].kind else {
            panic!("expected expr stmt");
        };
        assert_eq!(analysis.categories[&e.id], ExprCategory::None);
    }

    #[test]
    fn value_required_context_flags_none() {
        let (_, _, diags) = run("1 + (if true { 1 });");
        assert!(diags.has_errors());
    }
}
