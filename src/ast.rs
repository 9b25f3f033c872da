//! Abstract syntax tree.
//!
//! Every node owns its children (`Box`/`Vec`, never shared); the only
//! cross-references are [`NodeId`]s used to key side tables built by later
//! passes (symbol refs, expression categories). `has_error` marks a subtree
//! the parser only partially recovered from — later passes skip codegen for
//! it but must not choke on its shape.

use crate::intern::StringId;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Hands out fresh, file-unique node ids. Owned by the parser for the
/// duration of one `parseFile` call.
#[derive(Debug, Default)]
pub struct NodeIdGen(u32);

impl NodeIdGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> NodeId {
        let id = NodeId(self.0);
        self.0 += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Shl,
    Shr,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    NullCoalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
}

/// Tags a call/field/index node as using `?.`/`?[`/`?(` rather than its
/// plain form: a `Optional` access short-circuits the whole chain to null
/// when the receiver is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Direct,
    Optional,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(StringId),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy)]
pub struct Identifier {
    pub id: NodeId,
    pub span: Span,
    pub name: StringId,
}

#[derive(Debug, Clone)]
pub struct MapItem {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct RecordItem {
    pub name: Identifier,
    pub value: Expr,
}

/// One piece of a (possibly) interpolated string, after the simplifier has
/// collapsed adjacent literal fragments (§4.2).
#[derive(Debug, Clone)]
pub enum StringPiece {
    Literal(StringId),
    Expr(Expr),
}

/// Destructuring shape of a `var`/`const` binding: a plain name, or a tuple
/// pattern for `var (a, b, c) = ...`.
#[derive(Debug, Clone)]
pub enum BindingSpec {
    Name(Identifier),
    Tuple(Vec<BindingSpec>),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub id: NodeId,
    pub span: Span,
    pub spec: BindingSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Var,
    Const,
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub name: Option<Identifier>,
    pub params: Vec<Identifier>,
    pub body: Box<Expr>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Var(Identifier),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        op: BinaryOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        access: AccessType,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: Identifier,
        args: Vec<Expr>,
        access: AccessType,
    },
    Field {
        object: Box<Expr>,
        name: Identifier,
        access: AccessType,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        access: AccessType,
    },
    Tuple(Vec<Expr>),
    Array(Vec<Expr>),
    Set(Vec<Expr>),
    Map(Vec<MapItem>),
    Record(Vec<RecordItem>),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    While {
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        body: Box<Expr>,
    },
    Block(Vec<Stmt>),
    Return(Option<Box<Expr>>),
    Break,
    Continue,
    Assert {
        cond: Box<Expr>,
        message: Option<Box<Expr>>,
    },
    Func(Box<FuncDef>),
    /// A `StringGroupExpr` after simplification: alternating literal and
    /// embedded-expression pieces (§4.2). A single un-interpolated literal
    /// is represented directly as `Literal(Str(..))`, not a one-piece group.
    StringGroup(Vec<StringPiece>),
    /// Placeholder for a subtree the parser could not recover at all.
    Error,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Binding {
        modifier: Modifier,
        binding: Binding,
        value: Option<Expr>,
    },
    Func(FuncDef),
    Import {
        name: Identifier,
        alias: Option<Identifier>,
    },
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub kind: DeclKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Decl(Decl),
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum ItemKind {
    Decl(Decl),
    Stmt(Stmt),
}

#[derive(Debug, Clone)]
pub struct Item {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub kind: ItemKind,
}

/// Root of one compiled source file. Always produced, even when every item
/// in it is an error node (§4.1 "the returned top-level `File` always
/// exists").
#[derive(Debug, Clone)]
pub struct File {
    pub id: NodeId,
    pub span: Span,
    pub has_error: bool,
    pub items: Vec<Item>,
}

impl Decl {
    #[must_use]
    pub fn declared_names(&self) -> Vec<Identifier> {
        match &self.kind {
            DeclKind::Binding { binding, .. } => collect_binding_names(&binding.spec),
            DeclKind::Func(f) => f.name.into_iter().collect(),
            DeclKind::Import { name, alias } => vec![alias.unwrap_or(*name)],
        }
    }
}

fn collect_binding_names(spec: &BindingSpec) -> Vec<Identifier> {
    match spec {
        BindingSpec::Name(id) => vec![*id],
        BindingSpec::Tuple(parts) => parts.iter().flat_map(collect_binding_names).collect(),
    }
}
