use crate::span::Span;
use std::borrow::Cow;
use std::fmt::{self, Debug, Formatter};

/// A single `(type, name)` parameter declared by a [AstKind::FuncDef].
pub type Param = (String, String);

/// One `struct` member: its type, name, and an optional fixed-size array arity.
#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub ty: String,
    pub name: String,
    pub array: bool,
    pub size: u64,
}

/// One `(condition, body)` clause of an `if`/`elseif` chain.
#[derive(Debug, Clone)]
pub struct IfClause {
    pub condition: Vec<AstNode>,
    pub body: Vec<AstNode>,
}

/// The three kinds an `extern` declaration can take.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternKind {
    Native,
    Raw,
    C {
        return_type: String,
        params: Vec<String>,
    },
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExternKind::Native => write!(f, "native"),
            ExternKind::Raw => write!(f, "raw"),
            ExternKind::C { .. } => write!(f, "C"),
        }
    }
}

/// The two hooks an `implement` block may attach to a struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplementMethod {
    Init,
    Deinit,
}

impl fmt::Display for ImplementMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ImplementMethod::Init => write!(f, "init"),
            ImplementMethod::Deinit => write!(f, "deinit"),
        }
    }
}

/// The closed set of AST node shapes the parser can produce.
///
/// This is a tagged sum rather than an inheritance hierarchy: backends
/// dispatch on the variant directly instead of through a visitor trait,
/// which keeps the lowerer's hot path free of dynamic dispatch.
#[derive(Debug, Clone)]
pub enum AstKind {
    Word(String),
    Integer(i64),
    String {
        body: String,
        constant: bool,
    },
    Array {
        element_type: String,
        elements: Vec<AstNode>,
        constant: bool,
    },
    FuncDef {
        name: String,
        inline: bool,
        raw: bool,
        params: Vec<Param>,
        body: Vec<AstNode>,
    },
    Include {
        path: String,
    },
    Asm {
        text: String,
    },
    If {
        clauses: Vec<IfClause>,
        else_body: Option<Vec<AstNode>>,
    },
    While {
        condition: Vec<AstNode>,
        body: Vec<AstNode>,
    },
    Let {
        ty: String,
        name: String,
        array: bool,
        array_size: u64,
    },
    Enable {
        name: String,
    },
    Requires {
        name: String,
    },
    Version {
        name: String,
        not: bool,
        body: Vec<AstNode>,
    },
    Struct {
        name: String,
        parent: Option<String>,
        members: Vec<StructMember>,
    },
    Const {
        name: String,
        value: i64,
    },
    Enum {
        name: String,
        base_type: String,
        members: Vec<(String, i64)>,
    },
    Restrict {
        name: String,
    },
    Union {
        name: String,
        members: Vec<String>,
    },
    Alias {
        to: String,
        from: String,
        overwrite: bool,
    },
    Extern {
        name: String,
        kind: ExternKind,
    },
    Addr {
        target: String,
    },
    Implement {
        struct_name: String,
        method: ImplementMethod,
        body: Vec<AstNode>,
    },
    Set {
        name: String,
    },
    Return,
    Break,
    Continue,
}

/// An AST node: its shape plus the source span it was parsed from.
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstKind,
    pub span: Span,
}

impl AstNode {
    pub fn new(kind: AstKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// A short label for this node's variant, used in diagnostics and tree dumps.
    pub fn label(&self) -> &'static str {
        match &self.kind {
            AstKind::Word(_) => "Word",
            AstKind::Integer(_) => "Integer",
            AstKind::String { .. } => "String",
            AstKind::Array { .. } => "Array",
            AstKind::FuncDef { .. } => "FuncDef",
            AstKind::Include { .. } => "Include",
            AstKind::Asm { .. } => "Asm",
            AstKind::If { .. } => "If",
            AstKind::While { .. } => "While",
            AstKind::Let { .. } => "Let",
            AstKind::Enable { .. } => "Enable",
            AstKind::Requires { .. } => "Requires",
            AstKind::Version { .. } => "Version",
            AstKind::Struct { .. } => "Struct",
            AstKind::Const { .. } => "Const",
            AstKind::Enum { .. } => "Enum",
            AstKind::Restrict { .. } => "Restrict",
            AstKind::Union { .. } => "Union",
            AstKind::Alias { .. } => "Alias",
            AstKind::Extern { .. } => "Extern",
            AstKind::Addr { .. } => "Addr",
            AstKind::Implement { .. } => "Implement",
            AstKind::Set { .. } => "Set",
            AstKind::Return => "Return",
            AstKind::Break => "Break",
            AstKind::Continue => "Continue",
        }
    }

    fn children(&self) -> Vec<&AstNode> {
        match &self.kind {
            AstKind::Array { elements, .. } => elements.iter().collect(),
            AstKind::FuncDef { body, .. } => body.iter().collect(),
            AstKind::If { clauses, else_body } => clauses
                .iter()
                .flat_map(|c| c.condition.iter().chain(c.body.iter()))
                .chain(else_body.iter().flatten())
                .collect(),
            AstKind::While { condition, body } => condition.iter().chain(body.iter()).collect(),
            AstKind::Version { body, .. } => body.iter().collect(),
            AstKind::Implement { body, .. } => body.iter().collect(),
            _ => Vec::new(),
        }
    }
}

impl ptree::TreeItem for AstNode {
    type Child = AstNode;

    fn write_self<W: std::io::Write>(&self, f: &mut W, _: &ptree::Style) -> std::io::Result<()> {
        write!(f, "{} @ {}", self.label(), self.span)
    }

    fn children(&self) -> Cow<[Self::Child]> {
        Cow::from(AstNode::children(self).into_iter().cloned().collect::<Vec<_>>())
    }
}

impl AstNode {
    pub fn print(&self) -> std::io::Result<()> {
        ptree::print_tree(self)
    }
}
