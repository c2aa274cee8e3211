#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Eq,
    NotEq,
    Add,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    StringLit(String),
    IntLit(i64),
    FloatLit(f64),
    BoolLit(bool),
    NoneLit,
    List(Vec<Expr>),
    Var(String),
    Attribute(Box<Expr>, String), // foo.bar
    Index(Box<Expr>, Box<Expr>),  // foo['bar']
    Not(Box<Expr>),
    BinOp(Box<Expr>, BinOp, Box<Expr>),
    Filter {
        expr: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Var(Expr),
    For {
        target: String, // e.g., "item"
        iterable: Expr,
        body: Vec<Node>,
    },
    If {
        cases: Vec<(Expr, Vec<Node>)>, // (condition, body). Includes if and elifs.
        else_body: Option<Vec<Node>>,
    },
    Block {
        name: String,
        body: Vec<Node>,
    },
    Extends(String), // parent template identifier
    Include(String), // looked up at render time
}

impl Node {
    /// Child node sequences owned by this node.
    pub fn children(&self) -> Vec<&[Node]> {
        match self {
            Node::For { body, .. } | Node::Block { body, .. } => vec![body.as_slice()],
            Node::If { cases, else_body } => cases
                .iter()
                .map(|(_, body)| body.as_slice())
                .chain(else_body.as_deref())
                .collect(),
            Node::Text(_) | Node::Var(_) | Node::Extends(_) | Node::Include(_) => Vec::new(),
        }
    }
}
