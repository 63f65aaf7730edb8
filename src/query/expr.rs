use bson::Bson;

/// Comparison and logical operators of the predicate IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    AndAlso,
    OrElse,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }

    /// The operator with its operands swapped: `c < field` becomes
    /// `field > c`.
    pub fn flipped(self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert,
    ArrayLength,
}

/// Conversion target for `UnaryOp::Convert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeName {
    Bool,
    Int32,
    Int64,
    Double,
    Decimal,
    String,
    DateTime,
}

/// Tagged-variant predicate tree. Built by the text parser or the builder
/// API; interpreted by the evaluator; inspected by the optimizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Bson),
    /// The row parameter.
    Parameter(String),
    Member {
        name: String,
        target: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        result_type: Option<TypeName>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Function {
        name: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    Constructor {
        type_name: String,
        args: Vec<Expr>,
    },
    MemberInit {
        type_name: String,
        bindings: Vec<(String, Expr)>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
}

impl Expr {
    /// Whether any subtree touches the row parameter. Subtrees that do not
    /// are eagerly folded to constants at parse time.
    pub fn references_parameter(&self) -> bool {
        match self {
            Self::Constant(_) => false,
            Self::Parameter(_) => true,
            Self::Member { target, .. } => {
                target.as_ref().is_none_or(|t| t.references_parameter())
            }
            Self::Unary { operand, .. } => operand.references_parameter(),
            Self::Binary { left, right, .. } => {
                left.references_parameter() || right.references_parameter()
            }
            Self::Function { target, args, .. } => {
                target.as_ref().is_some_and(|t| t.references_parameter())
                    || args.iter().any(Self::references_parameter)
            }
            Self::Constructor { args, .. } => args.iter().any(Self::references_parameter),
            Self::MemberInit { bindings, .. } => {
                bindings.iter().any(|(_, e)| e.references_parameter())
            }
            Self::Conditional { test, if_true, if_false } => {
                test.references_parameter()
                    || if_true.references_parameter()
                    || if_false.references_parameter()
            }
        }
    }
}

/// Candidate document keys for a member name, probed in order: camelCase,
/// then verbatim; `Id`/`id` additionally maps to `_id`.
pub fn member_key_candidates(name: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(3);
    let camel = camel_case(name);
    out.push(camel.clone());
    if name != camel {
        out.push(name.to_string());
    }
    if name.eq_ignore_ascii_case("id") && !out.iter().any(|c| c == "_id") {
        out.push("_id".to_string());
    }
    out
}

fn camel_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// --- builder API ---------------------------------------------------------

/// Member access on the row: `field("age")`.
pub fn field(name: &str) -> Expr {
    Expr::Member { name: name.to_string(), target: None }
}

/// Constant from anything `Bson` can absorb.
pub fn val(v: impl Into<Bson>) -> Expr {
    Expr::Constant(v.into())
}

impl Expr {
    fn binary(self, op: BinaryOp, rhs: Expr) -> Expr {
        Expr::Binary { op, left: Box::new(self), right: Box::new(rhs) }
    }

    pub fn eq(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Eq, Expr::Constant(rhs.into()))
    }

    pub fn ne(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Ne, Expr::Constant(rhs.into()))
    }

    pub fn gt(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Gt, Expr::Constant(rhs.into()))
    }

    pub fn ge(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Ge, Expr::Constant(rhs.into()))
    }

    pub fn lt(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Lt, Expr::Constant(rhs.into()))
    }

    pub fn le(self, rhs: impl Into<Bson>) -> Expr {
        self.binary(BinaryOp::Le, Expr::Constant(rhs.into()))
    }

    pub fn and(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::AndAlso, rhs)
    }

    pub fn or(self, rhs: Expr) -> Expr {
        self.binary(BinaryOp::OrElse, rhs)
    }

    pub fn not(self) -> Expr {
        Expr::Unary { op: UnaryOp::Not, operand: Box::new(self), result_type: None }
    }

    pub fn convert(self, to: TypeName) -> Expr {
        Expr::Unary { op: UnaryOp::Convert, operand: Box::new(self), result_type: Some(to) }
    }

    pub fn method(self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function { name: name.to_string(), target: Some(Box::new(self)), args }
    }

    pub fn member(self, name: &str) -> Expr {
        Expr::Member { name: name.to_string(), target: Some(Box::new(self)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_reference_tracking() {
        let constant = val(1).eq(2);
        assert!(!constant.references_parameter());
        let rowful = field("age").gt(30).and(val(true));
        assert!(rowful.references_parameter());
    }

    #[test]
    fn member_candidates_order() {
        assert_eq!(member_key_candidates("Name"), vec!["name", "Name"]);
        assert_eq!(member_key_candidates("name"), vec!["name"]);
        assert_eq!(member_key_candidates("Id"), vec!["id", "Id", "_id"]);
    }
}
