use bson::Bson;

use crate::errors::{Error, Result};
use crate::query::eval::evaluate_const;
use crate::query::expr::{BinaryOp, Expr, TypeName, UnaryOp};

/// Parse a predicate like `age >= 21 && name.StartsWith("A")` into the IR.
///
/// A bare identifier (or `$ident`) is a member of the row parameter. Any
/// subtree that never touches the row is folded to a constant; calls the
/// folder cannot resolve stay behind as `Function` nodes for the evaluator.
pub fn parse(source: &str) -> Result<Expr> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0, source };
    let expr = parser.ternary()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("trailing input after predicate"));
    }
    Ok(fold(expr))
}

/// Bottom-up constant folding of parameter-free subtrees.
pub fn fold(expr: Expr) -> Expr {
    let expr = match expr {
        Expr::Unary { op, operand, result_type } => {
            Expr::Unary { op, operand: Box::new(fold(*operand)), result_type }
        }
        Expr::Binary { op, left, right } => {
            Expr::Binary { op, left: Box::new(fold(*left)), right: Box::new(fold(*right)) }
        }
        Expr::Function { name, target, args } => Expr::Function {
            name,
            target: target.map(|t| Box::new(fold(*t))),
            args: args.into_iter().map(fold).collect(),
        },
        Expr::Member { name, target } => {
            Expr::Member { name, target: target.map(|t| Box::new(fold(*t))) }
        }
        Expr::Conditional { test, if_true, if_false } => Expr::Conditional {
            test: Box::new(fold(*test)),
            if_true: Box::new(fold(*if_true)),
            if_false: Box::new(fold(*if_false)),
        },
        Expr::Constructor { type_name, args } => {
            Expr::Constructor { type_name, args: args.into_iter().map(fold).collect() }
        }
        Expr::MemberInit { type_name, bindings } => Expr::MemberInit {
            type_name,
            bindings: bindings.into_iter().map(|(k, v)| (k, fold(v))).collect(),
        },
        leaf => leaf,
    };
    if matches!(expr, Expr::Constant(_)) || expr.references_parameter() {
        return expr;
    }
    match evaluate_const(&expr) {
        Ok(v) => Expr::Constant(v.unwrap_or(Bson::Null)),
        // Unresolvable constant subtree: the evaluator gets another shot.
        Err(_) => expr,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Question,
    Colon,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    AndAnd,
    OrOr,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    Dollar,
}

fn lex(source: &str) -> Result<Vec<Tok>> {
    let bytes: Vec<char> = source.chars().collect();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            '.' => {
                out.push(Tok::Dot);
                i += 1;
            }
            '?' => {
                out.push(Tok::Question);
                i += 1;
            }
            ':' => {
                out.push(Tok::Colon);
                i += 1;
            }
            '$' => {
                out.push(Tok::Dollar);
                i += 1;
            }
            '+' => {
                out.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&'=') => {
                out.push(Tok::Eq);
                i += 2;
            }
            '!' if bytes.get(i + 1) == Some(&'=') => {
                out.push(Tok::Ne);
                i += 2;
            }
            '!' => {
                out.push(Tok::Bang);
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&'=') => {
                out.push(Tok::Ge);
                i += 2;
            }
            '>' => {
                out.push(Tok::Gt);
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&'=') => {
                out.push(Tok::Le);
                i += 2;
            }
            '<' => {
                out.push(Tok::Lt);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&'&') => {
                out.push(Tok::AndAnd);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&'|') => {
                out.push(Tok::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let (s, next) = lex_string(&bytes, i)?;
                out.push(Tok::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if i < bytes.len()
                    && bytes[i] == '.'
                    && bytes.get(i + 1).is_some_and(char::is_ascii_digit)
                {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = bytes[start..i].iter().collect();
                if is_float {
                    out.push(Tok::Float(text.parse().map_err(|_| {
                        Error::Unsupported(format!("bad number literal '{text}'"))
                    })?));
                } else {
                    out.push(Tok::Int(text.parse().map_err(|_| {
                        Error::Unsupported(format!("bad number literal '{text}'"))
                    })?));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
                    i += 1;
                }
                let ident: String = bytes[start..i].iter().collect();
                // dt"2024-01-01T00:00:00Z" datetime literal.
                if ident == "dt" && matches!(bytes.get(i), Some(&'"') | Some(&'\'')) {
                    let (s, next) = lex_string(&bytes, i)?;
                    out.push(Tok::DateTime(s));
                    i = next;
                } else {
                    out.push(Tok::Ident(ident));
                }
            }
            other => return Err(Error::Unsupported(format!("unexpected character '{other}'"))),
        }
    }
    Ok(out)
}

fn lex_string(bytes: &[char], start: usize) -> Result<(String, usize)> {
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            '\\' => {
                let escaped = bytes
                    .get(i + 1)
                    .ok_or_else(|| Error::Unsupported("unterminated escape".into()))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(Error::Unsupported("unterminated string literal".into()))
}

struct Parser<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    source: &'a str,
}

const CONVERT_FNS: &[(&str, TypeName)] = &[
    ("int32", TypeName::Int32),
    ("int64", TypeName::Int64),
    ("double", TypeName::Double),
    ("decimal", TypeName::Decimal),
    ("string", TypeName::String),
    ("bool", TypeName::Bool),
    ("datetime", TypeName::DateTime),
];

impl Parser<'_> {
    fn error(&self, msg: &str) -> Error {
        Error::Unsupported(format!("{msg} in predicate '{}'", self.source))
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) { Ok(()) } else { Err(self.error(what)) }
    }

    fn ternary(&mut self) -> Result<Expr> {
        let test = self.or()?;
        if self.eat(&Tok::Question) {
            let if_true = self.ternary()?;
            self.expect(&Tok::Colon, "expected ':' in conditional")?;
            let if_false = self.ternary()?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
            });
        }
        Ok(test)
    }

    fn or(&mut self) -> Result<Expr> {
        let mut left = self.and()?;
        while self.eat(&Tok::OrOr) {
            let right = self.and()?;
            left = Expr::Binary {
                op: BinaryOp::OrElse,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr> {
        let mut left = self.comparison()?;
        while self.eat(&Tok::AndAnd) {
            let right = self.comparison()?;
            left = Expr::Binary {
                op: BinaryOp::AndAlso,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Tok::Eq) => BinaryOp::Eq,
            Some(Tok::Ne) => BinaryOp::Ne,
            Some(Tok::Gt) => BinaryOp::Gt,
            Some(Tok::Ge) => BinaryOp::Ge,
            Some(Tok::Lt) => BinaryOp::Lt,
            Some(Tok::Le) => BinaryOp::Le,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary { op, left: Box::new(left), right: Box::new(right) })
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinaryOp::Add,
                Some(Tok::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinaryOp::Mul,
                Some(Tok::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Bang) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                result_type: None,
            });
        }
        if self.eat(&Tok::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
                result_type: None,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        while self.eat(&Tok::Dot) {
            let Some(Tok::Ident(name)) = self.bump() else {
                return Err(self.error("expected member name after '.'"));
            };
            if self.eat(&Tok::LParen) {
                let args = self.arguments()?;
                expr = Expr::Function { name, target: Some(Box::new(expr)), args };
            } else {
                expr = Expr::Member { name, target: Some(Box::new(expr)) };
            }
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.ternary()?);
            if self.eat(&Tok::RParen) {
                return Ok(args);
            }
            self.expect(&Tok::Comma, "expected ',' between arguments")?;
        }
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Tok::Int(v)) => Ok(Expr::Constant(match i32::try_from(v) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(v),
            })),
            Some(Tok::Float(v)) => Ok(Expr::Constant(Bson::Double(v))),
            Some(Tok::Str(s)) => Ok(Expr::Constant(Bson::String(s))),
            Some(Tok::DateTime(s)) => {
                let parsed = chrono::DateTime::parse_from_rfc3339(&s)
                    .map_err(|_| self.error("bad datetime literal"))?;
                Ok(Expr::Constant(Bson::DateTime(bson::DateTime::from_millis(
                    parsed.timestamp_millis(),
                ))))
            }
            Some(Tok::LParen) => {
                let inner = self.ternary()?;
                self.expect(&Tok::RParen, "expected ')'")?;
                Ok(inner)
            }
            Some(Tok::Dollar) => {
                let Some(Tok::Ident(name)) = self.bump() else {
                    return Err(self.error("expected field name after '$'"));
                };
                Ok(Expr::Member { name, target: None })
            }
            Some(Tok::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Constant(Bson::Boolean(true))),
                "false" => Ok(Expr::Constant(Bson::Boolean(false))),
                "null" => Ok(Expr::Constant(Bson::Null)),
                _ => {
                    if self.eat(&Tok::LParen) {
                        let args = self.arguments()?;
                        if let Some((_, ty)) =
                            CONVERT_FNS.iter().find(|(n, _)| *n == ident.as_str())
                        {
                            let mut args = args;
                            if args.len() != 1 {
                                return Err(self.error("conversions take one argument"));
                            }
                            return Ok(Expr::Unary {
                                op: UnaryOp::Convert,
                                operand: Box::new(args.remove(0)),
                                result_type: Some(*ty),
                            });
                        }
                        Ok(Expr::Function { name: ident, target: None, args })
                    } else {
                        Ok(Expr::Member { name: ident, target: None })
                    }
                }
            },
            _ => Err(self.error("expected an expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::eval::evaluate;
    use bson::doc;

    #[test]
    fn parses_comparison_chain() {
        let expr = parse("a == 3 && b >= 30 && b < 60").unwrap();
        let row = doc! { "a": 3, "b": 45 };
        assert!(evaluate(&expr, &row).unwrap());
        let row = doc! { "a": 3, "b": 60 };
        assert!(!evaluate(&expr, &row).unwrap());
    }

    #[test]
    fn folds_constant_subtrees() {
        let expr = parse("age > 10 + 20").unwrap();
        let Expr::Binary { right, .. } = expr else { panic!("expected binary") };
        assert_eq!(*right, Expr::Constant(Bson::Int32(30)));
    }

    #[test]
    fn folds_fully_constant_predicates() {
        assert_eq!(parse("1 < 2").unwrap(), Expr::Constant(Bson::Boolean(true)));
    }

    #[test]
    fn keeps_unresolvable_constant_calls() {
        let expr = parse("x == Bogus()").unwrap();
        let Expr::Binary { right, .. } = expr else { panic!("expected binary") };
        assert!(matches!(*right, Expr::Function { .. }));
    }

    #[test]
    fn methods_and_members() {
        let expr = parse("name.ToLower().StartsWith('an')").unwrap();
        assert!(evaluate(&expr, &doc! { "name": "Ana" }).unwrap());
        let expr = parse("name.Length == 3").unwrap();
        assert!(evaluate(&expr, &doc! { "name": "Ana" }).unwrap());
    }

    #[test]
    fn datetime_literals_fold() {
        let expr = parse("at < dt'2024-06-01T00:00:00Z'").unwrap();
        let row = doc! { "at": bson::DateTime::from_millis(0) };
        assert!(evaluate(&expr, &row).unwrap());
    }

    #[test]
    fn conversions_parse() {
        let expr = parse("int32(s) == 7").unwrap();
        assert!(evaluate(&expr, &doc! { "s": "7" }).unwrap());
    }

    #[test]
    fn dollar_fields_and_id() {
        let expr = parse("$tag == 't2'").unwrap();
        assert!(evaluate(&expr, &doc! { "tag": "t2" }).unwrap());
        let expr = parse("Id == 5").unwrap();
        assert!(evaluate(&expr, &doc! { "_id": 5 }).unwrap());
    }

    #[test]
    fn garbage_is_unsupported() {
        assert!(matches!(parse("a <>< b"), Err(Error::Unsupported(_))));
        assert!(matches!(parse("a =="), Err(Error::Unsupported(_))));
    }

    #[test]
    fn ternary_parses() {
        let expr = parse("flag ? x > 1 : x < 1").unwrap();
        assert!(evaluate(&expr, &doc! { "flag": true, "x": 2 }).unwrap());
        assert!(evaluate(&expr, &doc! { "flag": false, "x": 0 }).unwrap());
    }
}
