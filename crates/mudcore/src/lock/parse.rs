//! Lock string grammar.
//!
//! ```text
//! lockstring := lockdef (";" lockdef)*
//! lockdef    := access_type ":" or_expr
//! or_expr    := and_expr ("OR" and_expr)*
//! and_expr   := not_expr ("AND" not_expr)*
//! not_expr   := "NOT" not_expr | primary
//! primary    := "(" or_expr ")" | func "(" [arg ("," arg)*] ")"
//! arg        := word+ | 'quoted' | "quoted"
//! ```
//!
//! Keywords are case-insensitive. Consecutive bare words inside one argument
//! are joined with a single space.

use crate::error::LockError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Call { name: String, args: Vec<String> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn func_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_funcs(&mut out);
        out
    }

    fn collect_funcs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Call { name, .. } => out.push(name),
            Expr::Not(e) => e.collect_funcs(out),
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_funcs(out);
                b.collect_funcs(out);
            }
        }
    }
}

/// One `access_type: expr` definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDef {
    pub access_type: String,
    pub source: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
}

fn syntax(pos: usize, msg: impl Into<String>) -> LockError {
    LockError::Syntax {
        pos,
        msg: msg.into(),
    }
}

fn lex(src: &str) -> Result<Vec<(usize, Tok)>, LockError> {
    let mut toks = Vec::new();
    let mut it = src.char_indices().peekable();
    while let Some(&(pos, c)) = it.peek() {
        match c {
            c if c.is_whitespace() => {
                it.next();
            }
            '(' => {
                it.next();
                toks.push((pos, Tok::LParen));
            }
            ')' => {
                it.next();
                toks.push((pos, Tok::RParen));
            }
            ',' => {
                it.next();
                toks.push((pos, Tok::Comma));
            }
            '\'' | '"' => {
                it.next();
                let mut s = String::new();
                let mut closed = false;
                for (_, ch) in it.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    s.push(ch);
                }
                if !closed {
                    return Err(syntax(pos, "unterminated quote"));
                }
                toks.push((pos, Tok::Quoted(s)));
            }
            _ => {
                let mut s = String::new();
                while let Some(&(_, ch)) = it.peek() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | ',' | '\'' | '"') {
                        break;
                    }
                    s.push(ch);
                    it.next();
                }
                toks.push((pos, Tok::Word(s)));
            }
        }
    }
    Ok(toks)
}

struct Parser {
    toks: Vec<(usize, Tok)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.toks.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).map(|(_, t)| t.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        match self.peek() {
            Some(Tok::Word(w)) if w.eq_ignore_ascii_case(kw) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, LockError> {
        let mut lhs = self.parse_and()?;
        while self.eat_kw("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, LockError> {
        let mut lhs = self.parse_not()?;
        while self.eat_kw("and") {
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, LockError> {
        if self.eat_kw("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, LockError> {
        let at = self.offset();
        match self.next() {
            Some(Tok::LParen) => {
                let e = self.parse_or()?;
                let at = self.offset();
                match self.next() {
                    Some(Tok::RParen) => Ok(e),
                    _ => Err(syntax(at, "expected ')'")),
                }
            }
            Some(Tok::Word(name)) => {
                let is_kw = ["and", "or", "not"]
                    .iter()
                    .any(|k| name.eq_ignore_ascii_case(k));
                let valid = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_kw || !valid {
                    return Err(syntax(at, format!("expected lock function, got {name:?}")));
                }
                let at = self.offset();
                if self.next() != Some(Tok::LParen) {
                    return Err(syntax(at, format!("expected '(' after {name}")));
                }
                let args = self.parse_args()?;
                Ok(Expr::Call {
                    name: name.to_ascii_lowercase(),
                    args,
                })
            }
            Some(_) => Err(syntax(at, "expected lock function or '('")),
            None => Err(syntax(at, "unexpected end of lock")),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<String>, LockError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            let at = self.offset();
            let mut parts = Vec::new();
            while let Some(Tok::Word(s) | Tok::Quoted(s)) = self.peek() {
                parts.push(s.clone());
                self.pos += 1;
            }
            if parts.is_empty() {
                return Err(syntax(at, "expected argument"));
            }
            args.push(parts.join(" "));

            let at = self.offset();
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => return Ok(args),
                _ => return Err(syntax(at, "expected ',' or ')'")),
            }
        }
    }
}

/// Parse a bare boolean expression (the part after `access_type:`).
pub fn parse_expr(src: &str) -> Result<Expr, LockError> {
    let toks = lex(src)?;
    if toks.is_empty() {
        return Err(syntax(0, "empty expression"));
    }
    let mut p = Parser {
        toks,
        pos: 0,
        end: src.len(),
    };
    let e = p.parse_or()?;
    if p.pos != p.toks.len() {
        return Err(syntax(p.offset(), "unexpected trailing input"));
    }
    Ok(e)
}

/// Split on `;` outside quotes.
pub(crate) fn split_defs(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ';') => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

pub fn parse_lockstring(s: &str) -> Result<Vec<ParsedDef>, LockError> {
    let mut defs = Vec::new();
    for part in split_defs(s) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((access_type, expr)) = part.split_once(':') else {
            return Err(LockError::MissingColon(part.to_string()));
        };
        let access_type = access_type.trim();
        let ok = !access_type.is_empty()
            && access_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !ok {
            return Err(LockError::BadAccessType(access_type.to_string()));
        }
        let source = expr.trim().to_string();
        let expr = parse_expr(&source)?;
        defs.push(ParsedDef {
            access_type: access_type.to_ascii_lowercase(),
            source,
            expr,
        });
    }
    if defs.is_empty() {
        return Err(LockError::Empty);
    }
    Ok(defs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[&str]) -> Expr {
        Expr::Call {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let e = parse_expr("a() or b() AND not c()").unwrap();
        assert_eq!(
            e,
            Expr::Or(
                Box::new(call("a", &[])),
                Box::new(Expr::And(
                    Box::new(call("b", &[])),
                    Box::new(Expr::Not(Box::new(call("c", &[])))),
                )),
            )
        );
    }

    #[test]
    fn parentheses_group() {
        let e = parse_expr("NOT (a() OR b())").unwrap();
        assert_eq!(
            e,
            Expr::Not(Box::new(Expr::Or(
                Box::new(call("a", &[])),
                Box::new(call("b", &[])),
            )))
        );
    }

    #[test]
    fn arguments_quoted_bare_and_multiword() {
        let e = parse_expr(r#"Holds('key') and attr(short name, "a;b")"#).unwrap();
        assert_eq!(
            e,
            Expr::And(
                Box::new(call("holds", &["key"])),
                Box::new(call("attr", &["short name", "a;b"])),
            )
        );
    }

    #[test]
    fn lockstring_splits_outside_quotes() {
        let defs = parse_lockstring(r#"Delete: id(34); say: holds(";")"#).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].access_type, "delete");
        assert_eq!(defs[0].source, "id(34)");
        assert_eq!(defs[1].expr, call("holds", &[";"]));
    }

    #[test]
    fn syntax_errors() {
        assert!(matches!(parse_expr("perm(Builder"), Err(LockError::Syntax { .. })));
        assert!(matches!(parse_expr("perm Builder"), Err(LockError::Syntax { .. })));
        assert!(matches!(parse_expr("a() and"), Err(LockError::Syntax { .. })));
        assert!(matches!(parse_expr("a() b()"), Err(LockError::Syntax { .. })));
        assert!(matches!(parse_expr("f(,)"), Err(LockError::Syntax { .. })));
        assert!(matches!(parse_expr("f('x)"), Err(LockError::Syntax { .. })));
        assert!(matches!(
            parse_lockstring("edit perm(Admin)"),
            Err(LockError::MissingColon(_))
        ));
        assert!(matches!(
            parse_lockstring("bad type: all()"),
            Err(LockError::BadAccessType(_))
        ));
        assert!(matches!(parse_lockstring(" ; "), Err(LockError::Empty)));
    }
}
