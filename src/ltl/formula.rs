//! LTL formula parsing and negation normal form
//!
//! Accepts the usual spelling of temporal operators: `!`, `&&`, `||`,
//! `->`, `X`, `U`, `R`, and both `F`/`<>` and `G`/`[]` for eventually
//! and always. Atoms are lowercase identifiers naming region labels,
//! e.g. `[] ( (<> r1) && (<> r2) && !(o1 || o2) )`.

use std::collections::BTreeSet;

use crate::common::{PlannerError, PlannerResult, PropId, SymbolTable};

/// Formula in negation normal form: negation only on atoms, eventually
/// and always desugared into until and release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Formula {
    True,
    False,
    Atom(PropId),
    NotAtom(PropId),
    And(Box<Formula>, Box<Formula>),
    Or(Box<Formula>, Box<Formula>),
    Next(Box<Formula>),
    Until(Box<Formula>, Box<Formula>),
    Release(Box<Formula>, Box<Formula>),
}

impl Formula {
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Formula::True | Formula::False | Formula::Atom(_) | Formula::NotAtom(_)
        )
    }

    /// Negation of an atomic literal; callers must not pass compound formulas
    pub(crate) fn negated_literal(&self) -> Formula {
        match self {
            Formula::Atom(p) => Formula::NotAtom(*p),
            Formula::NotAtom(p) => Formula::Atom(*p),
            Formula::True => Formula::False,
            Formula::False => Formula::True,
            _ => unreachable!("negated_literal on compound formula"),
        }
    }

    /// All until subformulas, in deterministic order
    pub(crate) fn collect_untils(&self, out: &mut BTreeSet<Formula>) {
        match self {
            Formula::Until(lhs, rhs) => {
                out.insert(self.clone());
                lhs.collect_untils(out);
                rhs.collect_untils(out);
            }
            Formula::And(lhs, rhs)
            | Formula::Or(lhs, rhs)
            | Formula::Release(lhs, rhs) => {
                lhs.collect_untils(out);
                rhs.collect_untils(out);
            }
            Formula::Next(inner) => inner.collect_untils(out),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    True,
    False,
    Not,
    And,
    Or,
    Implies,
    Next,
    Finally,
    Globally,
    Until,
    Release,
    LParen,
    RParen,
}

fn lex_error(message: &str, position: usize) -> PlannerError {
    PlannerError::Formula {
        message: message.to_string(),
        position: Some(position),
    }
}

fn tokenize(input: &str) -> PlannerResult<Vec<(Token, usize)>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '!' => {
                tokens.push((Token::Not, i));
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) != Some(&b'&') {
                    return Err(lex_error("expected '&&'", i));
                }
                tokens.push((Token::And, i));
                i += 2;
            }
            '|' => {
                if bytes.get(i + 1) != Some(&b'|') {
                    return Err(lex_error("expected '||'", i));
                }
                tokens.push((Token::Or, i));
                i += 2;
            }
            '-' => {
                if bytes.get(i + 1) != Some(&b'>') {
                    return Err(lex_error("expected '->'", i));
                }
                tokens.push((Token::Implies, i));
                i += 2;
            }
            '<' => {
                if bytes.get(i + 1) != Some(&b'>') {
                    return Err(lex_error("expected '<>'", i));
                }
                tokens.push((Token::Finally, i));
                i += 2;
            }
            '[' => {
                if bytes.get(i + 1) != Some(&b']') {
                    return Err(lex_error("expected '[]'", i));
                }
                tokens.push((Token::Globally, i));
                i += 2;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                let word = &input[start..i];
                let token = match word {
                    "true" => Token::True,
                    "false" => Token::False,
                    "U" => Token::Until,
                    "R" => Token::Release,
                    "X" => Token::Next,
                    "F" => Token::Finally,
                    "G" => Token::Globally,
                    _ => Token::Ident(word.to_string()),
                };
                tokens.push((token, start));
            }
            _ => return Err(lex_error(&format!("unexpected character '{}'", c), i)),
        }
    }
    Ok(tokens)
}

/// Surface syntax tree before normal-form conversion
#[derive(Debug, Clone)]
enum Ast {
    True,
    False,
    Atom(String, usize),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Implies(Box<Ast>, Box<Ast>),
    Next(Box<Ast>),
    Finally(Box<Ast>),
    Globally(Box<Ast>),
    Until(Box<Ast>, Box<Ast>),
    Release(Box<Ast>, Box<Ast>),
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, p)| *p)
            .unwrap_or(self.input_len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: &str) -> PlannerError {
        PlannerError::Formula {
            message: message.to_string(),
            position: Some(self.position()),
        }
    }

    // implication is right associative and binds loosest
    fn parse_implies(&mut self) -> PlannerResult<Ast> {
        let lhs = self.parse_or()?;
        if self.peek() == Some(&Token::Implies) {
            self.advance();
            let rhs = self.parse_implies()?;
            return Ok(Ast::Implies(Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> PlannerResult<Ast> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PlannerResult<Ast> {
        let mut lhs = self.parse_until()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_until()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // U and R are right associative: a U b U c == a U (b U c)
    fn parse_until(&mut self) -> PlannerResult<Ast> {
        let lhs = self.parse_unary()?;
        match self.peek() {
            Some(Token::Until) => {
                self.advance();
                let rhs = self.parse_until()?;
                Ok(Ast::Until(Box::new(lhs), Box::new(rhs)))
            }
            Some(Token::Release) => {
                self.advance();
                let rhs = self.parse_until()?;
                Ok(Ast::Release(Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_unary(&mut self) -> PlannerResult<Ast> {
        let position = self.position();
        match self.advance() {
            Some(Token::Not) => Ok(Ast::Not(Box::new(self.parse_unary()?))),
            Some(Token::Next) => Ok(Ast::Next(Box::new(self.parse_unary()?))),
            Some(Token::Finally) => Ok(Ast::Finally(Box::new(self.parse_unary()?))),
            Some(Token::Globally) => Ok(Ast::Globally(Box::new(self.parse_unary()?))),
            Some(Token::LParen) => {
                let inner = self.parse_implies()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::True) => Ok(Ast::True),
            Some(Token::False) => Ok(Ast::False),
            Some(Token::Ident(name)) => Ok(Ast::Atom(name, position)),
            _ => Err(self.error("expected a formula")),
        }
    }
}

fn to_nnf(ast: &Ast, negated: bool, symbols: &mut SymbolTable) -> PlannerResult<Formula> {
    match ast {
        Ast::True => Ok(if negated { Formula::False } else { Formula::True }),
        Ast::False => Ok(if negated { Formula::True } else { Formula::False }),
        Ast::Atom(name, position) => {
            let id = symbols.intern(name).ok_or_else(|| PlannerError::Formula {
                message: format!("too many distinct propositions (at '{}')", name),
                position: Some(*position),
            })?;
            Ok(if negated {
                Formula::NotAtom(id)
            } else {
                Formula::Atom(id)
            })
        }
        Ast::Not(inner) => to_nnf(inner, !negated, symbols),
        Ast::And(lhs, rhs) => {
            let l = Box::new(to_nnf(lhs, negated, symbols)?);
            let r = Box::new(to_nnf(rhs, negated, symbols)?);
            Ok(if negated {
                Formula::Or(l, r)
            } else {
                Formula::And(l, r)
            })
        }
        Ast::Or(lhs, rhs) => {
            let l = Box::new(to_nnf(lhs, negated, symbols)?);
            let r = Box::new(to_nnf(rhs, negated, symbols)?);
            Ok(if negated {
                Formula::And(l, r)
            } else {
                Formula::Or(l, r)
            })
        }
        Ast::Implies(lhs, rhs) => {
            // a -> b == !a || b
            let l = Box::new(to_nnf(lhs, !negated, symbols)?);
            let r = Box::new(to_nnf(rhs, negated, symbols)?);
            Ok(if negated {
                Formula::And(l, r)
            } else {
                Formula::Or(l, r)
            })
        }
        Ast::Next(inner) => Ok(Formula::Next(Box::new(to_nnf(inner, negated, symbols)?))),
        Ast::Finally(inner) => {
            // F a == true U a, !(F a) == false R !a
            let body = Box::new(to_nnf(inner, negated, symbols)?);
            Ok(if negated {
                Formula::Release(Box::new(Formula::False), body)
            } else {
                Formula::Until(Box::new(Formula::True), body)
            })
        }
        Ast::Globally(inner) => {
            // G a == false R a, !(G a) == true U !a
            let body = Box::new(to_nnf(inner, negated, symbols)?);
            Ok(if negated {
                Formula::Until(Box::new(Formula::True), body)
            } else {
                Formula::Release(Box::new(Formula::False), body)
            })
        }
        Ast::Until(lhs, rhs) => {
            // !(a U b) == !a R !b
            let l = Box::new(to_nnf(lhs, negated, symbols)?);
            let r = Box::new(to_nnf(rhs, negated, symbols)?);
            Ok(if negated {
                Formula::Release(l, r)
            } else {
                Formula::Until(l, r)
            })
        }
        Ast::Release(lhs, rhs) => {
            let l = Box::new(to_nnf(lhs, negated, symbols)?);
            let r = Box::new(to_nnf(rhs, negated, symbols)?);
            Ok(if negated {
                Formula::Until(l, r)
            } else {
                Formula::Release(l, r)
            })
        }
    }
}

/// Parse an LTL formula into negation normal form, interning its atoms
pub fn parse(input: &str) -> PlannerResult<(Formula, SymbolTable)> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(PlannerError::Formula {
            message: "empty formula".to_string(),
            position: Some(0),
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let ast = parser.parse_implies()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input after formula"));
    }
    let mut symbols = SymbolTable::new();
    let formula = to_nnf(&ast, false, &mut symbols)?;
    Ok((formula, symbols))
}
