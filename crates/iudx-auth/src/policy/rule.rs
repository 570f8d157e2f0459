//! Rule grammar, parser and evaluator.
//!
//! ```text
//! rule      := principal "can" "access" resource "for" number unit [ "if" condition { ("and" | "or") condition } ]
//! condition := attribute op value
//! op        := "=" | "!=" | "<" | "<=" | ">" | ">="
//! value     := '"' string '"' | number
//! ```
//!
//! `and` binds tighter than `or`; a compiled rule holds its conditions in
//! disjunctive normal form.

use serde::{Deserialize, Serialize};

use super::context::{AttrValue, PolicyContext};

/// Why a policy text could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("unexpected end of rule")]
    UnexpectedEnd,

    #[error("expected '{expected}', found '{found}'")]
    Expected { expected: String, found: String },

    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    #[error("unknown time unit '{0}'")]
    UnknownUnit(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("invalid value '{0}'")]
    InvalidValue(String),

    #[error("unterminated string")]
    UnterminatedString,

    #[error("trailing input '{0}'")]
    Trailing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    fn parse(token: &str) -> Result<Self, PolicyError> {
        Ok(match token {
            "=" | "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            other => return Err(PolicyError::UnknownOperator(other.to_string())),
        })
    }

    fn holds(self, left: &AttrValue, right: &AttrValue) -> bool {
        use std::cmp::Ordering;

        let ordering = match (left, right) {
            (AttrValue::Num(a), AttrValue::Num(b)) => a.partial_cmp(b),
            (AttrValue::Str(a), AttrValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        };

        match (self, ordering) {
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            // Values of different kinds are never equal.
            (Self::Ne, None) => true,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub attribute: String,
    pub op: CompareOp,
    pub value: AttrValue,
}

impl Condition {
    fn holds(&self, ctx: &PolicyContext) -> bool {
        ctx.attribute(&self.attribute)
            .map(|actual| self.op.holds(&actual, &self.value))
            .unwrap_or(false)
    }
}

/// A compiled rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Exact identity, or `*` for anyone.
    pub principal: String,
    /// Resource pattern; a trailing `/*` covers everything beneath it.
    pub resource: String,
    /// Granted validity in seconds.
    pub expiry: i64,
    /// Alternatives of conjunctions; empty means unconditional.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Vec<Condition>>,
}

impl Rule {
    pub fn matches(&self, ctx: &PolicyContext) -> bool {
        let principal_ok = self.principal == "*" || self.principal.eq_ignore_ascii_case(&ctx.principal);
        if !principal_ok || ctx.action != "access" {
            return false;
        }

        if !resource_covers(&self.resource, &ctx.resource) {
            return false;
        }

        self.conditions.is_empty()
            || self
                .conditions
                .iter()
                .any(|all| all.iter().all(|c| c.holds(ctx)))
    }
}

/// Outcome of evaluating a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Seconds of validity granted; `0` when nothing matched.
    pub expiry: i64,
}

impl Evaluation {
    pub fn is_allowed(&self) -> bool {
        self.expiry > 0
    }
}

/// Evaluate `rules` in order; the first matching rule decides.
pub fn evaluate(rules: &[Rule], ctx: &PolicyContext) -> Evaluation {
    let expiry = rules
        .iter()
        .find(|r| r.matches(ctx))
        .map(|r| r.expiry)
        .unwrap_or(0);
    Evaluation { expiry }
}

/// Does a granted resource pattern cover a requested resource?
///
/// `x/*` covers `x` and anything under `x/`; otherwise the match is exact.
pub fn resource_covers(granted: &str, requested: &str) -> bool {
    if granted == "*" || granted == requested {
        return true;
    }

    if let Some(prefix) = granted.strip_suffix("/*") {
        if requested == prefix {
            return true;
        }
        if requested.starts_with(prefix) && requested.as_bytes().get(prefix.len()) == Some(&b'/') {
            return true;
        }
    }

    false
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
}

impl Token {
    fn text(&self) -> &str {
        match self {
            Self::Word(s) | Self::Quoted(s) => s,
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, PolicyError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some(c) => s.push(c),
                    None => return Err(PolicyError::UnterminatedString),
                }
            }
            tokens.push(Token::Quoted(s));
        } else {
            let mut s = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                s.push(c);
                chars.next();
            }
            tokens.push(Token::Word(s));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    fn next(&mut self) -> Result<Token, PolicyError> {
        self.tokens.next().ok_or(PolicyError::UnexpectedEnd)
    }

    fn word(&mut self) -> Result<String, PolicyError> {
        match self.next()? {
            Token::Word(w) => Ok(w),
            Token::Quoted(q) => Err(PolicyError::Expected {
                expected: "word".into(),
                found: q,
            }),
        }
    }

    fn keyword(&mut self, expected: &str) -> Result<(), PolicyError> {
        let found = self.word()?;
        if found.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(PolicyError::Expected {
                expected: expected.into(),
                found,
            })
        }
    }

    fn value(&mut self) -> Result<AttrValue, PolicyError> {
        match self.next()? {
            Token::Quoted(s) => Ok(AttrValue::Str(s)),
            Token::Word(w) => w
                .parse::<f64>()
                .map(AttrValue::Num)
                .map_err(|_| PolicyError::InvalidValue(w)),
        }
    }

    fn condition(&mut self) -> Result<Condition, PolicyError> {
        let attribute = self.word()?;
        let op = CompareOp::parse(&self.word()?)?;
        let value = self.value()?;
        Ok(Condition {
            attribute: attribute.to_ascii_lowercase(),
            op,
            value,
        })
    }
}

fn unit_seconds(unit: &str) -> Result<i64, PolicyError> {
    let unit = unit.to_ascii_lowercase();
    let unit = unit.strip_suffix('s').unwrap_or(&unit);
    Ok(match unit {
        "second" => 1,
        "minute" => 60,
        "hour" => 3_600,
        "day" => 86_400,
        "week" => 604_800,
        "month" => 2_592_000,
        "year" => 31_536_000,
        other => return Err(PolicyError::UnknownUnit(other.to_string())),
    })
}

/// Compile one rule.
pub fn parse(text: &str) -> Result<Rule, PolicyError> {
    let mut p = Parser {
        tokens: tokenize(text)?.into_iter(),
    };

    let principal = p.word()?.to_ascii_lowercase();
    p.keyword("can")?;
    p.keyword("access")?;
    let resource = p.word()?;
    p.keyword("for")?;

    let amount = p.word()?;
    let amount: i64 = amount
        .parse()
        .ok()
        .filter(|n| *n > 0)
        .ok_or(PolicyError::InvalidDuration(amount))?;
    let expiry = amount
        .checked_mul(unit_seconds(&p.word()?)?)
        .ok_or_else(|| PolicyError::InvalidDuration(amount.to_string()))?;

    let mut conditions = Vec::new();
    match p.tokens.next() {
        None => {}
        Some(Token::Word(w)) if w.eq_ignore_ascii_case("if") => {
            let mut all = vec![p.condition()?];
            while let Some(joiner) = p.tokens.next() {
                match joiner.text().to_ascii_lowercase().as_str() {
                    "and" => all.push(p.condition()?),
                    "or" => {
                        conditions.push(std::mem::take(&mut all));
                        all.push(p.condition()?);
                    }
                    _ => return Err(PolicyError::Trailing(joiner.text().to_string())),
                }
            }
            conditions.push(all);
        }
        Some(other) => return Err(PolicyError::Trailing(other.text().to_string())),
    }

    Ok(Rule {
        principal,
        resource,
        expiry,
        conditions,
    })
}
