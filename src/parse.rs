//! Reading terms and clauses from text.
//!
//! The lexer is built from `nom` combinators; the parser on top of it is an
//! operator-precedence climber over a fixed operator table:
//!
//! | priority | type | operators |
//! |---|---|---|
//! | 1200 | xfx | `:-` |
//! | 1200 | fx | `:-` |
//! | 1100 | xfy | `;` `\|` |
//! | 1050 | xfy | `->` |
//! | 1000 | xfy | `,` |
//! | 900 | fy | `\+` |
//! | 700 | xfx | `=` `\=` `==` `\==` `is` `=:=` `=\=` `<` `>` `=<` `>=` `=..` |
//! | 500 | yfx | `+` `-` |
//! | 400 | yfx | `*` `/` `//` `mod` `rem` |
//! | 200 | xfx | `**` |
//! | 200 | xfy | `^` |
//! | 200 | fy | `-` `+` |
//!
//! Variables with the same name inside one clause are the same [`Var`];
//! `_` is fresh at every occurrence.

use indexmap::IndexMap;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_until, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace1, one_of, satisfy};
use nom::combinator::{eof, map, opt, peek, recognize, value};
use nom::multi::many0;
use nom::sequence::{delimited, pair, terminated, tuple};
use nom::IResult;

use crate::error::{Error, Result};
use crate::term::{is_symbol_char, List, Term, Var};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Name(String),
    Var(String),
    Int(String),
    Float(f64),
    Str(String),
    Punct(char),
    End,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
    layout_before: bool,
}

fn is_alnum(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn line_comment(i: &str) -> IResult<&str, &str> {
    recognize(pair(char('%'), opt(is_not("\n"))))(i)
}

fn block_comment(i: &str) -> IResult<&str, &str> {
    recognize(tuple((tag("/*"), take_until("*/"), tag("*/"))))(i)
}

/// Whitespace and comments; reports whether anything was skipped.
fn layout(i: &str) -> IResult<&str, bool> {
    map(many0(alt((multispace1, line_comment, block_comment))), |skipped| {
        !skipped.is_empty()
    })(i)
}

fn name(i: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(|c| c.is_ascii_lowercase()), take_while(is_alnum)))(i)
}

fn variable(i: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_uppercase() || c == '_'),
        take_while(is_alnum),
    ))(i)
}

fn float(i: &str) -> IResult<&str, f64> {
    let (rest, text) = recognize(tuple((
        digit1,
        char('.'),
        digit1,
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(i)?;
    let (rest, special) = opt(alt((tag("Inf"), tag("NaN"))))(rest)?;
    let value = match special {
        Some("Inf") => f64::INFINITY,
        Some(_) => f64::NAN,
        None => text
            .parse()
            .map_err(|_| nom::Err::Error(nom::error::Error::new(i, nom::error::ErrorKind::Float)))?,
    };
    Ok((rest, value))
}

fn quoted_body<'a>(stop: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    map(
        opt(escaped_transform(
            is_not(stop),
            '\\',
            alt((
                value("\\", char('\\')),
                value("'", char('\'')),
                value("\"", char('"')),
                value("\n", char('n')),
                value("\t", char('t')),
            )),
        )),
        Option::unwrap_or_default,
    )
}

fn single_quoted(i: &str) -> IResult<&str, String> {
    delimited(char('\''), quoted_body("\\'"), char('\''))(i)
}

fn double_quoted(i: &str) -> IResult<&str, String> {
    delimited(char('"'), quoted_body("\\\""), char('"'))(i)
}

/// A `.` that ends a clause: followed by layout, a comment or the end.
fn end(i: &str) -> IResult<&str, char> {
    terminated(char('.'), peek(alt((multispace1, tag("%"), eof))))(i)
}

fn token(i: &str) -> IResult<&str, Tok> {
    alt((
        map(float, Tok::Float),
        map(digit1, |d: &str| Tok::Int(d.to_string())),
        map(variable, |v: &str| Tok::Var(v.to_string())),
        map(name, |n: &str| Tok::Name(n.to_string())),
        map(single_quoted, Tok::Name),
        map(double_quoted, Tok::Str),
        map(end, |_| Tok::End),
        map(take_while1(is_symbol_char), |s: &str| Tok::Name(s.to_string())),
        map(one_of("!;"), |c: char| Tok::Name(c.to_string())),
        map(one_of("()[]{},|"), Tok::Punct),
    ))(i)
}

fn position(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(before.chars().count(), |nl| {
        before[nl + 1..].chars().count()
    }) + 1;
    (line, column)
}

fn syntax_error(text: &str, offset: usize, message: impl Into<String>) -> Error {
    let (line, column) = position(text, offset);
    Error::Syntax {
        line,
        column,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = text;
    loop {
        let (after, skipped) = layout(rest)
            .map_err(|_| syntax_error(text, text.len() - rest.len(), "unreadable layout"))?;
        if after.is_empty() {
            return Ok(tokens);
        }
        let offset = text.len() - after.len();
        let (next, tok) = token(after).map_err(|_| {
            let found = after.chars().next().unwrap_or(' ');
            syntax_error(text, offset, format!("unexpected character `{found}`"))
        })?;
        tokens.push(Token {
            tok,
            offset,
            layout_before: skipped,
        });
        rest = next;
    }
}

/// `(priority, max left priority, max right priority)` of an infix operator.
fn infix(name: &str) -> Option<(u32, u32, u32)> {
    Some(match name {
        ":-" => (1200, 1199, 1199),
        ";" | "|" => (1100, 1099, 1100),
        "->" => (1050, 1049, 1050),
        "," => (1000, 999, 1000),
        "=" | "\\=" | "==" | "\\==" | "is" | "=:=" | "=\\=" | "<" | ">" | "=<" | ">=" | "=.." => {
            (700, 699, 699)
        }
        "+" | "-" => (500, 500, 499),
        "*" | "/" | "//" | "mod" | "rem" => (400, 400, 399),
        "**" => (200, 199, 199),
        "^" => (200, 199, 200),
        _ => return None,
    })
}

/// `(priority, max argument priority)` of a prefix operator.
fn prefix(name: &str) -> Option<(u32, u32)> {
    Some(match name {
        ":-" => (1200, 1199),
        "\\+" => (900, 900),
        "-" | "+" => (200, 200),
        _ => return None,
    })
}

struct Parser<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    pos: usize,
    vars: IndexMap<String, Var>,
}

impl<'t> Parser<'t> {
    fn new(text: &'t str) -> Result<Self> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            pos: 0,
            vars: IndexMap::new(),
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        let offset = self.peek().map_or(self.text.len(), |t| t.offset);
        syntax_error(self.text, offset, message)
    }

    fn advance(&mut self) -> Result<Token> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error_here("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, punct: char) -> Result<()> {
        match self.peek() {
            Some(Token {
                tok: Tok::Punct(c), ..
            }) if *c == punct => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error_here(format!("expected `{punct}`"))),
        }
    }

    fn next_is(&self, punct: char) -> bool {
        matches!(self.peek(), Some(Token { tok: Tok::Punct(c), .. }) if *c == punct)
    }

    /// True if the next token can begin an operand.
    fn starts_term(&self) -> bool {
        match self.peek().map(|t| &t.tok) {
            Some(Tok::Name(name)) => {
                infix(name).is_none()
                    || prefix(name).is_some()
                    || matches!(self.peek_at(1), Some(Token { tok: Tok::Punct('('), layout_before: false, .. }))
            }
            Some(Tok::Punct(c)) => matches!(c, '(' | '[' | '{'),
            Some(Tok::End) | None => false,
            Some(_) => true,
        }
    }

    /// The infix operator at the cursor, if any.
    fn infix_here(&self) -> Option<(String, (u32, u32, u32))> {
        let name = match &self.peek()?.tok {
            Tok::Name(name) => name.clone(),
            Tok::Punct(',') => ",".to_string(),
            Tok::Punct('|') => ";".to_string(),
            _ => return None,
        };
        let op = infix(&name)?;
        Some((name, op))
    }

    fn variable(&mut self, name: &str) -> Term {
        if name == "_" {
            return Term::Variable(Var::fresh());
        }
        let var = self
            .vars
            .entry(name.to_string())
            .or_insert_with(|| Var::new(name));
        Term::Variable(var.clone())
    }

    fn integer(&self, digits: &str, offset: usize) -> Result<Term> {
        digits
            .parse::<i64>()
            .map(Term::integer)
            .map_err(|_| syntax_error(self.text, offset, format!("integer {digits} is out of range")))
    }

    fn parse(&mut self, max: u32) -> Result<Term> {
        let (mut left, mut left_priority) = self.primary(max)?;
        while let Some((name, (priority, left_max, right_max))) = self.infix_here() {
            if priority > max || left_priority > left_max {
                break;
            }
            self.pos += 1;
            let right = self.parse(right_max)?;
            left = Term::compound(&name, vec![left, right])?;
            left_priority = priority;
        }
        Ok(left)
    }

    fn arguments(&mut self) -> Result<Vec<Term>> {
        let mut args = vec![self.parse(999)?];
        while self.next_is(',') {
            self.pos += 1;
            args.push(self.parse(999)?);
        }
        Ok(args)
    }

    fn primary(&mut self, max: u32) -> Result<(Term, u32)> {
        let token = self.advance()?;
        let term = match token.tok {
            Tok::Int(digits) => self.integer(&digits, token.offset)?,
            Tok::Float(x) => Term::decimal(x),
            Tok::Var(name) => self.variable(&name),
            Tok::Str(text) => Term::atom(&text),
            Tok::Punct('(') => {
                let inner = self.parse(1200)?;
                self.expect(')')?;
                inner
            }
            Tok::Punct('[') => {
                if self.next_is(']') {
                    self.pos += 1;
                    return Ok((Term::nil(), 0));
                }
                let items = self.arguments()?;
                let list = if self.next_is('|') {
                    self.pos += 1;
                    let tail = self.parse(999)?;
                    List::with_tail(items, tail)?
                } else {
                    List::from_vec(items)
                };
                self.expect(']')?;
                Term::List(list)
            }
            Tok::Punct('{') => {
                if self.next_is('}') {
                    self.pos += 1;
                    return Ok((Term::atom("{}"), 0));
                }
                let inner = self.parse(1200)?;
                self.expect('}')?;
                Term::compound("{}", vec![inner])?
            }
            Tok::Name(name) => return self.named(&name, max),
            Tok::Punct(c) => {
                return Err(syntax_error(self.text, token.offset, format!("unexpected `{c}`")))
            }
            Tok::End => {
                return Err(syntax_error(self.text, token.offset, "unexpected end of clause"))
            }
        };
        Ok((term, 0))
    }

    /// A term starting with a name: a compound, a negative number, a prefix
    /// operator application or a plain atom.
    fn named(&mut self, name: &str, max: u32) -> Result<(Term, u32)> {
        let next = self.peek().cloned();
        if let Some(Token {
            tok: Tok::Punct('('),
            layout_before: false,
            ..
        }) = next
        {
            self.pos += 1;
            let args = self.arguments()?;
            self.expect(')')?;
            return Ok((Term::compound(name, args)?, 0));
        }
        if name == "-" {
            match next {
                Some(Token {
                    tok: Tok::Int(digits),
                    layout_before: false,
                    offset,
                }) => {
                    self.pos += 1;
                    return Ok((self.integer(&format!("-{digits}"), offset)?, 0));
                }
                Some(Token {
                    tok: Tok::Float(x),
                    layout_before: false,
                    ..
                }) => {
                    self.pos += 1;
                    return Ok((Term::decimal(-x), 0));
                }
                _ => {}
            }
        }
        if let Some((priority, arg_max)) = prefix(name) {
            if self.starts_term() {
                let priority = priority.min(max);
                let arg = self.parse(arg_max.min(priority))?;
                return Ok((Term::compound(name, vec![arg])?, priority));
            }
        }
        Ok((Term::atom(name), 0))
    }

    fn expect_end(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token { tok: Tok::End, .. }) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error_here("operator expected")),
        }
    }
}

/// Read a single term. A trailing `.` is optional.
///
/// # Errors
///
/// Returns [`Error::Syntax`] with the position of the first unreadable token.
///
/// # Example
///
/// ```rust
/// use logterm::parse::parse_term;
///
/// let goal = parse_term("append(X, [2, 3], [1, 2, 3])").unwrap();
/// assert_eq!(goal.to_string(), "append(X,[2,3],[1,2,3])");
/// ```
pub fn parse_term(text: &str) -> Result<Term> {
    let mut parser = Parser::new(text)?;
    let term = parser.parse(1200)?;
    if !parser.at_end() {
        parser.expect_end()?;
    }
    if !parser.at_end() {
        return Err(parser.error_here("text after the end of the term"));
    }
    Ok(term)
}

/// Read `.`-terminated clauses. Variable names are scoped to one clause.
///
/// # Errors
///
/// Returns [`Error::Syntax`] with the position of the first unreadable token.
pub fn parse_clauses(text: &str) -> Result<Vec<Term>> {
    let mut parser = Parser::new(text)?;
    let mut clauses = Vec::new();
    while !parser.at_end() {
        parser.vars.clear();
        let clause = parser.parse(1200)?;
        parser.expect_end()?;
        clauses.push(clause);
    }
    Ok(clauses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(name: &str, args: Vec<Term>) -> Term {
        Term::compound(name, args).unwrap()
    }

    #[test]
    fn test_atoms_numbers_and_strings() {
        assert_eq!(parse_term("foo").unwrap(), Term::atom("foo"));
        assert_eq!(parse_term("'hello world'").unwrap(), Term::atom("hello world"));
        assert_eq!(parse_term("''").unwrap(), Term::atom(""));
        assert_eq!(parse_term(r"'it\'s'").unwrap(), Term::atom("it's"));
        assert_eq!(parse_term("\"text\"").unwrap(), Term::atom("text"));
        assert_eq!(parse_term("42").unwrap(), Term::integer(42));
        assert_eq!(parse_term("-7").unwrap(), Term::integer(-7));
        assert_eq!(parse_term("2.5e3").unwrap(), Term::decimal(2500.0));
        assert_eq!(parse_term("-9223372036854775808").unwrap(), Term::integer(i64::MIN));
        assert!(parse_term("1.0Inf").unwrap().as_decimal().unwrap().is_infinite());
        assert_eq!(parse_term("[]").unwrap(), Term::nil());
    }

    #[test]
    fn test_compounds_and_lists() {
        let t = parse_term("f(a, [1, 2 | T], g(b))").unwrap();
        assert_eq!(t.name(), Some("f"));
        assert_eq!(t.arguments().len(), 3);
        let list = t.arguments()[1].as_list().unwrap();
        assert_eq!(list.items(), &[Term::integer(1), Term::integer(2)]);
        assert!(matches!(list.open_tail(), Some(Term::Variable(v)) if v.name() == Some("T")));
    }

    #[test]
    fn test_operator_precedence() {
        let t = parse_term("X is 1 + 2 * 3 - 4").unwrap();
        assert_eq!(t.to_string(), "is(X,-(+(1,*(2,3)),4))");
        let t = parse_term("a :- b, c ; d -> e").unwrap();
        assert_eq!(t.to_string(), ":-(a,;(','(b,c),->(d,e)))");
        let t = parse_term("\\+ a = b").unwrap();
        assert_eq!(t.to_string(), "\\+(=(a,b))");
        let t = parse_term("- (1)").unwrap();
        assert_eq!(t, c("-", vec![Term::integer(1)]));
        let t = parse_term("2 ^ 3 ^ 4").unwrap();
        assert_eq!(t.to_string(), "^(2,^(3,4))");
    }

    #[test]
    fn test_operators_as_atoms() {
        let t = parse_term("f(-, +, mod)").unwrap();
        assert_eq!(
            t.arguments(),
            &[Term::atom("-"), Term::atom("+"), Term::atom("mod")]
        );
        assert_eq!(parse_term("','(a, b)").unwrap(), c(",", vec![Term::atom("a"), Term::atom("b")]));
    }

    #[test]
    fn test_symbol_atoms_read_back() {
        let atoms = [".", "/*", "+/*", "*/", "=..", "\\", ":-", "-"];
        let list = Term::list(atoms.iter().map(|name| Term::atom(name)).collect());
        assert_eq!(parse_term(&list.to_string()).unwrap(), list);
        for name in atoms {
            let atom = Term::atom(name);
            assert_eq!(parse_term(&atom.to_string()).unwrap(), atom, "{name}");
        }
    }

    #[test]
    fn test_variables_are_scoped_per_clause() {
        let clauses = parse_clauses("p(X, X, _, _).\nq(X).").unwrap();
        let args = clauses[0].arguments();
        assert_eq!(args[0], args[1]);
        assert_ne!(args[2], args[3]);
        assert_ne!(clauses[1].arguments()[0], args[0]);
    }

    #[test]
    fn test_comments_and_directives() {
        let text = "% facts\nlikes(mary, wine). /* block\ncomment */\n:- dynamic(foo).\n";
        let clauses = parse_clauses(text).unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[1].to_string(), ":-(dynamic(foo))");
    }

    #[test]
    fn test_syntax_errors_carry_positions() {
        match parse_clauses("ok.\nfoo(a, .") {
            Err(Error::Syntax { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, 8);
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
        assert!(matches!(parse_term("f(a"), Err(Error::Syntax { .. })));
        assert!(matches!(parse_term("a b"), Err(Error::Syntax { .. })));
        assert!(matches!(parse_clauses("p(a)"), Err(Error::Syntax { .. })));
        assert!(matches!(parse_term("99999999999999999999"), Err(Error::Syntax { .. })));
    }

    fn ground_term() -> impl Strategy<Value = Term> {
        let leaf = prop_oneof![
            "[a-z][a-z0-9_]{0,6}".prop_map(|s| Term::atom(&s)),
            "[a-zA-Z '\\\\]{0,5}".prop_map(|s| Term::atom(&s)),
            "[-+*/\\\\^<>=~:.?@#&$]{1,3}".prop_map(|s| Term::atom(&s)),
            any::<i64>().prop_map(Term::integer),
            any::<f64>()
                .prop_filter("finite", |x| x.is_finite())
                .prop_map(Term::decimal),
        ];
        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                ("[a-z]{1,4}", prop::collection::vec(inner.clone(), 1..4))
                    .prop_map(|(name, args)| Term::compound(&name, args).unwrap()),
                prop::collection::vec(inner, 0..5).prop_map(Term::list),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_display_reads_back(term in ground_term()) {
            let text = term.to_string();
            let read = parse_term(&text).unwrap();
            prop_assert_eq!(read, term);
        }
    }
}
