//! Search patterns and per-thread line matchers.
//!
//! A [`SearchPattern`] describes what the user asked for; a
//! [`CompiledPattern`] is the executable form. Compiled regexes are never
//! shared across matcher threads — each worker compiles its own instance
//! from the request and reuses it for every chunk it handles.
//!
//! Two matching levels: plain case-sensitive text runs on the vectorised
//! `memmem` substring scanner; everything else goes through the `regex`
//! engine. Boolean-combined patterns (`"foo" and not "bar"`) are parsed
//! into a small expression tree over sub-patterns and evaluated per line.

use memchr::memmem;
use regex::RegexBuilder;

use crate::error::{LoglensError, Result};

/// A search request as issued by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPattern {
    pub pattern: String,
    pub case_sensitive: bool,
    /// Invert the per-line verdict.
    pub inverse: bool,
    /// Interpret the pattern as a Boolean expression over quoted
    /// sub-patterns with `and`, `or`, `not` and parentheses.
    pub boolean_combine: bool,
    /// Disable regex metacharacters; match the pattern literally.
    pub plain_text: bool,
}

impl SearchPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }
}

impl Default for SearchPattern {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            case_sensitive: true,
            inverse: false,
            boolean_combine: false,
            plain_text: false,
        }
    }
}

/// One matching primitive: a SIMD substring finder or a compiled regex.
#[derive(Debug)]
enum LineMatcher {
    Substring(memmem::Finder<'static>),
    Regex(regex::Regex),
}

impl LineMatcher {
    fn compile(pattern: &str, case_sensitive: bool, plain_text: bool) -> Result<Self> {
        if plain_text && case_sensitive {
            return Ok(Self::Substring(
                memmem::Finder::new(pattern.as_bytes()).into_owned(),
            ));
        }

        let source = if plain_text {
            regex::escape(pattern)
        } else {
            pattern.to_string()
        };
        RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()
            .map(Self::Regex)
            .map_err(|e| LoglensError::regex_invalid(e.to_string()))
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Substring(finder) => finder.find(line.as_bytes()).is_some(),
            Self::Regex(regex) => regex.is_match(line),
        }
    }
}

/// Expression tree of a boolean-combined pattern. Leaves index into the
/// compiled sub-pattern list.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BoolExpr {
    Pattern(usize),
    Not(Box<BoolExpr>),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
}

impl BoolExpr {
    fn eval(&self, verdicts: &[bool]) -> bool {
        match self {
            Self::Pattern(index) => verdicts[*index],
            Self::Not(inner) => !inner.eval(verdicts),
            Self::And(left, right) => left.eval(verdicts) && right.eval(verdicts),
            Self::Or(left, right) => left.eval(verdicts) || right.eval(verdicts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Literal(String),
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut position = 0usize;

    while position < bytes.len() {
        let byte = bytes[position];
        match byte {
            b' ' | b'\t' => position += 1,
            b'(' => {
                tokens.push((position, Token::LParen));
                position += 1;
            }
            b')' => {
                tokens.push((position, Token::RParen));
                position += 1;
            }
            b'"' => {
                let start = position;
                position += 1;
                let mut literal = String::new();
                loop {
                    match bytes.get(position) {
                        None => {
                            return Err(LoglensError::regex_invalid(format!(
                                "unterminated quote at offset {start}"
                            )))
                        }
                        Some(&b'"') => {
                            position += 1;
                            break;
                        }
                        Some(&b'\\') if matches!(bytes.get(position + 1), Some(&b'"') | Some(&b'\\')) => {
                            literal.push(bytes[position + 1] as char);
                            position += 2;
                        }
                        Some(_) => {
                            // Multi-byte characters pass through untouched.
                            let rest = &input[position..];
                            let ch = rest.chars().next().unwrap();
                            literal.push(ch);
                            position += ch.len_utf8();
                        }
                    }
                }
                tokens.push((start, Token::Literal(literal)));
            }
            _ => {
                let start = position;
                while position < bytes.len() && bytes[position].is_ascii_alphanumeric() {
                    position += 1;
                }
                let word = &input[start..position];
                let token = match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    // Non-ASCII or punctuation byte: not even a word.
                    "" => {
                        return Err(LoglensError::regex_invalid(format!(
                            "unexpected character at offset {start}; sub-patterns must be double-quoted"
                        )))
                    }
                    _ => {
                        return Err(LoglensError::regex_invalid(format!(
                            "expected and/or/not or a quoted pattern at offset {start}"
                        )))
                    }
                };
                tokens.push((start, token));
            }
        }
    }

    Ok(tokens)
}

/// Recursive-descent parser: `or` binds loosest, then `and`, then `not`.
struct BoolParser {
    tokens: Vec<(usize, Token)>,
    position: usize,
    literals: Vec<String>,
}

impl BoolParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position).map(|(_, t)| t)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn parse_expr(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_term()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let right = self.parse_term()?;
            left = BoolExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<BoolExpr> {
        let mut left = self.parse_factor()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let right = self.parse_factor()?;
            left = BoolExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<BoolExpr> {
        match self.advance() {
            Some((_, Token::Not)) => Ok(BoolExpr::Not(Box::new(self.parse_factor()?))),
            Some((position, Token::LParen)) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some((_, Token::RParen)) => Ok(inner),
                    _ => Err(LoglensError::regex_invalid(format!(
                        "unmatched parenthesis at offset {position}"
                    ))),
                }
            }
            Some((_, Token::Literal(literal))) => {
                self.literals.push(literal);
                Ok(BoolExpr::Pattern(self.literals.len() - 1))
            }
            Some((position, token)) => Err(LoglensError::regex_invalid(format!(
                "unexpected {token:?} at offset {position}"
            ))),
            None => Err(LoglensError::regex_invalid(
                "expected a quoted pattern, found end of input",
            )),
        }
    }
}

fn parse_boolean(input: &str) -> Result<(BoolExpr, Vec<String>)> {
    let tokens = tokenize(input)?;
    let mut parser = BoolParser {
        tokens,
        position: 0,
        literals: Vec::new(),
    };
    let expr = parser.parse_expr()?;
    if let Some((position, token)) = parser.tokens.get(parser.position) {
        return Err(LoglensError::regex_invalid(format!(
            "unexpected {token:?} at offset {position}"
        )));
    }
    Ok((expr, parser.literals))
}

#[derive(Debug)]
enum CompiledKind {
    Single(LineMatcher),
    Boolean {
        expr: BoolExpr,
        subs: Vec<LineMatcher>,
    },
}

/// A fully compiled search request, owned by exactly one matcher thread.
#[derive(Debug)]
pub(crate) struct CompiledPattern {
    kind: CompiledKind,
    inverse: bool,
}

impl CompiledPattern {
    pub fn compile(request: &SearchPattern) -> Result<Self> {
        let kind = if request.boolean_combine {
            let (expr, literals) = parse_boolean(&request.pattern)?;
            let subs = literals
                .iter()
                .map(|literal| {
                    LineMatcher::compile(literal, request.case_sensitive, request.plain_text)
                })
                .collect::<Result<Vec<_>>>()?;
            CompiledKind::Boolean { expr, subs }
        } else {
            CompiledKind::Single(LineMatcher::compile(
                &request.pattern,
                request.case_sensitive,
                request.plain_text,
            )?)
        };

        Ok(Self {
            kind,
            inverse: request.inverse,
        })
    }

    pub fn has_match(&self, line: &str) -> bool {
        let matched = match &self.kind {
            CompiledKind::Single(matcher) => matcher.is_match(line),
            CompiledKind::Boolean { expr, subs } => {
                let verdicts: Vec<bool> = subs.iter().map(|sub| sub.is_match(line)).collect();
                expr.eval(&verdicts)
            }
        };
        matched != self.inverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(request: SearchPattern) -> CompiledPattern {
        CompiledPattern::compile(&request).expect("pattern should compile")
    }

    #[test]
    fn test_plain_text_substring() {
        let matcher = compiled(SearchPattern {
            plain_text: true,
            ..SearchPattern::new("a.b")
        });
        assert!(matcher.has_match("xx a.b yy"));
        assert!(!matcher.has_match("axb")); // the dot is literal
    }

    #[test]
    fn test_regex_matching() {
        let matcher = compiled(SearchPattern::new(r"err(or)?\d+"));
        assert!(matcher.has_match("fatal error42 detected"));
        assert!(matcher.has_match("err7"));
        assert!(!matcher.has_match("error without number"));
    }

    #[test]
    fn test_case_insensitive() {
        let matcher = compiled(SearchPattern {
            case_sensitive: false,
            ..SearchPattern::new("WARNING")
        });
        assert!(matcher.has_match("a warning was logged"));

        let sensitive = compiled(SearchPattern::new("WARNING"));
        assert!(!sensitive.has_match("a warning was logged"));
    }

    #[test]
    fn test_inverse_flips_verdict() {
        let matcher = compiled(SearchPattern {
            inverse: true,
            ..SearchPattern::new("noise")
        });
        assert!(!matcher.has_match("noise here"));
        assert!(matcher.has_match("signal"));
    }

    #[test]
    fn test_invalid_regex_reports_reason() {
        let result = CompiledPattern::compile(&SearchPattern::new("(unclosed"));
        assert!(matches!(result, Err(LoglensError::RegexInvalid { .. })));
    }

    #[test]
    fn test_boolean_and_not() {
        let matcher = compiled(SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""foo" and not "bar""#)
        });
        assert!(matcher.has_match("foo"));
        assert!(!matcher.has_match("foo bar"));
        assert!(!matcher.has_match("foobar")); // contains "bar" as substring
        assert!(!matcher.has_match("nothing"));
    }

    #[test]
    fn test_boolean_or_and_parentheses() {
        let matcher = compiled(SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#"("alpha" or "beta") and not "gamma""#)
        });
        assert!(matcher.has_match("alpha only"));
        assert!(matcher.has_match("some beta"));
        assert!(!matcher.has_match("alpha gamma"));
        assert!(!matcher.has_match("delta"));
    }

    #[test]
    fn test_boolean_precedence_and_binds_tighter_than_or() {
        // "a" or "b" and "c"  ==  "a" or ("b" and "c")
        let matcher = compiled(SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""aa" or "bb" and "cc""#)
        });
        assert!(matcher.has_match("aa"));
        assert!(matcher.has_match("bb cc"));
        assert!(!matcher.has_match("bb"));
    }

    #[test]
    fn test_boolean_quoted_escape() {
        let matcher = compiled(SearchPattern {
            boolean_combine: true,
            plain_text: true,
            ..SearchPattern::new(r#""say \"hi\"""#)
        });
        assert!(matcher.has_match(r#"they say "hi" loudly"#));
    }

    #[test]
    fn test_boolean_syntax_errors_carry_position() {
        let unterminated = CompiledPattern::compile(&SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""foo" and "bar"#)
        });
        match unterminated {
            Err(LoglensError::RegexInvalid { reason }) => {
                assert!(reason.contains("offset 10"), "reason: {reason}")
            }
            other => panic!("expected RegexInvalid, got {other:?}"),
        }

        let dangling = CompiledPattern::compile(&SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""foo" and"#)
        });
        assert!(matches!(dangling, Err(LoglensError::RegexInvalid { .. })));

        let bare_word = CompiledPattern::compile(&SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new("foo")
        });
        assert!(matches!(bare_word, Err(LoglensError::RegexInvalid { .. })));
    }

    #[test]
    fn test_boolean_rejects_non_ascii_bareword() {
        // An unquoted word is rejected even when it scans as a prefix of
        // ASCII alphanumerics followed by a multi-byte character; the
        // error points at the start of the word.
        let mixed = CompiledPattern::compile(&SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#"café and "x""#)
        });
        match mixed {
            Err(LoglensError::RegexInvalid { reason }) => {
                assert!(reason.contains("offset 0"), "reason: {reason}");
                assert!(reason.contains("quoted pattern"), "reason: {reason}");
            }
            other => panic!("expected RegexInvalid, got {other:?}"),
        }

        // A bareword starting with a non-ASCII byte never forms a word at
        // all; the error names the offending byte offset and is distinct
        // from the unknown-keyword one.
        let leading = CompiledPattern::compile(&SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""x" or ñ"#)
        });
        match leading {
            Err(LoglensError::RegexInvalid { reason }) => {
                assert!(reason.contains("unexpected character"), "reason: {reason}");
                assert!(reason.contains("offset 7"), "reason: {reason}");
            }
            other => panic!("expected RegexInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_boolean_sub_patterns_are_regexes_by_default() {
        let matcher = compiled(SearchPattern {
            boolean_combine: true,
            ..SearchPattern::new(r#""^start" and "\d+$""#)
        });
        assert!(matcher.has_match("start and then 123"));
        assert!(!matcher.has_match("no anchors 123"));
    }
}
