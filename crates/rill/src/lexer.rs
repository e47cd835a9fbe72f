//! The lexer, built on `logos`.
//!
//! Source text is tokenized eagerly into a vector of positioned tokens.
//! Newlines are tokens (they terminate statements); spaces, tabs and
//! comments are skipped.

use logos::Logos;

use crate::error::{CompileError, Pos};

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokKind,
    pub pos: Pos,
}

fn parse_int_radix(s: &str, radix: u32) -> Option<i64> {
    let digits: String = s[2..].chars().filter(|c| *c != '_').collect();
    i64::from_str_radix(&digits, radix).ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, TokKind>) -> Option<i64> {
    let digits: String = lex.slice().chars().filter(|c| *c != '_').collect();
    digits.parse().ok()
}

fn parse_uint(lex: &mut logos::Lexer<'_, TokKind>) -> Option<u64> {
    let s = lex.slice();
    let digits: String = s[..s.len() - 1].chars().filter(|c| *c != '_').collect();
    digits.parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, TokKind>) -> Option<f64> {
    let digits: String = lex.slice().chars().filter(|c| *c != '_').collect();
    digits.parse().ok()
}

fn parse_decimal(lex: &mut logos::Lexer<'_, TokKind>) -> Option<String> {
    let s = lex.slice();
    Some(s[..s.len() - 1].chars().filter(|c| *c != '_').collect())
}

/// Unescapes the contents of a quoted literal (without its quotes).
fn unescape(src: &str) -> Option<String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '`' => out.push('`'),
            'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
                out.push(byte as char);
            }
            'u' => {
                if chars.next()? != '{' {
                    return None;
                }
                let mut hex = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        c => hex.push(c),
                    }
                }
                let code = u32::from_str_radix(&hex, 16).ok()?;
                out.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }
    Some(out)
}

fn parse_str(lex: &mut logos::Lexer<'_, TokKind>) -> Option<String> {
    let s = lex.slice();
    unescape(&s[1..s.len() - 1])
}

fn parse_raw_str(lex: &mut logos::Lexer<'_, TokKind>) -> Option<String> {
    let s = lex.slice();
    Some(s[1..s.len() - 1].to_owned())
}

fn parse_char(lex: &mut logos::Lexer<'_, TokKind>) -> Option<char> {
    let s = lex.slice();
    let inner = unescape(&s[1..s.len() - 1])?;
    let mut chars = inner.chars();
    let c = chars.next()?;
    if chars.next().is_some() { None } else { Some(c) }
}

/// Token kinds.
///
/// Statement separators are newlines and (outside call argument lists)
/// semicolons; inside an argument list a semicolon introduces the named
/// arguments.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*(?:[^*]|\*[^/])*\*/")]
pub(crate) enum TokKind {
    #[regex(r"\n")]
    Newline,

    // Literals
    #[regex(r"0[xX][0-9a-fA-F_]+", |lex| parse_int_radix(lex.slice(), 16))]
    #[regex(r"0[oO][0-7_]+", |lex| parse_int_radix(lex.slice(), 8))]
    #[regex(r"0[bB][01_]+", |lex| parse_int_radix(lex.slice(), 2))]
    #[regex(r"[0-9][0-9_]*", parse_int)]
    Int(i64),
    #[regex(r"[0-9][0-9_]*u", parse_uint)]
    Uint(u64),
    #[regex(r"[0-9][0-9_]*\.[0-9_]+([eE][+-]?[0-9]+)?", parse_float)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", parse_float)]
    Float(f64),
    #[regex(r"[0-9][0-9_]*(\.[0-9_]+)?d", parse_decimal)]
    Decimal(String),
    #[regex(r#""(?:[^"\\\n]|\\[^\n])*""#, parse_str)]
    Str(String),
    #[regex(r"`[^`]*`", parse_raw_str)]
    RawStr(String),
    #[regex(r"'(?:[^'\\\n]|\\[^\n])*'", parse_char)]
    Char(char),

    // Keywords
    #[token("var")]
    Var,
    #[token("const")]
    Const,
    #[token("param")]
    Param,
    #[token("global")]
    Global,
    #[token("func")]
    Func,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("throw")]
    Throw,
    #[token("import")]
    Import,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("yes")]
    Yes,
    #[token("no")]
    No,
    #[token("nil")]
    Nil,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    // Operators and punctuation
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    StarStar,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    QuestionQuestion,
    #[token("~")]
    Tilde,
    #[token("~~")]
    TildeTilde,
    #[token("~~~")]
    TildeTildeTilde,
    #[token("!")]
    Bang,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,
    #[token("=")]
    Assign,
    #[token(":=")]
    Define,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token("??=")]
    NilAssign,
    #[token("||=")]
    OrAssign,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

/// Tokenizes a source string, attaching line/column positions.
pub(crate) fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    // Byte offsets of line starts, for span -> line/column mapping.
    let mut line_starts = vec![0usize];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            line_starts.push(i + 1);
        }
    }
    let pos_of = |offset: usize| -> Pos {
        let line = line_starts.partition_point(|&s| s <= offset);
        let col = offset - line_starts[line - 1] + 1;
        Pos::new(u32::try_from(line).unwrap_or(u32::MAX), u32::try_from(col).unwrap_or(u32::MAX))
    };

    let mut tokens = Vec::new();
    let mut lexer = TokKind::lexer(source);
    while let Some(result) = lexer.next() {
        let pos = pos_of(lexer.span().start);
        match result {
            Ok(kind) => tokens.push(Token { kind, pos }),
            Err(()) => {
                return Err(CompileError::new(pos, format!("unexpected character {:?}", lexer.slice())));
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 12u 1.5 1e3 2.5d 0x1f 0b101"),
            vec![
                TokKind::Int(1),
                TokKind::Uint(12),
                TokKind::Float(1.5),
                TokKind::Float(1000.0),
                TokKind::Decimal("2.5".into()),
                TokKind::Int(31),
                TokKind::Int(5),
            ]
        );
    }

    #[test]
    fn test_strings_and_chars() {
        assert_eq!(
            kinds(r#""a\nb" `raw\n` 'x' '\n'"#),
            vec![
                TokKind::Str("a\nb".into()),
                TokKind::RawStr("raw\\n".into()),
                TokKind::Char('x'),
                TokKind::Char('\n'),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a ??= b ||= c ~~~ d"),
            vec![
                TokKind::Ident("a".into()),
                TokKind::NilAssign,
                TokKind::Ident("b".into()),
                TokKind::OrAssign,
                TokKind::Ident("c".into()),
                TokKind::TildeTildeTilde,
                TokKind::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_comments_skipped_newline_kept() {
        assert_eq!(
            kinds("a // comment\nb /* c */ d"),
            vec![
                TokKind::Ident("a".into()),
                TokKind::Newline,
                TokKind::Ident("b".into()),
                TokKind::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = lex("a\n  b").unwrap();
        assert_eq!(tokens[0].pos, Pos::new(1, 1));
        assert_eq!(tokens[2].pos, Pos::new(2, 3));
    }
}
