use crate::error::LexError;
use crate::span::{Code, Span};
use crate::token::{Token, TokenKind};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[ \t\r\n]+").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^;[^\n]*").unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0x[0-9a-fA-F]+|[0-9]+)").unwrap());
static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(->|[^\s\[\]"&;]+)"#).unwrap());

/// Splits `code` into a token stream, skipping whitespace and `;` line comments.
///
/// Classification follows the teacher's `Pattern` lexeme: each rule is an
/// anchored regex tried in priority order against the remaining input. A
/// trailing [TokenKind::Eof] token is always appended so the parser's
/// lookahead never has to special-case running off the end of the buffer.
#[tracing::instrument(skip(code))]
pub fn tokenize(code: &Code) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut pointer = 0usize;
    let end = code.value.len();

    while pointer < end {
        let rest = &code.value[pointer..];

        if let Some(m) = WHITESPACE.find(rest) {
            pointer += m.end();
            continue;
        }
        if let Some(m) = COMMENT.find(rest) {
            pointer += m.end();
            continue;
        }

        let byte = rest[0];
        match byte {
            b'[' => {
                tokens.push(Token::new(
                    TokenKind::LSquare,
                    "[".to_string(),
                    Span::at(code, pointer, pointer + 1),
                ));
                pointer += 1;
            }
            b']' => {
                tokens.push(Token::new(
                    TokenKind::RSquare,
                    "]".to_string(),
                    Span::at(code, pointer, pointer + 1),
                ));
                pointer += 1;
            }
            b'&' => {
                tokens.push(Token::new(
                    TokenKind::Ampersand,
                    "&".to_string(),
                    Span::at(code, pointer, pointer + 1),
                ));
                pointer += 1;
            }
            b'"' => {
                let (token, next) = lex_string(code, pointer, None)?;
                tokens.push(token);
                pointer = next;
            }
            _ => {
                if let Some(m) = INTEGER.find(rest) {
                    let text = std::str::from_utf8(m.as_bytes()).unwrap().to_string();
                    tracing::trace!(?text, "lexed integer");
                    tokens.push(Token::new(
                        TokenKind::Integer,
                        text,
                        Span::at(code, pointer, pointer + m.end()),
                    ));
                    pointer += m.end();
                } else if is_tag_prefixed_string(rest) {
                    let tag = rest[0] as char;
                    let (token, next) = lex_string(code, pointer + 1, Some(tag.to_string()))?;
                    tokens.push(token);
                    pointer = next;
                } else if let Some(m) = IDENTIFIER.find(rest) {
                    let text = std::str::from_utf8(m.as_bytes()).unwrap().to_string();
                    tracing::trace!(?text, "lexed identifier");
                    tokens.push(Token::new(
                        TokenKind::Identifier,
                        text,
                        Span::at(code, pointer, pointer + m.end()),
                    ));
                    pointer += m.end();
                } else {
                    return Err(LexError::UnexpectedByte(
                        Span::at(code, pointer, pointer + 1),
                        byte as char,
                    ));
                }
            }
        }
    }

    tokens.push(Token::new(
        TokenKind::Eof,
        String::new(),
        Span::at(code, end, end),
    ));
    Ok(tokens)
}

/// A single-letter tag (e.g. `c"..."`) immediately followed by an opening quote.
fn is_tag_prefixed_string(rest: &[u8]) -> bool {
    rest.len() >= 2 && rest[0].is_ascii_alphabetic() && rest[1] == b'"'
}

fn lex_string(
    code: &Code,
    quote_start: usize,
    extra: Option<String>,
) -> Result<(Token, usize), LexError> {
    debug_assert_eq!(code.value[quote_start], b'"');
    let mut body = String::new();
    let mut pointer = quote_start + 1;
    loop {
        if pointer >= code.value.len() {
            let start_for_span = extra.as_ref().map_or(quote_start, |_| quote_start - 1);
            return Err(LexError::UnterminatedString(Span::at(
                code,
                start_for_span,
                pointer,
            )));
        }
        match code.value[pointer] {
            b'"' => {
                pointer += 1;
                break;
            }
            b'\\' if pointer + 1 < code.value.len() => {
                let escaped = match code.value[pointer + 1] {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    b'0' => '\0',
                    b'"' => '"',
                    b'\\' => '\\',
                    other => other as char,
                };
                body.push(escaped);
                pointer += 2;
            }
            other => {
                body.push(other as char);
                pointer += 1;
            }
        }
    }
    let start_for_span = extra.as_ref().map_or(quote_start, |_| quote_start - 1);
    let mut token = Token::new(
        TokenKind::String,
        body,
        Span::at(code, start_for_span, pointer),
    );
    if let Some(extra) = extra {
        token = token.with_extra(extra);
    }
    Ok((token, pointer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        let code = Code::new("test", src.as_bytes());
        tokenize(&code).unwrap()
    }

    #[test]
    fn lexes_integers_and_identifiers() {
        let tokens = toks("func main begin 1 2 end");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::Integer,
                TokenKind::Integer,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_tagged_string() {
        let tokens = toks(r#"c"hello""#);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].contents, "hello");
        assert_eq!(tokens[0].extra.as_deref(), Some("c"));
    }

    #[test]
    fn lexes_punctuation_identifiers() {
        let tokens = toks("-> x");
        assert!(tokens[0].is_keyword("->"));
    }

    #[test]
    fn skips_comments() {
        let tokens = toks("1 ; a comment\n2");
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[1].contents, "2");
    }

    #[test]
    fn unterminated_string_errors() {
        let code = Code::new("test", br#""abc"#);
        let err = tokenize(&code).unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString(_)));
    }

    #[test]
    fn rejects_unexpected_byte() {
        let code = Code::new("test", b"@");
        let err = tokenize(&code).unwrap_err();
        assert!(matches!(err, LexError::UnexpectedByte(_, '@')));
    }
}
