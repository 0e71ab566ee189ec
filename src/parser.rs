use crate::ast::{AstKind, AstNode, ExternKind, IfClause, ImplementMethod, StructMember};
use crate::error::ParseError;
use crate::token::{Token, TokenKind};

/// Recursive-descent parser over a pre-lexed token vector.
///
/// The parser owns a cursor `i` into the token buffer; every `parse_*`
/// production fully consumes the tokens that belong to it before returning,
/// leaving `i` positioned at the next unconsumed token. `parsing` names the
/// production currently being entered, purely to make the "Unexpected EOF"
/// diagnostic readable; it is saved and restored around each production
/// (see [Parser::in_production]) so a failure nested inside an `elseif`
/// chain still names the innermost production rather than whichever
/// sibling clause last touched the breadcrumb.
pub struct Parser<'t> {
    tokens: &'t [Token],
    i: usize,
    parsing: &'static str,
}

const KEYWORD_PRODUCTIONS: &[&str] = &[
    "func", "inline", "include", "asm", "if", "while", "let", "enable", "requires", "struct",
    "version", "const", "enum", "restrict", "union", "alias", "extern", "implement", "->",
    "return", "break", "continue",
];

/// Parse a full token stream into the ordered list of top-level AST roots.
pub fn parse(tokens: &[Token]) -> Result<Vec<AstNode>, ParseError> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            i: 0,
            parsing: "program",
        }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.i]
    }

    fn at_eof(&self) -> bool {
        self.cur().kind == TokenKind::Eof
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.i].clone();
        if self.i + 1 < self.tokens.len() {
            self.i += 1;
        }
        token
    }

    /// Run `f` with the parsing breadcrumb set to `name`, restoring the
    /// caller's breadcrumb afterwards whether `f` succeeds or fails.
    fn in_production<T>(
        &mut self,
        name: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let previous = self.parsing;
        self.parsing = name;
        let result = f(self);
        self.parsing = previous;
        result
    }

    fn unexpected_eof(&self) -> ParseError {
        ParseError::UnexpectedEof {
            span: self.cur().span.clone(),
            production: self.parsing.to_string(),
        }
    }

    fn unexpected_token(&self) -> ParseError {
        ParseError::UnexpectedToken {
            span: self.cur().span.clone(),
            kind: self.cur().to_string(),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<Token, ParseError> {
        if self.at_eof() {
            return Err(self.unexpected_eof());
        }
        if self.cur().is_keyword(keyword) {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token())
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        !self.at_eof() && self.cur().is_keyword(keyword)
    }

    fn at_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|k| self.at_keyword(k))
    }

    fn expect_identifier(&mut self) -> Result<Token, ParseError> {
        if self.at_eof() {
            return Err(self.unexpected_eof());
        }
        if self.cur().kind == TokenKind::Identifier {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token())
        }
    }

    fn expect_string(&mut self) -> Result<Token, ParseError> {
        if self.at_eof() {
            return Err(self.unexpected_eof());
        }
        if self.cur().kind == TokenKind::String {
            Ok(self.bump())
        } else {
            Err(self.unexpected_token())
        }
    }

    fn expect_integer(&mut self) -> Result<(i64, Token), ParseError> {
        if self.at_eof() {
            return Err(self.unexpected_eof());
        }
        if self.cur().kind == TokenKind::Integer {
            let token = self.bump();
            let value = parse_integer_literal(&token.contents)
                .map_err(|_| ParseError::UnexpectedToken {
                    span: token.span.clone(),
                    kind: format!("integer '{}'", token.contents),
                })?;
            Ok((value, token))
        } else {
            Err(self.unexpected_token())
        }
    }

    fn parse_program(&mut self) -> Result<Vec<AstNode>, ParseError> {
        let mut roots = Vec::new();
        while !self.at_eof() {
            roots.push(self.parse_statement()?);
        }
        Ok(roots)
    }

    /// Parse statements until the current token is an identifier matching
    /// one of `terminators`. Does not consume the terminator.
    fn parse_until_any(&mut self, terminators: &[&str]) -> Result<Vec<AstNode>, ParseError> {
        let mut nodes = Vec::new();
        while !self.at_any_keyword(terminators) {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            nodes.push(self.parse_statement()?);
        }
        Ok(nodes)
    }

    fn parse_block_until(&mut self, terminator: &str) -> Result<Vec<AstNode>, ParseError> {
        let nodes = self.parse_until_any(&[terminator])?;
        self.expect_keyword(terminator)?;
        Ok(nodes)
    }

    fn parse_statement(&mut self) -> Result<AstNode, ParseError> {
        match self.cur().kind {
            TokenKind::Integer => {
                let (value, token) = self.expect_integer()?;
                Ok(AstNode::new(AstKind::Integer(value), token.span))
            }
            TokenKind::String => {
                let token = self.bump();
                let constant = token.extra.as_deref() == Some("c");
                Ok(AstNode::new(
                    AstKind::String {
                        body: token.contents,
                        constant,
                    },
                    token.span,
                ))
            }
            TokenKind::LSquare => self.parse_array(),
            TokenKind::Ampersand => self.parse_addr(),
            TokenKind::Identifier => {
                let text = self.cur().contents.clone();
                if KEYWORD_PRODUCTIONS.contains(&text.as_str()) {
                    self.dispatch_keyword(&text)
                } else {
                    let token = self.bump();
                    Ok(AstNode::new(AstKind::Word(token.contents), token.span))
                }
            }
            TokenKind::Eof | TokenKind::RSquare => Err(self.unexpected_token()),
        }
    }

    fn dispatch_keyword(&mut self, text: &str) -> Result<AstNode, ParseError> {
        match text {
            "func" | "inline" => self.in_production("function definition", Self::parse_func_def),
            "include" => self.in_production("include", Self::parse_include),
            "asm" => self.in_production("asm block", Self::parse_asm),
            "if" => self.in_production("if statement", Self::parse_if),
            "while" => self.in_production("while loop", Self::parse_while),
            "let" => self.in_production("let binding", Self::parse_let),
            "enable" => self.in_production("enable directive", Self::parse_enable),
            "requires" => self.in_production("requires directive", Self::parse_requires),
            "struct" => self.in_production("struct definition", Self::parse_struct),
            "version" => self.in_production("version block", Self::parse_version),
            "const" => self.in_production("const definition", Self::parse_const),
            "enum" => self.in_production("enum definition", Self::parse_enum),
            "restrict" => self.in_production("restrict directive", Self::parse_restrict),
            "union" => self.in_production("union definition", Self::parse_union),
            "alias" => self.in_production("alias definition", Self::parse_alias),
            "extern" => self.in_production("extern declaration", Self::parse_extern),
            "implement" => self.in_production("implement block", Self::parse_implement),
            "->" => self.in_production("set statement", Self::parse_set),
            "return" => {
                let token = self.bump();
                Ok(AstNode::new(AstKind::Return, token.span))
            }
            "break" => {
                let token = self.bump();
                Ok(AstNode::new(AstKind::Break, token.span))
            }
            "continue" => {
                let token = self.bump();
                Ok(AstNode::new(AstKind::Continue, token.span))
            }
            _ => unreachable!("dispatch_keyword called with non-keyword '{text}'"),
        }
    }

    fn parse_array(&mut self) -> Result<AstNode, ParseError> {
        self.in_production("array literal", |p| {
            let open = p.bump(); // '['
            let constant = if !p.at_eof() && p.cur().contents == "c" {
                p.bump();
                true
            } else {
                false
            };
            let element_type = p.expect_identifier()?.contents;
            let mut elements = Vec::new();
            while !p.at_eof() && p.cur().kind != TokenKind::RSquare {
                elements.push(p.parse_statement()?);
            }
            if p.at_eof() {
                return Err(p.unexpected_eof());
            }
            p.bump(); // ']'
            Ok(AstNode::new(
                AstKind::Array {
                    element_type,
                    elements,
                    constant,
                },
                open.span,
            ))
        })
    }

    fn parse_addr(&mut self) -> Result<AstNode, ParseError> {
        let amp = self.bump();
        let target = self.expect_identifier()?.contents;
        Ok(AstNode::new(AstKind::Addr { target }, amp.span))
    }

    fn parse_func_def(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        let inline = self.cur().contents == "inline";
        self.bump(); // 'func' | 'inline'
        let first = self.expect_identifier()?;
        let (raw, name_token) = if first.contents == "raw" {
            (true, self.expect_identifier()?)
        } else {
            (false, first)
        };
        let name = name_token.contents;

        let mut params = Vec::new();
        while !self.at_keyword("begin") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            let ty = self.expect_identifier()?.contents;
            let pname = self.expect_identifier()?.contents;
            params.push((ty, pname));
        }
        self.expect_keyword("begin")?;

        let mut body = Vec::new();
        while !self.at_keyword("end") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            if self.at_keyword("func") || self.at_keyword("inline") {
                return Err(ParseError::NestedFuncDef(self.cur().span.clone()));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_keyword("end")?;

        Ok(AstNode::new(
            AstKind::FuncDef {
                name,
                inline,
                raw,
                params,
                body,
            },
            start,
        ))
    }

    fn parse_include(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump();
        let path = self.expect_string()?.contents;
        Ok(AstNode::new(AstKind::Include { path }, kw.span))
    }

    fn parse_asm(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump();
        let mut text = String::new();
        let first = self.expect_string()?;
        text.push_str(&first.contents);
        while !self.at_eof() && self.cur().kind == TokenKind::String {
            text.push('\n');
            text.push_str(&self.bump().contents);
        }
        Ok(AstNode::new(AstKind::Asm { text }, kw.span))
    }

    fn parse_if(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'if'
        let mut clauses = Vec::new();
        let mut else_body = None;
        loop {
            let condition = self.parse_until_any(&["then"])?;
            self.expect_keyword("then")?;
            let body = self.parse_until_any(&["elseif", "else", "end"])?;
            clauses.push(IfClause { condition, body });

            if self.at_keyword("elseif") {
                self.bump();
                continue;
            } else if self.at_keyword("else") {
                self.bump();
                let body = self.parse_block_until("end")?;
                else_body = Some(body);
                break;
            } else {
                self.expect_keyword("end")?;
                break;
            }
        }
        Ok(AstNode::new(AstKind::If { clauses, else_body }, start))
    }

    fn parse_while(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'while'
        let condition = self.parse_until_any(&["do"])?;
        self.expect_keyword("do")?;
        let body = self.parse_block_until("end")?;
        Ok(AstNode::new(AstKind::While { condition, body }, start))
    }

    fn parse_let(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'let'
        let mut array = false;
        let mut array_size = 0u64;
        if self.at_keyword("array") {
            self.bump();
            let (value, _) = self.expect_integer()?;
            array = true;
            array_size = value as u64;
        }
        let ty = self.expect_identifier()?.contents;
        let name = self.expect_identifier()?.contents;
        Ok(AstNode::new(
            AstKind::Let {
                ty,
                name,
                array,
                array_size,
            },
            start,
        ))
    }

    fn parse_enable(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump();
        let name = self.expect_identifier()?.contents;
        Ok(AstNode::new(AstKind::Enable { name }, kw.span))
    }

    fn parse_requires(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump();
        let name = self.expect_identifier()?.contents;
        Ok(AstNode::new(AstKind::Requires { name }, kw.span))
    }

    fn parse_restrict(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump();
        let name = self.expect_identifier()?.contents;
        Ok(AstNode::new(AstKind::Restrict { name }, kw.span))
    }

    fn parse_version(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'version'
        let not = if self.at_keyword("not") {
            self.bump();
            true
        } else {
            false
        };
        let name = self.expect_identifier()?.contents;
        let body = self.parse_block_until("end")?;
        Ok(AstNode::new(AstKind::Version { name, not, body }, start))
    }

    fn parse_struct(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'struct'
        let name = self.expect_identifier()?.contents;
        let parent = if !self.at_eof() && self.cur().contents == ":" {
            self.bump();
            Some(self.expect_identifier()?.contents)
        } else {
            None
        };
        let mut members = Vec::new();
        while !self.at_keyword("end") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            let mut array = false;
            let mut size = 0u64;
            if self.at_keyword("array") {
                self.bump();
                let (value, _) = self.expect_integer()?;
                array = true;
                size = value as u64;
            }
            let ty = self.expect_identifier()?.contents;
            let member_name = self.expect_identifier()?.contents;
            members.push(StructMember {
                ty,
                name: member_name,
                array,
                size,
            });
        }
        self.expect_keyword("end")?;
        Ok(AstNode::new(
            AstKind::Struct {
                name,
                parent,
                members,
            },
            start,
        ))
    }

    fn parse_enum(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'enum'
        let name = self.expect_identifier()?.contents;
        let base_type = if !self.at_eof() && self.cur().contents == ":" {
            self.bump();
            self.expect_identifier()?.contents
        } else {
            "cell".to_string()
        };
        let mut members = Vec::new();
        let mut previous: i64 = -1;
        while !self.at_keyword("end") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            let member_name = self.expect_identifier()?.contents;
            let value = if !self.at_eof() && self.cur().contents == "=" {
                self.bump();
                let (v, _) = self.expect_integer()?;
                v
            } else {
                previous + 1
            };
            previous = value;
            members.push((member_name, value));
        }
        self.expect_keyword("end")?;
        Ok(AstNode::new(
            AstKind::Enum {
                name,
                base_type,
                members,
            },
            start,
        ))
    }

    fn parse_union(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'union'
        let name = self.expect_identifier()?.contents;
        let mut members = Vec::new();
        while !self.at_keyword("end") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            members.push(self.expect_identifier()?.contents);
        }
        self.expect_keyword("end")?;
        Ok(AstNode::new(AstKind::Union { name, members }, start))
    }

    fn parse_alias(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'alias'
        let to = self.expect_identifier()?.contents;
        let from = self.expect_identifier()?.contents;
        let overwrite = if self.at_keyword("overwrite") {
            self.bump();
            true
        } else {
            false
        };
        Ok(AstNode::new(
            AstKind::Alias {
                to,
                from,
                overwrite,
            },
            start,
        ))
    }

    fn parse_const(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'const'
        let name = self.expect_identifier()?.contents;
        let (value, _) = self.expect_integer()?;
        Ok(AstNode::new(AstKind::Const { name, value }, start))
    }

    fn parse_extern(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'extern'
        if self.at_keyword("raw") {
            self.bump();
            let name = self.expect_identifier()?.contents;
            Ok(AstNode::new(
                AstKind::Extern {
                    name,
                    kind: ExternKind::Raw,
                },
                start,
            ))
        } else if self.at_keyword("C") {
            self.bump();
            let return_type = self.expect_identifier()?.contents;
            let name = self.expect_identifier()?.contents;
            let mut params = Vec::new();
            while !self.at_keyword("end") {
                if self.at_eof() {
                    return Err(self.unexpected_eof());
                }
                params.push(self.expect_identifier()?.contents);
            }
            self.expect_keyword("end")?;
            Ok(AstNode::new(
                AstKind::Extern {
                    name,
                    kind: ExternKind::C {
                        return_type,
                        params,
                    },
                },
                start,
            ))
        } else {
            let name = self.expect_identifier()?.contents;
            Ok(AstNode::new(
                AstKind::Extern {
                    name,
                    kind: ExternKind::Native,
                },
                start,
            ))
        }
    }

    fn parse_implement(&mut self) -> Result<AstNode, ParseError> {
        let start = self.cur().span.clone();
        self.bump(); // 'implement'
        let struct_name = self.expect_identifier()?.contents;
        let method_token = self.expect_identifier()?;
        let method = match method_token.contents.as_str() {
            "init" => ImplementMethod::Init,
            "deinit" => ImplementMethod::Deinit,
            _ => {
                return Err(ParseError::UnexpectedToken {
                    span: method_token.span,
                    kind: format!("identifier '{}'", method_token.contents),
                })
            }
        };
        let mut body = Vec::new();
        while !self.at_keyword("end") {
            if self.at_eof() {
                return Err(self.unexpected_eof());
            }
            if self.at_keyword("func") || self.at_keyword("inline") {
                return Err(ParseError::NestedFuncDef(self.cur().span.clone()));
            }
            body.push(self.parse_statement()?);
        }
        self.expect_keyword("end")?;
        Ok(AstNode::new(
            AstKind::Implement {
                struct_name,
                method,
                body,
            },
            start,
        ))
    }

    fn parse_set(&mut self) -> Result<AstNode, ParseError> {
        let kw = self.bump(); // '->'
        let name = self.expect_identifier()?.contents;
        Ok(AstNode::new(AstKind::Set { name }, kw.span))
    }
}

fn parse_integer_literal(text: &str) -> Result<i64, std::num::ParseIntError> {
    if let Some(hex) = text.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else {
        text.parse::<i64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::span::Code;

    fn parse_src(src: &str) -> Vec<AstNode> {
        let code = Code::new("test", src.as_bytes());
        let tokens = tokenize(&code).unwrap();
        parse(&tokens).unwrap()
    }

    #[test]
    fn parses_func_def() {
        let ast = parse_src("func main begin 1 2 end");
        assert_eq!(ast.len(), 1);
        match &ast[0].kind {
            AstKind::FuncDef {
                name, body, inline, raw, ..
            } => {
                assert_eq!(name, "main");
                assert!(!inline);
                assert!(!raw);
                assert_eq!(body.len(), 2);
            }
            other => panic!("expected FuncDef, got {other:?}"),
        }
    }

    #[test]
    fn parses_inline_and_raw() {
        let ast = parse_src("inline foo begin end");
        match &ast[0].kind {
            AstKind::FuncDef { inline, .. } => assert!(inline),
            _ => panic!("expected FuncDef"),
        }
        let ast = parse_src("func raw bar begin end");
        match &ast[0].kind {
            AstKind::FuncDef { raw, name, .. } => {
                assert!(raw);
                assert_eq!(name, "bar");
            }
            _ => panic!("expected FuncDef"),
        }
    }

    #[test]
    fn parses_if_else() {
        let ast = parse_src("if 1 then 2 else 3 end");
        match &ast[0].kind {
            AstKind::If { clauses, else_body } => {
                assert_eq!(clauses.len(), 1);
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_elseif_chain() {
        let ast = parse_src("if 1 then 2 elseif 3 then 4 else 5 end");
        match &ast[0].kind {
            AstKind::If { clauses, else_body } => {
                assert_eq!(clauses.len(), 2);
                assert!(else_body.is_some());
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn parses_while_loop() {
        let ast = parse_src("while 1 do 2 end");
        assert!(matches!(ast[0].kind, AstKind::While { .. }));
    }

    #[test]
    fn parses_let_with_array() {
        let ast = parse_src("let array 4 u8 buf");
        match &ast[0].kind {
            AstKind::Let {
                ty,
                name,
                array,
                array_size,
            } => {
                assert_eq!(ty, "u8");
                assert_eq!(name, "buf");
                assert!(array);
                assert_eq!(*array_size, 4);
            }
            other => panic!("expected Let, got {other:?}"),
        }
    }

    #[test]
    fn parses_struct_with_parent() {
        let ast = parse_src("struct Point u16 x u16 y end");
        match &ast[0].kind {
            AstKind::Struct {
                name,
                parent,
                members,
            } => {
                assert_eq!(name, "Point");
                assert!(parent.is_none());
                assert_eq!(members.len(), 2);
            }
            other => panic!("expected Struct, got {other:?}"),
        }
    }

    #[test]
    fn parses_enum_with_implicit_values() {
        let ast = parse_src("enum Color : u8 Red Green = 5 Blue end");
        match &ast[0].kind {
            AstKind::Enum {
                base_type, members, ..
            } => {
                assert_eq!(base_type, "u8");
                assert_eq!(members, &vec![
                    ("Red".to_string(), 0),
                    ("Green".to_string(), 5),
                    ("Blue".to_string(), 6),
                ]);
            }
            other => panic!("expected Enum, got {other:?}"),
        }
    }

    #[test]
    fn parses_array_literal() {
        let ast = parse_src("[ u8 1 2 3 ]");
        match &ast[0].kind {
            AstKind::Array {
                element_type,
                elements,
                constant,
            } => {
                assert_eq!(element_type, "u8");
                assert_eq!(elements.len(), 3);
                assert!(!constant);
            }
            other => panic!("expected Array, got {other:?}"),
        }
    }

    #[test]
    fn parses_set_statement() {
        let ast = parse_src("-> x");
        match &ast[0].kind {
            AstKind::Set { name } => assert_eq!(name, "x"),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn rejects_nested_func_def() {
        let code = Code::new("test", b"func a begin func b begin end end");
        let tokens = tokenize(&code).unwrap();
        let err = parse(&tokens).unwrap_err();
        assert!(matches!(err, ParseError::NestedFuncDef(_)));
    }

    #[test]
    fn reports_unexpected_eof_with_innermost_production() {
        let code = Code::new("test", b"if 1 then 2 elseif 3 then");
        let tokens = tokenize(&code).unwrap();
        let err = parse(&tokens).unwrap_err();
        match err {
            ParseError::UnexpectedEof { production, .. } => {
                assert_eq!(production, "if statement");
            }
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }
}
