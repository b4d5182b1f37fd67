//! Protobuf (proto3) parsing and canonical rendering
//!
//! A deliberately small parser: message, enum, and field declarations are
//! what compatibility checking needs. Options and reserved statements are
//! accepted and dropped; service definitions are rejected as unsupported.

use crate::error::{RegistryError, Result};

/// Field cardinality label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    /// No explicit label (proto3 implicit presence)
    Singular,
    /// `optional`, explicit presence tracking
    Optional,
    /// `repeated`
    Repeated,
}

impl FieldLabel {
    fn render(&self) -> &'static str {
        match self {
            FieldLabel::Singular => "",
            FieldLabel::Optional => "optional ",
            FieldLabel::Repeated => "repeated ",
        }
    }
}

/// A single field declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoField {
    pub label: FieldLabel,
    pub type_name: String,
    pub name: String,
    pub tag: u32,
}

/// An enum declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoEnum {
    pub name: String,
    pub values: Vec<(String, i64)>,
}

/// A message declaration, possibly nested
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoMessage {
    pub name: String,
    pub fields: Vec<ProtoField>,
    pub nested: Vec<ProtoMessage>,
    pub enums: Vec<ProtoEnum>,
}

/// A parsed proto3 file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoSchema {
    pub package: Option<String>,
    pub imports: Vec<String>,
    pub messages: Vec<ProtoMessage>,
    pub enums: Vec<ProtoEnum>,
}

impl ProtoSchema {
    /// Flatten messages into (dotted path, message) pairs, depth first,
    /// for path-addressed lookups during compatibility checks.
    pub fn messages_by_path(&self) -> Vec<(String, &ProtoMessage)> {
        let mut out = Vec::new();
        for msg in &self.messages {
            collect_messages(msg, None, &mut out);
        }
        out
    }

    /// Render the canonical text: declarations in source order, normalized
    /// whitespace, options and comments erased.
    pub fn render(&self) -> String {
        let mut out = String::from("syntax = \"proto3\";\n");
        if let Some(pkg) = &self.package {
            out.push_str(&format!("package {};\n", pkg));
        }
        for import in &self.imports {
            out.push_str(&format!("import \"{}\";\n", import));
        }
        for e in &self.enums {
            render_enum(e, 0, &mut out);
        }
        for m in &self.messages {
            render_message(m, 0, &mut out);
        }
        out
    }
}

fn collect_messages<'a>(
    msg: &'a ProtoMessage,
    prefix: Option<&str>,
    out: &mut Vec<(String, &'a ProtoMessage)>,
) {
    let path = match prefix {
        Some(p) => format!("{}.{}", p, msg.name),
        None => msg.name.clone(),
    };
    out.push((path.clone(), msg));
    for nested in &msg.nested {
        collect_messages(nested, Some(&path), out);
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn render_enum(e: &ProtoEnum, depth: usize, out: &mut String) {
    indent(depth, out);
    out.push_str(&format!("enum {} {{\n", e.name));
    for (name, number) in &e.values {
        indent(depth + 1, out);
        out.push_str(&format!("{} = {};\n", name, number));
    }
    indent(depth, out);
    out.push_str("}\n");
}

fn render_message(m: &ProtoMessage, depth: usize, out: &mut String) {
    indent(depth, out);
    out.push_str(&format!("message {} {{\n", m.name));
    for e in &m.enums {
        render_enum(e, depth + 1, out);
    }
    for n in &m.nested {
        render_message(n, depth + 1, out);
    }
    for f in &m.fields {
        indent(depth + 1, out);
        out.push_str(&format!(
            "{}{} {} = {};\n",
            f.label.render(),
            f.type_name,
            f.name,
            f.tag
        ));
    }
    indent(depth, out);
    out.push_str("}\n");
}

/// Parse and canonicalize a proto3 definition.
pub fn canonicalize(raw: &str) -> Result<String> {
    Ok(parse(raw)?.render())
}

/// Parse a proto3 definition.
pub fn parse(raw: &str) -> Result<ProtoSchema> {
    let tokens = tokenize(raw)?;
    Parser { tokens, pos: 0 }.parse_file()
}

fn parse_error(detail: impl Into<String>) -> RegistryError {
    RegistryError::Parse {
        format: "PROTOBUF".to_string(),
        detail: detail.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Punct(char),
}

fn tokenize(raw: &str) -> Result<Vec<Token>> {
    let src = strip_comments(raw);
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' || c == '\'' {
            let quote = c;
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some(ch) if ch == quote => break,
                    Some(ch) => s.push(ch),
                    None => return Err(parse_error("unterminated string literal")),
                }
            }
            tokens.push(Token::Str(s));
        } else if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
            let mut s = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '-' {
                    s.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(s));
        } else if "{};=,<>[]()".contains(c) {
            tokens.push(Token::Punct(c));
            chars.next();
        } else {
            return Err(parse_error(format!("unexpected character '{}'", c)));
        }
    }

    Ok(tokens)
}

fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    for ch in chars.by_ref() {
                        if ch == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut prev = ' ';
                    for ch in chars.by_ref() {
                        if prev == '*' && ch == '/' {
                            break;
                        }
                        prev = ch;
                    }
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| parse_error("unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        match self.next()? {
            Token::Punct(p) if p == c => Ok(()),
            other => Err(parse_error(format!("expected '{}', found {:?}", c, other))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            other => Err(parse_error(format!("expected identifier, found {:?}", other))),
        }
    }

    /// Skip tokens up to and including the next ';'
    fn skip_statement(&mut self) -> Result<()> {
        loop {
            match self.next()? {
                Token::Punct(';') => return Ok(()),
                _ => continue,
            }
        }
    }

    fn parse_file(&mut self) -> Result<ProtoSchema> {
        let mut schema = ProtoSchema {
            package: None,
            imports: Vec::new(),
            messages: Vec::new(),
            enums: Vec::new(),
        };

        while let Some(tok) = self.peek() {
            match tok.clone() {
                Token::Ident(word) => match word.as_str() {
                    "syntax" => {
                        self.next()?;
                        self.expect_punct('=')?;
                        match self.next()? {
                            Token::Str(s) if s == "proto3" => {}
                            Token::Str(s) => {
                                return Err(parse_error(format!("unsupported syntax '{}'", s)))
                            }
                            other => {
                                return Err(parse_error(format!(
                                    "expected syntax string, found {:?}",
                                    other
                                )))
                            }
                        }
                        self.expect_punct(';')?;
                    }
                    "package" => {
                        self.next()?;
                        schema.package = Some(self.expect_ident()?);
                        self.expect_punct(';')?;
                    }
                    "import" => {
                        self.next()?;
                        // Accept and skip the optional "public" modifier.
                        if let Some(Token::Ident(w)) = self.peek() {
                            if w == "public" {
                                self.next()?;
                            }
                        }
                        match self.next()? {
                            Token::Str(path) => schema.imports.push(path),
                            other => {
                                return Err(parse_error(format!(
                                    "expected import path, found {:?}",
                                    other
                                )))
                            }
                        }
                        self.expect_punct(';')?;
                    }
                    "option" => {
                        self.next()?;
                        self.skip_statement()?;
                    }
                    "message" => {
                        self.next()?;
                        schema.messages.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.next()?;
                        schema.enums.push(self.parse_enum()?);
                    }
                    "service" => {
                        return Err(parse_error("service definitions are not supported"));
                    }
                    other => {
                        return Err(parse_error(format!("unexpected top-level '{}'", other)))
                    }
                },
                Token::Punct(';') => {
                    self.next()?;
                }
                other => return Err(parse_error(format!("unexpected token {:?}", other))),
            }
        }

        Ok(schema)
    }

    fn parse_message(&mut self) -> Result<ProtoMessage> {
        let name = self.expect_ident()?;
        self.expect_punct('{')?;

        let mut msg = ProtoMessage {
            name,
            fields: Vec::new(),
            nested: Vec::new(),
            enums: Vec::new(),
        };

        loop {
            match self.peek().cloned() {
                Some(Token::Punct('}')) => {
                    self.next()?;
                    break;
                }
                Some(Token::Punct(';')) => {
                    self.next()?;
                }
                Some(Token::Ident(word)) => match word.as_str() {
                    "message" => {
                        self.next()?;
                        msg.nested.push(self.parse_message()?);
                    }
                    "enum" => {
                        self.next()?;
                        msg.enums.push(self.parse_enum()?);
                    }
                    "reserved" | "option" => {
                        self.next()?;
                        self.skip_statement()?;
                    }
                    "oneof" => {
                        self.next()?;
                        self.expect_ident()?;
                        self.expect_punct('{')?;
                        loop {
                            match self.peek().cloned() {
                                Some(Token::Punct('}')) => {
                                    self.next()?;
                                    break;
                                }
                                Some(_) => {
                                    let field = self.parse_field()?;
                                    msg.fields.push(field);
                                }
                                None => return Err(parse_error("unterminated oneof")),
                            }
                        }
                    }
                    _ => {
                        let field = self.parse_field()?;
                        msg.fields.push(field);
                    }
                },
                Some(other) => {
                    return Err(parse_error(format!("unexpected token {:?} in message", other)))
                }
                None => return Err(parse_error("unterminated message")),
            }
        }

        Ok(msg)
    }

    fn parse_field(&mut self) -> Result<ProtoField> {
        let mut label = FieldLabel::Singular;
        let mut first = self.expect_ident()?;
        match first.as_str() {
            "optional" => {
                label = FieldLabel::Optional;
                first = self.expect_ident()?;
            }
            "repeated" => {
                label = FieldLabel::Repeated;
                first = self.expect_ident()?;
            }
            _ => {}
        }

        // map<key, value> renders as a single composite type name.
        let type_name = if first == "map" {
            self.expect_punct('<')?;
            let key = self.expect_ident()?;
            self.expect_punct(',')?;
            let value = self.expect_ident()?;
            self.expect_punct('>')?;
            format!("map<{}, {}>", key, value)
        } else {
            first
        };

        let name = self.expect_ident()?;
        self.expect_punct('=')?;
        let tag: u32 = self
            .expect_ident()?
            .parse()
            .map_err(|_| parse_error(format!("invalid field tag for '{}'", name)))?;

        // Field options like [deprecated = true] are dropped.
        if let Some(Token::Punct('[')) = self.peek() {
            loop {
                match self.next()? {
                    Token::Punct(']') => break,
                    _ => continue,
                }
            }
        }
        self.expect_punct(';')?;

        Ok(ProtoField {
            label,
            type_name,
            name,
            tag,
        })
    }

    fn parse_enum(&mut self) -> Result<ProtoEnum> {
        let name = self.expect_ident()?;
        self.expect_punct('{')?;

        let mut values = Vec::new();
        loop {
            match self.next()? {
                Token::Punct('}') => break,
                Token::Punct(';') => continue,
                Token::Ident(word) if word == "option" || word == "reserved" => {
                    self.skip_statement()?;
                }
                Token::Ident(value_name) => {
                    self.expect_punct('=')?;
                    let number: i64 = self
                        .expect_ident()?
                        .parse()
                        .map_err(|_| parse_error(format!("invalid enum number for '{}'", value_name)))?;
                    if let Some(Token::Punct('[')) = self.peek() {
                        loop {
                            match self.next()? {
                                Token::Punct(']') => break,
                                _ => continue,
                            }
                        }
                    }
                    self.expect_punct(';')?;
                    values.push((value_name, number));
                }
                other => return Err(parse_error(format!("unexpected token {:?} in enum", other))),
            }
        }

        Ok(ProtoEnum { name, values })
    }
}
