//! Template evaluator for site definitions
//!
//! Definitions use a small subset of Go's text/template language:
//!
//! ```text
//! browse.php?search={{ .Keywords }}&cat={{ join .Categories "," }}
//! {{ if .Query.IMDBID }}imdb={{ .Query.IMDBIDShort }}{{ else }}q={{ .Keywords | urlencode }}{{ end }}
//! {{ range .Categories }}c{{ . }}=1&{{ end }}
//! ```
//!
//! Supported: field access, `{{ . }}` inside `range`, string and integer
//! literals, trim markers (`{{-`, `-}}`), `if`/`else if`/`else`/`end`,
//! `range`/`else`/`end`, parenthesised sub-expressions, and the functions
//! `eq ne and or not join` plus every string filter from [`filters`].
//! In a pipeline (`a | f x`) the value on the left is the subject of `f`,
//! i.e. its first argument.
//!
//! Null variables render as an empty string. Variables that are not declared
//! in the context, unknown functions and syntax errors are definition errors.

pub mod filters;

use super::context::{Value, VariableContext};
use super::error::{IndexerError, Result};

/// Escaping applied to every substituted value, never to literal text
pub type EscapeFn = fn(&str) -> String;

/// Renders a template against a variable context
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, ctx: &VariableContext, escape: Option<EscapeFn>) -> Result<String>;
}

/// The default renderer
#[derive(Debug, Clone, Copy, Default)]
pub struct GoTemplate;

impl TemplateRenderer for GoTemplate {
    fn render(&self, template: &str, ctx: &VariableContext, escape: Option<EscapeFn>) -> Result<String> {
        render(template, ctx, escape)
    }
}

/// Render `template` against `ctx`
pub fn render(template: &str, ctx: &VariableContext, escape: Option<EscapeFn>) -> Result<String> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let nodes = parse(template)?;
    let mut out = String::with_capacity(template.len());
    let mut eval = Evaluator {
        ctx,
        escape,
        template,
    };
    eval.render_nodes(&nodes, &Value::Null, &mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

enum Piece {
    Text(String),
    Action(String),
}

fn split_pieces(template: &str) -> Result<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut rest = template;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut text = &rest[..start];
        if trim_next {
            text = text.trim_start();
        }
        let after_open = &rest[start + 2..];
        let trim_prev = after_open.starts_with('-') && !after_open[1..].starts_with(|c: char| c.is_ascii_digit());
        if trim_prev {
            text = text.trim_end();
        }
        if !text.is_empty() {
            pieces.push(Piece::Text(text.to_string()));
        }

        let end = find_action_end(after_open).ok_or_else(|| {
            IndexerError::definition(format!("unclosed action in template '{}'", template))
        })?;
        let mut body = &after_open[..end];
        if trim_prev {
            body = &body[1..];
        }
        trim_next = body.ends_with('-') && body[..body.len() - 1].ends_with(char::is_whitespace);
        if trim_next {
            body = &body[..body.len() - 1];
        }
        pieces.push(Piece::Action(body.trim().to_string()));
        rest = &after_open[end + 2..];
    }

    let text = if trim_next { rest.trim_start() } else { rest };
    if !text.is_empty() {
        pieces.push(Piece::Text(text.to_string()));
    }
    Ok(pieces)
}

/// Position of the closing `}}`, skipping string literals
fn find_action_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Dot,
    Str(String),
    Int(i64),
    Ident(String),
    Pipe,
    Open,
    Close,
}

fn tokenize(action: &str, template: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = action.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let err = |msg: String| IndexerError::definition(format!("{} in template '{}'", msg, template));

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '|' {
            tokens.push(Token::Pipe);
            i += 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == '"' {
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err(err("unterminated string".into())),
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or_else(|| err("bad escape".into()))?;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                        i += 2;
                    }
                    Some(ch) => {
                        s.push(*ch);
                        i += 1;
                    }
                }
            }
            tokens.push(Token::Str(s));
        } else if c == '`' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|ch| *ch == '`')
                .ok_or_else(|| err("unterminated raw string".into()))?;
            tokens.push(Token::Str(chars[start..start + end].iter().collect()));
            i = start + end + 1;
        } else if c == '.' {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let path: String = chars[start..i].iter().collect();
            if path == "." {
                tokens.push(Token::Dot);
            } else {
                tokens.push(Token::Field(path));
            }
        } else if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let lit: String = chars[start..i].iter().collect();
            let n = lit.parse().map_err(|_| err(format!("bad number '{}'", lit)))?;
            tokens.push(Token::Int(n));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(err(format!("unexpected character '{}'", c)));
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Operand {
    Field(String),
    Dot,
    Str(String),
    Int(i64),
    Func(String),
    Sub(Pipeline),
}

type Command = Vec<Operand>;

#[derive(Debug, Clone)]
struct Pipeline(Vec<Command>);

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

fn parse(template: &str) -> Result<Vec<Node>> {
    let pieces = split_pieces(template)?;
    let mut parser = Parser {
        pieces: pieces.into_iter(),
        template,
    };
    let (nodes, terminator) = parser.parse_list()?;
    match terminator {
        None => Ok(nodes),
        Some(t) => Err(IndexerError::definition(format!(
            "unexpected '{{{{ {} }}}}' in template '{}'",
            t, template
        ))),
    }
}

struct Parser<'a> {
    pieces: std::vec::IntoIter<Piece>,
    template: &'a str,
}

impl Parser<'_> {
    /// Parse nodes until `end`, `else` or `else if ...`; returns the terminator action
    fn parse_list(&mut self) -> Result<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();
        while let Some(piece) = self.pieces.next() {
            match piece {
                Piece::Text(t) => nodes.push(Node::Text(t)),
                Piece::Action(a) => {
                    let (keyword, rest) = split_keyword(&a);
                    match keyword {
                        "end" | "else" => return Ok((nodes, Some(a))),
                        "if" => nodes.push(self.parse_if(rest)?),
                        "range" => nodes.push(self.parse_range(rest)?),
                        _ if a.starts_with("/*") => {}
                        _ => nodes.push(Node::Output(self.parse_pipeline(&a)?)),
                    }
                }
            }
        }
        Ok((nodes, None))
    }

    fn parse_if(&mut self, cond: &str) -> Result<Node> {
        let mut branches = vec![];
        let mut cond = self.parse_pipeline(cond)?;
        loop {
            let (body, terminator) = self.parse_list()?;
            branches.push((cond, body));
            let terminator = terminator.ok_or_else(|| self.unclosed("if"))?;
            let (keyword, rest) = split_keyword(&terminator);
            if keyword == "end" {
                return Ok(Node::If {
                    branches,
                    otherwise: vec![],
                });
            }
            // else / else if
            let (next, rest) = split_keyword(rest);
            if next == "if" {
                cond = self.parse_pipeline(rest)?;
                continue;
            }
            let (otherwise, terminator) = self.parse_list()?;
            return match terminator.as_deref().map(split_keyword) {
                Some(("end", _)) => Ok(Node::If { branches, otherwise }),
                _ => Err(self.unclosed("if")),
            };
        }
    }

    fn parse_range(&mut self, over: &str) -> Result<Node> {
        let over = self.parse_pipeline(over)?;
        let (body, terminator) = self.parse_list()?;
        let terminator = terminator.ok_or_else(|| self.unclosed("range"))?;
        let (keyword, _) = split_keyword(&terminator);
        if keyword == "end" {
            return Ok(Node::Range {
                over,
                body,
                otherwise: vec![],
            });
        }
        let (otherwise, terminator) = self.parse_list()?;
        match terminator.as_deref().map(split_keyword) {
            Some(("end", _)) => Ok(Node::Range { over, body, otherwise }),
            _ => Err(self.unclosed("range")),
        }
    }

    fn parse_pipeline(&self, action: &str) -> Result<Pipeline> {
        let tokens = tokenize(action, self.template)?;
        let mut pos = 0;
        let pipeline = self.pipeline_from(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err(IndexerError::definition(format!(
                "unexpected ')' in template '{}'",
                self.template
            )));
        }
        Ok(pipeline)
    }

    fn pipeline_from(&self, tokens: &[Token], pos: &mut usize) -> Result<Pipeline> {
        let mut commands = vec![];
        let mut current: Command = vec![];
        while let Some(token) = tokens.get(*pos) {
            match token {
                Token::Close => break,
                Token::Pipe => {
                    if current.is_empty() {
                        return Err(self.empty_command());
                    }
                    commands.push(std::mem::take(&mut current));
                    *pos += 1;
                }
                Token::Open => {
                    *pos += 1;
                    let sub = self.pipeline_from(tokens, pos)?;
                    if tokens.get(*pos) != Some(&Token::Close) {
                        return Err(IndexerError::definition(format!(
                            "unclosed '(' in template '{}'",
                            self.template
                        )));
                    }
                    *pos += 1;
                    current.push(Operand::Sub(sub));
                }
                Token::Field(f) => {
                    current.push(Operand::Field(f.clone()));
                    *pos += 1;
                }
                Token::Dot => {
                    current.push(Operand::Dot);
                    *pos += 1;
                }
                Token::Str(s) => {
                    current.push(Operand::Str(s.clone()));
                    *pos += 1;
                }
                Token::Int(n) => {
                    current.push(Operand::Int(*n));
                    *pos += 1;
                }
                Token::Ident(name) => {
                    current.push(Operand::Func(name.clone()));
                    *pos += 1;
                }
            }
        }
        if current.is_empty() {
            return Err(self.empty_command());
        }
        commands.push(current);
        Ok(Pipeline(commands))
    }

    fn unclosed(&self, what: &str) -> IndexerError {
        IndexerError::definition(format!("unclosed '{}' in template '{}'", what, self.template))
    }

    fn empty_command(&self) -> IndexerError {
        IndexerError::definition(format!("empty command in template '{}'", self.template))
    }
}

fn split_keyword(action: &str) -> (&str, &str) {
    let action = action.trim();
    match action.find(char::is_whitespace) {
        Some(idx) => (&action[..idx], action[idx..].trim_start()),
        None => (action, ""),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

struct Evaluator<'a> {
    ctx: &'a VariableContext,
    escape: Option<EscapeFn>,
    template: &'a str,
}

impl Evaluator<'_> {
    fn render_nodes(&mut self, nodes: &[Node], dot: &Value, out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Output(pipe) => {
                    let value = self.eval_pipeline(pipe, dot)?.render();
                    match self.escape {
                        Some(escape) => out.push_str(&escape(&value)),
                        None => out.push_str(&value),
                    }
                }
                Node::If { branches, otherwise } => {
                    let mut taken = false;
                    for (cond, body) in branches {
                        if self.eval_pipeline(cond, dot)?.is_truthy() {
                            self.render_nodes(body, dot, out)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.render_nodes(otherwise, dot, out)?;
                    }
                }
                Node::Range { over, body, otherwise } => {
                    let items = match self.eval_pipeline(over, dot)? {
                        Value::List(items) => items,
                        Value::Null => vec![],
                        Value::Str(s) if s.is_empty() => vec![],
                        other => {
                            return Err(self.error(format!("cannot range over '{}'", other.render())));
                        }
                    };
                    if items.is_empty() {
                        self.render_nodes(otherwise, dot, out)?;
                    }
                    for item in items {
                        self.render_nodes(body, &Value::Str(item), out)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_pipeline(&self, pipe: &Pipeline, dot: &Value) -> Result<Value> {
        let mut piped: Option<Value> = None;
        for command in &pipe.0 {
            piped = Some(self.eval_command(command, dot, piped)?);
        }
        Ok(piped.unwrap_or_default())
    }

    fn eval_command(&self, command: &Command, dot: &Value, piped: Option<Value>) -> Result<Value> {
        match command.first() {
            Some(Operand::Func(name)) if !matches!(name.as_str(), "true" | "false" | "nil") => {
                let mut args = Vec::with_capacity(command.len());
                if let Some(p) = piped {
                    args.push(p);
                }
                for operand in &command[1..] {
                    args.push(self.eval_operand(operand, dot)?);
                }
                self.call(name, args)
            }
            Some(operand) if command.len() == 1 && piped.is_none() => self.eval_operand(operand, dot),
            _ => Err(self.error("a value cannot take arguments".to_string())),
        }
    }

    fn eval_operand(&self, operand: &Operand, dot: &Value) -> Result<Value> {
        match operand {
            Operand::Field(path) => self
                .ctx
                .get(path)
                .cloned()
                .ok_or_else(|| self.error(format!("undeclared variable '{}'", path))),
            Operand::Dot => Ok(dot.clone()),
            Operand::Str(s) => Ok(Value::Str(s.clone())),
            Operand::Int(n) => Ok(Value::Str(n.to_string())),
            Operand::Func(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "nil" => Ok(Value::Null),
                _ => self.call(name, vec![]),
            },
            Operand::Sub(pipe) => self.eval_pipeline(pipe, dot),
        }
    }

    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        match name {
            "eq" | "ne" => {
                let (first, rest) = args
                    .split_first()
                    .filter(|(_, rest)| !rest.is_empty())
                    .ok_or_else(|| self.arity(name, "at least 2"))?;
                let first = first.render();
                let any_equal = rest.iter().any(|v| v.render() == first);
                Ok(Value::Bool(if name == "eq" { any_equal } else { !any_equal }))
            }
            "and" => {
                if args.is_empty() {
                    return Err(self.arity(name, "at least 1"));
                }
                let mut last = Value::Null;
                for v in args {
                    if !v.is_truthy() {
                        return Ok(v);
                    }
                    last = v;
                }
                Ok(last)
            }
            "or" => {
                if args.is_empty() {
                    return Err(self.arity(name, "at least 1"));
                }
                let mut last = Value::Null;
                for v in args {
                    if v.is_truthy() {
                        return Ok(v);
                    }
                    last = v;
                }
                Ok(last)
            }
            "not" => match args.as_slice() {
                [v] => Ok(Value::Bool(!v.is_truthy())),
                _ => Err(self.arity(name, "1")),
            },
            "join" => {
                let (list, sep) = match args.as_slice() {
                    [Value::List(l), sep] | [sep, Value::List(l)] => (l.clone(), sep.render()),
                    [Value::Null, sep] | [sep, Value::Null] => (vec![], sep.render()),
                    _ => return Err(self.arity(name, "a list and a separator")),
                };
                Ok(Value::Str(list.join(&sep)))
            }
            _ if filters::is_string_filter(name) => {
                let (subject, rest) = args
                    .split_first()
                    .ok_or_else(|| self.arity(name, "a subject"))?;
                let rest: Vec<String> = rest.iter().map(Value::render).collect();
                filters::apply_filter(name, &subject.render(), &rest)
                    .map(Value::Str)
                    .map_err(|e| self.error(e.to_string()))
            }
            _ => Err(self.error(format!("unknown filter '{}'", name))),
        }
    }

    fn arity(&self, name: &str, expected: &str) -> IndexerError {
        self.error(format!("filter '{}' expects {} argument(s)", name, expected))
    }

    fn error(&self, msg: String) -> IndexerError {
        IndexerError::definition(format!("{} in template '{}'", msg, self.template))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn ctx() -> VariableContext {
        let mut ctx = VariableContext::new();
        ctx.set(".Query.Q", "the matrix");
        ctx.set(".Query.IMDBID", Value::Null);
        ctx.set(".Query.Season", "2");
        ctx.set(".Keywords", "the matrix");
        ctx.set(".Categories", Value::List(vec!["1".into(), "7".into()]));
        ctx.set(".Config.freeleech", Value::Null);
        ctx.set(".Config.sort", "time");
        ctx.set(".True", "True");
        ctx
    }

    #[test]
    fn test_plain_text_passthrough() {
        assert_eq!(render("browse.php", &ctx(), None).unwrap(), "browse.php");
    }

    #[test]
    fn test_substitution_and_null() {
        assert_eq!(
            render("q={{ .Query.Q }}&imdb={{ .Query.IMDBID }}", &ctx(), None).unwrap(),
            "q=the matrix&imdb="
        );
    }

    #[test]
    fn test_escape_applies_to_values_only() {
        let escape: EscapeFn = filters::form_urlencode;
        assert_eq!(
            render("search/{{ .Keywords }}/a b", &ctx(), Some(escape)).unwrap(),
            "search/the+matrix/a b"
        );
    }

    #[test]
    fn test_pipeline_filters() {
        assert_eq!(render("{{ .Keywords | urlencode }}", &ctx(), None).unwrap(), "the+matrix");
        assert_eq!(
            render("{{ .Keywords | replace \" \" \".\" | toupper }}", &ctx(), None).unwrap(),
            "THE.MATRIX"
        );
        assert_eq!(
            render("{{ re_replace .Keywords \"\\\\s+\" \"-\" }}", &ctx(), None).unwrap(),
            "the-matrix"
        );
    }

    #[test]
    fn test_join_both_forms() {
        assert_eq!(render("{{ join .Categories \",\" }}", &ctx(), None).unwrap(), "1,7");
        assert_eq!(render("{{ .Categories | join \";\" }}", &ctx(), None).unwrap(), "1;7");
    }

    #[test]
    fn test_conditionals() {
        let t = "{{ if .Query.IMDBID }}imdb{{ else if .Config.freeleech }}free{{ else }}text{{ end }}";
        assert_eq!(render(t, &ctx(), None).unwrap(), "text");

        let t = "{{ if eq .Config.sort \"time\" }}o=added{{ end }}";
        assert_eq!(render(t, &ctx(), None).unwrap(), "o=added");

        let t = "{{ if or (eq .Query.Season \"1\") .True }}yes{{ else }}no{{ end }}";
        assert_eq!(render(t, &ctx(), None).unwrap(), "yes");

        let t = "{{ if and .Query.Q (not .Config.freeleech) }}go{{ end }}";
        assert_eq!(render(t, &ctx(), None).unwrap(), "go");
    }

    #[test]
    fn test_range() {
        let t = "{{ range .Categories }}c{{ . }}=1&{{ end }}incldead=1";
        assert_eq!(render(t, &ctx(), None).unwrap(), "c1=1&c7=1&incldead=1");

        let mut empty = ctx();
        empty.set(".Categories", Value::List(vec![]));
        let t = "{{ range .Categories }}c{{ . }}{{ else }}all{{ end }}";
        assert_eq!(render(t, &empty, None).unwrap(), "all");
    }

    #[test]
    fn test_trim_markers() {
        let t = "a  {{- .Query.Season -}}  b";
        assert_eq!(render(t, &ctx(), None).unwrap(), "a2b");
    }

    #[test]
    fn test_undeclared_variable_is_definition_error() {
        let err = render("{{ .Query.Nope }}", &ctx(), None).unwrap_err();
        assert_matches!(err, IndexerError::Definition(msg) if msg.contains(".Query.Nope"));
    }

    #[test]
    fn test_unknown_filter_names_template_and_filter() {
        let err = render("{{ .Keywords | shout }}", &ctx(), None).unwrap_err();
        assert_matches!(
            err,
            IndexerError::Definition(msg) if msg.contains("shout") && msg.contains("{{ .Keywords | shout }}")
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert_matches!(render("{{ .Keywords ", &ctx(), None), Err(IndexerError::Definition(_)));
        assert_matches!(
            render("{{ if .Keywords }}x", &ctx(), None),
            Err(IndexerError::Definition(_))
        );
        assert_matches!(render("{{ end }}", &ctx(), None), Err(IndexerError::Definition(_)));
        assert_matches!(render("{{ \"x }}", &ctx(), None), Err(IndexerError::Definition(_)));
    }

    #[test]
    fn test_braces_inside_strings() {
        assert_eq!(render("{{ \"}}\" }}", &ctx(), None).unwrap(), "}}");
    }

    #[test]
    fn test_renderer_trait() {
        let r = GoTemplate;
        assert_eq!(r.render("{{ .Query.Season }}", &ctx(), None).unwrap(), "2");
    }
}
