use super::interlocking_table::*;
use smallvec::SmallVec;
use std::iter::Peekable;

#[derive(Debug, Fail)]
pub enum LexerError {
    #[fail(display = "unexpected character \"{}\" on line {}", c, line)]
    UnexpectedChar { line: usize, c: String },
    #[fail(display = "malformed number \"{}\" on line {}", num, line)]
    Number { line: usize, num: String },
}

#[derive(Debug, Fail)]
pub enum ParseError {
    #[fail(display = "unexpected token at {}: {}", _0, _1)]
    UnexpectedToken(usize, String),
    #[fail(display = "unknown name \"{}\" in {}", _0, _1)]
    UnknownName(String, String),
    #[fail(display = "no alternative matched: {:?}", _0)]
    Many(Vec<ParseError>),
}

// AST
//
//
enum Statement {
    Segments(Vec<String>),
    Signals(Vec<String>, SignalKind),
    Points(Vec<String>),
    Section(NetworkSection),
    Route(RawRoute),
}

struct RawRoute {
    id: String,
    source: String,
    destination: String,
    orientation: Orientation,
    length: f64,
    path: Vec<String>,
    sections: Vec<String>,
    points: Vec<(String, PointPosition)>,
    signals: Vec<String>,
    conflicts: Vec<String>,
}

// PARSER
//
//

/// Parses an interlocking table:
///
/// ```text
/// segments [seg1, seg2, seg3]
/// signals [signal1, signal2]
/// shunting [signal3]
/// points [point1]
/// section block1 { segments [seg3] entry [signal3] }
/// route r0 {
///     source signal1 destination signal2
///     orientation clockwise length 120.0
///     path [seg1, seg2, signal3, seg3]
///     sections [block1]
///     points [point1 normal]
///     signals [signal1, signal3, signal2]
///     conflicts [r1]
/// }
/// ```
///
/// Declarations may come in any order; path elements are classified as
/// segments or signals once the whole file is read.
pub fn parse(t: &[Token]) -> Result<InterlockingTable, ParseError> {
    let mut i = 0;
    let mut stmts = Vec::new();
    while t[i] != Token::EOF {
        stmts.push(statement(&mut i, t)?);
    }
    model_from_ast(stmts)
}

fn model_from_ast(stmts: Vec<Statement>) -> Result<InterlockingTable, ParseError> {
    let mut table = InterlockingTable::default();
    let mut raw_routes = Vec::new();
    for stmt in stmts {
        match stmt {
            Statement::Segments(s) => table.topology.segments.extend(s),
            Statement::Signals(s, kind) => {
                for sig in s {
                    table.topology.signals.insert(sig, kind);
                }
            }
            Statement::Points(p) => table.topology.points.extend(p),
            Statement::Section(s) => table.topology.entry_signals.add_section(s),
            Statement::Route(r) => raw_routes.push(r),
        }
    }

    for r in raw_routes {
        let route = resolve_route(&table.topology, r)?;
        table.routes.push(route);
    }
    Ok(table)
}

fn resolve_route(topology: &Topology, r: RawRoute) -> Result<Route, ParseError> {
    let context = format!("route {}", r.id);
    let unknown = |name: &str| ParseError::UnknownName(name.to_string(), context.clone());

    let mut path = Vec::new();
    for item in r.path {
        if topology.is_segment(&item) {
            path.push(PathElement::Segment(item));
        } else if topology.is_signal(&item) {
            path.push(PathElement::Signal(item));
        } else {
            return Err(unknown(&item));
        }
    }

    for sig in r.signals.iter().chain(Some(&r.source)).chain(Some(&r.destination)) {
        if !topology.is_signal(sig) {
            return Err(unknown(sig));
        }
    }
    for &(ref p, _) in r.points.iter() {
        if !topology.points.contains(p) {
            return Err(unknown(p));
        }
    }

    Ok(Route {
        id: r.id,
        source: r.source,
        destination: r.destination,
        orientation: r.orientation,
        length: r.length,
        path,
        sections: r.sections.into_iter().collect(),
        points: r.points.into_iter().collect(),
        signals: r.signals.into_iter().collect(),
        conflicts: r.conflicts.into_iter().collect(),
    })
}

fn statement(i: &mut usize, t: &[Token]) -> Result<Statement, ParseError> {
    alt(i,
        t,
        &[&|i, t| {
              symbol(i, t, "segments")?;
              Ok(Statement::Segments(list(i, t, identifier)?))
          },
          &|i, t| {
              symbol(i, t, "signals")?;
              Ok(Statement::Signals(list(i, t, identifier)?, SignalKind::Main))
          },
          &|i, t| {
              symbol(i, t, "shunting")?;
              Ok(Statement::Signals(list(i, t, identifier)?, SignalKind::Shunting))
          },
          &|i, t| {
              symbol(i, t, "points")?;
              Ok(Statement::Points(list(i, t, identifier)?))
          },
          &|i, t| {
              symbol(i, t, "section")?;
              let name = identifier(i, t)?;
              must_match(i, t, Token::BraceOpen)?;
              symbol(i, t, "segments")?;
              let segments = list(i, t, identifier)?;
              symbol(i, t, "entry")?;
              let entry = list(i, t, identifier)?;
              must_match(i, t, Token::BraceClose)?;
              Ok(Statement::Section(NetworkSection {
                  name,
                  segments: segments.into_iter().collect::<SmallVec<_>>(),
                  entry: entry.into_iter().collect::<SmallVec<_>>(),
              }))
          },
          &|i, t| Ok(Statement::Route(route(i, t)?))])
}

fn route(i: &mut usize, t: &[Token]) -> Result<RawRoute, ParseError> {
    symbol(i, t, "route")?;
    let id = route_id(i, t)?;
    must_match(i, t, Token::BraceOpen)?;
    symbol(i, t, "source")?;
    let source = identifier(i, t)?;
    symbol(i, t, "destination")?;
    let destination = identifier(i, t)?;
    symbol(i, t, "orientation")?;
    let orientation = alt(i,
                          t,
                          &[&|i, t| {
                                symbol(i, t, "clockwise")?;
                                Ok(Orientation::Clockwise)
                            },
                            &|i, t| {
                                symbol(i, t, "anticlockwise")?;
                                Ok(Orientation::Anticlockwise)
                            }])?;
    symbol(i, t, "length")?;
    let length = number(i, t)?;
    symbol(i, t, "path")?;
    let path = list(i, t, identifier)?;

    let mut sections = Vec::new();
    if matches(i, t, Token::Identifier("sections".to_string())) {
        sections = list(i, t, identifier)?;
    }

    let mut points = Vec::new();
    if matches(i, t, Token::Identifier("points".to_string())) {
        points = list(i, t, |i, t| {
            let point = identifier(i, t)?;
            let pos = alt(i,
                          t,
                          &[&|i, t| {
                                symbol(i, t, "normal")?;
                                Ok(PointPosition::Normal)
                            },
                            &|i, t| {
                                symbol(i, t, "reverse")?;
                                Ok(PointPosition::Reverse)
                            }])?;
            Ok((point, pos))
        })?;
    }

    symbol(i, t, "signals")?;
    let signals = list(i, t, identifier)?;

    let mut conflicts = Vec::new();
    if matches(i, t, Token::Identifier("conflicts".to_string())) {
        conflicts = list(i, t, route_id)?;
    }
    must_match(i, t, Token::BraceClose)?;

    Ok(RawRoute { id, source, destination, orientation, length, path,
                  sections, points, signals, conflicts })
}

pub fn alt<T>(i: &mut usize,
              t: &[Token],
              alts: &[&dyn Fn(&mut usize, &[Token]) -> Result<T, ParseError>])
              -> Result<T, ParseError> {
    let start = *i;
    let mut errs = Vec::new();
    for alt in alts {
        *i = start;
        match alt(i, t) {
            Ok(x) => return Ok(x),
            Err(y) => errs.push(y),
        }
    }
    Err(ParseError::Many(errs))
}

pub fn matches(i: &mut usize, t: &[Token], tok: Token) -> bool {
    let r = t[*i] == tok;
    if r {
        *i += 1;
    }
    r
}

pub fn must_match(i: &mut usize, t: &[Token], tok: Token) -> Result<(), ParseError> {
    if matches(i, t, tok) {
        Ok(())
    } else {
        Err(ParseError::UnexpectedToken(*i, format!("{:?}", t[*i])))
    }
}

pub fn list<F, O>(i: &mut usize, t: &[Token], f: F) -> Result<Vec<O>, ParseError>
    where F: Fn(&mut usize, &[Token]) -> Result<O, ParseError>
{
    must_match(i, t, Token::ListOpen)?;
    let mut v = Vec::new();
    if matches(i, t, Token::ListClose) {
        return Ok(v);
    }
    loop {
        v.push(f(i, t)?);
        if !matches(i, t, Token::ListSep) {
            break;
        }
    }
    must_match(i, t, Token::ListClose)?;
    Ok(v)
}

pub fn symbol(i: &mut usize, t: &[Token], s: &str) -> Result<(), ParseError> {
    let start = *i;
    if identifier(i, t)? != s {
        *i = start;
        Err(ParseError::UnexpectedToken(*i, format!("{:?}", s)))
    } else {
        Ok(())
    }
}

pub fn identifier(i: &mut usize, t: &[Token]) -> Result<String, ParseError> {
    let r = match t[*i] {
        Token::Identifier(ref s) => s.clone(),
        ref x => return Err(ParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

/// A name, or a whole number written as a route id such as `route 12`.
pub fn route_id(i: &mut usize, t: &[Token]) -> Result<String, ParseError> {
    let r = match t[*i] {
        Token::Identifier(ref s) => s.clone(),
        Token::Number(x) if x >= 0.0 && x.fract() == 0.0 => format!("{}", x as u64),
        ref x => return Err(ParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

pub fn number(i: &mut usize, t: &[Token]) -> Result<f64, ParseError> {
    let r = match t[*i] {
        Token::Number(x) => x,
        ref x => return Err(ParseError::UnexpectedToken(*i, format!("{:?}", x))),
    };
    *i += 1;
    Ok(r)
}

// LEXER
//
//
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    BraceOpen,
    BraceClose,
    ListOpen,
    ListClose,
    ListSep,
    Number(f64),
    Identifier(String),
    EOF,
}

fn consume_while<I, F>(it: &mut Peekable<I>, x: F) -> String
    where I: Iterator<Item = char>,
          F: Fn(char) -> bool
{
    let mut s = String::new();
    while let Some(&ch) = it.peek() {
        if !x(ch) {
            break;
        }
        s.push(ch);
        it.next();
    }
    s
}

pub fn lexer<I: Iterator<Item = char>>(x: I) -> Result<Vec<Token>, LexerError> {
    let mut tokens = Vec::new();
    let mut input = x.peekable();
    let mut line = 1;
    while let Some(&ch) = input.peek() {
        match ch {
            x if x.is_numeric() => {
                let num = consume_while(&mut input, |a| {
                    a.is_numeric() || a == 'e' || a == 'E' || a == '.'
                });
                match num.parse::<f64>() {
                    Ok(n) => tokens.push(Token::Number(n)),
                    Err(_) => return Err(LexerError::Number { line, num }),
                }
            }
            x if x.is_alphabetic() || x == '_' => {
                let s = consume_while(&mut input, |a| a == '_' || a.is_alphanumeric());
                tokens.push(Token::Identifier(s));
            }
            '#' => {
                consume_while(&mut input, |a| a != '\n');
            }
            '[' => {
                input.next();
                tokens.push(Token::ListOpen);
            }
            ']' => {
                input.next();
                tokens.push(Token::ListClose);
            }
            ',' => {
                input.next();
                tokens.push(Token::ListSep);
            }
            '{' => {
                input.next();
                tokens.push(Token::BraceOpen);
            }
            '}' => {
                input.next();
                tokens.push(Token::BraceClose);
            }
            ' ' | '\r' | '\t' => {
                input.next();
            }
            '\n' => {
                input.next();
                line += 1;
            }
            c => {
                return Err(LexerError::UnexpectedChar { line, c: c.to_string() });
            }
        }
    }
    tokens.push(Token::EOF);
    Ok(tokens)
}
