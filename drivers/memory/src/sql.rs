//! Statement grammar.
//!
//! ```text
//! SELECT item [, item]* [FROM table]
//! CREATE TABLE table (column type [, column type]*)
//! INSERT INTO table VALUES (expr [, expr]*)
//! DELETE FROM table
//! ```
//!
//! Keywords are case-insensitive, identifiers are folded to lower case.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while};
use nom::character::complete::{char, digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::IResult;

use dbi_core::error::{Error, Result, Status};
use dbi_core::value::Value;
use dbi_core::Parameter;

use crate::catalog::ColumnType;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// `index` points into the statement parameters once numbered.
    Param {
        name: Option<String>,
        index: usize,
    },
    Column(String),
    Wildcard,
    /// Integer literal that does not fit in 64 bits; fails when evaluated.
    OutOfRange(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectItem {
    pub(crate) expr: Expr,
    pub(crate) alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Select {
        items: Vec<SelectItem>,
        from: Option<String>,
    },
    CreateTable {
        name: String,
        columns: Vec<(String, ColumnType)>,
    },
    Insert {
        table: String,
        values: Vec<Expr>,
    },
    Delete {
        table: String,
    },
}

#[derive(Debug)]
pub(crate) struct Parsed {
    pub(crate) command: Command,
    pub(crate) parameters: Vec<Parameter>,
}

const RESERVED: [&str; 12] = [
    "SELECT", "FROM", "AS", "INSERT", "INTO", "VALUES", "CREATE", "TABLE", "DELETE", "NULL",
    "TRUE", "FALSE",
];

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(terminated(tag_no_case(word), not(satisfy(is_ident_char))))
}

fn name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, String> {
    map(
        verify(ws(name), |word: &str| {
            !RESERVED.iter().any(|reserved| reserved.eq_ignore_ascii_case(word))
        }),
        |word: &str| word.to_ascii_lowercase(),
    )(input)
}

fn number(input: &str) -> IResult<&str, Expr> {
    map_res(
        ws(recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        )))),
        |text: &str| {
            if text.contains('.') {
                return text
                    .parse()
                    .map(|value| Expr::Literal(Value::Double(value)));
            }
            Ok(match text.parse() {
                Ok(value) => Expr::Literal(Value::Int(value)),
                Err(_) => Expr::OutOfRange(text.into()),
            })
        },
    )(input)
}

fn string(input: &str) -> IResult<&str, Value> {
    map(
        ws(delimited(
            char('\''),
            many0(alt((is_not("'"), value("'", tag("''"))))),
            char('\''),
        )),
        |parts: Vec<&str>| Value::Text(parts.concat()),
    )(input)
}

fn constant(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Null, keyword("null")),
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
    ))(input)
}

fn placeholder(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        value(
            Expr::Param {
                name: None,
                index: 0,
            },
            char('?'),
        ),
        map(preceded(char(':'), name), |name: &str| Expr::Param {
            name: Some(name.into()),
            index: 0,
        }),
    )))(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    alt((
        number,
        map(alt((string, constant)), Expr::Literal),
        placeholder,
        value(Expr::Wildcard, ws(char('*'))),
        map(identifier, Expr::Column),
    ))(input)
}

fn select_item(input: &str) -> IResult<&str, SelectItem> {
    map(
        pair(expr, opt(preceded(keyword("as"), identifier))),
        |(expr, alias)| SelectItem { expr, alias },
    )(input)
}

fn list<'a, O, F>(item: F) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<O>>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    separated_list1(ws(char(',')), item)
}

fn select(input: &str) -> IResult<&str, Command> {
    map(
        preceded(
            keyword("select"),
            pair(list(select_item), opt(preceded(keyword("from"), identifier))),
        ),
        |(items, from)| Command::Select { items, from },
    )(input)
}

fn column_type(input: &str) -> IResult<&str, ColumnType> {
    alt((
        value(ColumnType::Integer, alt((keyword("integer"), keyword("int")))),
        value(ColumnType::Real, alt((keyword("real"), keyword("double")))),
        value(ColumnType::Text, alt((keyword("text"), keyword("varchar")))),
        value(ColumnType::Blob, keyword("blob")),
        value(ColumnType::Boolean, alt((keyword("boolean"), keyword("bool")))),
    ))(input)
}

fn create_table(input: &str) -> IResult<&str, Command> {
    map(
        preceded(
            pair(keyword("create"), keyword("table")),
            pair(
                identifier,
                delimited(
                    ws(char('(')),
                    list(pair(identifier, column_type)),
                    ws(char(')')),
                ),
            ),
        ),
        |(name, columns)| Command::CreateTable { name, columns },
    )(input)
}

fn insert(input: &str) -> IResult<&str, Command> {
    map(
        preceded(
            pair(keyword("insert"), keyword("into")),
            pair(
                identifier,
                preceded(
                    keyword("values"),
                    delimited(ws(char('(')), list(expr), ws(char(')'))),
                ),
            ),
        ),
        |(table, values)| Command::Insert { table, values },
    )(input)
}

fn delete(input: &str) -> IResult<&str, Command> {
    map(
        preceded(pair(keyword("delete"), keyword("from")), identifier),
        |table| Command::Delete { table },
    )(input)
}

fn statement(input: &str) -> IResult<&str, Command> {
    all_consuming(terminated(
        alt((select, create_table, insert, delete)),
        opt(ws(char(';'))),
    ))(input)
}

/// Assigns every placeholder its parameter index. Repeated names share one
/// parameter.
fn number_parameters(command: &mut Command) -> Vec<Parameter> {
    let exprs: Vec<&mut Expr> = match command {
        Command::Select { items, .. } => items.iter_mut().map(|item| &mut item.expr).collect(),
        Command::Insert { values, .. } => values.iter_mut().collect(),
        _ => Vec::new(),
    };
    let mut parameters: Vec<Parameter> = Vec::new();
    for expr in exprs {
        if let Expr::Param { name, index } = expr {
            let existing = name.as_deref().and_then(|name| {
                parameters
                    .iter()
                    .position(|parameter| parameter.name.as_deref() == Some(name))
            });
            *index = match existing {
                Some(position) => position,
                None => {
                    parameters.push(Parameter { name: name.clone() });
                    parameters.len() - 1
                }
            };
        }
    }
    parameters
}

pub(crate) fn parse(text: &str) -> Result<Parsed> {
    let (_, mut command) = statement(text).map_err(|error| {
        let rest = match &error {
            nom::Err::Error(error) | nom::Err::Failure(error) => error.input.trim(),
            nom::Err::Incomplete(_) => "",
        };
        let message = if rest.is_empty() {
            "Syntax error at end of statement".to_string()
        } else {
            let near: String = rest.chars().take(24).collect();
            format!("Syntax error near {:?}", near)
        };
        Error::with_message_and_status(&message, Status::Syntax).with_sqlstate("42000")
    })?;
    let parameters = number_parameters(&mut command);
    Ok(Parsed {
        command,
        parameters,
    })
}
