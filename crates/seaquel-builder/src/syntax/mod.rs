//! SQL text front end.
//!
//! The grammar itself is delegated to `sqlparser`; this module masks template
//! placeholders and narrows the result to a single query.

mod placeholder;

pub use placeholder::{is_placeholder, mask, placeholder_names, unmask};

use crate::config::SqlDialect;
use crate::error::{ParseError, ParseResult};
use sqlparser::ast::{Query, Statement};
use sqlparser::parser::Parser;
use tracing::trace;

/// Parse text holding exactly one query statement.
pub fn parse_query(sql: &str, dialect: SqlDialect) -> ParseResult<Query> {
    let masked = mask(sql);
    let grammar = dialect.parser_dialect();
    let mut statements = Parser::parse_sql(grammar.as_ref(), &masked)?;
    trace!(dialect = dialect.name(), statements = statements.len(), "parsed SQL text");

    match statements.len() {
        0 => Err(ParseError::Syntax("no statement found".to_string())),
        1 => match statements.pop() {
            Some(Statement::Query(query)) => Ok(*query),
            _ => Err(ParseError::NotAQuery),
        },
        count => Err(ParseError::MultipleStatements { count }),
    }
}
