//! SQL generation from the query model.
//!
//! Generation is a pure, infallible function of the model and the layout
//! options. References that no longer resolve degrade to empty text instead
//! of failing, since the canvas can hold half-built queries.

mod sql;

pub use sql::SqlGenerator;
pub(crate) use sql::joins_with_overridden_kind;

use crate::model::QueryModel;
use crate::syntax::is_placeholder;
use once_cell::sync::Lazy;
use regex::Regex;

static PLAIN_IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Output from rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    /// The generated SQL text
    pub sql: String,
    /// Distinct `{{name}}` placeholder names, in order of first appearance
    pub placeholders: Vec<String>,
}

/// Render with the default (pretty) layout.
pub fn generate(model: &QueryModel) -> String {
    SqlGenerator::default().generate(model)
}

/// Double-quote an identifier unless it is a plain `[A-Za-z_][A-Za-z0-9_]*` word.
pub fn quote_ident(ident: &str) -> String {
    if PLAIN_IDENT_RE.is_match(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Quote each dot-separated part of a possibly schema-qualified table name.
pub fn quote_path(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Canonical `table.column` reference text used throughout the model.
pub fn column_ref(table: &str, column: &str) -> String {
    format!("{}.{}", quote_path(table), quote_ident(column))
}

/// A finite numeric literal: signs, leading or trailing dots and exponents
/// included. `inf` and `NaN` are text.
pub fn is_number(value: &str) -> bool {
    value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Literal filter value as SQL: numbers and placeholders verbatim, anything
/// else single-quoted with embedded quotes doubled.
pub fn format_value(value: &str) -> String {
    if is_placeholder(value) || is_number(value) {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("orders", "orders" ; "plain")]
    #[test_case("order items", "\"order items\"" ; "space")]
    #[test_case("1st", "\"1st\"" ; "leading digit")]
    #[test_case("say\"hi", "\"say\"\"hi\"" ; "embedded quote")]
    fn test_quote_ident(ident: &str, expected: &str) {
        assert_eq!(quote_ident(ident), expected);
    }

    #[test]
    fn test_column_ref_quotes_parts() {
        assert_eq!(column_ref("public.orders", "id"), "public.orders.id");
        assert_eq!(column_ref("Order Lines", "unit price"), "\"Order Lines\".\"unit price\"");
    }

    #[test_case("50", "50" ; "integer")]
    #[test_case("-3.25", "-3.25" ; "negative decimal")]
    #[test_case("{{country}}", "{{country}}" ; "placeholder")]
    #[test_case("Berlin", "'Berlin'" ; "text")]
    #[test_case("O'Brien", "'O''Brien'" ; "embedded quote")]
    #[test_case("1e5", "1e5" ; "exponent")]
    #[test_case(".5", ".5" ; "leading dot")]
    #[test_case("+5", "+5" ; "explicit plus")]
    #[test_case("1e999", "'1e999'" ; "overflow is text")]
    #[test_case("inf", "'inf'" ; "infinity is text")]
    #[test_case("NaN", "'NaN'" ; "nan is text")]
    #[test_case(" 5", "' 5'" ; "padded is text")]
    #[test_case("", "''" ; "empty")]
    fn test_format_value(value: &str, expected: &str) {
        assert_eq!(format_value(value), expected);
    }
}
