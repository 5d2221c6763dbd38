//! Canonical text forms for catalog definitions
//!
//! PostgreSQL pretty-prints types and expressions slightly differently across
//! server versions and DDL histories. Everything the extractor reads goes
//! through these functions so that semantically identical definitions compare
//! equal. Every function here is idempotent.
//!
//! Bodies and view queries only get their layout normalized. Implicit text
//! casts are dropped from constraint definitions and column defaults, and
//! never inside quoted spans.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static OPEN_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\(\s*").unwrap());
static CLOSE_PAREN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\)").unwrap());
static COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*,\s*").unwrap());

/// Casts PostgreSQL adds or drops depending on how a definition was written
static TEXT_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^::(?:character varying|text)\b(?:\(\d+\))?(?:\[\])?").unwrap()
});

/// Normalize a type name as produced by `format_type`.
///
/// Case is preserved; only spacing changes (`numeric(10, 2)` becomes `numeric(10,2)`).
pub fn normalize_type_name(name: &str) -> String {
    let collapsed = WHITESPACE.replace_all(name.trim(), " ");
    let collapsed = OPEN_PAREN.replace_all(&collapsed, "(");
    let collapsed = CLOSE_PAREN.replace_all(&collapsed, ")");
    COMMA.replace_all(&collapsed, ",").into_owned()
}

/// Normalize an SQL expression: predicates, index keys, view queries, bodies.
pub fn normalize_expression(expr: &str) -> String {
    strip_outer_parens(&collapse_whitespace(expr, false)).to_string()
}

pub fn normalize_optional(expr: Option<&str>) -> Option<String> {
    expr.map(normalize_expression).filter(|e| !e.is_empty())
}

/// Normalize a column default, dropping implicit text casts
pub fn normalize_default(expr: Option<&str>) -> Option<String> {
    expr.map(|e| strip_outer_parens(&collapse_whitespace(e, true)).to_string())
        .filter(|e| !e.is_empty())
}

/// Normalize a `pg_get_constraintdef` result
pub fn normalize_constraint_definition(definition: &str) -> String {
    let collapsed = collapse_whitespace(definition, true);
    let normalized = strip_outer_parens(&collapsed).to_string();
    match normalized.strip_prefix("CHECK ") {
        Some(rest) if is_wrapped(rest) => format!("CHECK ({})", strip_outer_parens(rest)),
        _ => normalized,
    }
}

/// Collapse whitespace outside string literals, quoted identifiers and
/// dollar-quoted bodies.
///
/// No space is kept after `(` or before `)` and `,`; a comma is always
/// followed by exactly one space. With `strip_casts`, text casts outside
/// quoted spans are dropped as well.
fn collapse_whitespace(input: &str, strip_casts: bool) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;
    let mut rest = input;

    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            pending_space = true;
            rest = &rest[c.len_utf8()..];
            continue;
        }

        if strip_casts && c == ':' {
            if let Some(cast) = TEXT_CAST.find(rest) {
                rest = &rest[cast.end()..];
                continue;
            }
        }

        if c == ')' || c == ',' {
            pending_space = false;
        }
        if pending_space && !out.is_empty() && !out.ends_with('(') {
            out.push(' ');
        }
        pending_space = c == ',';

        let quoted_len = match c {
            '\'' | '"' => quoted_span(rest, c),
            '$' => dollar_quoted_span(rest),
            _ => None,
        };

        match quoted_len {
            Some(len) => {
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    out
}

/// Split a script into its top-level statements.
///
/// Semicolons inside literals, quoted identifiers, dollar-quoted bodies and
/// comments do not end a statement. Comments are dropped, statements are
/// trimmed and empty ones skipped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut rest = script;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("--") {
            let end = rest.find('\n').unwrap_or(rest.len());
            current.push(' ');
            rest = &rest[end..];
            continue;
        }
        if rest.starts_with("/*") {
            current.push(' ');
            rest = &rest[block_comment_span(rest)..];
            continue;
        }
        if c == ';' {
            push_statement(&mut statements, &current);
            current.clear();
            rest = &rest[1..];
            continue;
        }

        let len = match c {
            '\'' | '"' => quoted_span(rest, c),
            '$' => dollar_quoted_span(rest),
            _ => None,
        }
        .unwrap_or(c.len_utf8());
        current.push_str(&rest[..len]);
        rest = &rest[len..];
    }

    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, statement: &str) {
    let statement = statement.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
}

/// Length of a `/* ... */` comment starting at the beginning of `s`; these nest
fn block_comment_span(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"/*" => {
                depth += 1;
                i += 2;
            }
            b"*/" => {
                depth = depth.saturating_sub(1);
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    s.len()
}

/// Length of a `'...'` or `"..."` span starting at the beginning of `s`.
/// Doubled quotes inside the span are treated as two adjacent spans.
fn quoted_span(s: &str, quote: char) -> Option<usize> {
    s[1..].find(quote).map(|end| end + 2).or(Some(s.len()))
}

/// Length of a `$tag$ ... $tag$` span starting at the beginning of `s`
fn dollar_quoted_span(s: &str) -> Option<usize> {
    let after = &s[1..];
    let tag_len = after.find('$')?;
    let tag = &after[..tag_len];
    let valid_tag = tag
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !tag.starts_with(|c: char| c.is_ascii_digit());
    if !valid_tag {
        return None;
    }

    let delimiter = &s[..tag_len + 2];
    let body_start = delimiter.len();
    match s[body_start..].find(delimiter) {
        Some(end) => Some(body_start + end + delimiter.len()),
        None => Some(s.len()),
    }
}

/// True when the first `(` closes at the very last character
fn is_wrapped(s: &str) -> bool {
    if !s.starts_with('(') || !s.ends_with(')') {
        return false;
    }

    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return i == s.len() - 1;
                    }
                }
                _ => {}
            },
        }
    }
    false
}

fn strip_outer_parens(s: &str) -> &str {
    let mut current = s.trim();
    while is_wrapped(current) {
        current = current[1..current.len() - 1].trim();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("numeric(10, 2)", "numeric(10,2)")]
    #[case("character varying (255)", "character varying(255)")]
    #[case("  timestamp(3)   with time zone ", "timestamp(3) with time zone")]
    #[case("integer[]", "integer[]")]
    #[case("\"MyType\"", "\"MyType\"")]
    fn type_names(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_type_name(input), expected);
    }

    #[rstest]
    #[case("nextval('users_id_seq'::regclass)", "nextval('users_id_seq'::regclass)")]
    #[case("((price > 0))", "price > 0")]
    #[case("(a > 0) AND (b > 0)", "(a > 0) AND (b > 0)")]
    #[case("lower( email )", "lower(email)")]
    #[case("coalesce(a ,b)", "coalesce(a, b)")]
    #[case("SELECT id,\n    name\n   FROM users", "SELECT id, name FROM users")]
    fn expressions(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_expression(input), expected);
    }

    #[rstest]
    #[case("nextval('users_id_seq'::regclass)", "nextval('users_id_seq'::regclass)")]
    #[case("'active'::character varying", "'active'")]
    #[case("'active'::character varying(20)", "'active'")]
    #[case("ARRAY['a'::text, 'b'::text]", "ARRAY['a', 'b']")]
    #[case("'{}'::text[]", "'{}'")]
    #[case("'x::text'", "'x::text'")]
    #[case("x::text_search", "x::text_search")]
    fn column_defaults(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_default(Some(input)).as_deref(), Some(expected));
    }

    #[test]
    fn casts_inside_literals_are_significant() {
        assert_ne!(normalize_default(Some("'x::text'")), normalize_default(Some("'x'")));
        assert_ne!(
            normalize_constraint_definition("CHECK (code <> 'a::text'::text)"),
            normalize_constraint_definition("CHECK (code <> 'a'::text)")
        );
    }

    #[rstest]
    #[case("SELECT $1::text", "SELECT $1")]
    #[case("BEGIN RETURN x::text || 'a'; END", "BEGIN RETURN x || 'a'; END")]
    #[case("SELECT 'a'::character varying AS c", "SELECT 'a'::text AS c")]
    fn expression_casts_are_significant(#[case] left: &str, #[case] right: &str) {
        assert_ne!(normalize_expression(left), normalize_expression(right));
    }

    #[test]
    fn literals_keep_their_whitespace() {
        assert_eq!(
            normalize_expression("'a   b'  ||   \"Odd  Name\""),
            "'a   b' || \"Odd  Name\""
        );
    }

    #[test]
    fn dollar_quoted_bodies_are_left_alone() {
        let body = "PERFORM  f($x$  keep   this $x$ ,  1)";
        assert_eq!(normalize_expression(body), "PERFORM f($x$  keep   this $x$, 1)");
    }

    #[test]
    fn positional_parameters_are_not_dollar_quotes() {
        assert_eq!(normalize_expression("$1  +  $2"), "$1 + $2");
    }

    #[rstest]
    #[case("CHECK ((price > (0)::numeric))", "CHECK (price > (0)::numeric)")]
    #[case("CHECK (price > 0)", "CHECK (price > 0)")]
    #[case("CHECK ((a > 0)) NOT VALID", "CHECK ((a > 0)) NOT VALID")]
    #[case("FOREIGN KEY (user_id) REFERENCES users(id)", "FOREIGN KEY (user_id) REFERENCES users(id)")]
    #[case("CHECK ((status)::text = ANY (ARRAY['a'::character varying, 'b'::character varying]::text[]))",
           "CHECK ((status) = ANY (ARRAY['a', 'b']))")]
    fn constraint_definitions(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_constraint_definition(input), expected);
    }

    #[rstest]
    #[case("numeric( 10 , 2 )")]
    #[case("CHECK ((((a)::text <> ''::text)))")]
    #[case("  SELECT  ( ( x ) ) , 'y  z'  FROM t ")]
    #[case("f($q$ a  b $q$)   ")]
    fn normalization_is_idempotent(#[case] input: &str) {
        let once = normalize_type_name(input);
        assert_eq!(normalize_type_name(&once), once);

        let once = normalize_expression(input);
        assert_eq!(normalize_expression(&once), once);

        let once = normalize_constraint_definition(input);
        assert_eq!(normalize_constraint_definition(&once), once);
    }

    #[test]
    fn scripts_split_on_top_level_semicolons() {
        let script = "-- header; not a statement\n\
            INSERT INTO t VALUES ('a;b', \"c;d\");\n\
            CREATE FUNCTION f() RETURNS int AS $body$ BEGIN RETURN 1; END $body$ LANGUAGE plpgsql;\n\
            /* outer /* nested; */ still; */ COMMIT ;;";
        assert_eq!(
            split_statements(script),
            vec![
                "INSERT INTO t VALUES ('a;b', \"c;d\")",
                "CREATE FUNCTION f() RETURNS int AS $body$ BEGIN RETURN 1; END $body$ LANGUAGE plpgsql",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn empty_scripts_have_no_statements() {
        assert!(split_statements("  ;\n-- nothing\n").is_empty());
    }

    #[test]
    fn empty_optional_expressions_become_none() {
        assert_eq!(normalize_optional(Some("   ")), None);
        assert_eq!(normalize_optional(None), None);
        assert_eq!(normalize_optional(Some(" 0 ")), Some("0".to_string()));
        assert_eq!(normalize_default(Some("  ")), None);
    }
}
