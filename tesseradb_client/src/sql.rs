//! Lightweight extraction of the table names a SQL statement references.
//!
//! Not a SQL parser: a tokenizer plus a scan for the clauses that name
//! tables (`FROM`, `JOIN`, `INSERT INTO`, `CREATE/ALTER/DROP/SHOW CREATE
//! TABLE`, ...). Sufficient for routing; the server remains the authority
//! on SQL validity. An explicit table list on the request bypasses this
//! entirely.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, multispace1},
    combinator::map,
    sequence::{delimited, terminated},
    IResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Comma,
    Dot,
    LParen,
    RParen,
    Other,
}

fn quoted(open: char, close: char) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input| {
        delimited(
            char(open),
            take_while1(move |c| c != close),
            char(close),
        )(input)
    }
}

fn word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn token(input: &str) -> IResult<&str, Option<Token>> {
    alt((
        map(multispace1, |_| None),
        // Line comments.
        map(terminated(tag("--"), take_while1(|c| c != '\n')), |_| None),
        // String literals are opaque.
        map(quoted('\'', '\''), |_| Some(Token::Other)),
        // Quoted identifiers.
        map(quoted('`', '`'), |s: &str| Some(Token::Word(s.to_string()))),
        map(quoted('"', '"'), |s: &str| Some(Token::Word(s.to_string()))),
        map(word, |s: &str| Some(Token::Word(s.to_string()))),
        map(char(','), |_| Some(Token::Comma)),
        map(char('.'), |_| Some(Token::Dot)),
        map(char('('), |_| Some(Token::LParen)),
        map(char(')'), |_| Some(Token::RParen)),
        map(anychar, |_| Some(Token::Other)),
    ))(input)
}

fn tokenize(sql: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = sql;
    while !rest.is_empty() {
        match token(rest) {
            Ok((remaining, t)) => {
                if let Some(t) = t {
                    tokens.push(t);
                }
                rest = remaining;
            }
            // `anychar` consumes anything, so only an empty tail errors.
            Err(_) => break,
        }
    }
    tokens
}

/// Words that introduce a table reference.
fn is_trigger(word: &str) -> bool {
    ["from", "join", "into", "table", "update", "describe"]
        .iter()
        .any(|k| word.eq_ignore_ascii_case(k))
}

/// Words that terminate a table-reference list.
fn is_reserved(word: &str) -> bool {
    [
        "from", "join", "into", "table", "update", "describe", "where", "on", "group", "order",
        "having", "limit", "union", "select", "set", "values", "inner", "left", "right", "full",
        "cross", "outer", "using",
    ]
    .iter()
    .any(|k| word.eq_ignore_ascii_case(k))
}

/// The distinct table names referenced by `sql`, in first-appearance order.
pub(crate) fn extract_table_names(sql: &str) -> Vec<String> {
    let tokens = tokenize(sql);
    let mut out: Vec<String> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let trigger = matches!(&tokens[i], Token::Word(w) if is_trigger(w));
        if !trigger {
            i += 1;
            continue;
        }
        i += 1;

        // A comma-separated list of table references follows the trigger.
        loop {
            let Some(Token::Word(first)) = tokens.get(i) else {
                // E.g. a parenthesized subquery; its own FROM appears later
                // in the token stream and is scanned in due course.
                break;
            };
            if is_reserved(first) {
                break;
            }
            let mut name = first.clone();
            i += 1;

            // Qualified names route by their final segment.
            while matches!(tokens.get(i), Some(Token::Dot)) {
                match tokens.get(i + 1) {
                    Some(Token::Word(segment)) => {
                        name = segment.clone();
                        i += 2;
                    }
                    _ => break,
                }
            }

            if !out.contains(&name) {
                out.push(name);
            }

            // Skip alias tokens up to the comma continuing the list.
            let mut more = false;
            while let Some(t) = tokens.get(i) {
                match t {
                    Token::Comma => {
                        i += 1;
                        more = true;
                        break;
                    }
                    Token::Word(w) if is_reserved(w) => break,
                    Token::LParen | Token::RParen => break,
                    _ => i += 1,
                }
            }
            if !more {
                break;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(sql: &str) -> Vec<String> {
        extract_table_names(sql)
    }

    #[test]
    fn simple_select() {
        assert_eq!(
            extract("SELECT * FROM machine_table WHERE city = 'Beijing'"),
            ["machine_table"]
        );
    }

    #[test]
    fn comma_list_and_aliases() {
        assert_eq!(extract("select a.x, b.y from t1 a, t2 as b"), ["t1", "t2"]);
    }

    #[test]
    fn joins() {
        assert_eq!(
            extract("select * from t1 join t2 on t1.id = t2.id left join t3 using (id)"),
            ["t1", "t2", "t3"]
        );
    }

    #[test]
    fn qualified_names_route_by_last_segment() {
        assert_eq!(extract("select * from public.metrics"), ["metrics"]);
    }

    #[test]
    fn quoted_identifiers() {
        assert_eq!(extract("select * from `weird table`"), ["weird table"]);
        assert_eq!(extract("select * from \"CaseSensitive\""), ["CaseSensitive"]);
    }

    #[test]
    fn subquery_tables_are_found() {
        assert_eq!(
            extract("select * from (select * from inner_t) sub"),
            ["inner_t"]
        );
    }

    #[test]
    fn string_literals_are_opaque() {
        assert_eq!(
            extract("select * from t where note = 'from phantom'"),
            ["t"]
        );
    }

    #[test]
    fn ddl_and_dml_statements() {
        assert_eq!(extract("CREATE TABLE metrics (ts TIMESTAMP)"), ["metrics"]);
        assert_eq!(extract("INSERT INTO metrics VALUES (1)"), ["metrics"]);
        assert_eq!(extract("DROP TABLE old_metrics"), ["old_metrics"]);
        assert_eq!(extract("SHOW CREATE TABLE metrics"), ["metrics"]);
    }

    #[test]
    fn duplicates_collapse_in_order() {
        assert_eq!(
            extract("select * from t1 join t2 on 1=1 join t1 on 1=1"),
            ["t1", "t2"]
        );
    }

    #[test]
    fn no_tables() {
        assert!(extract("select 1").is_empty());
        assert!(extract("").is_empty());
    }
}
