//! Syntactic whitelist for model-authored SQL.
//!
//! This is not a parser. It accepts one read-only `SELECT` statement and
//! over-rejects anything ambiguous. Comments are removed while respecting
//! quoted literals, and the comment-free text is what callers execute, so
//! the checked statement and the executed statement are always the same.

use std::fmt;

use thiserror::Error;

pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "TRUNCATE", "ATTACH", "PRAGMA",
    "REPLACE", "RENAME", "DETACH", "VACUUM",
];

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SqlRejection {
    #[error("query is empty")]
    Empty,
    #[error("only SELECT statements are allowed")]
    NotSelect,
    #[error("forbidden keyword `{0}` is not allowed")]
    ForbiddenKeyword(String),
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("unterminated quoted literal")]
    UnterminatedLiteral,
}

/// A statement that passed [`validate`]. Only this module can construct one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate(sql: &str) -> Result<ValidatedSql, SqlRejection> {
    let cleaned = strip_comments_and_terminator(sql)?;
    let statement = cleaned.trim();
    if statement.is_empty() {
        return Err(SqlRejection::Empty);
    }

    let mut words = words(statement);
    match words.next() {
        Some(first) if first.eq_ignore_ascii_case("SELECT") => {}
        _ => return Err(SqlRejection::NotSelect),
    }

    for word in words {
        if let Some(keyword) =
            FORBIDDEN_KEYWORDS.iter().find(|keyword| word.eq_ignore_ascii_case(keyword))
        {
            return Err(SqlRejection::ForbiddenKeyword((*keyword).to_string()));
        }
    }

    Ok(ValidatedSql(statement.to_string()))
}

/// Drops `--` and `/* */` comments and one trailing `;`. Any content after a
/// `;` outside of a quoted literal is a second statement.
fn strip_comments_and_terminator(sql: &str) -> Result<String, SqlRejection> {
    let mut output = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut terminated = false;

    while let Some(ch) = chars.next() {
        match ch {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        output.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut closed = false;
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        closed = true;
                        break;
                    }
                    previous = next;
                }
                if !closed {
                    return Err(SqlRejection::UnterminatedComment);
                }
                output.push(' ');
            }
            _ if terminated => {
                if !ch.is_whitespace() {
                    return Err(SqlRejection::MultipleStatements);
                }
            }
            ';' => terminated = true,
            '\'' | '"' | '`' => {
                output.push(ch);
                copy_literal(ch, &mut chars, &mut output)?;
            }
            '[' => {
                output.push(ch);
                copy_literal(']', &mut chars, &mut output)?;
            }
            _ => output.push(ch),
        }
    }

    Ok(output)
}

fn copy_literal(
    close: char,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    output: &mut String,
) -> Result<(), SqlRejection> {
    while let Some(next) = chars.next() {
        output.push(next);
        if next == close {
            // doubled quote is an escaped quote
            if close != ']' && chars.peek() == Some(&close) {
                if let Some(escaped) = chars.next() {
                    output.push(escaped);
                }
                continue;
            }
            return Ok(());
        }
    }
    Err(SqlRejection::UnterminatedLiteral)
}

fn words(statement: &str) -> impl Iterator<Item = &str> {
    statement
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{validate, SqlRejection, FORBIDDEN_KEYWORDS};

    #[test]
    fn accepts_plain_select() {
        let validated = validate("SELECT SUM(total) AS total_sales FROM sales;")
            .expect("select should pass");
        assert_eq!(validated.as_str(), "SELECT SUM(total) AS total_sales FROM sales");
    }

    #[test]
    fn accepts_select_with_leading_comments_and_whitespace() {
        let sql = "  -- revenue by region\n  /* grouped */ select region, SUM(total)\nFROM sales GROUP BY region  ;  ";
        assert!(validate(sql).is_ok());
    }

    #[test]
    fn rejects_every_forbidden_keyword_in_any_case() {
        for keyword in FORBIDDEN_KEYWORDS {
            let upper = format!("SELECT * FROM sales WHERE 1 = 1 {keyword} x");
            let lower = format!("select * from sales where 1 = 1 {} x", keyword.to_lowercase());
            assert_eq!(
                validate(&upper),
                Err(SqlRejection::ForbiddenKeyword((*keyword).to_string())),
                "{upper}"
            );
            assert!(validate(&lower).is_err(), "{lower}");
        }
    }

    #[test]
    fn keyword_match_is_whole_word() {
        assert!(validate("SELECT updated_at, created_by FROM audit_log").is_ok());
        assert!(validate("SELECT dropped FROM sales").is_ok());
    }

    #[test]
    fn rejects_statement_chaining() {
        assert_eq!(
            validate("SELECT 1; SELECT 2"),
            Err(SqlRejection::MultipleStatements)
        );
        assert!(validate("SELECT * FROM sales;\n DROP TABLE sales").is_err());
        assert!(validate("SELECT 1;;").is_err());
    }

    #[test]
    fn comment_markers_inside_literals_do_not_hide_a_second_statement() {
        assert_eq!(
            validate("SELECT '--'; DELETE FROM sales"),
            Err(SqlRejection::MultipleStatements)
        );
        assert!(validate("SELECT * FROM products WHERE name = 'a;b'").is_ok());
    }

    #[test]
    fn rejects_non_select_statements() {
        assert_eq!(validate("WITH x AS (SELECT 1) SELECT * FROM x"), Err(SqlRejection::NotSelect));
        assert_eq!(validate("EXPLAIN SELECT 1"), Err(SqlRejection::NotSelect));
        assert!(validate("/* SELECT */ DROP TABLE sales").is_err());
    }

    #[test]
    fn rejects_empty_and_comment_only_input() {
        assert_eq!(validate("   "), Err(SqlRejection::Empty));
        assert_eq!(validate("-- nothing here"), Err(SqlRejection::Empty));
        assert_eq!(validate(";"), Err(SqlRejection::Empty));
    }

    #[test]
    fn rejects_unterminated_constructs() {
        assert_eq!(validate("SELECT 1 /* open"), Err(SqlRejection::UnterminatedComment));
        assert_eq!(validate("SELECT 'open"), Err(SqlRejection::UnterminatedLiteral));
    }

    #[test]
    fn escaped_quotes_stay_inside_literal() {
        let validated = validate("SELECT * FROM products WHERE name = 'O''Brien'")
            .expect("escaped quote should pass");
        assert!(validated.as_str().ends_with("'O''Brien'"));
    }
}
