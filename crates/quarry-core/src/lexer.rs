//! Minimal SQL tokenizer.
//!
//! This is not a parser. It only knows enough SQL syntax to tell keywords
//! apart from string literals, quoted identifiers and comments, and to track
//! which clause a token sits in. The template engine and the validator both
//! read queries through it, so a keyword hidden in a comment or a literal never
//! counts, and `updated_at` is never mistaken for `UPDATE`.

/// Partition column every data query must filter on.
pub const PARTITION_COLUMN: &str = "dt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Bare identifier or keyword, original case preserved.
    Word(String),
    /// `"name"` or `` `name` ``, unquoted.
    QuotedIdent(String),
    /// `'text'`, unescaped.
    StringLit(String),
    Number(String),
    Operator(String),
    LParen,
    RParen,
    Comma,
    Semicolon,
    Dot,
}

impl Token {
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Word(word) if word.eq_ignore_ascii_case(keyword))
    }

    fn is_operator(&self, candidates: &[&str]) -> bool {
        matches!(self, Self::Operator(op) if candidates.contains(&op.as_str()))
    }

    fn names_column(&self, column: &str) -> bool {
        match self {
            Self::Word(word) | Self::QuotedIdent(word) => word.eq_ignore_ascii_case(column),
            _ => false,
        }
    }
}

const TWO_CHAR_OPERATORS: &[&str] = &["<=", ">=", "<>", "!=", "||", "=>", "->", "::"];
const COMPARISONS: &[&str] = &["=", "<", "<=", ">", ">="];

/// Tokenize SQL text. Never fails: unterminated literals and comments run to
/// the end of the input.
pub fn tokenize(sql: &str) -> Vec<Token> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        let next = chars.get(index + 1).copied();

        if ch.is_whitespace() {
            index += 1;
        } else if ch == '-' && next == Some('-') {
            while index < chars.len() && chars[index] != '\n' {
                index += 1;
            }
        } else if ch == '/' && next == Some('*') {
            index += 2;
            while index < chars.len() && !(chars[index] == '*' && chars.get(index + 1) == Some(&'/')) {
                index += 1;
            }
            index = (index + 2).min(chars.len());
        } else if ch == '\'' {
            let (text, end) = read_quoted(&chars, index, '\'');
            tokens.push(Token::StringLit(text));
            index = end;
        } else if ch == '"' || ch == '`' {
            let (text, end) = read_quoted(&chars, index, ch);
            tokens.push(Token::QuotedIdent(text));
            index = end;
        } else if ch.is_alphabetic() || ch == '_' {
            let start = index;
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_') {
                index += 1;
            }
            tokens.push(Token::Word(chars[start..index].iter().collect()));
        } else if ch.is_ascii_digit() {
            let start = index;
            while index < chars.len() && (chars[index].is_ascii_alphanumeric() || chars[index] == '.') {
                index += 1;
            }
            tokens.push(Token::Number(chars[start..index].iter().collect()));
        } else {
            let token = match ch {
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                ';' => Token::Semicolon,
                '.' => Token::Dot,
                _ => {
                    let pair: String = [ch, next.unwrap_or(' ')].iter().collect();
                    if TWO_CHAR_OPERATORS.contains(&pair.as_str()) {
                        index += 1;
                        Token::Operator(pair)
                    } else {
                        Token::Operator(ch.to_string())
                    }
                }
            };
            tokens.push(token);
            index += 1;
        }
    }

    tokens
}

/// Read a quoted run starting at `start`; a doubled quote is an escaped quote.
fn read_quoted(chars: &[char], start: usize, quote: char) -> (String, usize) {
    let mut text = String::new();
    let mut index = start + 1;
    while index < chars.len() {
        if chars[index] == quote {
            if chars.get(index + 1) == Some(&quote) {
                text.push(quote);
                index += 2;
                continue;
            }
            return (text, index + 1);
        }
        text.push(chars[index]);
        index += 1;
    }
    (text, index)
}

/// Split a token stream into statements at `;`, dropping empty statements.
pub fn statements(tokens: &[Token]) -> Vec<&[Token]> {
    tokens
        .split(|token| *token == Token::Semicolon)
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// What the engine needs to know about a query's shape.
///
/// Each `;`-separated statement is classified on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlShape {
    /// At least one statement reads data, and every one that does filters
    /// on the partition column.
    pub has_partition_filter: bool,
    /// Every statement is `DESCRIBE` or `SHOW`.
    pub is_introspection: bool,
    /// Set only for a query that is a single `DESCRIBE`.
    pub describe_target: Option<String>,
}

pub fn analyze(sql: &str) -> SqlShape {
    let tokens = tokenize(sql);
    let statements = statements(&tokens);

    let mut data_statements = 0;
    let mut unscoped_statements = 0;
    for statement in &statements {
        if is_introspection(statement) {
            continue;
        }
        data_statements += 1;
        if !has_partition_predicate(statement, PARTITION_COLUMN) {
            unscoped_statements += 1;
        }
    }

    let describe_target = match statements.as_slice() {
        [only] if is_describe(only) => describe_target(only),
        _ => None,
    };

    SqlShape {
        has_partition_filter: data_statements > 0 && unscoped_statements == 0,
        is_introspection: !statements.is_empty() && data_statements == 0,
        describe_target,
    }
}

fn is_describe(statement: &[Token]) -> bool {
    statement
        .first()
        .is_some_and(|t| t.is_keyword("DESCRIBE") || t.is_keyword("DESC"))
}

fn is_introspection(statement: &[Token]) -> bool {
    is_describe(statement) || statement.first().is_some_and(|t| t.is_keyword("SHOW"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Filter,
    Other,
}

fn clause_for(token: &Token) -> Option<Clause> {
    let Token::Word(word) = token else {
        return None;
    };
    match word.to_ascii_uppercase().as_str() {
        "WHERE" | "ON" => Some(Clause::Filter),
        "SELECT" | "FROM" | "JOIN" | "GROUP" | "HAVING" | "ORDER" | "LIMIT" | "UNION"
        | "INTERSECT" | "EXCEPT" | "WITH" | "WINDOW" | "OFFSET" | "USING" => Some(Clause::Other),
        _ => None,
    }
}

/// True when `column` is compared (`=`, range, `BETWEEN`, `IN`) with
/// something other than itself inside a `WHERE` or `ON` clause of a single
/// statement, at any nesting depth.
fn has_partition_predicate(tokens: &[Token], column: &str) -> bool {
    let mut clauses = vec![Clause::Other];

    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => {
                let current = clauses.last().copied().unwrap_or(Clause::Other);
                clauses.push(current);
                continue;
            }
            Token::RParen => {
                if clauses.len() > 1 {
                    clauses.pop();
                }
                continue;
            }
            _ => {}
        }

        if let Some(clause) = clause_for(token) {
            if let Some(current) = clauses.last_mut() {
                *current = clause;
            }
            continue;
        }

        if clauses.last() != Some(&Clause::Filter) || !token.names_column(column) {
            continue;
        }

        let next = tokens.get(index + 1);
        // `dt.x` is a table alias and `dt(...)` a function call, not the column.
        if matches!(next, Some(Token::Dot) | Some(Token::LParen)) {
            continue;
        }
        let compared_after = next.is_some_and(|t| {
            t.is_operator(COMPARISONS) || t.is_keyword("BETWEEN") || t.is_keyword("IN")
        }) && !names_column_at(tokens, operand_after(tokens, index + 1), column);

        let start = index_before_qualifier(tokens, index);
        let compared_before = start
            .checked_sub(1)
            .filter(|&operator| tokens[operator].is_operator(COMPARISONS))
            .is_some_and(|operator| {
                !operator
                    .checked_sub(1)
                    .is_some_and(|end| tokens[end].names_column(column))
            });
        if compared_after || compared_before {
            return true;
        }
    }

    false
}

/// Index of the operand following the comparison at `operator`, skipping
/// the `(` that opens an `IN` list.
fn operand_after(tokens: &[Token], operator: usize) -> usize {
    let operand = operator + 1;
    if tokens[operator].is_keyword("IN") && tokens.get(operand) == Some(&Token::LParen) {
        operand + 1
    } else {
        operand
    }
}

/// True when the (possibly qualified) name starting at `index` is `column`.
fn names_column_at(tokens: &[Token], mut index: usize, column: &str) -> bool {
    while matches!(tokens.get(index), Some(Token::Word(_) | Token::QuotedIdent(_)))
        && tokens.get(index + 1) == Some(&Token::Dot)
    {
        index += 2;
    }
    tokens.get(index).is_some_and(|t| t.names_column(column))
        && !matches!(tokens.get(index + 1), Some(Token::Dot | Token::LParen))
}

/// Index of the first token of a qualified name such as `db.t.dt`.
fn index_before_qualifier(tokens: &[Token], mut index: usize) -> usize {
    while index >= 2
        && tokens[index - 1] == Token::Dot
        && matches!(tokens[index - 2], Token::Word(_) | Token::QuotedIdent(_))
    {
        index -= 2;
    }
    index
}

fn describe_target(statement: &[Token]) -> Option<String> {
    let mut rest = statement.iter().skip(1).peekable();
    while rest.next_if(|t| t.is_keyword("EXTENDED") || t.is_keyword("FORMATTED")).is_some() {}

    let mut parts = Vec::new();
    loop {
        match rest.next() {
            Some(Token::Word(name)) | Some(Token::QuotedIdent(name)) => parts.push(name.clone()),
            _ => break,
        }
        if rest.next_if(|t| **t == Token::Dot).is_none() {
            break;
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_literals_are_not_words() {
        let tokens = tokenize("SELECT 'DROP TABLE x' -- DELETE\n/* UPDATE */ FROM t");
        assert_eq!(
            tokens,
            vec![
                Token::Word("SELECT".into()),
                Token::StringLit("DROP TABLE x".into()),
                Token::Word("FROM".into()),
                Token::Word("t".into()),
            ]
        );
    }

    #[test]
    fn doubled_quotes_are_escapes() {
        let tokens = tokenize("'it''s' \"a\"\"b\"");
        assert_eq!(
            tokens,
            vec![Token::StringLit("it's".into()), Token::QuotedIdent("a\"b".into())]
        );
    }

    #[test]
    fn unterminated_input_does_not_panic() {
        assert_eq!(tokenize("SELECT 'oops").len(), 2);
        assert_eq!(tokenize("SELECT /* never closed").len(), 1);
    }

    #[test]
    fn two_char_operators_are_single_tokens() {
        let tokens = tokenize("dt>='2026-01-01'");
        assert_eq!(tokens[1], Token::Operator(">=".into()));
    }

    #[test]
    fn detects_partition_predicates_in_where_and_on() {
        for sql in [
            "SELECT * FROM t WHERE dt = '2026-01-15'",
            "SELECT * FROM t WHERE a = 1 AND t.dt >= '2026-01-01'",
            "SELECT * FROM t WHERE \"dt\" BETWEEN '2026-01-01' AND '2026-01-02'",
            "SELECT * FROM t WHERE DT IN ('2026-01-14', '2026-01-15')",
            "SELECT * FROM a JOIN b ON a.id = b.id AND '2026-01-15' = b.dt",
            "SELECT * FROM t WHERE id IN (SELECT id FROM u WHERE dt = '2026-01-15')",
        ] {
            assert!(analyze(sql).has_partition_filter, "{sql}");
        }
    }

    #[test]
    fn ignores_dt_outside_filters() {
        for sql in [
            "SELECT dt, count(*) FROM t GROUP BY dt",
            "SELECT dt = '2026-01-15' AS today FROM t",
            "SELECT * FROM t WHERE updated_dt = '2026-01-15'",
            "SELECT * FROM t WHERE note = 'dt = 2026-01-15'",
            "SELECT * FROM t -- WHERE dt = '2026-01-15'",
            "SELECT * FROM t dt WHERE dt.id = 1",
            "SELECT * FROM a JOIN b ON a.dt = b.dt",
            "SELECT * FROM a WHERE dt = dt",
            "SELECT * FROM a WHERE \"dt\" >= a.\"DT\"",
            "SELECT * FROM a WHERE dt IN (dt)",
        ] {
            assert!(!analyze(sql).has_partition_filter, "{sql}");
        }
    }

    #[test]
    fn classifies_introspection_and_describe_target() {
        let shape = analyze("describe formatted telemetry.\"error_logs\"");
        assert!(shape.is_introspection);
        assert_eq!(shape.describe_target.as_deref(), Some("telemetry.error_logs"));

        let shape = analyze("  SHOW TABLES");
        assert!(shape.is_introspection);
        assert_eq!(shape.describe_target, None);

        assert!(!analyze("SELECT 1").is_introspection);
    }

    #[test]
    fn every_data_statement_needs_its_own_partition_filter() {
        for sql in [
            "SHOW TABLES; SELECT * FROM error_logs",
            "DESCRIBE error_logs; SELECT * FROM error_logs",
            "SELECT * FROM error_logs WHERE dt = '2026-01-15'; SELECT * FROM sessions",
        ] {
            let shape = analyze(sql);
            assert!(!shape.is_introspection, "{sql}");
            assert!(!shape.has_partition_filter, "{sql}");
        }

        let scoped = analyze("SHOW TABLES; SELECT * FROM sessions WHERE dt = '2026-01-15'");
        assert!(scoped.has_partition_filter);
        assert!(!scoped.is_introspection);
    }

    #[test]
    fn describe_target_requires_a_single_statement() {
        assert!(analyze("DESCRIBE a; DESCRIBE b").is_introspection);
        assert_eq!(analyze("DESCRIBE a; DESCRIBE b").describe_target, None);
    }
}
