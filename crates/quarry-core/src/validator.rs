//! The safety gate between rendered SQL and the billed query service.
//!
//! [`validate`] is the only producer of [`AcceptedQuery`], and the executor
//! accepts nothing else, so a query that was not validated cannot be
//! submitted.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::error::ValidationError;
use crate::lexer::{self, Token};
use crate::template::RenderedQuery;

/// Statements that modify data or metadata. `UNLOAD` writes query results to
/// object storage. `EXECUTE` runs a prepared statement whose body is not
/// visible here.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE", "GRANT",
    "REVOKE", "UNLOAD", "EXECUTE",
];

/// Words after which a new statement body may begin.
const STATEMENT_PREFIXES: &[&str] = &["EXPLAIN", "ANALYZE", "THEN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    WriteOperationDetected,
    MissingPartitionFilter,
}

impl RejectionReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WriteOperationDetected => "write_operation_detected",
            Self::MissingPartitionFilter => "missing_partition_filter",
        }
    }
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl From<Rejection> for ValidationError {
    fn from(rejection: Rejection) -> Self {
        match rejection.reason {
            RejectionReason::WriteOperationDetected => Self::WriteOperationDetected {
                keyword: rejection.detail,
            },
            RejectionReason::MissingPartitionFilter => Self::MissingPartitionFilter {
                detail: rejection.detail,
            },
        }
    }
}

/// A rendered query that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedQuery {
    rendered: RenderedQuery,
}

impl AcceptedQuery {
    pub fn rendered(&self) -> &RenderedQuery {
        &self.rendered
    }

    pub fn sql(&self) -> &str {
        self.rendered.sql()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted(AcceptedQuery),
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(rejection) => Some(rejection),
        }
    }

    pub fn into_result(self) -> Result<AcceptedQuery, ValidationError> {
        match self {
            Self::Accepted(query) => Ok(query),
            Self::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

/// Check that `query` is read-only and, unless it is introspection, scoped
/// to a partition.
pub fn validate(query: RenderedQuery) -> ValidationVerdict {
    if let Some(keyword) = find_write_keyword(query.sql()) {
        return ValidationVerdict::Rejected(Rejection {
            reason: RejectionReason::WriteOperationDetected,
            detail: keyword,
        });
    }

    if !query.is_introspection() && !query.has_partition_filter() {
        return ValidationVerdict::Rejected(Rejection {
            reason: RejectionReason::MissingPartitionFilter,
            detail: format!(
                "no predicate on partition column '{}' (use =, a range, BETWEEN or IN in WHERE)",
                lexer::PARTITION_COLUMN
            ),
        });
    }

    ValidationVerdict::Accepted(AcceptedQuery { rendered: query })
}

/// First write keyword found at a statement- or clause-leading position.
fn find_write_keyword(sql: &str) -> Option<String> {
    let tokens = lexer::tokenize(sql);
    let mut leading = true;

    for (index, token) in tokens.iter().enumerate() {
        if leading {
            if let Token::Word(word) = token {
                if word.eq_ignore_ascii_case("MSCK")
                    && tokens.get(index + 1).is_some_and(|t| t.is_keyword("REPAIR"))
                {
                    return Some(String::from("MSCK REPAIR"));
                }
                if let Some(keyword) = WRITE_KEYWORDS
                    .iter()
                    .find(|keyword| word.eq_ignore_ascii_case(keyword))
                {
                    return Some((*keyword).to_string());
                }
            }
        }

        leading = match token {
            Token::Semicolon | Token::LParen | Token::RParen => true,
            Token::Word(word) => {
                STATEMENT_PREFIXES
                    .iter()
                    .any(|prefix| word.eq_ignore_ascii_case(prefix))
                    || opens_prepared_body(&tokens, index)
            }
            _ => false,
        };
    }

    None
}

/// `FROM` or `AS` in `PREPARE <name> FROM|AS <statement>`.
fn opens_prepared_body(tokens: &[Token], index: usize) -> bool {
    (tokens[index].is_keyword("FROM") || tokens[index].is_keyword("AS"))
        && index >= 2
        && tokens[index - 2].is_keyword("PREPARE")
}
