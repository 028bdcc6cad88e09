//! Parameter template engine.
//!
//! Templates use `$name` / `${name}` placeholders and `$$` for a literal `$`.
//! Substitution is purely textual: values are opaque strings and the template
//! author owns SQL quoting (`WHERE dt = '$d'`).

use std::collections::BTreeMap;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::{TemplateError, ValidationError};
use crate::lexer::{self, SqlShape};

/// One query invocation: template text, parameter values and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    template: String,
    params: BTreeMap<String, String>,
    database: String,
    result_location: String,
}

impl QueryRequest {
    pub fn new(
        template: impl Into<String>,
        database: impl Into<String>,
        result_location: impl Into<String>,
    ) -> Self {
        Self {
            template: template.into(),
            params: BTreeMap::new(),
            database: database.into(),
            result_location: result_location.into(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(name, value)| (name.into(), value.into())));
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn result_location(&self) -> &str {
        &self.result_location
    }

    pub fn render(&self) -> Result<RenderedQuery, ValidationError> {
        render(&self.template, &self.params)
    }
}

/// Where a parameter value landed in the rendered text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub name: String,
    pub range: Range<usize>,
}

/// A template after substitution. Only [`render`] creates one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    sql: String,
    shape: SqlShape,
    substitutions: Vec<Substitution>,
}

impl RenderedQuery {
    fn new(sql: String, substitutions: Vec<Substitution>) -> Self {
        let shape = lexer::analyze(&sql);
        Self {
            sql,
            shape,
            substitutions,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn has_partition_filter(&self) -> bool {
        self.shape.has_partition_filter
    }

    pub fn is_introspection(&self) -> bool {
        self.shape.is_introspection
    }

    /// Table named by a `DESCRIBE` statement, if this is one.
    pub fn describe_target(&self) -> Option<&str> {
        self.shape.describe_target.as_deref()
    }

    pub fn substitutions(&self) -> &[Substitution] {
        &self.substitutions
    }

    /// The text each placeholder was replaced with, read back from the SQL.
    pub fn substituted_value(&self, substitution: &Substitution) -> &str {
        self.sql.get(substitution.range.clone()).unwrap_or_default()
    }
}

enum Placeholder<'a> {
    Escaped,
    Named { name: &'a str, consumed: usize },
    Literal,
}

/// Classify the text following a `$`.
fn parse_placeholder(after: &str) -> Placeholder<'_> {
    if after.starts_with('$') {
        return Placeholder::Escaped;
    }

    if let Some(braced) = after.strip_prefix('{') {
        return match braced.find('}') {
            Some(end) if is_identifier(&braced[..end]) => Placeholder::Named {
                name: &braced[..end],
                consumed: end + 2,
            },
            _ => Placeholder::Literal,
        };
    }

    let length = after
        .char_indices()
        .take_while(|(index, ch)| {
            ch.is_ascii_alphabetic() || *ch == '_' || (*index > 0 && ch.is_ascii_digit())
        })
        .count();
    if length == 0 {
        Placeholder::Literal
    } else {
        Placeholder::Named {
            name: &after[..length],
            consumed: length,
        }
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// Substitute every placeholder in `template`.
///
/// A placeholder without a value is an error naming it. Parameters the
/// template never mentions are ignored.
pub fn render(
    template: &str,
    params: &BTreeMap<String, String>,
) -> Result<RenderedQuery, ValidationError> {
    let mut sql = String::with_capacity(template.len());
    let mut substitutions = Vec::new();
    let mut rest = template;

    while let Some(position) = rest.find('$') {
        sql.push_str(&rest[..position]);
        let after = &rest[position + 1..];
        match parse_placeholder(after) {
            Placeholder::Escaped => {
                sql.push('$');
                rest = &after[1..];
            }
            Placeholder::Named { name, consumed } => {
                let value = params
                    .get(name)
                    .ok_or_else(|| ValidationError::UnresolvedPlaceholder {
                        name: name.to_string(),
                    })?;
                let start = sql.len();
                sql.push_str(value);
                substitutions.push(Substitution {
                    name: name.to_string(),
                    range: start..sql.len(),
                });
                rest = &after[consumed..];
            }
            Placeholder::Literal => {
                sql.push('$');
                rest = after;
            }
        }
    }
    sql.push_str(rest);

    Ok(RenderedQuery::new(sql, substitutions))
}

/// Distinct placeholder names in order of first appearance.
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(position) = rest.find('$') {
        let after = &rest[position + 1..];
        rest = match parse_placeholder(after) {
            Placeholder::Escaped => &after[1..],
            Placeholder::Named { name, consumed } => {
                if !names.iter().any(|known| known == name) {
                    names.push(name.to_string());
                }
                &after[consumed..]
            }
            Placeholder::Literal => after,
        };
    }
    names
}

/// A query template saved as a `.sql` file.
///
/// ```text
/// -- Top errors for one day
/// -- params: d
/// SELECT error_type, COUNT(*) FROM error_logs WHERE dt = '$d' GROUP BY 1
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedTemplate {
    pub name: String,
    pub purpose: String,
    pub declared_params: Vec<String>,
    #[serde(skip)]
    pub text: String,
}

impl SavedTemplate {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let text = fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                TemplateError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                TemplateError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(name, text)
    }

    pub fn parse(name: impl Into<String>, text: impl Into<String>) -> Result<Self, TemplateError> {
        let name = name.into();
        let text = text.into();

        let mut purpose = String::new();
        let mut declared_params = Vec::new();
        let header = text
            .lines()
            .skip_while(|line| line.trim().is_empty())
            .take_while(|line| line.trim_start().starts_with("--"));
        for line in header {
            let content = line.trim_start().trim_start_matches('-').trim();
            let lowered = content.to_ascii_lowercase();
            let declared = ["params:", "parameters:"]
                .iter()
                .find_map(|prefix| lowered.starts_with(prefix).then(|| &content[prefix.len()..]));
            if let Some(list) = declared {
                declared_params.extend(
                    list.split(|ch: char| ch == ',' || ch.is_whitespace())
                        .map(|item| item.trim_start_matches('$'))
                        .filter(|item| !item.is_empty())
                        .map(str::to_string),
                );
            } else if purpose.is_empty() && !content.is_empty() {
                purpose = content
                    .strip_prefix("Purpose:")
                    .unwrap_or(content)
                    .trim()
                    .to_string();
            }
        }

        if purpose.is_empty() {
            return Err(TemplateError::MissingHeader { name });
        }

        let template = Self {
            name,
            purpose,
            declared_params,
            text,
        };
        let undeclared = template.undeclared_placeholders();
        if !undeclared.is_empty() {
            warn!(
                template = %template.name,
                placeholders = ?undeclared,
                "template uses placeholders its header does not declare"
            );
        }
        Ok(template)
    }

    /// Saved templates in `dir`, sorted by name. A missing directory is empty.
    pub fn list(dir: &Path) -> Result<Vec<Self>, TemplateError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TemplateError::Io {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        };

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| TemplateError::Io {
                    path: dir.to_path_buf(),
                    source,
                })?
                .path();
            if path
                .extension()
                .and_then(|extension| extension.to_str())
                .is_some_and(|extension| extension.eq_ignore_ascii_case("sql"))
            {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|path| Self::load(path)).collect()
    }

    pub fn placeholders(&self) -> Vec<String> {
        placeholder_names(&self.text)
    }

    pub fn undeclared_placeholders(&self) -> Vec<String> {
        self.placeholders()
            .into_iter()
            .filter(|name| !self.declared_params.contains(name))
            .collect()
    }

    pub fn request(&self, database: impl Into<String>, result_location: impl Into<String>) -> QueryRequest {
        QueryRequest::new(self.text.clone(), database, result_location)
    }
}

/// `true` when `input` names a saved template file rather than inline SQL.
pub fn is_template_path(input: &str) -> bool {
    input.trim().to_ascii_lowercase().ends_with(".sql")
}
