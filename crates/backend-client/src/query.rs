//! Row filters and their PostgREST encoding.
//!
//! A [`Query`] is built once and then either encoded as PostgREST query
//! parameters (HTTP backend) or evaluated directly against JSON rows
//! (in-memory backend), so both backends agree on what a filter selects.

use serde_json::Value;

/// A single row predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column IN (values)`
    In { column: String, values: Vec<String> },
    /// Case-insensitive literal substring match on any of `columns`.
    IlikeAny { columns: Vec<String>, needle: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.to_string(),
        }
    }

    /// Evaluate the predicate against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq { column, value } => {
                cell_text(row, column).map_or(false, |cell| cell == *value)
            }
            Filter::In { column, values } => cell_text(row, column)
                .map_or(false, |cell| values.iter().any(|v| *v == cell)),
            Filter::IlikeAny { columns, needle } => {
                let needle = needle.to_lowercase();
                columns.iter().any(|column| match row.get(column) {
                    Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                    _ => false,
                })
            }
        }
    }

    /// Whether `row` carries any column this predicate reads.
    pub fn applies_to(&self, row: &Value) -> bool {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => row.get(column).is_some(),
            Filter::IlikeAny { columns, .. } => columns.iter().any(|column| row.get(column).is_some()),
        }
    }

    /// PostgREST query parameter for this predicate.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq { column, value } => (column.clone(), format!("eq.{}", value)),
            Filter::In { column, values } => {
                let list: Vec<String> = values.iter().map(|v| quote_if_reserved(v)).collect();
                (column.clone(), format!("in.({})", list.join(",")))
            }
            Filter::IlikeAny { columns, needle } => {
                let pattern = quote(&format!("*{}*", escape_like(needle)));
                let terms: Vec<String> = columns
                    .iter()
                    .map(|column| format!("{}.ilike.{}", column, pattern))
                    .collect();
                ("or".to_string(), format!("({})", terms.join(",")))
            }
        }
    }

    /// Change-feed filter string (`column=eq.value`).
    ///
    /// The realtime service only filters on a single equality, so other
    /// predicates have no feed encoding.
    pub fn to_feed_filter(&self) -> Option<String> {
        match self {
            Filter::Eq { column, value } => Some(format!("{}=eq.{}", column, value)),
            _ => None,
        }
    }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A related table embedded into each returned row (`select=*,items(*)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub table: String,
    /// Column on the embedded table that references the parent's `id`
    pub foreign_key: String,
}

/// Filters, ordering, limit and embeds for one table request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<Order>,
    limit: Option<usize>,
    embeds: Vec<Embed>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn in_<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.filters.push(Filter::In {
            column: column.into(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    /// Match rows where any of `columns` contains `needle`, ignoring case.
    ///
    /// `needle` is literal text; pattern metacharacters in it are escaped.
    pub fn ilike_any(mut self, columns: &[&str], needle: impl Into<String>) -> Self {
        self.filters.push(Filter::IlikeAny {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            needle: needle.into(),
        });
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn embed(mut self, table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.embeds.push(Embed {
            table: table.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn ordering(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn embeds(&self) -> &[Embed] {
        &self.embeds
    }

    /// True when every filter accepts `row`.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// The `select` parameter value.
    pub fn select_clause(&self) -> String {
        let mut clause = "*".to_string();
        for embed in &self.embeds {
            clause.push_str(&format!(",{}(*)", embed.table));
        }
        clause
    }

    /// Encode as PostgREST query parameters (unencoded; the HTTP layer encodes).
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select_clause())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Filter-only parameters, for write requests that take no `select`.
    pub fn to_filter_params(&self) -> Vec<(String, String)> {
        self.filters.iter().map(Filter::to_param).collect()
    }
}

/// Text form of a cell, compared against filter values.
fn cell_text(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Escape LIKE metacharacters so `needle` matches literally.
///
/// PostgREST rewrites every `*` to `%`, so a literal `*` cannot be expressed;
/// it is widened to `_` (any single character) and callers that need exact
/// results re-check rows locally.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        match c {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('_'),
            _ => out.push(c),
        }
    }
    out
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_if_reserved(value: &str) -> String {
    if value.chars().any(|c| matches!(c, ',' | '.' | ':' | '(' | ')' | '"' | '\\' | ' ')) {
        quote(value)
    } else {
        value.to_string()
    }
}
