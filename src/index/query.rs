//! Structured queries and normalized query results.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Value, json};

use super::cluster::{Bucket, HighlightRequest, SearchResponse, SearchRequest, TermsAggregation};
use crate::Document;

/// Highlight fragments are returned without markup.
pub const HIGHLIGHT_FRAGMENT_SIZE: usize = 140;

/// A query or filter clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Match { field: String, text: String },
    QueryString {
        query: String,
        default_field: Option<String>,
    },
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    Exists(String),
    Bool {
        must: Vec<Filter>,
        filter: Vec<Filter>,
        should: Vec<Filter>,
        must_not: Vec<Filter>,
    },
    /// Query DSL passed through unchanged.
    Raw(Value),
}

impl Filter {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn match_text(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn query_string(query: impl Into<String>) -> Self {
        Self::QueryString {
            query: query.into(),
            default_field: None,
        }
    }

    pub fn range(field: impl Into<String>, gte: Option<Value>, lte: Option<Value>) -> Self {
        Self::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    /// Conjunction of `clauses` in filter context.
    pub fn all_of(clauses: impl IntoIterator<Item = Filter>) -> Self {
        Self::Bool {
            must: Vec::new(),
            filter: clauses.into_iter().collect(),
            should: Vec::new(),
            must_not: Vec::new(),
        }
    }

    pub fn none_of(clauses: impl IntoIterator<Item = Filter>) -> Self {
        Self::Bool {
            must: Vec::new(),
            filter: Vec::new(),
            should: Vec::new(),
            must_not: clauses.into_iter().collect(),
        }
    }

    /// Render as query DSL. `timezone_offset` is in minutes east of UTC and
    /// applies to range clauses.
    pub fn to_dsl(&self, timezone_offset: i32) -> Value {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Self::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Self::Match { field, text } => json!({ "match": { field.as_str(): text } }),
            Self::QueryString {
                query,
                default_field,
            } => {
                let mut body = json!({ "query": query });
                if let Some(field) = default_field {
                    body["default_field"] = json!(field);
                }
                json!({ "query_string": body })
            }
            Self::Range { field, gte, lte } => {
                let mut bounds = serde_json::Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".into(), gte.clone());
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".into(), lte.clone());
                }
                if timezone_offset != 0 {
                    bounds.insert("time_zone".into(), json!(time_zone(timezone_offset)));
                }
                json!({ "range": { field.as_str(): bounds } })
            }
            Self::Exists(field) => json!({ "exists": { "field": field } }),
            Self::Bool {
                must,
                filter,
                should,
                must_not,
            } => {
                let mut body = serde_json::Map::new();
                for (name, clauses) in [
                    ("must", must),
                    ("filter", filter),
                    ("should", should),
                    ("must_not", must_not),
                ] {
                    if !clauses.is_empty() {
                        let rendered: Vec<Value> =
                            clauses.iter().map(|c| c.to_dsl(timezone_offset)).collect();
                        body.insert(name.into(), Value::Array(rendered));
                    }
                }
                json!({ "bool": body })
            }
            Self::Raw(value) => value.clone(),
        }
    }
}

/// `+HH:MM` / `-HH:MM` for an offset in minutes.
fn time_zone(offset_minutes: i32) -> String {
    let sign = if offset_minutes < 0 { '-' } else { '+' };
    let minutes = offset_minutes.unsigned_abs();
    format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    /// Relevance order.
    pub fn score() -> Self {
        Self::desc("_score")
    }

    pub fn to_dsl(&self) -> Value {
        json!({ self.field.as_str(): { "order": self.order.as_str() } })
    }
}

/// Everything a search call needs.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filter: Filter,
    /// Applied after aggregation, so facet counts ignore it.
    pub post_filter: Option<Filter>,
    pub sort: Vec<Sort>,
    pub highlight_field: Option<String>,
    pub timezone_offset: i32,
    pub from: usize,
    pub size: usize,
    /// Maximum buckets per aggregation field.
    pub aggregation_limit: usize,
    pub explain: bool,
    pub aggregation_fields: Vec<String>,
}

impl QuerySpec {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            post_filter: None,
            sort: Vec::new(),
            highlight_field: None,
            timezone_offset: 0,
            from: 0,
            size: 10,
            aggregation_limit: 10,
            explain: false,
            aggregation_fields: Vec::new(),
        }
    }

    pub fn post_filter(mut self, filter: Filter) -> Self {
        self.post_filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    pub fn highlight(mut self, field: impl Into<String>) -> Self {
        self.highlight_field = Some(field.into());
        self
    }

    pub fn timezone_offset(mut self, minutes: i32) -> Self {
        self.timezone_offset = minutes;
        self
    }

    pub fn page(mut self, from: usize, size: usize) -> Self {
        self.from = from;
        self.size = size;
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn aggregate<I, S>(mut self, limit: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregation_limit = limit;
        self.aggregation_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            query: self.filter.to_dsl(self.timezone_offset),
            post_filter: self
                .post_filter
                .as_ref()
                .map(|f| f.to_dsl(self.timezone_offset)),
            sort: self.sort.iter().map(Sort::to_dsl).collect(),
            from: self.from,
            size: self.size,
            explain: self.explain,
            highlight: self.highlight_field.as_ref().map(|field| HighlightRequest {
                field: field.clone(),
                fragment_size: HIGHLIGHT_FRAGMENT_SIZE,
                pre_tag: String::new(),
                post_tag: String::new(),
            }),
            aggregations: self
                .aggregation_fields
                .iter()
                .map(|field| TermsAggregation {
                    field: field.clone(),
                    size: self.aggregation_limit,
                    min_doc_count: 1,
                })
                .collect(),
            scroll: None,
        }
    }
}

/// Normalized search result.
///
/// `results`, `explanations` and `highlights` are parallel: entry `i` of
/// each belongs to the same hit. Explanations are empty strings unless
/// explain was requested.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QueryResult {
    pub hit_count: u64,
    pub results: Vec<Document>,
    pub explanations: Vec<String>,
    pub highlights: Vec<IndexMap<String, Vec<String>>>,
    pub aggregations: IndexMap<String, Vec<(String, u64)>>,
}

impl QueryResult {
    pub fn from_response(response: SearchResponse, spec: &QuerySpec, type_name: &str) -> Self {
        let mut result = QueryResult {
            hit_count: response.total_hits,
            ..Default::default()
        };
        for hit in response.hits {
            let kind = hit.type_name.as_deref().unwrap_or(type_name);
            result
                .results
                .push(enrich_document(hit.source, &hit.id, kind));
            result.highlights.push(hit.highlights);
            let explanation = if spec.explain {
                hit.explanation.unwrap_or_default()
            } else {
                String::new()
            };
            result.explanations.push(explanation);
        }
        for field in &spec.aggregation_fields {
            let buckets = response
                .aggregations
                .get(field)
                .map(|b| merge_buckets(b))
                .unwrap_or_default();
            result.aggregations.insert(field.clone(), buckets);
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Add `id` and `type` keys unless the stored source already has them.
pub fn enrich_document(mut document: Document, id: &str, type_name: &str) -> Document {
    document
        .entry("id")
        .or_insert_with(|| Value::String(id.to_string()));
    document
        .entry("type")
        .or_insert_with(|| Value::String(type_name.to_string()));
    document
}

/// Merge buckets whose trimmed labels are equal ignoring case.
///
/// Counts are summed; the first label seen (trimmed, original case) names
/// the merged bucket and the cluster's bucket order is kept. Blank labels
/// are dropped.
pub fn merge_buckets(buckets: &[Bucket]) -> Vec<(String, u64)> {
    let mut merged: IndexMap<String, (String, u64)> = IndexMap::with_capacity(buckets.len());
    for bucket in buckets {
        let label = bucket.key.trim();
        if label.is_empty() {
            continue;
        }
        merged
            .entry(label.to_lowercase())
            .and_modify(|(_, count)| *count += bucket.doc_count)
            .or_insert_with(|| (label.to_string(), bucket.doc_count));
    }
    merged.into_values().collect()
}
