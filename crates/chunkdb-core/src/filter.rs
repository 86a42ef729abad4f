//! Metadata filter engine.
//!
//! A [`FilterSpec`] is the loosely-typed description a caller sends; a
//! [`Predicate`] is its validated form that stores can evaluate or translate
//! into their own query language.
//!
//! Semantics:
//! - populated exact-match fields (`source`, `page_number`, `document_id`,
//!   `user_id`) combine with AND
//! - `tags` matches when the candidate carries at least one requested tag
//! - an absent field leaves that dimension unconstrained, so an empty spec
//!   matches every chunk
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::{normalize_tags, Chunk, Source};

/// Field names accepted in a filter specification.
pub const FILTER_FIELDS: [&str; 5] = ["source", "page_number", "document_id", "user_id", "tags"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct FilterSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl FilterSpec {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_page_number(mut self, page_number: i64) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// No field populated.
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.page_number.is_none()
            && self.document_id.is_none()
            && self.user_id.is_none()
            && self.tags.is_none()
    }

    /// Read a spec from a JSON object, rejecting unknown keys.
    /// A `null` value is the same as leaving the key out.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::InvalidRequest("filters must be a JSON object".into()))?;
        let mut spec = FilterSpec::default();
        for (key, raw) in obj {
            if raw.is_null() {
                if !FILTER_FIELDS.contains(&key.as_str()) {
                    return Err(Error::InvalidFilterField(key.clone()));
                }
                continue;
            }
            match key.as_str() {
                "source" => spec.source = Some(expect_str("source", raw)?),
                "document_id" => spec.document_id = Some(expect_str("document_id", raw)?),
                "user_id" => spec.user_id = Some(expect_str("user_id", raw)?),
                "page_number" => {
                    let page = raw.as_i64().ok_or_else(|| Error::InvalidFilterValue {
                        field: "page_number",
                        reason: format!("expected an integer, got {raw}"),
                    })?;
                    spec.page_number = Some(page);
                }
                "tags" => {
                    let tags = match raw {
                        Value::String(one) => vec![one.clone()],
                        Value::Array(items) => items
                            .iter()
                            .map(|item| expect_str("tags", item))
                            .collect::<Result<Vec<_>>>()?,
                        other => {
                            return Err(Error::InvalidFilterValue {
                                field: "tags",
                                reason: format!("expected a list of strings, got {other}"),
                            })
                        }
                    };
                    spec.tags = Some(tags);
                }
                unknown => return Err(Error::InvalidFilterField(unknown.to_string())),
            }
        }
        Ok(spec)
    }
}

fn expect_str(field: &'static str, raw: &Value) -> Result<String> {
    raw.as_str().map(str::to_string).ok_or_else(|| Error::InvalidFilterValue {
        field,
        reason: format!("expected a string, got {raw}"),
    })
}

impl TryFrom<Value> for FilterSpec {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        FilterSpec::from_value(&value)
    }
}

/// Validated, evaluable form of a [`FilterSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    pub source: Option<Source>,
    pub page_number: Option<u32>,
    pub document_id: Option<String>,
    pub user_id: Option<String>,
    /// Match-any tag set; `None` is vacuously true.
    pub any_tags: Option<BTreeSet<String>>,
}

impl Predicate {
    /// True when no clause constrains the candidate set.
    pub fn matches_everything(&self) -> bool {
        *self == Predicate::default()
    }

    pub fn evaluate(&self, chunk: &Chunk) -> bool {
        if let Some(source) = self.source {
            if chunk.metadata.source != source {
                return false;
            }
        }
        if let Some(page) = self.page_number {
            if chunk.metadata.page_number != page {
                return false;
            }
        }
        if let Some(doc) = &self.document_id {
            if &chunk.document_id != doc {
                return false;
            }
        }
        if let Some(user) = &self.user_id {
            if &chunk.user_id != user {
                return false;
            }
        }
        match &self.any_tags {
            Some(wanted) => wanted.iter().any(|t| chunk.metadata.tags.contains(t)),
            None => true,
        }
    }
}

/// Validate a spec and turn it into a [`Predicate`].
pub fn build_predicate(spec: &FilterSpec) -> Result<Predicate> {
    let source = spec.source.as_deref().map(str::parse::<Source>).transpose()?;
    let page_number = match spec.page_number {
        None => None,
        Some(page) if page < 1 => {
            return Err(Error::InvalidFilterValue {
                field: "page_number",
                reason: format!("must be >= 1, got {page}"),
            })
        }
        Some(page) => Some(u32::try_from(page).map_err(|_| Error::InvalidFilterValue {
            field: "page_number",
            reason: format!("{page} is out of range"),
        })?),
    };
    // An explicitly empty tag list constrains nothing, same as an absent one.
    let any_tags = spec
        .tags
        .as_ref()
        .map(normalize_tags)
        .filter(|set| !set.is_empty());
    Ok(Predicate {
        source,
        page_number,
        document_id: spec.document_id.clone(),
        user_id: spec.user_id.clone(),
        any_tags,
    })
}

/// Free-function form of [`Predicate::evaluate`].
pub fn evaluate(predicate: &Predicate, chunk: &Chunk) -> bool {
    predicate.evaluate(chunk)
}
