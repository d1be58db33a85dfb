//! Search result values.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::{FieldPath, FieldPrefix};
use crate::registry::NESTED_SUBLIST_DELIMITER;

/// One entry of a result map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SearchValue {
    Scalar(String),
    /// Rows of a one-to-many sublist, in sublist order.
    List(Vec<SearchResultMap>),
    /// The row of a one-to-one sublist.
    Map(SearchResultMap),
}

impl SearchValue {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// Field and sublist names to values, in select order.
pub type SearchResultMap = IndexMap<String, SearchValue>;

/// One page of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchResultMap>,
    /// Opaque token for the next page; `None` on the last page.
    pub cursor: Option<String>,
}

impl SearchResults {
    pub fn new(results: Vec<SearchResultMap>, cursor: Option<String>) -> Self {
        Self { results, cursor }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// One row of text per result, one column per field. Values from
    /// sublists with several rows are joined with line breaks; missing values
    /// are empty strings.
    pub fn flatten_for_csv(
        &self,
        prefix: &FieldPrefix,
        fields: &[FieldPath],
    ) -> Result<Vec<Vec<String>>> {
        let keys = fields
            .iter()
            .map(|field| {
                Ok(field
                    .relative_to(prefix)?
                    .to_string()
                    .split(NESTED_SUBLIST_DELIMITER)
                    .map(str::to_string)
                    .collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self
            .results
            .iter()
            .map(|row| {
                keys.iter()
                    .map(|key| {
                        let mut values = Vec::new();
                        collect_values(row, key, &mut values);
                        values.join("\n")
                    })
                    .collect()
            })
            .collect())
    }
}

fn collect_values<'a>(map: &'a SearchResultMap, keys: &[String], out: &mut Vec<&'a str>) {
    let Some((key, rest)) = keys.split_first() else {
        return;
    };
    match (map.get(key), rest.is_empty()) {
        (Some(SearchValue::Scalar(value)), true) => out.push(value),
        (Some(SearchValue::List(rows)), false) => {
            for row in rows {
                collect_values(row, rest, out);
            }
        }
        (Some(SearchValue::Map(row)), false) => collect_values(row, rest, out),
        _ => {}
    }
}
