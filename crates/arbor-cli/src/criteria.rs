//! Command-line criteria, sort keys and visibility scopes.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use arbor_search::{
    FieldNode, FieldPrefix, MatchType, SearchNode, SortField, SqlValue, StaticVisibility,
    Unrestricted, VisibilityContext,
};
use regex::Regex;

use crate::cli::CriteriaArgs;

static CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<field>[A-Za-z0-9_.]+)=(?P<value>.*)$").expect("Invalid condition regex")
});

// Lazy so that a decimal low bound keeps its own dot.
static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<field>[A-Za-z0-9_.]+)=(?P<low>.*?)\.\.(?P<high>.*)$")
        .expect("Invalid range regex")
});

static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<scope>[A-Za-z0-9_]+)=(?P<ids>.*)$").expect("Invalid scope regex")
});

/// AND of every `--where` and `--range` argument.
pub fn parse_criteria(prefix: &FieldPrefix, args: &CriteriaArgs) -> Result<SearchNode> {
    let mut nodes = Vec::new();

    for raw in &args.conditions {
        let caps = CONDITION_RE
            .captures(raw)
            .ok_or_else(|| anyhow!("invalid --where '{raw}', expected FIELD=VALUE"))?;
        let path = prefix
            .resolve(&caps["field"])
            .with_context(|| format!("invalid --where '{raw}'"))?;
        nodes.push(SearchNode::field(FieldNode::relaxed(
            path,
            vec![Some(caps["value"].to_string())],
        )));
    }

    for raw in &args.ranges {
        let caps = RANGE_RE
            .captures(raw)
            .ok_or_else(|| anyhow!("invalid --range '{raw}', expected FIELD=LOW..HIGH"))?;
        let path = prefix
            .resolve(&caps["field"])
            .with_context(|| format!("invalid --range '{raw}'"))?;
        let bound = |name: &str| {
            let value = caps[name].trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        let node = FieldNode::new(path, vec![bound("low"), bound("high")], MatchType::Range)
            .with_context(|| format!("invalid --range '{raw}'"))?;
        nodes.push(SearchNode::field(node));
    }

    Ok(match nodes.len() {
        0 => SearchNode::NoCondition,
        1 => nodes.remove(0),
        _ => SearchNode::and(nodes),
    })
}

pub fn parse_sort(prefix: &FieldPrefix, raw: &str) -> Result<SortField> {
    let (name, descending) = match raw.strip_prefix('-') {
        Some(name) => (name, true),
        None => (raw.strip_prefix('+').unwrap_or(raw), false),
    };
    let path = prefix
        .resolve(name)
        .with_context(|| format!("invalid --sort '{raw}'"))?;
    Ok(if descending {
        SortField::desc(path)
    } else {
        SortField::asc(path)
    })
}

/// Numeric identifiers are bound as integers, anything else as text.
pub fn parse_visibility(scopes: &[String]) -> Result<Box<dyn VisibilityContext>> {
    if scopes.is_empty() {
        return Ok(Box::new(Unrestricted));
    }
    let mut visibility = StaticVisibility::new();
    for raw in scopes {
        let caps = SCOPE_RE
            .captures(raw)
            .ok_or_else(|| anyhow!("invalid --scope '{raw}', expected SCOPE=ID[,ID...]"))?;
        let ids = caps["ids"]
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| match id.parse::<i64>() {
                Ok(n) => SqlValue::Integer(n),
                Err(_) => SqlValue::Text(id.to_string()),
            });
        visibility = visibility.with_scope(&caps["scope"], ids);
    }
    Ok(Box::new(visibility))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_search::{RegistryDefinition, SortOrder};

    fn prefix() -> FieldPrefix {
        RegistryDefinition::from_toml_str(include_str!("../../../demos/registry.toml"))
            .unwrap()
            .build()
            .unwrap()
            .root_prefix("accessions")
            .unwrap()
    }

    fn args(conditions: &[&str], ranges: &[&str]) -> CriteriaArgs {
        CriteriaArgs {
            conditions: conditions.iter().map(|s| s.to_string()).collect(),
            ranges: ranges.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_no_criteria() {
        let node = parse_criteria(&prefix(), &CriteriaArgs::default()).unwrap();
        assert_eq!(node, SearchNode::NoCondition);
    }

    #[test]
    fn test_where_is_relaxed() {
        let prefix = prefix();
        let node = parse_criteria(&prefix, &args(&["bags.number=2"], &[])).unwrap();
        let SearchNode::Field(field) = node else {
            panic!("expected a field node");
        };
        assert_eq!(field.path, prefix.resolve("bags.number").unwrap());
        assert_eq!(field.values, vec![Some("2".to_string())]);
        assert_eq!(field.match_type, MatchType::Fuzzy);
    }

    #[test]
    fn test_ranges_and_conjunction() {
        let prefix = prefix();
        let node = parse_criteria(
            &prefix,
            &args(&["accessionNumber=A1"], &["weight=1.5..", "collectedDate=..2021-12-31"]),
        )
        .unwrap();
        let SearchNode::And(children) = node else {
            panic!("expected a conjunction");
        };
        assert_eq!(children.len(), 3);
        let SearchNode::Field(weight) = &children[1] else {
            panic!("expected a field node");
        };
        assert_eq!(weight.values, vec![Some("1.5".to_string()), None]);
        assert_eq!(weight.match_type, MatchType::Range);
    }

    #[test]
    fn test_invalid_criteria() {
        let prefix = prefix();
        assert!(parse_criteria(&prefix, &args(&["accessionNumber"], &[])).is_err());
        assert!(parse_criteria(&prefix, &args(&["nope=1"], &[])).is_err());
        assert!(parse_criteria(&prefix, &args(&[], &["weight=1"])).is_err());
        // Text fields have no range matching.
        assert!(parse_criteria(&prefix, &args(&[], &["accessionNumber=A..B"])).is_err());
    }

    #[test]
    fn test_parse_sort() {
        let prefix = prefix();
        let sort = parse_sort(&prefix, "-germinationTests.germinations.seedsGerminated").unwrap();
        assert_eq!(sort.order, SortOrder::Desc);
        assert_eq!(sort.path.to_string(), "germinationTests.germinations.seedsGerminated");
        assert_eq!(parse_sort(&prefix, "+accessionNumber").unwrap().order, SortOrder::Asc);
        assert!(parse_sort(&prefix, "-").is_err());
    }

    #[test]
    fn test_parse_visibility() {
        let visibility = parse_visibility(&[]).unwrap();
        assert_eq!(visibility.ids_for("facility"), None);

        let visibility =
            parse_visibility(&["facility=1, 2".to_string(), "site=north".to_string()]).unwrap();
        assert_eq!(
            visibility.ids_for("facility"),
            Some(vec![SqlValue::Integer(1), SqlValue::Integer(2)])
        );
        assert_eq!(visibility.ids_for("site"), Some(vec![SqlValue::Text("north".into())]));
        assert_eq!(visibility.ids_for("other"), Some(vec![]));

        assert!(parse_visibility(&["facility".to_string()]).is_err());
    }
}
