use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use thiserror::Error;

/// Errors from parsing a label selector expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty requirement in label selector")]
    EmptyRequirement,

    #[error("invalid label key {0:?}")]
    InvalidKey(String),

    #[error("invalid label value {0:?}")]
    InvalidValue(String),

    #[error("unknown set operator {0:?} (expected 'in' or 'notin')")]
    InvalidOperator(String),

    #[error("unbalanced parentheses in {0:?}")]
    UnbalancedParens(String),
}

/// One clause of a label selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Self::NotIn(k, values) => !labels.get(k).is_some_and(|v| values.contains(v)),
            Self::Exists(k) => labels.contains_key(k),
            Self::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// Label selector in kubectl syntax (`app=web,tier!=db,env in (prod,staging),!canary`).
///
/// All requirements must hold. The empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let requirements = split_terms(s)?
            .into_iter()
            .map(parse_requirement)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { requirements })
    }
}

/// Split on commas that are not inside a `( ... )` value list
fn split_terms(s: &str) -> Result<Vec<&str>, SelectorError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| SelectorError::UnbalancedParens(s.to_string()))?;
            }
            ',' if depth == 0 => {
                terms.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(SelectorError::UnbalancedParens(s.to_string()));
    }
    terms.push(&s[start..]);
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement, SelectorError> {
    let term = term.trim();
    if term.is_empty() {
        return Err(SelectorError::EmptyRequirement);
    }

    if let Some(rest) = term.strip_prefix('!') {
        return Ok(Requirement::NotExists(key(rest)?));
    }

    if let Some(open) = term.find('(') {
        let Some(inner) = term[open + 1..].strip_suffix(')') else {
            return Err(SelectorError::UnbalancedParens(term.to_string()));
        };
        let mut head = term[..open].split_whitespace();
        let (Some(k), Some(op), None) = (head.next(), head.next(), head.next()) else {
            return Err(SelectorError::InvalidOperator(term.to_string()));
        };
        let values = inner
            .split(',')
            .map(value)
            .collect::<Result<BTreeSet<_>, _>>()?;
        return match op {
            "in" => Ok(Requirement::In(key(k)?, values)),
            "notin" => Ok(Requirement::NotIn(key(k)?, values)),
            other => Err(SelectorError::InvalidOperator(other.to_string())),
        };
    }

    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(key(k)?, value(v)?));
    }
    if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Requirement::Equals(key(k)?, value(v)?));
    }

    Ok(Requirement::Exists(key(term)?))
}

fn key(raw: &str) -> Result<String, SelectorError> {
    let k = raw.trim();
    let valid = !k.is_empty()
        && k
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if valid {
        Ok(k.to_string())
    } else {
        Err(SelectorError::InvalidKey(raw.to_string()))
    }
}

fn value(raw: &str) -> Result<String, SelectorError> {
    let v = raw.trim();
    if v.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Ok(v.to_string())
    } else {
        Err(SelectorError::InvalidValue(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_equality_requirements() {
        let sel: LabelSelector = "app=web, tier==frontend".parse().unwrap();
        assert!(sel.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(!sel.matches(&labels(&[("app", "web")])));

        let sel: LabelSelector = "env!=prod".parse().unwrap();
        assert!(sel.matches(&labels(&[("env", "dev")])));
        assert!(sel.matches(&labels(&[])));
        assert!(!sel.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_set_requirements() {
        let sel: LabelSelector = "env in (prod, staging),tier notin (db)".parse().unwrap();
        assert_eq!(sel.requirements().len(), 2);
        assert!(sel.matches(&labels(&[("env", "staging"), ("tier", "web")])));
        assert!(sel.matches(&labels(&[("env", "prod")])));
        assert!(!sel.matches(&labels(&[("env", "dev")])));
        assert!(!sel.matches(&labels(&[("env", "prod"), ("tier", "db")])));
    }

    #[test]
    fn test_existence_requirements() {
        let sel: LabelSelector = "app,!canary".parse().unwrap();
        assert!(sel.matches(&labels(&[("app", "x")])));
        assert!(!sel.matches(&labels(&[("app", "x"), ("canary", "true")])));
        assert!(!sel.matches(&labels(&[])));
    }

    #[test]
    fn test_prefixed_key() {
        let sel: LabelSelector = "app.kubernetes.io/name=api".parse().unwrap();
        assert!(sel.matches(&labels(&[("app.kubernetes.io/name", "api")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let sel: LabelSelector = "  ".parse().unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&labels(&[("anything", "goes")])));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "app=web,".parse::<LabelSelector>(),
            Err(SelectorError::EmptyRequirement)
        );
        assert!(matches!(
            "env in (prod".parse::<LabelSelector>(),
            Err(SelectorError::UnbalancedParens(_))
        ));
        assert!(matches!(
            "env within (prod)".parse::<LabelSelector>(),
            Err(SelectorError::InvalidOperator(_))
        ));
        assert!(matches!(
            "a b=c".parse::<LabelSelector>(),
            Err(SelectorError::InvalidKey(_))
        ));
        assert!(matches!(
            "app=we b".parse::<LabelSelector>(),
            Err(SelectorError::InvalidValue(_))
        ));
    }
}
