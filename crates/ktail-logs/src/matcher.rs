use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

use ktail_types::{ContainerSpec, PodInfo};

use crate::selector::{LabelSelector, SelectorError};

/// Something a [`Matcher`] can be evaluated against: a pod or one of its containers
pub trait Matchable {
    fn name(&self) -> &str;

    /// Labels, for subjects that carry them
    fn labels(&self) -> Option<&BTreeMap<String, String>>;

    /// Names of nested containers (empty for a container)
    fn child_names(&self) -> Vec<&str>;
}

impl Matchable for PodInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.labels)
    }

    fn child_names(&self) -> Vec<&str> {
        self.all_containers().map(|c| c.name.as_str()).collect()
    }
}

impl Matchable for ContainerSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        None
    }

    fn child_names(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// A container evaluated in the context of its pod: the container's name with the pod's labels
pub struct ContainerOf<'a> {
    pub pod: &'a PodInfo,
    pub container: &'a ContainerSpec,
}

impl Matchable for ContainerOf<'_> {
    fn name(&self) -> &str {
        &self.container.name
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        Some(&self.pod.labels)
    }

    fn child_names(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Errors from compiling include/exclude patterns or a selector
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid regexp {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(transparent)]
    Selector(#[from] SelectorError),
}

/// Composable boolean predicate over pods and containers
#[derive(Clone, Debug)]
pub enum Matcher {
    Always,
    Never,

    /// Subject name matches; a pod also matches when any of its containers does
    Regex(Regex),

    /// Pod labels satisfy the selector; subjects without labels pass through
    Labels(LabelSelector),

    /// All sub-matchers hold; `empty` is the result for an empty list
    All { matchers: Vec<Matcher>, empty: bool },

    /// Any sub-matcher holds; `empty` is the result for an empty list
    Any { matchers: Vec<Matcher>, empty: bool },

    /// Negation; `absent` is the result when there is no inner matcher
    Not {
        inner: Option<Box<Matcher>>,
        absent: bool,
    },
}

impl Matcher {
    pub fn all(matchers: Vec<Matcher>) -> Self {
        Self::All {
            matchers,
            empty: false,
        }
    }

    pub fn any(matchers: Vec<Matcher>) -> Self {
        Self::Any {
            matchers,
            empty: false,
        }
    }

    pub fn not(inner: Matcher) -> Self {
        Self::Not {
            inner: Some(Box::new(inner)),
            absent: false,
        }
    }

    /// `Any` over the patterns, or `Always`/`Never` per `default_match` when there are none,
    /// intersected with the label selector when one is given
    pub fn build(patterns: Vec<Regex>, selector: Option<LabelSelector>, default_match: bool) -> Self {
        let names = if !patterns.is_empty() {
            Self::any(patterns.into_iter().map(Self::Regex).collect())
        } else if default_match {
            Self::Always
        } else {
            Self::Never
        };

        match selector {
            Some(selector) if !selector.is_empty() => {
                Self::all(vec![Self::Labels(selector), names])
            }
            _ => names,
        }
    }

    /// Compile string patterns and a selector expression, then [`Matcher::build`]
    pub fn from_patterns<S: AsRef<str>>(
        patterns: &[S],
        selector: Option<&str>,
        default_match: bool,
    ) -> Result<Self, MatcherError> {
        let regexes = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| MatcherError::Regex {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let selector = selector.map(str::parse::<LabelSelector>).transpose()?;

        Ok(Self::build(regexes, selector, default_match))
    }

    pub fn matches(&self, subject: &dyn Matchable) -> bool {
        self.eval(subject, true)
    }

    /// Like [`Matcher::matches`], but regexes only look at the subject's own name
    pub fn matches_shallow(&self, subject: &dyn Matchable) -> bool {
        self.eval(subject, false)
    }

    fn eval(&self, subject: &dyn Matchable, deep: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Regex(re) => {
                re.is_match(subject.name())
                    || (deep && subject.child_names().into_iter().any(|n| re.is_match(n)))
            }
            Self::Labels(selector) => subject.labels().is_none_or(|l| selector.matches(l)),
            Self::All { matchers, empty } => {
                if matchers.is_empty() {
                    *empty
                } else {
                    matchers.iter().all(|m| m.eval(subject, deep))
                }
            }
            Self::Any { matchers, empty } => {
                if matchers.is_empty() {
                    *empty
                } else {
                    matchers.iter().any(|m| m.eval(subject, deep))
                }
            }
            Self::Not { inner, absent } => match inner {
                Some(m) => !m.eval(subject, deep),
                None => *absent,
            },
        }
    }
}

/// Include/exclude rule deciding which containers get tailed
#[derive(Clone, Debug)]
pub struct Admission {
    pub inclusion: Matcher,
    pub exclusion: Matcher,
}

impl Admission {
    pub fn new(inclusion: Matcher, exclusion: Matcher) -> Self {
        Self {
            inclusion,
            exclusion,
        }
    }

    /// Admit everything
    pub fn everything() -> Self {
        Self::new(Matcher::Always, Matcher::Never)
    }

    /// Exclusion at either the pod or the container level always wins.
    ///
    /// The pod is matched on its own name and labels only, so a pattern naming one
    /// container admits that container and not its siblings. The container is matched with
    /// its pod's labels, so a label selector still applies to container-level matches.
    pub fn admits(&self, pod: &PodInfo, container: &ContainerSpec) -> bool {
        let scoped = ContainerOf { pod, container };
        if self.exclusion.matches_shallow(pod) || self.exclusion.matches(&scoped) {
            return false;
        }
        self.inclusion.matches_shallow(pod) || self.inclusion.matches(&scoped)
    }
}
