use serde::{Deserialize, Serialize};

use crate::core::models::{Flags, MessageInfo};

/// Search or filter terms handed to the backend. Backends are free to
/// evaluate these natively; `matches` is the reference semantics for
/// header-only matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub with_flags: Flags,
    pub without_flags: Flags,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    /// Unix timestamps, inclusive start, exclusive end.
    pub start_date: Option<i64>,
    pub end_date: Option<i64>,
    pub search_body: bool,
    pub search_all: bool,
    pub terms: Vec<String>,
}

impl SearchCriteria {
    /// Merge `other` into a new set of criteria. Lists and flags
    /// accumulate; dates from `other` override when present.
    pub fn combine(current: Option<&SearchCriteria>, other: &SearchCriteria) -> SearchCriteria {
        let Some(c) = current else {
            return other.clone();
        };
        let join = |a: &[String], b: &[String]| -> Vec<String> {
            a.iter().chain(b.iter()).cloned().collect()
        };
        SearchCriteria {
            with_flags: c.with_flags | other.with_flags,
            without_flags: c.without_flags | other.without_flags,
            from: join(&c.from, &other.from),
            to: join(&c.to, &other.to),
            cc: join(&c.cc, &other.cc),
            start_date: other.start_date.or(c.start_date),
            end_date: other.end_date.or(c.end_date),
            search_body: c.search_body || other.search_body,
            search_all: c.search_all || other.search_all,
            terms: join(&c.terms, &other.terms),
        }
    }

    /// Header-level match. Body and full-text terms only match against the
    /// subject here.
    pub fn matches(&self, info: &MessageInfo) -> bool {
        if !info.flags.contains(self.with_flags) || info.flags.intersects(self.without_flags) {
            return false;
        }
        let Some(env) = info.envelope.as_ref() else {
            return self.from.is_empty()
                && self.to.is_empty()
                && self.cc.is_empty()
                && self.terms.is_empty()
                && self.start_date.is_none()
                && self.end_date.is_none();
        };
        let any_addr = |needles: &[String], addrs: &[crate::core::models::Address]| {
            needles.iter().all(|n| {
                let n = n.to_lowercase();
                addrs.iter().any(|a| a.to_string().to_lowercase().contains(&n))
            })
        };
        if !any_addr(&self.from, &env.from)
            || !any_addr(&self.to, &env.to)
            || !any_addr(&self.cc, &env.cc)
        {
            return false;
        }
        if self.start_date.is_some_and(|start| env.date < start)
            || self.end_date.is_some_and(|end| env.date >= end)
        {
            return false;
        }
        let subject = env.subject.to_lowercase();
        self.terms
            .iter()
            .all(|t| subject.contains(&t.to_lowercase()))
    }
}
