use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::models::{Flags, MessageInfo, Uid};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortField {
    Arrival,
    Cc,
    Date,
    From,
    Read,
    Size,
    Subject,
    To,
    Flagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: SortField,
    pub reverse: bool,
}

/// Parse the `sort` option, e.g. `["-r", "date", "subject"]`. A `-r`
/// reverses the criterion that follows it.
pub fn parse_criteria<S: AsRef<str>>(args: &[S]) -> Result<Vec<SortCriterion>, ConfigError> {
    let mut criteria = Vec::new();
    let mut reverse = false;
    for arg in args {
        let arg = arg.as_ref();
        if arg == "-r" {
            reverse = true;
            continue;
        }
        criteria.push(SortCriterion {
            field: parse_field(arg)?,
            reverse,
        });
        reverse = false;
    }
    if reverse {
        return Err(ConfigError::InvalidSort("expected argument to reverse".into()));
    }
    Ok(criteria)
}

fn parse_field(arg: &str) -> Result<SortField, ConfigError> {
    match arg.to_lowercase().as_str() {
        "arrival" => Ok(SortField::Arrival),
        "cc" => Ok(SortField::Cc),
        "date" => Ok(SortField::Date),
        "from" => Ok(SortField::From),
        "read" => Ok(SortField::Read),
        "size" => Ok(SortField::Size),
        "subject" => Ok(SortField::Subject),
        "to" => Ok(SortField::To),
        "flagged" => Ok(SortField::Flagged),
        other => Err(ConfigError::InvalidSort(other.to_string())),
    }
}

fn first_address(list: &[crate::core::models::Address]) -> String {
    list.first()
        .map(|a| a.email.to_lowercase())
        .unwrap_or_default()
}

fn compare_field(field: SortField, a: &MessageInfo, b: &MessageInfo) -> Ordering {
    let env_a = a.envelope.as_ref();
    let env_b = b.envelope.as_ref();
    match field {
        SortField::Arrival => a.internal_date.cmp(&b.internal_date),
        SortField::Date => env_a.map(|e| e.date).cmp(&env_b.map(|e| e.date)),
        SortField::Subject => a.subject().to_lowercase().cmp(&b.subject().to_lowercase()),
        SortField::Size => a.size.cmp(&b.size),
        SortField::Read => a
            .flags
            .contains(Flags::SEEN)
            .cmp(&b.flags.contains(Flags::SEEN)),
        SortField::Flagged => a
            .flags
            .contains(Flags::FLAGGED)
            .cmp(&b.flags.contains(Flags::FLAGGED)),
        SortField::From => first_address(env_a.map_or(&[], |e| &e.from))
            .cmp(&first_address(env_b.map_or(&[], |e| &e.from))),
        SortField::To => first_address(env_a.map_or(&[], |e| &e.to))
            .cmp(&first_address(env_b.map_or(&[], |e| &e.to))),
        SortField::Cc => first_address(env_a.map_or(&[], |e| &e.cc))
            .cmp(&first_address(env_b.map_or(&[], |e| &e.cc))),
    }
}

/// Client-side sort for backends that cannot sort. The sort is stable and
/// messages whose headers are not fetched yet keep their relative position
/// at the end of the list.
pub fn sort_uids(
    uids: &mut [Uid],
    messages: &HashMap<Uid, Option<MessageInfo>>,
    criteria: &[SortCriterion],
) {
    if criteria.is_empty() {
        return;
    }
    uids.sort_by(|a, b| {
        let ia = messages.get(a).and_then(Option::as_ref);
        let ib = messages.get(b).and_then(Option::as_ref);
        match (ia, ib) {
            (Some(ia), Some(ib)) => {
                for c in criteria {
                    let mut ord = compare_field(c.field, ia, ib);
                    if c.reverse {
                        ord = ord.reverse();
                    }
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// True when going from `old` to `new` can move the message under
/// `criteria`.
pub fn sort_key_changed(
    old: Option<&MessageInfo>,
    new: &MessageInfo,
    criteria: &[SortCriterion],
) -> bool {
    let Some(old) = old else {
        return !criteria.is_empty();
    };
    criteria
        .iter()
        .any(|c| compare_field(c.field, old, new) != Ordering::Equal)
}

/// Reorder `to_sort` so that it follows the order of `order`. Items not in
/// `order` go first, in their current relative order.
pub fn sort_by_order<T>(to_sort: &mut [T], order: &[T])
where
    T: Eq + std::hash::Hash + Clone,
{
    let index: HashMap<T, usize> = order
        .iter()
        .enumerate()
        .map(|(i, v)| (v.clone(), i))
        .collect();
    to_sort.sort_by_key(|v| index.get(v).map_or(0, |i| i + 1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Envelope;

    fn msg(uid: u32, subject: &str, date: i64) -> MessageInfo {
        MessageInfo {
            uid: Uid(uid),
            envelope: Some(Envelope {
                subject: subject.into(),
                date,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn parse_reverse_applies_to_next() {
        let c = parse_criteria(&["-r", "date", "subject"]).unwrap();
        assert_eq!(
            c,
            vec![
                SortCriterion {
                    field: SortField::Date,
                    reverse: true
                },
                SortCriterion {
                    field: SortField::Subject,
                    reverse: false
                },
            ]
        );
    }

    #[test]
    fn parse_rejects_dangling_reverse_and_unknown() {
        assert!(parse_criteria(&["date", "-r"]).is_err());
        assert!(parse_criteria(&["bogus"]).is_err());
    }

    #[test]
    fn client_sort_puts_unfetched_last() {
        let mut messages = HashMap::new();
        messages.insert(Uid(1), Some(msg(1, "b", 30)));
        messages.insert(Uid(2), None);
        messages.insert(Uid(3), Some(msg(3, "a", 10)));
        let mut uids = vec![Uid(1), Uid(2), Uid(3)];
        let criteria = parse_criteria(&["date"]).unwrap();
        sort_uids(&mut uids, &messages, &criteria);
        assert_eq!(uids, vec![Uid(3), Uid(1), Uid(2)]);
    }

    #[test]
    fn key_change_detection() {
        let criteria = parse_criteria(&["subject"]).unwrap();
        let old = msg(1, "a", 1);
        let mut new = old.clone();
        new.flags = Flags::SEEN;
        assert!(!sort_key_changed(Some(&old), &new, &criteria));
        new.envelope = Some(Envelope {
            subject: "z".into(),
            ..Default::default()
        });
        assert!(sort_key_changed(Some(&old), &new, &criteria));
    }

    #[test]
    fn order_by_reference_list() {
        let mut v = vec!["c", "a", "x", "b"];
        sort_by_order(&mut v, &["a", "b", "c"]);
        assert_eq!(v, vec!["x", "a", "b", "c"]);
    }
}
