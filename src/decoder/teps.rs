use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::markers::Slot;
use super::value::{scalar_text, AttributeEntry, GroupMember, Pair, Verbatim};

pub type TepMap = BTreeMap<String, Verbatim>;
pub type TepGroups = BTreeMap<String, TepMap>;

/// Decode a flat TEP list: every well-formed pair yields `display name -> value`,
/// the value untouched.
pub fn decode_flat(pairs: &[Pair]) -> TepMap {
    let mut teps = TepMap::new();
    for pair in pairs {
        match split_pair(pair) {
            Some((name, value)) => {
                teps.insert(scalar_text(&name.value), value.value.clone().into());
            }
            None => debug!("Dropping TEP entry with {} elements", pair.len()),
        }
    }
    teps
}

/// Work out which element of a pair is the name. Marker placement differs
/// between list variants, so position only decides when neither element or
/// both elements carry the same marker.
fn split_pair(pair: &[AttributeEntry]) -> Option<(&AttributeEntry, &AttributeEntry)> {
    let [a, b] = pair else {
        return None;
    };
    let role = |e: &AttributeEntry| match e.slot() {
        Some(Slot::GroupName) => None,
        other => other,
    };

    Some(match (role(a), role(b)) {
        (Some(Slot::Name), Some(Slot::Name)) | (Some(Slot::Value), Some(Slot::Value)) => (a, b),
        (Some(Slot::Name), _) => (a, b),
        (_, Some(Slot::Name)) => (b, a),
        (Some(Slot::Value), _) => (b, a),
        _ => (a, b),
    })
}

/// Decode TEP groups. Members are buffered until the group's name entry is
/// seen, which may come anywhere in the group. Nameless groups are skipped.
pub fn decode_groups(groups: &[Vec<GroupMember>]) -> TepGroups {
    let mut out = TepGroups::new();
    for group in groups {
        let mut name: Option<&str> = None;
        let mut pending: Vec<TepMap> = Vec::new();

        for member in group {
            match member {
                GroupMember::Name(n) if name.is_none() => name = Some(n.as_str()),
                GroupMember::Name(n) => debug!("Ignoring extra group name {:?}", n),
                GroupMember::Teps(pairs) => pending.push(decode_flat(pairs)),
            }
        }

        match name {
            Some(name) => {
                let target = out.entry(name.to_string()).or_default();
                for teps in pending {
                    target.extend(teps);
                }
            }
            None => warn!("Skipping TEP group without a name ({} members)", pending.len()),
        }
    }
    out
}

/// Same-named groups from different attributes merge, later keys winning.
pub fn merge_groups(into: &mut TepGroups, from: TepGroups) {
    for (name, teps) in from {
        into.entry(name).or_default().extend(teps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text<'a>(teps: &'a TepMap, key: &str) -> Option<&'a str> {
        teps.get(key).and_then(|v| v.0.as_str())
    }

    fn entry(code: &str, value: &str) -> AttributeEntry {
        AttributeEntry {
            code: code.into(),
            name: String::new(),
            value: json!(value),
        }
    }

    fn pair(name: &str, value: &str) -> Pair {
        vec![entry("tepListTepName", name), entry("tepListTepUnitValue", value)]
    }

    #[test]
    fn name_marker_first() {
        let teps = decode_flat(&[pair("Площадь", "1200")]);
        assert_eq!(text(&teps, "Площадь"), Some("1200"));
    }

    #[test]
    fn name_marker_second() {
        let p = vec![entry("tepListTepUnitValue", "1200"), entry("tepListTepName", "Площадь")];
        let teps = decode_flat(&[p]);
        assert_eq!(text(&teps, "Площадь"), Some("1200"));
    }

    #[test]
    fn value_marker_decides() {
        let p = vec![entry("tepGroupsTepListTepValue", "5"), entry("tepGroupsTepListLabel", "Этажность")];
        let teps = decode_flat(&[p]);
        assert_eq!(text(&teps, "Этажность"), Some("5"));
    }

    #[test]
    fn unmarked_pair_is_positional() {
        let teps = decode_flat(&[vec![entry("a", "Name"), entry("b", "Value")]]);
        assert_eq!(text(&teps, "Name"), Some("Value"));
    }

    #[test]
    fn wrong_length_dropped() {
        let one = vec![entry("tepListTepName", "Solo")];
        let three = vec![entry("tepListTepName", "A"), entry("x", "1"), entry("y", "2")];
        let teps = decode_flat(&[one, pair("Kept", "1"), three, Vec::new()]);
        assert_eq!(teps.len(), 1);
        assert!(teps.contains_key("Kept"));
    }

    #[test]
    fn permutations_give_same_map() {
        let pairs = vec![pair("A", "1"), pair("B", "2"), pair("C", "3")];
        let expected = decode_flat(&pairs);
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let permuted: Vec<Pair> = order.iter().map(|&i| pairs[i].clone()).collect();
            assert_eq!(decode_flat(&permuted), expected, "order {:?}", order);
        }
    }

    fn group_teps(name: &str, value: &str) -> GroupMember {
        GroupMember::Teps(vec![vec![
            entry("dopTepGroupsTepListTepName", name),
            entry("dopTepGroupsTepListValue", value),
        ]])
    }

    #[test]
    fn group_name_at_any_position() {
        let members = vec![
            group_teps("Этажность", "9"),
            group_teps("Высота", "30"),
            GroupMember::Name("Корпус 2".into()),
        ];
        for pos in 0..members.len() {
            let mut group = members.clone();
            group.rotate_left(pos);
            let out = decode_groups(&[group]);
            assert_eq!(out.len(), 1, "rotation {}", pos);
            let g = &out["Корпус 2"];
            assert_eq!(text(g, "Этажность"), Some("9"));
            assert_eq!(text(g, "Высота"), Some("30"));
        }
    }

    #[test]
    fn nameless_group_skipped() {
        let out = decode_groups(&[
            vec![group_teps("Orphan", "1")],
            vec![GroupMember::Name("Named".into()), group_teps("Kept", "2")],
        ]);
        assert_eq!(out.len(), 1);
        assert!(out["Named"].contains_key("Kept"));
        assert!(out.values().all(|g| !g.contains_key("Orphan")));
    }

    #[test]
    fn same_named_groups_merge() {
        let out = decode_groups(&[
            vec![GroupMember::Name("G".into()), group_teps("A", "1")],
            vec![group_teps("B", "2"), GroupMember::Name("G".into())],
        ]);
        assert_eq!(out["G"].len(), 2);
    }

    #[test]
    fn values_keep_their_json_type() {
        let p = vec![
            entry("dopTepListTepName", "Количество мест"),
            AttributeEntry {
                code: "dopTepListTepUnitValue".into(),
                name: String::new(),
                value: json!(120),
            },
        ];
        let teps = decode_flat(&[p]);
        assert_eq!(teps["Количество мест"], Verbatim(json!(120)));
    }
}
