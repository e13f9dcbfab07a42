pub mod markers;
pub mod teps;
pub mod value;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use markers::{AttributeKind, Tier};
use teps::{decode_flat, decode_groups, merge_groups, TepGroups, TepMap};
pub use value::AttributeEntry;
use value::{AttributeValue, Verbatim};

/// Everything a document's custom attributes decode into. Each attribute
/// lands in exactly one field, chosen by its code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedAttributes {
    pub teps: TepMap,
    pub additional_teps: TepMap,
    pub tep_groups: TepGroups,
    pub additional_tep_groups: TepGroups,
    pub details: BTreeMap<String, Verbatim>,
}

impl DecodedAttributes {
    fn teps_mut(&mut self, tier: Tier) -> &mut TepMap {
        match tier {
            Tier::Primary => &mut self.teps,
            Tier::Secondary => &mut self.additional_teps,
        }
    }

    fn groups_mut(&mut self, tier: Tier) -> &mut TepGroups {
        match tier {
            Tier::Primary => &mut self.tep_groups,
            Tier::Secondary => &mut self.additional_tep_groups,
        }
    }
}

/// Decode a custom-attribute list. Never fails: malformed pieces are dropped
/// and unknown codes are passed through into `details` unchanged.
pub fn decode(attributes: &[AttributeEntry]) -> DecodedAttributes {
    let mut out = DecodedAttributes::default();

    for attr in attributes {
        let kind = AttributeKind::classify(&attr.code);
        match (kind, AttributeValue::resolve(kind, &attr.value)) {
            (_, AttributeValue::Scalar(value)) => {
                out.details.insert(attr.name.clone(), value.into());
            }
            (Some(AttributeKind::Teps(tier)), AttributeValue::PairList(pairs)) => {
                let teps = decode_flat(&pairs);
                out.teps_mut(tier).extend(teps);
            }
            (Some(AttributeKind::TepGroups(tier)), AttributeValue::GroupList(groups)) => {
                let groups = decode_groups(&groups);
                merge_groups(out.groups_mut(tier), groups);
            }
            (kind, _) => debug!("Attribute {:?} ({:?}) resolved to an unexpected shape", attr.code, kind),
        }
    }

    out
}

/// Parse the detail payload's `customAttributes`, itself a JSON string
/// holding the attribute list. Unreadable input gives an empty list.
pub fn parse_custom_attributes(raw: Option<&Value>) -> Vec<AttributeEntry> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    value::unpack_list(raw)
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<AttributeEntry>(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Skipping malformed custom attribute: {}", e);
                None
            }
        })
        .collect()
}
