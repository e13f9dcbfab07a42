use std::sync::LazyLock;

use regex::Regex;

/// Primary indicators vs. the "dop" (additional) ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
}

/// What an attribute's code says about the shape of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Teps(Tier),
    TepGroups(Tier),
}

/// Role of one element inside a TEP pair or a TEP group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Name,
    Value,
    GroupName,
}

// The marker must be the whole code or follow a non-alphanumeric separator,
// so `dopTepList` never classifies as `tepList`.
static ATTRIBUTE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9])(dopTepList|tepList|dopTepGroups|tepGroups)$").unwrap()
});
static SLOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(TepName|TepValue|GroupName)$").unwrap());

impl AttributeKind {
    pub fn classify(code: &str) -> Option<Self> {
        let caps = ATTRIBUTE_CODE_RE.captures(code.trim())?;
        match &caps[1] {
            "tepList" => Some(AttributeKind::Teps(Tier::Primary)),
            "dopTepList" => Some(AttributeKind::Teps(Tier::Secondary)),
            "tepGroups" => Some(AttributeKind::TepGroups(Tier::Primary)),
            "dopTepGroups" => Some(AttributeKind::TepGroups(Tier::Secondary)),
            _ => None,
        }
    }
}

impl Slot {
    /// Reads the marker suffix off the element's code, falling back to its name.
    pub fn of(code: &str, name: &str) -> Option<Self> {
        Self::from_marker(code).or_else(|| Self::from_marker(name))
    }

    fn from_marker(s: &str) -> Option<Self> {
        let caps = SLOT_RE.captures(s.trim())?;
        match &caps[1] {
            "TepName" => Some(Slot::Name),
            "TepValue" => Some(Slot::Value),
            "GroupName" => Some(Slot::GroupName),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_bare_markers() {
        assert_eq!(AttributeKind::classify("tepList"), Some(AttributeKind::Teps(Tier::Primary)));
        assert_eq!(AttributeKind::classify("dopTepList"), Some(AttributeKind::Teps(Tier::Secondary)));
        assert_eq!(AttributeKind::classify("tepGroups"), Some(AttributeKind::TepGroups(Tier::Primary)));
        assert_eq!(
            AttributeKind::classify("dopTepGroups"),
            Some(AttributeKind::TepGroups(Tier::Secondary))
        );
    }

    #[test]
    fn classifies_scoped_codes() {
        assert_eq!(AttributeKind::classify("rs.tepList"), Some(AttributeKind::Teps(Tier::Primary)));
        assert_eq!(
            AttributeKind::classify("gpzu_dopTepGroups"),
            Some(AttributeKind::TepGroups(Tier::Secondary))
        );
    }

    #[test]
    fn no_substring_false_positives() {
        // Would all match a plain `contains` check.
        assert_eq!(AttributeKind::classify("tepListTepName"), None);
        assert_eq!(AttributeKind::classify("xtepList"), None);
        assert_eq!(AttributeKind::classify("tepGroupsGroupName"), None);
        assert_eq!(AttributeKind::classify("objectName"), None);
        assert_eq!(AttributeKind::classify(""), None);
    }

    #[test]
    fn slots() {
        assert_eq!(Slot::of("tepListTepName", ""), Some(Slot::Name));
        assert_eq!(Slot::of("tepGroupsTepListTepValue", ""), Some(Slot::Value));
        assert_eq!(Slot::of("dopTepGroupsGroupName", ""), Some(Slot::GroupName));
        assert_eq!(Slot::of("", "dopTepListTepName"), Some(Slot::Name));
        assert_eq!(Slot::of("tepListUnit", "Площадь"), None);
    }
}
