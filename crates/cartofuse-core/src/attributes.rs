//! Attribute standardization applied before merging.
//!
//! Wildfire perimeters from different agencies spell the same fact in
//! different ways: years as text or floats, names with placeholder
//! values, causes as agency-specific codes. Normalizing them first lets
//! the merge predicates compare like with like.

use crate::types::{AttrValue, Attributes};

/// Attribute keys holding the three cause levels.
pub const CAUSE_KEYS: [&str; 3] = ["cause1", "cause2", "cause3"];

/// Rules for cleaning a name attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRules {
    /// Lowercase the name before comparing against placeholders.
    pub lowercase: bool,
    /// Names that mean "no name". Matched after normalization.
    pub placeholders: Vec<String>,
}

impl NameRules {
    /// Placeholder spellings seen in agency wildfire data.
    pub const DEFAULT_PLACEHOLDERS: [&'static str; 7] = [
        "unnamed",
        "unnamed fire",
        "noname",
        "unknown",
        "missing",
        "n/a",
        "none",
    ];
}

impl Default for NameRules {
    fn default() -> Self {
        Self {
            lowercase: true,
            placeholders: Self::DEFAULT_PLACEHOLDERS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Normalize the name under `key`.
///
/// Whitespace is trimmed and collapsed, the name is lowercased when the
/// rules say so, and placeholder or empty names become
/// [`AttrValue::Null`] so predicates treat the feature as unnamed.
/// Non-text values are left alone.
pub fn standardize_name(attributes: &mut Attributes, key: &str, rules: &NameRules) {
    let Some(AttrValue::Str(raw)) = attributes.get(key) else {
        return;
    };

    let mut name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if rules.lowercase {
        name = name.to_lowercase();
    }

    let is_placeholder = name.is_empty()
        || rules
            .placeholders
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&name));

    let value = if is_placeholder {
        AttrValue::Null
    } else {
        AttrValue::Str(name)
    };
    attributes.insert(key.to_string(), value);
}

/// Normalize the year under `key` to [`AttrValue::Int`].
///
/// Numeric strings and whole floats are converted. Values that are not a
/// whole number are left as they are.
pub fn standardize_year(attributes: &mut Attributes, key: &str) {
    if let Some(value) = attributes.get_mut(key)
        && let Some(year) = value.as_integer()
    {
        *value = AttrValue::Int(year);
    }
}

/// Remap a single-digit USFS statistical cause code.
fn usfs_code(code: &str) -> Option<&'static str> {
    Some(match code {
        "1" => "lightning",
        "2" => "equipment",
        "3" => "smoking",
        "4" => "campfire",
        "5" => "debris burning",
        "6" => "railroad",
        "7" => "arson",
        "8" => "children",
        "9" => "miscellaneous",
        _ => return None,
    })
}

/// Level-2 cause remapping. `Some(None)` means the cause is unknown.
fn level_two(cause: &str) -> Option<Option<&'static str>> {
    Some(match cause {
        "campfire" => Some("camping"),
        "equipment" => Some("equipment and vehicle use"),
        "children" => Some("misuse of fire by a minor"),
        "5-debris burning" | "debris/open burning" | "debris burning" => {
            Some("debris and open burning")
        }
        "railroad" => Some("railroad operations and maintenance"),
        "firearms and explosives use" | "firearms/weapons" => Some("firearms and weapons"),
        "power generation/transmission/distribution" => Some("utilities"),
        "incindiary" => Some("incendiary"),
        "7-arson" => Some("arson"),
        "undetermined"
        | "miscellaneous"
        | "9 - miscellaneous"
        | "undetermined (remarks required)"
        | "undetermined (remar*"
        | "cause and origin not identified"
        | "investigated but undetermined"
        | "investigated but und"
        | "cause not identified"
        | "0"
        | "10"
        | "14" => None,
        _ => return None,
    })
}

/// Level-1 cause derived from a standardized level-2 cause.
fn level_one(cause: &str) -> Option<&'static str> {
    match cause {
        "human"
        | "equipment and vehicle use"
        | "misuse of fire by a minor"
        | "debris and open burning"
        | "railroad operations and maintenance"
        | "firearms and weapons"
        | "incendiary"
        | "camping"
        | "recreation and ceremony"
        | "arson"
        | "smoking"
        | "utilities"
        | "other human cause"
        | "coal seam" => Some("human"),
        "natural" | "lightning" | "other natural cause" | "volcanic" => Some("natural"),
        _ => None,
    }
}

/// Normalize the `cause1`..`cause3` attributes.
///
/// All three are lowercased. `cause2` has USFS numeric codes expanded and
/// is then mapped onto the standard level-2 vocabulary (unknown causes
/// become null). A missing `cause1` is derived from `cause2` when that
/// maps to a known level-1 cause.
pub fn standardize_causes(attributes: &mut Attributes) {
    for key in CAUSE_KEYS {
        if let Some(AttrValue::Str(s)) = attributes.get_mut(key) {
            *s = s.trim().to_lowercase();
        }
    }

    let [level1_key, level2_key, _] = CAUSE_KEYS;

    if let Some(AttrValue::Str(cause)) = attributes.get(level2_key) {
        let mut cause: Option<String> = Some(usfs_code(cause).map_or_else(|| cause.clone(), String::from));
        if let Some(mapped) = cause.as_deref().and_then(level_two) {
            cause = mapped.map(String::from);
        }
        attributes.insert(
            level2_key.to_string(),
            cause.map_or(AttrValue::Null, AttrValue::Str),
        );
    }

    let level1_missing = attributes.get(level1_key).is_none_or(AttrValue::is_null);
    if level1_missing
        && let Some(derived) = attributes
            .get(level2_key)
            .and_then(AttrValue::as_str)
            .and_then(level_one)
    {
        attributes.insert(level1_key.to_string(), derived.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn name_is_lowercased_and_collapsed() {
        let mut a = attrs(&[("name", "  Camp   Fire ".into())]);
        standardize_name(&mut a, "name", &NameRules::default());
        assert_eq!(a["name"], AttrValue::from("camp fire"));
    }

    #[test]
    fn placeholder_names_become_null() {
        for raw in ["UNKNOWN", "n/a", "Unnamed Fire", "", "   ", "NoName"] {
            let mut a = attrs(&[("name", raw.into())]);
            standardize_name(&mut a, "name", &NameRules::default());
            assert_eq!(a["name"], AttrValue::Null, "{raw:?}");
        }
    }

    #[test]
    fn case_is_kept_when_rules_say_so() {
        let rules = NameRules {
            lowercase: false,
            ..NameRules::default()
        };
        let mut a = attrs(&[("name", "Eagle Glacier".into())]);
        standardize_name(&mut a, "name", &rules);
        assert_eq!(a["name"], AttrValue::from("Eagle Glacier"));
    }

    #[test]
    fn missing_name_is_untouched() {
        let mut a = Attributes::new();
        standardize_name(&mut a, "name", &NameRules::default());
        assert!(a.is_empty());
    }

    #[test]
    fn year_text_and_float_become_int() {
        let mut a = attrs(&[("year", "2018".into())]);
        standardize_year(&mut a, "year");
        assert_eq!(a["year"], AttrValue::Int(2018));

        let mut a = attrs(&[("year", AttrValue::Float(2018.0))]);
        standardize_year(&mut a, "year");
        assert_eq!(a["year"], AttrValue::Int(2018));

        let mut a = attrs(&[("year", "circa 2018".into())]);
        standardize_year(&mut a, "year");
        assert_eq!(a["year"], AttrValue::from("circa 2018"));
    }

    #[test]
    fn usfs_codes_expand_and_derive_level_one() {
        let mut a = attrs(&[("cause2", "4".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::from("camping"));
        assert_eq!(a["cause1"], AttrValue::from("human"));

        let mut a = attrs(&[("cause2", "1".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::from("lightning"));
        assert_eq!(a["cause1"], AttrValue::from("natural"));
    }

    #[test]
    fn level_two_vocabulary_is_standardized() {
        let mut a = attrs(&[("cause2", "Debris/Open Burning".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::from("debris and open burning"));
    }

    #[test]
    fn undetermined_causes_become_null() {
        let mut a = attrs(&[("cause2", "Investigated but Undetermined".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::Null);
        assert!(!a.contains_key("cause1"));

        let mut a = attrs(&[("cause2", "10".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::Null);
    }

    #[test]
    fn existing_level_one_is_kept() {
        let mut a = attrs(&[("cause1", "Natural".into()), ("cause2", "arson".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause1"], AttrValue::from("natural"));
        assert_eq!(a["cause2"], AttrValue::from("arson"));
    }

    #[test]
    fn unknown_level_two_is_kept_without_level_one() {
        let mut a = attrs(&[("cause2", "Fireworks".into())]);
        standardize_causes(&mut a);
        assert_eq!(a["cause2"], AttrValue::from("fireworks"));
        assert!(!a.contains_key("cause1"));
    }
}
