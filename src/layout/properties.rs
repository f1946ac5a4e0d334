//! Property Resolution
//!
//! Properties inherit down the container → row → cell chain: each link may
//! overwrite keys, and a `PropValue::None` on the right never overwrites.
//! Dynamic properties (callables) are carried through the chain untouched and
//! materialized per cell position at render time.

use super::{Length, PropValue, PropertyMap};
use regex::Regex;
use std::sync::OnceLock;

/// Merge a resolution chain left to right. A right-hand key overwrites only
/// when its value is not `None`.
pub fn resolve_chain(chain: &[&PropertyMap]) -> PropertyMap {
    let mut resolved = PropertyMap::new();
    for map in chain {
        for (key, value) in map.iter() {
            if value.is_none() {
                continue;
            }
            resolved.insert(key.clone(), value.clone());
        }
    }
    resolved
}

/// Resolve `align` through the chain with a per-property default.
pub fn resolve_align(chain: &[&PropertyMap], default: &str) -> PropValue {
    resolve_key(chain, "align").unwrap_or_else(|| PropValue::Str(default.to_string()))
}

/// Resolve `inset` through the chain with a per-property default.
pub fn resolve_inset(chain: &[&PropertyMap], default: &str) -> PropValue {
    resolve_key(chain, "inset").unwrap_or_else(|| PropValue::Str(default.to_string()))
}

fn resolve_key(chain: &[&PropertyMap], key: &str) -> Option<PropValue> {
    let mut found = None;
    for map in chain {
        if let Some(v) = map.get(key) {
            if !v.is_none() {
                found = Some(v.clone());
            }
        }
    }
    found
}

/// True iff the value is a callable.
pub fn is_dynamic(value: &PropValue) -> bool {
    matches!(value, PropValue::Dynamic(_))
}

/// Partition a map into (static, dynamic) halves.
pub fn separate_static_dynamic(props: &PropertyMap) -> (PropertyMap, PropertyMap) {
    let mut statics = PropertyMap::new();
    let mut dynamics = PropertyMap::new();
    for (key, value) in props {
        if is_dynamic(value) {
            dynamics.insert(key.clone(), value.clone());
        } else {
            statics.insert(key.clone(), value.clone());
        }
    }
    (statics, dynamics)
}

/// Materialize every dynamic property at `(x, y)`. Static values pass
/// through unchanged.
pub fn evaluate_dynamic(props: &PropertyMap, x: u32, y: u32) -> PropertyMap {
    props
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                PropValue::Dynamic(f) => f(x, y),
                other => other.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

fn length_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(-?\d+(?:\.\d+)?)(pt|cm|mm|in|%|fr|em)$").expect("valid length pattern")
    })
}

/// Parse `<number><unit>` or `auto` into a [`Length`].
pub fn parse_length(input: &str) -> Option<Length> {
    let trimmed = input.trim();
    if trimmed == "auto" {
        return Some(Length::Auto);
    }
    let caps = length_regex().captures(trimmed)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(match caps.get(2)?.as_str() {
        "pt" => Length::Pt(value),
        "cm" => Length::Cm(value),
        "mm" => Length::Mm(value),
        "in" => Length::In(value),
        "%" => Length::Percent(value),
        "fr" => Length::Fr(value),
        "em" => Length::Em(value),
        _ => return None,
    })
}

/// Parse and normalize: absolute units convert to points, relative units are
/// preserved as tagged values.
pub fn normalize_length(input: &str) -> Option<Length> {
    let length = parse_length(input)?;
    Some(match length.to_points() {
        Some(pts) => Length::Pt(pts),
        None => length,
    })
}

/// Default properties for each container kind, per the IR contract.
pub fn grid_defaults() -> PropertyMap {
    let mut map = PropertyMap::new();
    map.insert("rows".to_string(), PropValue::from("auto"));
    map.insert("gutter".to_string(), PropValue::Int(0));
    map.insert("align".to_string(), PropValue::from("start"));
    map.insert("inset".to_string(), PropValue::Int(0));
    map.insert("fill".to_string(), PropValue::from("none"));
    map.insert("stroke".to_string(), PropValue::from("none"));
    map
}

pub fn table_defaults() -> PropertyMap {
    let mut map = grid_defaults();
    map.insert("stroke".to_string(), PropValue::from("1pt"));
    map.insert("inset".to_string(), PropValue::from("5pt"));
    map
}

pub fn stack_defaults() -> PropertyMap {
    let mut map = PropertyMap::new();
    map.insert("dir".to_string(), PropValue::from("ttb"));
    map.insert("spacing".to_string(), PropValue::Int(0));
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn map(pairs: &[(&str, PropValue)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_chain_rightmost_wins() {
        let defaults = map(&[("fill", PropValue::from("none")), ("inset", PropValue::Int(0))]);
        let container = map(&[("fill", PropValue::from("#eeeeee"))]);
        let row = map(&[("inset", PropValue::from("2pt"))]);
        let cell = map(&[("fill", PropValue::from("#ff0000"))]);

        let resolved = resolve_chain(&[&defaults, &container, &row, &cell]);
        assert_eq!(resolved.get("fill"), Some(&PropValue::from("#ff0000")));
        assert_eq!(resolved.get("inset"), Some(&PropValue::from("2pt")));
    }

    #[test]
    fn test_none_never_overrides() {
        let container = map(&[("fill", PropValue::from("#eeeeee"))]);
        let cell = map(&[("fill", PropValue::None)]);

        let resolved = resolve_chain(&[&container, &cell]);
        assert_eq!(resolved.get("fill"), Some(&PropValue::from("#eeeeee")));
    }

    #[test]
    fn test_align_and_inset_defaults() {
        let empty = PropertyMap::new();
        assert_eq!(resolve_align(&[&empty], "start"), PropValue::from("start"));
        assert_eq!(resolve_inset(&[&empty], "5pt"), PropValue::from("5pt"));

        let cell = map(&[("align", PropValue::from("right"))]);
        assert_eq!(resolve_align(&[&empty, &cell], "start"), PropValue::from("right"));
    }

    #[test]
    fn test_separate_static_dynamic() {
        let dynamic: super::super::DynamicProp = Arc::new(|_, _| PropValue::from("#ffffff"));
        let props = map(&[
            ("fill", PropValue::Dynamic(dynamic)),
            ("inset", PropValue::from("2pt")),
        ]);

        let (statics, dynamics) = separate_static_dynamic(&props);
        assert_eq!(statics.len(), 1);
        assert!(statics.contains_key("inset"));
        assert_eq!(dynamics.len(), 1);
        assert!(is_dynamic(&dynamics["fill"]));
    }

    #[test]
    fn test_evaluate_dynamic_materializes_at_position() {
        let zebra: super::super::DynamicProp = Arc::new(|_, y| {
            if y % 2 == 0 {
                PropValue::from("#ffffff")
            } else {
                PropValue::from("#f0f0f0")
            }
        });
        let props = map(&[
            ("fill", PropValue::Dynamic(zebra)),
            ("inset", PropValue::from("2pt")),
        ]);

        let even = evaluate_dynamic(&props, 0, 2);
        assert_eq!(even.get("fill"), Some(&PropValue::from("#ffffff")));
        let odd = evaluate_dynamic(&props, 0, 3);
        assert_eq!(odd.get("fill"), Some(&PropValue::from("#f0f0f0")));
        assert_eq!(odd.get("inset"), Some(&PropValue::from("2pt")));
    }

    #[test]
    fn test_parse_length_units() {
        assert_eq!(parse_length("2pt"), Some(Length::Pt(2.0)));
        assert_eq!(parse_length("1.5cm"), Some(Length::Cm(1.5)));
        assert_eq!(parse_length("10mm"), Some(Length::Mm(10.0)));
        assert_eq!(parse_length("1in"), Some(Length::In(1.0)));
        assert_eq!(parse_length("50%"), Some(Length::Percent(50.0)));
        assert_eq!(parse_length("2fr"), Some(Length::Fr(2.0)));
        assert_eq!(parse_length("1.2em"), Some(Length::Em(1.2)));
        assert_eq!(parse_length("auto"), Some(Length::Auto));
        assert_eq!(parse_length("-3pt"), Some(Length::Pt(-3.0)));
        assert_eq!(parse_length("12"), None);
        assert_eq!(parse_length("12px"), None);
    }

    #[test]
    fn test_normalize_absolute_to_points() {
        assert_eq!(normalize_length("1in"), Some(Length::Pt(72.0)));
        assert_eq!(normalize_length("1cm"), Some(Length::Pt(28.3465)));
        assert_eq!(normalize_length("1mm"), Some(Length::Pt(2.83465)));
        // Relative units stay tagged.
        assert_eq!(normalize_length("2fr"), Some(Length::Fr(2.0)));
        assert_eq!(normalize_length("50%"), Some(Length::Percent(50.0)));
    }

    #[test]
    fn test_container_defaults() {
        let grid = grid_defaults();
        assert_eq!(grid.get("stroke"), Some(&PropValue::from("none")));
        assert_eq!(grid.get("inset"), Some(&PropValue::Int(0)));

        let table = table_defaults();
        assert_eq!(table.get("stroke"), Some(&PropValue::from("1pt")));
        assert_eq!(table.get("inset"), Some(&PropValue::from("5pt")));

        let stack = stack_defaults();
        assert_eq!(stack.get("dir"), Some(&PropValue::from("ttb")));
    }
}
