//! Property-based tests for the configuration editor.

#![cfg(test)]

use proptest::prelude::*;

use crate::ConfigDocument;

// =============================================================================
// Generators
// =============================================================================

fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_.-]{0,11}"
}

fn arb_value() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "[a-zA-Z0-9/._:-]{1,24}",
        "[a-zA-Z0-9]{1,8} [a-zA-Z0-9]{1,8}",
    ]
}

/// Documents mixing comments, blank lines, root entries, sections and
/// malformed headers.
fn arb_document() -> impl Strategy<Value = String> {
    let line = prop_oneof![
        Just(String::new()),
        Just("# comment".to_string()),
        Just("[unterminated".to_string()),
        arb_name().prop_map(|name| format!("[{}]", name)),
        (arb_name(), arb_value()).prop_map(|(k, v)| format!("{} = {}", k, v)),
        (arb_name(), arb_value()).prop_map(|(k, v)| format!("  {}={}", k, v)),
    ];
    (prop::collection::vec(line, 0..16), any::<bool>()).prop_map(|(lines, newline)| {
        let mut text = lines.join("\n");
        if newline && !text.is_empty() {
            text.push('\n');
        }
        text
    })
}

fn arb_section() -> impl Strategy<Value = Option<String>> {
    prop::option::of(arb_name())
}

fn flip_case(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_lowercase() {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Parsing and rendering without edits reproduces the input.
    #[test]
    fn prop_parse_render_identity(text in arb_document()) {
        prop_assert_eq!(ConfigDocument::parse(&text).to_string(), text);
    }

    /// A written value reads back, and writing it again changes nothing.
    #[test]
    fn prop_set_get_roundtrip(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
        value in arb_value(),
    ) {
        let mut doc = ConfigDocument::parse(&text);
        doc.set(section.as_deref(), &key, Some(&value)).unwrap();
        prop_assert_eq!(doc.get(section.as_deref(), &key), Some(value.as_str()));

        let rendered = doc.to_string();
        prop_assert!(!doc.set(section.as_deref(), &key, Some(&value)).unwrap());
        prop_assert_eq!(doc.to_string(), rendered);
    }

    /// Values that would not read back unchanged are refused without
    /// touching the document.
    #[test]
    fn prop_padded_value_rejected(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
        value in arb_value(),
        pad in prop_oneof![Just(" "), Just("\t")],
        leading in any::<bool>(),
    ) {
        let mut doc = ConfigDocument::parse(&text);
        let padded = if leading {
            format!("{}{}", pad, value)
        } else {
            format!("{}{}", value, pad)
        };
        prop_assert!(doc.set(section.as_deref(), &key, Some(&padded)).is_err());
        prop_assert_eq!(doc.to_string(), text);
    }

    /// The rendered output of an edited document parses to the same values.
    #[test]
    fn prop_edit_survives_reparse(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
        value in arb_value(),
    ) {
        let mut doc = ConfigDocument::parse(&text);
        doc.set(section.as_deref(), &key, Some(&value)).unwrap();
        let reparsed = ConfigDocument::parse(&doc.to_string());
        prop_assert_eq!(reparsed.get(section.as_deref(), &key), Some(value.as_str()));
    }

    /// Lookups ignore ASCII case of both section and key.
    #[test]
    fn prop_lookup_case_insensitive(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
    ) {
        let doc = ConfigDocument::parse(&text);
        let flipped_section = section.as_deref().map(flip_case);
        prop_assert_eq!(
            doc.get(section.as_deref(), &key),
            doc.get(flipped_section.as_deref(), &flip_case(&key))
        );
    }

    /// Deleting removes the key; deleting again reports no change.
    #[test]
    fn prop_delete_removes(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
    ) {
        let mut doc = ConfigDocument::parse(&text);
        let was_present = doc.get(section.as_deref(), &key).is_some();

        prop_assert_eq!(doc.set(section.as_deref(), &key, None).unwrap(), was_present);
        prop_assert_eq!(doc.get(section.as_deref(), &key), None);
        prop_assert!(!doc.set(section.as_deref(), &key, None).unwrap());
    }

    /// Editing one key leaves every other key's value untouched.
    #[test]
    fn prop_set_isolated(
        text in arb_document(),
        section in arb_section(),
        key in arb_name(),
        value in arb_value(),
        other_section in arb_section(),
        other_key in arb_name(),
    ) {
        prop_assume!(
            !key.eq_ignore_ascii_case(&other_key)
                || section.as_deref().map(str::to_ascii_lowercase)
                    != other_section.as_deref().map(str::to_ascii_lowercase)
        );

        let mut doc = ConfigDocument::parse(&text);
        let before = doc.get(other_section.as_deref(), &other_key).map(str::to_string);
        doc.set(section.as_deref(), &key, Some(&value)).unwrap();
        prop_assert_eq!(doc.get(other_section.as_deref(), &other_key).map(str::to_string), before);
    }
}
