//! Field annotation grammar.
//!
//! A field annotation is a comma separated list of `key[=value]` tokens:
//!
//! - `pk` marks the primary key
//! - `unique[=group]` adds the field to a unique index, optionally a named compound one
//! - `index[=group]` adds the field to a plain index, optionally a named compound one
//!
//! ```ignore
//! let info = parse_tag("index=user_name,unique=user_email");
//! assert!(info.index && info.unique);
//! assert_eq!(info.index_name, "user_name");
//! assert_eq!(info.unique_name, "user_email");
//! ```
//!
//! Parsing never fails. Keys are case-insensitive, values are trimmed and unknown keys are
//! dropped. Only `,` separates tokens: `"pk;index"` is read as a single unknown key and yields
//! an empty descriptor.

/// Parsed annotation of a single field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInfo {
    /// The field is the primary key.
    pub primary_key: bool,
    /// The field belongs to a unique index.
    pub unique: bool,
    /// Group name of the unique index, empty for a single-field index.
    pub unique_name: String,
    /// The field belongs to a plain index.
    pub index: bool,
    /// Group name of the plain index, empty for a single-field index.
    pub index_name: String,
}

impl TagInfo {
    /// Returns `true` if the annotation declared nothing recognizable.
    pub fn is_empty(&self) -> bool {
        !self.primary_key && !self.unique && !self.index
    }
}

/// Parses a field annotation into a [`TagInfo`].
pub fn parse_tag(tag: &str) -> TagInfo {
    let mut info = TagInfo::default();

    for token in tag
        .trim_matches(|c| matches!(c, ',' | ' ' | ';'))
        .split(',')
    {
        let mut parts = token.split('=');
        let key = parts
            .next()
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        if key.is_empty() {
            continue;
        }

        let value = parts
            .next()
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        match key.as_str() {
            "pk" => info.primary_key = true,
            "unique" => {
                info.unique = true;
                info.unique_name = value;
            }
            "index" => {
                info.index = true;
                info.index_name = value;
            }
            _ => {}
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_tag_is_empty_descriptor() {
        assert_eq!(parse_tag(""), TagInfo::default());
        assert!(parse_tag(" , ;").is_empty());
    }

    #[test]
    fn parses_all_keys() {
        let info = parse_tag("pk, Unique = email_group , INDEX=by_name");

        assert!(info.primary_key);
        assert!(info.unique);
        assert_eq!(info.unique_name, "email_group");
        assert!(info.index);
        assert_eq!(info.index_name, "by_name");
    }

    #[test]
    fn bare_keys_have_no_group() {
        let info = parse_tag("unique,index");

        assert!(info.unique && info.index);
        assert!(info.unique_name.is_empty());
        assert!(info.index_name.is_empty());
        assert!(!info.primary_key);
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let info = parse_tag("omitempty,index,sparse=true");

        assert!(info.index);
        assert!(!info.unique);
    }

    #[test]
    fn surrounding_delimiters_are_trimmed() {
        assert!(parse_tag(";,pk,;").primary_key);
    }

    #[test]
    fn semicolon_separated_tags_are_lost() {
        assert!(parse_tag("pk;index").is_empty());
        // The trailing token still parses, only the glued pair is lost.
        let info = parse_tag("pk;unique,index");
        assert!(info.index);
        assert!(!info.primary_key && !info.unique);
    }

    #[test]
    fn extra_equals_signs_keep_first_value() {
        assert_eq!(parse_tag("index=a=b").index_name, "a");
    }

    fn tokens() -> impl Strategy<Value = Vec<String>> {
        (
            any::<bool>(),
            prop::option::of(prop::option::of("[a-z_]{1,8}")),
            prop::option::of(prop::option::of("[a-z_]{1,8}")),
        )
            .prop_map(|(pk, unique, index)| {
                let mut tokens = Vec::new();
                if pk {
                    tokens.push("pk".to_string());
                }
                if let Some(group) = unique {
                    tokens.push(match group {
                        Some(g) => format!("unique={g}"),
                        None => "unique".to_string(),
                    });
                }
                if let Some(group) = index {
                    tokens.push(match group {
                        Some(g) => format!("index={g}"),
                        None => "index".to_string(),
                    });
                }
                tokens
            })
    }

    proptest! {
        #[test]
        fn descriptor_ignores_token_order_and_key_case(
            (original, shuffled) in tokens().prop_flat_map(|t| (Just(t.clone()), Just(t).prop_shuffle())),
            upper in any::<bool>(),
        ) {
            let recased = shuffled
                .iter()
                .map(|token| match token.split_once('=') {
                    Some((k, v)) if upper => format!("{}={v}", k.to_uppercase()),
                    None if upper => token.to_uppercase(),
                    _ => token.clone(),
                })
                .collect::<Vec<_>>();

            prop_assert_eq!(parse_tag(&original.join(",")), parse_tag(&recased.join(",")));
        }
    }
}
