//! Property-based tests for key derivation and statement splitting (proptest).

use proptest::prelude::*;

use quackdb::key::{DIGEST_HEX_LEN, KEY_NAMESPACE};
use quackdb::{derive_key, normalize_sql, split_statements, CacheKey};

proptest! {
    #[test]
    fn key_is_deterministic(sql in ".*") {
        prop_assert_eq!(derive_key(&sql), derive_key(&sql));
    }

    #[test]
    fn key_has_namespace_and_hex_digest(sql in ".*") {
        let key = derive_key(&sql);
        let raw = key.as_str();
        prop_assert!(raw.starts_with(KEY_NAMESPACE));
        prop_assert_eq!(raw.len(), KEY_NAMESPACE.len() + DIGEST_HEX_LEN);
        prop_assert!(key
            .digest()
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        prop_assert_eq!(CacheKey::parse(raw), Some(key.clone()));
    }

    #[test]
    fn distinct_text_gives_distinct_keys(a in ".*", b in ".*") {
        prop_assume!(a != b);
        prop_assert_ne!(derive_key(&a), derive_key(&b));
    }

    #[test]
    fn trailing_whitespace_changes_raw_key(sql in "[A-Za-z0-9 ]{1,40}") {
        let padded = format!("{sql} ");
        prop_assert_ne!(derive_key(&sql), derive_key(&padded));
    }

    #[test]
    fn normalization_is_idempotent(sql in ".*") {
        let once = normalize_sql(&sql);
        prop_assert_eq!(normalize_sql(once), once);
    }

    #[test]
    fn normalized_variants_share_a_key(sql in "[A-Za-z0-9(),*]([A-Za-z0-9(),* ]{0,30}[A-Za-z0-9(),*])?") {
        let variant = format!("  \n{sql} ;; \n");
        prop_assert_eq!(
            derive_key(normalize_sql(&sql)),
            derive_key(normalize_sql(&variant))
        );
    }

    #[test]
    fn splitter_never_yields_empty_statements(sql in ".*") {
        for statement in split_statements(&sql) {
            prop_assert!(!statement.is_empty());
            prop_assert_eq!(statement, statement.trim());
        }
    }

    #[test]
    fn splitter_recovers_plain_statements(
        parts in prop::collection::vec("SELECT [a-z]{1,8}", 1..6)
    ) {
        let sql = parts.join(";\n");
        let split = split_statements(&sql);
        prop_assert_eq!(split, parts.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn quoted_semicolons_do_not_split(body in "[a-z;]{0,20}") {
        let sql = format!("SELECT '{body}' AS s");
        prop_assert_eq!(split_statements(&sql), vec![sql.as_str()]);
    }

    #[test]
    fn escape_string_semicolons_do_not_split(body in r"([a-z;]|\\'|\\\\){0,20}") {
        let sql = format!("SELECT E'{body}' AS s");
        prop_assert_eq!(split_statements(&sql), vec![sql.as_str()]);
    }
}
