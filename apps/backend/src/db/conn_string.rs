//! Connection-string rewriting applied before any strategy sees the URL.
//!
//! Only the query string is touched. Parameters are edited as `key=value`
//! pairs so that removing the first one never leaves a dangling `&`.

use crate::config::db::RuntimeEnv;

/// Breaks SCRAM negotiation on some hosted providers.
const CHANNEL_BINDING: &str = "channel_binding";
const SSLMODE: &str = "sslmode";

struct ConnString<'a> {
    base: &'a str,
    params: Vec<(String, Option<String>)>,
}

impl<'a> ConnString<'a> {
    fn parse(url: &'a str) -> Self {
        let (base, query) = match url.split_once('?') {
            Some((base, query)) => (base, query),
            None => (url, ""),
        };
        let params = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (pair.to_string(), None),
            })
            .collect();
        Self { base, params }
    }

    fn remove(&mut self, key: &str) {
        self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    fn set(&mut self, key: &str, value: &str) {
        self.remove(key);
        self.params.push((key.to_string(), Some(value.to_string())));
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_deref())
    }

    fn render(&self) -> String {
        if self.params.is_empty() {
            return self.base.to_string();
        }
        let query = self
            .params
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.clone(),
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.base, query)
    }
}

/// Drop `channel_binding` from the query string.
pub fn normalize(url: &str) -> String {
    let mut parsed = ConnString::parse(url);
    parsed.remove(CHANNEL_BINDING);
    parsed.render()
}

/// Normalize and, in production, relax `sslmode=require` to `sslmode=prefer`.
pub fn ssl_permissive(url: &str, env: RuntimeEnv) -> String {
    let mut parsed = ConnString::parse(url);
    parsed.remove(CHANNEL_BINDING);
    if env.is_production() && parsed.get(SSLMODE) == Some("require") {
        parsed.set(SSLMODE, "prefer");
    }
    parsed.render()
}

/// Normalize, strip every `sslmode` and force `sslmode=disable`.
pub fn no_ssl(url: &str) -> String {
    let mut parsed = ConnString::parse(url);
    parsed.remove(CHANNEL_BINDING);
    parsed.set(SSLMODE, "disable");
    parsed.render()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_normalize_removes_leading_channel_binding() {
        assert_eq!(
            normalize("postgres://u:p@host/db?channel_binding=require&sslmode=require"),
            "postgres://u:p@host/db?sslmode=require"
        );
    }

    #[test]
    fn test_normalize_removes_trailing_channel_binding() {
        assert_eq!(
            normalize("postgres://u:p@host/db?sslmode=require&channel_binding=require"),
            "postgres://u:p@host/db?sslmode=require"
        );
    }

    #[test]
    fn test_normalize_drops_empty_query() {
        assert_eq!(
            normalize("postgres://u:p@host/db?channel_binding=require"),
            "postgres://u:p@host/db"
        );
    }

    #[test]
    fn test_normalize_without_query_is_identity() {
        assert_eq!(normalize("postgres://u:p@host:5432/db"), "postgres://u:p@host:5432/db");
    }

    #[test]
    fn test_ssl_permissive_only_relaxes_in_production() {
        let url = "postgres://u:p@host/db?sslmode=require";
        assert_eq!(
            ssl_permissive(url, RuntimeEnv::Production),
            "postgres://u:p@host/db?sslmode=prefer"
        );
        assert_eq!(ssl_permissive(url, RuntimeEnv::Development), url);
    }

    #[test]
    fn test_ssl_permissive_leaves_verify_modes_alone() {
        let url = "postgres://u:p@host/db?sslmode=verify-full";
        assert_eq!(ssl_permissive(url, RuntimeEnv::Production), url);
    }

    #[test]
    fn test_no_ssl_replaces_every_sslmode() {
        assert_eq!(
            no_ssl("postgres://u:p@host/db?sslmode=require&application_name=x&sslmode=prefer"),
            "postgres://u:p@host/db?application_name=x&sslmode=disable"
        );
    }

    #[test]
    fn test_no_ssl_appends_to_bare_url() {
        assert_eq!(
            no_ssl("postgres://u:p@host/db"),
            "postgres://u:p@host/db?sslmode=disable"
        );
    }

    proptest! {
        #[test]
        fn prop_channel_binding_never_survives(
            keys in proptest::collection::vec("[a-z_]{1,12}", 0..5),
            position in 0usize..6,
        ) {
            let mut params: Vec<String> = keys.iter().map(|k| format!("{k}=v")).collect();
            let at = position.min(params.len());
            params.insert(at, "channel_binding=require".to_string());
            let url = format!("postgres://u:p@host/db?{}", params.join("&"));

            for env in [RuntimeEnv::Production, RuntimeEnv::Development] {
                prop_assert!(!normalize(&url).contains("channel_binding"));
                prop_assert!(!ssl_permissive(&url, env).contains("channel_binding"));
            }
            let stripped = no_ssl(&url);
            prop_assert!(!stripped.contains("channel_binding"));
            prop_assert!(!stripped.contains("?&"));
            prop_assert!(!stripped.contains("&&"));
            prop_assert!(stripped.ends_with("sslmode=disable"));
        }
    }
}
