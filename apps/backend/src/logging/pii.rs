use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Regex patterns used to keep credentials out of logs.
///
/// Each pattern is a vetted literal, so construction cannot fail.
pub struct PiiRegexRegistry;

impl PiiRegexRegistry {
    /// `scheme://user:password@` credentials embedded in a URL
    pub fn url_credentials() -> &'static Regex {
        static URL_CREDENTIALS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
            #[allow(clippy::unwrap_used)]
            Regex::new(r"(?P<prefix>[A-Za-z][A-Za-z0-9+.-]*://[^:/@\s]+):[^@\s]*@").unwrap()
        });
        &URL_CREDENTIALS_REGEX
    }

    /// `password=...` query or keyword/value parameter
    pub fn password_param() -> &'static Regex {
        static PASSWORD_PARAM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
            #[allow(clippy::unwrap_used)]
            Regex::new(r"(?i)(?P<key>\bpassword=)[^&\s]+").unwrap()
        });
        &PASSWORD_PARAM_REGEX
    }
}

/// Mask passwords in connection strings and free-form driver messages.
///
/// User names, hosts and database names are kept so logs stay useful.
pub fn redact(input: &str) -> String {
    let masked = PiiRegexRegistry::url_credentials().replace_all(input, "${prefix}:***@");
    PiiRegexRegistry::password_param()
        .replace_all(&masked, "${key}***")
        .to_string()
}

/// Formats the wrapped string through [`redact`].
pub struct Redacted<'a>(pub &'a str);

impl<'a> fmt::Display for Redacted<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", redact(self.0))
    }
}

impl<'a> fmt::Debug for Redacted<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", redact(self.0))
    }
}
