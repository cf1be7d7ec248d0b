//! Header access.

/// The header operations sessions and cookie jars need.
///
/// Names compare case-insensitively.
pub trait Headers {
    /// Every value of `name`, in order.
    fn get_all(&self, name: &str) -> Vec<String>;

    /// Append a value for `name`.
    fn append(&mut self, name: &str, value: String);

    /// First value of `name`.
    fn get(&self, name: &str) -> Option<String> {
        self.get_all(name).into_iter().next()
    }

    /// Whether a `Set-Cookie` for `cookie_name` is already present.
    fn has_set_cookie(&self, cookie_name: &str) -> bool {
        self.get_all("set-cookie").iter().any(|header| {
            header
                .split_once('=')
                .is_some_and(|(name, _)| name.trim() == cookie_name)
        })
    }
}

/// Ordered in-memory header list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleHeaders {
    entries: Vec<(String, String)>,
}

impl SimpleHeaders {
    /// Empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.append(name, value.into());
        self
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

impl Headers for SimpleHeaders {
    fn get_all(&self, name: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn append(&mut self, name: &str, value: String) {
        self.entries.push((name.to_ascii_lowercase(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let headers = SimpleHeaders::new().with("Cookie", "a=1").with("COOKIE", "b=2");
        assert_eq!(headers.get_all("cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Cookie").as_deref(), Some("a=1"));
        assert!(headers.get("accept").is_none());
    }

    #[test]
    fn detects_existing_set_cookie() {
        let headers = SimpleHeaders::new().with("Set-Cookie", "__sessid=abc; Path=/");
        assert!(headers.has_set_cookie("__sessid"));
        assert!(!headers.has_set_cookie("__sess"));
    }
}
