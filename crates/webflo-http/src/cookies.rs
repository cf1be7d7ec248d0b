//! Cookies and the diff-based cookie jar.
//!
//! A [`CookieJar`] remembers the cookies the request arrived with. At
//! response time [`CookieJar::render`] emits `Set-Cookie` directives only
//! for what changed:
//!
//! | initial | live      | directive                  |
//! |---------|-----------|----------------------------|
//! | `v`     | `v`       | none                       |
//! | `v`/-   | `w`       | `name=w` + live attributes |
//! | `v`     | -         | `name=; Max-Age=0`         |
//!
//! Rendering reconciles the initial snapshot to the live one, so a second
//! render without mutations emits nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::headers::Headers;

/// Value of a cookie attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    /// `true` renders the bare attribute name; `false` omits it.
    Flag(bool),
    /// Rendered as `Name=value`; omitted when empty.
    Text(String),
    /// Rendered as `Name=value`, zero included.
    Number(i64),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Flag(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Number(v)
    }
}

/// A cookie with an ordered bag of camelCase attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    attributes: Vec<(String, AttrValue)>,
}

impl Cookie {
    /// A cookie with no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            attributes: Vec::new(),
        }
    }

    /// The delete directive for `name`.
    pub fn removal(name: impl Into<String>) -> Self {
        Self::new(name, "").max_age(0)
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Attribute by camelCase name.
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Set an attribute, replacing any previous value under the same name.
    #[must_use]
    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name.to_owned(), value)),
        }
        self
    }

    /// `Domain`.
    #[must_use]
    pub fn domain(self, domain: &str) -> Self {
        self.with_attr("domain", domain)
    }

    /// `Path`.
    #[must_use]
    pub fn path(self, path: &str) -> Self {
        self.with_attr("path", path)
    }

    /// `Expires`, as an HTTP date.
    #[must_use]
    pub fn expires(self, date: &str) -> Self {
        self.with_attr("expires", date)
    }

    /// `Max-Age` in seconds.
    #[must_use]
    pub fn max_age(self, secs: i64) -> Self {
        self.with_attr("maxAge", secs)
    }

    /// `Secure`.
    #[must_use]
    pub fn secure(self, on: bool) -> Self {
        self.with_attr("secure", on)
    }

    /// `HttpOnly`.
    #[must_use]
    pub fn http_only(self, on: bool) -> Self {
        self.with_attr("httpOnly", on)
    }

    /// `SameSite` (`Strict`, `Lax` or `None`).
    #[must_use]
    pub fn same_site(self, policy: &str) -> Self {
        self.with_attr("sameSite", policy)
    }

    /// `Partitioned`.
    #[must_use]
    pub fn partitioned(self, on: bool) -> Self {
        self.with_attr("partitioned", on)
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        for (name, value) in &self.attributes {
            let name = attribute_name(name);
            match value {
                AttrValue::Flag(true) => write!(f, "; {name}")?,
                AttrValue::Flag(false) => {}
                AttrValue::Text(text) if text.is_empty() => {}
                AttrValue::Text(text) => write!(f, "; {name}={text}")?,
                AttrValue::Number(n) => write!(f, "; {name}={n}")?,
            }
        }
        Ok(())
    }
}

/// `maxAge` → `Max-Age`, otherwise camelCase → PascalCase.
fn attribute_name(name: &str) -> String {
    if name.eq_ignore_ascii_case("maxage") || name.eq_ignore_ascii_case("max-age") {
        return "Max-Age".to_owned();
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Parse a `Cookie` request header into ordered name/value pairs.
///
/// Fragments without `=` or with an empty name are skipped. Values are
/// trimmed and unquoted.
pub fn parse_cookie_header(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|fragment| {
            let (name, value) = fragment.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Request cookies plus the response-time diff against them.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    initial: BTreeMap<String, String>,
    live: BTreeMap<String, Cookie>,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the cookies of a request.
    ///
    /// When a name repeats, the first occurrence wins.
    pub fn from_headers(headers: &dyn Headers) -> Self {
        let mut jar = Self::new();
        for header in headers.get_all("cookie") {
            for (name, value) in parse_cookie_header(&header) {
                if jar.initial.contains_key(&name) {
                    continue;
                }
                let _ = jar.live.insert(name.clone(), Cookie::new(name.clone(), value.clone()));
                let _ = jar.initial.insert(name, value);
            }
        }
        jar
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.live.get(name).map(Cookie::value)
    }

    /// Current cookie under `name`, attributes included.
    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.live.get(name)
    }

    /// Set or replace a cookie.
    pub fn set(&mut self, cookie: Cookie) {
        let _ = self.live.insert(cookie.name.clone(), cookie);
    }

    /// Remove a cookie. Returns whether it was present.
    pub fn delete(&mut self, name: &str) -> bool {
        self.live.remove(name).is_some()
    }

    /// Forget `name` entirely, initial snapshot included.
    ///
    /// Returns the value the request presented, if any.
    pub fn take_initial(&mut self, name: &str) -> Option<String> {
        let _ = self.live.remove(name);
        self.initial.remove(name)
    }

    /// Names of the live cookies.
    pub fn names(&self) -> Vec<String> {
        self.live.keys().cloned().collect()
    }

    /// Whether live differs from the initial snapshot.
    pub fn is_dirty(&self) -> bool {
        self.live.len() != self.initial.len()
            || self
                .live
                .iter()
                .any(|(name, c)| self.initial.get(name) != Some(&c.value))
    }

    /// Render the pending directives and reconcile initial to live.
    pub fn render(&mut self) -> Vec<String> {
        let names: BTreeSet<&String> = self.initial.keys().chain(self.live.keys()).collect();
        let directives = names
            .into_iter()
            .filter_map(|name| match (self.initial.get(name), self.live.get(name)) {
                (Some(before), Some(after)) if *before == after.value => None,
                (_, Some(after)) => Some(after.to_string()),
                (Some(_), None) => Some(Cookie::removal(name.as_str()).to_string()),
                (None, None) => None,
            })
            .collect();

        self.initial = self
            .live
            .iter()
            .map(|(name, c)| (name.clone(), c.value.clone()))
            .collect();
        directives
    }

    /// Render and append each directive as a `Set-Cookie` header.
    pub fn commit(&mut self, headers: &mut dyn Headers) -> usize {
        let directives = self.render();
        let count = directives.len();
        for directive in directives {
            headers.append("set-cookie", directive);
        }
        count
    }
}
