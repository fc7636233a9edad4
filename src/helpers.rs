//! View helpers: tag builders and text formatting.

use std::fmt;

use chrono::{Local, NaiveDateTime};
use indexmap::IndexMap;

use crate::error::ConfigurationError;
use crate::routing::Router;
use crate::template::renderer::html_escape;

/// Accepted `humanize` input format.
const HUMANIZE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Attribute list shared by the tag builders.
#[derive(Debug, Clone, Default)]
struct Attributes(Vec<(String, String)>);

impl Attributes {
    /// Trailing underscores let callers write reserved words (`class_`).
    fn set(&mut self, name: &str, value: impl fmt::Display) {
        self.0
            .push((name.trim_end_matches('_').to_string(), value.to_string()));
    }

    fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| n == name)
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .0
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", name, value))
            .collect();
        f.write_str(&rendered.join(" "))
    }
}

/// An `<img>` tag.
#[derive(Debug, Clone)]
pub struct Img {
    src: String,
    attribs: Attributes,
}

impl Img {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            attribs: Attributes::default(),
        }
    }

    pub fn set(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.attribs.set(name, value);
        self
    }
}

impl fmt::Display for Img {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut attribs = self.attribs.clone();
        if !attribs.has("alt") {
            attribs.set("alt", &self.src);
        }
        write!(f, "<img src=\"{}\" {} />", self.src, attribs)
    }
}

/// An `<a>` tag. Points at `#` until given a destination.
#[derive(Debug, Clone)]
pub struct Link {
    text: String,
    url: String,
    attribs: Attributes,
}

impl Link {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: "#".to_string(),
            attribs: Attributes::default(),
        }
    }

    pub fn set(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.attribs.set(name, value);
        self
    }

    /// HTML-escape the link text.
    pub fn filter(mut self) -> Self {
        self.text = html_escape(&self.text);
        self
    }

    pub fn to(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Point at a named route.
    pub fn to_route(
        mut self,
        router: &Router,
        name: &str,
        params: &IndexMap<String, String>,
    ) -> Result<Self, ConfigurationError> {
        self.url = router.url_for(name, params)?;
        Ok(self)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<a href=\"{}\" {}>{}</a>", self.url, self.attribs, self.text)
    }
}

/// `"s"` when more than one item is counted.
pub fn plural(count: i64) -> &'static str {
    if count > 1 {
        "s"
    } else {
        ""
    }
}

/// Describe a `YYYY-MM-DD HH:MM:SS` local timestamp relative to now.
///
/// Input that does not parse is returned unchanged.
pub fn humanize(date: &str) -> String {
    match NaiveDateTime::parse_from_str(date, HUMANIZE_FORMAT) {
        Ok(parsed) => humanize_since(parsed, Local::now().naive_local()),
        Err(_) => date.to_string(),
    }
}

fn humanize_since(date: NaiveDateTime, now: NaiveDateTime) -> String {
    let delta = now - date;
    let days = delta.num_days();
    // Sub-day part of the delta, in seconds
    let seconds = delta.num_seconds() - days * 86_400;

    if delta.num_seconds() < 0 {
        return "in the future".to_string();
    }
    if days >= 1 {
        return format!("{} day{} ago", days, plural(days));
    }
    if seconds > 3600 {
        let hours = (seconds as f64 / 3600.0).round() as i64;
        return format!("{} hour{} ago", hours, plural(hours));
    }
    if seconds > 60 {
        let minutes = (seconds as f64 / 60.0).round() as i64;
        return format!("{} minute{} ago", minutes, plural(minutes));
    }
    "just a moment ago".to_string()
}
