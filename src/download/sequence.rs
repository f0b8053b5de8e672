//! Template URL parsing and index → URL/filename sequencing.
//!
//! A takeout batch is served as a numbered run of archives behind one URL
//! shape. Given the URL of any file in the batch, [`BatchTemplate`] derives
//! the URL and local filename for every other index. The mapping is a pure
//! function of the template and the index, so rebuilding a task list after a
//! restart reproduces identical URLs.
//!
//! # Example
//!
//! ```
//! use takeout_core::download::BatchTemplate;
//!
//! let template =
//!     BatchTemplate::parse("https://takeout.example.com/takeout-1-001.zip?auth=abc").unwrap();
//! assert_eq!(template.filename_for(2), "takeout-1-002.zip");
//! assert_eq!(
//!     template.url_for(2),
//!     "https://takeout.example.com/takeout-1-002.zip?auth=abc"
//! );
//! ```

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::error::MalformedTemplate;

/// Regex for the batch tail of a template URL path.
///
/// The batch id is everything between `takeout-` and the last dash before
/// the numeric index; greedy matching splits at that last dash, so batch ids
/// containing dashes (export timestamps) survive intact.
#[allow(clippy::expect_used)]
static TEMPLATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<prefix>.*takeout-)(?P<batch>.+)-(?P<index>\d+)(?P<ext>\.[A-Za-z0-9]+)$")
        .expect("template regex is valid") // Static pattern, safe to panic
});

/// Parsed batch template: the fixed URL parts around the file index.
///
/// Construction is the only fallible operation; [`url_for`](Self::url_for)
/// and [`filename_for`](Self::filename_for) are total over `u32` indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTemplate {
    /// URL up to and including `takeout-` (scheme, host, path prefix).
    prefix: String,
    /// Batch identifier between `takeout-` and the index.
    batch_id: String,
    /// File extension including the leading dot.
    extension: String,
    /// Query string without the leading `?`, carried verbatim onto every URL.
    query: Option<String>,
}

impl BatchTemplate {
    /// Parses a template URL into its batch components.
    ///
    /// The URL path must end in `takeout-<batch>-<index><.ext>`; an optional
    /// query string is preserved and re-attached to every generated URL.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedTemplate`] when the URL does not contain the
    /// expected pattern.
    #[tracing::instrument(level = "debug")]
    pub fn parse(template_url: &str) -> Result<Self, MalformedTemplate> {
        // Must be a real absolute URL before the batch tail is considered.
        if url::Url::parse(template_url).is_err() {
            return Err(MalformedTemplate {
                url: template_url.to_string(),
            });
        }

        let (path, query) = match template_url.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (template_url, None),
        };

        let captures = TEMPLATE_PATTERN
            .captures(path)
            .ok_or_else(|| MalformedTemplate {
                url: template_url.to_string(),
            })?;

        let template = Self {
            prefix: captures["prefix"].to_string(),
            batch_id: captures["batch"].to_string(),
            extension: captures["ext"].to_string(),
            query: query.map(str::to_string),
        };

        debug!(
            batch_id = %template.batch_id,
            extension = %template.extension,
            has_query = template.query.is_some(),
            "parsed batch template"
        );

        Ok(template)
    }

    /// Returns the batch identifier embedded in the template.
    #[must_use]
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Returns the source URL for the file at `index` (1-based).
    #[must_use]
    pub fn url_for(&self, index: u32) -> String {
        let mut url = format!(
            "{}{}-{:03}{}",
            self.prefix, self.batch_id, index, self.extension
        );
        if let Some(query) = &self.query {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Returns the deterministic local filename for the file at `index`.
    #[must_use]
    pub fn filename_for(&self, index: u32) -> String {
        format!("takeout-{}-{:03}{}", self.batch_id, index, self.extension)
    }
}
