//! EventBridge "ECR Image Action" events
//!
//! ```
//! use soci_indexer::event::{ImageActionEvent, TagFilters};
//!
//! let event = ImageActionEvent::from_slice(br#"{
//!     "source": "aws.ecr",
//!     "detail-type": "ECR Image Action",
//!     "account": "123456789012",
//!     "region": "us-east-1",
//!     "detail": {
//!         "result": "SUCCESS",
//!         "repository-name": "app",
//!         "image-digest": "sha256:978f5f8049d3d0de30a7fc3892aafdfb323451bf682170d99154230ddefbe91e",
//!         "action-type": "PUSH",
//!         "image-tag": "v1"
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(
//!     event.image_name().unwrap().to_string(),
//!     "123456789012.dkr.ecr.us-east-1.amazonaws.com/app@sha256:978f5f8049d3d0de30a7fc3892aafdfb323451bf682170d99154230ddefbe91e"
//! );
//! let filters = TagFilters::parse("app:v*,other:*").unwrap();
//! assert_eq!(event.matching_filter(&filters), Some("app:v*"));
//! ```

use crate::{distribution::Reference, error::*, Digest, ImageName};
use regex::Regex;
use serde::Deserialize;

pub const EVENT_SOURCE: &str = "aws.ecr";
pub const DETAIL_TYPE: &str = "ECR Image Action";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageActionEvent {
    pub source: String,
    pub detail_type: String,
    pub account: String,
    pub region: String,
    pub detail: ImageActionDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageActionDetail {
    pub repository_name: String,
    pub image_digest: String,
    #[serde(default)]
    pub image_tag: String,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
}

impl ImageActionEvent {
    /// Parse and check the event is an image action of ECR
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        let event: Self =
            serde_json::from_slice(buf).map_err(|e| Error::InvalidEvent(e.to_string()))?;
        if event.source != EVENT_SOURCE || event.detail_type != DETAIL_TYPE {
            return Err(Error::InvalidEvent(
                "Wrong event source or detail type".to_string(),
            ));
        }
        if event.detail.repository_name.is_empty() || event.detail.image_digest.is_empty() {
            return Err(Error::InvalidEvent(
                "repository name and image digest cannot be empty".to_string(),
            ));
        }
        Ok(event)
    }

    /// Image pushed, addressed by its digest
    pub fn image_name(&self) -> Result<ImageName> {
        let domain = if self.region.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        };
        let registry = format!("{}.dkr.ecr.{}.{}", self.account, self.region, domain);
        let digest = Digest::new(&self.detail.image_digest)?;
        Ok(ImageName::parse(&format!("{}/{}", registry, self.detail.repository_name))?
            .with_reference(Reference::Digest(digest)))
    }

    /// First filter matching `<repository>:<tag>` of this event
    pub fn matching_filter<'a>(&self, filters: &'a TagFilters) -> Option<&'a str> {
        filters.matching(&self.detail.repository_name, &self.detail.image_tag)
    }
}

/// Comma separated shell-style patterns on `<repository>:<tag>`
///
/// `*` matches any string, `?` any character, `[...]` and `[!...]` a
/// character in or not in the set.
#[derive(Debug, Clone)]
pub struct TagFilters {
    filters: Vec<(String, Regex)>,
}

impl TagFilters {
    pub fn parse(filters: &str) -> Result<Self> {
        let filters = filters
            .split(',')
            .map(|pattern| {
                let re = Regex::new(&glob_to_regex(pattern))
                    .map_err(|e| Error::InvalidFilter(format!("{}: {}", pattern, e)))?;
                Ok((pattern.to_string(), re))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TagFilters { filters })
    }

    pub fn matching(&self, repository: &str, tag: &str) -> Option<&str> {
        let target = format!("{}:{}", repository, tag);
        self.filters
            .iter()
            .find(|(_, re)| re.is_match(&target))
            .map(|(pattern, _)| pattern.as_str())
    }
}

/// Translate a shell pattern into a regex matching the whole input
fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // `]` right after `[` or `[!` is a member of the set
                let mut j = i;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str(r"\[");
                    continue;
                }
                let mut set: String = chars[i..j].iter().collect();
                set = set
                    .replace('\\', r"\\")
                    .replace('[', r"\[")
                    .replace(']', r"\]")
                    .replace('&', r"\&")
                    .replace('~', r"\~");
                if let Some(rest) = set.strip_prefix('!') {
                    set = format!("^{}", rest);
                } else if set.starts_with('^') {
                    set = format!(r"\{}", set);
                }
                out.push('[');
                out.push_str(&set);
                out.push(']');
                i = j + 1;
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out.push_str(")$");
    out
}
