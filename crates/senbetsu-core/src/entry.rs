use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::info::Info;

/// Query parameter of a torrent's info page, rewritten to its download form.
const INFO_PAGE_PARAM: &str = "page=torrentinfo";
const DOWNLOAD_PARAM: &str = "page=download";

static RE_GUID_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"id=(\d+)").unwrap());
static RE_TAG_WRAPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*<[^>/]+>(.*)</[^>]+>\s*$").unwrap());
static RE_TORRENT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href="((?:https?|ftp)://[^"]+)""#).unwrap());
static RE_MAGNET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href="(magnet:[^"]+)""#).unwrap());
static RE_SIZE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Size:\s*(\d+(?:\.\d+)?\s*[KMGT]i?B)").unwrap());
static RE_AUTHORIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Authorized:\s*Yes").unwrap());
static RE_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Comment:\s*([^<]*)").unwrap());

/// One item exactly as the feed collaborator hands it over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    pub description: String,
    pub link: String,
    pub pub_date: String,
    pub guid: String,
    pub category: String,
}

/// A feed item with its description parsed into metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    /// Numeric id taken from the guid. Orders and identifies entries.
    pub id: Option<u64>,
    /// Title with underscores turned into spaces.
    pub title: String,
    pub link: String,
    /// `.torrent` URL from the description, or `link` when none is given.
    pub torrent_url: String,
    /// Human-readable size, e.g. "350.2MB".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub category: String,
    pub authorized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnet_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub guid: String,
    /// Set once an accept rule matched with named captures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
}

impl Entry {
    /// Parse a raw feed item. Never fails; a missing id is left unset.
    pub fn extract(item: &RawItem) -> Self {
        let guid = strip_tag(&item.guid).to_string();
        let category = strip_tag(&item.category).to_string();
        let id = RE_GUID_ID
            .captures(&guid)
            .and_then(|c| c[1].parse::<u64>().ok());

        let description = item.description.as_str();
        let link = rewrite_info_page(&item.link);
        let torrent_url = first_capture(&RE_TORRENT_URL, description)
            .map(|url| rewrite_info_page(&url))
            .unwrap_or_else(|| link.clone());

        let published_at = DateTime::parse_from_rfc2822(item.pub_date.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        if published_at.is_none() && !item.pub_date.trim().is_empty() {
            tracing::debug!(pub_date = %item.pub_date, "Unparseable publication date");
        }

        Self {
            id,
            title: item.title.replace('_', " "),
            link,
            torrent_url,
            size: first_capture(&RE_SIZE, description),
            category,
            authorized: RE_AUTHORIZED.is_match(description),
            magnet_uri: first_capture(&RE_MAGNET, description),
            comment: first_capture(&RE_COMMENT, description)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            published_at,
            guid,
            info: None,
        }
    }

    /// Like [`Entry::extract`], but rejects items whose guid has no id.
    pub fn extract_with_id(item: &RawItem) -> Result<Self, ExtractionError> {
        let entry = Self::extract(item);
        entry.require_id()?;
        Ok(entry)
    }

    /// The entry's id, or an error naming the guid it should have come from.
    pub fn require_id(&self) -> Result<u64, ExtractionError> {
        self.id.ok_or_else(|| ExtractionError::MissingId {
            guid: self.guid.clone(),
        })
    }

    /// Value of a selector field, stringified for comparison.
    pub fn field(&self, field: EntryField) -> Option<Cow<'_, str>> {
        match field {
            EntryField::Id => self.id.map(|id| Cow::Owned(id.to_string())),
            EntryField::Title => Some(Cow::Borrowed(&self.title)),
            EntryField::Link => Some(Cow::Borrowed(&self.link)),
            EntryField::TorrentUrl => Some(Cow::Borrowed(&self.torrent_url)),
            EntryField::Size => self.size.as_deref().map(Cow::Borrowed),
            EntryField::Category => Some(Cow::Borrowed(&self.category)),
            EntryField::Authorized => Some(Cow::Borrowed(if self.authorized {
                "true"
            } else {
                "false"
            })),
            EntryField::MagnetUri => self.magnet_uri.as_deref().map(Cow::Borrowed),
            EntryField::Comment => self.comment.as_deref().map(Cow::Borrowed),
            EntryField::PublishedAt => self
                .published_at
                .map(|dt| Cow::Owned(dt.to_rfc3339())),
            EntryField::Guid => Some(Cow::Borrowed(&self.guid)),
        }
    }

    /// Short human label used in logs and error messages.
    pub fn label(&self) -> String {
        match self.id {
            Some(id) => format!("#{id} \"{}\"", self.title),
            None => format!("\"{}\"", self.title),
        }
    }
}

/// Entry attributes a rule selector can address by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryField {
    Id,
    Title,
    Link,
    TorrentUrl,
    Size,
    Category,
    Authorized,
    MagnetUri,
    Comment,
    PublishedAt,
    Guid,
}

impl EntryField {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "id" => Self::Id,
            "title" => Self::Title,
            "link" => Self::Link,
            "torrent_url" => Self::TorrentUrl,
            "size" => Self::Size,
            "category" => Self::Category,
            "authorized" => Self::Authorized,
            "magnet_uri" => Self::MagnetUri,
            "comment" => Self::Comment,
            "published_at" => Self::PublishedAt,
            "guid" => Self::Guid,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Title => "title",
            Self::Link => "link",
            Self::TorrentUrl => "torrent_url",
            Self::Size => "size",
            Self::Category => "category",
            Self::Authorized => "authorized",
            Self::MagnetUri => "magnet_uri",
            Self::Comment => "comment",
            Self::PublishedAt => "published_at",
            Self::Guid => "guid",
        }
    }
}

impl std::fmt::Display for EntryField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reduce `<tag>inner</tag>` to `inner`; anything else is returned trimmed.
pub fn strip_tag(s: &str) -> &str {
    match RE_TAG_WRAPPED.captures(s).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => s.trim(),
    }
}

fn rewrite_info_page(url: &str) -> String {
    url.replace(INFO_PAGE_PARAM, DOWNLOAD_PARAM)
}

fn first_capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokyo_item() -> RawItem {
        RawItem {
            title: "[Commie]_Sousou_no_Frieren_-_05_[1080p].mkv".into(),
            description: concat!(
                r#"<a href="http://example.org/?page=torrentinfo&tid=11">Torrent Link</a><br />"#,
                r#"<a href="magnet:?xt=urn:btih:ABCDEF">Magnet Link</a><br />"#,
                "Size: 350.2MB<br />Authorized: Yes<br />Comment: v2 fixes typesetting"
            )
            .into(),
            link: "http://example.org/?page=torrentinfo&tid=11".into(),
            pub_date: "Sat, 07 Oct 2023 15:32:00 +0000".into(),
            guid: "<guid>http://example.org/details.php?id=812345</guid>".into(),
            category: "<category>Anime</category>".into(),
        }
    }

    #[test]
    fn test_extract_full_description() {
        let e = Entry::extract(&tokyo_item());
        assert_eq!(e.id, Some(812345));
        assert_eq!(e.title, "[Commie] Sousou no Frieren - 05 [1080p].mkv");
        assert_eq!(e.category, "Anime");
        assert_eq!(e.guid, "http://example.org/details.php?id=812345");
        assert_eq!(e.size.as_deref(), Some("350.2MB"));
        assert!(e.authorized);
        assert_eq!(e.magnet_uri.as_deref(), Some("magnet:?xt=urn:btih:ABCDEF"));
        assert_eq!(e.comment.as_deref(), Some("v2 fixes typesetting"));
        assert!(e.published_at.is_some());
        assert!(e.info.is_none());
    }

    #[test]
    fn test_info_page_rewritten_in_both_urls() {
        let e = Entry::extract(&tokyo_item());
        assert_eq!(e.link, "http://example.org/?page=download&tid=11");
        assert_eq!(e.torrent_url, "http://example.org/?page=download&tid=11");
    }

    #[test]
    fn test_torrent_url_falls_back_to_link() {
        let item = RawItem {
            description: "Size: 1.1GiB".into(),
            link: "http://example.org/file.torrent".into(),
            guid: "id=3".into(),
            ..Default::default()
        };
        let e = Entry::extract(&item);
        assert_eq!(e.torrent_url, "http://example.org/file.torrent");
        assert_eq!(e.size.as_deref(), Some("1.1GiB"));
        assert!(!e.authorized);
        assert!(e.magnet_uri.is_none());
        assert!(e.comment.is_none());
    }

    #[test]
    fn test_authorized_requires_yes() {
        let item = RawItem {
            description: "Authorized: No".into(),
            ..Default::default()
        };
        assert!(!Entry::extract(&item).authorized);
    }

    #[test]
    fn test_missing_id_left_unset() {
        let item = RawItem {
            guid: "<guid>urn:nothing</guid>".into(),
            ..Default::default()
        };
        let e = Entry::extract(&item);
        assert_eq!(e.id, None);
        assert!(matches!(
            e.require_id(),
            Err(ExtractionError::MissingId { ref guid }) if guid == "urn:nothing"
        ));
        assert!(Entry::extract_with_id(&item).is_err());
    }

    #[test]
    fn test_strip_tag() {
        assert_eq!(strip_tag("<category>Anime</category>"), "Anime");
        assert_eq!(strip_tag("  Anime "), "Anime");
        assert_eq!(strip_tag("<guid isPermaLink=\"true\">x?id=1</guid>"), "x?id=1");
    }

    #[test]
    fn test_field_lookup() {
        let e = Entry::extract(&tokyo_item());
        assert_eq!(e.field(EntryField::Id).as_deref(), Some("812345"));
        assert_eq!(e.field(EntryField::Authorized).as_deref(), Some("true"));
        assert_eq!(EntryField::from_name("torrent_url"), Some(EntryField::TorrentUrl));
        assert_eq!(EntryField::from_name("group"), None);
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let item = RawItem {
            title: "Show".into(),
            guid: "id=9".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(Entry::extract(&item)).unwrap();
        assert_eq!(json["id"], 9);
        assert_eq!(json["title"], "Show");
        assert!(json.get("info").is_none());
        assert!(json.get("magnet_uri").is_none());
    }
}
