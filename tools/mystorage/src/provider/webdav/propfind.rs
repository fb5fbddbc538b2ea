//! PROPFIND request bodies, multistatus parsing and the normalization of
//! server-reported properties into [`FileInfo`].

use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::percent_decode_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use url::Url;

use crate::provider::{basename, normalize, FileInfo, Result, StorageError};

pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:creationdate/>
    <d:getetag/>
    <d:getcontenttype/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

pub const QUOTA_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:quota-available-bytes/>
    <d:quota-used-bytes/>
  </d:prop>
</d:propfind>"#;

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// One `<d:response>` element, as the server sent it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub href: String,
    pub name: Option<String>,
    pub modified: Option<String>,
    pub created: Option<String>,
    pub size: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub is_dir: Option<bool>,
    pub quota_available: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Href,
    DisplayName,
    LastModified,
    CreationDate,
    ContentLength,
    Etag,
    ContentType,
    QuotaAvailable,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"href" => Some(Field::Href),
            b"displayname" => Some(Field::DisplayName),
            b"getlastmodified" => Some(Field::LastModified),
            b"creationdate" => Some(Field::CreationDate),
            b"getcontentlength" => Some(Field::ContentLength),
            b"getetag" => Some(Field::Etag),
            b"getcontenttype" => Some(Field::ContentType),
            b"quota-available-bytes" => Some(Field::QuotaAvailable),
            _ => None,
        }
    }

    fn slot<'a>(&self, entry: &'a mut RawEntry) -> &'a mut String {
        match self {
            Field::Href => &mut entry.href,
            Field::DisplayName => entry.name.get_or_insert_with(String::new),
            Field::LastModified => entry.modified.get_or_insert_with(String::new),
            Field::CreationDate => entry.created.get_or_insert_with(String::new),
            Field::ContentLength => entry.size.get_or_insert_with(String::new),
            Field::Etag => entry.etag.get_or_insert_with(String::new),
            Field::ContentType => entry.content_type.get_or_insert_with(String::new),
            Field::QuotaAvailable => entry.quota_available.get_or_insert_with(String::new),
        }
    }
}

fn malformed(e: impl std::fmt::Display) -> StorageError {
    StorageError::Malformed(e.to_string())
}

/// Parse a `207 Multi-Status` body into its responses, in document order.
pub fn parse_multistatus(xml: &str) -> Result<Vec<RawEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"response" => current = Some(RawEntry::default()),
                    b"resourcetype" => {
                        if let Some(entry) = current.as_mut() {
                            entry.is_dir.get_or_insert(false);
                        }
                    }
                    b"collection" => {
                        if let Some(entry) = current.as_mut() {
                            entry.is_dir = Some(true);
                        }
                    }
                    other => field = Field::from_local_name(other),
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir = Some(true);
                    }
                }
                b"resourcetype" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_dir.get_or_insert(false);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                    let text = t.unescape().map_err(malformed)?;
                    f.slot(entry).push_str(&text);
                }
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// Parse an RFC 1123 timestamp such as `Sat, 17 Dec 2022 13:58:13 GMT`.
///
/// Only the `GMT` and `UTC` zone tokens are accepted.
pub fn parse_http_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    let (stamp, zone) = value
        .rsplit_once(' ')
        .ok_or_else(|| malformed(format!("timestamp without zone: {value}")))?;

    if !matches!(zone.to_ascii_uppercase().as_str(), "GMT" | "UTC") {
        return Err(malformed(format!("unsupported timezone {zone} in {value}")));
    }

    let naive = NaiveDateTime::parse_from_str(stamp, HTTP_DATE_FORMAT)
        .map_err(|e| malformed(format!("bad timestamp {value}: {e}")))?;
    Ok(naive.and_utc())
}

/// `creationdate` is RFC 3339 per RFC 4918, but some servers reuse the
/// RFC 1123 form of `getlastmodified`.
fn parse_creation_date(value: &str) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(value.trim()) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => parse_http_date(value),
    }
}

/// Turn a raw response into a [`FileInfo`] for the provider path `path`.
pub fn convert_info(raw: &RawEntry, path: String) -> Result<FileInfo> {
    let modified = raw
        .modified
        .as_deref()
        .ok_or_else(|| malformed(format!("no getlastmodified for {}", raw.href)))?;
    let modified = parse_http_date(modified)?;

    let created = match raw.created.as_deref().map(str::trim) {
        None | Some("") => modified,
        Some(value) => parse_creation_date(value)?,
    };

    let is_dir = raw.is_dir.unwrap_or(false);

    let size = match raw.size.as_deref().map(str::trim) {
        None | Some("") => 0,
        Some(_) if is_dir => 0,
        Some(value) => value
            .parse::<u64>()
            .map_err(|e| malformed(format!("bad content length {value}: {e}")))?,
    };

    let name = match raw.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => basename(&path).to_string(),
    };

    Ok(FileInfo {
        created,
        modified,
        name,
        size,
        etag: raw.etag.clone().unwrap_or_default(),
        content_type: raw.content_type.clone().unwrap_or_default(),
        is_dir,
        path,
    })
}

/// Map an `href` back to a provider path by stripping the mount prefix
/// `base_path` (already decoded, without surrounding slashes).
pub fn href_to_path(href: &str, base_path: &str) -> Result<String> {
    let raw_path = if href.starts_with("http://") || href.starts_with("https://") {
        Url::parse(href).map_err(malformed)?.path().to_string()
    } else {
        href.to_string()
    };

    let decoded = percent_decode_str(&raw_path)
        .decode_utf8()
        .map_err(|e| malformed(format!("href is not UTF-8: {e}")))?;
    let decoded = decoded.trim_matches('/');

    let relative = if base_path.is_empty() {
        decoded
    } else if decoded == base_path {
        ""
    } else {
        decoded
            .strip_prefix(base_path)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| malformed(format!("href {href} is outside of /{base_path}")))?
    };

    normalize(relative)
}
