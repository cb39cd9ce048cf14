use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::date::{normalize_date, DateParseError};
use crate::util::{html_to_text, unescape_html};

const ATOM_NAMESPACE: &[u8] = b"http://www.w3.org/2005/Atom";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// SEC-003: Maximum element nesting depth below the root.
const MAX_DEPTH: usize = 64;

/// Errors that make a feed document unusable.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Body is not UTF-8.
    #[error("feed is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    /// XML could not be tokenized.
    #[error("XML parse error: {0}")]
    Xml(String),
    /// The document contains no element at all.
    #[error("document has no root element")]
    MissingRoot,
    /// Root element is neither `<rss>` nor an Atom `<feed>`.
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),
    /// SEC-003: nesting exceeds [`MAX_DEPTH`].
    #[error("element nesting exceeds maximum of {0} levels")]
    TooDeep(usize),
    /// An item's date could not be normalized.
    #[error("item {index} has an invalid date: {source}")]
    InvalidDate {
        index: usize,
        #[source]
        source: DateParseError,
    },
}

/// Format-agnostic feed produced by [`parse_feed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedFeed {
    pub title: String,
    /// Channel link for RSS, `rel="self"` link for Atom (empty if absent).
    pub link: String,
    pub description: String,
    /// Items in document order.
    pub items: Vec<UnifiedItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedItem {
    pub title: String,
    /// Canonical identity of the item for deduplication.
    pub link: String,
    /// Entity-unescaped text; markup is stripped for Atom content only.
    pub description: String,
    pub published: DateTime<Utc>,
}

/// Decodes an RSS 2.0 or Atom document.
///
/// The root element decides the format: `<feed>` (or a root in the Atom
/// namespace) is Atom, `<rss>` is RSS. The `content_type` hint is only
/// consulted when the root does not settle it.
///
/// # Errors
///
/// Any [`ParseError`]; in particular one item with an unusable date fails
/// the whole document.
pub fn parse_feed(bytes: &[u8], content_type: Option<&str>) -> Result<UnifiedFeed, ParseError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)?;
    FeedSource::decode(text, content_type)?.into_unified()
}

// ============================================================================
// Source formats
// ============================================================================

/// A decoded document in its source shape, before normalization.
#[derive(Debug)]
enum FeedSource {
    Rss(RssChannel),
    Atom(AtomDocument),
}

impl FeedSource {
    fn decode(text: &str, content_type: Option<&str>) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(text);

        let (root, self_closing) = loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(e) => break (e, false),
                Event::Empty(e) => break (e, true),
                Event::Eof => return Err(ParseError::MissingRoot),
                _ => {}
            }
        };

        let root_name = element_name(&root)?;
        if is_atom_root(&root, &root_name, content_type) {
            if local(&root_name) != "feed" {
                return Err(ParseError::UnexpectedRoot(root_name));
            }
            let mut doc = AtomDocument::default();
            if !self_closing {
                walk(&mut reader, &mut doc)?;
            }
            Ok(FeedSource::Atom(doc))
        } else {
            if root_name != "rss" {
                return Err(ParseError::UnexpectedRoot(root_name));
            }
            let mut channel = RssChannel::default();
            if !self_closing {
                walk(&mut reader, &mut channel)?;
            }
            Ok(FeedSource::Rss(channel))
        }
    }

    fn into_unified(self) -> Result<UnifiedFeed, ParseError> {
        match self {
            FeedSource::Rss(channel) => channel.into_unified(),
            FeedSource::Atom(doc) => doc.into_unified(),
        }
    }
}

fn is_atom_root(root: &BytesStart<'_>, name: &str, content_type: Option<&str>) -> bool {
    if name == "rss" {
        return false;
    }
    if local(name) == "feed" {
        return true;
    }
    let default_ns_is_atom = root
        .attributes()
        .flatten()
        .any(|a| a.key.as_ref() == b"xmlns" && a.value.as_ref() == ATOM_NAMESPACE);
    default_ns_is_atom
        || content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("atom"))
}

// ============================================================================
// Event walker
// ============================================================================

/// Receives the elements below a document root.
trait SourceBuilder {
    type Field: Copy;

    /// Called for each element that opens outside a captured field. `parents`
    /// holds the qualified names between the root and this element. Returns
    /// the field that the element's text should be captured into, if any.
    fn open(
        &mut self,
        parents: &[String],
        name: &str,
        element: &BytesStart<'_>,
    ) -> Result<Option<Self::Field>, ParseError>;

    /// Stores the text captured for a field once its element closes.
    fn close(&mut self, field: Self::Field, text: String);
}

struct Capture<F> {
    field: F,
    depth: usize,
    text: String,
}

/// Streams everything up to the root's end tag into `builder`.
///
/// Text events are entity-decoded; CDATA is taken raw. Text of nested
/// elements inside a captured field is concatenated into that field.
fn walk<B: SourceBuilder>(reader: &mut Reader<&[u8]>, builder: &mut B) -> Result<(), ParseError> {
    let mut path: Vec<String> = Vec::new();
    let mut capture: Option<Capture<B::Field>> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = element_name(&e)?;
                if capture.is_none() {
                    if let Some(field) = builder.open(&path, &name, &e)? {
                        capture = Some(Capture {
                            field,
                            depth: path.len(),
                            text: String::new(),
                        });
                    }
                }
                path.push(name);
                if path.len() > MAX_DEPTH {
                    return Err(ParseError::TooDeep(MAX_DEPTH));
                }
            }
            Event::Empty(e) => {
                if capture.is_none() {
                    let name = element_name(&e)?;
                    if let Some(field) = builder.open(&path, &name, &e)? {
                        builder.close(field, String::new());
                    }
                }
            }
            Event::End(_) => {
                if path.pop().is_none() {
                    return Ok(());
                }
                match capture.take() {
                    Some(done) if done.depth == path.len() => builder.close(done.field, done.text),
                    other => capture = other,
                }
            }
            Event::Text(e) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(&unescape_html(std::str::from_utf8(&e)?));
                }
            }
            Event::CData(e) => {
                if let Some(c) = capture.as_mut() {
                    c.text.push_str(std::str::from_utf8(&e)?);
                }
            }
            Event::Eof => return Err(ParseError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}

fn element_name(e: &BytesStart<'_>) -> Result<String, ParseError> {
    Ok(std::str::from_utf8(e.name().as_ref())?.to_owned())
}

/// Local part of a qualified name (`atom:link` -> `link`).
fn local(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, l)| l)
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Result<Option<String>, ParseError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed feed attribute");
                continue;
            }
        };
        if attr.key.as_ref() == key.as_bytes() {
            let value = std::str::from_utf8(&attr.value)?;
            return Ok(Some(unescape_html(value).into_owned()));
        }
    }
    Ok(None)
}

fn xml_error(e: quick_xml::Error) -> ParseError {
    ParseError::Xml(e.to_string())
}

// ============================================================================
// RSS 2.0
// ============================================================================

#[derive(Debug, Default)]
struct RssChannel {
    title: String,
    link: String,
    description: String,
    items: Vec<RssItem>,
}

#[derive(Debug, Default)]
struct RssItem {
    title: String,
    link: String,
    description: String,
    pub_date: String,
}

#[derive(Debug, Clone, Copy)]
enum RssField {
    Title,
    Link,
    Description,
    ItemTitle,
    ItemLink,
    ItemDescription,
    ItemPubDate,
}

impl SourceBuilder for RssChannel {
    type Field = RssField;

    fn open(
        &mut self,
        parents: &[String],
        name: &str,
        _element: &BytesStart<'_>,
    ) -> Result<Option<RssField>, ParseError> {
        // Qualified names on purpose: <atom:link> inside a channel is not the channel link.
        let field = match parents {
            [channel] if channel == "channel" => match name {
                "title" => Some(RssField::Title),
                "link" => Some(RssField::Link),
                "description" => Some(RssField::Description),
                "item" => {
                    self.items.push(RssItem::default());
                    None
                }
                _ => None,
            },
            [channel, item] if channel == "channel" && item == "item" => match name {
                "title" => Some(RssField::ItemTitle),
                "link" => Some(RssField::ItemLink),
                "description" => Some(RssField::ItemDescription),
                "pubDate" => Some(RssField::ItemPubDate),
                _ => None,
            },
            _ => None,
        };
        Ok(field)
    }

    fn close(&mut self, field: RssField, text: String) {
        match field {
            RssField::Title => self.title = text,
            RssField::Link => self.link = text,
            RssField::Description => self.description = text,
            item_field => {
                let Some(item) = self.items.last_mut() else {
                    return;
                };
                match item_field {
                    RssField::ItemTitle => item.title = text,
                    RssField::ItemLink => item.link = text,
                    RssField::ItemDescription => item.description = text,
                    RssField::ItemPubDate => item.pub_date = text,
                    _ => {}
                }
            }
        }
    }
}

impl RssChannel {
    fn into_unified(self) -> Result<UnifiedFeed, ParseError> {
        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let published = normalize_date(&item.pub_date)
                    .map_err(|source| ParseError::InvalidDate { index, source })?;
                Ok(UnifiedItem {
                    title: unescape_html(&item.title).into_owned(),
                    link: item.link.trim().to_string(),
                    description: unescape_html(&item.description).into_owned(),
                    published,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        Ok(UnifiedFeed {
            title: unescape_html(&self.title).into_owned(),
            link: self.link.trim().to_string(),
            description: unescape_html(&self.description).into_owned(),
            items,
        })
    }
}

// ============================================================================
// Atom
// ============================================================================

#[derive(Debug, Default)]
struct AtomDocument {
    title: String,
    subtitle: Option<String>,
    description: Option<String>,
    links: Vec<AtomLink>,
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default)]
struct AtomEntry {
    title: String,
    links: Vec<AtomLink>,
    content: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    updated: Option<String>,
}

#[derive(Debug)]
struct AtomLink {
    rel: Option<String>,
    href: String,
}

#[derive(Debug, Clone, Copy)]
enum AtomField {
    Title,
    Subtitle,
    Description,
    EntryTitle,
    EntryContent,
    EntrySummary,
    EntryPublished,
    EntryUpdated,
}

impl AtomLink {
    fn from_element(e: &BytesStart<'_>) -> Result<Option<Self>, ParseError> {
        let Some(href) = attribute(e, "href")? else {
            return Ok(None);
        };
        Ok(Some(AtomLink {
            rel: attribute(e, "rel")?,
            href: href.trim().to_string(),
        }))
    }

    /// RFC 4287: a link without `rel` is an alternate link.
    fn is_alternate(&self) -> bool {
        self.rel.as_deref().is_none_or(|rel| rel == "alternate")
    }
}

impl SourceBuilder for AtomDocument {
    type Field = AtomField;

    fn open(
        &mut self,
        parents: &[String],
        name: &str,
        element: &BytesStart<'_>,
    ) -> Result<Option<AtomField>, ParseError> {
        let field = match parents {
            [] => match local(name) {
                "title" => Some(AtomField::Title),
                "subtitle" => Some(AtomField::Subtitle),
                "description" => Some(AtomField::Description),
                "link" => {
                    self.links.extend(AtomLink::from_element(element)?);
                    None
                }
                "entry" => {
                    self.entries.push(AtomEntry::default());
                    None
                }
                _ => None,
            },
            [entry] if local(entry) == "entry" => match local(name) {
                "title" => Some(AtomField::EntryTitle),
                "content" => Some(AtomField::EntryContent),
                "summary" => Some(AtomField::EntrySummary),
                "published" => Some(AtomField::EntryPublished),
                "updated" => Some(AtomField::EntryUpdated),
                "link" => {
                    if let Some(link) = AtomLink::from_element(element)? {
                        if let Some(entry) = self.entries.last_mut() {
                            entry.links.push(link);
                        }
                    }
                    None
                }
                _ => None,
            },
            _ => None,
        };
        Ok(field)
    }

    fn close(&mut self, field: AtomField, text: String) {
        match field {
            AtomField::Title => self.title = text,
            AtomField::Subtitle => self.subtitle = Some(text),
            AtomField::Description => self.description = Some(text),
            entry_field => {
                let Some(entry) = self.entries.last_mut() else {
                    return;
                };
                match entry_field {
                    AtomField::EntryTitle => entry.title = text,
                    AtomField::EntryContent => entry.content = Some(text),
                    AtomField::EntrySummary => entry.summary = Some(text),
                    AtomField::EntryPublished => entry.published = Some(text),
                    AtomField::EntryUpdated => entry.updated = Some(text),
                    _ => {}
                }
            }
        }
    }
}

impl AtomDocument {
    fn into_unified(self) -> Result<UnifiedFeed, ParseError> {
        let link = self
            .links
            .into_iter()
            .find(|l| l.rel.as_deref() == Some("self"))
            .map(|l| l.href)
            .unwrap_or_default();

        let items = self
            .entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let stamp = entry
                    .published
                    .filter(|p| !p.trim().is_empty())
                    .or(entry.updated)
                    .unwrap_or_default();
                let published = normalize_date(&stamp)
                    .map_err(|source| ParseError::InvalidDate { index, source })?;
                let link = entry
                    .links
                    .into_iter()
                    .find(AtomLink::is_alternate)
                    .map(|l| l.href)
                    .unwrap_or_default();
                let body = entry.content.or(entry.summary).unwrap_or_default();

                Ok(UnifiedItem {
                    title: unescape_html(&entry.title).into_owned(),
                    link,
                    description: html_to_text(&body),
                    published,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;

        let description = self.subtitle.or(self.description).unwrap_or_default();
        Ok(UnifiedFeed {
            title: unescape_html(&self.title).into_owned(),
            link,
            description: unescape_html(&description).into_owned(),
            items,
        })
    }
}
