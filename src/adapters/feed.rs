//! RSS 2.0 / Atom wire format.
//!
//! Parsing is two-phase so one broken entry cannot sink a whole feed:
//!
//! 1. [`split_entries`] walks the document with a streaming reader and cuts
//!    out the raw XML of every `<item>` / `<entry>`
//! 2. Each fragment is deserialized on its own into [`RssItem`] or
//!    [`AtomEntry`]; failures come back per entry as [`EntryError`]
//!
//! All fields are optional at this layer. Which fields a provider actually
//! needs is decided in [`super::providers`].

use crate::error::{EntryError, FetchError};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde::Deserialize;
use tracing::warn;

/// Syndication format of a provider's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Atom,
}

impl FeedFormat {
    fn entry_tag(self) -> &'static [u8] {
        match self {
            FeedFormat::Rss => b"item",
            FeedFormat::Atom => b"entry",
        }
    }

    /// Should a direct child of an entry with this qualified name be kept?
    ///
    /// Entry fields are matched by local name, so an extension element such
    /// as `media:title` or `atom:link` would land on `title` or `link`.
    /// Only unprefixed children and the extensions mapped onto fields survive.
    fn keeps_child(self, qname: &[u8]) -> bool {
        if !qname.contains(&b':') {
            return true;
        }
        match self {
            FeedFormat::Rss => matches!(qname, b"dc:creator" | b"dc:date" | b"content:encoded"),
            FeedFormat::Atom => false,
        }
    }
}

/// Text content of an element, ignoring its attributes (`type="html"` etc).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Text {
    #[serde(rename = "$text", default)]
    pub value: String,
}

impl Text {
    pub fn as_str(&self) -> &str {
        self.value.trim()
    }
}

fn text_of(t: &Option<Text>) -> Option<&str> {
    t.as_ref().map(Text::as_str).filter(|s| !s.is_empty())
}

/// `<category>` in either flavour: RSS text or Atom `term` attribute.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Category {
    #[serde(rename = "@term", default)]
    pub term: Option<String>,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

impl Category {
    pub fn label(&self) -> Option<&str> {
        self.term
            .as_deref()
            .or(self.text.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RssItem {
    pub title: Option<Text>,
    pub link: Option<Text>,
    pub guid: Option<Text>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<Text>,
    /// `dc:date`; elements are matched by local name.
    #[serde(rename = "date")]
    pub dc_date: Option<Text>,
    pub description: Option<Text>,
    /// `content:encoded`
    #[serde(rename = "encoded")]
    pub content_encoded: Option<Text>,
    /// `dc:creator`
    #[serde(rename = "creator", default)]
    pub creators: Vec<Text>,
    pub author: Option<Text>,
    #[serde(rename = "category", default)]
    pub categories: Vec<Category>,
}

impl RssItem {
    pub fn title(&self) -> Option<&str> {
        text_of(&self.title)
    }

    pub fn link(&self) -> Option<&str> {
        text_of(&self.link)
    }

    pub fn published(&self) -> Option<&str> {
        text_of(&self.pub_date).or(text_of(&self.dc_date))
    }

    pub fn description(&self) -> Option<&str> {
        text_of(&self.description)
    }

    pub fn content_encoded(&self) -> Option<&str> {
        text_of(&self.content_encoded)
    }

    /// `dc:creator` entries, else the plain `author` element.
    pub fn authors(&self) -> Vec<String> {
        let creators: Vec<String> = self
            .creators
            .iter()
            .map(Text::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !creators.is_empty() {
            return creators;
        }
        text_of(&self.author)
            .map(|a| vec![a.to_string()])
            .unwrap_or_default()
    }

    pub fn tags(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter_map(Category::label)
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtomLink {
    #[serde(rename = "@href", default)]
    pub href: Option<String>,
    #[serde(rename = "@rel", default)]
    pub rel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtomPerson {
    pub name: Option<Text>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtomEntry {
    pub id: Option<Text>,
    pub title: Option<Text>,
    #[serde(rename = "link", default)]
    pub links: Vec<AtomLink>,
    pub published: Option<Text>,
    pub updated: Option<Text>,
    pub summary: Option<Text>,
    pub content: Option<Text>,
    #[serde(rename = "author", default)]
    pub authors: Vec<AtomPerson>,
    #[serde(rename = "category", default)]
    pub categories: Vec<Category>,
}

impl AtomEntry {
    pub fn id(&self) -> Option<&str> {
        text_of(&self.id)
    }

    pub fn title(&self) -> Option<&str> {
        text_of(&self.title)
    }

    /// `published`, falling back to `updated`.
    pub fn published(&self) -> Option<&str> {
        text_of(&self.published).or(text_of(&self.updated))
    }

    /// `content`, falling back to `summary`.
    pub fn body(&self) -> Option<&str> {
        text_of(&self.content).or(text_of(&self.summary))
    }

    /// First link with the given `rel`.
    pub fn link(&self, rel: &str) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel.as_deref() == Some(rel))
            .and_then(|l| l.href.as_deref())
    }

    /// The `alternate` link; a link without `rel` is alternate by definition.
    pub fn alternate_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .and_then(|l| l.href.as_deref())
    }

    pub fn author_names(&self) -> Vec<String> {
        self.authors
            .iter()
            .filter_map(|a| text_of(&a.name))
            .map(str::to_string)
            .collect()
    }

    pub fn tags(&self) -> Vec<String> {
        self.categories
            .iter()
            .filter_map(Category::label)
            .map(str::to_string)
            .collect()
    }
}

/// Replace HTML-only entities that are not legal XML.
pub fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Cut the raw XML of every entry out of a feed document.
///
/// Each fragment is re-wrapped in its entry tag so it can be deserialized
/// alone. A document whose root is not `rss`, `feed` or `rdf:RDF` is
/// malformed. A syntax error after at least one entry keeps the entries
/// read so far.
pub fn split_entries(xml: &str, format: FeedFormat) -> Result<Vec<String>, FetchError> {
    let tag = format.entry_tag();
    let tag_str = String::from_utf8_lossy(tag);
    let mut reader = Reader::from_str(xml);
    let mut saw_root = false;
    let mut fragments = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                if !saw_root {
                    if !matches!(local.as_ref(), b"rss" | b"feed" | b"RDF") {
                        return Err(FetchError::Malformed(format!(
                            "unexpected root element <{}>",
                            String::from_utf8_lossy(local.as_ref())
                        )));
                    }
                    saw_root = true;
                    continue;
                }
                if local.as_ref() == tag {
                    match reader.read_to_end(e.name()) {
                        Ok(span) => {
                            let inner = known_children(&xml[span.start as usize..span.end as usize], format);
                            fragments.push(format!("<{tag_str}>{inner}</{tag_str}>"));
                        }
                        Err(err) => {
                            warn!(error = %err, kept = fragments.len(), "feed truncated inside an entry");
                            break;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) if fragments.is_empty() => {
                return Err(FetchError::Malformed(err.to_string()));
            }
            Err(err) => {
                warn!(error = %err, kept = fragments.len(), "feed xml error; keeping entries read so far");
                break;
            }
        }
    }

    if !saw_root {
        return Err(FetchError::Malformed("document has no root element".into()));
    }
    Ok(fragments)
}

/// Raw XML of the direct children of an entry that `format` keeps.
///
/// An entry body that does not tokenize is returned untouched; its
/// deserialization then reports the error for that entry alone.
fn known_children(inner: &str, format: FeedFormat) -> String {
    let mut reader = Reader::from_str(inner);
    let mut kept = String::with_capacity(inner.len());
    loop {
        let start = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let keep = format.keeps_child(e.name().as_ref());
                if reader.read_to_end(e.name()).is_err() {
                    return inner.to_string();
                }
                if keep {
                    kept.push_str(&inner[start..reader.buffer_position() as usize]);
                }
            }
            Ok(Event::Empty(e)) => {
                if format.keeps_child(e.name().as_ref()) {
                    kept.push_str(&inner[start..reader.buffer_position() as usize]);
                }
            }
            Ok(Event::Eof) => return kept,
            Ok(_) => {}
            Err(_) => return inner.to_string(),
        }
    }
}

/// Split and deserialize an RSS document.
pub fn parse_rss(xml: &str) -> Result<Vec<Result<RssItem, EntryError>>, FetchError> {
    let clean = scrub_html_entities_for_xml(xml);
    Ok(split_entries(&clean, FeedFormat::Rss)?
        .iter()
        .map(|frag| quick_xml::de::from_str(frag).map_err(|e| EntryError::Xml(e.to_string())))
        .collect())
}

/// Split and deserialize an Atom document.
pub fn parse_atom(xml: &str) -> Result<Vec<Result<AtomEntry, EntryError>>, FetchError> {
    let clean = scrub_html_entities_for_xml(xml);
    Ok(split_entries(&clean, FeedFormat::Atom)?
        .iter()
        .map(|frag| quick_xml::de::from_str(frag).map_err(|e| EntryError::Xml(e.to_string())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <item>
      <title>First &amp; best</title>
      <link>https://example.com/1</link>
      <dc:creator><![CDATA[Jane Doe]]></dc:creator>
      <pubDate>Tue, 06 May 2025 14:30:00 +0000</pubDate>
      <category><![CDATA[Hardware]]></category>
      <category>Retro</category>
      <description>Short&nbsp;summary</description>
      <content:encoded><![CDATA[<p>Long <b>body</b></p>]]></content:encoded>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/2</link>
      <author>editor@example.com</author>
      <pubDate>Tue, 06 May 2025 15:30:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <entry>
    <id>tag:example.com,2025:1</id>
    <title type="html">Atom &amp;amp; friends</title>
    <link rel="alternate" type="text/html" href="https://example.com/a"/>
    <link rel="shorturl" href="https://ex.am/a"/>
    <published>2025-05-06T10:30:00-04:00</published>
    <author><name>Alice</name></author>
    <author><name>Bob</name></author>
    <category term="Tech"/>
    <content type="html">&lt;p&gt;Hello&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn rss_items_are_parsed() {
        let items: Vec<RssItem> = parse_rss(RSS).unwrap().into_iter().map(Result::unwrap).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title(), Some("First & best"));
        assert_eq!(items[0].link(), Some("https://example.com/1"));
        assert_eq!(items[0].authors(), vec!["Jane Doe".to_string()]);
        assert_eq!(items[0].tags(), vec!["Hardware".to_string(), "Retro".to_string()]);
        assert_eq!(items[0].description(), Some("Short summary"));
        assert_eq!(items[0].content_encoded(), Some("<p>Long <b>body</b></p>"));
        assert_eq!(items[1].authors(), vec!["editor@example.com".to_string()]);
        assert!(items[1].tags().is_empty());
    }

    #[test]
    fn atom_entries_are_parsed() {
        let entries: Vec<AtomEntry> =
            parse_atom(ATOM).unwrap().into_iter().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.title(), Some("Atom &amp; friends"));
        assert_eq!(e.alternate_link(), Some("https://example.com/a"));
        assert_eq!(e.link("shorturl"), Some("https://ex.am/a"));
        assert_eq!(e.author_names(), vec!["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(e.tags(), vec!["Tech".to_string()]);
        assert_eq!(e.body(), Some("<p>Hello</p>"));
    }

    #[test]
    fn extension_elements_do_not_shadow_item_fields() {
        let xml = r#"<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/"
            xmlns:atom="http://www.w3.org/2005/Atom" xmlns:media="http://search.yahoo.com/mrss/">
          <channel><item>
            <title>Real title</title>
            <media:title>Thumbnail caption</media:title>
            <link>https://example.com/real</link>
            <atom:link rel="self" href="https://example.com/feed"/>
            <description>Real summary</description>
            <media:description>Image alt</media:description>
            <media:content url="https://example.com/a.jpg"><media:title>x</media:title></media:content>
            <dc:creator>Jane Doe</dc:creator>
            <dc:creator>John Roe</dc:creator>
            <dc:date>2025-05-06T14:30:00Z</dc:date>
          </item></channel>
        </rss>"#;
        let items: Vec<RssItem> = parse_rss(xml).unwrap().into_iter().map(Result::unwrap).collect();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.title(), Some("Real title"));
        assert_eq!(item.link(), Some("https://example.com/real"));
        assert_eq!(item.description(), Some("Real summary"));
        assert_eq!(item.authors(), vec!["Jane Doe".to_string(), "John Roe".to_string()]);
        assert_eq!(item.published(), Some("2025-05-06T14:30:00Z"));
    }

    #[test]
    fn non_feed_documents_are_malformed() {
        let err = split_entries("<html><body>oops</body></html>", FeedFormat::Rss).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
        assert!(matches!(
            split_entries("", FeedFormat::Rss).unwrap_err(),
            FetchError::Malformed(_)
        ));
    }

    #[test]
    fn truncated_feed_keeps_complete_entries() {
        let cut = &RSS[..RSS.find("<title>Second").unwrap()];
        let fragments = split_entries(cut, FeedFormat::Rss).unwrap();
        assert_eq!(fragments.len(), 1);
    }
}
