//! Turns a captured page load into a book record and an audio source.

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::book::{Book, Series};
use crate::capture::{CapturedExchange, CapturedPage};
use crate::config::SiteConfig;
use crate::DownloadError;

/// Where the book's audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Streaming playlist the media processor can read directly
    Manifest(String),

    /// Single audio file linked from the page's `<audio>` element
    DirectUrl(String),

    /// Numbered files, one per group of chapters
    Segmented(SegmentPattern),
}

impl AudioSource {
    pub fn kind(&self) -> &'static str {
        match self {
            AudioSource::Manifest(_) => "manifest",
            AudioSource::DirectUrl(_) => "direct URL",
            AudioSource::Segmented(_) => "segmented",
        }
    }
}

/// URL pattern shared by the numbered segment files of a book.
///
/// A reference name such as `05.some.mp3` splits into the numeric prefix `05` and the
/// suffix `.some.mp3`; segment `n` is the zero-padded `n` followed by the suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPattern {
    /// Everything up to and including the last `/` of the reference URL
    pub base_url: String,

    /// Shared part of the file name after the number
    pub suffix: String,

    /// Query string of the reference URL, carried over to every segment
    pub query: Option<String>,
}

impl SegmentPattern {
    /// Derive the pattern from the URL of any one segment
    pub fn from_reference_url(reference: &Url) -> Option<Self> {
        let file_name = reference.path_segments()?.last()?;
        let (prefix, suffix) = file_name.split_at(file_name.find('.')?);

        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if !suffix.to_ascii_lowercase().ends_with(".mp3") {
            return None;
        }

        let mut base = reference.clone();
        base.set_query(None);
        base.set_fragment(None);
        let base = base.as_str();
        let base_url = base[..base.len() - file_name.len()].to_string();

        Some(Self {
            base_url,
            suffix: suffix.to_string(),
            query: reference.query().map(str::to_string),
        })
    }

    /// File name of segment `index` as it appears in the URL
    pub fn file_name(&self, index: u32) -> String {
        format!("{:02}{}", index, self.suffix)
    }

    /// File name of segment `index` for local storage
    pub fn local_file_name(&self, index: u32) -> String {
        let name = self.file_name(index);
        urlencoding::decode(&name)
            .map(|decoded| crate::utils::sanitize_filename(&decoded))
            .unwrap_or(name)
    }

    pub fn url(&self, index: u32) -> String {
        match &self.query {
            Some(query) => format!("{}{}?{}", self.base_url, self.file_name(index), query),
            None => format!("{}{}", self.base_url, self.file_name(index)),
        }
    }
}

/// Result of analysing one captured book page
#[derive(Debug, Clone)]
pub struct BookRequest {
    pub page_url: String,
    pub book: Book,
    pub source: AudioSource,
}

/// Analyse captured traffic and HTML.
///
/// Fails with `MetadataNotFound` unless exactly one book data request was captured,
/// and with `SourceNotFound` when no audio source can be derived.
pub fn analyse_book_page(page: &CapturedPage, site: &SiteConfig) -> Result<BookRequest, DownloadError> {
    tracing::info!("Analysing book requests...");

    let metadata_exchange = find_book_data_exchange(&page.exchanges, &site.book_data_prefix)?;
    tracing::info!("Book data found");

    let body = metadata_exchange
        .decoded_body()
        .map_err(|e| DownloadError::InvalidMetadata(e.to_string()))?;
    let book = Book::from_json(&body)?;

    let page_series = find_series(&page.html, &site.series_selector);
    if page_series.is_none() && book.series.is_some() {
        tracing::debug!("Book data names a series but the page does not; skipping series folder");
    }
    let book = book.with_page_series(page_series);

    let source = find_audio_source(page, &site.manifest_marker).ok_or(DownloadError::SourceNotFound)?;
    tracing::info!("Audio source: {}", source.kind());

    Ok(BookRequest {
        page_url: page.url.clone(),
        book,
        source,
    })
}

/// The single POST to the book data endpoint
pub fn find_book_data_exchange<'a>(
    exchanges: &'a [CapturedExchange],
    prefix: &str,
) -> Result<&'a CapturedExchange, DownloadError> {
    let matches: Vec<&CapturedExchange> = exchanges
        .iter()
        .filter(|exchange| exchange.method == "POST" && exchange.path.starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [exchange] => Ok(exchange),
        other => Err(DownloadError::MetadataNotFound { found: other.len() }),
    }
}

/// Manifest first, then the page's `<audio>` element, then a segment pattern
pub fn find_audio_source(page: &CapturedPage, manifest_marker: &str) -> Option<AudioSource> {
    let manifests: Vec<&CapturedExchange> = page
        .exchanges
        .iter()
        .filter(|exchange| exchange.url.contains(manifest_marker))
        .collect();

    if let Some(first) = manifests.first() {
        if manifests.len() > 1 {
            tracing::warn!("Found {} manifest requests, using the first", manifests.len());
        }
        tracing::info!("{} file found", manifest_marker);
        return Some(AudioSource::Manifest(first.url.clone()));
    }

    let page_url = Url::parse(&page.url).ok();

    if let Some(url) = find_audio_tag_src(&page.html, page_url.as_ref()) {
        tracing::info!("Direct audio URL found in page");
        return Some(AudioSource::DirectUrl(url));
    }

    find_segment_pattern(page, page_url.as_ref()).map(AudioSource::Segmented)
}

/// `src` of the first `<audio>` element (or its first `<source>` child)
pub fn find_audio_tag_src(html: &str, page_url: Option<&Url>) -> Option<String> {
    let document = Html::parse_document(html);
    let audio = Selector::parse("audio").ok()?;
    let source = Selector::parse("source").ok()?;

    document.select(&audio).find_map(|element| {
        element
            .value()
            .attr("src")
            .or_else(|| {
                element
                    .select(&source)
                    .find_map(|child| child.value().attr("src"))
            })
            .and_then(|src| resolve_media_url(src, page_url))
    })
}

/// Segment pattern from the first numbered `.mp3` reference in the traffic or HTML
pub fn find_segment_pattern(page: &CapturedPage, page_url: Option<&Url>) -> Option<SegmentPattern> {
    let from_traffic = page
        .exchanges
        .iter()
        .filter_map(|exchange| Url::parse(&exchange.url).ok())
        .find_map(|url| SegmentPattern::from_reference_url(&url));

    if from_traffic.is_some() {
        return from_traffic;
    }

    let candidates = Regex::new(r#"[^\s"'<>()]+\.mp3(?:\?[^\s"'<>()]*)?"#).ok()?;
    let from_html = candidates
        .find_iter(&page.html)
        .filter_map(|m| resolve_media_url(m.as_str(), page_url))
        .filter_map(|url| Url::parse(&url).ok())
        .find_map(|url| SegmentPattern::from_reference_url(&url));
    from_html
}

/// Series parsed from the page's "about series" block
pub fn find_series(html: &str, selector: &str) -> Option<Series> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);

    let text = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>();

    Series::parse(text.trim())
}

/// Absolute book links from a series listing page, de-duplicated, in page order
pub fn parse_series_listing(html: &str, listing_url: &Url, selector: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);

    let mut links: Vec<String> = Vec::new();
    for href in document.select(&selector).filter_map(|a| a.value().attr("href")) {
        let Ok(mut url) = listing_url.join(href.trim()) else {
            continue;
        };
        url.set_fragment(None);
        let url = url.to_string();
        if !links.contains(&url) {
            links.push(url);
        }
    }

    links
}

fn resolve_media_url(src: &str, page_url: Option<&Url>) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }

    let resolved = match page_url {
        Some(base) => base.join(src).ok()?,
        None => Url::parse(src).ok()?,
    };

    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}
