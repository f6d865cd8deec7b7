use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::utils::sanitize_filename;
use crate::DownloadError;

/// Book data exactly as the site's API returns it
#[derive(Debug, Clone, Deserialize)]
pub struct RawBookMetadata {
    #[serde(default)]
    pub id: Option<Value>,
    pub title: String,
    pub titleonly: String,
    pub author: String,
    #[serde(default)]
    pub preview: Option<String>,
    /// JSON-encoded chapter list (sometimes already decoded)
    pub items: Value,
    #[serde(default)]
    pub series_name: Option<String>,
    #[serde(default)]
    pub series_number: Option<Value>,
}

/// Series the book belongs to, parsed from the page's "about series" block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    pub name: String,
    pub number: Option<u32>,
}

impl Series {
    /// Parse text shaped like `"Series Name (3)"`.
    ///
    /// Anything that does not follow that shape, a non-numeric `N` included, yields
    /// `None`, which disables the series folder.
    pub fn parse(text: &str) -> Option<Self> {
        let (name, rest) = text.split_once('(')?;
        let (number, _) = rest.split_once(')')?;

        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let number = number.trim().parse().ok()?;

        Some(Self {
            name: name.to_string(),
            number: Some(number),
        })
    }
}

/// One chapter of the book
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chapter {
    pub title: String,

    /// Start of the chapter in seconds
    #[serde(deserialize_with = "de_seconds")]
    pub time_from_start: f64,

    /// End of the chapter in seconds
    #[serde(deserialize_with = "de_seconds")]
    pub time_finish: f64,

    /// Index of the segment file holding this chapter (segmented books only)
    #[serde(default, deserialize_with = "de_file_index")]
    pub file: Option<u32>,
}

/// Book metadata with file-system safe names
#[derive(Debug, Clone)]
pub struct Book {
    pub id: Option<String>,
    pub title: String,
    pub title_only: String,
    pub author: String,
    pub preview: Option<String>,
    pub series: Option<Series>,
    pub chapters: Vec<Chapter>,
}

impl Book {
    /// Build the book record from the API response body.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DownloadError> {
        let raw: RawBookMetadata = serde_json::from_slice(bytes)
            .map_err(|e| DownloadError::InvalidMetadata(e.to_string()))?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawBookMetadata) -> Result<Self, DownloadError> {
        let chapters = parse_chapters(&raw.items)?;

        let series = raw.series_name.as_deref().and_then(|name| {
            let name = name.trim();
            (!name.is_empty()).then(|| Series {
                name: name.to_string(),
                number: raw.series_number.as_ref().and_then(value_as_u32),
            })
        });

        Ok(Self {
            id: raw.id.as_ref().and_then(value_as_string),
            title: sanitize_filename(&raw.title),
            title_only: sanitize_filename(&raw.titleonly),
            author: sanitize_filename(&raw.author),
            preview: raw.preview.filter(|p| !p.trim().is_empty()),
            series,
            chapters,
        })
    }

    /// Replace the series with the one parsed from the page markup.
    pub fn with_page_series(mut self, series: Option<Series>) -> Self {
        self.series = series;
        self
    }

    /// Segment indices in the order the chapters first reference them
    pub fn segment_indices(&self) -> Vec<u32> {
        let mut seen = Vec::new();
        for index in self.chapters.iter().filter_map(|c| c.file) {
            if !seen.contains(&index) {
                seen.push(index);
            }
        }
        seen
    }
}

fn parse_chapters(items: &Value) -> Result<Vec<Chapter>, DownloadError> {
    let chapters = match items {
        Value::String(encoded) => serde_json::from_str::<Vec<Chapter>>(encoded),
        other => serde_json::from_value::<Vec<Chapter>>(other.clone()),
    }
    .map_err(|e| DownloadError::InvalidMetadata(format!("items: {}", e)))?;

    for chapter in &chapters {
        if chapter.time_finish < chapter.time_from_start {
            return Err(DownloadError::InvalidMetadata(format!(
                "chapter '{}' ends before it starts ({} < {})",
                chapter.title, chapter.time_finish, chapter.time_from_start
            )));
        }
    }

    Ok(chapters)
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn de_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("time is not a finite number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|seconds| seconds.is_finite())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time: {}", s))),
        other => Err(serde::de::Error::custom(format!("invalid time: {}", other))),
    }
}

fn de_file_index<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        other => value_as_u32(&other)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid file index: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": 4242,
        "title": "Test:Book",
        "titleonly": "Test Book",
        "author": "A/B",
        "preview": "https://cdn.example/100x100crop/cover.jpg",
        "items": "[{\"title\":\"Ch 1\",\"time_from_start\":0,\"time_finish\":120}]"
    }"#;

    #[test]
    fn test_book_from_json_sanitizes_names() {
        let book = Book::from_json(SAMPLE.as_bytes()).unwrap();
        assert_eq!(book.title, "Test_Book");
        assert_eq!(book.title_only, "Test Book");
        assert_eq!(book.author, "A_B");
        assert_eq!(book.id.as_deref(), Some("4242"));
        assert_eq!(book.chapters.len(), 1);
        assert_eq!(book.chapters[0].title, "Ch 1");
        assert_eq!(book.chapters[0].time_finish, 120.0);
        assert_eq!(book.chapters[0].file, None);
    }

    #[test]
    fn test_items_may_be_a_plain_array() {
        let json = r#"{"title":"T","titleonly":"T","author":"A",
            "items":[{"title":"One","time_from_start":"1.5","time_finish":"9","file":"5"}]}"#;
        let book = Book::from_json(json.as_bytes()).unwrap();
        assert_eq!(book.chapters[0].time_from_start, 1.5);
        assert_eq!(book.chapters[0].file, Some(5));
        assert!(book.preview.is_none());
    }

    #[test]
    fn test_missing_fields_are_invalid_metadata() {
        let err = Book::from_json(br#"{"title":"T"}"#).unwrap_err();
        assert!(matches!(err, DownloadError::InvalidMetadata(_)));
    }

    #[test]
    fn test_non_finite_times_are_rejected() {
        for time in ["NaN", "inf", "-infinity", "soon"] {
            let json = format!(
                r#"{{"title":"T","titleonly":"T","author":"A",
                "items":[{{"title":"x","time_from_start":"{}","time_finish":"5"}}]}}"#,
                time
            );
            let err = Book::from_json(json.as_bytes()).unwrap_err();
            assert!(matches!(err, DownloadError::InvalidMetadata(_)), "time {:?}", time);
        }
    }

    #[test]
    fn test_reversed_chapter_range_is_rejected() {
        let json = r#"{"title":"T","titleonly":"T","author":"A",
            "items":"[{\"title\":\"x\",\"time_from_start\":10,\"time_finish\":5}]"}"#;
        assert!(Book::from_json(json.as_bytes()).is_err());
    }

    #[test]
    fn test_segment_indices_keep_first_reference_order() {
        let json = r#"{"title":"T","titleonly":"T","author":"A","items":[
            {"title":"a","time_from_start":0,"time_finish":1,"file":5},
            {"title":"b","time_from_start":1,"time_finish":2,"file":5},
            {"title":"c","time_from_start":0,"time_finish":1,"file":6},
            {"title":"d","time_from_start":1,"time_finish":2,"file":5}]}"#;
        let book = Book::from_json(json.as_bytes()).unwrap();
        assert_eq!(book.segment_indices(), vec![5, 6]);
    }

    #[test]
    fn test_series_parse() {
        assert_eq!(
            Series::parse("Ведьмак (3)"),
            Some(Series { name: "Ведьмак".to_string(), number: Some(3) })
        );
        assert_eq!(
            Series::parse(" Saga (12) "),
            Some(Series { name: "Saga".to_string(), number: Some(12) })
        );
        assert_eq!(Series::parse("Saga (x)"), None);
        assert_eq!(Series::parse("Saga ()"), None);
        assert_eq!(Series::parse("No number here"), None);
        assert_eq!(Series::parse("(4)"), None);
        assert_eq!(Series::parse("Broken (4"), None);
    }

    #[test]
    fn test_metadata_series_fields_are_read() {
        let json = r#"{"title":"T","titleonly":"T","author":"A","items":"[]",
            "series_name":"Cycle","series_number":"2"}"#;
        let book = Book::from_json(json.as_bytes()).unwrap();
        assert_eq!(book.series, Some(Series { name: "Cycle".to_string(), number: Some(2) }));

        let book = book.with_page_series(None);
        assert!(book.series.is_none());
    }
}
