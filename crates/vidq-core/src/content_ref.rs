//! Content references: turn a watch URL, short link or bare id into a content id
//! and a canonical source URL.

use url::Url;

/// Length of a content id as issued by the upstream platform.
const CONTENT_ID_LEN: usize = 11;

/// Path prefixes that carry the id as the next segment.
const ID_PATH_PREFIXES: &[&str] = &["shorts", "embed", "v", "live"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub content_id: String,
    pub source_url: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ContentRefError {
    #[error("empty content reference")]
    Empty,
    #[error("no content id found in {0:?}")]
    Unrecognized(String),
}

fn is_content_id(s: &str) -> bool {
    s.len() == CONTENT_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Canonical watch URL for a content id.
pub fn canonical_url(content_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", content_id)
}

fn id_from_url(url: &Url) -> Option<String> {
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
        if is_content_id(&v) {
            return Some(v.into_owned());
        }
    }

    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    if host == "youtu.be" || host.ends_with(".youtu.be") {
        return segments.next().filter(|s| is_content_id(s)).map(str::to_string);
    }

    while let Some(seg) = segments.next() {
        if ID_PATH_PREFIXES.contains(&seg) {
            return segments.next().filter(|s| is_content_id(s)).map(str::to_string);
        }
    }
    None
}

/// Parse a user-supplied reference into a content id and canonical URL.
///
/// Accepts `watch?v=` URLs, `youtu.be/<id>`, `/shorts/`, `/embed/`, `/v/`, `/live/`
/// paths and bare 11-character ids.
pub fn parse_content_ref(input: &str) -> Result<ContentRef, ContentRefError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ContentRefError::Empty);
    }
    if is_content_id(input) {
        return Ok(ContentRef {
            content_id: input.to_string(),
            source_url: canonical_url(input),
        });
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|_| ContentRefError::Unrecognized(input.to_string()))?;
    let content_id =
        id_from_url(&url).ok_or_else(|| ContentRefError::Unrecognized(input.to_string()))?;
    Ok(ContentRef {
        source_url: canonical_url(&content_id),
        content_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_url_shapes() {
        let cases = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/v/dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ",
            "dQw4w9WgXcQ",
        ];
        for case in cases {
            let r = parse_content_ref(case).unwrap_or_else(|e| panic!("{case}: {e}"));
            assert_eq!(r.content_id, "dQw4w9WgXcQ", "{case}");
            assert_eq!(r.source_url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_content_ref("   "), Err(ContentRefError::Empty));
        assert!(matches!(
            parse_content_ref("https://example.com/watch?v=short"),
            Err(ContentRefError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_content_ref("not a reference"),
            Err(ContentRefError::Unrecognized(_))
        ));
    }
}
