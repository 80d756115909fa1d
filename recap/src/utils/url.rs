//! URL helpers.

use url::Url;

/// Extracts a YouTube video id from a watch URL, a short link or a bare id.
///
/// Watch URLs (`youtube.com/watch?v=<id>`) yield the `v` query parameter;
/// `youtu.be/<id>` yields the first path segment. Anything else is
/// returned trimmed, on the assumption that it already is an id.
pub fn extract_video_id(input: &str) -> String {
    let input = input.trim();

    if input.contains("youtube.com") {
        if let Some(id) = parse_absolute(input).and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())
        }) && !id.is_empty()
        {
            return id;
        }
        if let Some((_, tail)) = input.rsplit_once("v=") {
            return tail.to_string();
        }
        return input.to_string();
    }

    if input.contains("youtu.be/")
        && let Some(url) = parse_absolute(input)
        && let Some(id) = url.path_segments().and_then(|mut s| s.next())
        && !id.is_empty()
    {
        return id.to_string();
    }

    input.to_string()
}

/// Watch page URL for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

fn parse_absolute(input: &str) -> Option<Url> {
    Url::parse(input)
        .or_else(|_| Url::parse(&format!("https://{input}")))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s", "dQw4w9WgXcQ")]
    #[case("youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ")]
    #[case("https://youtu.be/dQw4w9WgXcQ?si=abc", "dQw4w9WgXcQ")]
    #[case("  dQw4w9WgXcQ  ", "dQw4w9WgXcQ")]
    fn extracts_video_id(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(extract_video_id(input), expected);
    }

    #[test]
    fn builds_watch_url() {
        assert_eq!(
            watch_url("abc123"),
            "https://www.youtube.com/watch?v=abc123"
        );
    }
}
