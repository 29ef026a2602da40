//! Link preview resolution: URL normalisation, well-known site shortcuts and
//! metadata fallbacks.
//!
//! Fetching and scraping the page is delegated to a [`LinkPreviewFetcher`];
//! this module only decides what the preview card shows.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::note::NoteLinkPreview;
use crate::{NotesError, Result};

/// OpenGraph and Twitter card metadata scraped from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenGraph {
    pub og_title: Option<String>,
    pub og_description: Option<String>,
    pub og_image: Option<String>,
    pub og_site_name: Option<String>,
    pub twitter_title: Option<String>,
    pub twitter_description: Option<String>,
    pub twitter_image: Option<String>,
}

/// Fetches page metadata for a URL.
pub trait LinkPreviewFetcher {
    fn fetch(&self, url: &Url) -> Result<OpenGraph>;
}

/// A resolved preview, before it is attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreviewData {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

impl LinkPreviewData {
    pub fn into_preview(self, id: impl Into<String>) -> NoteLinkPreview {
        NoteLinkPreview {
            id: id.into(),
            url: self.url,
            title: self.title,
            description: self.description,
            image: self.image,
            site_name: self.site_name,
            favicon: self.favicon,
        }
    }
}

fn scheme_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^https?://").expect("valid regex"))
}

fn youtube_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)(?:youtube\.com/(?:[^/]+/.+/|(?:v|e(?:mbed)?)/|.*[?&]v=)|youtu\.be/)([^"&?/\s]{11})"#,
        )
        .expect("valid regex")
    })
}

fn github_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)github\.com/([^/?#]+)(?:/([^/?#]+))?").expect("valid regex"))
}

/// Trims `raw`, defaults the scheme to `https://` and validates the result.
///
/// # Errors
///
/// Returns [`NotesError::InvalidUrl`] for empty input or anything that does
/// not parse as a URL with a host.
pub fn normalize_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(NotesError::InvalidUrl(raw.to_string()));
    }
    let candidate = if scheme_regex().is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|e| NotesError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if url.host_str().is_none() {
        return Err(NotesError::InvalidUrl(trimmed.to_string()));
    }
    Ok(url)
}

/// The 11-character video id of a YouTube watch, embed or short link.
pub fn youtube_video_id(url: &str) -> Option<&str> {
    youtube_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Hostname shown on a preview card, without a leading `www.`.
pub fn display_domain(url: &str) -> String {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => host.strip_prefix("www.").map(str::to_string).unwrap_or(host),
        None => url.to_string(),
    }
}

fn favicon_service(host: &str, size: u32) -> String {
    format!("https://www.google.com/s2/favicons?domain={host}&sz={size}")
}

/// Builds the preview card for `raw_url`.
///
/// YouTube links never hit the network. When the fetch fails the preview
/// falls back to GitHub profile/repository cards or to hostname defaults, so
/// only an invalid URL is an error.
pub fn resolve_preview<F>(fetcher: &F, raw_url: &str) -> Result<LinkPreviewData>
where
    F: LinkPreviewFetcher + ?Sized,
{
    let url = normalize_url(raw_url)?;
    let url_str = url.as_str();
    let host = url.host_str().unwrap_or_default().to_string();

    if let Some(video_id) = youtube_video_id(url_str) {
        return Ok(LinkPreviewData {
            url: url_str.to_string(),
            title: "YouTube Video".to_string(),
            description: Some("Watch this video on YouTube".to_string()),
            image: Some(format!("https://img.youtube.com/vi/{video_id}/maxresdefault.jpg")),
            site_name: Some("YouTube".to_string()),
            favicon: Some("https://www.youtube.com/favicon.ico".to_string()),
        });
    }

    let og = match fetcher.fetch(&url) {
        Ok(og) => og,
        Err(e) => {
            log::warn!("Link preview fetch failed for {url_str}: {e}");
            return Ok(fallback_preview(url_str, &host));
        }
    };

    Ok(LinkPreviewData {
        url: url_str.to_string(),
        title: og.og_title.or(og.twitter_title).unwrap_or_else(|| host.clone()),
        description: Some(
            og.og_description
                .or(og.twitter_description)
                .unwrap_or_else(|| url_str.to_string()),
        ),
        image: Some(
            og.og_image
                .or(og.twitter_image)
                .unwrap_or_else(|| favicon_service(&host, 128)),
        ),
        site_name: Some(og.og_site_name.unwrap_or_else(|| host.clone())),
        favicon: Some(favicon_service(&host, 64)),
    })
}

fn fallback_preview(url: &str, host: &str) -> LinkPreviewData {
    if let Some(caps) = github_regex().captures(url) {
        let user = &caps[1];
        let repo = caps.get(2).map(|m| m.as_str());
        return LinkPreviewData {
            url: url.to_string(),
            title: match repo {
                Some(repo) => format!("{user}/{repo}"),
                None => user.to_string(),
            },
            description: Some(
                if repo.is_some() { "GitHub Repository" } else { "GitHub Profile" }.to_string(),
            ),
            image: Some(format!("https://github.com/{user}.png")),
            site_name: Some("GitHub".to_string()),
            favicon: Some("https://github.com/favicon.ico".to_string()),
        };
    }

    LinkPreviewData {
        url: url.to_string(),
        title: host.to_string(),
        description: Some(url.to_string()),
        image: Some(favicon_service(host, 128)),
        site_name: Some(host.to_string()),
        favicon: Some(favicon_service(host, 64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct StaticFetcher {
        result: Option<OpenGraph>,
        calls: Cell<usize>,
    }

    impl StaticFetcher {
        fn ok(og: OpenGraph) -> Self {
            Self {
                result: Some(og),
                calls: Cell::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: None,
                calls: Cell::new(0),
            }
        }
    }

    impl LinkPreviewFetcher for StaticFetcher {
        fn fetch(&self, _url: &Url) -> Result<OpenGraph> {
            self.calls.set(self.calls.get() + 1);
            self.result
                .clone()
                .ok_or_else(|| NotesError::Transport("timed out".to_string()))
        }
    }

    #[test]
    fn test_normalize_url_adds_scheme() {
        assert_eq!(
            normalize_url("  example.com/page ").unwrap().as_str(),
            "https://example.com/page"
        );
        assert_eq!(
            normalize_url("HTTP://example.com").unwrap().scheme(),
            "http"
        );
        assert!(normalize_url("   ").is_err());
        assert!(normalize_url("http://").is_err());
    }

    #[test]
    fn test_youtube_short_circuits_fetch() {
        let fetcher = StaticFetcher::failing();
        let preview = resolve_preview(&fetcher, "https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(preview.title, "YouTube Video");
        assert_eq!(
            preview.image.as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/maxresdefault.jpg")
        );
        assert_eq!(fetcher.calls.get(), 0);

        assert_eq!(youtube_video_id("youtu.be/dQw4w9WgXcQ"), Some("dQw4w9WgXcQ"));
        assert_eq!(youtube_video_id("https://example.com/watch?v=short"), None);
    }

    #[test]
    fn test_og_then_twitter_then_host_fallbacks() {
        let fetcher = StaticFetcher::ok(OpenGraph {
            twitter_title: Some("Tweet title".to_string()),
            og_image: Some("https://example.com/og.png".to_string()),
            ..OpenGraph::default()
        });
        let preview = resolve_preview(&fetcher, "example.com").unwrap();
        assert_eq!(preview.title, "Tweet title");
        assert_eq!(preview.description.as_deref(), Some("https://example.com/"));
        assert_eq!(preview.image.as_deref(), Some("https://example.com/og.png"));
        assert_eq!(preview.site_name.as_deref(), Some("example.com"));
        assert_eq!(
            preview.favicon.as_deref(),
            Some("https://www.google.com/s2/favicons?domain=example.com&sz=64")
        );
    }

    #[test]
    fn test_github_fallback_on_fetch_failure() {
        let fetcher = StaticFetcher::failing();
        let repo = resolve_preview(&fetcher, "github.com/rust-lang/rust").unwrap();
        assert_eq!(repo.title, "rust-lang/rust");
        assert_eq!(repo.description.as_deref(), Some("GitHub Repository"));
        assert_eq!(repo.image.as_deref(), Some("https://github.com/rust-lang.png"));

        let profile = resolve_preview(&fetcher, "https://github.com/rust-lang").unwrap();
        assert_eq!(profile.title, "rust-lang");
        assert_eq!(profile.description.as_deref(), Some("GitHub Profile"));
    }

    #[test]
    fn test_hostname_fallback_on_fetch_failure() {
        let fetcher = StaticFetcher::failing();
        let preview = resolve_preview(&fetcher, "https://blog.example.org/post").unwrap();
        assert_eq!(preview.title, "blog.example.org");
        assert_eq!(preview.site_name.as_deref(), Some("blog.example.org"));
        assert_eq!(
            preview.image.as_deref(),
            Some("https://www.google.com/s2/favicons?domain=blog.example.org&sz=128")
        );
    }

    #[test]
    fn test_display_domain() {
        assert_eq!(display_domain("https://www.rust-lang.org/learn"), "rust-lang.org");
        assert_eq!(display_domain("https://docs.rs"), "docs.rs");
        assert_eq!(display_domain("not a url"), "not a url");
    }

    #[test]
    fn test_into_preview_keeps_fields() {
        let data = LinkPreviewData {
            url: "https://docs.rs/".to_string(),
            title: "Docs.rs".to_string(),
            description: None,
            image: None,
            site_name: Some("docs.rs".to_string()),
            favicon: None,
        };
        let preview = data.into_preview("preview-1");
        assert_eq!(preview.id, "preview-1");
        assert_eq!(preview.site_name.as_deref(), Some("docs.rs"));
    }
}
