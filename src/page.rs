//! Web page fetching and cleaning.
//!
//! Turns a URL into plain text plus a title, and derives the namespace key a
//! page is indexed under.
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

/// Cleaned text shorter than this is treated as an extraction failure.
pub const MIN_TEXT_CHARS: usize = 50;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Elements whose content never counts as page text.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "iframe", "svg", "head"];

#[derive(Error, Debug)]
pub enum PageError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("failed to fetch URL: {0}")]
    Request(#[from] reqwest::Error),

    #[error("URL does not return HTML: {0}")]
    NotHtml(String),

    #[error("extracted text is too short ({0} characters)")]
    TooShort(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub url: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedHtml {
    pub title: String,
    pub text: String,
}

/// HTTP client with browser-like default headers and a request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, PageError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml"),
    );

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

/// Fetch `url` and extract its title and visible text.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<Page, PageError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| PageError::InvalidUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PageError::InvalidUrl(format!(
            "{url}: unsupported scheme {}",
            parsed.scheme()
        )));
    }

    let response = client.get(parsed).send().await?.error_for_status()?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.contains("text/html") {
        return Err(PageError::NotHtml(content_type));
    }

    let html = response.text().await?;
    let cleaned = clean_html(&html);

    let chars = cleaned.text.chars().count();
    if chars < MIN_TEXT_CHARS {
        return Err(PageError::TooShort(chars));
    }

    info!("Fetched and cleaned {url} ({chars} characters)");
    Ok(Page {
        url: url.to_string(),
        title: cleaned.title,
        text: cleaned.text,
    })
}

/// Strip markup and non-content elements, collapsing whitespace.
#[must_use]
pub fn clean_html(html: &str) -> CleanedHtml {
    let document = Html::parse_document(html);

    let title_selector = Selector::parse("title").expect("title selector");
    let title = document
        .select(&title_selector)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let body_selector = Selector::parse("body").expect("body selector");
    let root = document
        .select(&body_selector)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    collect_text(root, &mut raw);

    CleanedHtml {
        title,
        text: collapse_whitespace(&raw),
    }
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Namespace key for a page: the first 32 hex digits of the URL's blake3 hash.
#[must_use]
pub fn namespace_for_url(url: &str) -> String {
    let hash = blake3::hash(url.trim().as_bytes());
    hash.to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::response::{Html as HtmlBody, IntoResponse, Json};
    use axum::routing::get;

    const ARTICLE: &str = r#"
        <html>
          <head><title>  Machine   Learning </title><style>body { color: red }</style></head>
          <body>
            <script>var tracking = "ignored";</script>
            <h1>Basics</h1>
            <p>Neural networks learn
               representations from data.</p>
            <noscript>Enable JavaScript</noscript>
            <svg><text>chart label</text></svg>
            <iframe src="ad.html">frame text</iframe>
            <p>Gradient descent <b>minimizes</b> a loss function.</p>
          </body>
        </html>
    "#;

    #[test]
    fn test_clean_html_strips_non_content() {
        let cleaned = clean_html(ARTICLE);
        assert_eq!(cleaned.title, "Machine Learning");
        assert_eq!(
            cleaned.text,
            "Basics Neural networks learn representations from data. \
             Gradient descent minimizes a loss function."
        );
    }

    #[test]
    fn test_clean_html_untitled() {
        let cleaned = clean_html("<html><body><p>hello   world</p></body></html>");
        assert_eq!(cleaned.title, "Untitled");
        assert_eq!(cleaned.text, "hello world");
    }

    #[test]
    fn test_clean_html_fragment() {
        let cleaned = clean_html("just <em>some</em> text");
        assert_eq!(cleaned.text, "just some text");
    }

    #[test]
    fn test_namespace_for_url() {
        let a = namespace_for_url("https://example.com/a");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, namespace_for_url("https://example.com/a"));
        assert_ne!(a, namespace_for_url("https://example.com/b"));
    }

    async fn serve_fixture() -> String {
        let app = Router::new()
            .route("/article", get(|| async { HtmlBody(ARTICLE) }))
            .route("/short", get(|| async { HtmlBody("<p>tiny</p>") }))
            .route(
                "/json",
                get(|| async { Json(serde_json::json!({"a": 1})).into_response() }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_page() {
        let base = serve_fixture().await;
        let client = build_client(Duration::from_secs(5)).unwrap();

        let page = fetch_page(&client, &format!("{base}/article")).await.unwrap();
        assert_eq!(page.title, "Machine Learning");
        assert!(page.text.starts_with("Basics Neural networks"));

        assert!(matches!(
            fetch_page(&client, &format!("{base}/json")).await,
            Err(PageError::NotHtml(_))
        ));
        assert!(matches!(
            fetch_page(&client, &format!("{base}/short")).await,
            Err(PageError::TooShort(4))
        ));
        assert!(matches!(
            fetch_page(&client, &format!("{base}/missing")).await,
            Err(PageError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_page_rejects_bad_urls() {
        let client = build_client(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            fetch_page(&client, "not a url").await,
            Err(PageError::InvalidUrl(_))
        ));
        assert!(matches!(
            fetch_page(&client, "ftp://example.com/file").await,
            Err(PageError::InvalidUrl(_))
        ));
    }
}
