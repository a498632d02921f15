//! Authenticated session for the catalog and playback endpoints.
//!
//! Authentication happens once per session: cookies exported from a
//! logged-in browser supply the storefront and the media user token, and the
//! bearer token is scraped from the web player's versioned asset script.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, info, warn};

use crate::config::{Config, Endpoints};
use crate::error::{AmdlError, Result};
use crate::retry::{network_error, RetryPolicy};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:95.0) Gecko/20100101 Firefox/95.0";

/// Asset script patterns, tried in order.
const SCRIPT_PATH_PATTERNS: [&str; 3] = [
    r"/(assets/index-legacy[~-][^/]+\.js)",
    r#"/(assets/index(?:-legacy)?[^/'"]+\.js)"#,
    r#"/(assets/[^/'"]+index[^/'"]+\.js)"#,
];

const TOKEN_PATTERN: &str = r#"(eyJh[^"'\s]+)"#;

/// Characters of an unexpected response kept in extraction errors.
const FRAGMENT_LEN: usize = 1000;

const STOREFRONT_COOKIE: &str = "itua";
const MEDIA_USER_TOKEN_COOKIE: &str = "media-user-token";

fn script_path_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        SCRIPT_PATH_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    })
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("static regex"))
}

/// One entry of a Netscape `cookies.txt` file.
#[derive(Debug, Clone, PartialEq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub name: String,
    pub value: String,
}

/// Parse a Netscape-format cookie file. Malformed lines are skipped.
pub fn parse_netscape_cookies(content: &str) -> Vec<NetscapeCookie> {
    content
        .lines()
        .filter_map(|line| {
            // curl and browser exporters mark HttpOnly cookies with this prefix
            let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
            if line.trim().is_empty() || line.starts_with('#') {
                return None;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(NetscapeCookie {
                domain: fields[0].to_string(),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                name: fields[5].to_string(),
                value: fields[6].trim_end_matches('\r').to_string(),
            })
        })
        .collect()
}

/// Load cookies into a jar and pull out the values the session needs.
fn load_cookies(cookies: &[NetscapeCookie], jar: &Jar) -> Result<()> {
    for cookie in cookies {
        let host = cookie.domain.trim_start_matches('.');
        let url: Url = format!("https://{}", host)
            .parse()
            .map_err(|e| AmdlError::Config(format!("Bad cookie domain {:?}: {}", cookie.domain, e)))?;
        let mut header = format!(
            "{}={}; Domain={}; Path={}",
            cookie.name, cookie.value, host, cookie.path
        );
        if cookie.secure {
            header.push_str("; Secure");
        }
        jar.add_cookie_str(&header, &url);
    }
    Ok(())
}

fn cookie_value<'a>(cookies: &'a [NetscapeCookie], name: &str) -> Option<&'a str> {
    cookies
        .iter()
        .find(|c| c.name == name)
        .map(|c| c.value.as_str())
}

fn fragment(text: &str) -> String {
    text.chars().take(FRAGMENT_LEN).collect()
}

/// Find the versioned asset script path in the homepage HTML.
pub fn extract_script_path(home_page: &str) -> Result<String> {
    script_path_res()
        .iter()
        .find_map(|re| re.captures(home_page).map(|c| c[1].to_string()))
        .ok_or_else(|| AmdlError::AuthExtraction {
            what: "asset script path".to_string(),
            fragment: fragment(home_page),
        })
}

/// Find the bearer token in the asset script.
pub fn extract_token(script: &str) -> Result<String> {
    token_re()
        .captures(script)
        .map(|c| c[1].to_string())
        .ok_or_else(|| AmdlError::AuthExtraction {
            what: "bearer token".to_string(),
            fragment: fragment(script),
        })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| AmdlError::AuthExtraction {
        what: "header value".to_string(),
        fragment: fragment(value),
    })
}

/// Authenticated HTTP session.
///
/// Cheap to share behind an `Arc`; the catalog and playback clients hold
/// the same session.
#[derive(Debug)]
pub struct Session {
    client: Client,
    endpoints: Endpoints,
    storefront: String,
    language: String,
    retry: RetryPolicy,
}

impl Session {
    /// Authenticate using the cookies and endpoints from `config`.
    pub async fn new(config: &Config) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let mut storefront = config.storefront.clone();
        let mut media_user_token = String::new();

        if let Some(path) = &config.cookies_path {
            let cookies = read_cookie_file(path)?;
            load_cookies(&cookies, &jar)?;
            match cookie_value(&cookies, STOREFRONT_COOKIE) {
                Some(sf) => storefront = sf.to_lowercase(),
                None => warn!(
                    "No {} cookie, falling back to storefront {}",
                    STOREFRONT_COOKIE, storefront
                ),
            }
            media_user_token = cookie_value(&cookies, MEDIA_USER_TOKEN_COOKIE)
                .ok_or_else(|| AmdlError::AuthExtraction {
                    what: format!("{} cookie", MEDIA_USER_TOKEN_COOKIE),
                    fragment: path.display().to_string(),
                })?
                .to_string();
        }

        let retry = RetryPolicy::default();
        let scraper = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| AmdlError::Config(format!("Failed to create client: {}", e)))?;

        let token = scrape_token(&scraper, &config.endpoints.homepage, &retry).await?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_provider(jar)
            .default_headers(auth_headers(
                &token,
                &media_user_token,
                &config.endpoints.homepage,
            )?)
            .build()
            .map_err(|e| AmdlError::Config(format!("Failed to create client: {}", e)))?;

        info!("Session authenticated for storefront {}", storefront);

        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            storefront,
            language: config.language.clone(),
            retry,
        })
    }

    /// Build a session from an already known token, skipping scraping.
    pub fn with_token(
        token: &str,
        media_user_token: &str,
        storefront: &str,
        language: &str,
        endpoints: Endpoints,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(auth_headers(token, media_user_token, &endpoints.homepage)?)
            .build()
            .map_err(|e| AmdlError::Config(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            endpoints,
            storefront: storefront.to_string(),
            language: language.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn storefront(&self) -> &str {
        &self.storefront
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET with the language parameter attached.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).query(&[("l", self.language.as_str())])
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }
}

fn read_cookie_file(path: &Path) -> Result<Vec<NetscapeCookie>> {
    let content = std::fs::read_to_string(path).map_err(|e| AmdlError::filesystem(path, e))?;
    let cookies = parse_netscape_cookies(&content);
    debug!("Loaded {} cookies from {}", cookies.len(), path.display());
    Ok(cookies)
}

fn auth_headers(token: &str, media_user_token: &str, origin: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        reqwest::header::AUTHORIZATION,
        header_value(&format!("Bearer {}", token))?,
    );
    headers.insert(
        HeaderName::from_static("media-user-token"),
        header_value(media_user_token)?,
    );
    headers.insert(reqwest::header::ORIGIN, header_value(origin)?);
    headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("x-apple-renewal"),
        HeaderValue::from_static("true"),
    );
    Ok(headers)
}

async fn fetch_text(client: &Client, url: &str, retry: &RetryPolicy) -> Result<String> {
    retry
        .run(|| async move {
            debug!("GET {}", url);
            client
                .get(url)
                .send()
                .await
                .map_err(network_error(url))?
                .error_for_status()
                .map_err(network_error(url))?
                .text()
                .await
                .map_err(network_error(url))
        })
        .await
}

async fn scrape_token(client: &Client, homepage: &str, retry: &RetryPolicy) -> Result<String> {
    let home_page = fetch_text(client, homepage, retry).await?;
    let script_path = extract_script_path(&home_page)?;
    debug!("Found asset script {}", script_path);

    let script_url = format!("{}/{}", homepage.trim_end_matches('/'), script_path);
    let script = fetch_text(client, &script_url, retry).await?;
    extract_token(&script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .music.apple.com\tTRUE\t/\tTRUE\t0\titua\tGB\n\
        #HttpOnly_.music.apple.com\tTRUE\t/\tTRUE\t0\tmedia-user-token\tmut123\n\
        broken line\n";

    #[test]
    fn test_parse_netscape_cookies() {
        let cookies = parse_netscape_cookies(COOKIES);
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookie_value(&cookies, "itua"), Some("GB"));
        assert_eq!(cookie_value(&cookies, "media-user-token"), Some("mut123"));
        assert!(cookies[1].secure);
    }

    #[test]
    fn test_extract_script_path_prefers_legacy_bundle() {
        let html = r#"<script src="/assets/index-legacy-abc123.js"></script>
                      <script src="/assets/index-def456.js"></script>"#;
        assert_eq!(
            extract_script_path(html).unwrap(),
            "assets/index-legacy-abc123.js"
        );

        let html = r#"<script type="module" src="/assets/index-def456.js"></script>"#;
        assert_eq!(extract_script_path(html).unwrap(), "assets/index-def456.js");
    }

    #[test]
    fn test_extraction_failure_reports_fragment() {
        let page = "x".repeat(5000);
        match extract_script_path(&page) {
            Err(AmdlError::AuthExtraction { fragment, .. }) => assert_eq!(fragment.len(), 1000),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            extract_token("no token here"),
            Err(AmdlError::AuthExtraction { .. })
        ));
    }

    #[tokio::test]
    async fn test_homepage_error_status_is_not_an_extraction_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/", server.uri());
        let err = tokio_test::assert_err!(
            scrape_token(&Client::new(), &url, &RetryPolicy::none()).await
        );
        match err {
            AmdlError::Network { source, .. } => {
                assert_eq!(source.status(), Some(reqwest::StatusCode::FORBIDDEN))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_extract_token() {
        let js = r#"const a="x",t="eyJhbGciOiJFUzI1NiJ9.payload.sig",b=1;"#;
        assert_eq!(extract_token(js).unwrap(), "eyJhbGciOiJFUzI1NiJ9.payload.sig");
    }

    #[tokio::test]
    async fn test_session_scrapes_token_and_reads_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<script src="/assets/index-legacy~1a2b.js"></script>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/assets/index-legacy~1a2b.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"x="eyJhTOKEN""#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/probe"))
            .and(header("authorization", "Bearer eyJhTOKEN"))
            .and(header("media-user-token", "mut123"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cookies_path = dir.path().join("cookies.txt");
        std::fs::write(&cookies_path, COOKIES).unwrap();

        let mut config = Config::default();
        config.cookies_path = Some(cookies_path);
        config.endpoints.homepage = server.uri();

        let session = Session::new(&config).await.unwrap();
        assert_eq!(session.storefront(), "gb");

        let status = session
            .get(&format!("{}/probe", server.uri()))
            .send()
            .await
            .unwrap()
            .status();
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn test_missing_media_user_token_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cookies_path = dir.path().join("cookies.txt");
        std::fs::write(&cookies_path, ".music.apple.com\tTRUE\t/\tTRUE\t0\titua\tUS\n").unwrap();

        let mut config = Config::default();
        config.cookies_path = Some(cookies_path);

        assert!(matches!(
            Session::new(&config).await,
            Err(AmdlError::AuthExtraction { .. })
        ));
    }
}
