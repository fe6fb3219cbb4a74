use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{MigrationConfig, SourceCredentials};
use crate::page::{ImageRef, PageKind, PageRef};
use crate::runtime::ensure_parent_dir;

pub const NS_MAIN: i32 = 0;
pub const NS_CATEGORY: i32 = 14;

const BATCH_SIZE: usize = 50;

/// Read side of the source wiki as the pipeline needs it.
pub trait SourceProvider {
    /// Page titles of one kind, in source order.
    fn list_titles(&mut self, kind: PageKind) -> Result<Vec<String>>;
    /// Pages with body, categories and embedded images, in the order asked for.
    fn fetch_pages(&mut self, titles: &[String]) -> Result<Vec<PageRef>>;
    /// Every category name known to the source, without namespace prefix.
    fn all_categories(&mut self) -> Result<Vec<String>>;
    /// Store the image bytes at `destination`; returns the byte count.
    fn download_image(&mut self, image: &ImageRef, destination: &Path) -> Result<u64>;
}

/// Content pages followed by category pages.
pub fn fetch_all_pages(
    source: &mut dyn SourceProvider,
    include_categories: bool,
) -> Result<Vec<PageRef>> {
    let mut titles = source.list_titles(PageKind::Content)?;
    if include_categories {
        titles.extend(source.list_titles(PageKind::Category)?);
    }
    info!("fetching {} pages from source", titles.len());
    source.fetch_pages(&titles)
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("M2C_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_ms: env_value_u64("M2C_RATE_LIMIT_MS", 300),
            max_retries: env_value_usize("M2C_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("M2C_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    /// Build a client and log in; any failure here aborts the run.
    pub fn connect(config: MediaWikiClientConfig, credentials: &SourceCredentials) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.login(&credentials.username, &credentials.password)?;
        info!("logged in to {} as {}", client.config.api_url, credentials.username);
        Ok(client)
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(&[
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ])?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => Ok(()),
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid source API URL: {}", self.config.api_url))?;
        let pairs = api_pairs(params);

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = api_pairs(params);
        self.apply_rate_limit();
        let response = self
            .client
            .post(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        check_api_error(payload)
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        debug!("retrying MediaWiki request (attempt {})", attempt + 1);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn image_urls(&mut self, file_titles: &[String]) -> Result<BTreeMap<String, String>> {
        let mut urls = BTreeMap::new();
        for batch in file_titles.chunks(BATCH_SIZE) {
            let response = self.request_json_get(&[
                ("action", "query".to_string()),
                ("titles", batch.join("|")),
                ("prop", "imageinfo".to_string()),
                ("iiprop", "url".to_string()),
            ])?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode imageinfo API response")?;
            for page in parsed.query.pages {
                if let Some(info) = page.imageinfo.into_iter().next() {
                    urls.insert(page.title, info.url);
                }
            }
        }
        Ok(urls)
    }
}

impl SourceProvider for MediaWikiClient {
    fn list_titles(&mut self, kind: PageKind) -> Result<Vec<String>> {
        let namespace = match kind {
            PageKind::Content => NS_MAIN,
            PageKind::Category => NS_CATEGORY,
        };
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apnamespace", namespace.to_string()),
                ("aplimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("apcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allpages API response")?;
            titles.extend(parsed.query.allpages.into_iter().map(|item| item.title));

            continue_token = parsed.continuation.and_then(|cont| cont.apcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn fetch_pages(&mut self, titles: &[String]) -> Result<Vec<PageRef>> {
        let mut fetched = BTreeMap::new();
        for batch in titles.chunks(BATCH_SIZE) {
            let mut continuation: BTreeMap<String, String> = BTreeMap::new();
            loop {
                let response = {
                    let mut params = vec![
                        ("action", "query".to_string()),
                        ("titles", batch.join("|")),
                        ("prop", "revisions|categories|images".to_string()),
                        ("rvprop", "content".to_string()),
                        ("rvslots", "main".to_string()),
                        ("cllimit", "max".to_string()),
                        ("imlimit", "max".to_string()),
                    ];
                    for (key, value) in &continuation {
                        params.push((key.as_str(), value.clone()));
                    }
                    self.request_json_get(&params)?
                };
                continuation = merge_page_batch(response, &mut fetched)?;
                if continuation.is_empty() {
                    break;
                }
            }
        }

        let file_titles = fetched
            .values()
            .flat_map(|page: &PageRef| page.images.iter().map(|image| image.name.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        let urls = self.image_urls(&file_titles)?;
        for page in fetched.values_mut() {
            for image in &mut page.images {
                image.url = urls.get(&image.name).cloned();
            }
        }

        Ok(order_like(titles, fetched))
    }

    fn all_categories(&mut self) -> Result<Vec<String>> {
        let mut categories = Vec::new();
        let mut continue_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "allcategories".to_string()),
                ("aclimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("accontinue", token.clone()));
            }
            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode allcategories API response")?;
            categories.extend(parsed.query.allcategories.into_iter().map(|item| item.category));

            continue_token = parsed.continuation.and_then(|cont| cont.accontinue);
            if continue_token.is_none() {
                break;
            }
        }
        Ok(categories)
    }

    fn download_image(&mut self, image: &ImageRef, destination: &Path) -> Result<u64> {
        let url = image
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("no download URL known for {}", image.name))?;
        self.apply_rate_limit();
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .with_context(|| format!("failed to download {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("image download failed with HTTP {status}: {url}");
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read image body from {url}"))?;
        ensure_parent_dir(destination)?;
        fs::write(destination, &bytes)
            .with_context(|| format!("failed to write {}", destination.display()))?;
        Ok(bytes.len() as u64)
    }
}

/// Fold one `prop=revisions|categories|images` response into `pages`; returns
/// the continuation parameters, empty once the batch is complete.
fn merge_page_batch(
    response: Value,
    pages: &mut BTreeMap<String, PageRef>,
) -> Result<BTreeMap<String, String>> {
    let parsed: PageBatchResponse =
        serde_json::from_value(response).context("failed to decode page content API response")?;

    for item in parsed.query.pages {
        if item.missing.unwrap_or(false) {
            continue;
        }
        let page = pages
            .entry(item.title.clone())
            .or_insert_with(|| PageRef::new(item.title.clone(), Vec::new(), ""));

        if let Some(content) = item
            .revisions
            .first()
            .and_then(|revision| revision.slots.as_ref())
            .and_then(|slots| slots.main.as_ref())
            .map(|slot| slot.content.clone())
        {
            page.body = content;
        }
        for category in item.categories {
            if !page.categories.contains(&category.title) {
                page.categories.push(category.title);
            }
        }
        for image in item.images {
            if !page.images.iter().any(|known| known.name == image.title) {
                page.images.push(ImageRef {
                    name: image.title,
                    url: None,
                });
            }
        }
    }

    Ok(parsed
        .continuation
        .into_iter()
        .flatten()
        .filter(|(key, _)| key != "batchcomplete")
        .filter_map(|(key, value)| match value {
            Value::String(text) => Some((key, text)),
            Value::Number(number) => Some((key, number.to_string())),
            _ => None,
        })
        .collect())
}

/// Pages in the order they were requested; titles the API renamed follow.
fn order_like(titles: &[String], mut fetched: BTreeMap<String, PageRef>) -> Vec<PageRef> {
    let mut ordered = Vec::with_capacity(fetched.len());
    for title in titles {
        let key = title.replace('_', " ");
        if let Some(page) = fetched.remove(title).or_else(|| fetched.remove(&key)) {
            ordered.push(page);
        }
    }
    ordered.extend(fetched.into_values());
    ordered
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    allcategories: Vec<CategoryQueryItem>,
    #[serde(default)]
    pages: Vec<ImageInfoPage>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
    accontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct CategoryQueryItem {
    category: String,
}

#[derive(Debug, Deserialize)]
struct ImageInfoPage {
    title: String,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    url: String,
}

#[derive(Debug, Deserialize, Default)]
struct PageBatchResponse {
    #[serde(default)]
    query: PageBatchPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize, Default)]
struct PageBatchPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<TitleQueryItem>,
    #[serde(default)]
    images: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}
