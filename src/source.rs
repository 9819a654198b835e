use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use tracing::{debug, warn};

use crate::dom::KmlDom;
use crate::env::ParseEnv;
use crate::error::{KmlError, KmlResult};

/// Zip local-file-header magic, the KMZ signature.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Raw parse input.
#[derive(Debug, Clone)]
pub enum KmlInput {
    Text(String),
    Bytes(Vec<u8>),
}

impl From<&str> for KmlInput {
    fn from(s: &str) -> Self {
        KmlInput::Text(s.to_string())
    }
}

impl From<String> for KmlInput {
    fn from(s: String) -> Self {
        KmlInput::Text(s)
    }
}

impl From<Vec<u8>> for KmlInput {
    fn from(b: Vec<u8>) -> Self {
        KmlInput::Bytes(b)
    }
}

/// Tunables for source resolution.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Ceiling on time spent decoding archive image assets. Exceeding it
    /// proceeds with a partial asset map rather than blocking the parse.
    pub asset_ceiling: Duration,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            asset_ceiling: Duration::from_secs(20),
        }
    }
}

/// Latch counting outstanding asynchronous dependencies (archive entries,
/// external stylesheets). Traversal may not begin until it is clear.
#[derive(Debug, Default)]
pub struct PendingResources {
    outstanding: AtomicUsize,
    failed: AtomicUsize,
}

impl PendingResources {
    pub fn add(&self, n: usize) {
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    pub fn resolve_one(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn fail_one(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_clear(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

/// The output of source resolution: a mutable document with all external
/// stylesheets grafted in, plus the archive asset map.
#[derive(Debug)]
pub struct ResolvedSource {
    pub dom: KmlDom,
    /// Archive file name to `data:` URI.
    pub assets: HashMap<String, String>,
    /// Image entries skipped because the decode ceiling elapsed.
    pub skipped_assets: usize,
}

fn main_doc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(doc|index)\.kml$").unwrap())
}

fn any_doc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.kml$").unwrap())
}

fn image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\.(png|jpg|jpeg|gif|bmp)$").unwrap())
}

/// Resolve raw input into a parsed document ready for traversal.
pub fn resolve(input: KmlInput, env: &ParseEnv, config: &ParseConfig) -> KmlResult<ResolvedSource> {
    match input {
        KmlInput::Text(text) => build_document(&text, HashMap::new(), HashMap::new(), env),
        KmlInput::Bytes(bytes) => {
            if bytes.starts_with(&ZIP_MAGIC) {
                resolve_archive(&bytes, env, config)
            } else {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                build_document(&text, HashMap::new(), HashMap::new(), env)
            }
        }
    }
}

fn resolve_archive(bytes: &[u8], env: &ParseEnv, config: &ParseConfig) -> KmlResult<ResolvedSource> {
    let entries = env
        .archive
        .list_entries(bytes)
        .map_err(KmlError::MalformedArchive)?;

    let mut main_entry: Option<usize> = None;
    let mut first_entry: Option<usize> = None;
    let mut images: Vec<usize> = Vec::new();
    let mut doc_entries: HashMap<String, String> = HashMap::new();

    for (i, entry) in entries.iter().enumerate() {
        if main_entry.is_none() && main_doc_regex().is_match(&entry.name) {
            main_entry = Some(i);
        } else if any_doc_regex().is_match(&entry.name) {
            if first_entry.is_none() {
                first_entry = Some(i);
            }
            doc_entries.insert(
                entry.name.clone(),
                String::from_utf8_lossy(&entry.data).into_owned(),
            );
        } else if image_regex().is_match(&entry.name) {
            images.push(i);
        }
    }

    let main = main_entry
        .or(first_entry)
        .ok_or(KmlError::NoPrimaryDocument)?;

    // Build the asset map before touching the main document, but never wait
    // past the ceiling; a partial map is accepted with a warning.
    let mut assets = HashMap::new();
    let mut skipped = 0usize;
    let start = Instant::now();
    for (done, &i) in images.iter().enumerate() {
        if start.elapsed() > config.asset_ceiling {
            skipped = images.len() - done;
            warn!(
                "Failed to process KMZ images in a timely manner - skipping {} images.",
                skipped
            );
            break;
        }
        let entry = &entries[i];
        if let Some(caps) = image_regex().captures(&entry.name) {
            let ext = caps[1].to_ascii_lowercase();
            assets.insert(
                entry.name.clone(),
                format!("data:image/{};base64,{}", ext, BASE64.encode(&entry.data)),
            );
        }
    }

    let text = String::from_utf8_lossy(&entries[main].data).into_owned();
    let mut resolved = build_document(&text, doc_entries, assets, env)?;
    resolved.skipped_assets = skipped;
    Ok(resolved)
}

fn build_document(
    text: &str,
    doc_entries: HashMap<String, String>,
    assets: HashMap<String, String>,
    env: &ParseEnv,
) -> KmlResult<ResolvedSource> {
    let mut dom = KmlDom::parse(text).map_err(|e| KmlError::MalformedDocument(e.to_string()))?;

    // Some documents omit the root <kml> tag. Google Earth accepts them, so
    // synthesize the proper root instead of failing.
    if dom.name(dom.root()) != "kml" {
        dom.wrap_root("kml");
    }

    load_external_styles(&mut dom, &doc_entries, env);

    Ok(ResolvedSource {
        dom,
        assets,
        skipped_assets: 0,
    })
}

/// Resolve every styleUrl that carries a URL part: rewrite the reference to
/// a local namespaced fragment, fetch the sheet (archive entry table first,
/// network second) and graft its styles into the main document. Failures
/// are non-fatal; the parse proceeds without those styles.
fn load_external_styles(dom: &mut KmlDom, doc_entries: &HashMap<String, String>, env: &ParseEnv) {
    let mut urls: Vec<String> = Vec::new();

    for el in dom.find_all("styleUrl") {
        let text = dom.text(el).trim().to_string();
        if text.is_empty() {
            continue;
        }
        let url = match text.find('#') {
            Some(x) => text[..x].trim().to_string(),
            None => text.clone(),
        };
        if url.is_empty() {
            continue;
        }

        // Namespace the reference so it matches the grafted style ids.
        dom.set_text(el, format!("#{}", text.replace('#', "_")));
        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    if urls.is_empty() {
        return;
    }

    let pending = PendingResources::default();
    pending.add(urls.len());

    for url in &urls {
        let content = match doc_entries.get(url) {
            Some(text) => Ok(text.clone()),
            None => env.fetcher.get(url),
        };
        match content {
            Ok(text) => {
                graft_stylesheet(dom, &text, url);
                pending.resolve_one();
            }
            Err(reason) => {
                warn!(
                    "{}",
                    KmlError::StylesheetFetch {
                        url: url.clone(),
                        reason
                    }
                );
                pending.fail_one();
            }
        }
    }

    debug_assert!(pending.is_clear());
    if pending.failed_count() > 0 {
        debug!(
            "{} external stylesheet(s) could not be loaded",
            pending.failed_count()
        );
    }
}

fn graft_stylesheet(dom: &mut KmlDom, content: &str, url: &str) {
    let sheet = match KmlDom::parse(content) {
        Ok(sheet) => sheet,
        Err(_) => {
            warn!(
                "{}",
                KmlError::MalformedStylesheet {
                    url: url.to_string()
                }
            );
            return;
        }
    };

    let attach_to = dom
        .find_first("Document")
        .or_else(|| dom.children(dom.root()).first().copied())
        .unwrap_or_else(|| dom.root());

    for style in sheet.find_all("Style") {
        let id = sheet.attr(style, "id").unwrap_or("").to_string();
        let grafted = dom.graft(&sheet, style);
        dom.set_attr(grafted, "id", format!("{}_{}", url, id));
        dom.append_child(attach_to, grafted);
    }
}
