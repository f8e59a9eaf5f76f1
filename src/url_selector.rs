use reqwest::Url;

use crate::{QosError, Result};

/// Chooses target URLs among a set of equivalent base URLs.
///
/// The dispatcher only reads from a selector, possibly from many threads at
/// once.
pub trait UrlSelector: Send + Sync {
    /// Returns `current` moved onto the next base URL in rotation, or `None`
    /// when no alternative exists.
    fn redirect_to_next(&self, current: &Url) -> Option<Url>;

    /// Resolves a server-provided redirect `target` (absolute or relative to
    /// `current`), accepting it only if it points at a known base URL.
    fn redirect_to(&self, current: &Url, target: &str) -> Option<Url>;

    /// Known base URLs, in rotation order.
    fn base_urls(&self) -> Vec<Url>;
}

/// Stateless round-robin rotation over a fixed list of base URLs.
///
/// A URL belongs to a base when scheme, host and port match and its path
/// starts with the base path on a segment boundary. Rotating a URL swaps that
/// base prefix for the next base in list order and keeps the rest of the
/// path, the query and the fragment.
#[derive(Clone, Debug)]
pub struct RoundRobinUrlSelector {
    base_urls: Vec<Url>,
}

impl RoundRobinUrlSelector {
    /// Builds a selector from base URLs such as `https://host:8443/api`.
    ///
    /// Fails when the list is empty or an entry is not a valid base URL.
    pub fn new<I, S>(base_urls: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let base_urls = base_urls
            .into_iter()
            .map(|raw| parse_base_url(raw.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if base_urls.is_empty() {
            return Err(QosError::Config(
                "at least one base URL is required".to_owned(),
            ));
        }

        Ok(Self { base_urls })
    }

    /// Index of the base with the longest path prefix matching `url`.
    fn base_index(&self, url: &Url) -> Option<usize> {
        self.base_urls
            .iter()
            .enumerate()
            .filter(|(_, base)| is_under_base(url, base))
            .max_by_key(|(_, base)| base_path(base).len())
            .map(|(index, _)| index)
    }
}

impl UrlSelector for RoundRobinUrlSelector {
    fn redirect_to_next(&self, current: &Url) -> Option<Url> {
        if self.base_urls.len() < 2 {
            return None;
        }

        match self.base_index(current) {
            Some(index) => {
                let from = &self.base_urls[index];
                let to = &self.base_urls[(index + 1) % self.base_urls.len()];
                Some(rebase(current, base_path(from), to))
            }
            None => Some(rebase(current, "", &self.base_urls[0])),
        }
    }

    fn redirect_to(&self, current: &Url, target: &str) -> Option<Url> {
        let resolved = current.join(target.trim()).ok()?;
        self.base_index(&resolved).map(|_| resolved)
    }

    fn base_urls(&self) -> Vec<Url> {
        self.base_urls.clone()
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|err| QosError::Config(format!("invalid base URL '{raw}': {err}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(QosError::Config(format!(
            "'{raw}' cannot be used as a base URL"
        )));
    }

    let path = url.path().trim_end_matches('/').to_owned();
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Base path without the trailing slash; empty for root bases.
fn base_path(base: &Url) -> &str {
    base.path().trim_end_matches('/')
}

fn is_under_base(url: &Url, base: &Url) -> bool {
    if url.scheme() != base.scheme()
        || url.host_str() != base.host_str()
        || url.port_or_known_default() != base.port_or_known_default()
    {
        return false;
    }

    let prefix = base_path(base);
    match url.path().strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn rebase(current: &Url, from_prefix: &str, to: &Url) -> Url {
    let suffix = current.path().strip_prefix(from_prefix).unwrap_or("");
    let mut next = to.clone();
    next.set_path(&format!("{}{}", base_path(to), suffix));
    next.set_query(current.query());
    next.set_fragment(current.fragment());
    next
}
