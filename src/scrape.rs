use crate::progress::Reporter;
use crate::store::{LabelStore, Provenance};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use tokio::time::{sleep, Duration};

/// Per-request deadline for every passive source.
pub const SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(SCRAPE_TIMEOUT)
        .user_agent(concat!("dnsmap/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// A passive discovery source: fetch candidate labels for the apex without
/// issuing DNS queries. Failures are the caller's to log, never fatal.
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &'static str;
    async fn scrape(&self, client: &Client, apex: &str) -> Result<Vec<String>>;
}

/// All known sources. The orchestrator runs them concurrently and merges
/// their output into the label store.
pub fn registry() -> Vec<Box<dyn Scraper>> {
    vec![
        Box::new(CertTransparency),
        Box::new(HostSearch),
        Box::new(ThreatCrowd),
    ]
}

/// Certificate-transparency log search (crt.sh).
struct CertTransparency;

#[async_trait]
impl Scraper for CertTransparency {
    fn name(&self) -> &'static str {
        "crt.sh"
    }

    async fn scrape(&self, client: &Client, apex: &str) -> Result<Vec<String>> {
        let url = format!("https://crt.sh/?q=%25.{apex}&output=json");
        let body = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        labels_from_ct(&body, apex)
    }
}

/// Passive-DNS host search (hackertarget), newline-delimited `host,ip` rows.
struct HostSearch;

#[async_trait]
impl Scraper for HostSearch {
    fn name(&self) -> &'static str {
        "hackertarget"
    }

    async fn scrape(&self, client: &Client, apex: &str) -> Result<Vec<String>> {
        let url = format!("https://api.hackertarget.com/hostsearch/?q={apex}");
        let body = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(labels_from_host_pairs(&body, apex))
    }
}

/// Threat-intel aggregator report with a `subdomains` array.
struct ThreatCrowd;

#[async_trait]
impl Scraper for ThreatCrowd {
    fn name(&self) -> &'static str {
        "threatcrowd"
    }

    async fn scrape(&self, client: &Client, apex: &str) -> Result<Vec<String>> {
        let url = format!("https://www.threatcrowd.org/searchApi/v2/domain/report/?domain={apex}");
        let body = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        labels_from_subdomain_report(&body, apex)
    }
}

/// Run every registered scraper concurrently, merging results into the store
/// as each source completes and logging one summary line per source. A label
/// counts as new only when it is neither in the store already nor a wordlist
/// word; wordlist words keep their wordlist provenance even when a source
/// reports them first. Returns `(total yielded, new)` across all sources.
pub async fn run_scrapers(
    client: &Client,
    apex: &str,
    store: &LabelStore,
    wordlist: &HashSet<&str>,
    reporter: &Reporter,
) -> (usize, usize) {
    let mut tasks = FuturesUnordered::new();
    for scraper in registry() {
        let client = client.clone();
        let apex = apex.to_string();
        tasks.push(async move {
            let name = scraper.name();
            let result = scrape_with_retry(scraper.as_ref(), &client, &apex).await;
            (name, result)
        });
    }

    let mut grand_total = 0usize;
    let mut grand_new = 0usize;
    while let Some((name, result)) = tasks.next().await {
        match result {
            Ok(labels) => {
                let total = labels.len();
                let mut new = 0usize;
                for label in &labels {
                    let provenance = if wordlist.contains(label.as_str()) {
                        Provenance::Wordlist
                    } else {
                        Provenance::Scrape
                    };
                    if store.add(label, provenance) && provenance == Provenance::Scrape {
                        new += 1;
                    }
                }
                grand_total += total;
                grand_new += new;
                reporter.info(&format!(
                    "scrape {name} yielded {total} labels, of which {new} are new"
                ));
            }
            Err(err) => {
                reporter.info(&format!("scrape {name} failed: {err:#}"));
            }
        }
    }
    (grand_total, grand_new)
}

/// One retry on failure; sources are best-effort.
async fn scrape_with_retry(
    scraper: &dyn Scraper,
    client: &Client,
    apex: &str,
) -> Result<Vec<String>> {
    match scraper.scrape(client, apex).await {
        Ok(labels) => Ok(labels),
        Err(_) => {
            sleep(RETRY_DELAY).await;
            scraper.scrape(client, apex).await
        }
    }
}

/// Derive a candidate label from a hostname: strip a `*.` prefix and a
/// trailing dot, then the name must sit strictly under the apex.
fn label_of(host: &str, apex: &str) -> Option<String> {
    let host = host
        .trim()
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase();
    let suffix = format!(".{apex}");
    host.strip_suffix(suffix.as_str())
        .filter(|label| !label.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
struct CtEntry {
    name_value: String,
}

/// Certificate-transparency body: a JSON array of entries whose `name_value`
/// carries newline-separated names.
fn labels_from_ct(body: &str, apex: &str) -> Result<Vec<String>> {
    let entries: Vec<CtEntry> = serde_json::from_str(body)?;
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for entry in entries {
        for name in entry.name_value.lines() {
            if let Some(label) = label_of(name, apex) {
                if seen.insert(label.clone()) {
                    labels.push(label);
                }
            }
        }
    }
    Ok(labels)
}

/// Passive-DNS body: `host,ip` per line.
fn labels_from_host_pairs(body: &str, apex: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for line in body.lines() {
        let host = line.split(',').next().unwrap_or("");
        if let Some(label) = label_of(host, apex) {
            if seen.insert(label.clone()) {
                labels.push(label);
            }
        }
    }
    labels
}

#[derive(Deserialize)]
struct SubdomainReport {
    #[serde(default)]
    subdomains: Vec<String>,
}

/// Threat-intel body: JSON object with a `subdomains` array of hostnames.
fn labels_from_subdomain_report(body: &str, apex: &str) -> Result<Vec<String>> {
    let report: SubdomainReport = serde_json::from_str(body)?;
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for host in report.subdomains {
        if let Some(label) = label_of(&host, apex) {
            if seen.insert(label.clone()) {
                labels.push(label);
            }
        }
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_body_splits_names_and_strips_wildcards() {
        let body = r#"[
            {"name_value": "*.example.com\nwww.example.com"},
            {"name_value": "api.example.com"},
            {"name_value": "deep.api.example.com"},
            {"name_value": "example.com"},
            {"name_value": "www.other.org"}
        ]"#;
        let labels = labels_from_ct(body, "example.com").unwrap();
        assert_eq!(labels, vec!["www", "api", "deep.api"]);
    }

    #[test]
    fn ct_body_rejects_invalid_json() {
        assert!(labels_from_ct("error: rate limited", "example.com").is_err());
    }

    #[test]
    fn host_pairs_keep_only_names_under_the_apex() {
        let body = "www.example.com,93.184.216.34\n\
                    mail.example.com,93.184.216.35\n\
                    example.com,93.184.216.34\n\
                    evil.example.org,10.0.0.1\n\
                    www.example.com,93.184.216.36\n";
        let labels = labels_from_host_pairs(body, "example.com");
        assert_eq!(labels, vec!["www", "mail"]);
    }

    #[test]
    fn subdomain_report_filters_and_strips() {
        let body = r#"{"response_code":"1","subdomains":["API.example.com","cdn.example.com.","example.com","x.invalid"]}"#;
        let labels = labels_from_subdomain_report(body, "example.com").unwrap();
        assert_eq!(labels, vec!["api", "cdn"]);
    }

    #[test]
    fn subdomain_report_tolerates_missing_array() {
        let labels = labels_from_subdomain_report(r#"{"response_code":"0"}"#, "example.com").unwrap();
        assert!(labels.is_empty());
    }

    #[test]
    fn label_equal_to_apex_is_dropped() {
        assert_eq!(label_of("example.com", "example.com"), None);
        assert_eq!(label_of("*.example.com", "example.com"), None);
        assert_eq!(label_of("www.example.com", "example.com").as_deref(), Some("www"));
    }

    #[test]
    fn registry_lists_all_three_sources() {
        let names: Vec<&str> = registry().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["crt.sh", "hackertarget", "threatcrowd"]);
    }
}
