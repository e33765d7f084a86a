use crate::error::FatalError;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "dnsmap",
    version,
    about = "DNS network mapper: enumerate live subdomains of an apex domain",
    long_about = "Enumerates live subdomains of the given apex domain by combining a \
built-in wordlist with passive scraping sources and confirming every candidate \
via live DNS resolution.\n\nConfirmed subdomains are written to stdout, one FQDN \
per line; progress and telemetry go to stderr, so the output can be piped \
directly into downstream tooling."
)]
pub struct Cli {
    /// Apex domain whose subdomains will be enumerated
    #[arg(value_name = "DOMAIN")]
    pub domain: String,
}

/// Fold and validate the user-supplied apex. A single trailing dot is
/// tolerated; anything that is not a plausible registered domain is an
/// argument error.
pub fn normalize_apex(raw: &str) -> Result<String, FatalError> {
    let apex = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if apex.is_empty() {
        return Err(FatalError::Argument("empty domain".into()));
    }
    if !apex.contains('.') {
        return Err(FatalError::Argument(format!(
            "'{apex}' is not a fully qualified domain"
        )));
    }
    let legal = apex
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if !legal || apex.split('.').any(|part| part.is_empty()) {
        return Err(FatalError::Argument(format!("malformed domain '{apex}'")));
    }
    Ok(apex)
}

#[cfg(test)]
mod tests {
    use super::normalize_apex;

    #[test]
    fn folds_case_and_trailing_dot() {
        assert_eq!(normalize_apex("Example.COM.").unwrap(), "example.com");
    }

    #[test]
    fn rejects_bare_label() {
        assert!(normalize_apex("localhost").is_err());
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(normalize_apex("").is_err());
        assert!(normalize_apex("   ").is_err());
        assert!(normalize_apex("exa mple.com").is_err());
        assert!(normalize_apex("example..com").is_err());
    }
}
