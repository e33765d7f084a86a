use crate::error::FatalError;
use std::net::IpAddr;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use trust_dns_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::system_conf;
use trust_dns_resolver::TokioAsyncResolver;

/// Result of a single probe. Only `Resolved` with at least one address
/// promotes the candidate.
#[derive(Debug, Clone)]
pub enum Outcome {
    Resolved(Vec<IpAddr>),
    NotFound,
    Timeout,
    TransientError(&'static str),
}

/// Collapsed outcome used by the tuning window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Resolved,
    NotFound,
    Timeout,
    Transient,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Resolved(_) => OutcomeKind::Resolved,
            Outcome::NotFound => OutcomeKind::NotFound,
            Outcome::Timeout => OutcomeKind::Timeout,
            Outcome::TransientError(_) => OutcomeKind::Transient,
        }
    }
}

const APEX_ATTEMPTS: u32 = 2;
const APEX_TIMEOUT: Duration = Duration::from_secs(3);

/// Thin wrapper over the host's stub resolver. The per-query deadline is
/// always enforced here with `tokio::time::timeout`, so the controller's
/// current `T` governs regardless of the library's internal retry settings.
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    /// Build from the system resolver configuration, falling back to the
    /// library defaults when it cannot be read.
    pub fn from_system() -> Self {
        let inner = match system_conf::read_system_conf() {
            Ok((config, _)) => TokioAsyncResolver::tokio(config, Self::opts()),
            Err(_) => TokioAsyncResolver::tokio(ResolverConfig::default(), Self::opts()),
        };
        Self { inner }
    }

    fn opts() -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        // One shot per query; retrying is the caller's decision, and our own
        // deadline must fire before the library's.
        opts.attempts = 1;
        opts.timeout = Duration::from_secs(5);
        opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
        opts
    }

    /// One A/AAAA probe with an end-to-end deadline. Returns the outcome and
    /// the observed latency.
    pub async fn probe(&self, fqdn: &str, limit: Duration) -> (Outcome, Duration) {
        let started = Instant::now();
        // Trailing dot: query the name absolutely, never through search domains.
        let absolute = format!("{fqdn}.");
        let outcome = match timeout(limit, self.inner.lookup_ip(absolute.as_str())).await {
            Err(_) => Outcome::Timeout,
            Ok(Ok(lookup)) => {
                let addrs: Vec<IpAddr> = lookup.iter().collect();
                if addrs.is_empty() {
                    Outcome::NotFound
                } else {
                    Outcome::Resolved(addrs)
                }
            }
            Ok(Err(err)) => classify(&err),
        };
        (outcome, started.elapsed())
    }

    /// Confirm the apex itself resolves before any brute-forcing starts.
    pub async fn check_apex(&self, apex: &str) -> Result<(), FatalError> {
        for attempt in 1..=APEX_ATTEMPTS {
            match self.probe(apex, APEX_TIMEOUT).await {
                (Outcome::Resolved(_), _) => return Ok(()),
                (Outcome::NotFound, _) => {
                    return Err(FatalError::ApexUnreachable(format!(
                        "{apex} has no A/AAAA records"
                    )));
                }
                (Outcome::Timeout, _) | (Outcome::TransientError(_), _) if attempt < APEX_ATTEMPTS => {}
                (Outcome::Timeout, _) => {
                    return Err(FatalError::ApexUnreachable(format!(
                        "resolving {apex} timed out"
                    )));
                }
                (Outcome::TransientError(kind), _) => {
                    return Err(FatalError::ApexUnreachable(format!(
                        "resolving {apex} failed ({kind})"
                    )));
                }
            }
        }
        Err(FatalError::ApexUnreachable(format!(
            "resolving {apex} timed out"
        )))
    }
}

fn classify(err: &ResolveError) -> Outcome {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => Outcome::NotFound,
        ResolveErrorKind::Timeout => Outcome::Timeout,
        ResolveErrorKind::Io(_) => Outcome::TransientError("io"),
        ResolveErrorKind::Proto(_) => Outcome::TransientError("proto"),
        ResolveErrorKind::NoConnections => Outcome::TransientError("no-connections"),
        _ => Outcome::TransientError("resolver"),
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, OutcomeKind};

    #[test]
    fn kind_collapses_variants() {
        assert_eq!(Outcome::Resolved(vec![]).kind(), OutcomeKind::Resolved);
        assert_eq!(Outcome::NotFound.kind(), OutcomeKind::NotFound);
        assert_eq!(Outcome::Timeout.kind(), OutcomeKind::Timeout);
        assert_eq!(
            Outcome::TransientError("io").kind(),
            OutcomeKind::Transient
        );
    }
}
