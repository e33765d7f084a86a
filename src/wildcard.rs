use crate::resolve::{Outcome, Resolver};
use std::collections::HashSet;
use std::net::IpAddr;
use tokio::time::Duration;

const ATTEMPTS: usize = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe a few random nonce labels under the apex and collect any addresses
/// they resolve to. A non-empty result means the zone answers for arbitrary
/// names, and those addresses must be filtered during brute-forcing.
pub async fn detect(resolver: &Resolver, apex: &str) -> HashSet<IpAddr> {
    let mut ips = HashSet::new();
    for i in 0..ATTEMPTS {
        let fqdn = format!("{:08x}-{}.{}", rand::random::<u32>(), i, apex);
        if let (Outcome::Resolved(addrs), _) = resolver.probe(&fqdn, PROBE_TIMEOUT).await {
            ips.extend(addrs);
        }
    }
    ips
}

/// True when every answered address belongs to the wildcard set.
pub fn is_wildcard(answers: &[IpAddr], wild: &HashSet<IpAddr>) -> bool {
    if wild.is_empty() || answers.is_empty() {
        return false;
    }
    answers.iter().all(|addr| wild.contains(addr))
}

#[cfg(test)]
mod tests {
    use super::is_wildcard;
    use std::collections::HashSet;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn wildcard_membership_logic() {
        let mut wild = HashSet::new();
        wild.insert(ip("1.2.3.4"));
        assert!(is_wildcard(&[ip("1.2.3.4")], &wild));
        assert!(!is_wildcard(&[ip("5.6.7.8")], &wild));
        assert!(!is_wildcard(&[ip("1.2.3.4"), ip("5.6.7.8")], &wild));
        assert!(!is_wildcard(&[], &wild));
        assert!(!is_wildcard(&[ip("1.2.3.4")], &HashSet::new()));
    }
}
