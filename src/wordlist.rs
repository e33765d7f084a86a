//! Built-in candidate wordlist, embedded at compile time.

const EMBEDDED_WORDLIST: &str = include_str!("../wordlists/subdomain.txt");

/// The bundled labels, one per line in stored order. Blank lines and `#`
/// comments are skipped. No I/O, restartable.
pub fn builtin() -> Vec<&'static str> {
    EMBEDDED_WORDLIST
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::builtin;

    #[test]
    fn wordlist_is_nonempty_and_clean() {
        let words = builtin();
        assert!(!words.is_empty());
        assert!(words.iter().all(|w| !w.is_empty()));
        assert!(words.iter().all(|w| !w.starts_with('#')));
        assert!(words.iter().all(|w| !w.contains(char::is_whitespace)));
    }

    #[test]
    fn wordlist_is_lowercase_and_unique() {
        let words = builtin();
        assert!(words.iter().all(|w| w.to_ascii_lowercase() == **w));
        let mut dedup = words.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), words.len());
    }

    #[test]
    fn contains_the_usual_suspects() {
        let words = builtin();
        for expected in ["www", "mail", "ftp", "api"] {
            assert!(words.contains(&expected), "missing {expected}");
        }
    }
}
