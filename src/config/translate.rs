//! ASCII-compatible encoding for unicode domain labels.
//!
//! Authorities and filesystem artifacts work with the ASCII transport form
//! of a domain; operators configure the readable unicode form. When any
//! domain in a group carries non-ASCII labels the whole group is translated
//! and a reverse mapping (ASCII → original) is kept for display and for
//! matching domain-specific handler overrides.
//!
//! Wildcard entries (`*.example`) translate the suffix only, preserving the
//! wildcard marker.

use std::collections::BTreeMap;

use tracing::warn;

/// Translate non-ASCII domains to their ASCII-compatible form.
///
/// Returns an empty mapping when every domain is pure ASCII. Without the
/// `idna` feature translation is unavailable: a warning is produced and the
/// unicode names are used verbatim downstream (the authority will most
/// likely reject them).
pub fn translate_domains(domains: &[String]) -> BTreeMap<String, String> {
    if domains.iter().all(|d| d.is_ascii()) {
        return BTreeMap::new();
    }
    translate_non_ascii(domains)
}

#[cfg(feature = "idna")]
fn translate_non_ascii(domains: &[String]) -> BTreeMap<String, String> {
    let mut translation = BTreeMap::new();
    for domain in domains {
        if domain.is_ascii() {
            continue;
        }
        let encoded = match domain.strip_prefix("*.") {
            Some(suffix) => to_ascii(suffix).map(|ascii| format!("*.{ascii}")),
            None => to_ascii(domain),
        };
        match encoded {
            Some(ascii) => {
                translation.insert(ascii, domain.clone());
            }
            None => {
                warn!(domain = %domain, "Unicode domain could not be translated, using it verbatim");
            }
        }
    }
    translation
}

#[cfg(feature = "idna")]
fn to_ascii(domain: &str) -> Option<String> {
    idna::domain_to_ascii(domain).ok()
}

#[cfg(not(feature = "idna"))]
fn translate_non_ascii(_domains: &[String]) -> BTreeMap<String, String> {
    warn!("Unicode domain found but translation support is not compiled in (feature 'idna')");
    BTreeMap::new()
}

/// Replace translated domains in a working list with their ASCII forms.
/// Pure-ASCII members are kept as-is.
pub fn apply_translation(
    domain_list: &[String],
    translation: &BTreeMap<String, String>,
) -> Vec<String> {
    domain_list
        .iter()
        .map(|domain| {
            translation
                .iter()
                .find(|(_, original)| *original == domain)
                .map(|(ascii, _)| ascii.clone())
                .unwrap_or_else(|| domain.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_ascii_is_noop() {
        let domains = vec!["example.com".to_string(), "www.example.com".to_string()];
        assert!(translate_domains(&domains).is_empty());
    }

    #[cfg(feature = "idna")]
    #[test]
    fn test_unicode_domain_translated() {
        let domains = vec!["exämple.com".to_string()];
        let translation = translate_domains(&domains);
        assert_eq!(
            translation.get("xn--exmple-cua.com").map(String::as_str),
            Some("exämple.com")
        );
    }

    #[cfg(feature = "idna")]
    #[test]
    fn test_wildcard_preserves_marker() {
        let domains = vec!["*.exämple.com".to_string()];
        let translation = translate_domains(&domains);
        assert_eq!(
            translation.get("*.xn--exmple-cua.com").map(String::as_str),
            Some("*.exämple.com")
        );
    }

    #[cfg(feature = "idna")]
    #[test]
    fn test_mixed_list_keeps_ascii_members() {
        let domains = vec!["example.com".to_string(), "exämple.com".to_string()];
        let translation = translate_domains(&domains);
        assert_eq!(translation.len(), 1);

        let working = apply_translation(&domains, &translation);
        assert_eq!(working, vec!["example.com", "xn--exmple-cua.com"]);
    }

    #[test]
    fn test_apply_empty_translation_is_identity() {
        let domains = vec!["example.com".to_string()];
        let working = apply_translation(&domains, &BTreeMap::new());
        assert_eq!(working, domains);
    }
}
