use std::collections::HashSet;

use scraper::{Html, Node, Selector};
use sha2::{Digest, Sha256};

/// Matches elements removed wholesale: boilerplate tags plus the ARIA
/// navigation role.
const REMOVE_SELECTOR: &str = "script, style, nav, header, footer, [role=navigation]";

/// Substrings checked (case-insensitively) against `class`/`id`; a match on
/// either attribute removes the element and everything under it.
const REMOVED_CLASS_NEEDLES: &[&str] = &["nav", "menu", "footer", "cookie"];

/// Applies the canonicalization pipeline (§4.3 steps 3-5) to an HTML
/// document and returns the hex-encoded SHA-256 hash plus the canonical
/// byte length. Pure function of the input bytes: no wall-clock, locale, or
/// map-iteration-order dependence.
pub fn canonicalize_and_hash(html: &str) -> (String, u64) {
    let document = Html::parse_document(html);

    let mut excluded = HashSet::new();
    if let Ok(sel) = Selector::parse(REMOVE_SELECTOR) {
        for el in document.select(&sel) {
            excluded.insert(el.id());
        }
    }
    if let Ok(sel) = Selector::parse("*") {
        for el in document.select(&sel) {
            let class = el.value().attr("class").unwrap_or("").to_ascii_lowercase();
            let id_attr = el.value().attr("id").unwrap_or("").to_ascii_lowercase();
            if REMOVED_CLASS_NEEDLES
                .iter()
                .any(|needle| class.contains(needle) || id_attr.contains(needle))
            {
                excluded.insert(el.id());
            }
        }
    }

    let mut texts = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        if node.ancestors().any(|a| excluded.contains(&a.id())) {
            continue;
        }
        let collapsed = collapse_whitespace(text);
        if !collapsed.is_empty() {
            texts.push(collapsed);
        }
    }

    let canonical = texts.join("\n");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());
    (hash, canonical.len() as u64)
}

fn collapse_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_produce_identical_hashes() {
        let html = "<html><body><p>Hello   world</p></body></html>";
        let (h1, _) = canonicalize_and_hash(html);
        let (h2, _) = canonicalize_and_hash(html);
        assert_eq!(h1, h2);
    }

    #[test]
    fn strips_boilerplate_elements() {
        let html = r#"<html><body>
            <nav>Home | About</nav>
            <header class="site-header">Logo</header>
            <div id="cookie-banner">We use cookies</div>
            <main><p>Real content</p></main>
            <footer>Copyright</footer>
        </body></html>"#;
        let (hash, _) = canonicalize_and_hash(html);
        let (baseline_hash, _) =
            canonicalize_and_hash("<html><body><main><p>Real content</p></main></body></html>");
        assert_eq!(hash, baseline_hash);
    }

    #[test]
    fn whitespace_changes_do_not_alter_hash() {
        let a = "<p>Hello    world</p>";
        let b = "<p>Hello\n  world</p>";
        let (ha, _) = canonicalize_and_hash(a);
        let (hb, _) = canonicalize_and_hash(b);
        assert_eq!(ha, hb);
    }

    #[test]
    fn removes_comments() {
        let a = "<p>Visible</p><!-- hidden comment -->";
        let b = "<p>Visible</p>";
        let (ha, _) = canonicalize_and_hash(a);
        let (hb, _) = canonicalize_and_hash(b);
        assert_eq!(ha, hb);
    }

    #[test]
    fn content_change_alters_hash() {
        let (h1, _) = canonicalize_and_hash("<p>Version one</p>");
        let (h2, _) = canonicalize_and_hash("<p>Version two</p>");
        assert_ne!(h1, h2);
    }
}
