use quick_xml::events::Event;
use quick_xml::reader::Reader;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    UrlSet,
    SitemapIndex,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ParsedSitemap {
    pub root: RootKind,
    pub locs: Vec<String>,
}

/// Tolerant pull-based XML parse: unknown elements and namespaces are simply
/// not matched and fall through; a malformed tail stops the scan but keeps
/// whatever `<loc>` values were already collected. Only an unprefixed
/// `<loc>` that is a direct child of an unprefixed `<url>`/`<sitemap>` is
/// collected — an extension's `<image:loc>` (or any other namespaced `loc`,
/// wherever it sits) is ignored, matching §4.2's "ignore unknown
/// namespaces" rule instead of matching on bare local name anywhere in the
/// tree.
pub fn parse_sitemap_xml(body: &str) -> ParsedSitemap {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut root = RootKind::Unknown;
    let mut root_seen = false;
    let mut locs = Vec::new();
    // Stack of (local name, had a namespace prefix) for every open element.
    let mut stack: Vec<(String, bool)> = Vec::new();
    // Depth (stack length right after the `<loc>` push) of the entry
    // `<loc>` currently being collected, if any.
    let mut collecting_depth: Option<usize> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => {
                let (name, prefixed) = split_name(e.name().as_ref());
                if !root_seen {
                    root_seen = true;
                    root = match name.as_str() {
                        "urlset" => RootKind::UrlSet,
                        "sitemapindex" => RootKind::SitemapIndex,
                        _ => RootKind::Unknown,
                    };
                }
                let parent_is_entry = stack
                    .last()
                    .map(|(parent, parent_prefixed)| {
                        !*parent_prefixed && (parent == "url" || parent == "sitemap")
                    })
                    .unwrap_or(false);
                stack.push((name.clone(), prefixed));
                if name == "loc" && !prefixed && parent_is_entry && collecting_depth.is_none() {
                    collecting_depth = Some(stack.len());
                }
            }
            Ok(Event::End(_)) => {
                if collecting_depth == Some(stack.len()) {
                    collecting_depth = None;
                }
                stack.pop();
            }
            Ok(Event::Empty(e)) => {
                let (name, _) = split_name(e.name().as_ref());
                if !root_seen {
                    root_seen = true;
                    root = match name.as_str() {
                        "urlset" => RootKind::UrlSet,
                        "sitemapindex" => RootKind::SitemapIndex,
                        _ => RootKind::Unknown,
                    };
                }
            }
            Ok(Event::Text(t)) => {
                if collecting_depth == Some(stack.len()) {
                    if let Ok(text) = t.decode() {
                        locs.push(text.into_owned());
                    }
                }
            }
            Ok(Event::CData(t)) => {
                if collecting_depth == Some(stack.len()) {
                    if let Ok(text) = std::str::from_utf8(&t.into_inner()) {
                        locs.push(text.to_string());
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "malformed element in sitemap XML, stopping scan early");
                break;
            }
        }
        buf.clear();
    }

    ParsedSitemap { root, locs }
}

/// Splits a qualified element name into its local name and whether it
/// carried a namespace prefix (`ns:loc` -> `("loc", true)`); quick-xml
/// gives us the raw qualified name so unknown namespaces are ignored for
/// free on the local-name comparison, while the prefix flag lets callers
/// still tell a prefixed element apart from its unprefixed namesake.
fn split_name(qualified: &[u8]) -> (String, bool) {
    let s = String::from_utf8_lossy(qualified);
    match s.rsplit_once(':') {
        Some((_, local)) => (local.to_string(), true),
        None => (s.into_owned(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_urlset_root() {
        let parsed = parse_sitemap_xml(
            r#"<urlset><url><loc>https://a.example/x</loc></url></urlset>"#,
        );
        assert_eq!(parsed.root, RootKind::UrlSet);
        assert_eq!(parsed.locs, vec!["https://a.example/x".to_string()]);
    }

    #[test]
    fn detects_sitemapindex_root() {
        let parsed = parse_sitemap_xml(
            r#"<sitemapindex><sitemap><loc>https://a.example/s1.xml</loc></sitemap></sitemapindex>"#,
        );
        assert_eq!(parsed.root, RootKind::SitemapIndex);
        assert_eq!(parsed.locs.len(), 1);
    }

    #[test]
    fn ignores_unknown_namespaced_elements() {
        let parsed = parse_sitemap_xml(
            r#"<urlset xmlns:image="http://example.com/image">
                <url>
                    <loc>https://a.example/x</loc>
                    <image:image><image:loc>https://a.example/x.jpg</image:loc></image:image>
                </url>
            </urlset>"#,
        );
        // image:loc carries a namespace prefix and is not a direct child of
        // <url>/<sitemap>, so it must not be treated as a page URL.
        assert_eq!(parsed.locs, vec!["https://a.example/x".to_string()]);
    }

    #[test]
    fn ignores_loc_that_is_not_a_direct_child_of_url_or_sitemap() {
        let parsed = parse_sitemap_xml(
            r#"<urlset>
                <url>
                    <loc>https://a.example/x</loc>
                    <xhtml:link><loc>https://a.example/decoy</loc></xhtml:link>
                </url>
            </urlset>"#,
        );
        assert_eq!(parsed.locs, vec!["https://a.example/x".to_string()]);
    }

    #[test]
    fn commutative_under_child_ordering() {
        let a = parse_sitemap_xml(
            r#"<sitemapindex><sitemap><loc>https://a.example/1.xml</loc></sitemap><sitemap><loc>https://a.example/2.xml</loc></sitemap></sitemapindex>"#,
        );
        let b = parse_sitemap_xml(
            r#"<sitemapindex><sitemap><loc>https://a.example/2.xml</loc></sitemap><sitemap><loc>https://a.example/1.xml</loc></sitemap></sitemapindex>"#,
        );
        let mut sa = a.locs.clone();
        let mut sb = b.locs.clone();
        sa.sort();
        sb.sort();
        assert_eq!(sa, sb);
    }
}
