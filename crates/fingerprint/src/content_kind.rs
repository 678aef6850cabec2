/// Extensions that short-circuit canonicalization (§4.3 step 2).
const IGNORED_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".doc", ".docx", ".xls", ".xlsx",
    ".zip",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Ignored { file_type: String },
}

/// Classifies a response as HTML (to be canonicalized and hashed) or an
/// ignored file type, using the `Content-Type` header first and falling
/// back to the URL's extension.
pub fn classify_content_kind(content_type: Option<&str>, url: &str) -> ContentKind {
    if let Some(ct) = content_type {
        let ct_lower = ct.to_ascii_lowercase();
        let mime = ct_lower.split(';').next().unwrap_or("").trim();
        if mime == "text/html" || mime == "application/xhtml+xml" {
            return ContentKind::Html;
        }
        if !mime.is_empty() && mime != "text/plain" {
            return ContentKind::Ignored {
                file_type: mime.to_string(),
            };
        }
    }

    let path_lower = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    for ext in IGNORED_EXTENSIONS {
        if path_lower.ends_with(ext) {
            return ContentKind::Ignored {
                file_type: ext.trim_start_matches('.').to_string(),
            };
        }
    }
    ContentKind::Html
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_mime_is_html() {
        assert_eq!(
            classify_content_kind(Some("text/html; charset=utf-8"), "https://a.example/x"),
            ContentKind::Html
        );
    }

    #[test]
    fn pdf_mime_is_ignored() {
        assert_eq!(
            classify_content_kind(Some("application/pdf"), "https://a.example/x"),
            ContentKind::Ignored {
                file_type: "application/pdf".to_string()
            }
        );
    }

    #[test]
    fn extension_fallback_when_no_content_type() {
        assert_eq!(
            classify_content_kind(None, "https://a.example/report.docx"),
            ContentKind::Ignored {
                file_type: "docx".to_string()
            }
        );
    }

    #[test]
    fn missing_content_type_and_unknown_extension_is_html() {
        assert_eq!(
            classify_content_kind(None, "https://a.example/page"),
            ContentKind::Html
        );
    }
}
