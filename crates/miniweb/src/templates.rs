// src/templates.rs
use miniweb_core::escape_html;
use std::path::Path;

/// Page served at `/` when `templates_dir` has no `index.html`.
pub const FALLBACK_INDEX: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{hostname}}</title></head>
<body>
<h1>{{hostname}}</h1>
<p>Up {{uptime}}. Served by miniweb {{version}} to {{client}}.</p>
<ul>
<li><a href="/api/system">/api/system</a></li>
<li><a href="/api/network">/api/network</a></li>
<li><a href="/api/processes">/api/processes</a></li>
<li><a href="/api/packages">/api/packages</a></li>
<li><a href="/api/server">/api/server</a></li>
</ul>
</body>
</html>
"#;

/// Replace `{{name}}` placeholders with HTML-escaped values.
///
/// Unknown names render as nothing; an unterminated `{{` is copied verbatim.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..end].trim();
        if let Some((_, value)) = vars.iter().find(|(k, _)| *k == name) {
            out.push_str(&escape_html(value));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// Read `name` from `dir`. Names with path separators are refused.
pub fn load(dir: &Path, name: &str) -> Option<String> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return None;
    }
    match std::fs::read_to_string(dir.join(name)) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!(template = name, dir = %dir.display(), error = %e, "template unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_replaced_and_escaped() {
        let html = render(
            "<p>{{ who }} on {{host}}</p>",
            &[("who", "<script>"), ("host", "box & co")],
        );
        assert_eq!(html, "<p>&lt;script&gt; on box &amp; co</p>");
    }

    #[test]
    fn test_unknown_and_unterminated() {
        assert_eq!(render("a{{nope}}b", &[]), "ab");
        assert_eq!(render("a {{open", &[("open", "x")]), "a {{open");
        assert_eq!(render("no placeholders", &[]), "no placeholders");
    }

    #[test]
    fn test_load_refuses_paths() {
        assert!(load(Path::new("/etc"), "../passwd").is_none());
        assert!(load(Path::new("/etc"), ".hidden").is_none());
        assert!(load(Path::new("/nonexistent"), "index.html").is_none());
    }

    #[test]
    fn test_fallback_mentions_every_placeholder() {
        for key in ["{{hostname}}", "{{uptime}}", "{{version}}", "{{client}}"] {
            assert!(FALLBACK_INDEX.contains(key));
        }
    }
}
