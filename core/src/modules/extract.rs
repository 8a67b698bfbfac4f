//! HTML link and form extraction for the crawler.
//!
//! Everything here is synchronous: `scraper::Html` is not `Send`, so a page is
//! parsed and dropped before the worker awaits again.

use log::debug;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::core::form::{Form, FormInputs, FormMethod};
use crate::http::host_key;

const SKIPPED_SCHEMES: [&str; 4] = ["javascript:", "mailto:", "tel:", "data:"];

/// Links and forms found on one page.
#[derive(Debug, Default)]
pub struct PageContent {
    pub links: Vec<Url>,
    pub forms: Vec<Form>,
}

pub fn extract_page(page: &Url, html: &str) -> PageContent {
    let document = Html::parse_document(html);
    PageContent {
        links: extract_links(page, &document),
        forms: extract_forms(page, &document),
    }
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(s) => Some(s),
        Err(e) => {
            debug!("bad selector {}: {:?}", css, e);
            None
        }
    }
}

fn extract_links(page: &Url, document: &Html) -> Vec<Url> {
    let Some(anchors) = selector("a[href]") else {
        return Vec::new();
    };
    document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| resolve_link(page, href))
        .collect()
}

/// Resolves an `href` against `page`. Non-navigable and unparseable targets
/// yield `None`; the fragment is dropped.
pub fn resolve_link(page: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return None;
    }

    let mut resolved = match page.join(href) {
        Ok(u) => u,
        Err(e) => {
            debug!("unparseable link {:?} on {}: {}", href, page, e);
            return None;
        }
    };
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

/// Origin equality on `host[:port]`.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    host_key(a) == host_key(b)
}

fn extract_forms(page: &Url, document: &Html) -> Vec<Form> {
    let (Some(forms), Some(fields)) = (selector("form"), selector("input[name], textarea[name], select[name]")) else {
        return Vec::new();
    };

    document
        .select(&forms)
        .filter_map(|form| parse_form(page, form, &fields))
        .collect()
}

fn parse_form(page: &Url, form: ElementRef<'_>, fields: &Selector) -> Option<Form> {
    let el = form.value();
    let action = match el.attr("action").map(str::trim).filter(|a| !a.is_empty()) {
        Some(raw) => match page.join(raw) {
            Ok(mut u) => {
                u.set_fragment(None);
                u
            }
            Err(e) => {
                debug!("unparseable form action {:?} on {}: {}", raw, page, e);
                return None;
            }
        },
        None => page.clone(),
    };
    let method = FormMethod::from_attr(el.attr("method").unwrap_or("get"));

    let mut inputs = FormInputs::new();
    for field in form.select(fields) {
        if let Some(name) = field.value().attr("name") {
            inputs.insert(name, field.value().attr("value").unwrap_or(""));
        }
    }

    Some(Form::new(action.to_string(), method, el.attr("enctype"), inputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::form::DEFAULT_ENCTYPE;

    fn page() -> Url {
        Url::parse("https://shop.test:8443/catalog/list?page=2").unwrap()
    }

    #[test]
    fn test_resolve_link_variants() {
        let p = page();
        assert_eq!(resolve_link(&p, "//cdn.test/x").unwrap().as_str(), "https://cdn.test/x");
        assert_eq!(resolve_link(&p, "/about").unwrap().as_str(), "https://shop.test:8443/about");
        assert_eq!(resolve_link(&p, "item?id=4#top").unwrap().as_str(), "https://shop.test:8443/catalog/item?id=4");
    }

    #[test]
    fn test_resolve_link_skips_non_navigable() {
        let p = page();
        for href in ["#", "#section", "javascript:void(0)", "mailto:a@b.c", "tel:123", "data:text/html,x", "  "] {
            assert!(resolve_link(&p, href).is_none(), "{} should be skipped", href);
        }
        assert!(resolve_link(&p, "http://[::1").is_none());
    }

    #[test]
    fn test_same_origin_includes_port() {
        let a = Url::parse("https://shop.test:8443/a").unwrap();
        let b = Url::parse("https://shop.test:8443/b").unwrap();
        let c = Url::parse("https://shop.test/b").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
    }

    #[test]
    fn test_extract_links_and_forms() {
        let html = r#"
            <html><body>
              <a href="/a">A</a>
              <a href="mailto:x@y.z">mail</a>
              <a>no href</a>
              <form action="/login" method="POST" enctype="application/json">
                <input name="user" value="guest">
                <input type="password" name="pass">
                <input type="submit">
                <textarea name="note"></textarea>
              </form>
              <form>
                <select name="sort"></select>
              </form>
            </body></html>"#;
        let content = extract_page(&page(), html);

        assert_eq!(content.links.len(), 1);
        assert_eq!(content.links[0].as_str(), "https://shop.test:8443/a");

        assert_eq!(content.forms.len(), 2);
        let login = &content.forms[0];
        assert_eq!(login.action, "https://shop.test:8443/login");
        assert!(login.is_post());
        assert_eq!(login.enctype, "application/json");
        assert_eq!(login.inputs.names().collect::<Vec<_>>(), vec!["user", "pass", "note"]);
        assert_eq!(login.inputs.get("user"), Some("guest"));

        let search = &content.forms[1];
        assert_eq!(search.action, page().as_str());
        assert_eq!(search.method, FormMethod::Get);
        assert_eq!(search.enctype, DEFAULT_ENCTYPE);
    }
}
