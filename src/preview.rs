//! Presentational overrides for viewer-generated HTML.
//!
//! The document is inspected with `scraper` to find which layout elements
//! it contains, and a single id-tagged stylesheet with one rule per element
//! found is injected alongside a fixed zoom control. Both injections are
//! skipped when their id is already present, so [`enhance`] is idempotent.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

const STYLE_ID: &str = "olmocr-studio-overrides";
const ZOOM_ID: &str = "olmocr-studio-zoom";

/// A CSS rule injected when its selector matches something in the document.
struct Override {
    selector: &'static str,
    declarations: &'static str,
    always: bool,
}

const OVERRIDES: &[Override] = &[
    Override {
        selector: "body",
        declarations: "font-size: 16px !important;",
        always: true,
    },
    Override {
        selector: ".text-content",
        declarations: "font-size: 16px !important; line-height: 1.5 !important;",
        always: false,
    },
    Override {
        selector: "div.container",
        declarations: "max-width: 100% !important; width: 100% !important;",
        always: false,
    },
    Override {
        selector: "div.row",
        declarations: "display: flex !important; flex-wrap: wrap !important;",
        always: false,
    },
    Override {
        selector: "div.col-md-6",
        declarations: "flex: 0 0 50% !important; max-width: 50% !important; padding: 15px !important;",
        always: false,
    },
    Override {
        selector: "div.page",
        declarations: "margin-bottom: 30px !important; border-bottom: 1px solid #ccc !important; padding-bottom: 20px !important;",
        always: false,
    },
    Override {
        selector: "img",
        declarations: "max-width: 100% !important; height: auto !important;",
        always: false,
    },
];

const ZOOM_CONTROLS: &str = r#"<div id="olmocr-studio-zoom" style="position: fixed; bottom: 20px; right: 20px; background: #fff; padding: 10px; border-radius: 5px; box-shadow: 0 0 10px rgba(0,0,0,0.2); z-index: 1000;">
<button onclick="document.body.style.zoom = parseFloat(document.body.style.zoom || 1) + 0.1;" style="margin-right: 5px;">Zoom in</button>
<button onclick="document.body.style.zoom = parseFloat(document.body.style.zoom || 1) - 0.1;">Zoom out</button>
</div>
"#;

static HEAD_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</head\s*>").unwrap());
static BODY_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<body(\s[^>]*)?>").unwrap());
static BODY_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</body\s*>").unwrap());

/// Apply the display overrides. Empty input is returned unchanged.
pub fn enhance(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }

    let document = Html::parse_document(html);
    let mut out = html.to_string();

    if !contains(&document, &format!("#{}", STYLE_ID)) {
        let stylesheet = build_stylesheet(&document);
        out = insert_stylesheet(&out, &stylesheet);
    }

    if !contains(&document, &format!("#{}", ZOOM_ID)) {
        out = insert_zoom_controls(&out);
    }

    out
}

fn contains(document: &Html, selector: &str) -> bool {
    Selector::parse(selector)
        .map(|sel| document.select(&sel).next().is_some())
        .unwrap_or(false)
}

fn build_stylesheet(document: &Html) -> String {
    let mut css = format!("<style id=\"{}\">\n", STYLE_ID);
    for rule in OVERRIDES {
        if rule.always || contains(document, rule.selector) {
            css.push_str(&format!("{} {{ {} }}\n", rule.selector, rule.declarations));
        }
    }
    css.push_str("</style>\n");
    css
}

/// Before the last `</head>` ahead of `<body>`, else just inside `<body>`,
/// else at the very start. Earlier `</head>` text inside scripts or comments
/// is skipped that way.
fn insert_stylesheet(html: &str, stylesheet: &str) -> String {
    let body = BODY_OPEN.find(html);
    let head_end = body.map(|m| m.start()).unwrap_or(html.len());
    if let Some(m) = HEAD_CLOSE.find_iter(&html[..head_end]).last() {
        return splice(html, m.start(), stylesheet);
    }
    if let Some(m) = body {
        return splice(html, m.end(), stylesheet);
    }
    splice(html, 0, stylesheet)
}

/// Before the last `</body>`, else at the end.
fn insert_zoom_controls(html: &str) -> String {
    match BODY_CLOSE.find_iter(html).last() {
        Some(m) => splice(html, m.start(), ZOOM_CONTROLS),
        None => splice(html, html.len(), ZOOM_CONTROLS),
    }
}

fn splice(html: &str, at: usize, insert: &str) -> String {
    let mut out = String::with_capacity(html.len() + insert.len());
    out.push_str(&html[..at]);
    out.push_str(insert);
    out.push_str(&html[at..]);
    out
}
