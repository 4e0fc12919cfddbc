//! Whitelist HTML filter and plain-text escaping for text fields.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:[A-Za-z][A-Za-z0-9]{1,31}|#[0-9]{1,7}|#[xX][0-9A-Fa-f]{1,6});")
        .expect("entity pattern is valid")
});

const BASE_TAGS: [&str; 4] = ["div", "span", "p", "br"];
const SAFE_PROTOCOLS: [&str; 4] = ["http", "https", "ftp", "mailto"];

/// Tags the html widget accepts for a field declaring `tags`.
pub(crate) fn allowed_tags(tags: &[String]) -> BTreeSet<String> {
    let mut allowed: BTreeSet<String> = BASE_TAGS.iter().map(|t| (*t).to_owned()).collect();
    allowed.extend(tags.iter().map(|t| t.to_ascii_lowercase()));

    let implied: &[(&str, &[&str])] = &[
        ("table", &["tr", "td", "th", "colgroup", "thead", "tbody", "tfoot"]),
        ("b", &["strong"]),
        ("i", &["em"]),
        ("ul", &["li"]),
        ("ol", &["li"]),
    ];
    for (trigger, extra) in implied {
        if allowed.contains(*trigger) {
            allowed.extend(extra.iter().map(|t| (*t).to_owned()));
        }
    }
    allowed
}

fn entity_len(rest: &str) -> Option<usize> {
    ENTITY.find(rest).map(|m| m.end())
}

/// Escape markup characters. Existing entities are left alone.
pub(crate) fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while let Some(ch) = input[i..].chars().next() {
        match ch {
            '&' => match entity_len(&input[i..]) {
                Some(len) => {
                    out.push_str(&input[i..i + len]);
                    i += len;
                    continue;
                }
                None => out.push_str("&amp;"),
            },
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            other => out.push(other),
        }
        i += ch.len_utf8();
    }
    out
}

struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attributes: Vec<(String, Option<String>)>,
    /// Bytes consumed, `<` through `>`.
    len: usize,
}

/// Keep only `allowed` tags with safe attributes; escape everything else.
///
/// `script` and `style` elements are dropped together with their bodies.
/// Comments, declarations and processing instructions are dropped.
pub(crate) fn filter_html(input: &str, allowed: &BTreeSet<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        if rest.starts_with("<!--") {
            i += rest.find("-->").map_or(rest.len(), |p| p + 3);
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            i += rest.find('>').map_or(rest.len(), |p| p + 1);
        } else if rest.starts_with('<') {
            match parse_tag(rest) {
                Some(tag) => {
                    i += tag.len;
                    if !tag.closing && matches!(tag.name.as_str(), "script" | "style") {
                        i += raw_text_len(&input[i..], &tag.name);
                    } else if allowed.contains(&tag.name) {
                        render_tag(&tag, &mut out);
                    }
                }
                None => {
                    out.push_str("&lt;");
                    i += 1;
                }
            }
        } else if rest.starts_with('>') {
            out.push_str("&gt;");
            i += 1;
        } else if rest.starts_with('&') {
            match entity_len(rest) {
                Some(len) => {
                    out.push_str(&rest[..len]);
                    i += len;
                }
                None => {
                    out.push_str("&amp;");
                    i += 1;
                }
            }
        } else {
            let next = rest.find(['<', '>', '&']).unwrap_or(rest.len());
            out.push_str(&rest[..next]);
            i += next;
        }
    }
    out
}

/// Length of a raw-text element body up to and including its end tag.
fn raw_text_len(rest: &str, name: &str) -> usize {
    let lower = rest.to_ascii_lowercase();
    let Some(start) = lower.find(&format!("</{name}")) else {
        return rest.len();
    };
    lower[start..]
        .find('>')
        .map_or(rest.len(), |p| start + p + 1)
}

fn parse_tag(rest: &str) -> Option<Tag> {
    let bytes = rest.as_bytes();
    let mut j = 1;
    let closing = bytes.get(j) == Some(&b'/');
    if closing {
        j += 1;
    }
    if !bytes.get(j)?.is_ascii_alphabetic() {
        return None;
    }
    let name_start = j;
    while bytes.get(j).is_some_and(u8::is_ascii_alphanumeric) {
        j += 1;
    }
    let name = rest[name_start..j].to_ascii_lowercase();

    let mut attributes = Vec::new();
    let mut self_closing = false;
    loop {
        let b = *bytes.get(j)?;
        if b == b'>' {
            j += 1;
            break;
        }
        if b.is_ascii_whitespace() {
            j += 1;
            continue;
        }
        if b == b'/' {
            self_closing = true;
            j += 1;
            continue;
        }
        self_closing = false;

        let attr_start = j;
        while bytes
            .get(j)
            .is_some_and(|c| !c.is_ascii_whitespace() && !matches!(c, b'=' | b'>' | b'/'))
        {
            j += 1;
        }
        if j == attr_start {
            // A lone `=`.
            j += 1;
            continue;
        }
        let attr_name = rest[attr_start..j].to_ascii_lowercase();

        while bytes.get(j).is_some_and(u8::is_ascii_whitespace) {
            j += 1;
        }
        let mut value = None;
        if bytes.get(j) == Some(&b'=') {
            j += 1;
            while bytes.get(j).is_some_and(u8::is_ascii_whitespace) {
                j += 1;
            }
            match *bytes.get(j)? {
                quote @ (b'"' | b'\'') => {
                    let close = rest[j + 1..].find(quote as char)? + j + 1;
                    value = Some(rest[j + 1..close].to_owned());
                    j = close + 1;
                }
                _ => {
                    let start = j;
                    while bytes
                        .get(j)
                        .is_some_and(|c| !c.is_ascii_whitespace() && *c != b'>')
                    {
                        j += 1;
                    }
                    value = Some(rest[start..j].to_owned());
                }
            }
        }
        attributes.push((attr_name, value));
    }

    Some(Tag {
        name,
        closing,
        self_closing,
        attributes,
        len: j,
    })
}

fn render_tag(tag: &Tag, out: &mut String) {
    if tag.closing {
        out.push_str("</");
        out.push_str(&tag.name);
        out.push('>');
        return;
    }
    out.push('<');
    out.push_str(&tag.name);
    for (name, value) in &tag.attributes {
        if !attribute_allowed(name, value.as_deref()) {
            continue;
        }
        out.push(' ');
        out.push_str(name);
        if let Some(value) = value {
            out.push_str("=\"");
            out.push_str(&escape_text(value));
            out.push('"');
        }
    }
    if tag.self_closing {
        out.push_str(" /");
    }
    out.push('>');
}

/// Attributes whose values are never read as URLs.
const PLAIN_TEXT_ATTRIBUTES: [&str; 3] = ["title", "alt", "class"];

fn attribute_allowed(name: &str, value: Option<&str>) -> bool {
    if name.starts_with("on") || name == "style" {
        return false;
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':'))
    {
        return false;
    }
    match value {
        Some(value) if !PLAIN_TEXT_ATTRIBUTES.contains(&name) => url_allowed(value),
        _ => true,
    }
}

/// Relative URLs and the whitelisted protocols only.
fn url_allowed(url: &str) -> bool {
    let decoded = decode_for_scheme(url);
    let scheme_end = decoded.find(':');
    let path_start = decoded.find(['/', '?', '#']);
    match (scheme_end, path_start) {
        (Some(colon), Some(slash)) if slash < colon => true,
        (Some(colon), _) => SAFE_PROTOCOLS.contains(&decoded[..colon].to_ascii_lowercase().as_str()),
        (None, _) => true,
    }
}

/// Undo the encodings a browser would undo before reading a URL scheme.
fn decode_for_scheme(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    let mut i = 0;
    while let Some(ch) = url[i..].chars().next() {
        if ch == '&' {
            if let Some(len) = entity_len(&url[i..]) {
                let entity = &url[i + 1..i + len - 1];
                let decoded = match entity.strip_prefix('#') {
                    Some(num) => num
                        .strip_prefix(['x', 'X'])
                        .map_or_else(|| num.parse().ok(), |hex| u32::from_str_radix(hex, 16).ok())
                        .and_then(char::from_u32),
                    None if entity.eq_ignore_ascii_case("colon") => Some(':'),
                    None => None,
                };
                if let Some(c) = decoded {
                    if !c.is_whitespace() && !c.is_control() {
                        out.push(c);
                    }
                    i += len;
                    continue;
                }
            }
        }
        if !ch.is_whitespace() && !ch.is_control() {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    out
}
