//! Markdown as produced by chat models → Telegram HTML.

use regex::{Captures, Regex};
use std::sync::LazyLock;

const BOX_CHARS: &str = "┌┐└┘├┤┬┴┼─│═║╔╗╚╝╠╣╦╩╬";

struct Rules {
    code_block: Regex,
    table: Regex,
    inline_code: Regex,
    header: Regex,
    bold_italic: Regex,
    bold_star: Regex,
    bold_underscore: Regex,
    italic_star: Regex,
    italic_underscore: Regex,
    strike: Regex,
    link: Regex,
    placeholder: Regex,
}

impl Rules {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            code_block: Regex::new(r"(?s)```(\w*)\n?(.*?)```")?,
            table: Regex::new(&format!(r"(?m)(?:^.*[{BOX_CHARS}].*$\n?)+"))?,
            inline_code: Regex::new(r"`([^`\n]+)`")?,
            header: Regex::new(r"(?m)^#{1,6}\s+(.+)$")?,
            bold_italic: Regex::new(r"\*\*\*(.+?)\*\*\*")?,
            bold_star: Regex::new(r"\*\*(.+?)\*\*")?,
            bold_underscore: Regex::new(r"__(.+?)__")?,
            italic_star: Regex::new(r"\*(.+?)\*")?,
            italic_underscore: Regex::new(r"(^|[^\w])_(.+?)_($|[^\w])")?,
            strike: Regex::new(r"~~(.+?)~~")?,
            link: Regex::new(r"\[([^\]]+)\]\(([^)]+)\)")?,
            placeholder: Regex::new(r"\x00PH(\d+)\x00")?,
        })
    }
}

static RULES: LazyLock<Result<Rules, regex::Error>> = LazyLock::new(Rules::compile);

/// Escape `&`, `<`, `>`, and both quote characters.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Convert Markdown to Telegram HTML.
///
/// Handles fenced code blocks, box-drawing tables, inline code, headers,
/// bold/italic, strikethrough and links. Falls back to escaped text.
pub fn md_to_html(text: &str) -> String {
    match RULES.as_ref() {
        Ok(rules) => convert(rules, text),
        Err(_) => escape_html(text),
    }
}

fn convert(rules: &Rules, text: &str) -> String {
    let mut stash: Vec<String> = Vec::new();
    let mut store = |html: String| -> String {
        stash.push(html);
        format!("\x00PH{}\x00", stash.len() - 1)
    };

    let text = rules.code_block.replace_all(text, |c: &Captures<'_>| {
        let lang = c.get(1).map_or("", |m| m.as_str());
        let code = escape_html(c[2].trim_matches('\n'));
        if lang.is_empty() {
            store(format!("<pre>{code}</pre>"))
        } else {
            store(format!("<pre><code class=\"language-{lang}\">{code}</code></pre>"))
        }
    });

    let text = rules
        .table
        .replace_all(&text, |c: &Captures<'_>| store(format!("<pre>{}</pre>", escape_html(&c[0]))));

    let text = rules
        .inline_code
        .replace_all(&text, |c: &Captures<'_>| store(format!("<code>{}</code>", escape_html(&c[1]))));

    let text = escape_html(&text);
    let text = rules.header.replace_all(&text, "<b>$1</b>");
    let text = rules.bold_italic.replace_all(&text, "<b><i>$1</i></b>");
    let text = rules.bold_star.replace_all(&text, "<b>$1</b>");
    let text = rules.bold_underscore.replace_all(&text, "<b>$1</b>");
    let text = rules.italic_star.replace_all(&text, "<i>$1</i>");
    let text = rules.italic_underscore.replace_all(&text, "$1<i>$2</i>$3");
    let text = rules.strike.replace_all(&text, "<s>$1</s>");
    let text = rules.link.replace_all(&text, r#"<a href="$2">$1</a>"#);

    rules
        .placeholder
        .replace_all(&text, |c: &Captures<'_>| {
            c[1].parse::<usize>()
                .ok()
                .and_then(|i| stash.get(i).cloned())
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_plain_text() {
        assert_eq!(md_to_html("a < b & c"), "a &lt; b &amp; c");
    }

    #[test]
    fn code_block_keeps_content_verbatim() {
        let html = md_to_html("Run:\n```rust\nlet x = a < b && *c*;\n```\ndone");
        assert_eq!(
            html,
            "Run:\n<pre><code class=\"language-rust\">let x = a &lt; b &amp;&amp; *c*;</code></pre>\ndone"
        );
    }

    #[test]
    fn inline_styles() {
        assert_eq!(md_to_html("**bold** and *it*"), "<b>bold</b> and <i>it</i>");
        assert_eq!(md_to_html("***both***"), "<b><i>both</i></b>");
        assert_eq!(md_to_html("~~gone~~"), "<s>gone</s>");
        assert_eq!(md_to_html("use `a<b`"), "use <code>a&lt;b</code>");
        assert_eq!(md_to_html("_soft_ snake_case_name"), "<i>soft</i> snake_case_name");
    }

    #[test]
    fn headers_and_links() {
        assert_eq!(md_to_html("## Title\nbody"), "<b>Title</b>\nbody");
        assert_eq!(
            md_to_html("[docs](https://example.com)"),
            "<a href=\"https://example.com\">docs</a>"
        );
    }

    #[test]
    fn box_tables_become_pre() {
        let table = "┌──┐\n│ab│\n└──┘\n";
        let html = md_to_html(&format!("Table:\n{table}end"));
        assert_eq!(html, format!("Table:\n<pre>{table}</pre>end"));
    }
}
