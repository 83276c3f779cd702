// Output sinks: what happens to a status once it has passed the filter.
//
// `boost` reblogs it as our account, `terminal` prints it. Both consume the
// accepted-status channel until the pipeline closes it.

pub mod boost;
pub mod terminal;

use scraper::{Html, Node};

/// Cut `text` to `max_chars` characters, marking the cut with "...".
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Convert status HTML into plain text.
///
/// `<br>` and paragraph boundaries become newlines, every other tag is
/// dropped, and entities (named or numeric) are decoded by the parser.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::new();

    for node in fragment.root_element().descendants() {
        match node.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) if el.name() == "br" => text.push('\n'),
            Node::Element(el) if el.name() == "p" && !text.is_empty() => text.push('\n'),
            _ => {}
        }
    }

    text.trim().to_string()
}
