use std::sync::LazyLock;

use deus_shared::theme::{parse_css_color, remap_colors, Rgb, Theme};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use regex::{Captures, Regex};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9]*)((?:[^>]*?))(/?)>").unwrap()
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([a-zA-Z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").unwrap());

/// Render stored page HTML to terminal lines, with inline colors remapped for
/// `theme` first.
pub fn render_html(html: &str, theme: Theme) -> Vec<Line<'static>> {
    let html = remap_colors(html, theme);
    let mut renderer = HtmlRenderer::new(theme);
    renderer.render(&html);
    renderer.finish()
}

pub fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "mdash" => Some('—'),
                    "ndash" => Some('–'),
                    "hellip" => Some('…'),
                    "copy" => Some('©'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn rgb(color: Rgb) -> Color {
    Color::Rgb(color.0, color.1, color.2)
}

/// Inline `style` declarations mapped onto a terminal style.
fn css_style(css: &str) -> Style {
    let mut style = Style::default();
    for decl in css.split(';') {
        let Some((prop, value)) = decl.split_once(':') else {
            continue;
        };
        let value = value.trim().to_ascii_lowercase();
        match prop.trim().to_ascii_lowercase().as_str() {
            "color" => {
                if let Some(c) = parse_css_color(&value) {
                    style = style.fg(rgb(c));
                }
            }
            "background-color" | "background" => {
                if let Some(c) = parse_css_color(&value) {
                    style = style.bg(rgb(c));
                }
            }
            "font-weight" if value == "bold" || value.parse::<u16>().is_ok_and(|w| w >= 600) => {
                style = style.add_modifier(Modifier::BOLD);
            }
            "font-style" if value == "italic" => style = style.add_modifier(Modifier::ITALIC),
            "text-decoration" | "text-decoration-line" => {
                if value.contains("underline") {
                    style = style.add_modifier(Modifier::UNDERLINED);
                }
                if value.contains("line-through") {
                    style = style.add_modifier(Modifier::CROSSED_OUT);
                }
            }
            _ => {}
        }
    }
    style
}

fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|caps| {
        if caps[1].eq_ignore_ascii_case(name) {
            caps.get(2)
                .or_else(|| caps.get(3))
                .map(|m| decode_entities(m.as_str()))
        } else {
            None
        }
    })
}

#[derive(Clone, Copy)]
struct ListState {
    ordered: bool,
    index: usize,
}

struct HtmlRenderer {
    theme: Theme,
    lines: Vec<Line<'static>>,
    spans: Vec<Span<'static>>,
    /// Open elements with the style in effect inside them.
    stack: Vec<(String, Style)>,
    lists: Vec<ListState>,
    links: Vec<String>,
    pre_depth: usize,
    quote_depth: usize,
    skip_depth: usize,
    pending_space: bool,
}

impl HtmlRenderer {
    fn new(theme: Theme) -> Self {
        Self {
            theme,
            lines: Vec::new(),
            spans: Vec::new(),
            stack: Vec::new(),
            lists: Vec::new(),
            links: Vec::new(),
            pre_depth: 0,
            quote_depth: 0,
            skip_depth: 0,
            pending_space: false,
        }
    }

    fn current_style(&self) -> Style {
        self.stack.last().map(|(_, s)| *s).unwrap_or_default()
    }

    fn render(&mut self, html: &str) {
        let mut last = 0;
        for caps in TAG_RE.captures_iter(html) {
            let Some(whole) = caps.get(0) else { continue };
            self.text(&html[last..whole.start()]);
            last = whole.end();

            // Comments match without a tag name.
            let Some(name) = caps.get(2) else { continue };
            let name = name.as_str().to_ascii_lowercase();
            let closing = !caps[1].is_empty();
            let self_closing = !caps[4].is_empty();

            if closing {
                self.close(&name);
            } else {
                self.open(&name, &caps[3]);
                if self_closing {
                    self.close(&name);
                }
            }
        }
        self.text(&html[last..]);
    }

    fn finish(mut self) -> Vec<Line<'static>> {
        self.flush_line();
        while self.lines.last().is_some_and(|l| l.spans.is_empty()) {
            self.lines.pop();
        }
        self.lines
    }

    fn open(&mut self, name: &str, attrs: &str) {
        if self.skip_depth > 0 {
            if matches!(name, "script" | "style" | "head") {
                self.skip_depth += 1;
            }
            return;
        }

        match name {
            "script" | "style" | "head" => {
                self.skip_depth += 1;
                return;
            }
            "br" => {
                self.flush_line_always();
                return;
            }
            "hr" => {
                self.block_break();
                self.lines.push(Line::from(Span::styled(
                    "─".repeat(40),
                    Style::default().fg(Color::DarkGray),
                )));
                self.lines.push(Line::default());
                return;
            }
            "img" => {
                let alt = attr(attrs, "alt").filter(|a| !a.trim().is_empty());
                let src = attr(attrs, "src").unwrap_or_default();
                let label = match alt {
                    Some(alt) => format!("[image: {}]", alt.trim()),
                    None => "[image]".to_string(),
                };
                self.push_word(&label, Style::default().fg(Color::Magenta));
                if !src.is_empty() {
                    self.pending_space = true;
                    self.push_word(&src, Style::default().fg(Color::DarkGray));
                }
                return;
            }
            "li" => {
                self.flush_line();
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(list) if list.ordered => {
                        list.index += 1;
                        format!("{}{}. ", "  ".repeat(depth), list.index)
                    }
                    _ => format!("{}• ", "  ".repeat(depth)),
                };
                self.spans
                    .push(Span::styled(marker, Style::default().fg(Color::DarkGray)));
                self.pending_space = false;
            }
            "ul" | "ol" => {
                self.flush_line();
                if self.lists.is_empty() {
                    self.block_break();
                }
                self.lists.push(ListState {
                    ordered: name == "ol",
                    index: 0,
                });
            }
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "pre" | "table" => {
                self.block_break()
            }
            "tr" => self.flush_line(),
            "td" | "th" => {
                self.pending_space = true;
                self.push_word("│", Style::default().fg(Color::DarkGray));
                self.pending_space = true;
            }
            "blockquote" => {
                self.block_break();
                self.quote_depth += 1;
            }
            "a" => self.links.push(attr(attrs, "href").unwrap_or_default()),
            _ => {}
        }

        let mut style = self.current_style().patch(self.tag_style(name));
        if let Some(css) = attr(attrs, "style") {
            style = style.patch(css_style(&css));
        }
        if name == "pre" {
            self.pre_depth += 1;
        }
        self.stack.push((name.to_string(), style));
    }

    fn close(&mut self, name: &str) {
        if self.skip_depth > 0 {
            if matches!(name, "script" | "style" | "head") {
                self.skip_depth -= 1;
            }
            return;
        }

        // Pop up to the matching element; stray closers are ignored.
        match self.stack.iter().rposition(|(open, _)| open == name) {
            Some(pos) => self.stack.truncate(pos),
            None => return,
        }

        match name {
            "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "table" => self.block_break(),
            "pre" => {
                self.pre_depth = self.pre_depth.saturating_sub(1);
                self.block_break();
            }
            "ul" | "ol" => {
                self.flush_line();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block_break();
                }
            }
            "li" | "tr" => self.flush_line(),
            "blockquote" => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.block_break();
            }
            "a" => {
                if let Some(href) = self.links.pop() {
                    let shown: String = self.spans.iter().map(|s| s.content.as_ref()).collect();
                    if !href.is_empty() && !shown.ends_with(href.as_str()) {
                        self.pending_space = true;
                        self.push_word(
                            &format!("<{}>", href),
                            Style::default().fg(Color::DarkGray),
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn tag_style(&self, name: &str) -> Style {
        let heading = match self.theme {
            Theme::Dark => Color::Cyan,
            Theme::Light => Color::Blue,
        };
        match name {
            "h1" => Style::default()
                .fg(heading)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
            "h2" | "h3" | "h4" | "h5" | "h6" => {
                Style::default().fg(heading).add_modifier(Modifier::BOLD)
            }
            "strong" | "b" | "th" => Style::default().add_modifier(Modifier::BOLD),
            "em" | "i" => Style::default().add_modifier(Modifier::ITALIC),
            "u" => Style::default().add_modifier(Modifier::UNDERLINED),
            "s" | "strike" | "del" => Style::default().add_modifier(Modifier::CROSSED_OUT),
            "code" | "pre" => Style::default().fg(Color::Yellow),
            "mark" => Style::default().bg(Color::Yellow).fg(Color::Black),
            "a" => Style::default()
                .fg(Color::Blue)
                .add_modifier(Modifier::UNDERLINED),
            "blockquote" => Style::default().add_modifier(Modifier::ITALIC),
            _ => Style::default(),
        }
    }

    fn text(&mut self, raw: &str) {
        if self.skip_depth > 0 || raw.is_empty() {
            return;
        }
        let text = decode_entities(raw);
        let style = self.current_style();

        if self.pre_depth > 0 {
            for (i, part) in text.split('\n').enumerate() {
                if i > 0 {
                    self.flush_line_always();
                }
                if !part.is_empty() {
                    self.start_line();
                    self.spans.push(Span::styled(part.to_string(), style));
                }
            }
            return;
        }

        if text.starts_with(char::is_whitespace) {
            self.pending_space = true;
        }
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                self.pending_space = true;
            }
            self.push_word(word, style);
        }
        if text.ends_with(char::is_whitespace) {
            self.pending_space = true;
        }
    }

    fn push_word(&mut self, word: &str, style: Style) {
        self.start_line();
        // Markers and gutters already end in a space.
        let after_prefix = self.spans.last().map_or(true, |s| s.content.ends_with(' '));
        if self.pending_space && !after_prefix {
            self.spans.push(Span::styled(" ", style));
        }
        self.spans.push(Span::styled(word.to_string(), style));
        self.pending_space = false;
    }

    /// Quote gutter on a fresh line.
    fn start_line(&mut self) {
        if self.spans.is_empty() && self.quote_depth > 0 {
            self.spans.push(Span::styled(
                "│ ".repeat(self.quote_depth),
                Style::default().fg(Color::DarkGray),
            ));
        }
    }

    fn flush_line(&mut self) {
        if !self.spans.is_empty() {
            self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        }
        self.pending_space = false;
    }

    fn flush_line_always(&mut self) {
        self.lines.push(Line::from(std::mem::take(&mut self.spans)));
        self.pending_space = false;
    }

    /// End the current line and leave one blank line before the next block.
    fn block_break(&mut self) {
        self.flush_line();
        if self.lines.last().is_some_and(|l| !l.spans.is_empty()) {
            self.lines.push(Line::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn paragraphs_are_separated_by_a_blank_line() {
        let lines = render_html("<p>First   para</p><p>Second</p>", Theme::Dark);
        assert_eq!(plain(&lines), vec!["First para", "", "Second"]);
    }

    #[test]
    fn inline_tags_keep_words_apart() {
        let lines = render_html("<p>Hello <strong>bold</strong> world</p>", Theme::Dark);
        assert_eq!(plain(&lines), vec!["Hello bold world"]);
        let bold = lines[0].spans.iter().find(|s| s.content == "bold").unwrap();
        assert!(bold.style.add_modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn lists_get_markers() {
        let lines = render_html(
            "<ul><li>one</li><li>two</li></ul><ol><li>a</li><li>b</li></ol>",
            Theme::Dark,
        );
        assert_eq!(plain(&lines), vec!["• one", "• two", "", "1. a", "2. b"]);
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(decode_entities("a &amp; b &lt;c&gt; &#39;d&#x27; &bogus;"), "a & b <c> 'd' &bogus;");
    }

    #[test]
    fn br_and_pre_preserve_line_breaks() {
        let lines = render_html("<p>a<br>b</p><pre>x\n  y</pre>", Theme::Dark);
        assert_eq!(plain(&lines), vec!["a", "b", "", "x", "  y"]);
    }

    #[test]
    fn inline_colors_follow_the_theme() {
        let html = r#"<p><span style="color: #000000">dark ink</span></p>"#;
        let dark = render_html(html, Theme::Dark);
        let span = dark[0].spans.iter().find(|s| s.content == "dark").unwrap();
        assert_eq!(span.style.fg, Some(Color::Rgb(0xe5, 0xe7, 0xeb)));

        let light = render_html(html, Theme::Light);
        let span = light[0].spans.iter().find(|s| s.content == "dark").unwrap();
        assert_eq!(span.style.fg, Some(Color::Rgb(0, 0, 0)));
    }

    #[test]
    fn links_show_their_target_and_images_their_alt() {
        let lines = render_html(
            r#"<p><a href="https://example.com/x">docs</a> <img src="/media/a.png" alt="chart"></p>"#,
            Theme::Dark,
        );
        assert_eq!(
            plain(&lines),
            vec!["docs <https://example.com/x> [image: chart] /media/a.png"]
        );
    }

    #[test]
    fn scripts_and_comments_are_dropped() {
        let lines = render_html("<!-- note --><script>alert(1)</script><p>ok</p>", Theme::Dark);
        assert_eq!(plain(&lines), vec!["ok"]);
    }

    #[test]
    fn blockquotes_get_a_gutter() {
        let lines = render_html("<blockquote><p>quoted text</p></blockquote>", Theme::Dark);
        assert_eq!(plain(&lines), vec!["│ quoted text"]);
    }
}
