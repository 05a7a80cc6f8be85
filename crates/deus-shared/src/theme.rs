//! Theme-aware remapping of inline colors in stored page HTML.
//!
//! Content is authored under one theme and read under another, so inline
//! `color` / `background-color` values picked for a light background can be
//! unreadable on a dark one (and the other way round).

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

static STYLE_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)style\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static COLOR_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^|;)(\s*)(background-color|color)(\s*:\s*)(#[0-9a-f]{3,8}|rgba?\([^)]*\)|[a-z]+)").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Relative luminance in `0.0..=1.0`.
    pub fn luminance(self) -> f32 {
        let Rgb(r, g, b) = self;
        (0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32) / 255.0
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

struct Palette {
    text: Rgb,
    highlight: Rgb,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    fn palette(self) -> Palette {
        match self {
            Self::Light => Palette {
                text: Rgb(0x1f, 0x29, 0x37),
                highlight: Rgb(0xfe, 0xf0, 0x8a),
            },
            Self::Dark => Palette {
                text: Rgb(0xe5, 0xe7, 0xeb),
                highlight: Rgb(0x85, 0x4d, 0x0e),
            },
        }
    }

    /// Text color that would disappear against this theme's background.
    fn text_unreadable(self, color: Rgb) -> bool {
        match self {
            Self::Light => color.luminance() > 0.85,
            Self::Dark => color.luminance() < 0.25,
        }
    }

    /// Highlight that would wash out this theme's text.
    fn highlight_unreadable(self, color: Rgb) -> bool {
        match self {
            Self::Light => color.luminance() < 0.2,
            Self::Dark => color.luminance() > 0.7,
        }
    }
}

/// Parse the CSS color forms the editor emits.
pub fn parse_css_color(value: &str) -> Option<Rgb> {
    let value = value.trim().to_ascii_lowercase();

    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex);
    }

    if let Some(args) = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = args
            .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |p: &str| -> Option<u8> {
            match p.strip_suffix('%') {
                Some(pct) => pct
                    .parse::<f32>()
                    .ok()
                    .map(|v| (v.clamp(0.0, 100.0) * 2.55).round() as u8),
                None => p.parse::<f32>().ok().map(|v| v.clamp(0.0, 255.0).round() as u8),
            }
        };
        return Some(Rgb(channel(parts[0])?, channel(parts[1])?, channel(parts[2])?));
    }

    named_color(&value)
}

fn parse_hex(hex: &str) -> Option<Rgb> {
    let expand = |c: u8| c * 16 + c;
    let digit = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok();
    let pair = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();

    match hex.len() {
        3 | 4 => Some(Rgb(expand(digit(0)?), expand(digit(1)?), expand(digit(2)?))),
        6 | 8 => Some(Rgb(pair(0)?, pair(2)?, pair(4)?)),
        _ => None,
    }
}

fn named_color(name: &str) -> Option<Rgb> {
    let rgb = match name {
        "black" => Rgb(0, 0, 0),
        "white" => Rgb(255, 255, 255),
        "gray" | "grey" => Rgb(128, 128, 128),
        "silver" => Rgb(192, 192, 192),
        "red" => Rgb(255, 0, 0),
        "maroon" => Rgb(128, 0, 0),
        "yellow" => Rgb(255, 255, 0),
        "orange" => Rgb(255, 165, 0),
        "green" => Rgb(0, 128, 0),
        "lime" => Rgb(0, 255, 0),
        "blue" => Rgb(0, 0, 255),
        "navy" => Rgb(0, 0, 128),
        "purple" => Rgb(128, 0, 128),
        "teal" => Rgb(0, 128, 128),
        _ => return None,
    };
    Some(rgb)
}

/// Rewrite inline colors inside `style` attributes so they stay readable under
/// `theme`. Values the parser does not understand are left untouched.
pub fn remap_colors(html: &str, theme: Theme) -> String {
    let palette = theme.palette();

    STYLE_ATTR_RE
        .replace_all(html, |attr: &Captures| {
            let (quote, body) = match (attr.get(1), attr.get(2)) {
                (Some(body), _) => ('"', body.as_str()),
                (None, Some(body)) => ('\'', body.as_str()),
                (None, None) => return attr[0].to_string(),
            };

            let remapped = COLOR_DECL_RE.replace_all(body, |decl: &Captures| {
                let property = decl[3].to_ascii_lowercase();
                let Some(color) = parse_css_color(&decl[5]) else {
                    return decl[0].to_string();
                };

                let replacement = if property == "color" && theme.text_unreadable(color) {
                    palette.text
                } else if property == "background-color" && theme.highlight_unreadable(color) {
                    palette.highlight
                } else {
                    return decl[0].to_string();
                };

                format!(
                    "{}{}{}{}{}",
                    &decl[1],
                    &decl[2],
                    &decl[3],
                    &decl[4],
                    replacement.to_hex()
                )
            });

            format!("style={}{}{}", quote, remapped, quote)
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_color_forms() {
        assert_eq!(parse_css_color("#fff"), Some(Rgb(255, 255, 255)));
        assert_eq!(parse_css_color("#1F2937"), Some(Rgb(0x1f, 0x29, 0x37)));
        assert_eq!(parse_css_color("#00000080"), Some(Rgb(0, 0, 0)));
        assert_eq!(parse_css_color("rgb(10, 20, 30)"), Some(Rgb(10, 20, 30)));
        assert_eq!(parse_css_color("rgba(255,255,255,0.5)"), Some(Rgb(255, 255, 255)));
        assert_eq!(parse_css_color("rgb(100% 0% 0%)"), Some(Rgb(255, 0, 0)));
        assert_eq!(parse_css_color("Black"), Some(Rgb(0, 0, 0)));
        assert_eq!(parse_css_color("var(--x)"), None);
        assert_eq!(parse_css_color("#12"), None);
    }

    #[test]
    fn dark_text_is_lifted_on_dark_theme() {
        let html = r#"<p><span style="color: #000000; font-weight: bold">note</span></p>"#;
        let out = remap_colors(html, Theme::Dark);
        assert_eq!(
            out,
            r#"<p><span style="color: #e5e7eb; font-weight: bold">note</span></p>"#
        );
    }

    #[test]
    fn light_text_is_darkened_on_light_theme() {
        let html = r#"<span style='color:rgb(250, 250, 250)'>x</span>"#;
        assert_eq!(
            remap_colors(html, Theme::Light),
            r#"<span style='color:#1f2937'>x</span>"#
        );
    }

    #[test]
    fn readable_colors_are_untouched() {
        let html = r#"<span style="color: #ef4444">warn</span>"#;
        assert_eq!(remap_colors(html, Theme::Dark), html);
        assert_eq!(remap_colors(html, Theme::Light), html);
    }

    #[test]
    fn background_is_not_confused_with_color() {
        let html = r#"<mark style="background-color: #ffff00; color: #111">hi</mark>"#;
        let out = remap_colors(html, Theme::Dark);
        assert_eq!(
            out,
            r#"<mark style="background-color: #854d0e; color: #e5e7eb">hi</mark>"#
        );
    }

    #[test]
    fn text_outside_style_attributes_is_untouched() {
        let html = "<p>color: black</p>";
        assert_eq!(remap_colors(html, Theme::Dark), html);
    }
}
