use anyhow::Result;
use crossterm::{
    cursor::MoveTo,
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::io::{self, Write};
use std::process::Command;
use tempfile::NamedTempFile;
use tui_textarea::{CursorMove, Input, Key, TextArea};

/// Create a TextArea holding a page's HTML source, cursor at the top.
pub fn create_textarea(content: &str) -> TextArea<'static> {
    let lines: Vec<String> = if content.is_empty() {
        vec![String::new()]
    } else {
        content.lines().map(str::to_string).collect()
    };

    let mut textarea = TextArea::new(lines);
    textarea.move_cursor(CursorMove::Top);
    textarea.move_cursor(CursorMove::Head);

    // Configure undo history
    textarea.set_max_histories(100);

    textarea
}

/// Extract content from TextArea as a single String
pub fn textarea_content(textarea: &TextArea) -> String {
    textarea.lines().join("\n")
}

/// Translate a crossterm key press into the editor's input type.
pub fn to_input(key: KeyEvent) -> Input {
    let key_code = match key.code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Enter => Key::Enter,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Tab => Key::Tab,
        KeyCode::Delete => Key::Delete,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Esc => Key::Esc,
        KeyCode::F(n) => Key::F(n),
        _ => Key::Null,
    };

    Input {
        key: key_code,
        ctrl: key.modifiers.contains(KeyModifiers::CONTROL),
        alt: key.modifiers.contains(KeyModifiers::ALT),
        shift: key.modifiers.contains(KeyModifiers::SHIFT),
    }
}

/// Snippet inserted for an uploaded image.
pub fn image_tag(url: &str, alt: &str) -> String {
    let escape = |s: &str| {
        s.replace('&', "&amp;")
            .replace('"', "&quot;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    };
    format!(r#"<img src="{}" alt="{}">"#, escape(url), escape(alt))
}

/// Launch external editor with current content, return edited content
pub fn launch_external_editor(content: &str) -> Result<String> {
    // Get editor from environment, fallback to vim
    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| "vim".to_string());

    let mut temp_file = NamedTempFile::with_suffix(".html")?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.flush()?;
    let temp_path = temp_file.path().to_path_buf();

    // Leave TUI mode
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;

    let status = Command::new(&editor).arg(&temp_path).status();

    // Restore TUI mode (always, even on error)
    let restore_result = (|| -> Result<()> {
        execute!(io::stdout(), EnterAlternateScreen)?;
        execute!(io::stdout(), Clear(ClearType::All), MoveTo(0, 0))?;
        enable_raw_mode()?;
        Ok(())
    })();

    if let Err(e) = restore_result {
        anyhow::bail!("Failed to restore terminal: {}", e);
    }

    match status {
        Ok(exit_status) if exit_status.success() => {
            let edited = std::fs::read_to_string(&temp_path)?;
            // Editors like to append a trailing newline
            Ok(edited.strip_suffix('\n').unwrap_or(&edited).to_string())
        }
        Ok(exit_status) => {
            anyhow::bail!("Editor exited with status: {}", exit_status)
        }
        Err(e) => {
            anyhow::bail!("Failed to launch editor '{}': {}", editor, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_survives_the_textarea() {
        let html = "<h1>Leave</h1>\n<p>Ask your lead.</p>";
        let textarea = create_textarea(html);
        assert_eq!(textarea_content(&textarea), html);
        assert_eq!(textarea.cursor(), (0, 0));
    }

    #[test]
    fn empty_pages_get_one_blank_line() {
        let textarea = create_textarea("");
        assert_eq!(textarea.lines().len(), 1);
        assert_eq!(textarea_content(&textarea), "");
    }

    #[test]
    fn typed_keys_reach_the_textarea() {
        let mut textarea = create_textarea("");
        for c in "<p>".chars() {
            textarea.input(to_input(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)));
        }
        assert_eq!(textarea_content(&textarea), "<p>");

        let save = to_input(KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL));
        assert!(save.ctrl);
    }

    #[test]
    fn image_tags_are_escaped() {
        assert_eq!(
            image_tag("http://h/media/pages/1/a.png", "a \"b\""),
            r#"<img src="http://h/media/pages/1/a.png" alt="a &quot;b&quot;">"#
        );
    }
}
