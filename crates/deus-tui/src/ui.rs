use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};

use crate::app::{
    App, AuthMode, FlashLevel, InputField, NewPageField, NewPageForm, PasswordForm, Popup,
    ProfileField, ProfileForm, SidebarSection, View, VimMode,
};
use crate::autosave::SaveState;
use crate::html::render_html;
use deus_shared::{theme::Theme, Accent, PageKind, PageRecord};

fn accent_color(accent: Accent) -> Color {
    match accent {
        Accent::Gray => Color::Gray,
        Accent::White => Color::White,
        Accent::Yellow => Color::Yellow,
        Accent::Blue => Color::Blue,
        Accent::Green => Color::Green,
        Accent::Magenta => Color::Magenta,
    }
}

/// Base style of the page pane for the chosen theme.
fn page_style(theme: Theme) -> Style {
    match theme {
        Theme::Dark => Style::default(),
        Theme::Light => Style::default().bg(Color::White).fg(Color::Black),
    }
}

pub fn draw(f: &mut Frame, app: &App) {
    match app.view {
        View::Login => draw_login(f, app),
        View::ForgotPassword => draw_forgot_password(f, app),
        View::ResetPassword => draw_reset_password(f, app),
        View::VerifyingAuth => draw_loading(f, "Verifying authentication..."),
        View::Browse => draw_browse(f, app),
    }

    if app.view != View::Browse {
        draw_flash_line(f, app);
    }

    // Draw error overlay if present
    if let Some(ref error) = app.error_message {
        draw_error_popup(f, error);
    }

    // Draw loading overlay if loading
    if app.loading {
        draw_loading_overlay(f, &app.loading_message);
    }
}

/// Centered form container; returns the inner area.
fn draw_form_frame(f: &mut Frame, title: &str, height: u16) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(20),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(f.area());

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(50),
            Constraint::Percentage(25),
        ])
        .split(vertical[1]);

    let form_block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = form_block.inner(horizontal[1]);
    f.render_widget(form_block, horizontal[1]);
    inner
}

fn draw_input(f: &mut Frame, area: Rect, title: &str, value: &str, focused: bool, masked: bool) {
    let style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::Gray)
    };
    let block = Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(style);

    let shown = if masked {
        "*".repeat(value.chars().count())
    } else {
        value.to_string()
    };
    f.render_widget(Paragraph::new(shown).block(block), area);
}

/// Column `offset` characters into a bordered box, clamped to its inside.
fn cursor_column(area: Rect, offset: usize) -> u16 {
    let inner = area.width.saturating_sub(2);
    let offset = u16::try_from(offset).unwrap_or(u16::MAX).min(inner);
    area.x.saturating_add(1).saturating_add(offset)
}

fn set_input_cursor(f: &mut Frame, area: Rect, value: &str) {
    f.set_cursor_position((cursor_column(area, value.chars().count()), area.y + 1));
}

fn field_label(field: InputField) -> &'static str {
    match field {
        InputField::Email => "Email",
        InputField::Password => "Password",
        InputField::Confirm => "Confirm password",
        InputField::FullName => "Full name (optional)",
    }
}

fn draw_login(f: &mut Frame, app: &App) {
    let fields = app.auth_fields();
    let is_signup = app.auth_mode == AuthMode::SignUp;
    let title = if is_signup { "Sign up" } else { "Login" };
    let inner = draw_form_frame(f, title, fields.len() as u16 * 3 + 6);

    let mut constraints: Vec<Constraint> = fields.iter().map(|_| Constraint::Length(3)).collect();
    constraints.push(Constraint::Length(2)); // Hint
    constraints.push(Constraint::Min(0));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(constraints)
        .split(inner);

    for (i, field) in fields.iter().enumerate() {
        let masked = matches!(field, InputField::Password | InputField::Confirm);
        draw_input(
            f,
            chunks[i],
            field_label(*field),
            app.login_input(*field),
            app.login_field == *field,
            masked,
        );
    }

    let mode_text = match (app.vim_mode, is_signup) {
        (VimMode::Normal, false) => "'i' edit | Enter submit | 's' sign up | 'f' forgot password | 'q' quit",
        (VimMode::Normal, true) => "'i' edit | Enter submit | 'l' login | 'q' quit",
        (VimMode::Insert, _) => "Type to enter | Tab next field | Esc normal | Enter submit",
    };
    let hint = Paragraph::new(mode_text)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(hint, chunks[fields.len()]);

    // Set cursor position in insert mode
    if app.vim_mode == VimMode::Insert {
        if let Some(idx) = fields.iter().position(|field| *field == app.login_field) {
            set_input_cursor(f, chunks[idx], app.login_input(app.login_field));
        }
    }
}

fn draw_forgot_password(f: &mut Frame, app: &App) {
    let inner = draw_form_frame(f, "Forgot password", 9);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(3), Constraint::Length(2), Constraint::Min(0)])
        .split(inner);

    draw_input(f, chunks[0], "Email", &app.forgot_email, true, false);
    let hint = Paragraph::new("Enter send reset link | Esc back to login")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(hint, chunks[1]);
    set_input_cursor(f, chunks[0], &app.forgot_email);
}

fn draw_reset_password(f: &mut Frame, app: &App) {
    let inner = draw_form_frame(f, "Choose a new password", 12);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(inner);

    let on_confirm = app.reset_field == InputField::Confirm;
    draw_input(f, chunks[0], "New password", &app.reset_password, !on_confirm, true);
    draw_input(f, chunks[1], "Confirm password", &app.reset_confirm, on_confirm, true);

    let hint = Paragraph::new("Tab switch field | Enter reset | Esc cancel")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(hint, chunks[2]);

    if on_confirm {
        set_input_cursor(f, chunks[1], &app.reset_confirm);
    } else {
        set_input_cursor(f, chunks[0], &app.reset_password);
    }
}

fn draw_browse(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Main content
            Constraint::Length(1), // Status bar
        ])
        .split(f.area());

    draw_header(f, chunks[0], app);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(chunks[1]);

    draw_sidebar(f, main[0], app);
    if app.editing {
        draw_editor(f, main[1], app);
    } else {
        draw_page(f, main[1], app);
    }
    draw_status_bar(f, chunks[2], app);

    match &app.popup {
        Some(Popup::NewPage(form)) => draw_new_page_popup(f, form),
        Some(Popup::Rename { title, .. }) => draw_text_popup(f, "Rename page", "Title", title),
        Some(Popup::Icon { icon, .. }) => {
            draw_text_popup(f, "Page icon", "Emoji (empty resets to default)", icon)
        }
        Some(Popup::InsertImage { path }) => {
            draw_text_popup(f, "Insert image", "Path to png/jpg/gif/webp/avif", path)
        }
        Some(Popup::ConfirmDelete { title, .. }) => draw_delete_confirm_popup(f, title),
        Some(Popup::Password(form)) => draw_password_popup(f, form),
        Some(Popup::Profile(form)) => draw_profile_popup(f, app, form),
        Some(Popup::Help) => draw_help_popup(f),
        None => {}
    }
}

fn draw_header(f: &mut Frame, area: Rect, app: &App) {
    let user = app
        .user
        .as_ref()
        .map(|u| u.display_name())
        .unwrap_or("Signed in");

    let header = Paragraph::new(vec![Line::from(vec![
        Span::styled(
            "DEUS CODE",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(user, Style::default().fg(Color::Yellow)),
        Span::styled(
            format!(" ({})", app.role.label()),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("theme: {}", app.theme().label()),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw(" | "),
        Span::styled(
            if app.prefs.autosave_enabled {
                "autosave: on"
            } else {
                "autosave: off"
            },
            Style::default().fg(Color::DarkGray),
        ),
    ])])
    .block(Block::default().borders(Borders::BOTTOM));

    f.render_widget(header, area);
}

fn draw_sidebar(f: &mut Frame, area: Rect, app: &App) {
    let entries = app.sidebar_entries();

    let title = if app.searching || !app.search_query.is_empty() {
        format!(" Search: {} ", app.search_query)
    } else {
        format!(" Pages ({}) ", app.tree.len())
    };
    let border_style = if app.editing {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border_style);

    if entries.is_empty() {
        let text = if app.search_query.is_empty() {
            "No pages yet. Press 'n' to create one."
        } else {
            "No matching pages."
        };
        let empty = Paragraph::new(text)
            .style(Style::default().fg(Color::DarkGray))
            .wrap(Wrap { trim: true })
            .block(block);
        f.render_widget(empty, area);
        return;
    }

    let current_id = app.current.as_ref().map(|p| p.id);
    let items: Vec<ListItem> = entries
        .iter()
        .filter_map(|entry| {
            let page = app.tree.record(entry.page_id)?;
            let marker = match entry.section {
                SidebarSection::Pinned => "★ ",
                SidebarSection::Tree if entry.has_children && entry.expanded => "▾ ",
                SidebarSection::Tree if entry.has_children => "▸ ",
                SidebarSection::Tree => "  ",
            };

            let mut title_style = Style::default().fg(Color::White);
            if Some(page.id) == current_id {
                title_style = title_style.add_modifier(Modifier::BOLD).fg(Color::Cyan);
            }

            let mut spans = vec![
                Span::raw("  ".repeat(entry.depth)),
                Span::styled(marker, Style::default().fg(Color::DarkGray)),
                Span::raw(format!("{} ", page.display_icon())),
                Span::styled(page.title.clone(), title_style),
            ];
            if page.status == deus_shared::PageStatus::Draft {
                spans.push(Span::styled(" (draft)", Style::default().fg(Color::DarkGray)));
            }
            Some(ListItem::new(Line::from(spans)))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray));
    let mut state = ListState::default().with_selected(Some(app.selected));
    f.render_stateful_widget(list, area, &mut state);

    if app.searching {
        let text_width = " Search: ".chars().count() + app.search_query.chars().count();
        f.set_cursor_position((cursor_column(area, text_width), area.y));
    }
}

fn save_state_span(state: Option<SaveState>) -> Span<'static> {
    match state {
        Some(SaveState::Dirty) => Span::styled("● unsaved", Style::default().fg(Color::Yellow)),
        Some(SaveState::Saving) => Span::styled("saving...", Style::default().fg(Color::Blue)),
        Some(SaveState::Clean) => Span::styled("saved", Style::default().fg(Color::Green)),
        None => Span::raw(""),
    }
}

fn page_meta_lines(app: &App, page: &PageRecord) -> Vec<Line<'static>> {
    let meta = page.kind.meta();
    let status_color = match page.status {
        deus_shared::PageStatus::Draft => Color::Yellow,
        deus_shared::PageStatus::Published => Color::Green,
    };

    vec![
        Line::from(vec![Span::styled(
            format!("{} {}", page.display_icon(), page.title),
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from(vec![
            Span::styled(meta.label, Style::default().fg(accent_color(meta.accent))),
            Span::raw(" | "),
            Span::styled(page.status.label(), Style::default().fg(status_color)),
            Span::raw(" | "),
            Span::styled(
                format!("updated {}", page.updated_at.format("%Y-%m-%d %H:%M")),
                Style::default().fg(Color::DarkGray),
            ),
            Span::raw("  "),
            save_state_span(app.save_state()),
        ]),
        Line::from(""),
    ]
}

fn draw_page(f: &mut Frame, area: Rect, app: &App) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .style(page_style(app.theme()));

    let Some(page) = app.current.as_ref() else {
        let lines = match &app.missing_slug {
            Some(slug) => vec![
                Line::from(Span::styled(
                    "Page not found",
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(format!("Nothing lives at '{}'. It may have been deleted.", slug)),
                Line::from("Pick another page from the sidebar."),
            ],
            None => vec![
                Line::from(Span::styled(
                    "Welcome to Deus Code",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from("Select a page in the sidebar and press Enter."),
                Line::from("Press '?' for all keys."),
            ],
        };
        let empty = Paragraph::new(lines)
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(block);
        f.render_widget(empty, area);
        return;
    };

    let mut lines = page_meta_lines(app, page);

    match page.kind {
        PageKind::Link => {
            let url = page.external_url.as_deref().unwrap_or("(no url)");
            lines.push(Line::from(vec![
                Span::styled("Opens: ", Style::default().fg(Color::Cyan)),
                Span::styled(
                    url.to_string(),
                    Style::default().add_modifier(Modifier::UNDERLINED),
                ),
            ]));
        }
        PageKind::Folder => {
            let children = app.current_children();
            if children.is_empty() {
                lines.push(Line::from(Span::styled(
                    "This folder is empty.",
                    Style::default().fg(Color::DarkGray),
                )));
            }
            for child in children {
                lines.push(Line::from(vec![
                    Span::raw(format!("  {} ", child.display_icon())),
                    Span::raw(child.title.clone()),
                    Span::styled(
                        format!("  {}", child.kind.meta().label),
                        Style::default().fg(accent_color(child.kind.meta().accent)),
                    ),
                ]));
            }
        }
        _ => match app.current_html().filter(|html| !html.trim().is_empty()) {
            Some(html) => lines.extend(render_html(html, app.theme())),
            None => {
                let hint = if app.can_edit() {
                    "This page is empty. Press 'e' to start writing."
                } else {
                    "This page is empty."
                };
                lines.push(Line::from(Span::styled(
                    hint,
                    Style::default().fg(Color::DarkGray),
                )));
            }
        },
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((app.page_scroll, 0));
    f.render_widget(paragraph, area);
}

fn draw_editor(f: &mut Frame, area: Rect, app: &App) {
    let title = app
        .current
        .as_ref()
        .map(|p| format!(" Editing: {} ", p.title))
        .unwrap_or_else(|| " Editing ".to_string());

    let block = Block::default()
        .title(title)
        .title_bottom(Line::from(vec![Span::raw(" "), save_state_span(app.save_state()), Span::raw(" ")]))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .style(page_style(app.theme()));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(session) = app.session.as_ref() else {
        return;
    };

    let height = inner.height.max(1) as usize;
    let (row, col) = session.textarea.cursor();
    let top = row.saturating_sub(height - 1);

    let lines: Vec<Line> = session
        .textarea
        .lines()
        .iter()
        .skip(top)
        .take(height)
        .map(|l| Line::from(l.as_str()))
        .collect();
    f.render_widget(Paragraph::new(lines), inner);

    let col = u16::try_from(col).unwrap_or(u16::MAX);
    let x = inner.x.saturating_add(col.min(inner.width.saturating_sub(1)));
    let y = inner.y + (row - top) as u16;
    f.set_cursor_position((x, y));
}

fn draw_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let (mode, mode_color) = if app.popup.is_some() {
        ("DIALOG", Color::Magenta)
    } else if app.editing {
        ("EDIT", Color::Green)
    } else if app.searching {
        ("SEARCH", Color::Yellow)
    } else {
        ("BROWSE", Color::Blue)
    };

    let hints = if app.popup.is_some() {
        "Enter: confirm | Esc: cancel"
    } else if app.editing {
        "Esc: stop editing | Ctrl+S: save | Ctrl+E: $EDITOR | Ctrl+O: image"
    } else if app.searching {
        "Type to filter | Enter: keep | Esc: clear"
    } else {
        "Enter: open | e: edit | n: new | d: delete | p: pin | /: search | ?: help | q: quit"
    };

    let mut spans = vec![
        Span::styled(
            format!(" {} ", mode),
            Style::default().bg(mode_color).fg(Color::White),
        ),
        Span::raw(" "),
    ];
    match &app.flash {
        Some(flash) => spans.push(flash_span(flash.level, &flash.text)),
        None => spans.push(Span::styled(hints, Style::default().fg(Color::DarkGray))),
    }

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn flash_span(level: FlashLevel, text: &str) -> Span<'static> {
    let color = match level {
        FlashLevel::Info => Color::Green,
        FlashLevel::Error => Color::Red,
    };
    Span::styled(text.to_string(), Style::default().fg(color))
}

fn draw_flash_line(f: &mut Frame, app: &App) {
    let Some(flash) = &app.flash else {
        return;
    };
    let area = f.area();
    let line_area = Rect::new(area.x, area.bottom().saturating_sub(1), area.width, 1);
    f.render_widget(Clear, line_area);
    f.render_widget(
        Paragraph::new(Line::from(flash_span(flash.level, &flash.text))).alignment(Alignment::Center),
        line_area,
    );
}

fn popup_block(title: &str, color: Color) -> Block<'static> {
    Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

fn draw_new_page_popup(f: &mut Frame, form: &NewPageForm) {
    let area = centered_rect(60, 50, f.area());
    f.render_widget(Clear, area);

    let block = popup_block("New page", Color::Cyan);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if form.choosing_kind {
        let items: Vec<ListItem> = PageKind::ALL
            .iter()
            .map(|kind| {
                let meta = kind.meta();
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{} ", meta.icon)),
                    Span::styled(
                        format!("{:<10}", meta.label),
                        Style::default().fg(accent_color(meta.accent)),
                    ),
                    Span::styled(meta.description, Style::default().fg(Color::DarkGray)),
                ]))
            })
            .collect();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(inner);

        let list = List::new(items).highlight_style(Style::default().bg(Color::DarkGray));
        let mut state = ListState::default().with_selected(Some(form.kind_idx));
        f.render_stateful_widget(list, chunks[0], &mut state);

        let hint = Paragraph::new("j/k: choose kind | Enter: next | Esc: cancel")
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center);
        f.render_widget(hint, chunks[1]);
        return;
    }

    let is_link = form.kind() == PageKind::Link;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Length(if is_link { 3 } else { 0 }),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(inner);

    let meta = form.kind().meta();
    let kind_line = Paragraph::new(Line::from(vec![
        Span::raw(format!("{} ", meta.icon)),
        Span::styled(meta.label, Style::default().fg(accent_color(meta.accent))),
        Span::styled(
            if form.parent_id.is_some() {
                "  inside the selected folder"
            } else {
                "  at the top level"
            },
            Style::default().fg(Color::DarkGray),
        ),
    ]));
    f.render_widget(kind_line, chunks[0]);

    let on_title = form.field == NewPageField::Title;
    draw_input(f, chunks[1], "Title", &form.title, on_title, false);
    if is_link {
        draw_input(f, chunks[2], "URL", &form.url, !on_title, false);
    }

    let hint = if is_link {
        "Tab: switch field | Enter: create | Esc: cancel"
    } else {
        "Enter: create | Esc: cancel"
    };
    let hint = Paragraph::new(hint)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(hint, chunks[4]);

    if on_title {
        set_input_cursor(f, chunks[1], &form.title);
    } else {
        set_input_cursor(f, chunks[2], &form.url);
    }
}

fn draw_text_popup(f: &mut Frame, title: &str, label: &str, value: &str) {
    let area = centered_rect(50, 20, f.area());
    f.render_widget(Clear, area);

    let block = popup_block(title, Color::Cyan);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(inner);

    draw_input(f, chunks[0], label, value, true, false);
    set_input_cursor(f, chunks[0], value);
}

fn draw_password_popup(f: &mut Frame, form: &PasswordForm) {
    let area = centered_rect(50, 30, f.area());
    f.render_widget(Clear, area);

    let block = popup_block("Change password", Color::Cyan);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Length(3), Constraint::Length(3), Constraint::Min(0)])
        .split(inner);

    let on_confirm = form.field == InputField::Confirm;
    draw_input(f, chunks[0], "New password", &form.new_password, !on_confirm, true);
    draw_input(f, chunks[1], "Confirm password", &form.confirm, on_confirm, true);

    if on_confirm {
        set_input_cursor(f, chunks[1], &form.confirm);
    } else {
        set_input_cursor(f, chunks[0], &form.new_password);
    }
}

fn draw_profile_popup(f: &mut Frame, app: &App, form: &ProfileForm) {
    let area = centered_rect(60, 45, f.area());
    f.render_widget(Clear, area);

    let block = popup_block("Profile", Color::Cyan);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(inner);

    if let Some(user) = app.user.as_ref() {
        let info = vec![
            Line::from(vec![
                Span::styled(
                    user.display_name().to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                ),
                Span::styled(format!("  {}", user.email), Style::default().fg(Color::DarkGray)),
            ]),
            Line::from(Span::styled(
                format!("avatar: {}", user.avatar_url.as_deref().unwrap_or("none")),
                Style::default().fg(Color::DarkGray),
            )),
        ];
        f.render_widget(Paragraph::new(info), chunks[0]);
    }

    let on_avatar = form.field == ProfileField::AvatarPath;
    draw_input(f, chunks[1], "Full name (Enter saves)", &form.full_name, !on_avatar, false);
    draw_input(f, chunks[2], "Avatar image path (Enter uploads)", &form.avatar_path, on_avatar, false);
    f.render_widget(
        Paragraph::new(Span::styled(
            "Tab: switch field | Esc: close",
            Style::default().fg(Color::DarkGray),
        )),
        chunks[3],
    );

    if on_avatar {
        set_input_cursor(f, chunks[2], &form.avatar_path);
    } else {
        set_input_cursor(f, chunks[1], &form.full_name);
    }
}

fn draw_delete_confirm_popup(f: &mut Frame, title: &str) {
    let area = centered_rect(50, 20, f.area());
    f.render_widget(Clear, area);

    let text = vec![
        Line::from(""),
        Line::from(vec![
            Span::raw("Delete "),
            Span::styled(
                format!("\"{}\"", title),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("?"),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            "y: confirm | n/Esc: cancel",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(popup_block("Delete page", Color::Red));
    f.render_widget(paragraph, area);
}

fn draw_help_popup(f: &mut Frame) {
    let area = centered_rect(60, 70, f.area());
    f.render_widget(Clear, area);

    let keys = [
        ("j/k", "move in the sidebar"),
        ("h/l", "collapse / expand"),
        ("Enter", "open page"),
        ("/", "search titles"),
        ("e", "edit the open page"),
        ("Ctrl+S", "save now"),
        ("n", "new page in the selected folder"),
        ("r", "rename"),
        ("i", "set icon"),
        ("s", "toggle draft / published"),
        ("d", "delete (empty pages only)"),
        ("p", "pin / unpin"),
        ("t", "toggle theme"),
        ("a", "toggle autosave"),
        ("P", "change password"),
        ("u", "profile: name and avatar"),
        ("R", "reload"),
        ("L", "log out"),
        ("PgUp/PgDn", "scroll page"),
        ("q", "quit"),
    ];

    let lines: Vec<Line> = keys
        .iter()
        .map(|(key, action)| {
            Line::from(vec![
                Span::styled(format!("{:>10}  ", key), Style::default().fg(Color::Cyan)),
                Span::raw(*action),
            ])
        })
        .collect();

    f.render_widget(Paragraph::new(lines).block(popup_block("Keys", Color::Cyan)), area);
}

fn draw_loading(f: &mut Frame, message: &str) {
    let area = f.area();

    let text = Paragraph::new(message)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );

    let center = centered_rect(50, 20, area);
    f.render_widget(text, center);
}

fn draw_loading_overlay(f: &mut Frame, message: &str) {
    let area = centered_rect(40, 10, f.area());

    f.render_widget(Clear, area);

    let text = Paragraph::new(message)
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );

    f.render_widget(text, area);
}

fn draw_error_popup(f: &mut Frame, error: &str) {
    let area = centered_rect(60, 20, f.area());

    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Error ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));

    let text = Paragraph::new(error)
        .style(Style::default().fg(Color::Red))
        .wrap(Wrap { trim: true })
        .block(block);

    f.render_widget(text, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_stays_inside_its_box() {
        let area = Rect::new(10, 5, 20, 3);
        assert_eq!(cursor_column(area, 0), 11);
        assert_eq!(cursor_column(area, 7), 18);
        assert_eq!(cursor_column(area, 500), 29);
        assert_eq!(cursor_column(area, 70_000), 29);
    }

    #[test]
    fn cursor_never_overflows_at_the_screen_edge() {
        let area = Rect::new(u16::MAX - 3, 0, 3, 1);
        assert_eq!(cursor_column(area, usize::MAX), u16::MAX - 1);
    }
}
