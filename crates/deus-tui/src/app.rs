use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use deus_shared::{
    api::{CreatePageRequest, PageListParams, UpdatePageRequest},
    slug::unique_slug,
    theme::Theme,
    tree::{build_tree, visible_rows, ExpandedSet, PageKey, PageTree},
    validation::{
        validate_email, validate_external_url, validate_full_name, validate_new_password,
        validate_storage_folder, validate_title,
    },
    PageKind, PageRecord, PinSet, Role, User,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tui_textarea::TextArea;
use uuid::Uuid;

use crate::api::{ApiClient, ApiError, UserPreferences};
use crate::autosave::{
    AutosaveConfig, AutosaveCoordinator, ManualSave, PendingSave, SaveOutcome, SaveRequest,
    SaveState, SaveTrigger,
};
use crate::editor;

const FLASH_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Login,
    ForgotPassword,
    ResetPassword,
    VerifyingAuth,
    Browse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VimMode {
    Normal,
    Insert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    SignUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    Email,
    Password,
    Confirm,
    FullName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Info,
    Error,
}

#[derive(Debug, Clone)]
pub struct Flash {
    pub text: String,
    pub level: FlashLevel,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebarSection {
    Pinned,
    Tree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidebarEntry {
    pub page_id: Uuid,
    pub depth: usize,
    pub section: SidebarSection,
    pub has_children: bool,
    pub expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewPageField {
    Title,
    Url,
}

#[derive(Debug, Clone)]
pub struct NewPageForm {
    pub parent_id: Option<Uuid>,
    pub kind_idx: usize,
    pub choosing_kind: bool,
    pub title: String,
    pub url: String,
    pub field: NewPageField,
}

impl NewPageForm {
    pub fn kind(&self) -> PageKind {
        PageKind::ALL[self.kind_idx]
    }
}

#[derive(Debug, Clone)]
pub struct PasswordForm {
    pub new_password: String,
    pub confirm: String,
    pub field: InputField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    FullName,
    AvatarPath,
}

#[derive(Debug, Clone)]
pub struct ProfileForm {
    pub full_name: String,
    pub avatar_path: String,
    pub field: ProfileField,
}

/// What submitting the profile popup asks the server for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileChange {
    Name(Option<String>),
    Avatar { folder: String, path: PathBuf },
}

#[derive(Debug, Clone)]
pub enum Popup {
    NewPage(NewPageForm),
    Rename { page_id: Uuid, title: String },
    Icon { page_id: Uuid, icon: String },
    ConfirmDelete { page_id: Uuid, title: String },
    Password(PasswordForm),
    Profile(ProfileForm),
    InsertImage { path: String },
    Help,
}

/// Editor buffer plus save scheduling for the open page.
pub struct EditSession {
    pub textarea: TextArea<'static>,
    pub autosave: AutosaveCoordinator,
    /// The outstanding save, awaited when the app exits.
    save_task: Option<JoinHandle<Result<PageRecord, String>>>,
}

impl EditSession {
    fn new(page_id: Uuid, content: String, config: AutosaveConfig, autosave: bool) -> Self {
        Self {
            textarea: editor::create_textarea(&content),
            autosave: AutosaveCoordinator::new(page_id, content, config, autosave, Instant::now()),
            save_task: None,
        }
    }
}

#[derive(Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Tick,
    VerifyAuth,
    AuthSuccess,
    AuthFailed(String),
    SaveFinished {
        page_id: Uuid,
        revision: u64,
        trigger: SaveTrigger,
        result: Result<PageRecord, String>,
    },
}

pub struct App {
    pub api: ApiClient,
    pub view: View,
    pub vim_mode: VimMode,

    // Loading state
    pub loading: bool,
    pub loading_message: String,
    pub error_message: Option<String>,
    pub flash: Option<Flash>,
    pub needs_terminal_clear: bool,

    // Session
    pub user: Option<User>,
    pub role: Role,
    pub prefs: UserPreferences,
    persist_prefs: bool,
    autosave_config: AutosaveConfig,

    // Login / sign-up form
    pub auth_mode: AuthMode,
    pub login_email: String,
    pub login_password: String,
    pub login_confirm: String,
    pub login_full_name: String,
    pub login_field: InputField,

    // Password recovery
    pub forgot_email: String,
    pub reset_token: Option<String>,
    pub reset_password: String,
    pub reset_confirm: String,
    pub reset_field: InputField,

    // Sidebar
    pub records: Vec<PageRecord>,
    pub tree: PageTree,
    pub expanded: ExpandedSet,
    pub pins: PinSet,
    pub selected: usize,
    pub searching: bool,
    pub search_query: String,

    // Page pane
    pub current: Option<PageRecord>,
    pub missing_slug: Option<String>,
    pub page_scroll: u16,
    pub session: Option<EditSession>,
    pub editing: bool,
    /// Closed editors whose newest edits wait for an earlier save to land.
    held: Vec<EditSession>,
    /// Printed after the terminal is restored.
    pub exit_notice: Option<String>,

    pub popup: Option<Popup>,
}

impl App {
    pub fn new(
        api: ApiClient,
        has_tokens: bool,
        prefs: UserPreferences,
        autosave_config: AutosaveConfig,
        reset_token: Option<String>,
    ) -> Self {
        let view = if reset_token.is_some() {
            View::ResetPassword
        } else if has_tokens {
            View::VerifyingAuth
        } else {
            View::Login
        };

        Self {
            api,
            view,
            vim_mode: VimMode::Normal,
            loading: false,
            loading_message: String::new(),
            error_message: None,
            flash: None,
            needs_terminal_clear: false,
            user: None,
            role: Role::default(),
            prefs,
            persist_prefs: true,
            autosave_config,
            auth_mode: AuthMode::Login,
            login_email: String::new(),
            login_password: String::new(),
            login_confirm: String::new(),
            login_full_name: String::new(),
            login_field: InputField::Email,
            forgot_email: String::new(),
            reset_token,
            reset_password: String::new(),
            reset_confirm: String::new(),
            reset_field: InputField::Password,
            records: Vec::new(),
            tree: PageTree::default(),
            expanded: ExpandedSet::default(),
            pins: PinSet::default(),
            selected: 0,
            searching: false,
            search_query: String::new(),
            current: None,
            missing_slug: None,
            page_scroll: 0,
            session: None,
            editing: false,
            held: Vec::new(),
            exit_notice: None,
            popup: None,
        }
    }

    pub fn theme(&self) -> Theme {
        self.prefs.theme
    }

    pub fn can_edit(&self) -> bool {
        self.role.can_edit()
    }

    pub fn set_loading(&mut self, loading: bool, message: &str) {
        self.loading = loading;
        self.loading_message = message.to_string();
    }

    pub fn set_error(&mut self, message: String) {
        self.error_message = Some(message);
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
    }

    fn show_flash(&mut self, text: impl Into<String>, level: FlashLevel) {
        self.flash = Some(Flash {
            text: text.into(),
            level,
            expires_at: Instant::now() + FLASH_TTL,
        });
    }

    pub fn flash_info(&mut self, text: impl Into<String>) {
        self.show_flash(text, FlashLevel::Info);
    }

    pub fn flash_error(&mut self, text: impl Into<String>) {
        self.show_flash(text, FlashLevel::Error);
    }

    fn save_prefs(&self) {
        if !self.persist_prefs {
            return;
        }
        if let Err(e) = self.prefs.save() {
            tracing::warn!("Could not save preferences: {:#}", e);
        }
    }

    /// Save state of the open page, if it is being edited.
    pub fn save_state(&self) -> Option<SaveState> {
        self.session.as_ref().map(|s| s.autosave.state())
    }

    // ============ Sidebar ============

    /// Rows of the sidebar in display order: pinned pages, then the tree.
    /// While a search query is active only the filtered tree is shown, fully open.
    pub fn sidebar_entries(&self) -> Vec<SidebarEntry> {
        let mut entries = Vec::new();

        if self.search_query.is_empty() {
            entries.extend(self.pins.pinned_pages(&self.records).into_iter().map(|page| {
                SidebarEntry {
                    page_id: page.id,
                    depth: 0,
                    section: SidebarSection::Pinned,
                    has_children: false,
                    expanded: false,
                }
            }));
            entries.extend(tree_entries(&visible_rows(&self.tree.roots, &self.expanded, false)));
        } else {
            let filtered = self.tree.filter(&self.search_query);
            entries.extend(tree_entries(&visible_rows(&filtered, &self.expanded, true)));
        }

        entries
    }

    pub fn selected_entry(&self) -> Option<SidebarEntry> {
        self.sidebar_entries().get(self.selected).copied()
    }

    fn selected_page_id(&self) -> Option<Uuid> {
        self.selected_entry().map(|e| e.page_id)
    }

    fn select_page(&mut self, page_id: Uuid) {
        if let Some(idx) = self
            .sidebar_entries()
            .iter()
            .position(|e| e.page_id == page_id && e.section == SidebarSection::Tree)
        {
            self.selected = idx;
        }
    }

    fn clamp_selection(&mut self) {
        let len = self.sidebar_entries().len();
        self.selected = self.selected.min(len.saturating_sub(1));
    }

    pub fn set_records(&mut self, records: Vec<PageRecord>) {
        self.records = records;
        self.tree = build_tree(&self.records);
        self.clamp_selection();
    }

    fn upsert_record(&mut self, record: PageRecord) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
        self.tree = build_tree(&self.records);
        self.clamp_selection();
    }

    fn remove_record(&mut self, page_id: Uuid) {
        self.records.retain(|r| r.id != page_id);
        self.pins.remove(page_id);
        self.tree = build_tree(&self.records);
        self.clamp_selection();
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.sidebar_entries().len();
        if len == 0 {
            return;
        }
        self.selected = self.selected.saturating_add_signed(delta).min(len - 1);
    }

    fn collapse_selected(&mut self) {
        let Some(entry) = self.selected_entry() else {
            return;
        };
        if entry.section == SidebarSection::Tree && entry.expanded && entry.has_children {
            self.expanded.set(entry.page_id, false);
        } else if let Some(parent) = self.tree.parent_of(entry.page_id) {
            self.select_page(parent);
        }
    }

    fn expand_selected(&mut self) {
        if let Some(entry) = self.selected_entry() {
            if entry.has_children {
                self.expanded.set(entry.page_id, true);
            }
        }
    }

    /// Folder a new page lands in: the selected folder, or the folder holding
    /// the selected page. Root when neither applies.
    pub fn creation_parent(&self) -> Option<Uuid> {
        let record = self.tree.record(self.selected_page_id()?)?;
        if record.is_folder() {
            return Some(record.id);
        }
        let parent = self.tree.parent_of(record.id)?;
        self.tree
            .record(parent)
            .filter(|p| p.is_folder())
            .map(|p| p.id)
    }

    /// Children of the open folder, in tree order.
    pub fn current_children(&self) -> Vec<&PageRecord> {
        self.current
            .as_ref()
            .and_then(|page| self.tree.node(page.id))
            .map(|node| node.children.iter().map(|c| &c.page).collect())
            .unwrap_or_default()
    }

    /// HTML shown in the page pane: the editor buffer when one is open.
    pub fn current_html(&self) -> Option<&str> {
        let page = self.current.as_ref()?;
        match &self.session {
            Some(session) if session.autosave.page_id() == page.id => {
                Some(session.autosave.content())
            }
            _ => page.content_html.as_deref(),
        }
    }

    // ============ Key handling ============

    /// Handle key events, returns true if app should quit
    pub async fn handle_key(&mut self, key: KeyEvent, tx: mpsc::Sender<AppEvent>) -> Result<bool> {
        // Clear error on any key press
        if self.error_message.is_some() {
            self.clear_error();
            if key.code == KeyCode::Esc {
                return Ok(false);
            }
        }

        // Global quit with Ctrl+C
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.exit_notice = self.flush_pending().await;
            return Ok(true);
        }

        match self.view {
            View::Login => self.handle_login_key(key, &tx).await,
            View::ForgotPassword => {
                self.handle_forgot_key(key).await;
                Ok(false)
            }
            View::ResetPassword => {
                self.handle_reset_key(key).await;
                Ok(false)
            }
            View::VerifyingAuth => Ok(false), // No input during verification
            View::Browse => self.handle_browse_key(key, &tx).await,
        }
    }

    pub fn auth_fields(&self) -> &'static [InputField] {
        match self.auth_mode {
            AuthMode::Login => &[InputField::Email, InputField::Password],
            AuthMode::SignUp => &[
                InputField::Email,
                InputField::Password,
                InputField::Confirm,
                InputField::FullName,
            ],
        }
    }

    fn step_login_field(&mut self, forward: bool, wrap: bool) {
        let fields = self.auth_fields();
        let idx = fields.iter().position(|f| *f == self.login_field).unwrap_or(0);
        let next = match (forward, wrap) {
            (true, true) => (idx + 1) % fields.len(),
            (false, true) => (idx + fields.len() - 1) % fields.len(),
            (true, false) => (idx + 1).min(fields.len() - 1),
            (false, false) => idx.saturating_sub(1),
        };
        self.login_field = fields[next];
    }

    pub fn login_input(&self, field: InputField) -> &str {
        match field {
            InputField::Email => &self.login_email,
            InputField::Password => &self.login_password,
            InputField::Confirm => &self.login_confirm,
            InputField::FullName => &self.login_full_name,
        }
    }

    fn login_input_mut(&mut self, field: InputField) -> &mut String {
        match field {
            InputField::Email => &mut self.login_email,
            InputField::Password => &mut self.login_password,
            InputField::Confirm => &mut self.login_confirm,
            InputField::FullName => &mut self.login_full_name,
        }
    }

    fn switch_auth_mode(&mut self, mode: AuthMode) {
        self.auth_mode = mode;
        self.login_field = InputField::Email;
        self.login_password.clear();
        self.login_confirm.clear();
    }

    async fn handle_login_key(&mut self, key: KeyEvent, tx: &mpsc::Sender<AppEvent>) -> Result<bool> {
        if self.loading {
            return Ok(false);
        }

        let normal = self.vim_mode == VimMode::Normal;
        match key.code {
            KeyCode::Char('q') if normal => return Ok(true),
            KeyCode::Esc => self.vim_mode = VimMode::Normal,
            KeyCode::Char('i') if normal => self.vim_mode = VimMode::Insert,
            KeyCode::Char('s') if normal => self.switch_auth_mode(AuthMode::SignUp),
            KeyCode::Char('l') if normal => self.switch_auth_mode(AuthMode::Login),
            KeyCode::Char('f') if normal => {
                self.forgot_email = self.login_email.clone();
                self.view = View::ForgotPassword;
            }
            KeyCode::Tab => self.step_login_field(true, true),
            KeyCode::BackTab => self.step_login_field(false, true),
            KeyCode::Char('j') | KeyCode::Down if normal => self.step_login_field(true, false),
            KeyCode::Char('k') | KeyCode::Up if normal => self.step_login_field(false, false),
            KeyCode::Enter => match self.auth_mode {
                AuthMode::Login => self.do_login(tx).await,
                AuthMode::SignUp => self.do_signup(tx).await,
            },
            KeyCode::Char(c) if !normal => self.login_input_mut(self.login_field).push(c),
            KeyCode::Backspace if !normal => {
                self.login_input_mut(self.login_field).pop();
            }
            _ => {}
        }

        Ok(false)
    }

    async fn handle_forgot_key(&mut self, key: KeyEvent) {
        if self.loading {
            return;
        }

        match key.code {
            KeyCode::Esc => self.view = View::Login,
            KeyCode::Enter => self.do_request_reset().await,
            KeyCode::Char(c) => self.forgot_email.push(c),
            KeyCode::Backspace => {
                self.forgot_email.pop();
            }
            _ => {}
        }
    }

    async fn handle_reset_key(&mut self, key: KeyEvent) {
        if self.loading {
            return;
        }

        let input = match self.reset_field {
            InputField::Confirm => &mut self.reset_confirm,
            _ => &mut self.reset_password,
        };

        match key.code {
            KeyCode::Esc => {
                self.reset_token = None;
                self.view = View::Login;
            }
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.reset_field = match self.reset_field {
                    InputField::Confirm => InputField::Password,
                    _ => InputField::Confirm,
                };
            }
            KeyCode::Enter => self.do_confirm_reset().await,
            KeyCode::Char(c) => input.push(c),
            KeyCode::Backspace => {
                input.pop();
            }
            _ => {}
        }
    }

    async fn handle_browse_key(&mut self, key: KeyEvent, tx: &mpsc::Sender<AppEvent>) -> Result<bool> {
        if self.loading {
            return Ok(false);
        }

        if self.popup.is_some() {
            self.handle_popup_key(key, tx).await;
            return Ok(false);
        }

        if self.editing {
            self.handle_editor_key(key, tx).await;
            return Ok(false);
        }

        if self.searching {
            self.handle_search_key(key);
            return Ok(false);
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('s') if ctrl => self.manual_save(tx).await,
            KeyCode::Char('q') => {
                self.exit_notice = self.flush_pending().await;
                return Ok(true);
            }
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('h') | KeyCode::Left => self.collapse_selected(),
            KeyCode::Char('l') | KeyCode::Right => self.expand_selected(),
            KeyCode::Enter => self.open_selected(tx).await,
            KeyCode::Char('/') => self.searching = true,
            KeyCode::Esc if !self.search_query.is_empty() => {
                self.search_query.clear();
                self.clamp_selection();
            }
            KeyCode::Char('e') => self.start_editing(),
            KeyCode::Char('n') => self.begin_create(),
            KeyCode::Char('r') => self.begin_rename(),
            KeyCode::Char('d') => self.request_delete(),
            KeyCode::Char('p') => self.toggle_pin().await,
            KeyCode::Char('i') => self.begin_icon(),
            KeyCode::Char('s') => self.toggle_status().await,
            KeyCode::Char('P') => self.begin_password_change(),
            KeyCode::Char('u') => self.begin_profile(),
            KeyCode::Char('t') => self.toggle_theme(),
            KeyCode::Char('a') => self.toggle_autosave(),
            KeyCode::Char('R') => self.reload(tx).await,
            KeyCode::Char('L') => self.do_logout().await,
            KeyCode::Char('?') => self.popup = Some(Popup::Help),
            KeyCode::PageDown => self.page_scroll = self.page_scroll.saturating_add(10),
            KeyCode::PageUp => self.page_scroll = self.page_scroll.saturating_sub(10),
            _ => {}
        }

        Ok(false)
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => self.searching = false,
            KeyCode::Esc => {
                self.searching = false;
                self.search_query.clear();
            }
            KeyCode::Char(c) => {
                self.search_query.push(c);
                self.selected = 0;
            }
            KeyCode::Backspace => {
                self.search_query.pop();
                self.selected = 0;
            }
            _ => {}
        }
        self.clamp_selection();
    }

    async fn handle_editor_key(&mut self, key: KeyEvent, tx: &mpsc::Sender<AppEvent>) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => self.editing = false,
            KeyCode::Char('s') if ctrl => self.manual_save(tx).await,
            KeyCode::Char('e') if ctrl => self.open_external_editor(),
            KeyCode::Char('o') if ctrl => {
                self.popup = Some(Popup::InsertImage {
                    path: String::new(),
                })
            }
            _ => {
                if !self.can_edit() {
                    return;
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.textarea.input(editor::to_input(key)) {
                    let content = editor::textarea_content(&session.textarea);
                    session.autosave.edit(content, Instant::now());
                }
            }
        }
    }

    async fn handle_popup_key(&mut self, key: KeyEvent, tx: &mpsc::Sender<AppEvent>) {
        let Some(popup) = self.popup.as_mut() else {
            return;
        };

        if key.code == KeyCode::Esc {
            self.popup = None;
            return;
        }

        match popup {
            Popup::Help => self.popup = None,
            Popup::NewPage(form) if form.choosing_kind => match key.code {
                KeyCode::Char('j') | KeyCode::Down => {
                    form.kind_idx = (form.kind_idx + 1).min(PageKind::ALL.len() - 1)
                }
                KeyCode::Char('k') | KeyCode::Up => form.kind_idx = form.kind_idx.saturating_sub(1),
                KeyCode::Enter => form.choosing_kind = false,
                _ => {}
            },
            Popup::NewPage(form) => {
                let is_link = form.kind() == PageKind::Link;
                let input = match form.field {
                    NewPageField::Title => &mut form.title,
                    NewPageField::Url => &mut form.url,
                };
                match key.code {
                    KeyCode::Tab | KeyCode::BackTab if is_link => {
                        form.field = match form.field {
                            NewPageField::Title => NewPageField::Url,
                            NewPageField::Url => NewPageField::Title,
                        };
                    }
                    KeyCode::Enter => self.submit_create(tx).await,
                    KeyCode::Char(c) => input.push(c),
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    _ => {}
                }
            }
            Popup::Rename { title: input, .. }
            | Popup::Icon { icon: input, .. }
            | Popup::InsertImage { path: input } => match key.code {
                KeyCode::Enter => self.submit_popup_input().await,
                KeyCode::Char(c) => input.push(c),
                KeyCode::Backspace => {
                    input.pop();
                }
                _ => {}
            },
            Popup::ConfirmDelete { .. } => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => self.confirm_delete().await,
                KeyCode::Char('n') => self.popup = None,
                _ => {}
            },
            Popup::Password(form) => {
                let input = match form.field {
                    InputField::Confirm => &mut form.confirm,
                    _ => &mut form.new_password,
                };
                match key.code {
                    KeyCode::Tab | KeyCode::BackTab => {
                        form.field = match form.field {
                            InputField::Confirm => InputField::Password,
                            _ => InputField::Confirm,
                        };
                    }
                    KeyCode::Enter => self.submit_password_change().await,
                    KeyCode::Char(c) => input.push(c),
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    _ => {}
                }
            }
            Popup::Profile(form) => {
                let input = match form.field {
                    ProfileField::FullName => &mut form.full_name,
                    ProfileField::AvatarPath => &mut form.avatar_path,
                };
                match key.code {
                    KeyCode::Tab | KeyCode::BackTab => {
                        form.field = match form.field {
                            ProfileField::FullName => ProfileField::AvatarPath,
                            ProfileField::AvatarPath => ProfileField::FullName,
                        };
                    }
                    KeyCode::Enter => self.submit_profile().await,
                    KeyCode::Char(c) => input.push(c),
                    KeyCode::Backspace => {
                        input.pop();
                    }
                    _ => {}
                }
            }
        }
    }

    async fn submit_popup_input(&mut self) {
        match self.popup.take() {
            Some(Popup::Rename { page_id, title }) => self.submit_rename(page_id, title).await,
            Some(Popup::Icon { page_id, icon }) => self.submit_icon(page_id, icon).await,
            Some(Popup::InsertImage { path }) => self.submit_image(path).await,
            other => self.popup = other,
        }
    }

    // ============ Auth ============

    async fn do_login(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let email = match validate_email(&self.login_email) {
            Ok(email) => email,
            Err(e) => return self.set_error(e.to_string()),
        };
        if self.login_password.is_empty() {
            return self.set_error("Password is required".to_string());
        }

        self.set_loading(true, "Logging in...");
        let password = self.login_password.clone();

        match self.api.login(&email, &password).await {
            Ok(user) => {
                self.user = Some(user);
                let _ = tx.send(AppEvent::AuthSuccess).await;
            }
            Err(e) => {
                let _ = tx.send(AppEvent::AuthFailed(e.to_string())).await;
            }
        }

        self.set_loading(false, "");
    }

    async fn do_signup(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let email = match validate_email(&self.login_email) {
            Ok(email) => email,
            Err(e) => return self.set_error(e.to_string()),
        };
        if let Err(e) = validate_new_password(&self.login_password, &self.login_confirm) {
            return self.set_error(e.to_string());
        }
        let full_name = match validate_full_name(Some(&self.login_full_name)) {
            Ok(name) => name,
            Err(e) => return self.set_error(e.to_string()),
        };

        self.set_loading(true, "Creating account...");
        let password = self.login_password.clone();
        let confirm = self.login_confirm.clone();

        match self
            .api
            .signup(&email, &password, &confirm, full_name.as_deref())
            .await
        {
            Ok(user) => {
                self.user = Some(user);
                let _ = tx.send(AppEvent::AuthSuccess).await;
            }
            Err(e) => {
                self.set_error(format!("Sign up failed: {}", e));
            }
        }

        self.set_loading(false, "");
    }

    async fn do_request_reset(&mut self) {
        let email = match validate_email(&self.forgot_email) {
            Ok(email) => email,
            Err(e) => return self.set_error(e.to_string()),
        };

        self.set_loading(true, "Requesting reset...");
        match self.api.request_password_reset(&email).await {
            Ok(message) => {
                self.flash_info(message);
                self.login_email = email;
                self.view = View::Login;
            }
            Err(e) => self.set_error(format!("Could not request a reset: {}", e)),
        }
        self.set_loading(false, "");
    }

    async fn do_confirm_reset(&mut self) {
        let Some(token) = self.reset_token.clone() else {
            self.view = View::Login;
            return;
        };
        if let Err(e) = validate_new_password(&self.reset_password, &self.reset_confirm) {
            return self.set_error(e.to_string());
        }

        self.set_loading(true, "Resetting password...");
        let result = self
            .api
            .confirm_password_reset(&token, &self.reset_password, &self.reset_confirm)
            .await;
        self.set_loading(false, "");

        match result {
            Ok(message) => {
                self.reset_token = None;
                self.reset_password.clear();
                self.reset_confirm.clear();
                self.flash_info(message);
                self.view = View::Login;
            }
            Err(e) => self.set_error(format!("Password reset failed: {}", e)),
        }
    }

    pub async fn verify_auth(&mut self, tx: &mpsc::Sender<AppEvent>) {
        self.set_loading(true, "Verifying authentication...");

        match self.api.me().await {
            Ok(user) => {
                self.user = Some(user);
                self.enter_wiki(tx).await;
            }
            Err(ApiError::Network(e)) => {
                // Keep the stored session; the server may just be down.
                self.view = View::Login;
                self.set_error(format!("Could not reach the server: {}", e));
            }
            Err(_) => {
                // Token invalid, go to login
                let _ = self.api.logout().await;
                self.view = View::Login;
            }
        }

        self.set_loading(false, "");
    }

    pub async fn on_auth_success(&mut self, tx: &mpsc::Sender<AppEvent>) {
        self.login_password.clear();
        self.login_confirm.clear();
        self.vim_mode = VimMode::Normal;
        self.enter_wiki(tx).await;
    }

    pub fn on_auth_failed(&mut self, msg: String) {
        self.set_error(format!("Login failed: {}", msg));
        self.login_password.clear();
    }

    async fn enter_wiki(&mut self, tx: &mpsc::Sender<AppEvent>) {
        self.view = View::Browse;
        if !self.load_wiki().await {
            return;
        }
        if let Some(slug) = self.prefs.last_slug.clone() {
            self.open_slug(&slug, tx).await;
        }
    }

    async fn do_logout(&mut self) {
        let unsaved = self.flush_pending().await;
        if let Err(e) = self.api.logout().await {
            tracing::warn!("Logout failed: {}", e);
        }

        self.user = None;
        self.role = Role::default();
        self.set_records(Vec::new());
        self.pins = PinSet::default();
        self.expanded = ExpandedSet::default();
        self.current = None;
        self.missing_slug = None;
        self.search_query.clear();
        self.popup = None;
        self.view = View::Login;
        if let Some(message) = unsaved {
            self.set_error(message);
        }
    }

    // ============ Loading ============

    /// Fetch pages, pins and role. Returns false when pages could not be loaded.
    async fn load_wiki(&mut self) -> bool {
        self.set_loading(true, "Loading pages...");

        let pages = match self.api.list_pages(&PageListParams::default()).await {
            Ok(pages) => pages,
            Err(e) => {
                self.set_error(format!("Failed to load pages: {}", e));
                self.set_loading(false, "");
                return false;
            }
        };

        self.pins = self.api.list_pins().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to load pins: {}", e);
            PinSet::default()
        });

        self.role = self.api.role().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to load role, assuming viewer: {}", e);
            Role::Viewer
        });

        tracing::info!(pages = pages.len(), pins = self.pins.len(), role = self.role.label(), "Wiki loaded");
        self.set_records(pages);
        self.set_loading(false, "");
        true
    }

    async fn reload(&mut self, tx: &mpsc::Sender<AppEvent>) {
        if !self.load_wiki().await {
            return;
        }

        // The open editor owns the newest content; only refetch untouched pages.
        let Some(page_id) = self.current.as_ref().map(|p| p.id) else {
            self.flash_info("Reloaded");
            return;
        };
        if self.session.as_ref().is_some_and(|s| s.autosave.page_id() == page_id) {
            self.flash_info("Reloaded");
            return;
        }

        match self.api.get_page(page_id).await {
            Ok(page) => {
                self.current = Some(page);
                self.flash_info("Reloaded");
            }
            Err(ApiError::NotFound) => {
                self.leave_page(tx).await;
                self.current = None;
                self.flash_error("The open page no longer exists");
            }
            Err(e) => self.flash_error(format!("Failed to reload page: {}", e)),
        }
    }

    // ============ Navigation ============

    async fn open_selected(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let Some(entry) = self.selected_entry() else {
            return;
        };

        let is_open = self.current.as_ref().is_some_and(|p| p.id == entry.page_id);
        if is_open {
            if entry.has_children {
                self.expanded.toggle(entry.page_id);
            }
            return;
        }

        self.open_page(entry.page_id, tx).await;
    }

    pub async fn open_page(&mut self, page_id: Uuid, tx: &mpsc::Sender<AppEvent>) {
        self.leave_page(tx).await;

        self.set_loading(true, "Loading page...");
        let result = self.api.get_page(page_id).await;
        self.set_loading(false, "");

        match result {
            Ok(page) => self.show_page(page),
            Err(ApiError::NotFound) => {
                let slug = self.tree.record(page_id).map(|r| r.slug.clone());
                self.current = None;
                self.missing_slug = slug;
            }
            Err(e) => self.set_error(format!("Failed to load page: {}", e)),
        }
    }

    pub async fn open_slug(&mut self, slug: &str, tx: &mpsc::Sender<AppEvent>) {
        if let Some(page_id) = self.tree.find_by_slug(slug).map(|r| r.id) {
            self.open_page(page_id, tx).await;
            return;
        }

        match self.api.get_page_by_slug(slug).await {
            Ok(page) => {
                self.leave_page(tx).await;
                self.upsert_record(page.clone());
                self.show_page(page);
            }
            Err(ApiError::NotFound) => self.show_missing(slug),
            Err(e) => self.set_error(format!("Failed to load page: {}", e)),
        }
    }

    fn show_missing(&mut self, slug: &str) {
        self.current = None;
        self.missing_slug = Some(slug.to_string());
        if self.prefs.last_slug.as_deref() == Some(slug) {
            self.prefs.last_slug = None;
            self.save_prefs();
        }
    }

    /// Make `page` the open page and reveal it in the sidebar.
    fn show_page(&mut self, page: PageRecord) {
        self.expanded.reveal(&self.tree, PageKey::Id(page.id));
        self.prefs.last_slug = Some(page.slug.clone());
        self.save_prefs();

        let page_id = page.id;
        self.current = Some(page);
        self.missing_slug = None;
        self.page_scroll = 0;
        self.select_page(page_id);
    }

    /// Close the editor for the open page, sending any unsaved edits.
    async fn leave_page(&mut self, tx: &mpsc::Sender<AppEvent>) {
        self.editing = false;
        if let Some(session) = self.session.take() {
            if let Some(request) = self.close_session(session) {
                self.spawn_save(request, tx).await;
            }
        }
    }

    /// Decide what happens to a closing editor's edits. Returns the request
    /// to send now, if any.
    fn close_session(&mut self, mut session: EditSession) -> Option<SaveRequest> {
        match session.autosave.take_pending(self.can_edit()) {
            PendingSave::Nothing => None,
            PendingSave::Send(request) => Some(request),
            PendingSave::Behind => {
                tracing::info!(page = %session.autosave.page_id(), "Holding newest edits until the current save lands");
                self.held.push(session);
                None
            }
            PendingSave::Denied => {
                self.flash_error("Your role no longer allows editing; unsaved changes were not saved");
                None
            }
        }
    }

    /// Requests for held editors whose earlier save has landed. Editors
    /// with nothing left to wait for are dropped.
    fn release_held(&mut self) -> Vec<SaveRequest> {
        let can_edit = self.can_edit();
        let mut requests = Vec::new();
        let mut denied = false;
        self.held.retain_mut(|session| match session.autosave.take_pending(can_edit) {
            PendingSave::Behind => true,
            PendingSave::Send(request) => {
                requests.push(request);
                false
            }
            PendingSave::Nothing => false,
            PendingSave::Denied => {
                denied = true;
                false
            }
        });
        if denied {
            self.flash_error("Your role no longer allows editing; unsaved changes were not saved");
        }
        requests
    }

    /// Blocking flush used before quitting or logging out, when no spawned
    /// save would be allowed to finish. Returns a message naming the pages
    /// whose edits did not make it.
    async fn flush_pending(&mut self) -> Option<String> {
        self.editing = false;
        let can_edit = self.can_edit();
        let mut sessions: Vec<EditSession> = self.held.drain(..).collect();
        sessions.extend(self.session.take());

        let mut unsaved = Vec::new();
        for mut session in sessions {
            let page_id = session.autosave.page_id();
            let mut pending = session.autosave.take_pending(can_edit);

            // The save already out must land first, or it would overwrite
            // the newer content.
            if pending == PendingSave::Behind {
                if let (Some(task), Some(revision)) =
                    (session.save_task.take(), session.autosave.in_flight_revision())
                {
                    let result = task.await.unwrap_or_else(|e| Err(e.to_string()));
                    session.autosave.complete(revision, result.map(|_| ()));
                    pending = session.autosave.take_pending(can_edit);
                }
            }

            let saved = match pending {
                PendingSave::Nothing => true,
                PendingSave::Send(request) => {
                    match self.api.save_content(request.page_id, request.content).await {
                        Ok(_) => true,
                        Err(e) => {
                            tracing::error!(page = %page_id, "Final save failed: {}", e);
                            false
                        }
                    }
                }
                PendingSave::Behind | PendingSave::Denied => false,
            };
            if !saved {
                let title = self
                    .tree
                    .record(page_id)
                    .map(|r| r.title.clone())
                    .unwrap_or_else(|| page_id.to_string());
                unsaved.push(format!("\"{}\"", title));
            }
        }

        if unsaved.is_empty() {
            None
        } else {
            Some(format!(
                "Latest changes to {} were not saved; try again",
                unsaved.join(", ")
            ))
        }
    }

    // ============ Editing & saving ============

    pub fn start_editing(&mut self) {
        let Some(page) = self.current.as_ref() else {
            self.flash_error("Open a page first");
            return;
        };
        if !self.can_edit() {
            self.flash_error("Viewers cannot edit pages");
            return;
        }
        if page.is_folder() || page.kind == PageKind::Link {
            self.flash_error(format!("{} pages have no body to edit", page.kind.meta().label));
            return;
        }

        if self.session.as_ref().map(|s| s.autosave.page_id()) != Some(page.id) {
            let page_id = page.id;
            let content = page.content_html.clone().unwrap_or_default();
            let session = match self.held.iter().position(|s| s.autosave.page_id() == page_id) {
                // Pick up where the closed editor left off.
                Some(idx) => self.held.remove(idx),
                None => EditSession::new(
                    page_id,
                    content,
                    self.autosave_config,
                    self.prefs.autosave_enabled,
                ),
            };
            self.session = Some(session);
        }
        self.editing = true;
    }

    fn open_external_editor(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let content = editor::textarea_content(&session.textarea);
        let result = editor::launch_external_editor(&content);
        self.needs_terminal_clear = true;

        match result {
            Ok(edited) => {
                if let Some(session) = self.session.as_mut() {
                    session.textarea = editor::create_textarea(&edited);
                    session.autosave.edit(edited, Instant::now());
                }
            }
            Err(e) => self.flash_error(format!("External editor failed: {}", e)),
        }
    }

    async fn submit_image(&mut self, path: String) {
        let Some(page_id) = self.session.as_ref().map(|s| s.autosave.page_id()) else {
            return;
        };
        let path = expand_home(path.trim().trim_matches(|c| c == '"' || c == '\''));
        let folder = match validate_storage_folder(&format!("pages/{}", page_id)) {
            Ok(folder) => folder,
            Err(e) => return self.flash_error(e.to_string()),
        };

        self.set_loading(true, "Uploading image...");
        let result = self.api.upload_image(&folder, &path).await;
        self.set_loading(false, "");

        match result {
            Ok(upload) => {
                let alt = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("image")
                    .to_string();
                if let Some(session) = self.session.as_mut() {
                    session.textarea.insert_str(editor::image_tag(&upload.url, &alt));
                    let content = editor::textarea_content(&session.textarea);
                    session.autosave.edit(content, Instant::now());
                }
                self.flash_info("Image inserted");
            }
            Err(e) => self.flash_error(format!("Upload failed: {}", e)),
        }
    }

    async fn manual_save(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let can_edit = self.can_edit();
        let Some(session) = self.session.as_mut() else {
            self.flash_info("Nothing to save");
            return;
        };

        match session.autosave.save_now(can_edit) {
            ManualSave::Denied => self.flash_error("You do not have permission to edit pages"),
            ManualSave::NothingToSave => self.flash_info("All changes saved"),
            ManualSave::Coalesced => self.flash_info("Saving..."),
            ManualSave::Queued => self.flash_info("Save queued"),
            ManualSave::Issued(request) => {
                self.flash_info("Saving...");
                let task = self.spawn_save(request, tx).await;
                if let Some(session) = self.session.as_mut() {
                    session.save_task = Some(task);
                }
            }
        }
    }

    async fn spawn_save(
        &mut self,
        request: SaveRequest,
        tx: &mpsc::Sender<AppEvent>,
    ) -> JoinHandle<Result<PageRecord, String>> {
        // Refresh on the shared client first so the clone never rotates the
        // refresh token behind its back.
        self.api.ensure_valid_token().await;

        let mut api = self.api.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = api
                .save_content(request.page_id, request.content)
                .await
                .map_err(|e| e.to_string());
            let event = AppEvent::SaveFinished {
                page_id: request.page_id,
                revision: request.revision,
                trigger: request.trigger,
                result: result.clone(),
            };
            // A full channel must not hold up whoever awaits this task.
            tokio::spawn(async move {
                let _ = tx.send(event).await;
            });
            result
        })
    }

    pub async fn on_tick(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let now = Instant::now();
        if self.flash.as_ref().is_some_and(|f| now >= f.expires_at) {
            self.flash = None;
        }

        let can_edit = self.can_edit();
        let request = self
            .session
            .as_mut()
            .and_then(|s| s.autosave.poll(now, can_edit));
        if let Some(request) = request {
            let task = self.spawn_save(request, tx).await;
            if let Some(session) = self.session.as_mut() {
                session.save_task = Some(task);
            }
        }

        for request in self.release_held() {
            self.spawn_save(request, tx).await;
        }
    }

    pub fn on_save_finished(
        &mut self,
        page_id: Uuid,
        revision: u64,
        trigger: SaveTrigger,
        result: Result<PageRecord, String>,
    ) {
        if let Ok(saved) = &result {
            self.store_saved(saved);
        }

        let session = self
            .session
            .as_mut()
            .filter(|s| s.autosave.page_id() == page_id);

        match session {
            Some(session) => {
                if let Some(outcome) = session.autosave.complete(revision, result.map(|_| ())) {
                    self.report_save(outcome);
                }
            }
            None => {
                if let Some(held) = self.held.iter_mut().find(|s| s.autosave.page_id() == page_id) {
                    // Newer edits follow on the next tick whatever the outcome.
                    if let Some(SaveOutcome { error: Some(e), .. }) =
                        held.autosave.complete(revision, result.map(|_| ()))
                    {
                        tracing::warn!(page = %page_id, "Earlier save failed: {}", e);
                    }
                    return;
                }
                self.report_closed_save(trigger, result);
            }
        }
    }

    /// The editor for this page is gone; only failures are worth a word.
    fn report_closed_save(&mut self, trigger: SaveTrigger, result: Result<PageRecord, String>) {
        match result {
            Err(e) => self.flash_error(format!("Changes could not be saved: {}", e)),
            Ok(_) if trigger == SaveTrigger::Manual => self.flash_info("Saved"),
            Ok(_) => {}
        }
    }

    /// Fold a saved record back into local state without touching content
    /// the editor may already have moved past.
    fn store_saved(&mut self, saved: &PageRecord) {
        if let Some(record) = self.records.iter_mut().find(|r| r.id == saved.id) {
            record.updated_at = saved.updated_at;
            record.updated_by = saved.updated_by;
        }
        if let Some(current) = self.current.as_mut().filter(|c| c.id == saved.id) {
            current.content_html = saved.content_html.clone();
            current.updated_at = saved.updated_at;
            current.updated_by = saved.updated_by;
        }
    }

    fn report_save(&mut self, outcome: SaveOutcome) {
        tracing::debug!(revision = outcome.revision, trigger = ?outcome.trigger, ok = outcome.error.is_none(), "Save finished");

        match outcome.error {
            Some(e) if outcome.trigger.is_automatic() => {
                self.flash_error(format!("Autosave failed: {}", e))
            }
            Some(e) => self.flash_error(format!("Save failed: {}", e)),
            None if outcome.announce => self.flash_info("Saved"),
            None => {}
        }
    }

    // ============ Page actions ============

    fn require_editor(&mut self) -> bool {
        if !self.can_edit() {
            self.flash_error("Only editors can change pages");
        }
        self.can_edit()
    }

    fn begin_create(&mut self) {
        if !self.require_editor() {
            return;
        }
        self.popup = Some(Popup::NewPage(NewPageForm {
            parent_id: self.creation_parent(),
            kind_idx: 0,
            choosing_kind: true,
            title: String::new(),
            url: String::new(),
            field: NewPageField::Title,
        }));
    }

    async fn submit_create(&mut self, tx: &mpsc::Sender<AppEvent>) {
        let Some(Popup::NewPage(form)) = self.popup.take() else {
            return;
        };
        let kind = form.kind();

        let title = match validate_title(&form.title) {
            Ok(title) => title,
            Err(e) => {
                self.flash_error(e.to_string());
                self.popup = Some(Popup::NewPage(form));
                return;
            }
        };
        let external_url = if kind == PageKind::Link {
            match validate_external_url(&form.url) {
                Ok(url) => Some(url),
                Err(e) => {
                    self.flash_error(e.to_string());
                    self.popup = Some(Popup::NewPage(form));
                    return;
                }
            }
        } else {
            None
        };

        let slug = unique_slug(
            &title,
            |s| self.tree.find_by_slug(s).is_some(),
            &mut rand::thread_rng(),
        );
        let req = CreatePageRequest {
            title,
            kind,
            slug: Some(slug),
            parent_id: form.parent_id,
            status: None,
            external_url,
        };

        match self.api.create_page(&req).await {
            Ok(page) => {
                tracing::info!(page = %page.id, kind = %page.kind, "Page created");
                self.flash_info(format!("Created \"{}\"", page.title));
                self.leave_page(tx).await;
                self.upsert_record(page.clone());
                self.show_page(page);
            }
            Err(e) => {
                self.flash_error(format!("Could not create page: {}", e));
                self.popup = Some(Popup::NewPage(form));
            }
        }
    }

    fn begin_rename(&mut self) {
        if !self.require_editor() {
            return;
        }
        if let Some(record) = self.selected_page_id().and_then(|id| self.tree.record(id)) {
            self.popup = Some(Popup::Rename {
                page_id: record.id,
                title: record.title.clone(),
            });
        }
    }

    async fn submit_rename(&mut self, page_id: Uuid, title: String) {
        let title = match validate_title(&title) {
            Ok(title) => title,
            Err(e) => {
                self.flash_error(e.to_string());
                self.popup = Some(Popup::Rename { page_id, title });
                return;
            }
        };

        let req = UpdatePageRequest {
            title: Some(title.clone()),
            ..Default::default()
        };
        match self
            .update_optimistic(page_id, &req, |r| r.title = title.clone())
            .await
        {
            Ok(_) => self.flash_info("Renamed"),
            Err(e) => self.flash_error(format!("Rename failed: {}", e)),
        }
    }

    fn begin_icon(&mut self) {
        if !self.require_editor() {
            return;
        }
        if let Some(record) = self.selected_page_id().and_then(|id| self.tree.record(id)) {
            self.popup = Some(Popup::Icon {
                page_id: record.id,
                icon: record.icon.clone().unwrap_or_default(),
            });
        }
    }

    async fn submit_icon(&mut self, page_id: Uuid, icon: String) {
        let icon = icon.trim().to_string();
        let req = UpdatePageRequest {
            icon: Some(icon.clone()),
            ..Default::default()
        };
        let local = Some(icon).filter(|i| !i.is_empty());
        match self
            .update_optimistic(page_id, &req, |r| r.icon = local.clone())
            .await
        {
            Ok(_) => self.flash_info("Icon updated"),
            Err(e) => self.flash_error(format!("Could not set icon: {}", e)),
        }
    }

    async fn toggle_status(&mut self) {
        if !self.require_editor() {
            return;
        }
        let Some(record) = self.selected_page_id().and_then(|id| self.tree.record(id)) else {
            return;
        };
        let (page_id, status) = (record.id, record.status.toggled());

        let req = UpdatePageRequest {
            status: Some(status),
            ..Default::default()
        };
        match self.update_optimistic(page_id, &req, |r| r.status = status).await {
            Ok(_) => self.flash_info(format!("Marked as {}", status.label())),
            Err(e) => self.flash_error(format!("Could not change status: {}", e)),
        }
    }

    /// Apply `apply` locally, send `req`, and fall back to the last known
    /// good record when the server refuses.
    pub async fn update_optimistic(
        &mut self,
        page_id: Uuid,
        req: &UpdatePageRequest,
        apply: impl Fn(&mut PageRecord),
    ) -> Result<PageRecord, ApiError> {
        let previous = self.apply_local(page_id, &apply).ok_or(ApiError::NotFound)?;

        match self.api.update_page(page_id, req).await {
            Ok(saved) => {
                let mut listed = saved.clone();
                listed.content_html = None;
                self.upsert_record(listed);
                if let Some(current) = self.current.as_mut().filter(|c| c.id == page_id) {
                    copy_metadata(current, &saved);
                }
                Ok(saved)
            }
            Err(e) => {
                tracing::warn!(page = %page_id, "Update rejected, rolling back: {}", e);
                self.rollback(previous);
                Err(e)
            }
        }
    }

    /// Returns the record as it was before `apply`.
    fn apply_local(&mut self, page_id: Uuid, apply: &impl Fn(&mut PageRecord)) -> Option<PageRecord> {
        let previous = self.records.iter().find(|r| r.id == page_id)?.clone();
        let mut updated = previous.clone();
        apply(&mut updated);
        self.upsert_record(updated);
        if let Some(current) = self.current.as_mut().filter(|c| c.id == page_id) {
            apply(current);
        }
        Some(previous)
    }

    fn rollback(&mut self, previous: PageRecord) {
        if let Some(current) = self.current.as_mut().filter(|c| c.id == previous.id) {
            copy_metadata(current, &previous);
        }
        self.upsert_record(previous);
    }

    async fn toggle_pin(&mut self) {
        let Some(record) = self.selected_page_id().and_then(|id| self.tree.record(id)) else {
            return;
        };
        if record.is_folder() {
            self.flash_error("Folders cannot be pinned");
            return;
        }

        let page_id = record.id;
        let was_pinned = self.pins.contains(page_id);
        if was_pinned {
            self.pins.remove(page_id);
        } else {
            self.pins.insert(page_id);
        }
        self.select_page(page_id);

        let result = if was_pinned {
            self.api.unpin(page_id).await
        } else {
            self.api.pin(page_id).await
        };

        match result {
            Ok(()) => self.flash_info(if was_pinned { "Unpinned" } else { "Pinned" }),
            Err(e) => {
                if was_pinned {
                    self.pins.insert(page_id);
                } else {
                    self.pins.remove(page_id);
                }
                self.select_page(page_id);
                self.flash_error(format!("Could not update pins: {}", e));
            }
        }
    }

    /// Refuse early when the page still has children, otherwise ask for confirmation.
    pub fn request_delete(&mut self) {
        if !self.require_editor() {
            return;
        }
        let Some(page_id) = self.selected_page_id() else {
            return;
        };
        if let Err(e) = self.tree.check_deletable(page_id) {
            self.flash_error(e.to_string());
            return;
        }
        if let Some(record) = self.tree.record(page_id) {
            self.popup = Some(Popup::ConfirmDelete {
                page_id,
                title: record.title.clone(),
            });
        }
    }

    async fn confirm_delete(&mut self) {
        let Some(Popup::ConfirmDelete { page_id, title }) = self.popup.take() else {
            return;
        };

        match self.api.delete_page(page_id).await {
            Ok(()) => {
                tracing::info!(page = %page_id, "Page deleted");
                if self.current.as_ref().is_some_and(|p| p.id == page_id) {
                    // Nothing left to save into.
                    self.session = None;
                    self.editing = false;
                    self.current = None;
                }
                self.remove_record(page_id);
                self.flash_info(format!("Deleted \"{}\"", title));
            }
            Err(e) => self.flash_error(format!("Could not delete page: {}", e)),
        }
    }

    fn begin_password_change(&mut self) {
        self.popup = Some(Popup::Password(PasswordForm {
            new_password: String::new(),
            confirm: String::new(),
            field: InputField::Password,
        }));
    }

    async fn submit_password_change(&mut self) {
        let Some(Popup::Password(form)) = self.popup.take() else {
            return;
        };
        if let Err(e) = validate_new_password(&form.new_password, &form.confirm) {
            self.flash_error(e.to_string());
            self.popup = Some(Popup::Password(form));
            return;
        }

        match self.api.update_password(&form.new_password, &form.confirm).await {
            Ok(message) => self.flash_info(message),
            Err(e) => {
                self.flash_error(format!("Could not change password: {}", e));
                self.popup = Some(Popup::Password(form));
            }
        }
    }

    fn begin_profile(&mut self) {
        let Some(user) = self.user.as_ref() else {
            return;
        };
        self.popup = Some(Popup::Profile(ProfileForm {
            full_name: user.full_name.clone().unwrap_or_default(),
            avatar_path: String::new(),
            field: ProfileField::FullName,
        }));
    }

    /// Validate the focused field of the profile popup. Errors keep the
    /// popup open.
    fn profile_change(&mut self) -> Option<ProfileChange> {
        let (Some(Popup::Profile(form)), Some(user)) = (self.popup.as_ref(), self.user.as_ref())
        else {
            return None;
        };

        let change = match form.field {
            ProfileField::FullName => validate_full_name(Some(&form.full_name))
                .map(ProfileChange::Name)
                .map_err(|e| e.to_string()),
            ProfileField::AvatarPath => {
                let raw = form.avatar_path.trim().trim_matches(|c| c == '"' || c == '\'');
                if raw.is_empty() {
                    Err("Enter the path of an image file".to_string())
                } else {
                    validate_storage_folder(&format!("avatars/{}", user.id))
                        .map(|folder| ProfileChange::Avatar {
                            folder,
                            path: expand_home(raw),
                        })
                        .map_err(|e| e.to_string())
                }
            }
        };

        match change {
            Ok(change) => Some(change),
            Err(e) => {
                self.flash_error(e);
                None
            }
        }
    }

    async fn submit_profile(&mut self) {
        let Some(change) = self.profile_change() else {
            return;
        };

        match change {
            ProfileChange::Name(full_name) => match self.api.update_profile(full_name).await {
                Ok(user) => {
                    self.flash_info(format!("Name saved as {}", user.display_name()));
                    self.user = Some(user);
                    self.popup = None;
                }
                Err(e) => self.flash_error(format!("Could not save name: {}", e)),
            },
            ProfileChange::Avatar { folder, path } => {
                self.set_loading(true, "Uploading avatar...");
                let result = self.api.upload_image(&folder, &path).await;
                self.set_loading(false, "");

                match result {
                    Ok(upload) => {
                        if let Some(user) = self.user.as_mut() {
                            user.avatar_url = Some(upload.url);
                        }
                        self.flash_info("Avatar updated");
                        self.popup = None;
                    }
                    Err(e) => self.flash_error(format!("Avatar upload failed: {}", e)),
                }
            }
        }
    }

    fn toggle_theme(&mut self) {
        self.prefs.theme = self.prefs.theme.toggled();
        self.save_prefs();
        self.flash_info(format!("Theme: {}", self.prefs.theme.label()));
    }

    fn toggle_autosave(&mut self) {
        self.prefs.autosave_enabled = !self.prefs.autosave_enabled;
        if let Some(session) = self.session.as_mut() {
            session.autosave.set_enabled(self.prefs.autosave_enabled);
        }
        self.save_prefs();
        self.flash_info(if self.prefs.autosave_enabled {
            "Autosave on"
        } else {
            "Autosave off"
        });
    }
}

fn tree_entries(rows: &[deus_shared::tree::TreeRow<'_>]) -> Vec<SidebarEntry> {
    rows.iter()
        .map(|row| SidebarEntry {
            page_id: row.node.page.id,
            depth: row.depth,
            section: SidebarSection::Tree,
            has_children: row.has_children(),
            expanded: row.expanded,
        })
        .collect()
}

/// Copy the fields page actions touch, leaving the body alone.
fn copy_metadata(target: &mut PageRecord, from: &PageRecord) {
    target.title = from.title.clone();
    target.icon = from.icon.clone();
    target.status = from.status;
    target.external_url = from.external_url.clone();
    target.updated_at = from.updated_at;
    target.updated_by = from.updated_by;
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deus_shared::PageStatus;

    fn page(title: &str, kind: PageKind, parent: Option<Uuid>) -> PageRecord {
        PageRecord {
            id: Uuid::new_v4(),
            parent_id: parent,
            title: title.to_string(),
            slug: deus_shared::slug::slugify(title),
            kind,
            icon: None,
            status: PageStatus::Published,
            content_html: Some(format!("<p>{}</p>", title)),
            external_url: None,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Wiki {
        app: App,
        handbook: PageRecord,
        leave: PageRecord,
        roadmap: PageRecord,
    }

    fn wiki(role: Role) -> Wiki {
        let handbook = page("Handbook", PageKind::Folder, None);
        let leave = page("Leave policy", PageKind::Sop, Some(handbook.id));
        let roadmap = page("Roadmap", PageKind::Doc, None);

        let mut app = App::new(
            ApiClient::new("http://127.0.0.1:9"),
            false,
            UserPreferences::default(),
            AutosaveConfig::default(),
            None,
        );
        app.persist_prefs = false;
        app.view = View::Browse;
        app.role = role;
        app.set_records(vec![roadmap.clone(), leave.clone(), handbook.clone()]);

        Wiki {
            app,
            handbook,
            leave,
            roadmap,
        }
    }

    fn ids(entries: &[SidebarEntry]) -> Vec<Uuid> {
        entries.iter().map(|e| e.page_id).collect()
    }

    #[test]
    fn starting_view_follows_tokens_and_reset_link() {
        let fresh = App::new(
            ApiClient::new("http://127.0.0.1:9"),
            false,
            UserPreferences::default(),
            AutosaveConfig::default(),
            None,
        );
        assert_eq!(fresh.view, View::Login);

        let returning = App::new(
            ApiClient::new("http://127.0.0.1:9"),
            true,
            UserPreferences::default(),
            AutosaveConfig::default(),
            None,
        );
        assert_eq!(returning.view, View::VerifyingAuth);

        let resetting = App::new(
            ApiClient::new("http://127.0.0.1:9"),
            true,
            UserPreferences::default(),
            AutosaveConfig::default(),
            Some("token".to_string()),
        );
        assert_eq!(resetting.view, View::ResetPassword);
    }

    #[test]
    fn sidebar_lists_pins_then_collapsed_tree() {
        let mut w = wiki(Role::Editor);
        w.app.pins = [w.leave.id, w.handbook.id].into_iter().collect();

        let entries = w.app.sidebar_entries();
        // Folders are never listed as pins.
        assert_eq!(entries[0].section, SidebarSection::Pinned);
        assert_eq!(entries[0].page_id, w.leave.id);
        assert_eq!(&ids(&entries)[1..], &[w.handbook.id, w.roadmap.id]);

        w.app.expanded.set(w.handbook.id, true);
        assert_eq!(
            &ids(&w.app.sidebar_entries())[1..],
            &[w.handbook.id, w.leave.id, w.roadmap.id]
        );
    }

    #[test]
    fn search_forces_matching_branches_open() {
        let mut w = wiki(Role::Viewer);
        w.app.search_query = "leave".to_string();

        let entries = w.app.sidebar_entries();
        assert_eq!(ids(&entries), vec![w.handbook.id, w.leave.id]);
        assert!(entries[0].expanded);
        assert_eq!(entries[1].depth, 1);
    }

    #[test]
    fn delete_is_refused_while_children_exist() {
        let mut w = wiki(Role::Editor);
        w.app.selected = 0; // Handbook

        w.app.request_delete();
        assert!(w.app.popup.is_none());
        let flash = w.app.flash.as_ref().map(|f| (f.level, f.text.clone()));
        assert_eq!(
            flash,
            Some((
                FlashLevel::Error,
                "\"Handbook\" still has 1 page(s) inside; move or delete them first".to_string()
            ))
        );

        w.app.selected = 1; // Roadmap
        w.app.request_delete();
        assert!(matches!(
            w.app.popup,
            Some(Popup::ConfirmDelete { page_id, .. }) if page_id == w.roadmap.id
        ));
    }

    #[test]
    fn viewers_cannot_start_editing() {
        let mut w = wiki(Role::Viewer);
        w.app.current = Some(w.roadmap.clone());

        w.app.start_editing();
        assert!(!w.app.editing);
        assert!(w.app.session.is_none());
        assert_eq!(w.app.flash.as_ref().map(|f| f.level), Some(FlashLevel::Error));

        w.app.request_delete();
        assert!(w.app.popup.is_none());
    }

    #[test]
    fn editors_get_a_session_seeded_with_the_page() {
        let mut w = wiki(Role::Editor);
        w.app.current = Some(w.roadmap.clone());

        w.app.start_editing();
        assert!(w.app.editing);
        assert_eq!(w.app.save_state(), Some(SaveState::Clean));
        assert_eq!(w.app.current_html(), Some("<p>Roadmap</p>"));

        w.app.current = Some(w.handbook.clone());
        w.app.session = None;
        w.app.editing = false;
        w.app.start_editing();
        assert!(!w.app.editing);
    }

    #[test]
    fn new_pages_go_into_the_nearest_folder() {
        let mut w = wiki(Role::Editor);
        w.app.expanded.set(w.handbook.id, true);

        w.app.selected = 0; // Handbook
        assert_eq!(w.app.creation_parent(), Some(w.handbook.id));

        w.app.selected = 1; // Leave policy, inside Handbook
        assert_eq!(w.app.creation_parent(), Some(w.handbook.id));

        w.app.selected = 2; // Roadmap at root
        assert_eq!(w.app.creation_parent(), None);
    }

    #[test]
    fn folders_list_their_children() {
        let mut w = wiki(Role::Viewer);
        w.app.current = Some(w.handbook.clone());
        let children: Vec<Uuid> = w.app.current_children().iter().map(|p| p.id).collect();
        assert_eq!(children, vec![w.leave.id]);
    }

    #[test]
    fn rollback_restores_last_known_good_metadata() {
        let mut w = wiki(Role::Editor);
        w.app.current = Some(w.roadmap.clone());

        let previous = w
            .app
            .apply_local(w.roadmap.id, &|r: &mut PageRecord| r.title = "Plans".to_string())
            .expect("roadmap is loaded");
        assert_eq!(w.app.tree.record(w.roadmap.id).map(|r| r.title.as_str()), Some("Plans"));
        assert_eq!(w.app.current.as_ref().map(|p| p.title.as_str()), Some("Plans"));

        w.app.rollback(previous);
        assert_eq!(w.app.tree.record(w.roadmap.id).map(|r| r.title.as_str()), Some("Roadmap"));
        let current = w.app.current.as_ref().expect("still open");
        assert_eq!(current.title, "Roadmap");
        assert_eq!(current.content_html.as_deref(), Some("<p>Roadmap</p>"));
    }

    #[test]
    fn failed_save_for_a_closed_editor_is_reported() {
        let mut w = wiki(Role::Editor);
        w.app.on_save_finished(
            w.roadmap.id,
            1,
            SaveTrigger::Navigation,
            Err("Server error: 500".to_string()),
        );
        let flash = w.app.flash.as_ref().expect("error is shown");
        assert_eq!(flash.level, FlashLevel::Error);
        assert!(flash.text.contains("Server error: 500"));
    }

    #[test]
    fn silent_autosave_success_updates_the_open_page() {
        let mut w = wiki(Role::Editor);
        w.app.current = Some(w.roadmap.clone());
        w.app.start_editing();
        w.app.flash = None;

        let session = w.app.session.as_mut().expect("editing");
        session.autosave.edit("<p>v2</p>".to_string(), Instant::now());
        let request = session
            .autosave
            .poll(Instant::now() + Duration::from_secs(5), true)
            .expect("debounce fired");

        let mut saved = w.roadmap.clone();
        saved.content_html = Some("<p>v2</p>".to_string());
        w.app
            .on_save_finished(w.roadmap.id, request.revision, request.trigger, Ok(saved));

        assert_eq!(w.app.save_state(), Some(SaveState::Clean));
        assert!(w.app.flash.is_none());
        assert_eq!(
            w.app.current.as_ref().and_then(|p| p.content_html.as_deref()),
            Some("<p>v2</p>")
        );
    }

    #[test]
    fn sign_up_walks_every_field() {
        let mut w = wiki(Role::Viewer);
        w.app.auth_mode = AuthMode::SignUp;
        w.app.login_field = InputField::Email;

        let mut seen = vec![w.app.login_field];
        for _ in 0..3 {
            w.app.step_login_field(true, true);
            seen.push(w.app.login_field);
        }
        assert_eq!(
            seen,
            vec![
                InputField::Email,
                InputField::Password,
                InputField::Confirm,
                InputField::FullName
            ]
        );
        w.app.step_login_field(true, true);
        assert_eq!(w.app.login_field, InputField::Email);
    }

    /// Editor on Roadmap with "<p>a</p>" in flight and "<p>ab</p>" typed
    /// after it. Returns the in-flight request.
    fn editing_behind_a_save(w: &mut Wiki) -> SaveRequest {
        w.app.current = Some(w.roadmap.clone());
        w.app.start_editing();
        w.app.flash = None;

        let t0 = Instant::now();
        let session = w.app.session.as_mut().expect("editing");
        session.autosave.edit("<p>a</p>".to_string(), t0);
        let first = session
            .autosave
            .poll(t0 + Duration::from_secs(3), true)
            .expect("debounce fired");
        session
            .autosave
            .edit("<p>ab</p>".to_string(), t0 + Duration::from_secs(4));
        first
    }

    #[test]
    fn leaving_mid_save_sends_newest_edits_once_it_lands() {
        let mut w = wiki(Role::Editor);
        let first = editing_behind_a_save(&mut w);

        let session = w.app.session.take().expect("editing");
        assert_eq!(w.app.close_session(session), None);
        assert!(w.app.release_held().is_empty());

        let mut saved = w.roadmap.clone();
        saved.content_html = Some("<p>a</p>".to_string());
        w.app
            .on_save_finished(w.roadmap.id, first.revision, first.trigger, Ok(saved));
        assert!(w.app.flash.is_none());

        let requests = w.app.release_held();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].content, "<p>ab</p>");
        assert_eq!(requests[0].trigger, SaveTrigger::Navigation);
        assert!(w.app.release_held().is_empty());
    }

    #[test]
    fn reopening_a_held_page_resumes_its_editor() {
        let mut w = wiki(Role::Editor);
        editing_behind_a_save(&mut w);

        let session = w.app.session.take().expect("editing");
        w.app.close_session(session);
        w.app.start_editing();

        let session = w.app.session.as_ref().expect("resumed");
        assert_eq!(session.autosave.content(), "<p>ab</p>");
        assert_eq!(w.app.save_state(), Some(SaveState::Saving));
        assert!(w.app.release_held().is_empty());
    }

    #[test]
    fn edits_that_can_no_longer_be_saved_are_reported() {
        let mut w = wiki(Role::Editor);
        w.app.current = Some(w.roadmap.clone());
        w.app.start_editing();
        let session = w.app.session.as_mut().expect("editing");
        session.autosave.edit("<p>draft</p>".to_string(), Instant::now());

        w.app.role = Role::Viewer;
        w.app.flash = None;
        let session = w.app.session.take().expect("editing");
        assert_eq!(w.app.close_session(session), None);
        assert_eq!(w.app.flash.as_ref().map(|f| f.level), Some(FlashLevel::Error));
    }

    fn ayu() -> User {
        User {
            id: Uuid::new_v4(),
            email: "ayu@example.com".to_string(),
            full_name: Some("Ayu".to_string()),
            avatar_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn profile_form(app: &mut App) -> &mut ProfileForm {
        match app.popup.as_mut() {
            Some(Popup::Profile(form)) => form,
            other => panic!("expected the profile popup, got {:?}", other),
        }
    }

    #[test]
    fn profile_popup_starts_from_the_current_name() {
        let mut w = wiki(Role::Viewer);
        w.app.begin_profile();
        assert!(w.app.popup.is_none(), "no popup before sign-in");

        w.app.user = Some(ayu());
        w.app.begin_profile();
        let form = profile_form(&mut w.app);
        assert_eq!(form.full_name, "Ayu");
        assert_eq!(form.field, ProfileField::FullName);
    }

    #[test]
    fn profile_changes_are_validated_before_any_request() {
        let mut w = wiki(Role::Viewer);
        let me = ayu();
        w.app.user = Some(me.clone());
        w.app.begin_profile();

        profile_form(&mut w.app).full_name = "n".repeat(101);
        assert_eq!(w.app.profile_change(), None);
        assert_eq!(w.app.flash.as_ref().map(|f| f.level), Some(FlashLevel::Error));
        assert!(matches!(w.app.popup, Some(Popup::Profile(_))));

        profile_form(&mut w.app).full_name = "  Ayu Lestari ".to_string();
        assert_eq!(
            w.app.profile_change(),
            Some(ProfileChange::Name(Some("Ayu Lestari".to_string())))
        );

        profile_form(&mut w.app).full_name = "   ".to_string();
        assert_eq!(w.app.profile_change(), Some(ProfileChange::Name(None)));

        let form = profile_form(&mut w.app);
        form.field = ProfileField::AvatarPath;
        assert_eq!(w.app.profile_change(), None);

        profile_form(&mut w.app).avatar_path = "'/tmp/me.png'".to_string();
        assert_eq!(
            w.app.profile_change(),
            Some(ProfileChange::Avatar {
                folder: format!("avatars/{}", me.id),
                path: PathBuf::from("/tmp/me.png"),
            })
        );
    }
}
