use anyhow::anyhow;
use eframe::egui;
use egui::{Color32, CornerRadius, Margin, RichText, ScrollArea, Stroke, Ui, ViewportBuilder};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

mod activity;
mod board_client;
mod cache;
mod clock;
mod config;
mod controller;
mod history;
mod models;
mod receipts;
mod requests;
mod service;
mod storage;
#[cfg(test)]
mod testing;
mod view;

use crate::board_client::BoardClient;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::controller::{Action, LoadState, Panel, Ports, Settings, ViewController};
use crate::history::MemoryHistory;
use crate::models::{Community, Item, NewComment, NewItem, SessionState};
use crate::storage::{MemoryStorage, SqliteStorage};
use crate::view::{FeedTab, ViewState};

fn init_tracing() -> anyhow::Result<()> {
    tracing::subscriber::set_global_default(
        Registry::default()
            .with(fmt::Layer::default().compact().with_writer(io::stderr))
            .with(
                EnvFilter::builder()
                    .with_default_directive("campus_board=info".parse()?)
                    .from_env()?,
            ),
    )?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let config = Config::load()?;
    info!(api = %config.api_base_url, data_dir = %config.data_dir.display(), "starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let ports = Ports {
        service: Arc::new(BoardClient::new(&config)?),
        navigation: MemoryHistory::new(&config.start_url),
        durable: Box::new(SqliteStorage::open(&config.database_path())?),
        session: Box::new(MemoryStorage::new()),
        clock: Arc::new(SystemClock),
    };
    let settings = Settings {
        directory_ttl: config.directory_ttl(),
        board_ttl: config.board_ttl(),
    };
    let mut controller = ViewController::new(ports, settings, runtime.handle().clone());
    controller.mount();

    let options = eframe::NativeOptions {
        viewport: ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("Campus Board"),
        ..Default::default()
    };

    eframe::run_native(
        "Campus Board",
        options,
        Box::new(move |cc| {
            let mut app = CampusBoardApp::new(runtime, controller);
            if let Some(storage) = cc.storage {
                if let Some(is_dark_mode) = storage
                    .get_string("is_dark_mode")
                    .and_then(|value| value.parse::<bool>().ok())
                {
                    app.shell.set_dark_mode(is_dark_mode);
                }
            }
            Ok(Box::new(app))
        }),
    )
    .map_err(|e| anyhow!("Failed to run the window: {e}"))
}

struct AppTheme {
    background: Color32,
    card_background: Color32,
    text: Color32,
    secondary_text: Color32,
    highlight: Color32,
    accent: Color32,
    separator: Color32,
    error: Color32,
    button_background: Color32,
    button_foreground: Color32,
    button_hover_background: Color32,
}

impl AppTheme {
    fn dark() -> Self {
        Self {
            background: Color32::from_rgb(18, 18, 18),
            card_background: Color32::from_rgb(30, 30, 30),
            text: Color32::from_rgb(240, 240, 240),
            secondary_text: Color32::from_rgb(180, 180, 180),
            highlight: Color32::from_rgb(64, 156, 255),
            accent: Color32::from_rgb(255, 140, 40),
            separator: Color32::from_rgb(60, 60, 60),
            error: Color32::from_rgb(239, 83, 80),
            button_background: Color32::from_rgb(66, 66, 66),
            button_foreground: Color32::from_rgb(240, 240, 240),
            button_hover_background: Color32::from_rgb(80, 80, 80),
        }
    }

    fn light() -> Self {
        Self {
            background: Color32::from_rgb(245, 245, 245),
            card_background: Color32::from_rgb(255, 255, 255),
            text: Color32::from_rgb(20, 20, 20),
            secondary_text: Color32::from_rgb(90, 90, 90),
            highlight: Color32::from_rgb(20, 100, 200),
            accent: Color32::from_rgb(220, 110, 20),
            separator: Color32::from_rgb(200, 200, 200),
            error: Color32::from_rgb(198, 40, 40),
            button_background: Color32::from_rgb(235, 235, 235),
            button_foreground: Color32::from_rgb(20, 20, 20),
            button_hover_background: Color32::from_rgb(210, 210, 210),
        }
    }

    fn apply_to_ctx(&self, ctx: &egui::Context) {
        let mut style = (*ctx.style()).clone();

        style.visuals.panel_fill = self.background;
        style.visuals.window_fill = self.card_background;
        style.visuals.window_stroke = Stroke::new(1.0, self.separator);
        style.visuals.widgets.noninteractive.bg_fill = self.card_background;
        style.visuals.widgets.noninteractive.fg_stroke = Stroke::new(1.0, self.text);

        style.visuals.widgets.inactive.bg_fill = self.button_background;
        style.visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, self.button_foreground);
        style.visuals.widgets.active.bg_fill = self.highlight;
        style.visuals.widgets.active.fg_stroke = Stroke::new(1.0, self.button_foreground);
        style.visuals.widgets.hovered.bg_fill = self.button_hover_background;
        style.visuals.widgets.hovered.fg_stroke = Stroke::new(1.0, self.button_foreground);

        style.visuals.selection.bg_fill = self.highlight;
        style.visuals.selection.stroke = Stroke::new(1.0, self.highlight);

        style.visuals.window_corner_radius = CornerRadius::same(8);
        style.visuals.menu_corner_radius = CornerRadius::same(6);
        style.visuals.widgets.noninteractive.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.inactive.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.hovered.corner_radius = CornerRadius::same(4);
        style.visuals.widgets.active.corner_radius = CornerRadius::same(4);

        ctx.set_style(style);
    }
}

#[derive(Default)]
struct Drafts {
    show_post_form: bool,
    post: NewItem,
    image_url: String,
    audio_url: String,
    comment: String,
}

/// Everything the window keeps that is not engine state.
struct Shell {
    theme: AppTheme,
    is_dark_mode: bool,
    show_directory: bool,
    drafts: Drafts,
}

struct CampusBoardApp {
    // Keeps the worker threads the controller spawns onto alive.
    _runtime: tokio::runtime::Runtime,
    controller: ViewController<MemoryHistory>,
    shell: Shell,
}

impl CampusBoardApp {
    fn new(runtime: tokio::runtime::Runtime, controller: ViewController<MemoryHistory>) -> Self {
        Self {
            _runtime: runtime,
            controller,
            shell: Shell {
                theme: AppTheme::dark(),
                is_dark_mode: true,
                show_directory: true,
                drafts: Drafts::default(),
            },
        }
    }

    fn go_forward(&mut self) {
        let navigation = self.controller.navigation_mut();
        if navigation.can_go_forward() {
            navigation.forward();
        }
    }

    fn copy_link(&self) {
        let link = self.controller.location();
        match arboard::Clipboard::new().and_then(|mut clipboard| clipboard.set_text(link.clone())) {
            Ok(()) => info!(%link, "copied link"),
            Err(e) => warn!("Could not copy link: {e}"),
        }
    }

    fn process_keyboard_shortcuts(&mut self, ctx: &egui::Context, actions: &mut Vec<Action>) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let input = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Backspace) || (i.modifiers.alt && i.key_pressed(egui::Key::ArrowLeft)),
                i.modifiers.alt && i.key_pressed(egui::Key::ArrowRight),
                i.key_pressed(egui::Key::F5),
                i.key_pressed(egui::Key::Num1),
                i.key_pressed(egui::Key::Num2),
                i.key_pressed(egui::Key::Num3),
            )
        });

        if input.0 {
            actions.push(Action::GoBack);
        }
        if input.1 {
            self.go_forward();
        }
        if input.2 {
            actions.push(Action::Refresh);
        }
        for (pressed, tab) in [input.3, input.4, input.5].into_iter().zip(FeedTab::ALL) {
            if pressed {
                actions.push(Action::ChangeTab(tab));
            }
        }
    }
}

impl eframe::App for CampusBoardApp {
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        storage.set_string("is_dark_mode", self.shell.is_dark_mode.to_string());
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.shell.theme.apply_to_ctx(ctx);

        if self.controller.pump() > 0 {
            ctx.request_repaint();
        }
        if self.controller.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        let mut actions = Vec::new();
        let mut go_forward = false;
        let mut copy_link = false;
        self.process_keyboard_shortcuts(ctx, &mut actions);

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                let shell = &mut self.shell;
                if ui.button(RichText::new("☰").size(18.0)).on_hover_text("Universities").clicked() {
                    shell.show_directory = !shell.show_directory;
                }
                if ui.button("◀").on_hover_text("Back (Backspace)").clicked() {
                    actions.push(Action::GoBack);
                }
                if ui.button("▶").on_hover_text("Forward (Alt+Right)").clicked() {
                    go_forward = true;
                }
                if ui.button("⟳").on_hover_text("Refresh (F5)").clicked() {
                    actions.push(Action::Refresh);
                }
                if ui.button("🔗").on_hover_text("Copy link").clicked() {
                    copy_link = true;
                }
                ui.separator();
                shell.render_tab_buttons(ui, &self.controller, &mut actions);

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let icon = if shell.is_dark_mode { "☀" } else { "🌙" };
                    if ui.button(icon).on_hover_text("Toggle theme").clicked() {
                        shell.set_dark_mode(!shell.is_dark_mode);
                    }
                    let who = match self.controller.session() {
                        SessionState::Pending => "Signing in…".to_string(),
                        SessionState::SignedIn(viewer) => viewer.display_name.clone(),
                        SessionState::SignedOut => "Signed out".to_string(),
                    };
                    ui.label(RichText::new(who).color(shell.theme.secondary_text));
                    if self.controller.is_busy() {
                        ui.spinner();
                    }
                });
            });
            ui.add_space(4.0);
        });

        if let Some(notice) = self.controller.notice() {
            let notice = notice.to_string();
            egui::TopBottomPanel::bottom("notice").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.colored_label(self.shell.theme.error, notice);
                    if ui.button("Dismiss").clicked() {
                        actions.push(Action::DismissPrompt);
                    }
                });
            });
        }

        if self.shell.show_directory {
            egui::SidePanel::left("directory")
                .default_width(260.0)
                .show(ctx, |ui| {
                    self.shell
                        .render_directory(ui, &self.controller, &mut actions);
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            let shell = &mut self.shell;
            match self.controller.view().clone() {
                ViewState::MainFeed { tab } => shell.render_feed(ui, &self.controller, tab, &mut actions),
                ViewState::CommunityBoard { community_id } => {
                    shell.render_board(ui, &self.controller, &community_id, &mut actions)
                }
                ViewState::ItemDetail { .. } => shell.render_detail(ui, &self.controller, &mut actions),
            }
        });

        if self.controller.access_prompt() {
            egui::Window::new("Sign in required")
                .collapsible(false)
                .resizable(false)
                .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
                .show(ctx, |ui| {
                    ui.label("Posts, comments, subscriptions and personal feeds need a signed-in account.");
                    ui.label(
                        RichText::new("Set CAMPUS_BOARD_API_TOKEN and restart to sign in.")
                            .color(self.shell.theme.secondary_text),
                    );
                    if ui.button("OK").clicked() {
                        actions.push(Action::DismissPrompt);
                    }
                });
        }

        if go_forward {
            self.go_forward();
        }
        if copy_link {
            self.copy_link();
        }
        if !actions.is_empty() {
            for action in actions {
                self.controller.dispatch(action);
            }
            ctx.request_repaint();
        }
    }
}

impl Shell {
    fn set_dark_mode(&mut self, is_dark_mode: bool) {
        self.is_dark_mode = is_dark_mode;
        self.theme = if is_dark_mode {
            AppTheme::dark()
        } else {
            AppTheme::light()
        };
    }

    fn render_tab_buttons(
        &self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        actions: &mut Vec<Action>,
    ) {
        let active = match controller.view() {
            ViewState::MainFeed { tab } => Some(*tab),
            _ => None,
        };
        for tab in FeedTab::ALL {
            let selected = active == Some(tab);
            let text = if selected {
                RichText::new(tab.label())
                    .size(15.0)
                    .color(self.theme.highlight)
                    .strong()
            } else {
                RichText::new(tab.label())
                    .size(15.0)
                    .color(self.theme.secondary_text)
            };
            let button = egui::Button::new(text)
                .fill(if selected {
                    self.theme.card_background
                } else {
                    Color32::TRANSPARENT
                })
                .stroke(if selected {
                    Stroke::new(2.0, self.theme.highlight)
                } else {
                    Stroke::NONE
                });
            if ui.add_sized([100.0, 28.0], button).clicked() {
                if active.is_none() {
                    // Tabs live on the main feed; get there first.
                    actions.push(Action::GoBack);
                } else {
                    actions.push(Action::ChangeTab(tab));
                }
            }
        }
    }

    /// Spinner, error with retry, or nothing. Returns the panel's data when there is some to draw.
    fn render_panel_state<'a, T>(
        &self,
        ui: &mut Ui,
        panel: Option<&'a Panel<T>>,
        actions: &mut Vec<Action>,
    ) -> Option<&'a T> {
        let Some(panel) = panel else {
            ui.spinner();
            return None;
        };
        match (panel.state(), panel.data()) {
            (LoadState::Failed(message), None) => {
                ui.colored_label(self.theme.error, format!("Could not load: {message}"));
                if ui.button("Retry").clicked() {
                    actions.push(Action::Refresh);
                }
            }
            (_, None) => {
                ui.spinner();
            }
            (_, Some(_)) if panel.is_refreshing() => {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label(RichText::new("Refreshing…").color(self.theme.secondary_text));
                });
            }
            _ => {}
        }
        panel.data()
    }

    fn render_item_row(
        &self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        item: &Item,
        show_community: bool,
        actions: &mut Vec<Action>,
    ) {
        egui::Frame::new()
            .fill(self.theme.card_background)
            .stroke(Stroke::new(1.0, self.theme.separator))
            .corner_radius(CornerRadius::same(6))
            .inner_margin(Margin::same(8))
            .show(ui, |ui| {
                ui.set_width(ui.available_width());
                ui.horizontal(|ui| {
                    if controller.is_unread(item) {
                        ui.label(RichText::new("●").color(self.theme.highlight))
                            .on_hover_text("New activity since you last looked");
                    }
                    let title = ui.add(
                        egui::Label::new(
                            RichText::new(&item.title)
                                .size(16.0)
                                .color(self.theme.text)
                                .strong(),
                        )
                        .sense(egui::Sense::click()),
                    );
                    if title.clicked() {
                        actions.push(Action::OpenItem(item.id.clone()));
                    }
                    if item.is_trending {
                        ui.label(RichText::new("🔥 Trending").color(self.theme.accent));
                    }
                });
                ui.horizontal(|ui| {
                    ui.label(
                        RichText::new(format!(
                            "{} · {} comments · {}",
                            item.author_name,
                            item.comment_count,
                            item.created_at.format("%Y-%m-%d %H:%M")
                        ))
                        .size(12.0)
                        .color(self.theme.secondary_text),
                    );
                    if show_community && ui.link(item.community_id.as_str()).clicked() {
                        actions.push(Action::OpenCommunity(item.community_id.clone()));
                    }
                });
            });
        ui.add_space(6.0);
    }

    fn render_items(
        &self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        items: &[Item],
        show_community: bool,
        actions: &mut Vec<Action>,
    ) {
        if items.is_empty() {
            ui.label(RichText::new("Nothing here yet.").color(self.theme.secondary_text));
            return;
        }
        ScrollArea::vertical()
            .id_salt("items")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for item in items {
                    self.render_item_row(ui, controller, item, show_community, actions);
                }
            });
    }

    fn render_feed(
        &mut self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        tab: FeedTab,
        actions: &mut Vec<Action>,
    ) {
        ui.heading(RichText::new(tab.label()).color(self.theme.text));
        ui.add_space(6.0);
        if let Some(items) = self.render_panel_state(ui, controller.feed(tab), actions) {
            self.render_items(ui, controller, items, true, actions);
        }
    }

    fn render_board(
        &mut self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        community_id: &str,
        actions: &mut Vec<Action>,
    ) {
        let snapshot = controller.board().data();
        let community = snapshot.and_then(|snapshot| snapshot.community.as_ref());
        ui.horizontal(|ui| {
            let title = community.map_or(community_id, |c| c.name.as_str());
            ui.heading(RichText::new(title).color(self.theme.text));
            if let Some(community) = community {
                ui.label(
                    RichText::new(format!(
                        "{} · {} · {} posts",
                        community.city, community.category, community.item_count
                    ))
                    .color(self.theme.secondary_text),
                );
                let signed_in = controller.session().viewer().is_some();
                if signed_in {
                    let (label, action) = if community.is_subscribed {
                        ("Unsubscribe", Action::Unsubscribe(community.id.clone()))
                    } else {
                        ("Subscribe", Action::Subscribe(community.id.clone()))
                    };
                    if ui.button(label).clicked() {
                        actions.push(action);
                    }
                }
            }
            if ui.button("✏ New post").clicked() {
                self.drafts.show_post_form = !self.drafts.show_post_form;
            }
        });

        if self.drafts.show_post_form {
            self.render_post_form(ui, community_id, actions);
        }
        ui.add_space(6.0);

        if let Some(snapshot) = self.render_panel_state(ui, Some(controller.board()), actions) {
            self.render_items(ui, controller, &snapshot.items, false, actions);
        }
    }

    fn render_post_form(&mut self, ui: &mut Ui, community_id: &str, actions: &mut Vec<Action>) {
        egui::Frame::new()
            .fill(self.theme.card_background)
            .corner_radius(CornerRadius::same(6))
            .inner_margin(Margin::same(8))
            .show(ui, |ui| {
                let drafts = &mut self.drafts;
                ui.add(egui::TextEdit::singleline(&mut drafts.post.title).hint_text("Title"));
                ui.add(
                    egui::TextEdit::multiline(&mut drafts.post.body)
                        .hint_text("What's happening on campus?")
                        .desired_rows(4),
                );
                ui.add(egui::TextEdit::singleline(&mut drafts.image_url).hint_text("Image URL (optional)"));
                ui.add(egui::TextEdit::singleline(&mut drafts.audio_url).hint_text("Audio URL (optional)"));
                let ready = !drafts.post.title.trim().is_empty();
                if ui.add_enabled(ready, egui::Button::new("Post")).clicked() {
                    let mut payload = std::mem::take(&mut drafts.post);
                    payload.image_url = non_empty(std::mem::take(&mut drafts.image_url));
                    payload.audio_url = non_empty(std::mem::take(&mut drafts.audio_url));
                    actions.push(Action::CreateItem {
                        community_id: community_id.to_string(),
                        payload,
                    });
                    drafts.show_post_form = false;
                }
            });
    }

    fn render_detail(
        &mut self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        actions: &mut Vec<Action>,
    ) {
        let Some(detail) = self.render_panel_state(ui, Some(controller.detail()), actions) else {
            return;
        };
        let item = &detail.item;

        ui.horizontal(|ui| {
            ui.heading(RichText::new(&item.title).color(self.theme.text));
            if item.is_trending {
                ui.label(RichText::new("🔥 Trending").color(self.theme.accent));
            }
        });
        ui.horizontal(|ui| {
            ui.label(
                RichText::new(format!(
                    "{} · {}",
                    item.author_name,
                    item.created_at.format("%Y-%m-%d %H:%M")
                ))
                .color(self.theme.secondary_text),
            );
            if ui.link(item.community_id.as_str()).clicked() {
                actions.push(Action::OpenCommunity(item.community_id.clone()));
            }
        });
        ui.add_space(6.0);
        ui.label(RichText::new(&item.body).color(self.theme.text));
        for (label, url) in [("🖼 Open image", &item.image_url), ("🔊 Play audio", &item.audio_url)] {
            if let Some(url) = url {
                if ui.link(label).clicked() {
                    open_attachment(url);
                }
            }
        }

        ui.separator();
        ui.label(
            RichText::new(format!("{} comments", detail.comments.len()))
                .strong()
                .color(self.theme.text),
        );

        let item_id = item.id.clone();
        let drafts = &mut self.drafts;
        ui.horizontal(|ui| {
            ui.add(
                egui::TextEdit::singleline(&mut drafts.comment)
                    .hint_text("Add a comment")
                    .desired_width(ui.available_width() - 80.0),
            );
            let ready = !drafts.comment.trim().is_empty();
            if ui.add_enabled(ready, egui::Button::new("Send")).clicked() {
                actions.push(Action::CreateComment {
                    item_id,
                    payload: NewComment {
                        body: std::mem::take(&mut drafts.comment),
                        audio_url: None,
                    },
                });
            }
        });
        ui.add_space(6.0);

        let theme = &self.theme;
        ScrollArea::vertical()
            .id_salt("comments")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for comment in &detail.comments {
                    egui::Frame::new()
                        .fill(theme.card_background)
                        .corner_radius(CornerRadius::same(4))
                        .inner_margin(Margin::same(6))
                        .show(ui, |ui| {
                            ui.set_width(ui.available_width());
                            ui.label(
                                RichText::new(format!(
                                    "{} · {}",
                                    comment.author_name,
                                    comment.created_at.format("%Y-%m-%d %H:%M")
                                ))
                                .size(12.0)
                                .color(theme.secondary_text),
                            );
                            ui.label(RichText::new(&comment.body).color(theme.text));
                        });
                    ui.add_space(4.0);
                }
            });
    }

    fn render_directory(
        &self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        actions: &mut Vec<Action>,
    ) {
        ui.horizontal(|ui| {
            ui.heading(RichText::new("Universities").color(self.theme.text));
            if ui.small_button("⟳").on_hover_text("Reload").clicked() {
                actions.push(Action::LoadDirectory);
            }
        });
        ui.separator();

        let directory = controller.directory();
        if !controller.session().is_resolved() {
            ui.spinner();
            return;
        }
        let Some(communities) = (match (directory.state(), directory.data()) {
            (LoadState::Failed(message), None) => {
                ui.colored_label(self.theme.error, message.as_str());
                None
            }
            (_, None) => {
                ui.spinner();
                None
            }
            (_, Some(communities)) => Some(communities),
        }) else {
            return;
        };

        let signed_in = controller.session().viewer().is_some();
        ScrollArea::vertical()
            .id_salt("directory")
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for community in communities {
                    self.render_community_row(ui, controller, community, signed_in, actions);
                }
            });
    }

    fn render_community_row(
        &self,
        ui: &mut Ui,
        controller: &ViewController<MemoryHistory>,
        community: &Community,
        signed_in: bool,
        actions: &mut Vec<Action>,
    ) {
        let active = controller.view().community_id() == Some(community.id.as_str());
        ui.horizontal(|ui| {
            let name = RichText::new(&community.short_name).color(if active {
                self.theme.highlight
            } else {
                self.theme.text
            });
            if ui
                .add(egui::Label::new(name).sense(egui::Sense::click()))
                .on_hover_text(community.name.as_str())
                .clicked()
            {
                actions.push(Action::OpenCommunity(community.id.clone()));
            }
            ui.label(
                RichText::new(format!("{} posts", community.item_count))
                    .size(12.0)
                    .color(self.theme.secondary_text),
            );
            if signed_in {
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let (icon, action) = if community.is_subscribed {
                        ("★", Action::Unsubscribe(community.id.clone()))
                    } else {
                        ("☆", Action::Subscribe(community.id.clone()))
                    };
                    if ui.small_button(icon).on_hover_text("Subscribe").clicked() {
                        actions.push(action);
                    }
                });
            }
        });
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn open_attachment(url: &str) {
    if let Err(e) = open::that(url) {
        warn!(%url, "Failed to open attachment: {e}");
    }
}
