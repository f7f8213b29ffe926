use crate::app::{update, AppMsg, Effect};
use crate::engine::orchestrator::FormController;
use crate::model::{load_config, validate_form_config, FormConfig};
use crate::services::options::spawn_load_options;
use crate::services::transport::{
    spawn_dispatch, CliTransport, NoTransport, ServerReply, Transport, TransportError,
};
use crate::widgets::form_widget::FormWidget;
use crate::widgets::records::RecordsWidget;
use crate::widgets::status_bar::draw_footer;
use crate::widgets::Widget;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK_RATE: Duration = Duration::from_millis(200);
const DEBUG_H: u16 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Records,
    Form,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Error,
}

pub struct Toast {
    pub text: String,
    pub level: ToastLevel,
    pub expires_at_tick: u64,
}

/// Results sent back by worker threads, drained once per tick.
pub enum LoadMsg {
    Submitted {
        ticket: u64,
        outcome: Result<ServerReply, TransportError>,
    },
    Options {
        field: String,
        outcome: Result<Vec<String>, String>,
    },
}

pub struct AppState {
    pub config: FormConfig,
    pub config_path: Option<PathBuf>,
    pub view: View,
    pub form: FormWidget,
    pub records: RecordsWidget,
    pub transport: Arc<dyn Transport>,
    pub tick: u64,
    pub toast: Option<Toast>,
    pub status_text: Option<String>,
    pub debug_log: VecDeque<String>,
    pub show_debug: bool,
    pub tx: Sender<LoadMsg>,
    pub rx: Receiver<LoadMsg>,
}

impl AppState {
    pub fn new(config: FormConfig, transport: Arc<dyn Transport>) -> Self {
        let controller = FormController::new(
            config.groups.clone(),
            config.api.clone(),
            config.failed_msg.clone(),
        );
        let form = FormWidget::new(controller, config.form_name.clone(), config.popup);
        let records = RecordsWidget::new(format!("{} records", config.form_name));
        let (tx, rx) = mpsc::channel::<LoadMsg>();
        Self {
            config,
            config_path: None,
            view: View::Records,
            form,
            records,
            transport,
            tick: 0,
            toast: None,
            status_text: None,
            debug_log: VecDeque::new(),
            show_debug: false,
            tx,
            rx,
        }
    }

    pub fn dbg(&mut self, msg: impl Into<String>) {
        const MAX_LOG_LINES: usize = 200;
        let msg = msg.into();
        tracing::debug!("{msg}");
        if self.debug_log.len() >= MAX_LOG_LINES {
            self.debug_log.pop_front();
        }
        self.debug_log.push_back(msg);
    }

    // A form closed by Esc or a successful save hands focus back to the list.
    fn sync_view(&mut self) {
        if self.view == View::Form && !self.form.controller.is_open() {
            self.view = View::Records;
        }
    }
}

fn transport_for(config: &FormConfig) -> Arc<dyn Transport> {
    match config.transport.command.as_deref().map(str::trim) {
        Some(cmd) if !cmd.is_empty() => Arc::new(CliTransport::new(cmd)),
        _ => Arc::new(NoTransport),
    }
}

pub fn run_effects(state: &mut AppState, effects: Vec<Effect>) {
    for eff in effects {
        match eff {
            Effect::Dispatch(dispatch) => {
                state.dbg(format!(
                    "submit #{} {} {} ({} part(s))",
                    dispatch.ticket,
                    dispatch.method.as_str(),
                    dispatch.endpoint,
                    dispatch.payload.len()
                ));
                state.status_text = Some("Submitting...".into());
                spawn_dispatch(dispatch, state.transport.clone(), state.tx.clone());
            }
            Effect::LoadOptions {
                field,
                endpoint,
                api_key,
            } => {
                state.dbg(format!("load options {field} <- {endpoint}"));
                spawn_load_options(
                    field,
                    endpoint,
                    api_key,
                    state.transport.clone(),
                    state.tx.clone(),
                );
            }
            Effect::ShowToast {
                text,
                level,
                seconds,
            } => {
                let ticks = seconds.saturating_mul(5); // ~200ms tick
                state.toast = Some(Toast {
                    text,
                    level,
                    expires_at_tick: state.tick.saturating_add(ticks),
                });
            }
        }
    }
}

/// Apply every worker result that has arrived so far.
pub fn pump_messages(state: &mut AppState) {
    let drained: Vec<LoadMsg> = state.rx.try_iter().collect();
    for msg in drained {
        let effects = match msg {
            LoadMsg::Submitted { ticket, outcome } => {
                update(state, AppMsg::Submitted { ticket, outcome })
            }
            LoadMsg::Options { field, outcome } => {
                update(state, AppMsg::LoadedOptions { field, outcome })
            }
        };
        run_effects(state, effects);
    }
    state.sync_view();
}

fn copy_selected(state: &mut AppState) {
    let (text, level) = match state.records.selected_pretty() {
        None => ("Nothing to copy".to_string(), ToastLevel::Info),
        Some(body) => match arboard::Clipboard::new().and_then(|mut c| c.set_text(body)) {
            Ok(()) => ("Copied to clipboard!".to_string(), ToastLevel::Success),
            Err(e) => {
                state.dbg(format!("clipboard: {e}"));
                ("Clipboard unavailable".to_string(), ToastLevel::Error)
            }
        },
    };
    run_effects(
        state,
        vec![Effect::ShowToast {
            text,
            level,
            seconds: 2,
        }],
    );
}

/// Route one key press. Returns false when the app should quit.
pub fn handle_key(state: &mut AppState, code: KeyCode, modifiers: KeyModifiers) -> bool {
    if code == KeyCode::F(12) {
        state.show_debug = !state.show_debug;
        return true;
    }
    let ctrl = modifiers.contains(KeyModifiers::CONTROL);
    match state.view {
        View::Form => {
            let effects = if ctrl && matches!(code, KeyCode::Char('s') | KeyCode::Char('S')) {
                state.form.submit()
            } else {
                state.form.on_key(code)
            };
            run_effects(state, effects);
            state.sync_view();
        }
        View::Records => match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('c') if ctrl => return false,
            KeyCode::Char('n') => {
                let effects = update(state, AppMsg::NewRecord);
                run_effects(state, effects);
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                let effects = update(state, AppMsg::EditSelected);
                run_effects(state, effects);
            }
            KeyCode::Char('c') => copy_selected(state),
            other => {
                let effects = state.records.on_key(other);
                run_effects(state, effects);
            }
        },
    }
    true
}

pub fn ui(f: &mut Frame, state: &mut AppState) {
    if state
        .toast
        .as_ref()
        .is_some_and(|t| state.tick >= t.expires_at_tick)
    {
        state.toast = None;
    }
    let screen = f.area();
    f.render_widget(
        Block::default().style(crate::theme::current().base_style()),
        screen,
    );
    let mut constraints = vec![Constraint::Length(1), Constraint::Min(0)];
    if state.show_debug {
        constraints.push(Constraint::Length(DEBUG_H));
    }
    constraints.push(Constraint::Length(1));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(screen);

    draw_header(f, chunks[0], state);
    let main = chunks[1];
    let tick = state.tick;
    match state.view {
        View::Records => state.records.render(f, main, true, tick),
        View::Form => {
            if state.form.popup {
                state.records.render(f, main, false, tick);
            }
            state.form.render(f, main, true, tick);
        }
    }
    if state.show_debug {
        draw_debug(f, chunks[2], state);
    }
    draw_footer(f, chunks[chunks.len() - 1], state);
}

fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let mut spans = vec![Span::styled(
        format!(" {} ", state.config.form_name),
        crate::theme::text_active_bold(),
    )];
    if let Some(p) = &state.config_path {
        spans.push(Span::styled(
            format!(" {}", p.display()),
            crate::theme::text_muted(),
        ));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_debug(f: &mut Frame, area: Rect, state: &AppState) {
    let b = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            "Debug",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        ));
    let h = area.height.saturating_sub(1) as usize;
    let start = state.debug_log.len().saturating_sub(h);
    let lines: Vec<Line> = state
        .debug_log
        .iter()
        .skip(start)
        .map(|s| Line::raw(s.clone()))
        .collect();
    let p = Paragraph::new(lines)
        .style(Style::default().fg(Color::Gray))
        .block(b)
        .wrap(Wrap { trim: true });
    f.render_widget(p, area);
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

fn build_state(explicit: Option<&str>) -> Result<AppState> {
    let (config, path) = load_config(explicit)?;
    let warnings = validate_form_config(&config)
        .with_context(|| format!("invalid form config: {}", path.display()))?;
    let transport = transport_for(&config);
    let mut state = AppState::new(config, transport);
    state.dbg(format!("config: {}", path.display()));
    for w in warnings {
        tracing::warn!("{w}");
        state.dbg(w);
    }
    state.config_path = Some(path);
    Ok(state)
}

pub fn run(explicit: Option<&str>) -> Result<()> {
    crate::theme::install(crate::theme::Theme::from_mode(
        crate::theme::ThemeMode::from_env(),
    ));
    let mut state = build_state(explicit)?;
    if state.config.open_on_start {
        let effects = update(&mut state, AppMsg::NewRecord);
        run_effects(&mut state, effects);
    }
    if env_flag("CHI_FORMS_HEADLESS") {
        return run_headless(&mut state);
    }
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let res = run_loop(&mut terminal, &mut state);
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    res
}

fn run_loop<B: Backend>(terminal: &mut Terminal<B>, state: &mut AppState) -> Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, state))?;
        let timeout = TICK_RATE
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !handle_key(state, key.code, key.modifiers) {
                    return Ok(());
                }
            }
        }
        pump_messages(state);
        if last_tick.elapsed() >= TICK_RATE {
            state.tick = state.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }
}

// Draws into an off-screen buffer for smoke runs in CI.
fn run_headless(state: &mut AppState) -> Result<()> {
    let ticks: u64 = std::env::var("CHI_FORMS_TICKS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10);
    let submit = env_flag("CHI_FORMS_HEADLESS_SUBMIT");
    let summary = env_flag("CHI_FORMS_SMOKE_SUMMARY");
    let backend = ratatui::backend::TestBackend::new(100, 30);
    let mut terminal = Terminal::new(backend)?;
    let mut submitted = false;
    for _ in 0..ticks {
        if submit && !submitted && state.form.controller.is_open() {
            let effects = state.form.submit();
            run_effects(state, effects);
            submitted = true;
        }
        terminal.draw(|f| ui(f, state))?;
        pump_messages(state);
        state.tick = state.tick.wrapping_add(1);
        std::thread::sleep(TICK_RATE);
    }
    if summary {
        let view = match state.view {
            View::Records => "Records",
            View::Form => "Form",
        };
        let ok = !matches!(
            state.toast.as_ref().map(|t| t.level),
            Some(ToastLevel::Error)
        );
        let out = serde_json::json!({
            "ok": ok,
            "view": view,
            "submitted": submitted,
            "submitting": state.form.controller.is_submitting(),
            "records": state.records.records.len(),
            "errors": state.form.controller.errors().len(),
        });
        println!("{out}");
    }
    Ok(())
}
