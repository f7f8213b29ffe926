use ratatui::style::{Color, Modifier, Style};
use std::sync::OnceLock;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThemeMode {
    Light,
    Dark,
}

impl ThemeMode {
    /// `CHI_FORMS_THEME=light` switches to the light palette; anything else is dark.
    pub fn from_env() -> Self {
        match std::env::var("CHI_FORMS_THEME") {
            Ok(v) if v.eq_ignore_ascii_case("light") => ThemeMode::Light,
            _ => ThemeMode::Dark,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Theme {
    pub mode: ThemeMode,
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub frame: Color,
    pub selected: Color,
    pub success: Color,
    pub error: Color,
    pub muted: Color,
}

impl Theme {
    pub fn synthwave_dark() -> Self {
        Self {
            mode: ThemeMode::Dark,
            bg: Color::Rgb(24, 24, 26),
            fg: Color::White,
            accent: Color::Rgb(64, 160, 255),
            frame: Color::Rgb(90, 90, 100),
            selected: Color::Rgb(255, 120, 0),
            success: Color::Green,
            error: Color::Red,
            muted: Color::DarkGray,
        }
    }

    pub fn synthwave_light() -> Self {
        Self {
            mode: ThemeMode::Light,
            bg: Color::Rgb(245, 245, 247),
            fg: Color::Rgb(20, 20, 22),
            accent: Color::Rgb(40, 120, 220),
            frame: Color::Rgb(200, 200, 210),
            selected: Color::Rgb(220, 100, 0),
            success: Color::Rgb(0, 150, 0),
            error: Color::Rgb(200, 0, 0),
            muted: Color::Rgb(120, 120, 130),
        }
    }

    pub fn from_mode(mode: ThemeMode) -> Self {
        match mode {
            ThemeMode::Dark => Self::synthwave_dark(),
            ThemeMode::Light => Self::synthwave_light(),
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::synthwave_dark()
    }
}

impl Theme {
    pub fn border_focused(&self) -> Style {
        Style::default().fg(self.selected)
    }

    pub fn border_unfocused(&self) -> Style {
        Style::default().fg(self.frame)
    }

    pub fn text_active_bold(&self) -> Style {
        Style::default()
            .fg(self.accent)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text_editing_bold(&self) -> Style {
        Style::default()
            .fg(self.selected)
            .add_modifier(Modifier::BOLD)
    }

    pub fn text_muted(&self) -> Style {
        Style::default().fg(self.muted)
    }

    pub fn text_error(&self) -> Style {
        Style::default().fg(self.error)
    }

    pub fn text_success(&self) -> Style {
        Style::default().fg(self.success)
    }

    pub fn list_cursor_style(&self) -> Style {
        Style::default()
            .fg(self.bg)
            .bg(self.selected)
            .add_modifier(Modifier::BOLD)
    }

    pub fn base_style(&self) -> Style {
        Style::default().bg(self.bg).fg(self.fg)
    }

    pub fn toast_color(&self, level: crate::ui::ToastLevel) -> Color {
        match level {
            crate::ui::ToastLevel::Success => self.success,
            crate::ui::ToastLevel::Error => self.error,
            crate::ui::ToastLevel::Info => self.accent,
        }
    }
}

static CURRENT: OnceLock<Theme> = OnceLock::new();

/// Fix the palette for the process; later calls are ignored.
pub fn install(theme: Theme) {
    let _ = CURRENT.set(theme);
}

pub fn current() -> &'static Theme {
    CURRENT.get_or_init(Theme::default)
}

pub fn border_focused() -> Style {
    current().border_focused()
}

pub fn border_unfocused() -> Style {
    current().border_unfocused()
}

pub fn text_active_bold() -> Style {
    current().text_active_bold()
}

pub fn text_editing_bold() -> Style {
    current().text_editing_bold()
}

pub fn text_muted() -> Style {
    current().text_muted()
}

pub fn text_error() -> Style {
    current().text_error()
}

pub fn text_success() -> Style {
    current().text_success()
}

pub fn toast_color(level: crate::ui::ToastLevel) -> Color {
    current().toast_color(level)
}

pub fn list_cursor_style() -> Style {
    current().list_cursor_style()
}
