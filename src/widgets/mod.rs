pub mod chrome;
pub mod form_widget;
pub mod inputs;
pub mod records;
pub mod status_bar;

use crate::app::Effect;
use crossterm::event::KeyCode;
use ratatui::prelude::*;

pub trait Widget {
    fn render(&mut self, f: &mut Frame, area: Rect, focused: bool, tick: u64);
    fn on_key(&mut self, key: KeyCode) -> Vec<Effect> {
        let _ = key;
        Vec::new()
    }
}
