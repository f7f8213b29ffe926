mod app;
mod engine;
mod logging;
mod model;
mod services;
mod theme;
mod ui;
mod widgets;

use anyhow::Result;

fn main() -> Result<()> {
    if let Some(path) = logging::init_logging()? {
        tracing::info!(log = %path, "chi-forms starting");
    }
    let explicit = std::env::args().nth(1);
    ui::run(explicit.as_deref())
}
