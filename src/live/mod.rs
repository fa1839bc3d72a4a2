//! The live dashboard: a blocking draw loop over the terminal.

pub mod cadence;
pub mod layout;
pub mod view;

use crate::config::LiveConfig;
use crate::sampling::Sources;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::cursor::{Hide, Show};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use std::io::{self, Stdout};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use view::Dashboard;

/// Restores the terminal when dropped, including on panic.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let guard = TerminalGuard;
        execute!(io::stdout(), EnterAlternateScreen, Hide)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(io::stdout(), Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Runs the dashboard until the user quits or `stop` is set.
///
/// Blocks the calling thread; run it on a blocking task.
pub fn run(sources: Sources, config: &LiveConfig, stop: Arc<AtomicBool>) -> io::Result<()> {
    let _guard = TerminalGuard::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    let mut dashboard = Dashboard::new(sources, config.resort_every());
    draw_loop(&mut terminal, &mut dashboard, config, &stop)
}

fn draw_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    dashboard: &mut Dashboard,
    config: &LiveConfig,
    stop: &AtomicBool,
) -> io::Result<()> {
    let draw_interval = config.draw_interval();
    while !stop.load(Ordering::Relaxed) {
        let size = terminal.size()?;
        dashboard.update(size.height);
        terminal.draw(|frame| dashboard.render(frame))?;

        let deadline = Instant::now() + draw_interval;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            if stop.load(Ordering::Relaxed) || !event::poll(remaining)? {
                break;
            }
            if let Event::Key(key) = event::read()? {
                if is_quit(&key) {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}
