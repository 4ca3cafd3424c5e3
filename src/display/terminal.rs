// src/display/terminal.rs
//! Terminal-based live view of the walk being recorded

use crate::{
    error::Result,
    session::{SessionState, WalkStatus},
    walk::format_duration,
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::{
    io::{self, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::sleep;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

pub struct TerminalDisplay;

impl TerminalDisplay {
    pub fn new() -> Self {
        Self
    }

    /// Redraw once a second until `running` is cleared or the walk ends
    pub async fn run<F>(&self, status: F, running: Arc<AtomicBool>) -> Result<()>
    where
        F: Fn() -> WalkStatus,
    {
        let mut stdout = io::stdout();
        execute!(stdout, Hide, DisableLineWrap)?;

        while running.load(Ordering::Relaxed) {
            let current = status();
            if current.state == SessionState::Idle {
                break;
            }

            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
            self.render(&mut stdout, &current)?;
            stdout.flush()?;
            sleep(REFRESH_INTERVAL).await;
        }

        execute!(stdout, Show, EnableLineWrap)?;
        Ok(())
    }

    /// Render one frame of the walk
    pub fn render(&self, out: &mut impl Write, status: &WalkStatus) -> Result<()> {
        execute!(
            out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(50)),
            Print("\n"),
            Print(format!(
                "Walk Tracker - {}",
                status.walk_id.as_deref().unwrap_or("no walk")
            )),
            Print("\n"),
            Print("=".repeat(50)),
            Print("\n"),
            ResetColor
        )?;

        execute!(
            out,
            SetForegroundColor(Color::Yellow),
            Print("WALK:\n"),
            ResetColor,
            Print(format!("  State:     {:>12}\n", status.state)),
            Print(format!(
                "  Time:      {:>12}\n",
                format_duration(status.elapsed_seconds)
            )),
            Print(format!(
                "  Distance:  {:>12}\n",
                format_distance(status.distance_meters)
            )),
            Print(format!("  Points:    {:>12}\n\n", status.points))
        )?;

        execute!(
            out,
            SetForegroundColor(Color::Cyan),
            Print("POSITION:\n"),
            ResetColor
        )?;
        match &status.last_position {
            Some(last) => execute!(
                out,
                Print(format!("  Latitude:  {:>12.6}\n", last.latitude())),
                Print(format!("  Longitude: {:>12.6}\n", last.longitude())),
                Print(format!(
                    "  Fix time:  {}\n\n",
                    last.timestamp.format("%H:%M:%S UTC")
                ))
            )?,
            None => execute!(out, Print("  Waiting for first fix...\n\n"))?,
        }

        execute!(
            out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(50)),
            Print("\n"),
            Print("Press Ctrl+C to finish the walk"),
            Print("\n"),
            ResetColor
        )?;

        Ok(())
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// Meters below one kilometer, kilometers above
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}
