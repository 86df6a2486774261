//! Terminal progress bar for long scans

use std::{
    io::{self, Write},
    time::{Duration, Instant},
};

const BAR_WIDTH: usize = 50;

pub struct ProgressBar<W: Write> {
    out: W,
    total: usize,
    started: Instant,
    last_drawn: Option<(usize, u64)>,
    enabled: bool,
}

impl ProgressBar<io::Stderr> {
    pub fn stderr(total: usize, enabled: bool) -> Self {
        Self::new(io::stderr(), total, enabled)
    }
}

impl<W: Write> ProgressBar<W> {
    pub fn new(out: W, total: usize, enabled: bool) -> Self {
        Self {
            out,
            total,
            started: Instant::now(),
            last_drawn: None,
            enabled,
        }
    }

    /// Redraw with `done` items completed. Skipped when neither the
    /// percentage nor the elapsed second changed.
    pub fn set(&mut self, done: usize) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let percent = percent(done, self.total);
        let elapsed = self.started.elapsed();
        if self.last_drawn == Some((percent, elapsed.as_secs())) {
            return Ok(());
        }
        self.last_drawn = Some((percent, elapsed.as_secs()));

        write!(self.out, "\r{}", render(done, self.total, elapsed))?;
        self.out.flush()
    }

    pub fn finish(mut self) -> io::Result<W> {
        if self.enabled && self.last_drawn.is_some() {
            writeln!(self.out)?;
            self.out.flush()?;
        }
        Ok(self.out)
    }
}

fn percent(done: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        done.min(total) * 100 / total
    }
}

fn render(done: usize, total: usize, elapsed: Duration) -> String {
    let percent = percent(done, total);
    let filled = percent * BAR_WIDTH / 100;
    let mut bar = "=".repeat(filled);
    if filled < BAR_WIDTH {
        bar.push('>');
        bar.push_str(&"-".repeat(BAR_WIDTH - filled - 1));
    }
    format!("{:>6} [{}] {:>3}%", format_elapsed(elapsed), bar, percent)
}

/// `59s`, `1m2s`, `2h0m5s`
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let line = render(5, 10, Duration::from_secs(3));
        assert!(line.starts_with("    3s ["));
        assert!(line.ends_with("]  50%"));
        assert_eq!(line.matches('=').count(), 25);

        let done = render(10, 10, Duration::from_secs(75));
        assert!(done.contains("1m15s"));
        assert!(done.ends_with(" 100%"));
        assert!(!done.contains('>'));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(900)), "0s");
        assert_eq!(format_elapsed(Duration::from_secs(3725)), "1h2m5s");
    }

    #[test]
    fn test_disabled_bar_writes_nothing() {
        let mut bar = ProgressBar::new(Vec::new(), 3, false);
        bar.set(1).unwrap();
        bar.set(3).unwrap();
        assert!(bar.finish().unwrap().is_empty());
    }

    #[test]
    fn test_enabled_bar_redraws_in_place() {
        let mut bar = ProgressBar::new(Vec::new(), 2, true);
        bar.set(1).unwrap();
        bar.set(2).unwrap();
        let out = String::from_utf8(bar.finish().unwrap()).unwrap();
        assert_eq!(out.matches('\r').count(), 2);
        assert!(out.ends_with("100%\n"));
    }

    #[test]
    fn test_empty_population() {
        assert_eq!(percent(0, 0), 100);
    }
}
