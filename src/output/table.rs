//! Elastic tab stops
//!
//! Text written to a [`TabWriter`] is buffered until flushed. Each line is
//! split into tab-terminated cells; a column is padded to its widest cell
//! plus the padding, within each run of consecutive lines that have a cell
//! in that column. The last cell of a line is not part of any column.

use std::io::{self, Write};

const PADDING: usize = 4;

pub struct TabWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> TabWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Flush buffered text and return the underlying writer
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn write_aligned(&mut self) -> io::Result<()> {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        let mut lines: Vec<&str> = text.split('\n').collect();
        let terminated = text.ends_with('\n');
        if terminated {
            lines.pop();
        }

        let cells: Vec<Vec<&str>> = lines.iter().map(|l| l.split('\t').collect()).collect();
        let widths = column_widths(&cells, PADDING);

        for (i, line) in cells.iter().enumerate() {
            for (j, cell) in line.iter().enumerate() {
                self.inner.write_all(cell.as_bytes())?;
                if let Some(width) = widths[i].get(j) {
                    let pad = width.saturating_sub(cell.chars().count());
                    write!(self.inner, "{:pad$}", "", pad = pad)?;
                }
            }
            if i + 1 < cells.len() || terminated {
                self.inner.write_all(b"\n")?;
            }
        }
        Ok(())
    }
}

impl<W: Write> Write for TabWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.write_aligned()?;
            self.buf.clear();
        }
        self.inner.flush()
    }
}

/// Column widths in effect on every line
fn column_widths(lines: &[Vec<&str>], padding: usize) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new(); lines.len()];
    let mut stack = Vec::new();
    layout(lines, padding, &mut stack, 0, lines.len(), &mut out);
    out
}

fn layout(
    lines: &[Vec<&str>],
    padding: usize,
    widths: &mut Vec<usize>,
    mut line0: usize,
    line1: usize,
    out: &mut [Vec<usize>],
) {
    let column = widths.len();
    let mut this = line0;

    while this < line1 {
        if column + 1 >= lines[this].len() {
            this += 1;
            continue;
        }

        // Lines before the block keep the enclosing widths
        for line in &mut out[line0..this] {
            *line = widths.clone();
        }
        line0 = this;

        let mut width = 0;
        while this < line1 && column + 1 < lines[this].len() {
            width = width.max(lines[this][column].chars().count() + padding);
            this += 1;
        }

        widths.push(width);
        layout(lines, padding, widths, line0, this, out);
        widths.pop();
        line0 = this;
    }

    for line in &mut out[line0..line1] {
        *line = widths.clone();
    }
}
