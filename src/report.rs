//! Diagnostic report for a detected corruption
//!
//! The report lists the frame ledger innermost first, names the frames whose
//! captured region differs, dumps each frame's bytes side by side (live stack
//! vs. mirror) and finishes with a backtrace of the detecting thread.
//!
//! Dump line layout at width 4:
//! ```text
//! * 0x00007ffc0000a120 |  41 [42] 43  44  | ABCD |  41 [00] 43  44  | A.CD
//! ```

use std::io::{self, IsTerminal, Write};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::config::{ColorMode, DumpArea, DumpConfig, MAX_DUMP_WIDTH};
use crate::mirror::{Frame, Phase};
use crate::stack_unwind;

const ACTUAL_LABEL: &str = "ACTUAL STACK (CORRUPTED):";
const SHADOW_LABEL: &str = "SHADOW STACK (CORRECT):";

/// Width of the "marker + address + separator" prefix of a dump line
const LINE_PREFIX_WIDTH: usize = 23;

/// Snapshot of one ledger frame taken at detection time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDump {
    pub frame: Frame,
    /// Absolute address of the frame's first byte
    pub address: usize,
    /// Live stack bytes
    pub actual: Vec<u8>,
    /// Mirrored bytes
    pub shadow: Vec<u8>,
}

/// Everything the reporter prints, captured before any healing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionReport {
    pub phase: Phase,
    /// Ledger snapshot, innermost first
    pub frames: Vec<FrameDump>,
    pub corrupted_frames: Vec<Frame>,
    pub differing_bytes: usize,
    pub first_difference: usize,
}

/// Counters describing what a dump printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub lines_shown: usize,
    pub differing_lines: usize,
    /// Number of "(N equal bytes in M lines hidden)" markers
    pub hidden_markers: usize,
    pub hidden_lines: usize,
    pub hidden_bytes: usize,
}

/// Stderr stream honouring the configured colour mode
pub fn stderr_stream(dump: &DumpConfig) -> StandardStream {
    let choice = match dump.color {
        ColorMode::Always => ColorChoice::Always,
        ColorMode::Never => ColorChoice::Never,
        ColorMode::Auto if io::stderr().is_terminal() => ColorChoice::Auto,
        ColorMode::Auto => ColorChoice::Never,
    };
    StandardStream::stderr(choice)
}

#[derive(Clone, Copy)]
enum Column {
    Actual,
    Shadow,
}

/// Side-by-side hex + ASCII dump of live vs. mirrored bytes
pub struct DumpPrinter<'a> {
    config: &'a DumpConfig,
    highlight: ColorSpec,
}

impl<'a> DumpPrinter<'a> {
    pub fn new(config: &'a DumpConfig) -> Self {
        let mut highlight = ColorSpec::new();
        highlight.set_bold(true).set_fg(Some(Color::Red));
        Self { config, highlight }
    }

    /// Configured width, clamped for configs built without `validate`
    fn width(&self) -> usize {
        self.config.width.clamp(1, MAX_DUMP_WIDTH)
    }

    /// Column titles, aligned with the dump lines
    pub fn print_header<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let column = self.width() * 5 + 3;
        match self.config.area {
            DumpArea::Both => writeln!(
                out,
                "{:pad$}{:<column$} | {}",
                "",
                ACTUAL_LABEL,
                SHADOW_LABEL,
                pad = LINE_PREFIX_WIDTH
            ),
            DumpArea::Actual => writeln!(out, "{:pad$}{}", "", ACTUAL_LABEL, pad = LINE_PREFIX_WIDTH),
            DumpArea::Shadow => writeln!(out, "{:pad$}{}", "", SHADOW_LABEL, pad = LINE_PREFIX_WIDTH),
        }
    }

    /// Dump `actual` against `shadow`, both starting at `address`
    ///
    /// Lines are aligned to multiples of the width on absolute addresses, so
    /// the first and last line may be partially blank.
    pub fn dump<W: WriteColor>(
        &self,
        out: &mut W,
        address: usize,
        actual: &[u8],
        shadow: &[u8],
    ) -> io::Result<DumpStats> {
        let mut stats = DumpStats::default();
        let len = actual.len().min(shadow.len());
        if len == 0 {
            return Ok(stats);
        }

        let width = self.width();
        let end = address.saturating_add(len);
        let len = end - address;
        let mut hidden_lines = 0;
        let mut hidden_bytes = 0;
        let mut line_start = address - address % width;

        while line_start < end {
            let from = line_start.max(address) - address;
            let to = line_start.saturating_add(width).min(end) - address;
            let differs = actual[from..to] != shadow[from..to];

            if self.config.hide_equal_lines && !differs {
                hidden_lines += 1;
                hidden_bytes += to - from;
            } else {
                self.flush_hidden(out, &mut stats, &mut hidden_lines, &mut hidden_bytes)?;
                self.print_line(out, line_start, address, &actual[..len], &shadow[..len], differs)?;
                stats.lines_shown += 1;
                if differs {
                    stats.differing_lines += 1;
                }
            }
            line_start = match line_start.checked_add(width) {
                Some(next) => next,
                None => break,
            };
        }
        self.flush_hidden(out, &mut stats, &mut hidden_lines, &mut hidden_bytes)?;
        Ok(stats)
    }

    fn flush_hidden<W: Write>(
        &self,
        out: &mut W,
        stats: &mut DumpStats,
        hidden_lines: &mut usize,
        hidden_bytes: &mut usize,
    ) -> io::Result<()> {
        if *hidden_lines == 0 {
            return Ok(());
        }
        writeln!(out, "    ({} equal bytes in {} lines hidden)", hidden_bytes, hidden_lines)?;
        stats.hidden_markers += 1;
        stats.hidden_lines += *hidden_lines;
        stats.hidden_bytes += *hidden_bytes;
        *hidden_lines = 0;
        *hidden_bytes = 0;
        Ok(())
    }

    fn print_line<W: WriteColor>(
        &self,
        out: &mut W,
        line_start: usize,
        address: usize,
        actual: &[u8],
        shadow: &[u8],
        differs: bool,
    ) -> io::Result<()> {
        write!(out, "{} {:#018x} | ", if differs { '*' } else { ' ' }, line_start)?;
        if self.config.area.shows_actual() {
            self.print_column(out, line_start, address, actual, shadow, Column::Actual)?;
        }
        if self.config.area == DumpArea::Both {
            write!(out, " | ")?;
        }
        if self.config.area.shows_shadow() {
            self.print_column(out, line_start, address, actual, shadow, Column::Shadow)?;
        }
        writeln!(out)
    }

    fn print_column<W: WriteColor>(
        &self,
        out: &mut W,
        line_start: usize,
        address: usize,
        actual: &[u8],
        shadow: &[u8],
        column: Column,
    ) -> io::Result<()> {
        let offsets = (line_start..line_start.saturating_add(self.width()))
            .map(|abs| abs.checked_sub(address).filter(|&offset| offset < actual.len()));

        for offset in offsets.clone() {
            match offset {
                Some(offset) => {
                    let byte = match column {
                        Column::Actual => actual[offset],
                        Column::Shadow => shadow[offset],
                    };
                    if actual[offset] != shadow[offset] {
                        out.set_color(&self.highlight)?;
                        write!(out, "[{:02x}]", byte)?;
                        out.reset()?;
                    } else {
                        write!(out, " {:02x} ", byte)?;
                    }
                }
                None => write!(out, "    ")?,
            }
        }

        write!(out, " | ")?;
        for offset in offsets {
            let ch = match offset {
                Some(offset) => {
                    let byte = match column {
                        Column::Actual => actual[offset],
                        Column::Shadow => shadow[offset],
                    };
                    if byte.is_ascii_graphic() || byte == b' ' {
                        byte as char
                    } else {
                        '.'
                    }
                }
                None => ' ',
            };
            write!(out, "{}", ch)?;
        }
        Ok(())
    }
}

/// Writes corruption reports
pub struct DiagnosticReporter<W> {
    out: W,
    dump: DumpConfig,
    backtrace: bool,
}

impl<W: WriteColor> DiagnosticReporter<W> {
    pub fn new(out: W, dump: DumpConfig) -> Self {
        Self {
            out,
            dump,
            backtrace: true,
        }
    }

    /// Skip the backtrace section
    pub fn without_backtrace(mut self) -> Self {
        self.backtrace = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Write the full report
    pub fn report(&mut self, report: &CorruptionReport) -> io::Result<()> {
        let out = &mut self.out;
        writeln!(out, "SHADOW STACK REPORT")?;
        writeln!(out)?;
        writeln!(out, "During {}:", report.phase.label())?;
        for (index, dump) in report.frames.iter().enumerate() {
            writeln!(
                out,
                "  position {:>10}, size {:>10}, callee {}",
                dump.frame.position, dump.frame.size, dump.frame.callee
            )?;
            if index == 0 && report.frames.len() > 1 {
                writeln!(out, "NEXT SHADOW FRAMES (recent first):")?;
            }
        }

        writeln!(
            out,
            "Corrupted frames ({} differing bytes, first at position {}):",
            report.differing_bytes, report.first_difference
        )?;
        for frame in &report.corrupted_frames {
            writeln!(out, "  callee {}", frame.callee)?;
        }
        writeln!(out)?;

        let printer = DumpPrinter::new(&self.dump);
        printer.print_header(out)?;
        for dump in &report.frames {
            writeln!(out, "frame of: {}", dump.frame.callee)?;
            printer.dump(out, dump.address, &dump.actual, &dump.shadow)?;
        }

        if self.backtrace {
            writeln!(out)?;
            writeln!(out, "backtrace:")?;
            let frames = stack_unwind::capture();
            stack_unwind::write_backtrace(out, &frames)?;
        }
        out.flush()
    }
}
