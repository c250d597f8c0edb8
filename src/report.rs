//! Printing results as two right-aligned columns.

use std::io::{self, Write};

use crate::measure::{Latency, Measurement};

const WIDTH: usize = 15;

/// Writes one line per measurement as soon as it is recorded.
pub struct Report<W: Write> {
    out: W,
}

impl<W: Write> Report<W> {
    pub fn new(out: W) -> Self {
        Report { out }
    }

    pub fn header(&mut self) -> io::Result<()> {
        writeln!(
            self.out,
            "{:>width$}\t{:>width$}",
            "size",
            "latency (cycles)",
            width = WIDTH
        )?;
        self.out.flush()
    }

    pub fn record(&mut self, m: &Measurement) -> io::Result<()> {
        match &m.latency {
            Latency::Cycles(cycles) => {
                writeln!(self.out, "{:>width$}\t{:>width$}", m.size, cycles, width = WIDTH)?
            }
            Latency::Unavailable(_) => writeln!(
                self.out,
                "{:>width$}\t{:>width$}",
                m.size,
                "unavailable",
                width = WIDTH
            )?,
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
