//! Terminal progress output.

use std::io::{self, Write};

use bytes::Bytes;
use colored::Colorize;

/// Keys between progress counter refreshes.
const PROGRESS_INTERVAL: u64 = 1000;

/// Prints a running key count, or every key in verbose mode.
pub struct Progress {
    verbose: bool,
    count: u64,
    out: io::Stdout,
}

impl Progress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            count: 0,
            out: io::stdout(),
        }
    }

    /// Note one processed key; `count` is the running total.
    pub fn record(&mut self, key: &Bytes, count: u64) {
        self.count = count;
        let mut out = self.out.lock();
        // Progress output is best effort; a closed stdout must not stop the copy.
        if self.verbose {
            let _ = writeln!(out, "{}", String::from_utf8_lossy(key));
        } else if count % PROGRESS_INTERVAL == 0 {
            let _ = write!(out, "\r{}", count);
            let _ = out.flush();
        }
    }

    /// Print the final tally.
    pub fn finish(&mut self) {
        let mut out = self.out.lock();
        if !self.verbose && self.count >= PROGRESS_INTERVAL {
            let _ = writeln!(out);
        }
        let _ = writeln!(
            out,
            "{} processed {} keys",
            "✓".green(),
            self.count.to_string().bold()
        );
    }
}
