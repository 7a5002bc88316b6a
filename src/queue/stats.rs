//! Read-only statistics snapshot.

use std::fmt::{self, Write};
use std::path::PathBuf;

/// Point-in-time counters for one queue, consumed by an external reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Items visible to consumers: enqueued plus returned.
    pub items: u64,
    /// Items currently checked out by a consumer.
    pub open: u64,
    /// Items returned for redelivery.
    pub returned: u64,
    /// Live chunk records in the journal.
    pub chunks: u64,
    /// Location of the backing journal.
    pub journal_path: PathBuf,
}

impl Stats {
    /// Render as `STAT queue_<name>_<field> <value>` lines.
    pub fn render(&self, name: &str, out: &mut impl Write) -> fmt::Result {
        writeln!(out, "STAT queue_{name}_items {}", self.items)?;
        writeln!(out, "STAT queue_{name}_open {}", self.open)?;
        writeln!(out, "STAT queue_{name}_returned {}", self.returned)?;
        writeln!(out, "STAT queue_{name}_chunks {}", self.chunks)?;
        writeln!(
            out,
            "STAT queue_{name}_journal {}",
            self.journal_path.display()
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_counter() {
        let stats = Stats {
            items: 3,
            open: 1,
            returned: 2,
            chunks: 5,
            journal_path: PathBuf::from("/tmp/work.redb"),
        };

        let mut out = String::new();
        stats.render("work", &mut out).unwrap();
        assert_eq!(
            out,
            "STAT queue_work_items 3\n\
             STAT queue_work_open 1\n\
             STAT queue_work_returned 2\n\
             STAT queue_work_chunks 5\n\
             STAT queue_work_journal /tmp/work.redb\n"
        );
    }
}
