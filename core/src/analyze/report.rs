use std::fmt::Write;

use yansi::{Condition, Paint};

use super::{PartitionAnalysisResult, Verdict};

/// Renders a human-readable summary of a partition analysis listing at most
/// `limit` of the largest partitions
pub fn render(result: &PartitionAnalysisResult, limit: usize, colored: bool) -> String {
    let cond = if colored {
        Condition::ALWAYS
    } else {
        Condition::NEVER
    };

    let mut out = String::new();
    let _ = writeln!(out, "{}", "Partition analysis".bold().whenever(cond));
    let _ = writeln!(out, "  partitions:          {}", result.partition_count);
    let _ = writeln!(out, "  rows:                {}", result.total_rows);
    let _ = writeln!(
        out,
        "  rows per partition:  min {}, mean {:.1}, max {}",
        result.min_rows, result.mean_rows, result.max_rows
    );
    let _ = writeln!(out, "  skew ratio:          {:.2}", result.skew_ratio);

    let shown = result.largest_partitions.iter().take(limit).collect::<Vec<_>>();
    if !shown.is_empty() {
        let width = shown.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "Largest partitions".bold().whenever(cond));
        for (key, rows) in &shown {
            let share = if result.total_rows > 0 {
                *rows as f64 * 100.0 / result.total_rows as f64
            } else {
                0.0
            };
            let _ = writeln!(out, "  {key:<width$}  {rows:>10}  ({share:.1}%)");
        }
        let hidden = result.partition_count.saturating_sub(shown.len());
        if hidden > 0 {
            let _ = writeln!(
                out,
                "  ... {hidden} more partition{}",
                if hidden == 1 { "" } else { "s" }
            );
        }
    }

    if !result.warnings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", "Warnings".bold().whenever(cond));
        for w in &result.warnings {
            let line = format!("{w}. {}", w.remediation());
            if w.is_blocking() {
                let _ = writeln!(out, "  {} {}", "✗".red().whenever(cond), line.red().whenever(cond));
            } else {
                let _ = writeln!(
                    out,
                    "  {} {}",
                    "!".yellow().whenever(cond),
                    line.yellow().whenever(cond)
                );
            }
        }
    }

    if result.verdict(false) == Verdict::Block {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{}",
            "Partitioning will be refused unless forced."
                .red()
                .bold()
                .whenever(cond)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use assertor::{assert_that, StringAssertion};

    use crate::analyze::{PartitionCounter, SkewPolicy};

    use super::render;

    #[test]
    fn plain_report() {
        let mut c = PartitionCounter::new(None);
        for (k, n) in [("0300", 3), ("0211", 2), ("0210", 1)] {
            for _ in 0..n {
                c.add(Some(k));
            }
        }
        let r = c.finish(&SkewPolicy::default(), 10);
        let s = render(&r, 2, false);
        assert_that!(s).contains("partitions:          3");
        assert_that!(s).contains("rows:                6");
        assert_that!(s).contains("0300           3  (50.0%)");
        assert_that!(s).contains("... 1 more partition\n");
        assert_that!(s).contains("! 3 of 3 partitions have fewer than 100 rows.");
        assert_that!(s).does_not_contain("\u{1b}[");
    }

    #[test]
    fn blocked_report() {
        let mut c = PartitionCounter::new(None);
        for i in 0..5 {
            c.add(Some(i.to_string().as_str()));
        }
        let policy = SkewPolicy {
            max_partitions: 2,
            ..Default::default()
        };
        let s = render(&c.finish(&policy, 10), 10, false);
        assert_that!(s).contains("✗ 5 partitions exceed the limit of 2.");
        assert_that!(s).contains("refused unless forced");
    }
}
