//! Log truncation for prompt assembly.
//!
//! When a run produced more lines than the user's budget, a synthetic
//! marker line replaces the omitted region:
//!
//! - `head`  — keep the first `max_lines`, marker appended.
//! - `tail`  — marker prepended, keep the last `max_lines`.
//! - `smart` — keep the first 40% and the last 60% of the budget with
//!   the marker between.

use rt_domain::settings::TruncateStrategy;
use rt_protocol::LineRecord;

fn marker(omitted: usize) -> String {
    format!("... [{omitted} lines omitted] ...")
}

/// Render `lines` as prompt content, truncated to `max_lines`.
pub fn truncate_lines(
    lines: &[LineRecord],
    max_lines: usize,
    strategy: TruncateStrategy,
) -> String {
    if max_lines == 0 || lines.len() <= max_lines {
        return join(lines.iter());
    }

    let omitted = lines.len() - max_lines;
    match strategy {
        TruncateStrategy::Head => {
            let mut out = join(lines[..max_lines].iter());
            out.push('\n');
            out.push_str(&marker(omitted));
            out
        }
        TruncateStrategy::Tail => {
            let mut out = marker(omitted);
            out.push('\n');
            out.push_str(&join(lines[lines.len() - max_lines..].iter()));
            out
        }
        TruncateStrategy::Smart => {
            let head = (max_lines * 2) / 5;
            let tail = max_lines - head;
            let mut out = join(lines[..head].iter());
            if head > 0 {
                out.push('\n');
            }
            out.push_str(&marker(omitted));
            out.push('\n');
            out.push_str(&join(lines[lines.len() - tail..].iter()));
            out
        }
    }
}

fn join<'a>(lines: impl Iterator<Item = &'a LineRecord>) -> String {
    lines
        .map(|l| l.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
