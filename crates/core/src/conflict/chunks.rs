//! Line-level conflict chunk computation.
//!
//! Produces the raw conflict rows the extractor consumes, for providers whose
//! merge machinery only reports *that* a path conflicts. Zero-context `diffy`
//! hunks from base to each side are grouped by overlapping base ranges, the
//! same way diff3 does it.

use diffy::DiffOptions;
use tracing::debug;

/// One change of a side relative to base. All ranges are 0-based, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edit {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

impl Edit {
    fn delta(&self) -> isize {
        (self.side_end - self.side_start) as isize - (self.base_end - self.base_start) as isize
    }
}

/// Start lines of one conflict block in the ours and theirs versions.
///
/// Each line number counts in that side's own file, not in the merged text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// 1-based first line of the block in ours.
    pub ours_start: usize,
    /// 1-based first line of the block in theirs.
    pub theirs_start: usize,
    /// 1-based line just past the block in theirs.
    pub end: usize,
}

impl ChunkSpan {
    /// Encode as a raw row for a `[ours, theirs]` merged-commit list.
    pub fn to_row(self) -> Vec<i64> {
        vec![self.ours_start as i64, self.theirs_start as i64, self.end as i64]
    }
}

/// Compute the conflicting blocks between `ours` and `theirs` relative to `base`.
///
/// Changes that touch or overlap in base are grouped. A group only conflicts
/// when both sides contributed to it and their resulting text differs.
pub fn conflict_chunks(base: &str, ours: &str, theirs: &str) -> Vec<ChunkSpan> {
    let ours_edits = edits(base, ours);
    let theirs_edits = edits(base, theirs);
    let ours_lines: Vec<&str> = ours.split_inclusive('\n').collect();
    let theirs_lines: Vec<&str> = theirs.split_inclusive('\n').collect();

    let mut spans = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    let (mut ours_delta, mut theirs_delta) = (0isize, 0isize);

    while i < ours_edits.len() || j < theirs_edits.len() {
        let take_ours = match (ours_edits.get(i), theirs_edits.get(j)) {
            (Some(o), Some(t)) => o.base_start <= t.base_start,
            (Some(_), None) => true,
            _ => false,
        };
        let first = if take_ours { ours_edits[i] } else { theirs_edits[j] };
        let lo = first.base_start;
        let mut hi = first.base_end;

        let (group_i, group_j) = (i, j);
        loop {
            let mut grew = false;
            while let Some(e) = ours_edits.get(i) {
                if e.base_start > hi {
                    break;
                }
                hi = hi.max(e.base_end);
                i += 1;
                grew = true;
            }
            while let Some(e) = theirs_edits.get(j) {
                if e.base_start > hi {
                    break;
                }
                hi = hi.max(e.base_end);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        let ours_group = &ours_edits[group_i..i];
        let theirs_group = &theirs_edits[group_j..j];
        let ours_inner: isize = ours_group.iter().map(Edit::delta).sum();
        let theirs_inner: isize = theirs_group.iter().map(Edit::delta).sum();

        if !ours_group.is_empty() && !theirs_group.is_empty() {
            let ours_start = offset(lo, ours_delta);
            let ours_end = offset(hi, ours_delta + ours_inner);
            let theirs_start = offset(lo, theirs_delta);
            let theirs_end = offset(hi, theirs_delta + theirs_inner);

            let same = slice(&ours_lines, ours_start, ours_end)
                == slice(&theirs_lines, theirs_start, theirs_end);
            if same {
                debug!(base_start = lo, "both sides made the same change");
            } else {
                spans.push(ChunkSpan {
                    ours_start: ours_start + 1,
                    theirs_start: theirs_start + 1,
                    end: theirs_end + 1,
                });
            }
        }

        ours_delta += ours_inner;
        theirs_delta += theirs_inner;
    }

    spans
}

fn edits(base: &str, side: &str) -> Vec<Edit> {
    let mut options = DiffOptions::new();
    options.set_context_len(0);
    let patch = options.create_patch(base, side);

    patch
        .hunks()
        .iter()
        .map(|hunk| {
            let old = hunk.old_range();
            let new = hunk.new_range();
            // Unified ranges are 1-based; an empty range names the line before it.
            let base_start = if old.len() == 0 { old.start() } else { old.start() - 1 };
            let side_start = if new.len() == 0 { new.start() } else { new.start() - 1 };
            Edit {
                base_start,
                base_end: base_start + old.len(),
                side_start,
                side_end: side_start + new.len(),
            }
        })
        .collect()
}

fn offset(line: usize, delta: isize) -> usize {
    (line as isize + delta).max(0) as usize
}

fn slice<'a>(lines: &'a [&'a str], start: usize, end: usize) -> &'a [&'a str] {
    let end = end.min(lines.len());
    let start = start.min(end);
    &lines[start..end]
}
