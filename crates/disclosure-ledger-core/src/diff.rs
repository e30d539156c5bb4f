//! Section alignment, similarity scoring and rendering diffs between two versions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::skeleton::{SECTIONS_KEY, SECTION_TEXT};

pub const DEFAULT_MAX_EDIT_DISTANCE: usize = 4096;
/// Largest accepted Myers bound. The edit trace kept for backtracking grows with the
/// square of the bound: roughly 8 * D^2 bytes, about 134 MB at this ceiling.
pub const MAX_EDIT_DISTANCE_CEILING: usize = 4096;
/// Largest token grid `similarity` fills for its LCS once common ends are stripped;
/// bigger inputs are scored by token overlap instead.
pub const MAX_SIMILARITY_CELLS: usize = 4_000_000;
pub const DEFAULT_LOW_SIMILARITY_THRESHOLD: u8 = 60;

/// Split text into diff tokens: runs of ASCII digits, runs of ASCII letters, and
/// every other character (CJK ideographs, punctuation, whitespace) on its own.
#[must_use]
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        let mut end = start + ch.len_utf8();
        let run_class: Option<fn(&char) -> bool> = if ch.is_ascii_digit() {
            Some(char::is_ascii_digit)
        } else if ch.is_ascii_alphabetic() {
            Some(char::is_ascii_alphabetic)
        } else {
            None
        };
        if let Some(same_class) = run_class {
            while let Some((index, next)) = chars.next_if(|(_, next)| same_class(next)) {
                end = index + next.len_utf8();
            }
        }
        tokens.push(&text[start..end]);
    }
    tokens
}

/// Characters a token contributes to similarity; punctuation and whitespace count 0.
fn content_len(token: &str) -> usize {
    match token.chars().next() {
        Some(first) if first.is_alphanumeric() => token.chars().count(),
        _ => 0,
    }
}

/// 0..=100 similarity of two texts over CJK-aware tokens.
#[must_use]
pub fn similarity(old: &str, new: &str) -> u8 {
    if old.is_empty() && new.is_empty() {
        return 100;
    }
    if old.is_empty() || new.is_empty() {
        return 0;
    }

    let old_tokens = tokenize(old);
    let new_tokens = tokenize(new);
    let total = old_tokens.iter().chain(&new_tokens).map(|token| content_len(token)).sum::<usize>();
    if total == 0 {
        return 100;
    }

    let common = weighted_common_len(&old_tokens, &new_tokens);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = ((200 * common) as f64 / total as f64).round() as u8;
    score.min(100)
}

/// Longest common subsequence weighted by [`content_len`].
///
/// Shared leading and trailing tokens are always part of it; the LCS table is only
/// filled for the differing middle and only while it stays within
/// [`MAX_SIMILARITY_CELLS`]. Past that the weighted token overlap is used, which
/// never scores below the exact LCS.
fn weighted_common_len(old: &[&str], new: &[&str]) -> usize {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let shared = old[..prefix]
        .iter()
        .chain(&old[old.len() - suffix..])
        .map(|token| content_len(token))
        .sum::<usize>();
    let old_middle = &old[prefix..old.len() - suffix];
    let new_middle = &new[prefix..new.len() - suffix];

    if old_middle.len().saturating_mul(new_middle.len()) > MAX_SIMILARITY_CELLS {
        tracing::debug!(
            old_tokens = old_middle.len(),
            new_tokens = new_middle.len(),
            "similarity grid too large; scoring by token overlap"
        );
        return shared + weighted_overlap(old_middle, new_middle);
    }
    shared + weighted_lcs(old_middle, new_middle)
}

fn weighted_lcs(old: &[&str], new: &[&str]) -> usize {
    let mut previous = vec![0_usize; new.len() + 1];
    let mut current = vec![0_usize; new.len() + 1];
    for old_token in old {
        for (j, new_token) in new.iter().enumerate() {
            let skip = previous[j + 1].max(current[j]);
            current[j + 1] = if old_token == new_token {
                skip.max(previous[j] + content_len(old_token))
            } else {
                skip
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[new.len()]
}

/// Weighted size of the multiset intersection of the two token lists.
fn weighted_overlap(old: &[&str], new: &[&str]) -> usize {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for token in old {
        *remaining.entry(*token).or_default() += 1;
    }
    new.iter()
        .filter(|token| match remaining.get_mut(**token) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        })
        .map(|token| content_len(token))
        .sum()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSpan {
    pub value: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub added: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
}

impl DiffSpan {
    fn equal(value: String) -> Self {
        Self { value, added: false, removed: false }
    }

    fn added(value: String) -> Self {
        Self { value, added: true, removed: false }
    }

    fn removed(value: String) -> Self {
        Self { value, added: false, removed: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone)]
struct Chunk {
    op: Op,
    tokens: Vec<u32>,
}

/// Ordered rendering spans turning `old` into `new`.
///
/// The Myers search gives up after `max_edit_distance` edits, clamped to
/// [`MAX_EDIT_DISTANCE_CEILING`]; the differing middle is then reported as one
/// removed span followed by one added span.
#[must_use]
pub fn render_diff(old: &str, new: &str, max_edit_distance: usize) -> Vec<DiffSpan> {
    let max_edit_distance = max_edit_distance.min(MAX_EDIT_DISTANCE_CEILING);
    if old.is_empty() && new.is_empty() {
        return Vec::new();
    }
    if old.is_empty() {
        return vec![DiffSpan::added(new.to_string())];
    }
    if new.is_empty() {
        return vec![DiffSpan::removed(old.to_string())];
    }

    let mut vocabulary: Vec<&str> = Vec::new();
    let mut ids: HashMap<&str, u32> = HashMap::new();
    let old_ids = encode_tokens(&tokenize(old), &mut vocabulary, &mut ids);
    let new_ids = encode_tokens(&tokenize(new), &mut vocabulary, &mut ids);

    let mut chunks = diff_ids(&old_ids, &new_ids, max_edit_distance);
    cleanup_semantic(&mut chunks);

    chunks
        .into_iter()
        .map(|chunk| {
            let value = chunk.tokens.iter().map(|id| vocabulary[*id as usize]).collect::<String>();
            match chunk.op {
                Op::Equal => DiffSpan::equal(value),
                Op::Delete => DiffSpan::removed(value),
                Op::Insert => DiffSpan::added(value),
            }
        })
        .collect()
}

fn encode_tokens<'a>(
    tokens: &[&'a str],
    vocabulary: &mut Vec<&'a str>,
    ids: &mut HashMap<&'a str, u32>,
) -> Vec<u32> {
    tokens
        .iter()
        .map(|token| {
            *ids.entry(*token).or_insert_with(|| {
                vocabulary.push(*token);
                u32::try_from(vocabulary.len() - 1).unwrap_or(u32::MAX)
            })
        })
        .collect()
}

fn diff_ids(old: &[u32], new: &[u32], max_edit_distance: usize) -> Vec<Chunk> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_middle = &old[prefix..old.len() - suffix];
    let new_middle = &new[prefix..new.len() - suffix];

    let mut chunks = Vec::new();
    push_run(&mut chunks, Op::Equal, &old[..prefix]);
    match myers(old_middle, new_middle, max_edit_distance) {
        Some(ops) => {
            let (mut x, mut y) = (0, 0);
            for op in ops {
                match op {
                    Op::Equal => {
                        push_token(&mut chunks, op, old_middle[x]);
                        x += 1;
                        y += 1;
                    }
                    Op::Delete => {
                        push_token(&mut chunks, op, old_middle[x]);
                        x += 1;
                    }
                    Op::Insert => {
                        push_token(&mut chunks, op, new_middle[y]);
                        y += 1;
                    }
                }
            }
        }
        None => {
            tracing::debug!(
                old_tokens = old_middle.len(),
                new_tokens = new_middle.len(),
                max_edit_distance,
                "edit distance bound exceeded; rendering as replacement"
            );
            push_run(&mut chunks, Op::Delete, old_middle);
            push_run(&mut chunks, Op::Insert, new_middle);
        }
    }
    push_run(&mut chunks, Op::Equal, &old[old.len() - suffix..]);
    chunks
}

fn push_token(chunks: &mut Vec<Chunk>, op: Op, token: u32) {
    match chunks.last_mut() {
        Some(last) if last.op == op => last.tokens.push(token),
        _ => chunks.push(Chunk { op, tokens: vec![token] }),
    }
}

fn push_run(chunks: &mut Vec<Chunk>, op: Op, tokens: &[u32]) {
    for token in tokens {
        push_token(chunks, op, *token);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Insert,
    Delete,
}

/// Pick the furthest-reaching in-bounds predecessor for diagonal `k` in round `d`.
/// `v` is indexed `k + offset` and holds `-1` for unreachable diagonals.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn choose_move(v: &[isize], offset: isize, k: isize, d: isize, n: isize, m: isize) -> Option<(Move, isize)> {
    let at = |diagonal: isize| v[(diagonal + offset) as usize];

    let insert = if k == -d || k < d {
        let x = at(k + 1);
        (x >= 0 && x - k <= m).then_some(x)
    } else {
        None
    };
    let delete = if k > -d {
        let x = at(k - 1) + 1;
        (x >= 1 && x <= n).then_some(x)
    } else {
        None
    };

    match (insert, delete) {
        (Some(down), Some(right)) if down > right => Some((Move::Insert, down)),
        (_, Some(right)) => Some((Move::Delete, right)),
        (Some(down), None) => Some((Move::Insert, down)),
        (None, None) => None,
    }
}

/// Shortest edit script between `a` and `b`, `None` when it needs more than `max_d` edits.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn myers(a: &[u32], b: &[u32], max_d: usize) -> Option<Vec<Op>> {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let limit = max_d.min(a.len() + b.len()) as isize;
    let offset = limit + 1;
    let mut v = vec![-1_isize; (2 * limit + 3) as usize];
    v[(offset + 1) as usize] = 0;
    let mut trace: Vec<Vec<isize>> = Vec::new();

    for d in 0..=limit {
        trace.push(v[(offset - d - 1) as usize..=(offset + d + 1) as usize].to_vec());
        let mut k = -d;
        while k <= d {
            let index = (k + offset) as usize;
            match choose_move(&v, offset, k, d, n, m) {
                Some((_, start)) => {
                    let mut x = start;
                    let mut y = x - k;
                    while x < n && y < m && a[x as usize] == b[y as usize] {
                        x += 1;
                        y += 1;
                    }
                    v[index] = x;
                    if x == n && y == m {
                        return Some(backtrack(&trace, n, m));
                    }
                }
                None => v[index] = -1,
            }
            k += 2;
        }
    }
    None
}

#[allow(clippy::cast_possible_wrap)]
fn backtrack(trace: &[Vec<isize>], n: isize, m: isize) -> Vec<Op> {
    let mut ops = Vec::new();
    let (mut x, mut y) = (n, m);
    for (d, v) in trace.iter().enumerate().rev() {
        let d = d as isize;
        let offset = d + 1;
        let k = x - y;
        let Some((step, _)) = choose_move(v, offset, k, d, n, m) else {
            break;
        };
        let previous_k = match step {
            Move::Insert => k + 1,
            Move::Delete => k - 1,
        };
        let previous_x = v[usize::try_from(previous_k + offset).unwrap_or_default()];
        let previous_y = previous_x - previous_k;
        let (mid_x, mid_y) = match step {
            Move::Insert => (previous_x, previous_y + 1),
            Move::Delete => (previous_x + 1, previous_y),
        };
        while x > mid_x && y > mid_y {
            ops.push(Op::Equal);
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            ops.push(match step {
                Move::Insert => Op::Insert,
                Move::Delete => Op::Delete,
            });
        }
        x = previous_x;
        y = previous_y;
    }
    ops.reverse();
    ops
}

/// Fold short equalities that sit between larger edits into those edits, then merge
/// neighbouring chunks so each changed region is one deletion and one insertion.
fn cleanup_semantic(chunks: &mut Vec<Chunk>) {
    let mut changed = false;
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<usize> = None;
    let (mut inserted_before, mut deleted_before) = (0_usize, 0_usize);
    let (mut inserted_after, mut deleted_after) = (0_usize, 0_usize);

    let mut pointer = 0_usize;
    while pointer < chunks.len() {
        let chunk_len = chunks[pointer].tokens.len();
        if chunks[pointer].op == Op::Equal {
            equalities.push(pointer);
            inserted_before = inserted_after;
            deleted_before = deleted_after;
            inserted_after = 0;
            deleted_after = 0;
            last_equality = Some(chunk_len);
            pointer += 1;
            continue;
        }

        if chunks[pointer].op == Op::Insert {
            inserted_after += chunk_len;
        } else {
            deleted_after += chunk_len;
        }

        let collapsible = last_equality.is_some_and(|equality_len| {
            equality_len <= inserted_before.max(deleted_before)
                && equality_len <= inserted_after.max(deleted_after)
        });
        if let (true, Some(&equality_index)) = (collapsible, equalities.last()) {
            let tokens = chunks[equality_index].tokens.clone();
            chunks[equality_index].op = Op::Insert;
            chunks.insert(equality_index, Chunk { op: Op::Delete, tokens });
            equalities.pop();
            equalities.pop();
            inserted_before = 0;
            deleted_before = 0;
            inserted_after = 0;
            deleted_after = 0;
            last_equality = None;
            changed = true;
            pointer = equalities.last().map_or(0, |index| index + 1);
            continue;
        }
        pointer += 1;
    }

    if changed {
        tracing::trace!(chunks = chunks.len(), "collapsed short equalities");
    }
    merge_chunks(chunks);
}

fn merge_chunks(chunks: &mut Vec<Chunk>) {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut deleted: Vec<u32> = Vec::new();
    let mut inserted: Vec<u32> = Vec::new();

    let flush = |merged: &mut Vec<Chunk>, deleted: &mut Vec<u32>, inserted: &mut Vec<u32>| {
        if !deleted.is_empty() {
            merged.push(Chunk { op: Op::Delete, tokens: std::mem::take(deleted) });
        }
        if !inserted.is_empty() {
            merged.push(Chunk { op: Op::Insert, tokens: std::mem::take(inserted) });
        }
    };

    for chunk in chunks.drain(..) {
        match chunk.op {
            Op::Delete => deleted.extend(chunk.tokens),
            Op::Insert => inserted.extend(chunk.tokens),
            Op::Equal => {
                flush(&mut merged, &mut deleted, &mut inserted);
                if chunk.tokens.is_empty() {
                    continue;
                }
                match merged.last_mut() {
                    Some(last) if last.op == Op::Equal => last.tokens.extend(chunk.tokens),
                    _ => merged.push(chunk),
                }
            }
        }
    }
    flush(&mut merged, &mut deleted, &mut inserted);
    *chunks = merged;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffOptions {
    pub excluded_titles: Vec<String>,
    pub excluded_title_fragments: Vec<String>,
    pub low_similarity_threshold: u8,
    pub max_edit_distance: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            excluded_titles: vec!["标题".to_string()],
            excluded_title_fragments: vec!["年度报告".to_string()],
            low_similarity_threshold: DEFAULT_LOW_SIMILARITY_THRESHOLD,
            max_edit_distance: DEFAULT_MAX_EDIT_DISTANCE,
        }
    }
}

impl DiffOptions {
    fn is_excluded(&self, title: &str) -> bool {
        self.excluded_titles.iter().any(|excluded| excluded == title)
            || self.excluded_title_fragments.iter().any(|fragment| title.contains(fragment.as_str()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SectionChange {
    Matched,
    Deleted,
    Inserted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionDiff {
    pub title: String,
    pub change: SectionChange,
    pub old_type: Option<String>,
    pub new_type: Option<String>,
    /// Present for matched text sections only.
    pub similarity: Option<u8>,
    pub counted_in_average: bool,
    pub low_similarity: bool,
    pub spans: Vec<DiffSpan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffResult {
    /// Rounded mean over counted text sections, 0 when none qualify.
    pub similarity: u8,
    pub text_sections_compared: usize,
    pub sections: Vec<SectionDiff>,
}

struct AlignedSection<'a> {
    title: String,
    old: Option<&'a Value>,
    new: Option<&'a Value>,
}

fn sections_of(report: &Value) -> &[Value] {
    report.get(SECTIONS_KEY).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

fn title_of(section: &Value) -> String {
    section.get("title").and_then(Value::as_str).unwrap_or_default().to_string()
}

fn type_of(section: &Value) -> Option<String> {
    section.get("type").and_then(Value::as_str).map(str::to_string)
}

fn text_content(section: &Value) -> &str {
    section.get("content").and_then(Value::as_str).unwrap_or_default()
}

fn is_text(section: Option<&Value>) -> bool {
    section.and_then(|section| section.get("type")).and_then(Value::as_str) == Some(SECTION_TEXT)
}

/// Align two reports' sections by exact title and diff every matched text pair.
#[must_use]
pub fn diff_reports(old: &Value, new: &Value, options: &DiffOptions) -> DiffResult {
    let mut aligned = sections_of(old)
        .iter()
        .map(|section| AlignedSection { title: title_of(section), old: Some(section), new: None })
        .collect::<Vec<_>>();

    for section in sections_of(new) {
        let title = title_of(section);
        match aligned.iter_mut().find(|entry| entry.new.is_none() && entry.title == title) {
            Some(entry) => entry.new = Some(section),
            None => aligned.push(AlignedSection { title, old: None, new: Some(section) }),
        }
    }

    let mut total_similarity = 0_u32;
    let mut compared = 0_u32;
    let sections = aligned
        .into_iter()
        .map(|entry| {
            let change = match (entry.old, entry.new) {
                (Some(_), Some(_)) => SectionChange::Matched,
                (Some(_), None) => SectionChange::Deleted,
                _ => SectionChange::Inserted,
            };
            let mut diff = SectionDiff {
                old_type: entry.old.and_then(type_of),
                new_type: entry.new.and_then(type_of),
                title: entry.title,
                change,
                similarity: None,
                counted_in_average: false,
                low_similarity: false,
                spans: Vec::new(),
            };

            if let (Some(old_section), Some(new_section)) = (entry.old, entry.new) {
                if is_text(entry.old) && is_text(entry.new) {
                    let (old_text, new_text) = (text_content(old_section), text_content(new_section));
                    let score = similarity(old_text, new_text);
                    diff.similarity = Some(score);
                    diff.low_similarity = score < options.low_similarity_threshold;
                    diff.spans = render_diff(old_text, new_text, options.max_edit_distance);
                    if !options.is_excluded(&diff.title) {
                        diff.counted_in_average = true;
                        total_similarity += u32::from(score);
                        compared += 1;
                    }
                }
            }
            diff
        })
        .collect::<Vec<_>>();

    // Integer mean rounded half up.
    let similarity = if compared == 0 {
        0
    } else {
        u8::try_from((2 * total_similarity + compared) / (2 * compared)).unwrap_or(100)
    };

    DiffResult { similarity, text_sections_compared: compared as usize, sections }
}
