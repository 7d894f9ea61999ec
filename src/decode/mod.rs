//! Result decoding
//!
//! Splits the flat `[batch_size, K]` output into per-image score rows and
//! ranks each row with a full argsort: descending score, ties broken by the
//! lower class index, NaN last. A full sort is fine for a few thousand
//! classes; very large class counts would want a partial selection instead.

mod labels;

pub use labels::LabelTable;

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{BatchrError, BatchrResult};

/// One entry of a ranking: a score and the class it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ranked {
    pub score: f32,
    pub index: usize,
}

/// Total order used for ranking
pub fn rank_order(a: &Ranked, b: &Ranked) -> Ordering {
    let by_score = match (a.score.is_nan(), b.score.is_nan()) {
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
    };
    by_score.then(a.index.cmp(&b.index))
}

/// Classes of one image ordered from most to least likely
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    entries: Vec<Ranked>,
}

impl Ranking {
    /// The predicted class
    pub fn top(&self) -> Option<Ranked> {
        self.entries.first().copied()
    }

    /// The `k` best entries (fewer if the row is shorter)
    pub fn top_k(&self, k: usize) -> &[Ranked] {
        &self.entries[..k.min(self.entries.len())]
    }

    pub fn entries(&self) -> &[Ranked] {
        &self.entries
    }

    /// Class indices in rank order
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|r| r.index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Rank `scores` without touching them.
pub fn argsort_desc(scores: &[f32]) -> Ranking {
    let mut entries: Vec<Ranked> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| Ranked { score, index })
        .collect();
    entries.sort_by(rank_order);
    Ranking { entries }
}

/// Rank the first `count` rows of a `[batch_size, K]` output.
///
/// Rows past `count` are padding and are never looked at.
pub fn rank_batch(output: &[f32], batch_size: usize, count: usize) -> BatchrResult<Vec<Ranking>> {
    if batch_size == 0 {
        return Err(BatchrError::Decode("batch size is zero".into()));
    }
    if output.len() % batch_size != 0 {
        return Err(BatchrError::Decode(format!(
            "output length {} is not a multiple of batch size {}",
            output.len(),
            batch_size
        )));
    }
    let num_classes = output.len() / batch_size;
    if num_classes == 0 {
        return Err(BatchrError::Decode("output holds no class scores".into()));
    }
    if count > batch_size {
        return Err(BatchrError::Decode(format!(
            "{count} images cannot fit a batch of {batch_size}"
        )));
    }

    Ok(output
        .chunks_exact(num_classes)
        .take(count)
        .map(argsort_desc)
        .collect())
}

/// A labelled class score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelScore {
    pub index: usize,
    pub label: String,
    pub score: f32,
}

/// The decoded result for one input image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub path: PathBuf,
    /// Best entries first; the first one is the top-1 prediction
    pub classes: Vec<LabelScore>,
}

impl Prediction {
    pub fn top(&self) -> Option<&LabelScore> {
        self.classes.first()
    }
}

/// Decode one prediction per entry of `paths`, keeping `top_k` classes each.
pub fn decode_batch(
    output: &[f32],
    batch_size: usize,
    paths: &[PathBuf],
    labels: &LabelTable,
    top_k: usize,
) -> BatchrResult<Vec<Prediction>> {
    let rankings = rank_batch(output, batch_size, paths.len())?;
    let num_classes = output.len() / batch_size;
    if num_classes != labels.len() {
        tracing::warn!(
            "Model produces {} classes but the label table has {} entries",
            num_classes,
            labels.len()
        );
    }

    Ok(rankings
        .iter()
        .zip(paths)
        .map(|(ranking, path)| Prediction {
            path: path.clone(),
            classes: ranking
                .top_k(top_k)
                .iter()
                .map(|r| LabelScore {
                    index: r.index,
                    label: labels.label(r.index),
                    score: r.score,
                })
                .collect(),
        })
        .collect())
}
