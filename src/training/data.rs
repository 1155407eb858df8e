//! Labeled few-shot datasets.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::core::SetFitError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub text: String,
    pub label: i64,
}

impl LabeledExample {
    pub fn new(text: impl Into<String>, label: i64) -> Self {
        Self {
            text: text.into(),
            label,
        }
    }
}

/// An ordered, read-only collection of labeled examples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    examples: Vec<LabeledExample>,
}

impl Dataset {
    pub fn new(examples: Vec<LabeledExample>) -> Self {
        Self { examples }
    }

    pub fn from_pairs<S: Into<String>>(pairs: impl IntoIterator<Item = (S, i64)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(text, label)| LabeledExample::new(text, label))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[LabeledExample] {
        &self.examples
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LabeledExample> {
        self.examples.iter()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.examples.iter().map(|e| e.text.as_str()).collect()
    }

    pub fn labels(&self) -> Vec<i64> {
        self.examples.iter().map(|e| e.label).collect()
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<i64> {
        self.class_counts().into_keys().collect()
    }

    pub fn class_counts(&self) -> BTreeMap<i64, usize> {
        let mut counts = BTreeMap::new();
        for example in &self.examples {
            *counts.entry(example.label).or_insert(0) += 1;
        }
        counts
    }

    /// Indices of the examples of each class, in dataset order.
    pub(crate) fn indices_by_class(&self) -> BTreeMap<i64, Vec<usize>> {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, example) in self.examples.iter().enumerate() {
            groups.entry(example.label).or_default().push(i);
        }
        groups
    }

    /// Keep at most `n` randomly chosen examples per class.
    ///
    /// Surviving examples keep their relative order.
    pub fn sample_per_class(&self, n: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut keep = Vec::new();
        for (_, mut indices) in self.indices_by_class() {
            indices.shuffle(&mut rng);
            keep.extend(indices.into_iter().take(n));
        }
        keep.sort_unstable();
        Self::new(keep.into_iter().map(|i| self.examples[i].clone()).collect())
    }

    /// Stratified split into `(train, test)`.
    ///
    /// Each class contributes `round(count * test_fraction)` examples to the
    /// test side, but at least one example of every class stays in train.
    pub fn train_test_split(&self, test_fraction: f64, seed: u64) -> anyhow::Result<(Self, Self)> {
        if !(0.0..1.0).contains(&test_fraction) {
            return Err(SetFitError::InvalidConfig(format!(
                "test_fraction must lie in [0, 1), got {test_fraction}"
            ))
            .into());
        }
        if self.is_empty() {
            return Err(SetFitError::EmptyDataset("source".into()).into());
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut train_idx = Vec::new();
        let mut test_idx = Vec::new();
        for (_, mut indices) in self.indices_by_class() {
            indices.shuffle(&mut rng);
            let n_test = ((indices.len() as f64 * test_fraction).round() as usize)
                .min(indices.len() - 1);
            test_idx.extend_from_slice(&indices[..n_test]);
            train_idx.extend_from_slice(&indices[n_test..]);
        }
        train_idx.sort_unstable();
        test_idx.sort_unstable();

        let pick = |idx: Vec<usize>| {
            Self::new(idx.into_iter().map(|i| self.examples[i].clone()).collect())
        };
        Ok((pick(train_idx), pick(test_idx)))
    }
}

impl FromIterator<LabeledExample> for Dataset {
    fn from_iter<I: IntoIterator<Item = LabeledExample>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a LabeledExample;
    type IntoIter = std::slice::Iter<'a, LabeledExample>;

    fn into_iter(self) -> Self::IntoIter {
        self.examples.iter()
    }
}
