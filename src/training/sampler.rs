//! Contrastive pair sampling.
//!
//! Every round walks the training set in order and emits, for each example,
//! one positive pair (another example of the same class) followed by one
//! negative pair (an example of any other class). Partners are drawn from
//! shuffled per-class decks so that within a round no partner repeats until
//! its deck is exhausted.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::core::SetFitError;
use crate::training::data::Dataset;

/// Two texts from the training set and whether they share a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledPair<'a> {
    pub text_a: &'a str,
    pub text_b: &'a str,
    pub is_same_class: bool,
}

impl SampledPair<'_> {
    /// Target cosine similarity for the pair.
    pub fn target(&self) -> f32 {
        if self.is_same_class {
            1.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairSampler {
    num_iterations: usize,
    seed: u64,
}

impl PairSampler {
    pub fn new(num_iterations: usize, seed: u64) -> Self {
        Self {
            num_iterations,
            seed,
        }
    }

    /// Validate that `train` can yield both positive and negative pairs.
    pub fn check(train: &Dataset) -> anyhow::Result<()> {
        let counts = train.class_counts();
        if counts.len() < 2 {
            return Err(SetFitError::InsufficientClassSamples(format!(
                "need at least 2 classes, found {}",
                counts.len()
            ))
            .into());
        }
        let thin: Vec<String> = counts
            .iter()
            .filter(|(_, &n)| n < 2)
            .map(|(label, n)| format!("{label} ({n})"))
            .collect();
        if !thin.is_empty() {
            return Err(SetFitError::InsufficientClassSamples(format!(
                "every class needs at least 2 examples; too few for {}",
                thin.join(", ")
            ))
            .into());
        }
        Ok(())
    }

    /// Returns exactly `2 * num_iterations * train.len()` pairs.
    pub fn sample<'a>(&self, train: &'a Dataset) -> anyhow::Result<Vec<SampledPair<'a>>> {
        Self::check(train)?;
        let examples = train.examples();
        let by_class = train.indices_by_class();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut pairs = Vec::with_capacity(2 * self.num_iterations * examples.len());

        for _ in 0..self.num_iterations {
            let mut positives: BTreeMap<i64, Deck> = by_class
                .iter()
                .map(|(&label, members)| (label, Deck::new(members.clone(), &mut rng)))
                .collect();
            let mut negatives: BTreeMap<i64, Deck> = by_class
                .keys()
                .map(|&label| {
                    let others = (0..examples.len())
                        .filter(|&i| examples[i].label != label)
                        .collect();
                    (label, Deck::new(others, &mut rng))
                })
                .collect();

            for (i, example) in examples.iter().enumerate() {
                let (Some(pos_deck), Some(neg_deck)) =
                    (positives.get_mut(&example.label), negatives.get_mut(&example.label))
                else {
                    continue;
                };
                let partner = pos_deck.draw(&mut rng, Some(i));
                pairs.push(SampledPair {
                    text_a: &example.text,
                    text_b: &examples[partner].text,
                    is_same_class: true,
                });
                let partner = neg_deck.draw(&mut rng, None);
                pairs.push(SampledPair {
                    text_a: &example.text,
                    text_b: &examples[partner].text,
                    is_same_class: false,
                });
            }
        }

        tracing::debug!(
            pairs = pairs.len(),
            rounds = self.num_iterations,
            "sampled contrastive pairs"
        );
        Ok(pairs)
    }
}

/// A shuffled pool of candidate indices, reshuffled when it runs dry.
struct Deck {
    items: Vec<usize>,
    cursor: usize,
}

impl Deck {
    fn new(mut items: Vec<usize>, rng: &mut StdRng) -> Self {
        items.shuffle(rng);
        Self { items, cursor: 0 }
    }

    /// Caller guarantees the deck holds at least one index other than `skip`.
    fn draw(&mut self, rng: &mut StdRng, skip: Option<usize>) -> usize {
        loop {
            if self.cursor == self.items.len() {
                self.items.shuffle(rng);
                self.cursor = 0;
            }
            let item = self.items[self.cursor];
            self.cursor += 1;
            if Some(item) != skip {
                return item;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn balanced(classes: usize, per_class: usize) -> Dataset {
        Dataset::from_pairs(
            (0..classes * per_class).map(|i| (format!("example {i}"), (i % classes) as i64)),
        )
    }

    #[test]
    fn test_pair_count_and_balance() -> anyhow::Result<()> {
        let train = balanced(4, 8);
        let pairs = PairSampler::new(20, 0).sample(&train)?;
        assert_eq!(pairs.len(), 1280);
        assert_eq!(pairs.iter().filter(|p| p.is_same_class).count(), 640);
        Ok(())
    }

    #[test]
    fn test_pairs_alternate_positive_negative() -> anyhow::Result<()> {
        let train = balanced(2, 3);
        let pairs = PairSampler::new(2, 9).sample(&train)?;
        for (i, pair) in pairs.iter().enumerate() {
            assert_eq!(pair.is_same_class, i % 2 == 0);
        }
        Ok(())
    }

    #[test]
    fn test_same_seed_same_pairs() -> anyhow::Result<()> {
        let train = balanced(3, 5);
        let a = PairSampler::new(4, 17).sample(&train)?;
        let b = PairSampler::new(4, 17).sample(&train)?;
        let c = PairSampler::new(4, 18).sample(&train)?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        Ok(())
    }

    #[test]
    fn test_singleton_class_is_rejected() {
        let train = Dataset::from_pairs([("a", 0), ("b", 0), ("c", 1)]);
        let err = PairSampler::new(1, 0).sample(&train).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SetFitError>(),
            Some(SetFitError::InsufficientClassSamples(_))
        ));
    }

    #[test]
    fn test_single_class_is_rejected() {
        let train = Dataset::from_pairs([("a", 3), ("b", 3), ("c", 3)]);
        let err = PairSampler::check(&train).unwrap_err();
        assert!(err
            .downcast_ref::<SetFitError>()
            .is_some_and(SetFitError::is_dataset_error));
    }

    #[test]
    fn test_two_member_class_pairs_with_its_sibling() -> anyhow::Result<()> {
        let train = Dataset::from_pairs([("a", 0), ("b", 0), ("x", 1), ("y", 1)]);
        for pair in PairSampler::new(3, 1).sample(&train)? {
            if pair.is_same_class {
                assert_ne!(pair.text_a, pair.text_b);
            }
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn prop_pairs_respect_labels(
            labels in proptest::collection::vec(0i64..4, 2..40),
            rounds in 1usize..5,
            seed in any::<u64>(),
        ) {
            let train = Dataset::from_pairs(
                labels.iter().enumerate().map(|(i, &l)| (format!("t{i}"), l)),
            );
            let label_of: HashMap<String, i64> =
                train.iter().map(|e| (e.text.clone(), e.label)).collect();

            match PairSampler::new(rounds, seed).sample(&train) {
                Ok(pairs) => {
                    prop_assert_eq!(pairs.len(), 2 * rounds * train.len());
                    for pair in &pairs {
                        let same = label_of[pair.text_a] == label_of[pair.text_b];
                        prop_assert_eq!(same, pair.is_same_class);
                        if pair.is_same_class {
                            prop_assert_ne!(pair.text_a, pair.text_b);
                        }
                    }
                }
                Err(_) => {
                    let counts = train.class_counts();
                    prop_assert!(counts.len() < 2 || counts.values().any(|&n| n < 2));
                }
            }
        }
    }
}
