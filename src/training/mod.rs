//! The two SetFit training stages and their evaluation.
//!
//! [`PairSampler`] turns a handful of labeled examples into contrastive
//! pairs, [`ContrastiveTuner`] fine-tunes the encoder on them and
//! [`HeadTrainer`] fits a [`LogisticRegressionHead`] on the tuned embeddings.
//! [`Trainer`] chains the three for one run.

pub mod data;
pub mod evaluator;
pub mod head;
pub mod sampler;
pub mod trainer;
pub mod tuner;

pub use data::{Dataset, LabeledExample};
pub use evaluator::{Evaluator, Metric};
pub use head::{HeadParams, HeadReport, HeadSolver, HeadTrainer, LogisticRegressionHead};
pub use sampler::{PairSampler, SampledPair};
pub use trainer::{TrainReport, Trainer};
pub use tuner::{ContrastiveTuner, TunerArgs, TuningReport};
