//! Few-shot text classification with a contrastively tuned sentence encoder.
//!
//! A [`SetFitModel`] pairs a trainable [`SentenceEncoder`] with a
//! logistic-regression head. Models are created from a cached base encoder,
//! either one at a time through [`SetFitModelBuilder`] or per trial through a
//! [`ModelFactory`], and trained with [`crate::training::Trainer`].
//!
//! ## Main Types
//!
//! - [`SetFitModel`] - encoder + head, text in, class probabilities out
//! - [`SetFitModelBuilder`] - loads (or reuses) a base encoder and forks it
//! - [`ModelFactory`] / [`ModelInit`] - fresh pipelines from a trial configuration
//! - [`SentenceEncoder`] / [`PretrainedEncoder`] - traits implemented by the backbones
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use setfit::pipelines::setfit_pipeline::*;
//! use setfit::training::{Dataset, Trainer};
//! use setfit::core::{Deadline, TrainingArguments};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let mut model = SetFitModelBuilder::bert("sentence-transformers/paraphrase-MiniLM-L3-v2")
//!     .cpu()
//!     .build()
//!     .await?;
//!
//! let train = Dataset::from_pairs([
//!     ("I loved every minute", 1), ("Best purchase this year", 1),
//!     ("Broke after a day", 0), ("Would not recommend", 0),
//! ]);
//! Trainer::new(TrainingArguments::default()).train(&mut model, &train, &Deadline::none())?;
//!
//! let probabilities = model.predict_proba_one("Absolutely fantastic")?;
//! println!("{probabilities:?}");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod factory;
pub mod model;
pub mod pipeline;

pub use builder::SetFitModelBuilder;
pub use factory::{ModelFactory, ModelInit};
pub use model::{PretrainedEncoder, SentenceEncoder};
pub use pipeline::SetFitModel;

pub use crate::models::{BertEncoder, BertOptions, HashedBagConfig, HashedBagEncoder};

pub use anyhow::Result;
