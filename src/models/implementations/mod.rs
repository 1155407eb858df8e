pub mod bert;
pub mod hashed_bag;

pub use bert::{BertConfig, BertEncoder, BertOptions, DEFAULT_BERT_MODEL};
pub use hashed_bag::{HashedBagConfig, HashedBagEncoder};
