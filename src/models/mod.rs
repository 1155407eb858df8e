pub mod components;
pub mod implementations;
pub mod utils;

pub use implementations::{
    BertConfig, BertEncoder, BertOptions, HashedBagConfig, HashedBagEncoder, DEFAULT_BERT_MODEL,
};
