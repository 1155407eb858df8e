#![allow(dead_code)]

use candle_core::{Device, Tensor, Var};
use setfit::training::Dataset;
use setfit::{HashedBagConfig, HashedBagEncoder, SentenceEncoder};

const TOPICS: [&[&str]; 4] = [
    &[
        "the striker scored twice in the derby",
        "a late penalty decided the cup final",
        "the goalkeeper kept another clean sheet",
        "fans cheered as the team lifted the trophy",
        "the coach praised his defenders after the match",
        "an injury ruled the captain out of the league game",
        "the winger signed a new contract with the club",
        "extra time ended in a dramatic shootout",
        "the referee showed two red cards in the second half",
        "the midfielder was named player of the season",
        "the stadium was sold out for the opening fixture",
    ],
    &[
        "shares fell sharply after the earnings report",
        "the central bank kept interest rates unchanged",
        "investors sold bonds as inflation climbed",
        "the company announced a quarterly dividend",
        "oil prices rose on supply concerns",
        "the startup raised funding from venture investors",
        "markets rallied after the jobs data",
        "the merger was approved by regulators",
        "the currency weakened against the dollar",
        "profits beat analyst forecasts this quarter",
        "the bank cut its growth outlook for next year",
    ],
    &[
        "heavy rain is expected across the north tomorrow",
        "a heatwave pushed temperatures past forty degrees",
        "snow closed several mountain roads overnight",
        "forecasters warned of strong winds on the coast",
        "the storm brought flooding to low lying towns",
        "clear skies and sunshine are due at the weekend",
        "fog delayed flights at the airport this morning",
        "a cold front will bring frost to the valleys",
        "thunderstorms may develop later in the afternoon",
        "drought conditions worsened after a dry summer",
        "the hurricane weakened as it moved inland",
    ],
    &[
        "the new phone ships with a faster processor",
        "developers released a patch for the security flaw",
        "the laptop battery now lasts a full day",
        "the app update adds offline maps",
        "engineers unveiled a chip for machine learning",
        "the browser blocks trackers by default",
        "a software bug crashed the payment servers",
        "the console supports higher frame rates",
        "the open source project reached version two",
        "the router firmware fixes wireless dropouts",
        "cloud storage prices dropped for new users",
    ],
];

/// Four topics, eight training and three test examples each.
pub fn topic_split() -> (Dataset, Dataset) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (label, texts) in TOPICS.iter().enumerate() {
        for (i, text) in texts.iter().enumerate() {
            let target = if i < 8 { &mut train } else { &mut test };
            target.push((text.to_string(), label as i64));
        }
    }
    (Dataset::from_pairs(train), Dataset::from_pairs(test))
}

pub fn small_encoder(seed: u64) -> anyhow::Result<HashedBagEncoder> {
    HashedBagEncoder::new(
        HashedBagConfig {
            num_buckets: 1024,
            hidden_size: 32,
            ngram: 3,
            seed,
        },
        &Device::Cpu,
    )
}

/// Wraps an encoder and, when poisoned, turns every embedding into NaN.
pub struct FlakyEncoder {
    pub inner: HashedBagEncoder,
    pub poisoned: bool,
}

impl SentenceEncoder for FlakyEncoder {
    fn encode(&self, texts: &[&str]) -> anyhow::Result<Tensor> {
        let out = self.inner.encode(texts)?;
        if self.poisoned {
            Ok(out.affine(f64::NAN, 0.0)?)
        } else {
            Ok(out)
        }
    }

    fn trainable_vars(&self) -> Vec<Var> {
        self.inner.trainable_vars()
    }

    fn hidden_size(&self) -> usize {
        self.inner.hidden_size()
    }

    fn device(&self) -> &Device {
        self.inner.device()
    }

    fn fork(&self) -> anyhow::Result<Self> {
        Ok(Self {
            inner: self.inner.fork()?,
            poisoned: self.poisoned,
        })
    }
}
