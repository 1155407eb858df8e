//! Pooling, normalisation and parameter-copy helpers shared by the encoders.

use candle_core::{DType, Device, Result, Tensor, D};
use candle_nn::{VarBuilder, VarMap};

/// Masked mean over the sequence dimension.
///
/// `hidden` is `(batch, seq_len, hidden)` and `mask` is `(batch, seq_len)` with
/// 1 for real tokens and 0 for padding.
pub fn mean_pool(hidden: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let mask = mask.to_dtype(hidden.dtype())?.unsqueeze(D::Minus1)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.affine(1.0, 1e-9)?;
    summed.broadcast_div(&counts)
}

/// Scale every row to unit L2 norm.
pub fn l2_normalise(t: &Tensor) -> Result<Tensor> {
    let norm = t.sqr()?.sum_keepdim(D::Minus1)?.affine(1.0, 1e-12)?.sqrt()?;
    t.broadcast_div(&norm)
}

/// Row-wise cosine similarity of two `(batch, dim)` tensors.
pub fn pairwise_cosine(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dot = (a * b)?.sum(1)?;
    let norm_a = a.sqr()?.sum(1)?.affine(1.0, 1e-12)?.sqrt()?;
    let norm_b = b.sqr()?.sum(1)?.affine(1.0, 1e-12)?.sqrt()?;
    dot.div(&(norm_a * norm_b)?)
}

/// Build a fresh copy of a model whose parameters live in `source`.
///
/// `build` constructs the module graph against a new `VarMap`; every variable
/// it creates is then overwritten with the value of the same-named variable in
/// `source`. The copy owns its storage, so training it never touches `source`.
pub fn fork_varmap<T>(
    source: &VarMap,
    device: &Device,
    build: impl FnOnce(VarBuilder) -> Result<T>,
) -> anyhow::Result<(VarMap, T)> {
    let varmap = VarMap::new();
    let model = build(VarBuilder::from_varmap(&varmap, DType::F32, device))?;

    let source_vars = source
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("source parameter map is poisoned"))?;
    let target_vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("target parameter map is poisoned"))?;
    for (name, var) in target_vars.iter() {
        let src = source_vars
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("parameter `{name}` missing from base model"))?;
        var.set(src.as_tensor())?;
    }
    drop(target_vars);

    Ok((varmap, model))
}
