//! Tensor plumbing for timestep-expanded decoding.
//!
//! Decoding every prefix length in one pass repeats each sentence `T` times.
//! Row `b * T + t` of an expanded tensor belongs to sentence `b` with the
//! first `t + 1` target positions visible. The helpers here build the
//! repeated inputs and masks and recover one logits row per position.
//!
//! Attention masks use `1.0` for visible keys and `0.0` for hidden ones.

use candle_core::{DType, Device, Tensor};
use sgcn_core::{index_tensor, Error, Result};

/// Repeat every slice along `dim` `repeats` times in place:
/// `[a, b]` becomes `[a, a, b, b]` for `repeats = 2`.
pub fn repeat_interleave(x: &Tensor, repeats: usize, dim: usize) -> Result<Tensor> {
    let len = x.dim(dim)?;
    let idx: Vec<usize> = (0..len)
        .flat_map(|i| std::iter::repeat(i).take(repeats))
        .collect();
    Ok(x.index_select(&index_tensor(idx, x.device())?, dim)?)
}

/// Lower-triangular `[T, T]` matrix of ones: row `t` is visible up to column `t`.
fn lower_triangle(timesteps: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    Ok(Tensor::tril2(timesteps, dtype, device)?)
}

/// Repeat target ids `[B, T]` to `[B * T, T]`, keeping positions `<= t` in
/// repetition `t` and zeroing the rest.
pub fn causal_target_ids(ids: &Tensor) -> Result<Tensor> {
    let (batch, timesteps) = ids.dims2()?;
    let repeated = repeat_interleave(ids, timesteps, 0)?;
    let mask = lower_triangle(timesteps, ids.dtype(), ids.device())?.repeat((batch, 1))?;
    Ok(repeated.mul(&mask)?)
}

/// Zero-pad `x` along `dim` up to length `target`.
///
/// Already at `target`, the input is returned unchanged.
///
/// # Errors
/// [`Error::ShapeMismatch`] if `x` is longer than `target` along `dim`.
pub fn pad_time(x: &Tensor, dim: usize, target: usize) -> Result<Tensor> {
    let len = x.dim(dim)?;
    match len.cmp(&target) {
        std::cmp::Ordering::Equal => Ok(x.clone()),
        std::cmp::Ordering::Less => Ok(x.pad_with_zeros(dim, 0, target - len)?),
        std::cmp::Ordering::Greater => Err(Error::shape("pad_time length", &[target], &[len])),
    }
}

/// Sinusoidal timing signal `[1, length, channels]`.
///
/// The first half of the channels holds `sin(pos / 10000^(i / (n - 1)))`,
/// the second half the matching cosines; an odd trailing channel is zero.
pub fn positional_signal(length: usize, channels: usize, device: &Device) -> Result<Tensor> {
    const MIN_TIMESCALE: f64 = 1.0;
    const MAX_TIMESCALE: f64 = 1.0e4;

    let num_timescales = channels / 2;
    let increment =
        (MAX_TIMESCALE / MIN_TIMESCALE).ln() / (num_timescales.max(2) - 1) as f64;
    let inv_timescales: Vec<f64> = (0..num_timescales)
        .map(|i| MIN_TIMESCALE * (-(i as f64) * increment).exp())
        .collect();

    let mut data = Vec::with_capacity(length * channels);
    for pos in 0..length {
        let scaled: Vec<f64> = inv_timescales.iter().map(|inv| pos as f64 * inv).collect();
        data.extend(scaled.iter().map(|s| s.sin() as f32));
        data.extend(scaled.iter().map(|s| s.cos() as f32));
        if channels % 2 == 1 {
            data.push(0.0);
        }
    }
    Ok(Tensor::from_vec(data, (1, length, channels), device)?)
}

/// Causal self-attention mask `[1, 1, T, T]`.
pub fn causal_mask(timesteps: usize, device: &Device) -> Result<Tensor> {
    Ok(lower_triangle(timesteps, DType::F32, device)?.reshape((1, 1, timesteps, timesteps))?)
}

/// Self-attention mask for a timestep-expanded batch.
///
/// Repetition `t` may attend to keys `<= t` from every query: `[B * T, 1, 1, T]`.
/// With `sequential`, queries are additionally causal: `[B * T, 1, T, T]`.
pub fn prefix_attention_mask(
    batch: usize,
    timesteps: usize,
    sequential: bool,
    device: &Device,
) -> Result<Tensor> {
    let prefix = lower_triangle(timesteps, DType::F32, device)?
        .repeat((batch, 1))?
        .reshape((batch * timesteps, 1, 1, timesteps))?;
    if !sequential {
        return Ok(prefix);
    }
    let causal = causal_mask(timesteps, device)?;
    Ok(prefix.broadcast_minimum(&causal)?)
}

/// Recover one logits row per (sentence, position).
///
/// Takes `[B * T, T, vocab]` and returns `[B, T, vocab]` where
/// `out[b, t] = logits[b * T + t, t]`.
pub fn gather_diagonal(logits: &Tensor) -> Result<Tensor> {
    let (rows, timesteps, vocab) = logits.dims3()?;
    if timesteps == 0 || rows % timesteps != 0 {
        return Err(Error::shape(
            "gather_diagonal rows",
            &[rows.next_multiple_of(timesteps.max(1)), timesteps, vocab],
            &[rows, timesteps, vocab],
        ));
    }
    let batch = rows / timesteps;
    let idx: Vec<usize> = (0..batch)
        .flat_map(|b| (0..timesteps).map(move |t| (b * timesteps + t) * timesteps + t))
        .collect();
    tracing::trace!(batch, timesteps, vocab, "gather_diagonal");
    let flat = logits.reshape((rows * timesteps, vocab))?;
    Ok(flat
        .index_select(&index_tensor(idx, logits.device())?, 0)?
        .reshape((batch, timesteps, vocab))?)
}

/// Expand loss targets `[B, T]` and mask `[B, T]` to match per-timestep logits.
///
/// Targets are repeated to `[B * T, T]`. The mask keeps only position `t` of
/// repetition `t`, and only where the input mask is set.
pub fn expand_loss_targets(targets: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor)> {
    let (batch, timesteps) = targets.dims2()?;
    if mask.dims() != targets.dims() {
        return Err(Error::shape("loss mask", targets.dims(), mask.dims()));
    }
    let targets = repeat_interleave(targets, timesteps, 0)?;
    let eye = Tensor::eye(timesteps, mask.dtype(), mask.device())?.repeat((batch, 1))?;
    let mask = repeat_interleave(mask, timesteps, 0)?.minimum(&eye)?;
    Ok((targets, mask))
}

/// Decoder inputs from targets `[B, T]`: prepend `go_id` and drop the last position.
pub fn shift_right(targets: &Tensor, go_id: u32) -> Result<Tensor> {
    let (batch, timesteps) = targets.dims2()?;
    if timesteps == 0 {
        return Ok(targets.clone());
    }
    let go = (Tensor::ones((batch, 1), targets.dtype(), targets.device())? * go_id as f64)?;
    Ok(Tensor::cat(&[&go, &targets.narrow(1, 0, timesteps - 1)?], 1)?)
}
