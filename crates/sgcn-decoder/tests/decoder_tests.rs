//! End-to-end decoder tests with stand-in embedding, projection and attention.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap};
use sgcn_core::{Error, Result, SparseTensor};
use sgcn_decoder::{
    gather_diagonal, AttentionStack, DecoderConfig, GraphDecoder, LossLayout, TargetGraph,
};

const BATCH: usize = 2;
const STEPS: usize = 3;
const EMBED: usize = 4;
const VOCAB: usize = 6;
const SOURCE: usize = 2;

/// Masked mean over visible keys plus a small encoder term.
#[derive(Clone, Copy)]
struct MaskedMean;

impl AttentionStack for MaskedMean {
    fn forward(
        &self,
        x: &Tensor,
        enc_output: &Tensor,
        self_attn_mask: &Tensor,
        cross_attn_mask: &Tensor,
    ) -> Result<Tensor> {
        let (n, t, _) = x.dims3()?;
        let s = enc_output.dim(1)?;
        let weights = self_attn_mask.squeeze(1)?.broadcast_as((n, t, t))?.contiguous()?;
        let attended = weights
            .matmul(x)?
            .broadcast_div(&weights.sum_keepdim(2)?)?;
        let cross = cross_attn_mask
            .squeeze(1)?
            .broadcast_as((n, 1, s))?
            .contiguous()?
            .matmul(enc_output)?;
        Ok((x + attended)?.broadcast_add(&(cross * 0.1)?)?)
    }
}

struct Fixture {
    embedding: Embedding,
    projection: Linear,
    enc_output: Tensor,
    cross_mask: Tensor,
    graph: TargetGraph,
}

fn config(layout: LossLayout, sequential: bool) -> DecoderConfig {
    DecoderConfig {
        maxlen: 4,
        embedding_size: EMBED,
        target_vocab_size: VOCAB,
        target_graph: true,
        target_gcn_layers: 2,
        target_labels_num: 2,
        gcn_residual: true,
        sequential,
        loss_layout: layout,
        ..Default::default()
    }
}

fn fixture(vertices: usize) -> Fixture {
    let device = Device::Cpu;
    let embedding = Embedding::new(
        Tensor::randn(0f32, 1., (VOCAB, EMBED), &device).unwrap(),
        EMBED,
    );
    let projection = Linear::new(
        Tensor::randn(0f32, 1., (VOCAB, EMBED), &device).unwrap(),
        None,
    );

    let mut edges = Vec::new();
    let mut labels = Vec::new();
    for b in 0..BATCH {
        for i in 0..vertices {
            edges.push((vec![b, i, i, 0], 1.0));
            if i > 0 {
                edges.push((vec![b, i, i - 1, 1], 1.0));
                labels.push((vec![b, i, i - 1, i % 2], 1.0));
            }
            if i + 1 < vertices {
                edges.push((vec![b, i, i + 1, 2], 1.0));
            }
        }
    }
    let edges = SparseTensor::from_entries(vec![BATCH, vertices, vertices, 3], edges).unwrap();
    let labels = SparseTensor::from_entries(vec![BATCH, vertices, vertices, 2], labels).unwrap();

    Fixture {
        embedding,
        projection,
        enc_output: Tensor::randn(0f32, 1., (BATCH, SOURCE, EMBED), &device).unwrap(),
        cross_mask: Tensor::ones((BATCH, 1, 1, SOURCE), DType::F32, &device).unwrap(),
        graph: TargetGraph::from_static(&edges, Some(&labels)).unwrap(),
    }
}

fn decoder(
    f: &Fixture,
    config: DecoderConfig,
    varmap: &VarMap,
) -> GraphDecoder<Embedding, Linear, MaskedMean> {
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
    GraphDecoder::new(config, f.embedding.clone(), f.projection.clone(), MaskedMean, vb).unwrap()
}

fn assert_close(a: &Tensor, b: &Tensor) {
    assert_eq!(a.dims(), b.dims());
    let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    for (x, y) in a.iter().zip(&b) {
        approx::assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    }
}

fn ids(rows: &[[u32; STEPS]; BATCH]) -> Tensor {
    Tensor::new(rows, &Device::Cpu).unwrap()
}

#[test_log::test]
fn test_graph_decoding_shape() {
    let f = fixture(5);
    let varmap = VarMap::new();
    let dec = decoder(&f, config(LossLayout::Squashed, false), &varmap);

    let logits = dec
        .decode_at_train(&ids(&[[1, 2, 3], [4, 5, 1]]), &f.enc_output, &f.cross_mask, Some(&f.graph))
        .unwrap();
    assert_eq!(logits.dims(), &[BATCH, STEPS, VOCAB]);
    assert_eq!(dec.gcn().map(|g| g.len()), Some(2));
}

#[test]
fn test_graph_decoding_is_causal() {
    let f = fixture(5);
    let varmap = VarMap::new();
    for sequential in [false, true] {
        let dec = decoder(&f, config(LossLayout::Squashed, sequential), &varmap);
        let a = dec
            .decode_at_train(&ids(&[[1, 2, 3], [4, 5, 1]]), &f.enc_output, &f.cross_mask, Some(&f.graph))
            .unwrap();
        // only the last position differs
        let b = dec
            .decode_at_train(&ids(&[[1, 2, 5], [4, 5, 2]]), &f.enc_output, &f.cross_mask, Some(&f.graph))
            .unwrap();
        assert_close(&a.narrow(1, 0, STEPS - 1).unwrap(), &b.narrow(1, 0, STEPS - 1).unwrap());
    }
}

#[test]
fn test_per_timestep_layout_contains_squashed_logits() {
    let f = fixture(5);
    let varmap = VarMap::new();
    let squashed = decoder(&f, config(LossLayout::Squashed, false), &varmap);
    let expanded = decoder(&f, config(LossLayout::PerTimestep, false), &varmap);
    let target = ids(&[[1, 2, 3], [4, 5, 1]]);

    let a = squashed
        .decode_at_train(&target, &f.enc_output, &f.cross_mask, Some(&f.graph))
        .unwrap();
    let b = expanded
        .decode_at_train(&target, &f.enc_output, &f.cross_mask, Some(&f.graph))
        .unwrap();
    assert_eq!(b.dims(), &[BATCH * STEPS, STEPS, VOCAB]);

    assert_close(&a, &gather_diagonal(&b).unwrap());
}

#[test]
fn test_plain_decoding_without_graph() {
    let f = fixture(5);
    let varmap = VarMap::new();
    let config = DecoderConfig {
        target_graph: false,
        ..config(LossLayout::Squashed, false)
    };
    let dec = decoder(&f, config, &varmap);
    assert!(dec.gcn().is_none());

    let a = dec
        .decode_at_train(&ids(&[[1, 2, 3], [4, 5, 1]]), &f.enc_output, &f.cross_mask, None)
        .unwrap();
    let b = dec
        .decode_at_train(&ids(&[[1, 2, 0], [4, 5, 0]]), &f.enc_output, &f.cross_mask, None)
        .unwrap();
    assert_eq!(a.dims(), &[BATCH, STEPS, VOCAB]);
    assert_close(&a.narrow(1, 0, 2).unwrap(), &b.narrow(1, 0, 2).unwrap());
}

#[test]
fn test_missing_graph_is_config_error() {
    let f = fixture(5);
    let varmap = VarMap::new();
    let dec = decoder(&f, config(LossLayout::Squashed, false), &varmap);
    let err = dec
        .decode_at_train(&ids(&[[1, 2, 3], [4, 5, 1]]), &f.enc_output, &f.cross_mask, None)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[test]
fn test_graph_vertex_count_must_match_maxlen() {
    let f = fixture(4);
    let varmap = VarMap::new();
    let dec = decoder(&f, config(LossLayout::Squashed, false), &varmap);
    let err = dec
        .decode_at_train(&ids(&[[1, 2, 3], [4, 5, 1]]), &f.enc_output, &f.cross_mask, Some(&f.graph))
        .unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}
