// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Rebuilds a trained SignalRnn from a checkpoint directory and
// runs it over a single signal sequence.

use anyhow::{ensure, Result};
use burn::{prelude::*, tensor::TensorData};

use crate::domain::signal::SignalSequence;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::SignalRnn;

type InferBackend = burn::backend::Wgpu;

pub struct SignalPredictor<B: Backend = InferBackend> {
    model:    SignalRnn<B>,
    features: usize,
    device:   B::Device,
}

impl SignalPredictor<InferBackend> {
    pub fn from_checkpoint(ckpt_manager: &CheckpointManager) -> Result<Self> {
        let device = burn::backend::wgpu::WgpuDevice::default();
        Self::load(ckpt_manager, device)
    }
}

impl<B: Backend> SignalPredictor<B> {
    /// Load on any backend. The architecture comes from the run's train_config.json.
    pub fn load(ckpt_manager: &CheckpointManager, device: B::Device) -> Result<Self> {
        let cfg = ckpt_manager.load_config()?;
        // Dropout only matters while training
        let model_cfg = cfg.model_config().with_dropout(0.0);
        let model: SignalRnn<B> = model_cfg.init(&device);
        let model = ckpt_manager.load_model(model, &device)?;
        tracing::info!("Model loaded from '{}'", ckpt_manager.dir().display());
        Ok(Self { model, features: cfg.features, device })
    }

    /// Output of the model for `sequence`, row-major [seq_len, features].
    /// The sequence starts from a zero state.
    pub fn predict(&self, sequence: &SignalSequence) -> Result<Vec<f32>> {
        ensure!(
            sequence.features == self.features,
            "model expects {} features, sequence has {}",
            self.features,
            sequence.features
        );

        let data = TensorData::new(
            sequence.input.clone(),
            [1, sequence.seq_len, sequence.features],
        );
        let input = Tensor::<B, 3>::from_data(data, &self.device);
        let (output, _) = self.model.forward(input, None);

        output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Cannot read model output: {e:?}"))
    }
}
