//! Monitoring extensions: training-data aggregation and
//! validation-stream evaluation.

use std::sync::Arc;

use anyhow::Result;
use burn::{
    data::dataloader::DataLoader,
    module::AutodiffModule,
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::batcher::SignalBatch;
use crate::ml::main_loop::{Event, Extension, LoopContext, Schedule};
use crate::ml::model::{RecurrentState, SignalRnn};

/// Per-batch channels the main loop records, without their `batch_` prefix
const BATCH_CHANNELS: [&str; 2] = ["cost", "mse"];

// ─── TrainingDataMonitoring ───────────────────────────────────────────────────

/// Averages the per-batch training channels over each monitoring
/// window and records them as `<prefix>_cost` / `<prefix>_mse`.
pub struct TrainingDataMonitoring {
    prefix:   String,
    every:    usize,
    sums:     [f64; 2],
    count:    usize,
    schedule: Schedule,
}

impl TrainingDataMonitoring {
    pub fn new(prefix: impl Into<String>, every_n_batches: usize) -> Self {
        Self {
            prefix: prefix.into(),
            every: every_n_batches.max(1),
            sums: [0.0; 2],
            count: 0,
            schedule: Schedule::new().every_n_batches(1),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for TrainingDataMonitoring {
    fn name(&self) -> &str {
        "training_data_monitoring"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, _event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        for (sum, channel) in self.sums.iter_mut().zip(BATCH_CHANNELS) {
            if let Some(v) = ctx.log.current_value(&format!("batch_{channel}")) {
                *sum += v;
            }
        }
        self.count += 1;

        if ctx.status.iterations_done % self.every == 0 {
            for (sum, channel) in self.sums.iter().zip(BATCH_CHANNELS) {
                ctx.log
                    .record(format!("{}_{}", self.prefix, channel), sum / self.count as f64);
            }
            self.sums = [0.0; 2];
            self.count = 0;
        }
        Ok(())
    }
}

// ─── DataStreamMonitoring ─────────────────────────────────────────────────────

/// Mean cost and MSE of a model over a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMetrics {
    pub cost:    f64,
    pub mse:     f64,
    pub batches: usize,
}

/// Evaluate `model` over every batch of `loader`, carrying the recurrent
/// state from one batch to the next. None for an empty stream.
pub fn evaluate_stream<B: Backend>(
    model:        &SignalRnn<B>,
    loader:       &dyn DataLoader<B, SignalBatch<B>>,
    weight_decay: f64,
) -> Option<StreamMetrics> {
    let mut state: Option<RecurrentState<B>> = None;
    let (mut cost, mut mse, mut batches) = (0.0f64, 0.0f64, 0usize);

    for batch in loader.iter() {
        let carried = state
            .take()
            .filter(|s| s.batch_size() == batch.batch_size());
        let out = model.forward_cost(batch.inputs, batch.targets, carried, weight_decay);
        cost += out.cost.into_scalar().elem::<f64>();
        mse += out.mse.into_scalar().elem::<f64>();
        batches += 1;
        state = Some(out.state);
    }

    (batches > 0).then(|| StreamMetrics {
        cost: cost / batches as f64,
        mse: mse / batches as f64,
        batches,
    })
}

/// Evaluates the inference copy of the model on a held-out stream
/// and records `<prefix>_cost` / `<prefix>_mse`. Runs before training
/// for a baseline row, then every window, each epoch end and after training.
pub struct DataStreamMonitoring<B: AutodiffBackend> {
    loader:   Arc<dyn DataLoader<B::InnerBackend, SignalBatch<B::InnerBackend>>>,
    prefix:   String,
    schedule: Schedule,
}

impl<B: AutodiffBackend> DataStreamMonitoring<B> {
    pub fn new(
        loader:          Arc<dyn DataLoader<B::InnerBackend, SignalBatch<B::InnerBackend>>>,
        prefix:          impl Into<String>,
        every_n_batches: usize,
    ) -> Self {
        Self {
            loader,
            prefix: prefix.into(),
            schedule: Schedule::new()
                .before_training()
                .every_n_batches(every_n_batches)
                .after_epoch()
                .after_training(),
        }
    }
}

impl<B: AutodiffBackend> Extension<B> for DataStreamMonitoring<B> {
    fn name(&self) -> &str {
        "data_stream_monitoring"
    }

    fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn run(&mut self, _event: Event, ctx: &mut LoopContext<B>) -> Result<()> {
        let model = ctx.model.valid();
        match evaluate_stream(&model, self.loader.as_ref(), ctx.weight_decay) {
            Some(m) => {
                ctx.log.record(format!("{}_cost", self.prefix), m.cost);
                ctx.log.record(format!("{}_mse", self.prefix), m.mse);
                tracing::debug!(
                    "{} stream: {} batches, mse={:.6}",
                    self.prefix,
                    m.batches,
                    m.mse
                );
            }
            None => tracing::warn!("{} stream yielded no batches", self.prefix),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{batcher::SignalBatcher, dataset::SignalDataset};
    use crate::domain::signal::SignalSequence;
    use crate::ml::extensions::{test_context, TestBackend};
    use burn::data::dataloader::DataLoaderBuilder;

    type Inner = <TestBackend as AutodiffBackend>::InnerBackend;

    fn valid_loader(n: usize) -> Arc<dyn DataLoader<Inner, SignalBatch<Inner>>> {
        let samples = (0..n)
            .map(|i| SignalSequence::new(3, 1, vec![i as f32; 3], vec![0.0; 3]))
            .collect();
        DataLoaderBuilder::new(SignalBatcher::new())
            .batch_size(2)
            .build(SignalDataset::new(samples))
    }

    #[test]
    fn test_training_data_window_mean() {
        let mut ctx = test_context();
        let mut ext = TrainingDataMonitoring::new("train", 2);

        for (i, cost) in [(1, 3.0), (2, 1.0)] {
            ctx.status.iterations_done = i;
            ctx.log.set_iteration(i);
            ctx.log.record("batch_cost", cost);
            ctx.log.record("batch_mse", cost / 2.0);
            ext.run(Event::AfterBatch, &mut ctx).unwrap();
        }

        assert_eq!(ctx.log.current_value("train_cost"), Some(2.0));
        assert_eq!(ctx.log.current_value("train_mse"), Some(1.0));
    }

    #[test]
    fn test_no_record_mid_window() {
        let mut ctx = test_context();
        let mut ext = TrainingDataMonitoring::new("train", 5);
        ctx.status.iterations_done = 3;
        ctx.log.set_iteration(3);
        ctx.log.record("batch_cost", 1.0);
        ext.run(Event::AfterBatch, &mut ctx).unwrap();
        assert_eq!(ctx.log.current_value("train_cost"), None);
    }

    #[test]
    fn test_evaluate_stream() {
        let ctx = test_context();
        let model = ctx.model.valid();
        let loader = valid_loader(4);

        let m = evaluate_stream(&model, loader.as_ref(), 0.0).unwrap();
        assert_eq!(m.batches, 2);
        assert!(m.mse.is_finite() && m.mse >= 0.0);
        assert_eq!(m.cost, m.mse);
    }

    #[test]
    fn test_evaluate_empty_stream() {
        let ctx = test_context();
        let model = ctx.model.valid();
        assert!(evaluate_stream(&model, valid_loader(0).as_ref(), 0.0).is_none());
    }

    #[test]
    fn test_stream_monitoring_records_channels() {
        let mut ctx = test_context();
        let mut ext = DataStreamMonitoring::<TestBackend>::new(valid_loader(2), "valid", 10);
        ctx.log.set_iteration(10);
        ext.run(Event::AfterBatch, &mut ctx).unwrap();
        assert!(ctx.log.current_value("valid_mse").is_some());
        assert!(ctx.log.current_value("valid_cost").is_some());
    }

    #[test]
    fn test_stream_monitoring_baseline_and_epoch_rows() {
        let mut ctx = test_context();
        let mut ext = DataStreamMonitoring::<TestBackend>::new(valid_loader(2), "valid", 10);
        let status = ctx.status.clone();
        let schedule = Extension::<TestBackend>::schedule(&ext).clone();
        assert!(schedule.fires(Event::BeforeTraining, &status));
        assert!(schedule.fires(Event::AfterEpoch, &status));

        // Untrained model gets a row at iteration 0
        ext.run(Event::BeforeTraining, &mut ctx).unwrap();
        assert!(ctx.log.current_value("valid_mse").is_some());
    }
}
