// ============================================================
// Layer 5 — Composite Step Rules
// ============================================================
// A step rule turns gradients into parameter updates. The
// update itself (Adam, RMSProp, momentum SGD) comes from
// burn::optim; this module wraps it in an ordered pipeline of
// extra stages:
//
//   StepClipping     rescale so the global L2 norm ≤ threshold
//   RemoveNotFinite  drop updates that contain NaN or ±inf
//
// Stages listed BEFORE the optimizer act on the gradients.
// Stages listed AFTER it act on the step, i.e. the difference
// between each parameter after and before the optimizer ran.
//
//   adam      [Optimizer, Clip]
//   rms_prop  [Clip, Optimizer, RemoveNotFinite]
//   momentum  [Clip, Optimizer, RemoveNotFinite]

use std::{collections::HashMap, path::Path};

use anyhow::{anyhow, ensure, Result};
use burn::{
    module::{AutodiffModule, ModuleMapper, ModuleVisitor, Param, ParamId},
    optim::{
        momentum::MomentumConfig, AdamConfig, GradientsParams, Optimizer, RmsPropConfig,
        SgdConfig,
    },
    prelude::*,
    record::{CompactRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::domain::algorithm::{Algorithm, StepRuleConfig};

// ─── Stages ───────────────────────────────────────────────────────────────────

/// Rescales a whole set of steps to a maximum global L2 norm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepClipping {
    pub threshold: f64,
}

impl StepClipping {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Factor the steps are multiplied by for a given global norm.
    /// A non-finite norm is left alone for RemoveNotFinite to handle.
    pub fn multiplier(&self, norm: f64) -> f64 {
        if !norm.is_finite() || norm < self.threshold {
            1.0
        } else {
            self.threshold / norm
        }
    }
}

/// Replaces a non-finite step so the parameter becomes `scaler * parameter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoveNotFinite {
    pub scaler: f64,
}

impl Default for RemoveNotFinite {
    fn default() -> Self {
        Self { scaler: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    Clip(StepClipping),
    Optimizer,
    RemoveNotFinite(RemoveNotFinite),
}

/// What the pipeline measured during one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Global gradient norm, when a gradient-side clip measured it
    pub gradient_norm: Option<f64>,

    /// Global step norm, when a step-side clip measured it
    pub step_norm: Option<f64>,

    /// Parameters whose update was discarded as non-finite
    pub non_finite: usize,
}

// ─── Framework optimizer behind a trait object ────────────────────────────────
// burn's optimizers are distinct types with their own record
// types. This trait erases them so one CompositeRule can hold
// any of the three.

type LoadResult<B, M> =
    std::result::Result<Box<dyn ParamUpdater<B, M>>, (Box<dyn ParamUpdater<B, M>>, anyhow::Error)>;

pub trait ParamUpdater<B: AutodiffBackend, M: AutodiffModule<B>>: Send {
    fn update(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M;

    /// Write the optimizer state (moments, velocities) to `path`.
    fn save(&self, path: &Path) -> Result<()>;

    /// Replace the optimizer state with the one stored at `path`.
    /// On failure the unchanged optimizer is handed back.
    fn load(self: Box<Self>, path: &Path, device: &B::Device) -> LoadResult<B, M>;
}

impl<B, M, O> ParamUpdater<B, M> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
    O: Optimizer<M, B> + 'static,
{
    fn update(&mut self, learning_rate: f64, module: M, grads: GradientsParams) -> M {
        self.step(learning_rate, module, grads)
    }

    fn save(&self, path: &Path) -> Result<()> {
        CompactRecorder::new()
            .record(self.to_record(), path.to_path_buf())
            .map_err(|e| anyhow!("Failed to save optimizer state to '{}': {e}", path.display()))
    }

    fn load(self: Box<Self>, path: &Path, device: &B::Device) -> LoadResult<B, M> {
        match CompactRecorder::new().load(path.to_path_buf(), device) {
            Ok(record) => Ok(Box::new((*self).load_record(record))),
            Err(e) => Err((
                self,
                anyhow!("Cannot load optimizer state '{}': {e}", path.display()),
            )),
        }
    }
}

// ─── CompositeRule ────────────────────────────────────────────────────────────

pub struct CompositeRule<B: AutodiffBackend, M: AutodiffModule<B>> {
    stages:        Vec<Stage>,
    optimizer:     Option<Box<dyn ParamUpdater<B, M>>>,
    learning_rate: f64,
}

impl<B, M> CompositeRule<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
{
    /// Build a rule from its stages. Exactly one stage must be `Stage::Optimizer`.
    pub fn new(
        stages:        Vec<Stage>,
        optimizer:     Box<dyn ParamUpdater<B, M>>,
        learning_rate: f64,
    ) -> Result<Self> {
        let optimizers = stages.iter().filter(|s| **s == Stage::Optimizer).count();
        ensure!(
            optimizers == 1,
            "a composite step rule needs exactly one optimizer stage, got {optimizers}"
        );
        for stage in &stages {
            if let Stage::Clip(clip) = stage {
                ensure!(
                    clip.threshold > 0.0,
                    "clipping threshold must be positive, got {}",
                    clip.threshold
                );
            }
        }
        Ok(Self { stages, optimizer: Some(optimizer), learning_rate })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order and return the updated model.
    pub fn step(&mut self, model: M, mut grads: GradientsParams) -> Result<(M, StepReport)> {
        let mut report = StepReport::default();
        let pivot = self
            .stages
            .iter()
            .position(|s| *s == Stage::Optimizer)
            .unwrap_or(self.stages.len());

        for stage in &self.stages[..pivot] {
            match stage {
                Stage::Clip(clip) => {
                    let norm = gradient_norm::<B, M>(&model, &grads);
                    report.gradient_norm = Some(norm);
                    let scale = clip.multiplier(norm);
                    if scale < 1.0 {
                        scale_gradients::<B, M>(&model, &mut grads, scale);
                    }
                }
                Stage::RemoveNotFinite(_) => {
                    report.non_finite += drop_non_finite_gradients::<B, M>(&model, &mut grads);
                }
                Stage::Optimizer => {}
            }
        }

        let after = &self.stages[(pivot + 1).min(self.stages.len())..];
        let before = (!after.is_empty()).then(|| snapshot::<B, M>(&model));

        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| anyhow!("optimizer state was lost by a failed load"))?;
        let mut model = optimizer.update(self.learning_rate, model, grads);

        if let Some(before) = before {
            for stage in after {
                match stage {
                    Stage::Clip(clip) => {
                        let norm = step_norm::<B, M>(&model, &before);
                        report.step_norm = Some(norm);
                        let scale = clip.multiplier(norm);
                        if scale < 1.0 {
                            model = rewrite_steps(model, &before, |old, new| {
                                old.clone() + (new - old).mul_scalar(scale)
                            });
                        }
                    }
                    Stage::RemoveNotFinite(rule) => {
                        let mut dropped = 0;
                        model = rewrite_steps(model, &before, |old, new| {
                            let delta: f64 = (new.clone() - old.clone()).sum().into_scalar().elem();
                            if delta.is_finite() {
                                new
                            } else {
                                dropped += 1;
                                old.mul_scalar(rule.scaler)
                            }
                        });
                        report.non_finite += dropped;
                    }
                    Stage::Optimizer => {}
                }
            }
        }

        if report.non_finite > 0 {
            tracing::warn!("Discarded non-finite updates for {} parameters", report.non_finite);
        }

        Ok((model, report))
    }

    pub fn save_state(&self, path: &Path) -> Result<()> {
        match &self.optimizer {
            Some(optimizer) => optimizer.save(path),
            None => Err(anyhow!("optimizer state was lost by a failed load")),
        }
    }

    pub fn load_state(&mut self, path: &Path, device: &B::Device) -> Result<()> {
        let optimizer = self
            .optimizer
            .take()
            .ok_or_else(|| anyhow!("optimizer state was lost by a failed load"))?;
        match optimizer.load(path, device) {
            Ok(loaded) => {
                self.optimizer = Some(loaded);
                Ok(())
            }
            Err((unchanged, e)) => {
                self.optimizer = Some(unchanged);
                Err(e)
            }
        }
    }
}

// ─── Step-rule selector ───────────────────────────────────────────────────────

/// Map an algorithm and its hyperparameters to a composite rule.
pub fn learning_algorithm<B, M>(cfg: &StepRuleConfig) -> Result<CompositeRule<B, M>>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
{
    let clipping = Stage::Clip(StepClipping::new(cfg.clipping));

    let (stages, optimizer): (Vec<Stage>, Box<dyn ParamUpdater<B, M>>) = match cfg.algorithm {
        Algorithm::Adam => (
            vec![Stage::Optimizer, clipping],
            Box::new(AdamConfig::new().with_epsilon(1e-8).init::<B, M>()),
        ),
        Algorithm::RmsProp => (
            vec![clipping, Stage::Optimizer, Stage::RemoveNotFinite(RemoveNotFinite::default())],
            Box::new(RmsPropConfig::new().with_alpha(0.9).init::<B, M>()),
        ),
        Algorithm::Momentum => {
            let momentum = MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0);
            (
                vec![clipping, Stage::Optimizer, Stage::RemoveNotFinite(RemoveNotFinite::default())],
                Box::new(SgdConfig::new().with_momentum(Some(momentum)).init::<B, M>()),
            )
        }
    };

    let rule = CompositeRule::new(stages, optimizer, cfg.learning_rate)?;
    tracing::info!(
        "Step rule: {} (lr={}, clipping={}) stages={:?}",
        cfg.algorithm,
        cfg.learning_rate,
        cfg.clipping,
        rule.stages()
    );
    Ok(rule)
}

// ─── Gradient-side helpers ────────────────────────────────────────────────────

fn squared_sum<K: Backend, const D: usize>(t: Tensor<K, D>) -> f64 {
    (t.clone() * t).sum().into_scalar().elem::<f64>()
}

fn gradient_norm<B: AutodiffBackend, M: AutodiffModule<B>>(model: &M, grads: &GradientsParams) -> f64 {
    struct Norm<'a> {
        grads:  &'a GradientsParams,
        sum_sq: f64,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for Norm<'_> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            if let Some(g) = self.grads.get::<B::InnerBackend, D>(param.id) {
                self.sum_sq += squared_sum(g);
            }
        }
    }

    let mut v = Norm { grads, sum_sq: 0.0 };
    model.visit(&mut v);
    v.sum_sq.sqrt()
}

fn scale_gradients<B: AutodiffBackend, M: AutodiffModule<B>>(
    model: &M,
    grads: &mut GradientsParams,
    scale: f64,
) {
    struct Scale<'a> {
        grads: &'a mut GradientsParams,
        scale: f64,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for Scale<'_> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            if let Some(g) = self.grads.remove::<B::InnerBackend, D>(param.id) {
                self.grads.register(param.id, g.mul_scalar(self.scale));
            }
        }
    }

    model.visit(&mut Scale { grads, scale });
}

/// Returns how many gradients were removed.
fn drop_non_finite_gradients<B: AutodiffBackend, M: AutodiffModule<B>>(
    model: &M,
    grads: &mut GradientsParams,
) -> usize {
    struct Filter<'a> {
        grads:   &'a mut GradientsParams,
        dropped: usize,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for Filter<'_> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            let finite = self
                .grads
                .get::<B::InnerBackend, D>(param.id)
                .map(|g| g.sum().into_scalar().elem::<f64>().is_finite());
            if finite == Some(false) {
                self.grads.remove::<B::InnerBackend, D>(param.id);
                self.dropped += 1;
            }
        }
    }

    let mut v = Filter { grads, dropped: 0 };
    model.visit(&mut v);
    v.dropped
}

// ─── Step-side helpers ────────────────────────────────────────────────────────
// Parameters are flattened to 1-D so tensors of every rank can
// share one map.

type Snapshot<B> = HashMap<ParamId, Tensor<<B as AutodiffBackend>::InnerBackend, 1>>;

fn flatten<K: Backend, const D: usize>(t: Tensor<K, D>) -> Tensor<K, 1> {
    let n = t.shape().num_elements();
    t.reshape([n])
}

fn snapshot<B: AutodiffBackend, M: AutodiffModule<B>>(model: &M) -> Snapshot<B> {
    struct Collect<B: AutodiffBackend> {
        params: Snapshot<B>,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for Collect<B> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            self.params.insert(param.id, flatten(param.val().inner()));
        }
    }

    let mut v = Collect::<B> { params: HashMap::new() };
    model.visit(&mut v);
    v.params
}

fn step_norm<B: AutodiffBackend, M: AutodiffModule<B>>(model: &M, before: &Snapshot<B>) -> f64 {
    struct Norm<'a, B: AutodiffBackend> {
        before: &'a Snapshot<B>,
        sum_sq: f64,
    }

    impl<B: AutodiffBackend> ModuleVisitor<B> for Norm<'_, B> {
        fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
            if let Some(old) = self.before.get(&param.id) {
                let new = flatten(param.val().inner());
                self.sum_sq += squared_sum(new - old.clone());
            }
        }
    }

    let mut v = Norm { before, sum_sq: 0.0 };
    model.visit(&mut v);
    v.sum_sq.sqrt()
}

/// Replace every parameter with `rewrite(old, new)`, both flattened.
fn rewrite_steps<B, M, F>(model: M, before: &Snapshot<B>, rewrite: F) -> M
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    F: FnMut(
        Tensor<B::InnerBackend, 1>,
        Tensor<B::InnerBackend, 1>,
    ) -> Tensor<B::InnerBackend, 1>,
{
    struct Rewrite<'a, B: AutodiffBackend, F> {
        before:  &'a Snapshot<B>,
        rewrite: F,
    }

    impl<B, F> ModuleMapper<B> for Rewrite<'_, B, F>
    where
        B: AutodiffBackend,
        F: FnMut(
            Tensor<B::InnerBackend, 1>,
            Tensor<B::InnerBackend, 1>,
        ) -> Tensor<B::InnerBackend, 1>,
    {
        fn map_float<const D: usize>(&mut self, param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
            let (id, tensor, mapper) = param.consume();
            let Some(old) = self.before.get(&id) else {
                return Param::from_mapped_value(id, tensor, mapper);
            };

            let dims = tensor.dims();
            let require_grad = tensor.is_require_grad();
            let new = flatten(tensor.inner());
            let updated = (self.rewrite)(old.clone(), new).reshape(dims);

            let mut tensor = Tensor::<B, D>::from_inner(updated);
            if require_grad {
                tensor = tensor.require_grad();
            }
            Param::from_mapped_value(id, tensor, mapper)
        }
    }

    model.map(&mut Rewrite { before, rewrite })
}
