// ============================================================
// Layer 5 — Signal RNN Model
// ============================================================
// Stacked LSTM over [batch, seq_len, features] followed by a
// per-step linear readout back to `features` channels.
//
// The model is stateful across batches: forward() takes the
// state left by the previous batch and returns the new one.
// The training loop detaches it before carrying it on, so
// gradients are truncated at batch boundaries.

use burn::{
    module::{ModuleVisitor, Param},
    nn::{
        loss::{MseLoss, Reduction},
        lstm::{Lstm, LstmConfig, LstmState},
        Dropout, DropoutConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};

#[derive(Config, Debug)]
pub struct SignalRnnConfig {
    /// Channels per time step (input and output)
    pub features: usize,

    /// LSTM hidden size
    pub hidden_size: usize,

    #[config(default = 1)]
    pub num_layers: usize,

    /// Dropout between stacked layers
    #[config(default = 0.0)]
    pub dropout: f64,
}

impl SignalRnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SignalRnn<B> {
        let layers = (0..self.num_layers.max(1))
            .map(|i| {
                let d_input = if i == 0 { self.features } else { self.hidden_size };
                LstmConfig::new(d_input, self.hidden_size, true).init(device)
            })
            .collect();
        let readout = LinearConfig::new(self.hidden_size, self.features).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        SignalRnn { layers, readout, dropout }
    }
}

#[derive(Module, Debug)]
pub struct SignalRnn<B: Backend> {
    pub layers:  Vec<Lstm<B>>,
    pub readout: Linear<B>,
    pub dropout: Dropout,
}

/// Hidden and cell state of every LSTM layer.
pub struct RecurrentState<B: Backend> {
    pub layers: Vec<LstmState<B, 2>>,
}

impl<B: Backend> RecurrentState<B> {
    /// Batch size the state was computed for
    pub fn batch_size(&self) -> usize {
        self.layers
            .first()
            .map(|s| s.hidden.dims()[0])
            .unwrap_or(0)
    }

    /// Cut the autodiff graph so the next batch does not backprop into this one.
    pub fn detach(self) -> Self {
        let layers = self
            .layers
            .into_iter()
            .map(|s| LstmState::new(s.cell.detach(), s.hidden.detach()))
            .collect();
        Self { layers }
    }
}

/// Scalar losses of one forward pass plus the state it left behind.
pub struct CostOutput<B: Backend> {
    /// Training objective: mse + weight decay
    pub cost:   Tensor<B, 1>,
    pub mse:    Tensor<B, 1>,
    pub state:  RecurrentState<B>,
}

impl<B: Backend> SignalRnn<B> {
    /// input: [batch, seq_len, features] → output of the same shape
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<RecurrentState<B>>,
    ) -> (Tensor<B, 3>, RecurrentState<B>) {
        let mut previous = state.map(|s| s.layers.into_iter());
        let mut next = Vec::with_capacity(self.layers.len());

        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            let init = previous.as_mut().and_then(|it| it.next());
            let (hidden_seq, layer_state) = layer.forward(x, init);
            next.push(layer_state);
            x = if i + 1 < self.layers.len() {
                self.dropout.forward(hidden_seq)
            } else {
                hidden_seq
            };
        }

        (self.readout.forward(x), RecurrentState { layers: next })
    }

    /// Forward pass plus `mse` and `cost = mse + weight_decay * Σ‖θ‖²`.
    pub fn forward_cost(
        &self,
        inputs:       Tensor<B, 3>,
        targets:      Tensor<B, 3>,
        state:        Option<RecurrentState<B>>,
        weight_decay: f64,
    ) -> CostOutput<B> {
        let (output, state) = self.forward(inputs, state);
        let mse = MseLoss::new().forward(output, targets, Reduction::Mean);

        let cost = if weight_decay > 0.0 {
            mse.clone() + self.l2_penalty().mul_scalar(weight_decay)
        } else {
            mse.clone()
        };

        CostOutput { cost, mse, state }
    }

    /// Sum of squares of every float parameter.
    pub fn l2_penalty(&self) -> Tensor<B, 1> {
        let mut visitor = SquaredNorm::<B> { total: None };
        self.visit(&mut visitor);
        visitor
            .total
            .unwrap_or_else(|| Tensor::zeros([1], &self.readout.weight.val().device()))
    }

    /// (parameter tensors, scalar parameters)
    pub fn parameter_summary(&self) -> (usize, usize) {
        let mut counter = ParamCounter::default();
        self.visit(&mut counter);
        (counter.tensors, counter.scalars)
    }
}

struct SquaredNorm<B: Backend> {
    total: Option<Tensor<B, 1>>,
}

impl<B: Backend> ModuleVisitor<B> for SquaredNorm<B> {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        let v = param.val();
        let sq = (v.clone() * v).sum();
        self.total = Some(match self.total.take() {
            Some(acc) => acc + sq,
            None => sq,
        });
    }
}

#[derive(Default)]
struct ParamCounter {
    tensors: usize,
    scalars: usize,
}

impl<B: Backend> ModuleVisitor<B> for ParamCounter {
    fn visit_float<const D: usize>(&mut self, param: &Param<Tensor<B, D>>) {
        self.tensors += 1;
        self.scalars += param.val().shape().num_elements();
    }
}

impl<B: AutodiffBackend> CostOutput<B> {
    /// Scalar value of the cost, for logging
    pub fn cost_value(&self) -> f64 {
        self.cost.clone().into_scalar().elem::<f64>()
    }
}
