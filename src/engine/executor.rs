//! Predictor session
//!
//! Owns a loaded graph, its weights and the device context. A session binds
//! one batch buffer, runs one synchronous forward pass and exposes the raw
//! outputs. The device context is released exactly once, by [`close`] or on
//! drop.
//!
//! [`close`]: PredictorSession::close

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::Module;

use super::graph::{GraphSpec, NodeSpec, Op};
use super::profile::OpRecorder;
use crate::device::DeviceSelection;
use crate::error::{BatchrError, BatchrResult};

/// The graph input a batch buffer is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    pub name: String,
    /// Per-sample shape, batch dimension excluded
    pub shape: Vec<usize>,
}

impl InputBinding {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    /// Values per sample
    pub fn sample_len(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Everything needed to build a [`PredictorSession`]
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Serialized graph description (JSON)
    pub graph: Vec<u8>,
    /// Serialized weights (safetensors)
    pub weights: Vec<u8>,
    pub device: DeviceSelection,
    pub input: InputBinding,
    pub batch_size: usize,
}

/// A loaded model bound to one device
pub struct PredictorSession {
    graph: GraphSpec,
    params: HashMap<String, Tensor>,
    device: Device,
    selection: DeviceSelection,
    input: InputBinding,
    batch_size: usize,
    bound: Option<Tensor>,
    outputs: Option<Vec<Tensor>>,
    recorder: Option<Arc<OpRecorder>>,
    released: bool,
    #[cfg(test)]
    releases: Arc<std::sync::atomic::AtomicUsize>,
}

impl PredictorSession {
    /// Load graph and weights onto the selected device
    pub fn new(config: PredictorConfig) -> BatchrResult<Self> {
        let graph = GraphSpec::from_slice(&config.graph)?;

        let declared = graph.input(&config.input.name).ok_or_else(|| {
            BatchrError::ModelLoad(format!(
                "graph '{}' has no input named '{}'",
                graph.name, config.input.name
            ))
        })?;
        if declared.shape != config.input.shape {
            return Err(BatchrError::ModelLoad(format!(
                "input '{}' is declared as {:?} by the graph but bound as {:?}",
                declared.name, declared.shape, config.input.shape
            )));
        }
        if config.batch_size == 0 {
            return Err(BatchrError::ModelLoad("batch size must be at least 1".into()));
        }

        let device = config.device.open()?;
        let params = load_params(&config.weights, &device)?;
        if let Some(missing) = graph.required_params().find(|p| !params.contains_key(p)) {
            return Err(BatchrError::ModelLoad(format!(
                "weights are missing parameter '{missing}'"
            )));
        }

        tracing::info!(
            "Loaded graph '{}' ({} nodes, {} parameters) on {}",
            graph.name,
            graph.nodes.len(),
            params.len(),
            config.device
        );

        Ok(Self {
            graph,
            params,
            device,
            selection: config.device,
            input: config.input,
            batch_size: config.batch_size,
            bound: None,
            outputs: None,
            recorder: None,
            released: false,
            #[cfg(test)]
            releases: Arc::default(),
        })
    }

    pub fn graph(&self) -> &GraphSpec {
        &self.graph
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn selection(&self) -> DeviceSelection {
        self.selection
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Report per-node timings into `recorder` during [`forward`](Self::forward)
    pub fn attach_recorder(&mut self, recorder: Arc<OpRecorder>) {
        self.recorder = Some(recorder);
    }

    /// Bind the batch buffer to the declared input.
    ///
    /// The buffer must hold exactly `batch_size * prod(shape)` values.
    pub fn set_input(&mut self, name: &str, data: &[f32]) -> BatchrResult<()> {
        self.ensure_open()?;
        if name != self.input.name {
            return Err(BatchrError::Execution(format!(
                "unknown input '{}', the session is bound to '{}'",
                name, self.input.name
            )));
        }
        let expected = self.batch_size * self.input.sample_len();
        if data.len() != expected {
            return Err(BatchrError::InputShape {
                name: name.to_string(),
                expected,
                actual: data.len(),
            });
        }

        let mut dims = Vec::with_capacity(self.input.shape.len() + 1);
        dims.push(self.batch_size);
        dims.extend_from_slice(&self.input.shape);
        let tensor = Tensor::from_slice(data, dims, &self.device)
            .map_err(|e| BatchrError::execution("cannot upload input", e))?;
        self.bound = Some(tensor);
        self.outputs = None;
        Ok(())
    }

    /// Run one forward pass over the bound batch
    pub fn forward(&mut self) -> BatchrResult<()> {
        self.ensure_open()?;
        self.outputs = None;
        let input = self.bound.as_ref().ok_or_else(|| {
            BatchrError::Execution("forward called with no bound input".into())
        })?;

        let start = Instant::now();
        let mut values: HashMap<&str, Tensor> = HashMap::new();
        values.insert(self.input.name.as_str(), input.clone());

        let recording = self.recorder.as_ref().filter(|r| r.is_active());
        for node in &self.graph.nodes {
            let args = node
                .inputs
                .iter()
                .map(|name| {
                    values.get(name.as_str()).ok_or_else(|| {
                        BatchrError::Execution(format!(
                            "node '{}' reads unbound value '{}'",
                            node.name, name
                        ))
                    })
                })
                .collect::<BatchrResult<Vec<&Tensor>>>()?;

            let started = Instant::now();
            let value = self
                .apply(node, &args)
                .map_err(|e| BatchrError::execution(&format!("node '{}'", node.name), e))?;
            if let Some(recorder) = recording {
                self.device
                    .synchronize()
                    .map_err(|e| BatchrError::execution("device synchronize", e))?;
                recorder.record(&node.name, node.op.kind(), started, started.elapsed());
            }
            values.insert(node.name.as_str(), value);
        }

        let outputs = self
            .graph
            .outputs
            .iter()
            .map(|name| {
                values.get(name.as_str()).cloned().ok_or_else(|| {
                    BatchrError::Execution(format!("output '{name}' was not produced"))
                })
            })
            .collect::<BatchrResult<Vec<_>>>()?;

        tracing::debug!("Forward pass complete in {:?}", start.elapsed());
        self.outputs = Some(outputs);
        Ok(())
    }

    /// Flattened values of output slot `index` from the last forward pass
    pub fn output(&self, index: usize) -> BatchrResult<Vec<f32>> {
        self.ensure_open()?;
        let outputs = self.outputs.as_ref().ok_or_else(|| {
            BatchrError::Execution("no output before a successful forward".into())
        })?;
        let tensor = outputs.get(index).ok_or_else(|| {
            BatchrError::Execution(format!(
                "output slot {} does not exist ({} outputs)",
                index,
                outputs.len()
            ))
        })?;
        tensor
            .flatten_all()
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| BatchrError::execution("cannot read output", e))
    }

    /// Release the device context
    pub fn close(mut self) -> BatchrResult<()> {
        self.release()
    }

    fn release(&mut self) -> BatchrResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        #[cfg(test)]
        self.releases.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.bound = None;
        self.outputs = None;
        self.params.clear();
        self.recorder = None;
        let synced = self
            .device
            .synchronize()
            .map_err(|e| BatchrError::execution("device synchronize on close", e));
        tracing::debug!("Predictor session on {} closed", self.selection);
        synced
    }

    fn ensure_open(&self) -> BatchrResult<()> {
        if self.released {
            return Err(BatchrError::Execution("session is closed".into()));
        }
        Ok(())
    }

    fn param(&self, node: &NodeSpec, key: &str) -> candle_core::Result<&Tensor> {
        let name = format!("{}.{}", node.name, key);
        self.params
            .get(&name)
            .ok_or_else(|| candle_core::Error::Msg(format!("missing parameter '{name}'")))
    }

    fn apply(&self, node: &NodeSpec, args: &[&Tensor]) -> candle_core::Result<Tensor> {
        let x = args[0];
        match &node.op {
            Op::Conv2d {
                stride,
                padding,
                dilation,
                groups,
                bias,
            } => {
                let weight = self.param(node, "weight")?;
                let y = x.conv2d(weight, *padding, *stride, *dilation, *groups)?;
                if *bias {
                    let b = self.param(node, "bias")?;
                    y.broadcast_add(&b.reshape((1, b.dim(0)?, 1, 1))?)
                } else {
                    Ok(y)
                }
            }
            Op::BatchNorm { eps } => {
                let channel = |key: &str| -> candle_core::Result<Tensor> {
                    let t = self.param(node, key)?;
                    t.reshape((1, t.dim(0)?, 1, 1))
                };
                let denom = channel("running_var")?.affine(1.0, *eps)?.sqrt()?;
                x.broadcast_sub(&channel("running_mean")?)?
                    .broadcast_div(&denom)?
                    .broadcast_mul(&channel("weight")?)?
                    .broadcast_add(&channel("bias")?)
            }
            Op::Relu => x.relu(),
            Op::Sigmoid => candle_nn::ops::sigmoid(x),
            Op::Tanh => x.tanh(),
            Op::MaxPool2d { kernel, stride } => {
                x.max_pool2d_with_stride(*kernel, stride.unwrap_or(*kernel))
            }
            Op::AvgPool2d { kernel, stride } => {
                x.avg_pool2d_with_stride(*kernel, stride.unwrap_or(*kernel))
            }
            Op::GlobalAvgPool => x.mean_keepdim(3)?.mean_keepdim(2),
            Op::Flatten => x.flatten_from(1),
            Op::Linear { bias } => {
                let weight = self.param(node, "weight")?.clone();
                let bias = if *bias {
                    Some(self.param(node, "bias")?.clone())
                } else {
                    None
                };
                candle_nn::Linear::new(weight, bias).forward(x)
            }
            Op::Concat { axis } => Tensor::cat(args, *axis),
            Op::Add => args[1..]
                .iter()
                .try_fold(x.clone(), |acc, t| acc.broadcast_add(t)),
            Op::Softmax { axis } => candle_nn::ops::softmax(x, *axis),
            Op::Dropout { .. } => Ok(x.clone()),
        }
    }
}

impl Drop for PredictorSession {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release predictor session: {}", e);
        }
    }
}

fn load_params(weights: &[u8], device: &Device) -> BatchrResult<HashMap<String, Tensor>> {
    let raw = candle_core::safetensors::load_buffer(weights, device)
        .map_err(|e| BatchrError::model_load("malformed weights", e))?;
    raw.into_iter()
        .map(|(name, tensor)| {
            let tensor = tensor
                .to_dtype(DType::F32)
                .map_err(|e| BatchrError::model_load(&format!("parameter '{name}'"), e))?;
            Ok((name, tensor))
        })
        .collect()
}
