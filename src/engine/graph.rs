//! Serialized graph description
//!
//! A graph is a JSON document listing its inputs, its nodes in topological
//! order and the nodes whose values are returned:
//!
//! ```json
//! {
//!   "name": "tiny",
//!   "inputs": [{ "name": "data", "shape": [3, 8, 8] }],
//!   "nodes": [
//!     { "name": "conv1", "op": "conv2d", "inputs": ["data"], "padding": 1 },
//!     { "name": "relu1", "op": "relu", "inputs": ["conv1"] },
//!     { "name": "pool", "op": "global_avg_pool", "inputs": ["relu1"] },
//!     { "name": "flat", "op": "flatten", "inputs": ["pool"] },
//!     { "name": "prob", "op": "softmax", "inputs": ["flat"] }
//!   ],
//!   "outputs": ["prob"]
//! }
//! ```
//!
//! Op attributes (`padding`, `kernel`, ...) are keys of the node object
//! itself. Parameters live in the weights blob under `<node>.<param>`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{BatchrError, BatchrResult};

fn one() -> usize {
    1
}

fn yes() -> bool {
    true
}

fn default_eps() -> f64 {
    1e-5
}

/// Operator applied by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Conv2d {
        #[serde(default = "one")]
        stride: usize,
        #[serde(default)]
        padding: usize,
        #[serde(default = "one")]
        dilation: usize,
        #[serde(default = "one")]
        groups: usize,
        #[serde(default = "yes")]
        bias: bool,
    },
    BatchNorm {
        #[serde(default = "default_eps")]
        eps: f64,
    },
    Relu,
    Sigmoid,
    Tanh,
    MaxPool2d {
        kernel: usize,
        /// Defaults to `kernel`
        #[serde(default)]
        stride: Option<usize>,
    },
    AvgPool2d {
        kernel: usize,
        #[serde(default)]
        stride: Option<usize>,
    },
    GlobalAvgPool,
    Flatten,
    Linear {
        #[serde(default = "yes")]
        bias: bool,
    },
    Concat {
        #[serde(default = "one")]
        axis: usize,
    },
    Add,
    Softmax {
        #[serde(default = "one")]
        axis: usize,
    },
    /// Identity at inference time
    Dropout {
        #[serde(default)]
        p: f32,
    },
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Conv2d { .. } => "conv2d",
            Op::BatchNorm { .. } => "batch_norm",
            Op::Relu => "relu",
            Op::Sigmoid => "sigmoid",
            Op::Tanh => "tanh",
            Op::MaxPool2d { .. } => "max_pool2d",
            Op::AvgPool2d { .. } => "avg_pool2d",
            Op::GlobalAvgPool => "global_avg_pool",
            Op::Flatten => "flatten",
            Op::Linear { .. } => "linear",
            Op::Concat { .. } => "concat",
            Op::Add => "add",
            Op::Softmax { .. } => "softmax",
            Op::Dropout { .. } => "dropout",
        }
    }

    /// Parameters this op reads from the weights blob
    pub fn params(&self) -> &'static [&'static str] {
        match self {
            Op::Conv2d { bias: true, .. } | Op::Linear { bias: true } => &["weight", "bias"],
            Op::Conv2d { bias: false, .. } | Op::Linear { bias: false } => &["weight"],
            Op::BatchNorm { .. } => &["weight", "bias", "running_mean", "running_var"],
            _ => &[],
        }
    }

    fn accepts(&self, arity: usize) -> bool {
        match self {
            Op::Concat { .. } | Op::Add => arity >= 2,
            _ => arity == 1,
        }
    }
}

/// A graph input and its per-sample shape (batch dimension excluded)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    #[serde(flatten)]
    pub op: Op,
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<InputSpec>,
    pub nodes: Vec<NodeSpec>,
    pub outputs: Vec<String>,
}

impl GraphSpec {
    /// Parse and validate a serialized graph
    pub fn from_slice(bytes: &[u8]) -> BatchrResult<Self> {
        let graph: GraphSpec = serde_json::from_slice(bytes)
            .map_err(|e| BatchrError::model_load("malformed graph", e))?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Every `<node>.<param>` name the graph needs
    pub fn required_params(&self) -> impl Iterator<Item = String> + '_ {
        self.nodes.iter().flat_map(|node| {
            node.op
                .params()
                .iter()
                .map(move |p| format!("{}.{}", node.name, p))
        })
    }

    fn validate(&self) -> BatchrResult<()> {
        let invalid = |msg: String| Err(BatchrError::ModelLoad(format!("invalid graph: {msg}")));

        if self.inputs.is_empty() {
            return invalid("no inputs declared".into());
        }
        if self.outputs.is_empty() {
            return invalid("no outputs declared".into());
        }

        let mut defined: HashSet<&str> = HashSet::new();
        for input in &self.inputs {
            if !defined.insert(input.name.as_str()) {
                return invalid(format!("duplicate name '{}'", input.name));
            }
        }
        for node in &self.nodes {
            if !node.op.accepts(node.inputs.len()) {
                return invalid(format!(
                    "node '{}' ({}) cannot take {} inputs",
                    node.name,
                    node.op.kind(),
                    node.inputs.len()
                ));
            }
            if let Some(missing) = node.inputs.iter().find(|i| !defined.contains(i.as_str())) {
                return invalid(format!(
                    "node '{}' reads '{}' before it is defined",
                    node.name, missing
                ));
            }
            if !defined.insert(node.name.as_str()) {
                return invalid(format!("duplicate name '{}'", node.name));
            }
        }
        if let Some(missing) = self.outputs.iter().find(|o| !defined.contains(o.as_str())) {
            return invalid(format!("output '{missing}' is not defined"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY: &str = r#"{
        "name": "tiny",
        "inputs": [{ "name": "data", "shape": [3, 8, 8] }],
        "nodes": [
            { "name": "conv1", "op": "conv2d", "inputs": ["data"], "padding": 1 },
            { "name": "relu1", "op": "relu", "inputs": ["conv1"] },
            { "name": "pool", "op": "global_avg_pool", "inputs": ["relu1"] },
            { "name": "flat", "op": "flatten", "inputs": ["pool"] },
            { "name": "prob", "op": "softmax", "inputs": ["flat"] }
        ],
        "outputs": ["prob"]
    }"#;

    #[test]
    fn test_parse_graph() {
        let graph = GraphSpec::from_slice(TINY.as_bytes()).unwrap();
        assert_eq!(graph.name, "tiny");
        assert_eq!(graph.input("data").unwrap().shape, vec![3, 8, 8]);
        assert_eq!(
            graph.nodes[0].op,
            Op::Conv2d {
                stride: 1,
                padding: 1,
                dilation: 1,
                groups: 1,
                bias: true
            }
        );
        assert_eq!(graph.nodes[4].op, Op::Softmax { axis: 1 });
        let params: Vec<_> = graph.required_params().collect();
        assert_eq!(params, vec!["conv1.weight", "conv1.bias"]);
    }

    #[test]
    fn test_attributes_sit_beside_op() {
        let json = r#"{
            "inputs": [{ "name": "data", "shape": [1, 4, 4] }],
            "nodes": [
                {
                    "name": "pool", "op": "max_pool2d", "inputs": ["data"],
                    "kernel": 2, "stride": 1
                },
                { "name": "avg", "op": "avg_pool2d", "inputs": ["pool"], "kernel": 3 }
            ],
            "outputs": ["avg"]
        }"#;
        let graph = GraphSpec::from_slice(json.as_bytes()).unwrap();
        assert_eq!(
            graph.nodes[0].op,
            Op::MaxPool2d {
                kernel: 2,
                stride: Some(1)
            }
        );
        assert_eq!(
            graph.nodes[1].op,
            Op::AvgPool2d {
                kernel: 3,
                stride: None
            }
        );

        let missing_kernel = json.replace(r#", "kernel": 3"#, "");
        assert!(matches!(
            GraphSpec::from_slice(missing_kernel.as_bytes()),
            Err(BatchrError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        let err = GraphSpec::from_slice(b"{ not json").unwrap_err();
        assert!(matches!(err, BatchrError::ModelLoad(_)));
    }

    #[test]
    fn test_unknown_op() {
        let json = r#"{
            "inputs": [{ "name": "data", "shape": [1] }],
            "nodes": [{ "name": "x", "op": "lstm", "inputs": ["data"] }],
            "outputs": ["x"]
        }"#;
        assert!(GraphSpec::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_forward_reference_rejected() {
        let json = r#"{
            "inputs": [{ "name": "data", "shape": [1] }],
            "nodes": [
                { "name": "a", "op": "relu", "inputs": ["b"] },
                { "name": "b", "op": "relu", "inputs": ["data"] }
            ],
            "outputs": ["a"]
        }"#;
        let err = GraphSpec::from_slice(json.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("before it is defined"));
    }

    #[test]
    fn test_arity_checked() {
        let json = r#"{
            "inputs": [{ "name": "data", "shape": [1] }],
            "nodes": [{ "name": "sum", "op": "add", "inputs": ["data"] }],
            "outputs": ["sum"]
        }"#;
        assert!(GraphSpec::from_slice(json.as_bytes()).is_err());
    }

    #[test]
    fn test_undefined_output() {
        let json = r#"{
            "inputs": [{ "name": "data", "shape": [1] }],
            "nodes": [{ "name": "r", "op": "relu", "inputs": ["data"] }],
            "outputs": ["prob"]
        }"#;
        assert!(GraphSpec::from_slice(json.as_bytes()).is_err());
    }
}
