//! Graph info command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::engine::GraphSpec;

/// Show a graph summary and, optionally, its weight blob
pub async fn info(graph: PathBuf, weights: Option<PathBuf>) -> Result<()> {
    let bytes = std::fs::read(&graph).with_context(|| format!("reading {}", graph.display()))?;
    let spec = GraphSpec::from_slice(&bytes)?;

    let name = if spec.name.is_empty() {
        "(unnamed)"
    } else {
        spec.name.as_str()
    };
    println!("Graph: {}\n", name);
    println!("Path: {}", graph.display());

    println!("\nInputs:");
    for input in &spec.inputs {
        println!("  {} {:?}", input.name, input.shape);
    }

    println!("\nNodes: {}", spec.nodes.len());
    for node in &spec.nodes {
        println!("  {:<16} {:<16} <- {}", node.name, node.op.kind(), node.inputs.join(", "));
    }

    println!("\nOutputs: {}", spec.outputs.join(", "));

    if let Some(weights) = weights {
        print_weights_info(&spec, &weights)?;
    }
    Ok(())
}

fn print_weights_info(spec: &GraphSpec, path: &Path) -> Result<()> {
    let tensors = candle_core::safetensors::load(path, &candle_core::Device::Cpu)
        .with_context(|| format!("reading {}", path.display()))?;

    let parameters: usize = tensors.values().map(|t| t.elem_count()).sum();
    println!("\nWeights: {} tensors, {} parameters", tensors.len(), parameters);

    let missing: Vec<String> = spec
        .required_params()
        .filter(|name| !tensors.contains_key(name))
        .collect();
    if missing.is_empty() {
        println!("All graph parameters present");
    } else {
        println!("Missing parameters: {}", missing.join(", "));
    }

    if let Ok(metadata) = std::fs::metadata(path) {
        let size_mb = metadata.len() as f64 / (1024.0 * 1024.0);
        println!("Weights size: {:.2} MB", size_mb);
    }
    Ok(())
}
