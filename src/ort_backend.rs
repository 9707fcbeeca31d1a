//! ONNX Runtime 推理后端
//! 会话构建, 输入尺寸发现, 执行推理

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::{info, warn};
use ndarray::Array4;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::Session;
use ort::value::{Tensor, ValueType};

/// 动态输入尺寸时使用的默认值
pub const DEFAULT_IMAGE_SIZE: u32 = 640;

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub ep: OrtEP,
    /// (height, width), 仅在模型输入为动态尺寸时使用
    pub image_size: (u32, u32),
}

impl OrtConfig {
    pub fn new(f: impl Into<PathBuf>, ep: OrtEP) -> Self {
        Self {
            f: f.into(),
            ep,
            image_size: (DEFAULT_IMAGE_SIZE, DEFAULT_IMAGE_SIZE),
        }
    }
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    input_name: String,
    output_name: String,
    height: u32,
    width: u32,
    /// 输出通道数 (4 + nc), 动态时为 None
    output_channels: Option<usize>,
}

impl OrtBackend {
    pub fn build(config: OrtConfig) -> Result<Self> {
        let providers: Vec<ExecutionProviderDispatch> = match config.ep {
            OrtEP::CPU => vec![CPUExecutionProvider::default().build()],
            OrtEP::CUDA(device_id) => vec![
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
            OrtEP::Trt(device_id) => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .with_fp16(true)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ],
        };

        let session = Session::builder()
            .context("failed to create ORT session builder")?
            .with_execution_providers(providers)
            .context("failed to register execution providers")?
            .commit_from_file(&config.f)
            .with_context(|| format!("failed to load {}", config.f.display()))?;

        let input = session
            .inputs
            .first()
            .context("model has no inputs")?;
        let output = session
            .outputs
            .first()
            .context("model has no outputs")?;

        let input_dims = tensor_dims(&input.input_type);
        let output_dims = tensor_dims(&output.output_type);
        let (input_name, output_name) = (input.name.clone(), output.name.clone());

        // NCHW
        let (fallback_h, fallback_w) = config.image_size;
        let height = fixed_dim(&input_dims, 2).unwrap_or(fallback_h as usize) as u32;
        let width = fixed_dim(&input_dims, 3).unwrap_or(fallback_w as usize) as u32;
        if fixed_dim(&input_dims, 2).is_none() || fixed_dim(&input_dims, 3).is_none() {
            warn!("模型输入为动态尺寸, 使用 {}x{}", width, height);
        }

        let backend = Self {
            input_name,
            output_name,
            output_channels: fixed_dim(&output_dims, 1),
            session,
            ep: config.ep,
            height,
            width,
        };
        info!(
            "🧠 模型已加载: {} (EP: {:?}, 输入 {}x{})",
            config.f.display(),
            backend.ep,
            backend.width,
            backend.height
        );
        Ok(backend)
    }

    /// 执行推理, 返回第一个输出的 (形状, 数据)
    pub fn run(&mut self, xs: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let tensor = Tensor::from_array(xs).context("failed to create input tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("inference failed")?;
        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .context("failed to extract output tensor")?;
        let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((shape, data.to_vec()))
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// 类别数 (由输出形状推导)
    pub fn nc(&self) -> Option<usize> {
        self.output_channels
            .and_then(|c| c.checked_sub(4))
            .filter(|&nc| nc > 0)
    }
}

fn tensor_dims(value_type: &ValueType) -> Vec<i64> {
    match value_type {
        ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
        _ => Vec::new(),
    }
}

fn fixed_dim(dims: &[i64], index: usize) -> Option<usize> {
    dims.get(index).copied().filter(|&d| d > 0).map(|d| d as usize)
}
