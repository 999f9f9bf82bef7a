// ============================================================
// Layer 5 — ResNet v2 (pre-activation, bottleneck)
// ============================================================
// He et al. (2016) "Identity Mappings in Deep Residual Networks".
//
// Bottleneck unit, depth = 4 × base, bottleneck = base:
//
//   preact = ReLU(BN(x))
//   shortcut = x subsampled            if channels already match
//            = conv1x1/stride(preact)  otherwise
//   r = conv1x1(preact)      → BN → ReLU
//   r = conv3x3/stride(r)    → BN → ReLU
//   r = conv1x1(r)                         (no BN, no activation)
//   out = shortcut + r
//
// Blocks (base, units, stride); the stride sits on each block's
// last unit:
//
//   (64, 2, 2) (128, 2, 2) (256, 2, 2) (512, 2, 1)
//
// The full variant starts with conv7x7/2 + maxpool3x3/2; the cifar
// variant feeds images straight into the first block.
//
// Weight decay is reported as `wd · Σ‖w‖² / 2` over every conv kernel.
//
// Batch norm uses momentum 0.1 (decay 0.9) and epsilon 5e-4.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::ml::model::{Architecture, Classifier};

const BLOCKS: [(usize, usize, usize); 4] = [(64, 2, 2), (128, 2, 2), (256, 2, 2), (512, 2, 1)];
const BN_MOMENTUM: f64 = 0.1;
const BN_EPSILON: f64 = 5e-4;

#[derive(Config, Debug)]
pub struct ResNetV2Config {
    #[config(default = "true")]
    pub include_root_block: bool,

    #[config(default = "1e-4")]
    pub weight_decay: f64,

    /// Divides every block's base depth (1 = the published widths).
    #[config(default = "1")]
    pub width_divisor: usize,
}

impl ResNetV2Config {
    /// resnet_v2_18: 224-style inputs with the 7x7 root block.
    pub fn resnet_v2_18() -> Self {
        Self::new()
    }

    /// resnet_v2_18_cifar: small inputs, no root block.
    pub fn resnet_v2_18_cifar() -> Self {
        Self::new().with_include_root_block(false)
    }
}

fn batch_norm<B: Backend>(channels: usize, device: &B::Device) -> BatchNorm<B, 2> {
    BatchNormConfig::new(channels)
        .with_momentum(BN_MOMENTUM)
        .with_epsilon(BN_EPSILON)
        .init(device)
}

fn conv<B: Backend>(
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    bias: bool,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = (kernel - 1) / 2;
    Conv2dConfig::new([in_ch, out_ch], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(bias)
        .init(device)
}

fn sq_norm<B: Backend>(c: &Conv2d<B>) -> Tensor<B, 1> {
    c.weight.val().powf_scalar(2.0).sum()
}

// ─── Bottleneck Unit ──────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub preact:    BatchNorm<B, 2>,
    pub shortcut:  Option<Conv2d<B>>,
    pub subsample: Option<MaxPool2d>,
    pub conv1:     Conv2d<B>,
    pub bn1:       BatchNorm<B, 2>,
    pub conv2:     Conv2d<B>,
    pub bn2:       BatchNorm<B, 2>,
    pub conv3:     Conv2d<B>,
    pub relu:      Relu,
}

impl<B: Backend> Bottleneck<B> {
    pub fn new(in_ch: usize, base: usize, stride: usize, device: &B::Device) -> Self {
        let depth = base * 4;
        let (shortcut, subsample) = if in_ch == depth {
            let pool = (stride > 1)
                .then(|| MaxPool2dConfig::new([1, 1]).with_strides([stride, stride]).init());
            (None, pool)
        } else {
            (Some(conv(in_ch, depth, 1, stride, true, device)), None)
        };
        Self {
            preact: batch_norm(in_ch, device),
            shortcut,
            subsample,
            conv1: conv(in_ch, base, 1, 1, false, device),
            bn1:   batch_norm(base, device),
            conv2: conv(base, base, 3, stride, false, device),
            bn2:   batch_norm(base, device),
            conv3: conv(base, depth, 1, 1, true, device),
            relu:  Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let preact = self.relu.forward(self.preact.forward(x.clone()));
        let shortcut = match (&self.shortcut, &self.subsample) {
            (Some(proj), _) => proj.forward(preact.clone()),
            (None, Some(pool)) => pool.forward(x),
            (None, None) => x,
        };
        let r = self.relu.forward(self.bn1.forward(self.conv1.forward(preact)));
        let r = self.relu.forward(self.bn2.forward(self.conv2.forward(r)));
        shortcut + self.conv3.forward(r)
    }

    fn sq_norm(&self) -> Tensor<B, 1> {
        let mut total = sq_norm(&self.conv1) + sq_norm(&self.conv2) + sq_norm(&self.conv3);
        if let Some(proj) = &self.shortcut {
            total = total + sq_norm(proj);
        }
        total
    }
}

// ─── Network ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ResNetV2<B: Backend> {
    pub root:         Option<Conv2d<B>>,
    pub root_pool:    Option<MaxPool2d>,
    pub units:        Vec<Bottleneck<B>>,
    pub postnorm:     BatchNorm<B, 2>,
    pub relu:         Relu,
    pub global_pool:  AdaptiveAvgPool2d,
    pub logits:       Conv2d<B>,
    pub weight_decay: f64,
}

impl Architecture for ResNetV2Config {
    type Net<B: Backend> = ResNetV2<B>;

    fn name(&self) -> &str {
        if self.include_root_block { "resnet_v2_18" } else { "resnet_v2_18_cifar" }
    }

    fn init<B: Backend>(&self, outputs: usize, channels: usize, device: &B::Device) -> ResNetV2<B> {
        let (root, root_pool, mut in_ch) = if self.include_root_block {
            let root = conv(channels, 64, 7, 2, true, device);
            let pool = MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init();
            (Some(root), Some(pool), 64)
        } else {
            (None, None, channels)
        };

        let divisor = self.width_divisor.max(1);
        let mut units = Vec::new();
        for (base, count, stride) in BLOCKS {
            let base = (base / divisor).max(1);
            for i in 0..count {
                let s = if i + 1 == count { stride } else { 1 };
                units.push(Bottleneck::new(in_ch, base, s, device));
                in_ch = base * 4;
            }
        }

        ResNetV2 {
            root,
            root_pool,
            units,
            postnorm:     batch_norm(in_ch, device),
            relu:         Relu::new(),
            global_pool:  AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            logits:       conv(in_ch, outputs, 1, 1, true, device),
            weight_decay: self.weight_decay,
        }
    }
}

impl<B: Backend> Classifier<B> for ResNetV2<B> {
    fn inference(&self, images: Tensor<B, 4>, _is_training: bool) -> Tensor<B, 2> {
        let mut x = images;
        if let Some(root) = &self.root {
            x = root.forward(x);
        }
        if let Some(pool) = &self.root_pool {
            x = pool.forward(x);
        }
        for unit in &self.units {
            x = unit.forward(x);
        }
        let x = self.relu.forward(self.postnorm.forward(x));
        let x = self.logits.forward(self.global_pool.forward(x));
        let [n, c, _, _] = x.dims();
        x.reshape([n, c])
    }

    fn regularization(&self) -> Option<Tensor<B, 1>> {
        if self.weight_decay <= 0.0 {
            return None;
        }
        let mut total = sq_norm(&self.logits);
        if let Some(root) = &self.root {
            total = total + sq_norm(root);
        }
        for unit in &self.units {
            total = total + unit.sq_norm();
        }
        Some(total.mul_scalar(self.weight_decay / 2.0))
    }
}
