// ============================================================
// Layer 5 — ConvNet Classifier
// ============================================================
// A small VGG-style classifier:
//
//   [conv3x3 → BN → ReLU → maxpool 2x2] × depth
//   → global average pool → dropout → linear(classes)
//
// Each block halves the spatial size, so inputs need to be at
// least 2^depth pixels on each side.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::ml::model::{Architecture, Classifier};

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    /// Filters in the first block; doubled by each following block.
    #[config(default = "32")]
    pub base_filters: usize,

    #[config(default = "3")]
    pub depth: usize,

    #[config(default = "0.3")]
    pub dropout: f64,
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn:   BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        Self { conv, bn, relu: Relu::new(), pool }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    pub blocks:      Vec<ConvBlock<B>>,
    pub global_pool: AdaptiveAvgPool2d,
    pub dropout:     Dropout,
    pub head:        Linear<B>,
}

impl Architecture for ConvNetConfig {
    type Net<B: Backend> = ConvNet<B>;

    fn name(&self) -> &str {
        "conv"
    }

    fn init<B: Backend>(&self, outputs: usize, channels: usize, device: &B::Device) -> ConvNet<B> {
        let mut blocks = Vec::with_capacity(self.depth);
        let mut in_ch = channels;
        for i in 0..self.depth {
            let out_ch = self.base_filters << i;
            blocks.push(ConvBlock::new(in_ch, out_ch, device));
            in_ch = out_ch;
        }
        ConvNet {
            blocks,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout:     DropoutConfig::new(self.dropout).init(),
            head:        LinearConfig::new(in_ch, outputs).init(device),
        }
    }
}

impl<B: Backend> Classifier<B> for ConvNet<B> {
    fn inference(&self, images: Tensor<B, 4>, _is_training: bool) -> Tensor<B, 2> {
        let mut x = images;
        for block in &self.blocks {
            x = block.forward(x);
        }
        // [N, C, 1, 1] → [N, C]
        let x = self.global_pool.forward(x);
        let [n, c, _, _] = x.dims();
        let x = self.dropout.forward(x.reshape([n, c]));
        self.head.forward(x)
    }
}
