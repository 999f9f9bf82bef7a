// ============================================================
// Layer 5 — Fully Convolutional Segmenter
// ============================================================
// Stride-1 dilated convolutions keep the output at input size:
//
//   conv3x3 d=1 → conv3x3 d=2 → conv3x3 d=4 → ...   (each + BN + ReLU)
//   → conv1x1(outputs)
//
// Receptive field grows with the dilation while no pooling
// ever shrinks the map, so logits line up pixel-for-pixel with
// the label mask.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::ml::model::{Architecture, Segmenter};

#[derive(Config, Debug)]
pub struct FcnConfig {
    #[config(default = "32")]
    pub filters: usize,

    /// Number of dilated layers; layer i uses dilation 2^i.
    #[config(default = "3")]
    pub depth: usize,
}

#[derive(Module, Debug)]
pub struct DilatedBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn:   BatchNorm<B, 2>,
    pub relu: Relu,
}

impl<B: Backend> DilatedBlock<B> {
    fn new(in_ch: usize, out_ch: usize, dilation: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_ch, out_ch], [3, 3])
            .with_dilation([dilation, dilation])
            .with_padding(PaddingConfig2d::Explicit(dilation, dilation))
            .with_bias(false)
            .init(device);
        Self { conv, bn: BatchNormConfig::new(out_ch).init(device), relu: Relu::new() }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.relu.forward(self.bn.forward(self.conv.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct Fcn<B: Backend> {
    pub layers:     Vec<DilatedBlock<B>>,
    pub classifier: Conv2d<B>,
}

impl Architecture for FcnConfig {
    type Net<B: Backend> = Fcn<B>;

    fn name(&self) -> &str {
        "fcn"
    }

    fn init<B: Backend>(&self, outputs: usize, channels: usize, device: &B::Device) -> Fcn<B> {
        let mut in_ch = channels;
        let layers = (0..self.depth)
            .map(|i| {
                let block = DilatedBlock::new(in_ch, self.filters, 1 << i, device);
                in_ch = self.filters;
                block
            })
            .collect();
        let classifier = Conv2dConfig::new([in_ch, outputs], [1, 1]).init(device);
        Fcn { layers, classifier }
    }
}

impl<B: Backend> Segmenter<B> for Fcn<B> {
    fn inference(&self, images: Tensor<B, 4>, _is_training: bool) -> Tensor<B, 4> {
        let x = self.layers.iter().fold(images, |x, layer| layer.forward(x));
        self.classifier.forward(x)
    }
}
