// ============================================================
// Layer 5 — Network Zoo
// ============================================================
// Concrete networks selectable with `--net`:
//
//   conv                → ConvNet     (classification)
//   resnet-v2-18        → ResNetV2    (classification, 7x7 root)
//   resnet-v2-18-cifar  → ResNetV2    (classification, no root)
//   fcn                 → Fcn         (segmentation)

pub mod convnet;
pub mod fcn;
pub mod resnet;

pub use convnet::ConvNetConfig;
pub use fcn::FcnConfig;
pub use resnet::ResNetV2Config;
