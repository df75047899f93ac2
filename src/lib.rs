//! Stacked convolutional auto-encoders and the feed-forward classifiers built from them.
//!
//! Units ([unit]) encode and reconstruct a patch of a [DataBlock](data::DataBlock).
//! A [ConvolutionLayer](convolution::ConvolutionLayer) replicates one unit over a grid
//! of patches, either sharing its weights or giving every position its own copy.
//! Layers are chained into a [Stack](network::Stack), wrapped by
//! [Scae](network::Scae) for layer-wise pre-training and by
//! [Ffcnn](network::Ffcnn) for supervised classification.

pub mod a_funcs;
pub mod config;
pub mod convolution;
pub mod data;
pub mod error;
pub mod initializer;
pub mod layers;
pub mod network;
pub mod optimizer;
pub mod persistence;
pub mod trainer;
pub mod unit;

pub use error::{Error, Result};
