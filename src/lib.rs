// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

//! Nearest neighbor distances between spots detected in the channels of
//! multichannel microscopy images.
//!
//! [distances] holds the distance engine. [segmentation] and [regions] turn
//! channel z stacks into spot centroids. [server], [annotations] and [shapes]
//! read images from an image server and publish the results back to it.

pub mod annotations;
pub mod distances;
pub mod error;
pub mod histogram_funcs;
pub mod regions;
pub mod segmentation;
pub mod server;
pub mod shapes;
pub mod volume;
