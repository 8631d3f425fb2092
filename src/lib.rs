//! Chat agent that segments images with the hosted EfficientViT-SAM model
//!
//! Inbound chat messages carrying an image attachment are downloaded from
//! agent storage, forwarded to the remote segmentation app together with
//! parameters parsed from the accompanying text, and the segmented image is
//! published back to storage and referenced in the reply.

pub mod error;
pub mod handler;
pub mod mime;
pub mod models;
pub mod params;
pub mod pipeline;
pub mod protocol;
pub mod segment;
pub mod server;
pub mod storage;
pub mod transport;

pub use error::{Error, Result};
