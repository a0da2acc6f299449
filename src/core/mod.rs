//! # Core Protocol Components
//!
//! Tensors, binary documents, and packet framing.
//!
//! ## Components
//! - **Tensor**: dense `f32` buffers with an explicit shape
//! - **Document**: BSON-compatible self-describing documents (the wire codec)
//! - **Packet**: binary frame with magic bytes, version and length
//! - **Codec**: Tokio codec for framing packets over byte streams
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Version(1)] [Length(4)] [Document(N)]
//! ```
//!
//! ## Limits
//! - Maximum packet and document size: 16MB
//! - Maximum document nesting: 32 levels
//! - Length validation before allocation

pub mod codec;
pub mod document;
pub mod packet;
pub mod tensor;
