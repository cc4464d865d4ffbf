//! # probe-core
//!
//! Protocol plumbing for the probe client: HTTP/1.1 message types, the
//! client-side codec, and the ordered stage pipeline that sits between the
//! transport and the application.
//!
//! Inbound events travel through the stages first to last; outbound
//! messages travel last to first and must leave the pipeline as raw bytes.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod http;
pub mod pipeline;
pub mod wire;

pub use codec::{HttpClientCodec, HttpCodecStage};
pub use errors::{CodecError, PipelineError};
pub use http::{Headers, HttpObject, HttpRequest, Method, ResponseHead, Version};
pub use pipeline::{Event, Message, Pipeline, Stage};
pub use wire::{WireLogger, hex_dump};
