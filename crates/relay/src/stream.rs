//! Reconstruction of a model reply from a chunked upstream byte stream
//!
//! Bytes flow through the [`framer::LineFramer`] into JSON records, a provider specific
//! [`event::StreamAdapter`] turns those into [`event::ProviderEvent`]s, and the
//! [`assembler::BlockAssembler`] rebuilds the indexed content blocks.
pub mod assembler;
pub mod decoder;
pub mod event;
pub mod framer;
pub mod sources;
