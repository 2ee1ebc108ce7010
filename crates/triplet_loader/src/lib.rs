pub mod assembler;
pub mod batch;
pub mod config;
pub mod decoder;
pub mod error;
pub mod layout;
pub mod producer;
pub mod registry;
pub mod sampler;

pub use assembler::BatchAssembler;
pub use batch::Batch;
pub use config::{Device, SourceConfig, QUEUE_CAPACITY};
pub use decoder::{GrayImageDecoder, ImageDecoder};
pub use error::LoaderError;
pub use layout::{discover_personas, Persona, SignatureLayout, SignatureRef};
pub use producer::ProducerState;
pub use registry::SourceRegistry;
pub use sampler::{Triplet, TripletKind, TripletSampler};
