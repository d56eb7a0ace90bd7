pub mod infer;
pub mod upload;

pub use infer::InferSchemaCommand;
pub use upload::{DiscardUploadCommand, UploadChunkCommand};
