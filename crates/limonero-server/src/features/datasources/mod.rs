pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{DiscardUploadCommand, InferSchemaCommand, UploadChunkCommand};
pub use queries::{DownloadQuery, ListDataSourcesQuery, ProbeUploadQuery, SampleQuery};
pub use routes::datasources_routes;
