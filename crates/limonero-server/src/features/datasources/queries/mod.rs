pub mod download;
pub mod list;
pub mod probe;
pub mod sample;

pub use download::DownloadQuery;
pub use list::{ListDataSourcesQuery, ListDataSourcesResponse};
pub use probe::ProbeUploadQuery;
pub use sample::SampleQuery;
