pub mod config;
pub mod driver;
pub mod error;
pub mod resume;
pub mod source;
pub mod transport;

pub use driver::{ChunkedUploadDriver, DriverOptions, ProgressEvent, UploadOutcome};
pub use error::UploadError;
pub use resume::ResumeState;
pub use source::PartSource;
pub use transport::{HttpTransport, MultipartTransport};
