pub mod auth;
pub mod config;
pub mod delete;
pub mod error;
pub mod events;
pub mod identity;
pub mod keys;
pub mod model;
pub mod portal;
pub mod sharing;
pub mod storage;
pub mod tags;
pub mod upload;
pub mod urls;

pub use config::PortalConfig;
pub use error::{PortalError, PortalResult, StoreError, StoreResult};
pub use model::{
    DeleteOutcome, Document, DocumentRef, Permission, SharingResult, SignedUrls, UploadMetadata,
};
pub use portal::DocumentPortal;
pub use upload::FileUpload;
