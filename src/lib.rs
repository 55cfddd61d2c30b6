pub mod config;
pub mod error;
pub mod paginator;
pub mod resource;
pub mod source;
pub mod telemetry;
pub mod token_provider;

pub use config::{ApiConfig, Config, Credentials};
pub use error::{Result, SourceError};
pub use paginator::{Page, PageCursor, Paginator, ResourceRecord};
pub use resource::Resource;
pub use source::{ConnectionStatus, PrimetricSource, ResourceStream};
pub use token_provider::{AccessToken, TokenProvider};
