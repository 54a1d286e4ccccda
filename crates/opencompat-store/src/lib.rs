pub mod credentials;
pub mod disk_cache;
pub mod paths;
pub mod store;

pub use credentials::{
    ApiKeyCredentials, AuthMethod, DeviceFlowConfig, OAuthConfig, OAuthCredentials, TokenData,
};
pub use store::{CredentialStore, StoreError};
