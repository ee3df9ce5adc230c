//! Credential configuration
//!
//! Access tokens are looked up per origin through a [`CredentialProvider`].
//! The default provider reads a JSON store from the user's config directory:
//!
//! ```json
//! { "misskey.io": { "token": "..." } }
//! ```

pub mod credentials;

pub use credentials::{CredentialProvider, FileCredentials, StaticCredentials, Token};
