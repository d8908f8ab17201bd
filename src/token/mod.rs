//! Proxy-token lifecycle: generation, validation, caching, and revocation.

pub mod cache;
pub mod codec;
pub mod revoker;
pub mod store;
pub mod validator;

pub use cache::ValidationCache;
pub use codec::{decode_token, generate_token, obfuscate_token, validate_format};
pub use revoker::{spawn_automatic_revocation, AutomaticRevocationTask, Revoker};
pub use store::{Project, Token, TokenStore};
pub use validator::{TokenValidator, Validated};
