pub mod claims;
pub mod config;
pub mod error;
pub mod signer;

pub use claims::{Claims, SigningClaims, TokenType};
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use signer::{InMemoryKeyStore, RsaJwtSigner, TokenSigner};
