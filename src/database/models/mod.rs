pub mod tenant;
pub mod token;
pub mod user;

pub use tenant::{NewTenant, TenantRecord};
pub use token::{NewToken, TokenKind, TokenRecord};
pub use user::{UserCredentials, UserIdentity};
