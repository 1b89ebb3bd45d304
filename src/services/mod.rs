pub mod auth_service;
pub mod provisioner;
pub mod resolver;
pub mod tenant_service;
pub mod token_service;
pub mod user_directory;

pub use auth_service::{AuthError, AuthService};
pub use provisioner::{CredentialGenerator, ProvisionError, ProvisionStep, ProvisionedDatabase, Provisioner};
pub use resolver::{ResolveError, ResolvedTenant, TenantContext, TenantResolver};
pub use tenant_service::{MigrationReport, TenantError, TenantService, TenantState};
pub use token_service::{
    IssuedTokens, PgTokenStore, RefreshedAccess, TokenClaims, TokenError, TokenService, TokenStore,
};
pub use user_directory::{PgUserDirectory, UserDirectory};
