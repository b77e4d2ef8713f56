//! Azure DevOps collaborators for the session manager: identity delegation
//! through the Azure CLI and directory lookups over the REST API.

mod azure_cli_delegate;
mod cli_executable;
mod http_directory;

pub use azure_cli_delegate::*;
pub use cli_executable::*;
pub use http_directory::*;
