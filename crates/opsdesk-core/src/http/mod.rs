mod error;
mod executor;
pub(crate) mod lenient;
mod request;
mod response;
mod wire;

pub use error::{FetchError, RequestError, TransportError};
pub use executor::{AuthenticatedClient, Outcome};
pub use request::{RequestBody, RequestContext};
pub use response::{ApiResponse, Envelope};
pub(crate) use wire::{AttachedCredential, Wire};
