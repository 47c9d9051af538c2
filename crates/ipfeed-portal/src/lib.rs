// # ipfeed-portal
//
// Form-login threat-intelligence portals for the ipfeed pipeline.
//
// ## Contents
//
// - `PortalAuthenticator`: cookie-session login handshake
// - `ListingStrategy`, `ExportStrategy`, `ApiProbeStrategy`: the three
//   extraction strategies, in priority order
// - `build_strategies`: the ordered strategy list for one source
//
// ## Constraints
//
// - No retries, no scheduling: both are owned by ipfeed-core
// - No spawned background tasks; blocking spreadsheet parsing uses the
//   blocking pool and is awaited
// - Credentials never appear in logs or Debug output

pub mod auth;
pub mod client;
pub mod strategies;

pub use auth::{AuthState, PortalAuthenticator};
pub use strategies::{ApiProbeStrategy, ExportStrategy, ListingStrategy, build_strategies};
