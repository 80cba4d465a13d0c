mod client;
pub mod envelope;
mod error;
mod refresh;
mod tokens;

pub use self::client::{decode, ApiClient};
pub use self::envelope::{ApiResponse, ApiResult, ErrorDetail, FieldError};
pub use self::error::{ApiError, NETWORK_ERROR_MESSAGE};
pub use self::refresh::{RefreshCoordinator, RefreshLeader, RefreshTicket, RefreshWaiter};
pub use self::tokens::{TokenPair, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
