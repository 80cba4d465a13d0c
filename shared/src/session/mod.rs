mod authority;
mod channel;
mod manager;

pub use self::authority::{
    FixtureAuthority, SessionAuthority, SessionError, FIXTURE_PASSWORD, FIXTURE_SESSION_PREFIX,
};
pub use self::channel::{
    BroadcastHub, Delivery, SessionChannel, SessionMessage, SessionSubscription, TabChannel,
    CHANNEL_CAPACITY,
};
pub use self::manager::SessionManager;
