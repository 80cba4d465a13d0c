mod page;
mod persist;
mod registry;
pub mod state;
mod user;

pub use self::page::{TablePageOptions, TablePageStore, DEFAULT_PAGE_RESET_VALUE};
pub use self::persist::PersistedSlot;
pub use self::registry::StoreRegistry;
pub use self::state::{
    reduce, FilterKey, PageAction, PagePatch, PageQueryState, PageRequest, PageResponse,
    SortDirection,
};
pub use self::user::{UserSnapshot, UserState, UserStore, USER_STATE_KEY};
