mod http;
mod kv;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
    ValidatedUrl, DEFAULT_TIMEOUT_MS,
};
pub use self::kv::{
    JsonSlot, KeyNamespace, KvError, KvKey, LocalStore, MemoryStore, StorageErrorCode,
};

#[cfg(not(target_arch = "wasm32"))]
pub use self::http::ReqwestTransport;
#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteStore;
