//! Request/response side of the client: transport, retry policy, session refresh
//! and the request executor.

mod client;
pub mod refresh;
mod retry;
pub mod transport;

pub use client::ApiClient;
pub use refresh::{is_refresh_excluded, RefreshCoordinator, REFRESH_PATH};
pub use retry::RetryPolicy;
pub use transport::{
    FormPart, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody, UploadForm,
};
