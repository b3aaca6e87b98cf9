pub mod default_client;
pub mod error;
pub mod request;
pub mod transport;

pub use default_client::CodexHttpClient;
pub use default_client::CodexRequestBuilder;
pub use error::TransportError;
pub use request::Request;
pub use request::Response;
pub use transport::ByteStream;
pub use transport::HttpTransport;
pub use transport::ReqwestTransport;
pub use transport::StreamResponse;

pub use codex_utils_rustls_provider::ensure_rustls_crypto_provider;
