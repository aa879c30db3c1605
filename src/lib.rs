pub mod config;
pub mod error;
pub mod runtime;
pub mod task;

// Core API
pub use runtime::{CallbackMessage, Runtime, SchedulerMessage, run_event_loop};
pub use task::{HttpRequest, RequestId, XhrUpdate};

// Request objects and their events
pub use runtime::body::{EncodedBody, File, FormData, FormValue, RequestBody};
pub use runtime::event::{EventTarget, EventType, Listener, ProgressEvent};
pub use runtime::multipart::MultipartEncoder;
pub use runtime::xhr::{ReadyState, XmlHttpRequest, XmlHttpRequestUpload};

// Configuration and errors
pub use config::{Config, ConfigError, ProxyConfig, ProxySetting, TransportConfig};
pub use error::XhrError;
