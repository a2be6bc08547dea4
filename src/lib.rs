//! Stubs for object-storage service clients.
//!
//! Application code builds its clients from a [`ServiceRegistry`]. A test
//! stubs individual operations on that registry; the service class is swapped
//! for a recording proxy whose clients answer stubbed operations with
//! programmable stand-ins and pass everything else to the real client.
//!
//! ```no_run
//! use objectstub::{ClientConfig, ServiceRegistry, Spy};
//! use serde_json::json;
//!
//! let registry = ServiceRegistry::with_defaults();
//! let get_object = registry.stub("S3", "getObject").unwrap();
//! get_object.yields_ok(json!({ "Body": "hello world" }));
//!
//! let s3 = registry.construct("S3", &ClientConfig::new().region("eu-west-1")).unwrap();
//! s3.invoke_with_callback("getObject", json!({ "Bucket": "b", "Key": "k" }), |result| {
//!     assert_eq!(result.unwrap()["Body"], "hello world");
//! })
//! .unwrap();
//!
//! assert!(get_object.called_once());
//! registry.restore("S3").unwrap();
//! ```

pub mod adapters;
pub mod model;
pub mod recorder;
pub mod registry;
pub mod request;
pub mod stub;
pub mod util;

pub use adapters::{ServiceClass, ServiceClient};
pub use model::{
    config::ClientConfig,
    error::{SdkError, StubError},
    path::ServicePath,
};
pub use recorder::{CallLog, Spy, Stub};
pub use registry::{Client, ServiceRegistry, StubSandbox};
pub use request::{Callback, Deferred, ReadStream, Request, RequestEvent, Response};
pub use stub::{MethodStub, ServiceProxy, StubContext};
