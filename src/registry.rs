//! The registry that application code constructs clients from, and the stub
//! manager operating on it.
//!
//! A [`ServiceRegistry`] is an ordinary value: tests create one, hand it (or a
//! clone, which shares state) to the code under test, and stub services on it.
//! Nothing is process wide, so independent tests cannot see each other's stubs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use serde_json::Value;
use tracing::{info, span, warn, Level};

use crate::{
    adapters::{self, gcs::GcsService, memory::MemoryService, s3::S3Service, ServiceClass, ServiceClient},
    model::{
        config::ClientConfig,
        error::{SdkError, StubError},
        path::ServicePath,
    },
    recorder::lock,
    request::{Callback, Request},
    stub::{MethodStub, ServiceProxy, StubContext},
};

#[derive(Clone)]
pub(crate) enum Slot {
    Original(Arc<dyn ServiceClass>),
    Proxy(Arc<ServiceProxy>),
}

impl Slot {
    fn class(&self) -> Arc<dyn ServiceClass> {
        match self {
            Slot::Original(class) => class.clone(),
            Slot::Proxy(proxy) => proxy.clone() as Arc<dyn ServiceClass>,
        }
    }
}

pub(crate) type Slots = Mutex<HashMap<ServicePath, Slot>>;

/// Reinstates the original class at `path`. Restoring a path that is not
/// currently stubbed is a usage error.
pub(crate) fn restore_slot(slots: &Slots, path: &ServicePath) -> Result<(), StubError> {
    let span = span!(Level::INFO, "restore", context = "restore");
    let _e = span.enter();

    let mut slots = lock(slots);
    let original = match slots.get(path) {
        None => return Err(StubError::UnknownService(path.to_string())),
        Some(Slot::Original(_)) => return Err(StubError::NotStubbed(path.to_string())),
        Some(Slot::Proxy(proxy)) => proxy.original(),
    };

    slots.insert(path.clone(), Slot::Original(original));
    info!(service = %path, "restored");

    Ok(())
}

#[derive(Clone, Default)]
pub struct ServiceRegistry {
    slots: Arc<Slots>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in services: `S3`, `Storage` and `Memory`.
    pub fn with_defaults() -> Self {
        let defaults: [(&str, Arc<dyn ServiceClass>); 3] = [
            ("S3", Arc::new(S3Service)),
            ("Storage", Arc::new(GcsService)),
            ("Memory", Arc::new(MemoryService::new())),
        ];

        let slots = defaults
            .into_iter()
            .map(|(name, class)| (ServicePath::builtin(name), Slot::Original(class)))
            .collect();

        Self {
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    /// Adds a service class at a path that is still free.
    pub fn register(&self, path: &str, class: Arc<dyn ServiceClass>) -> Result<(), StubError> {
        let path = ServicePath::parse(path)?;
        let mut slots = lock(&self.slots);

        if slots.contains_key(&path) {
            return Err(StubError::AlreadyRegistered(path.to_string()));
        }

        info!(service = %path, class = %class.name(), "registered");
        slots.insert(path, Slot::Original(class));

        Ok(())
    }

    /// Puts `class` at `path`, replacing whatever was there.
    pub fn set(&self, path: &str, class: Arc<dyn ServiceClass>) -> Result<(), StubError> {
        let path = ServicePath::parse(path)?;
        lock(&self.slots).insert(path, Slot::Original(class));

        Ok(())
    }

    /// The class currently registered at `path`, a proxy while stubbed.
    pub fn get(&self, path: &str) -> Result<Arc<dyn ServiceClass>, StubError> {
        let path = ServicePath::parse(path)?;
        lock(&self.slots)
            .get(&path)
            .map(Slot::class)
            .ok_or_else(|| StubError::UnknownService(path.to_string()))
    }

    pub fn paths(&self) -> Vec<ServicePath> {
        let mut paths: Vec<ServicePath> = lock(&self.slots).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Builds a client of the class at `path` with `config`.
    pub fn construct(&self, path: &str, config: &ClientConfig) -> Result<Client, StubError> {
        let class = self.get(path)?;
        let service = ServicePath::parse(path)?;

        Ok(Client {
            service,
            inner: class.construct(config)?,
        })
    }

    /// Replaces `operation` of the service at `path` with a stand-in. Calls
    /// return a fresh synthetic request until the stand-in is programmed.
    pub fn stub(&self, path: &str, operation: &str) -> Result<MethodStub, StubError> {
        let stub = MethodStub::new(operation);
        self.install(path, stub.clone())?;

        Ok(stub)
    }

    /// Replaces `operation` with a stand-in that runs `replacement` on every
    /// call. The replacement gets a synthetic request/response pair, the
    /// original params and the caller's callback; the call returns the
    /// context's request.
    pub fn stub_with<F>(&self, path: &str, operation: &str, replacement: F) -> Result<MethodStub, StubError>
    where
        F: Fn(&StubContext, Value, Option<Callback>) + Send + Sync + 'static,
    {
        let stub = MethodStub::with_replacement(operation, Arc::new(replacement));
        self.install(path, stub.clone())?;

        Ok(stub)
    }

    fn install(&self, path: &str, stub: MethodStub) -> Result<(), StubError> {
        let span = span!(Level::INFO, "stub", context = "stub");
        let _e = span.enter();

        let path = ServicePath::parse(path)?;
        let mut slots = lock(&self.slots);

        let existing = slots
            .get(&path)
            .cloned()
            .ok_or_else(|| StubError::UnknownService(path.to_string()))?;

        if !adapters::has_operation(existing.class().as_ref(), stub.operation()) {
            return Err(unknown_operation(&path, stub.operation()));
        }

        let proxy = match existing {
            Slot::Proxy(proxy) => proxy,
            Slot::Original(original) => {
                let proxy = Arc::new(ServiceProxy::new(
                    path.clone(),
                    original,
                    Arc::downgrade(&self.slots),
                ));
                slots.insert(path.clone(), Slot::Proxy(proxy.clone()));
                info!(service = %path, "proxy installed");

                proxy
            }
        };

        proxy.install(stub);

        Ok(())
    }

    pub fn is_stubbed(&self, path: &str) -> Result<bool, StubError> {
        let path = ServicePath::parse(path)?;
        match lock(&self.slots).get(&path) {
            None => Err(StubError::UnknownService(path.to_string())),
            Some(slot) => Ok(matches!(slot, Slot::Proxy(_))),
        }
    }

    /// The recording proxy at `path`, for assertions on client construction.
    pub fn proxy(&self, path: &str) -> Result<Arc<ServiceProxy>, StubError> {
        let path = ServicePath::parse(path)?;
        match lock(&self.slots).get(&path) {
            None => Err(StubError::UnknownService(path.to_string())),
            Some(Slot::Original(_)) => Err(StubError::NotStubbed(path.to_string())),
            Some(Slot::Proxy(proxy)) => Ok(proxy.clone()),
        }
    }

    /// Reinstates the original class at `path`, dropping every stand-in of it.
    pub fn restore(&self, path: &str) -> Result<(), StubError> {
        let path = ServicePath::parse(path)?;
        restore_slot(&self.slots, &path)
    }

    /// Restores every stubbed path. Returns the paths that were restored.
    pub fn restore_all(&self) -> Vec<ServicePath> {
        let stubbed: Vec<ServicePath> = lock(&self.slots)
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Proxy(_)))
            .map(|(path, _)| path.clone())
            .collect();

        let mut restored = Vec::new();
        for path in stubbed {
            if restore_slot(&self.slots, &path).is_ok() {
                restored.push(path);
            }
        }

        restored
    }

    /// A scope whose stubs are restored when it is dropped.
    pub fn sandbox(&self) -> StubSandbox {
        StubSandbox {
            registry: self.clone(),
            stubbed: Vec::new(),
        }
    }
}

fn unknown_operation(path: &ServicePath, operation: &str) -> StubError {
    StubError::UnknownOperation {
        service: path.to_string(),
        operation: operation.to_string(),
    }
}

/// A client handle as application code sees it.
#[derive(Clone)]
pub struct Client {
    service: ServicePath,
    inner: Arc<dyn ServiceClient>,
}

impl Client {
    pub fn service(&self) -> &ServicePath {
        &self.service
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    /// Starts `operation` and hands back the request for the caller to drive.
    pub fn invoke(&self, operation: &str, params: Value) -> Result<Request, StubError> {
        self.inner.invoke(operation, params, None)
    }

    /// Starts `operation` and delivers its outcome to `callback`.
    pub fn invoke_with_callback(
        &self,
        operation: &str,
        params: Value,
        callback: impl FnOnce(Result<Value, SdkError>) + Send + 'static,
    ) -> Result<Request, StubError> {
        self.inner.invoke(operation, params, Some(Box::new(callback)))
    }
}

/// Scoped stubbing. Every path stubbed through the sandbox that is still
/// stubbed when the sandbox drops gets restored.
pub struct StubSandbox {
    registry: ServiceRegistry,
    stubbed: Vec<ServicePath>,
}

impl StubSandbox {
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn stub(&mut self, path: &str, operation: &str) -> Result<MethodStub, StubError> {
        let stub = self.registry.stub(path, operation)?;
        self.track(path)?;

        Ok(stub)
    }

    pub fn stub_with<F>(&mut self, path: &str, operation: &str, replacement: F) -> Result<MethodStub, StubError>
    where
        F: Fn(&StubContext, Value, Option<Callback>) + Send + Sync + 'static,
    {
        let stub = self.registry.stub_with(path, operation, replacement)?;
        self.track(path)?;

        Ok(stub)
    }

    fn track(&mut self, path: &str) -> Result<(), StubError> {
        let path = ServicePath::parse(path)?;
        if !self.stubbed.contains(&path) {
            self.stubbed.push(path);
        }

        Ok(())
    }

    /// Restores everything stubbed through this sandbox now, reporting the
    /// first failure.
    pub fn restore(&mut self) -> Result<(), StubError> {
        let mut first_err = None;

        for path in self.stubbed.drain(..) {
            match restore_slot(&self.registry.slots, &path) {
                Ok(()) | Err(StubError::NotStubbed(_)) => {}
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for StubSandbox {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!(error_message = %err, error_group = "sandbox_restore", "restore failed on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{recorder::Spy, request::RequestEvent};

    fn memory_registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry.register("Memory", Arc::new(MemoryService::new())).unwrap();
        registry
            .register("DynamoDB.DocumentClient", Arc::new(MemoryService::new()))
            .unwrap();
        registry
    }

    #[test]
    fn test_with_defaults() {
        let registry = ServiceRegistry::with_defaults();
        let paths: Vec<String> = registry.paths().iter().map(|p| p.to_string()).collect();

        assert_eq!(paths, vec!["Memory", "S3", "Storage"]);
        for path in paths {
            assert!(!registry.is_stubbed(&path).unwrap(), "failed for case: {}", path);
            assert_eq!(registry.get(&path).unwrap().name(), path, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_register() {
        let registry = memory_registry();

        let cases = vec![
            ("Memory", "AlreadyRegistered"),
            ("Memory..Client", "InvalidPath"),
            ("Memory.Client", "ok"),
        ];

        for (path, expected) in cases {
            let result = match registry.register(path, Arc::new(MemoryService::new())) {
                Ok(()) => "ok",
                Err(StubError::AlreadyRegistered(_)) => "AlreadyRegistered",
                Err(StubError::InvalidPath(_)) => "InvalidPath",
                Err(_) => "other",
            };
            assert_eq!(result, expected, "failed for case: {}", path);
        }
    }

    #[test]
    fn test_stub_resolution_errors() {
        let registry = memory_registry();

        assert!(matches!(
            registry.stub("Nope", "getObject"),
            Err(StubError::UnknownService(_))
        ));
        assert!(matches!(
            registry.stub("Memory", "getObjekt"),
            Err(StubError::UnknownOperation { .. })
        ));
        assert!(matches!(registry.stub("", "getObject"), Err(StubError::InvalidPath(_))));

        // failed stubs leave no proxy behind
        assert!(!registry.is_stubbed("Memory").unwrap());
        assert!(matches!(registry.is_stubbed("Nope"), Err(StubError::UnknownService(_))));
    }

    #[test]
    fn test_stub_and_restore_lifecycle() {
        let registry = memory_registry();
        let original = registry.get("DynamoDB.DocumentClient").unwrap();

        assert!(!registry.is_stubbed("DynamoDB.DocumentClient").unwrap());

        registry.stub("DynamoDB.DocumentClient", "getObject").unwrap();
        assert!(registry.is_stubbed("DynamoDB.DocumentClient").unwrap());
        assert!(!registry.is_stubbed("Memory").unwrap());
        assert!(!Arc::ptr_eq(&registry.get("DynamoDB.DocumentClient").unwrap(), &original));

        registry.restore("DynamoDB.DocumentClient").unwrap();
        assert!(!registry.is_stubbed("DynamoDB.DocumentClient").unwrap());
        assert!(Arc::ptr_eq(&registry.get("DynamoDB.DocumentClient").unwrap(), &original));
    }

    #[test]
    fn test_restore_errors() {
        let registry = memory_registry();

        assert!(matches!(registry.restore("Memory"), Err(StubError::NotStubbed(_))));
        assert!(matches!(registry.restore("Nope"), Err(StubError::UnknownService(_))));

        registry.stub("Memory", "getObject").unwrap();
        registry.restore("Memory").unwrap();
        assert!(matches!(registry.restore("Memory"), Err(StubError::NotStubbed(_))));
    }

    #[test]
    fn test_restub_reuses_proxy() {
        let registry = memory_registry();

        registry.stub("Memory", "getObject").unwrap();
        let proxy = registry.proxy("Memory").unwrap();
        registry.stub("Memory", "putObject").unwrap();
        let replaced = registry.stub("Memory", "getObject").unwrap();

        assert!(Arc::ptr_eq(&proxy, &registry.proxy("Memory").unwrap()));
        assert_eq!(
            proxy.stubbed_operations(),
            vec!["getObject".to_string(), "putObject".to_string()]
        );

        let client = registry.construct("Memory", &ClientConfig::new()).unwrap();
        client.invoke("getObject", json!({ "Key": "k" })).unwrap();
        assert!(replaced.called_once());
    }

    #[test]
    fn test_restore_removes_all_stand_ins() {
        let registry = memory_registry();
        let get = registry.stub("Memory", "getObject").unwrap();
        let put = registry.stub("Memory", "putObject").unwrap();

        registry.proxy("Memory").unwrap().restore().unwrap();

        let client = registry.construct("Memory", &ClientConfig::new()).unwrap();
        let params = json!({ "Bucket": "b", "Key": "k", "Body": "real" });
        let request = client.invoke("putObject", params).unwrap();
        request.send();

        let request = client.invoke("getObject", json!({ "Bucket": "b", "Key": "k" })).unwrap();
        let body = Arc::new(Mutex::new(None));
        let slot = body.clone();
        request.on(RequestEvent::Success, move |response| {
            *lock(&slot) = response.data().map(|d| d["Body"].clone());
        });
        request.send();

        assert!(!get.called());
        assert!(!put.called());
        assert_eq!(*lock(&body), Some(json!("real")));
    }

    #[test]
    fn test_proxy_records_constructions() {
        let registry = memory_registry();
        registry.stub("Memory", "getObject").unwrap();

        let config = ClientConfig::new().region("eu-west-1");
        let client = registry.construct("Memory", &config).unwrap();
        let proxy = registry.proxy("Memory").unwrap();

        assert_eq!(client.service().to_string(), "Memory");
        assert_eq!(client.config(), &config);
        assert!(proxy.called_once());
        assert!(proxy.called_with(&config));
        assert!(matches!(registry.proxy("DynamoDB.DocumentClient"), Err(StubError::NotStubbed(_))));
    }

    #[test]
    fn test_clones_share_slots() {
        let registry = memory_registry();
        let handed_out = registry.clone();

        registry.stub("Memory", "getObject").unwrap();
        assert!(handed_out.is_stubbed("Memory").unwrap());

        handed_out.restore("Memory").unwrap();
        assert!(!registry.is_stubbed("Memory").unwrap());
    }

    #[test]
    fn test_restore_all() {
        let registry = memory_registry();
        registry.stub("Memory", "getObject").unwrap();
        registry.stub("DynamoDB.DocumentClient", "putObject").unwrap();

        let mut restored: Vec<String> = registry.restore_all().iter().map(|p| p.to_string()).collect();
        restored.sort();

        assert_eq!(restored, vec!["DynamoDB.DocumentClient", "Memory"]);
        assert!(registry.restore_all().is_empty());
    }

    #[test]
    fn test_sandbox_restores_on_drop() {
        let registry = memory_registry();
        let original = registry.get("Memory").unwrap();

        {
            let mut sandbox = registry.sandbox();
            sandbox.stub("Memory", "getObject").unwrap();
            sandbox
                .stub_with("Memory", "putObject", |ctx, _, _| {
                    ctx.request.promise.resolves(json!({}));
                })
                .unwrap();
            sandbox.stub("DynamoDB.DocumentClient", "getObject").unwrap();

            // restored by hand inside the scope, drop must not complain
            sandbox.registry().restore("DynamoDB.DocumentClient").unwrap();

            assert!(registry.is_stubbed("Memory").unwrap());
        }

        assert!(!registry.is_stubbed("Memory").unwrap());
        assert!(!registry.is_stubbed("DynamoDB.DocumentClient").unwrap());
        assert!(Arc::ptr_eq(&registry.get("Memory").unwrap(), &original));
    }

    #[test]
    fn test_sandbox_restore_early() {
        let registry = memory_registry();
        let mut sandbox = registry.sandbox();

        sandbox.stub("Memory", "getObject").unwrap();
        sandbox.restore().unwrap();

        assert!(!registry.is_stubbed("Memory").unwrap());
        sandbox.restore().unwrap();
    }
}
