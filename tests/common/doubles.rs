//! Scripted test doubles for pipeline scenarios.

use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use cumulus::{
    BuildCloudSpec, BuilderError, CloudProvider, CommandOutput, CommandRunner, EnsureOutcome,
    Location, PromptError, Prompter, ProviderFuture, Record, RecordAction, RecordOutcome,
    Registry, ResourceGroupSpec, ResourceHandle, Scope, SecurityGroupSpec, StorageAccountSpec,
    Subscription, VirtualNetworkSpec, VmSize, WorkerImageSpec,
};
use thiserror::Error;

/// Error produced when a double is scripted to fail a step.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("scripted failure in {0}")]
pub struct ScriptedError(pub &'static str);

#[derive(Debug, Default)]
struct ProviderState {
    calls: Vec<&'static str>,
    existing: HashSet<&'static str>,
    fail: Option<&'static str>,
    empty_listings: bool,
}

/// Provider double that records calls and simulates existing resources.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl ScriptedProvider {
    /// Creates a provider where nothing exists yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider where the named resource kinds already exist.
    pub fn with_existing(kinds: &[&'static str]) -> Self {
        let provider = Self::default();
        {
            let mut state = provider.lock();
            state.existing = kinds.iter().copied().collect();
        }
        provider
    }

    /// Creates a provider whose listing calls return no options.
    pub fn with_empty_listings() -> Self {
        let provider = Self::default();
        provider.lock().empty_listings = true;
        provider
    }

    /// Scripts the named step to fail.
    pub fn fail_on(&self, kind: &'static str) {
        self.lock().fail = Some(kind);
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listings_empty(&self) -> bool {
        self.lock().empty_listings
    }

    fn record(&self, kind: &'static str) -> Result<bool, ScriptedError> {
        let mut state = self.lock();
        if state.fail == Some(kind) {
            return Err(ScriptedError(kind));
        }
        state.calls.push(kind);
        Ok(state.existing.contains(kind))
    }

    fn outcome(
        &self,
        kind: &'static str,
        name: &str,
    ) -> Result<EnsureOutcome<ResourceHandle>, ScriptedError> {
        let existed = self.record(kind)?;
        let handle = ResourceHandle {
            id: format!("/scripted/{name}"),
            name: name.to_owned(),
        };
        Ok(if existed {
            EnsureOutcome::existing(handle)
        } else {
            EnsureOutcome::created(handle)
        })
    }
}

impl CloudProvider for ScriptedProvider {
    type Error = ScriptedError;

    fn verify_credentials(&self) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(async move { self.record("credentials").map(|_| ()) })
    }

    fn list_subscriptions(&self) -> ProviderFuture<'_, Vec<Subscription>, Self::Error> {
        Box::pin(async move {
            self.record("list_subscriptions")?;
            if self.listings_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Subscription {
                id: String::from("11111111-2222-3333-4444-555555555555"),
                display_name: String::from("Pay-As-You-Go"),
            }])
        })
    }

    fn list_locations<'a>(
        &'a self,
        _scope: &'a Scope,
    ) -> ProviderFuture<'a, Vec<Location>, Self::Error> {
        Box::pin(async move {
            self.record("list_locations")?;
            if self.listings_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![Location {
                name: String::from("westeurope"),
                display_name: String::from("West Europe"),
            }])
        })
    }

    fn list_vm_sizes<'a>(
        &'a self,
        _scope: &'a Scope,
        _location: &'a str,
    ) -> ProviderFuture<'a, Vec<VmSize>, Self::Error> {
        Box::pin(async move {
            self.record("list_vm_sizes")?;
            if self.listings_empty() {
                return Ok(Vec::new());
            }
            Ok(vec![VmSize {
                name: String::from("Standard_D2s_v3"),
                cores: 2,
                memory_mb: 8192,
            }])
        })
    }

    fn ensure_service_principal(
        &self,
    ) -> ProviderFuture<'_, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(async move { self.outcome("principal", "scripted-principal") })
    }

    fn ensure_resource_group<'a>(
        &'a self,
        _scope: &'a Scope,
        spec: &'a ResourceGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(async move { self.outcome("resource_group", &spec.name) })
    }

    fn ensure_storage_account<'a>(
        &'a self,
        _scope: &'a Scope,
        spec: &'a StorageAccountSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(async move { self.outcome("storage", &spec.name) })
    }

    fn ensure_virtual_network<'a>(
        &'a self,
        _scope: &'a Scope,
        spec: &'a VirtualNetworkSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(async move { self.outcome("network", &spec.name) })
    }

    fn ensure_security_group<'a>(
        &'a self,
        _scope: &'a Scope,
        spec: &'a SecurityGroupSpec,
    ) -> ProviderFuture<'a, EnsureOutcome<ResourceHandle>, Self::Error> {
        Box::pin(async move { self.outcome("security_group", &spec.name) })
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    calls: Vec<&'static str>,
    clouds: HashMap<String, BuildCloudSpec>,
    images: HashMap<String, WorkerImageSpec>,
    fail: Option<&'static str>,
}

/// Registry double holding records in memory.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl ScriptedRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing build cloud record.
    pub fn seed_build_cloud(&self, spec: BuildCloudSpec) {
        self.lock().clouds.insert(spec.name.clone(), spec);
    }

    /// Seeds an existing worker image record.
    pub fn seed_worker_image(&self, spec: WorkerImageSpec) {
        self.lock().images.insert(spec.name.clone(), spec);
    }

    /// Scripts the named step to fail.
    pub fn fail_on(&self, kind: &'static str) {
        self.lock().fail = Some(kind);
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self, kind: &'static str) -> Result<(), ScriptedError> {
        let mut state = self.lock();
        if state.fail == Some(kind) {
            return Err(ScriptedError(kind));
        }
        state.calls.push(kind);
        Ok(())
    }

    fn reconcile<S: Clone + Eq>(
        existing: Option<&S>,
        spec: &S,
        store: impl FnOnce(S),
    ) -> RecordOutcome<S> {
        let action = match existing {
            Some(found) if found == spec => RecordAction::Unchanged,
            Some(_) => RecordAction::Updated,
            None => RecordAction::Created,
        };
        if action != RecordAction::Unchanged {
            store(spec.clone());
        }
        RecordOutcome {
            record: Record {
                id: String::from("scripted-record"),
                spec: spec.clone(),
            },
            action,
        }
    }
}

impl Registry for ScriptedRegistry {
    type Error = ScriptedError;

    fn check_service(&self) -> ProviderFuture<'_, (), Self::Error> {
        Box::pin(async move { self.record_call("check_service") })
    }

    fn ensure_build_cloud<'a>(
        &'a self,
        spec: &'a BuildCloudSpec,
    ) -> ProviderFuture<'a, RecordOutcome<BuildCloudSpec>, Self::Error> {
        Box::pin(async move {
            self.record_call("ensure_build_cloud")?;
            let mut state = self.lock();
            let existing = state.clouds.get(&spec.name).cloned();
            let outcome = Self::reconcile(existing.as_ref(), spec, |value| {
                state.clouds.insert(value.name.clone(), value);
            });
            Ok(outcome)
        })
    }

    fn ensure_worker_image<'a>(
        &'a self,
        spec: &'a WorkerImageSpec,
    ) -> ProviderFuture<'a, RecordOutcome<WorkerImageSpec>, Self::Error> {
        Box::pin(async move {
            self.record_call("ensure_worker_image")?;
            let mut state = self.lock();
            let existing = state.images.get(&spec.name).cloned();
            let outcome = Self::reconcile(existing.as_ref(), spec, |value| {
                state.images.insert(value.name.clone(), value);
            });
            Ok(outcome)
        })
    }
}

/// Prompter double that replays scripted answers and records what was
/// asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<Vec<usize>>,
    prompts: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedPrompter {
    /// Creates a prompter that answers with the given indices in order.
    pub fn new(answers: &[usize]) -> Self {
        Self {
            answers: Mutex::new(answers.to_vec()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far: each entry is the heading and its options.
    pub fn prompts(&self) -> Vec<(String, Vec<String>)> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Headings shown so far, in order.
    pub fn headings(&self) -> Vec<String> {
        self.prompts()
            .into_iter()
            .map(|(heading, _)| heading)
            .collect()
    }
}

impl Prompter for ScriptedPrompter {
    fn choose(&self, heading: &str, options: &[String]) -> Result<usize, PromptError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((heading.to_owned(), options.to_vec()));
        let mut answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        if answers.is_empty() {
            return Err(PromptError::Io(String::from("no scripted answer left")));
        }
        let answer = answers.remove(0);
        if answer >= options.len() {
            return Err(PromptError::InvalidChoice(answer.to_string()));
        }
        Ok(answer)
    }
}

/// Command runner double that records invocations and fabricates the
/// builder manifest instead of running anything.
#[derive(Clone, Debug)]
pub struct ManifestWritingRunner {
    manifest_path: std::path::PathBuf,
    artifact_id: String,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    fail_build: Arc<Mutex<bool>>,
}

impl ManifestWritingRunner {
    /// Creates a runner that writes `artifact_id` into `manifest_path` when
    /// a build is requested.
    pub fn new(manifest_path: impl Into<std::path::PathBuf>, artifact_id: &str) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            artifact_id: artifact_id.to_owned(),
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_build: Arc::new(Mutex::new(false)),
        }
    }

    /// Scripts build invocations to exit non-zero.
    pub fn fail_builds(&self) {
        *self.fail_build.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Recorded invocations: each entry is the program followed by its args.
    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for ManifestWritingRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, BuilderError> {
        let mut rendered = vec![program.to_owned()];
        rendered.extend(args.iter().map(|arg| arg.to_string_lossy().into_owned()));
        let is_build = rendered.iter().any(|arg| arg == "build");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rendered);

        if is_build {
            if *self.fail_build.lock().unwrap_or_else(PoisonError::into_inner) {
                return Ok(CommandOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: String::from("scripted build failure"),
                });
            }
            let manifest = format!(
                r#"{{"builds": [{{"artifact_id": "{}"}}]}}"#,
                self.artifact_id
            );
            std::fs::write(&self.manifest_path, manifest).map_err(|err| BuilderError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;
        }

        Ok(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}
