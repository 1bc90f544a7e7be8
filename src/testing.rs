//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a `ProviderService` in-process, without the
//! stdio protocol. [`MemoryClient`] is an in-memory [`TfeClient`] that counts
//! calls per method and can be told to fail or to respond slowly.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use hemmer_provider_tfe::testing::{MemoryClient, ProviderTester};
//! use hemmer_provider_tfe::TfeProvider;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let client = Arc::new(MemoryClient::new().with_workspace("acme", "prod"));
//! let tester = ProviderTester::new(TfeProvider::new(client.clone()));
//!
//! let state = tester
//!     .lifecycle_create(
//!         "tfe_variable",
//!         json!({
//!             "key": "region",
//!             "value": "eu-west-1",
//!             "category": "env",
//!             "workspace_id": "acme/prod"
//!         }),
//!     )
//!     .await
//!     .unwrap();
//!
//! assert_eq!(state["key"], "region");
//! assert_eq!(client.calls("create_variable"), 1);
//! # });
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::{
    ClientError, OAuthClient, OAuthClientCreateOptions, Policy, PolicyCreateOptions,
    PolicyUpdateOptions, RegistryModule, RegistryModuleCreateOptions, Team, TeamAccess,
    TeamAccessAddOptions, TfeClient, Variable, VariableCreateOptions, VariableListOptions,
    VariableUpdateOptions, Workspace,
};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides simplified
/// methods for testing without the stdio protocol.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the diagnostics if there are errors.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, proposed_state).await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource; `None` if it no longer exists.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Read a resource that is expected to exist.
    async fn read_existing(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.read(resource_type, current_state)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("{} vanished during the lifecycle", resource_type))
            })
    }

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read_existing(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read_existing(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Run a full CRUD lifecycle: create → read → update → read → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created_state = self.lifecycle_create(resource_type, initial_config).await?;
        let updated_state = self
            .lifecycle_update(resource_type, created_state, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated_state.clone())
            .await?;
        Ok(updated_state)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error whose summary or attribute
/// mentions `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics.iter().any(|d| {
        d.is_error()
            && (d.summary.contains(substring)
                || d.attribute.as_deref().is_some_and(|a| a.contains(substring)))
    });

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

// =========================================================================
// In-memory client
// =========================================================================

#[derive(Default)]
struct Store {
    next_id: u64,
    oauth_clients: BTreeMap<String, OAuthClient>,
    policies: BTreeMap<String, Policy>,
    policy_content: HashMap<String, Vec<u8>>,
    teams: BTreeMap<String, Team>,
    workspaces: BTreeMap<String, Workspace>,
    team_access: BTreeMap<String, TeamAccess>,
    variables: BTreeMap<String, Variable>,
    registry_modules: BTreeMap<(String, String, String), RegistryModule>,
    last_variable_update: Option<VariableUpdateOptions>,
}

impl Store {
    fn assign_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn find_workspace(&self, organization: &str, name: &str) -> Option<&Workspace> {
        self.workspaces
            .values()
            .find(|ws| ws.organization == organization && ws.name == name)
    }
}

fn unprocessable(message: &str) -> ClientError {
    ClientError::Api {
        status: 422,
        message: message.to_string(),
    }
}

/// The API hides the value of a sensitive variable.
fn as_returned(variable: &Variable) -> Variable {
    let mut variable = variable.clone();
    if variable.sensitive {
        variable.value.clear();
    }
    variable
}

/// An in-memory [`TfeClient`] with per-method call counters, error injection
/// and optional latency.
///
/// Identifiers are assigned from one counter as `<prefix>-<n>`, e.g. `pol-1`.
#[derive(Default)]
pub struct MemoryClient {
    store: Mutex<Store>,
    calls: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, ClientError>>,
    latency: Option<Duration>,
}

impl MemoryClient {
    /// Create an empty client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a team.
    pub fn with_team(self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let team = Team {
            id: id.into(),
            name: name.into(),
        };
        self.store().teams.insert(team.id.clone(), team);
        self
    }

    /// Add a workspace to an organization.
    pub fn with_workspace(self, organization: impl Into<String>, name: impl Into<String>) -> Self {
        {
            let mut store = self.store();
            let id = store.assign_id("ws");
            let workspace = Workspace {
                id: id.clone(),
                name: name.into(),
                organization: organization.into(),
            };
            store.workspaces.insert(id, workspace);
        }
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every later call of `method` fail with `error`.
    pub fn fail_on(&self, method: &'static str, error: ClientError) {
        lock(&self.failures).insert(method, error);
    }

    /// Stop failing calls injected with [`MemoryClient::fail_on`].
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Number of calls made to `method`.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    /// Number of calls made to any method.
    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// A stored policy.
    pub fn policy(&self, id: &str) -> Option<Policy> {
        self.store().policies.get(id).cloned()
    }

    /// The uploaded source of a policy.
    pub fn policy_content(&self, id: &str) -> Option<String> {
        self.store()
            .policy_content
            .get(id)
            .map(|content| String::from_utf8_lossy(content).into_owned())
    }

    /// A stored OAuth client.
    pub fn oauth_client(&self, id: &str) -> Option<OAuthClient> {
        self.store().oauth_clients.get(id).cloned()
    }

    /// A stored team access grant.
    pub fn team_access(&self, id: &str) -> Option<TeamAccess> {
        self.store().team_access.get(id).cloned()
    }

    /// A stored variable, including a sensitive value.
    pub fn variable(&self, id: &str) -> Option<Variable> {
        self.store().variables.get(id).cloned()
    }

    /// Change a variable's value as if done outside the provider.
    pub fn set_variable_value(&self, id: &str, value: impl Into<String>) {
        if let Some(variable) = self.store().variables.get_mut(id) {
            variable.value = value.into();
        }
    }

    /// Options of the most recent variable update.
    pub fn last_variable_update(&self) -> Option<VariableUpdateOptions> {
        self.store().last_variable_update.clone()
    }

    /// A stored registry module.
    pub fn registry_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Option<RegistryModule> {
        self.store()
            .registry_modules
            .get(&module_key(organization, name, provider))
            .cloned()
    }

    /// Publish a new version of a registry module.
    pub fn publish_version(&self, organization: &str, name: &str, provider: &str, version: &str) {
        if let Some(module) = self
            .store()
            .registry_modules
            .get_mut(&module_key(organization, name, provider))
        {
            module.versions.push(version.to_string());
        }
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        lock(&self.store)
    }

    /// Count the call, wait out the latency and report an injected failure.
    async fn enter(&self, method: &'static str) -> Result<(), ClientError> {
        *lock(&self.calls).entry(method).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let failure = lock(&self.failures).get(method).cloned();
        failure.map_or(Ok(()), Err)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn module_key(organization: &str, name: &str, provider: &str) -> (String, String, String) {
    (
        organization.to_string(),
        name.to_string(),
        provider.to_string(),
    )
}

/// Split `<owner>/terraform-<provider>-<name>` into provider and name.
fn parse_module_repo(identifier: &str) -> Option<(&str, &str)> {
    let (_, repo) = identifier.split_once('/')?;
    let (provider, name) = repo.strip_prefix("terraform-")?.split_once('-')?;
    (!provider.is_empty() && !name.is_empty()).then_some((provider, name))
}

#[async_trait]
impl TfeClient for MemoryClient {
    async fn create_oauth_client(
        &self,
        organization: &str,
        options: OAuthClientCreateOptions,
    ) -> Result<OAuthClient, ClientError> {
        self.enter("create_oauth_client").await?;
        let mut store = self.store();
        let id = store.assign_id("oc");
        let oauth_client = OAuthClient {
            callback_url: format!("https://app.terraform.io/auth/{}/callback", id),
            id: id.clone(),
            organization: organization.to_string(),
            service_provider: options.service_provider,
            api_url: options.api_url,
            http_url: options.http_url,
        };
        store.oauth_clients.insert(id, oauth_client.clone());
        Ok(oauth_client)
    }

    async fn read_oauth_client(&self, id: &str) -> Result<OAuthClient, ClientError> {
        self.enter("read_oauth_client").await?;
        self.store()
            .oauth_clients
            .get(id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn delete_oauth_client(&self, id: &str) -> Result<(), ClientError> {
        self.enter("delete_oauth_client").await?;
        self.store()
            .oauth_clients
            .remove(id)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    async fn create_policy(
        &self,
        organization: &str,
        options: PolicyCreateOptions,
    ) -> Result<Policy, ClientError> {
        self.enter("create_policy").await?;
        let mut store = self.store();
        let taken = store
            .policies
            .values()
            .any(|p| p.organization == organization && p.name == options.name);
        if taken {
            return Err(unprocessable("Name has already been taken"));
        }
        let policy = Policy {
            id: store.assign_id("pol"),
            name: options.name,
            organization: organization.to_string(),
            enforce: options.enforce,
        };
        store.policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn read_policy(&self, id: &str) -> Result<Policy, ClientError> {
        self.enter("read_policy").await?;
        self.store()
            .policies
            .get(id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn update_policy(
        &self,
        id: &str,
        options: PolicyUpdateOptions,
    ) -> Result<Policy, ClientError> {
        self.enter("update_policy").await?;
        let mut store = self.store();
        let policy = store.policies.get_mut(id).ok_or(ClientError::NotFound)?;
        policy.enforce = options.enforce;
        Ok(policy.clone())
    }

    async fn upload_policy(&self, id: &str, content: &[u8]) -> Result<(), ClientError> {
        self.enter("upload_policy").await?;
        let mut store = self.store();
        if !store.policies.contains_key(id) {
            return Err(ClientError::NotFound);
        }
        store.policy_content.insert(id.to_string(), content.to_vec());
        Ok(())
    }

    async fn download_policy(&self, id: &str) -> Result<Vec<u8>, ClientError> {
        self.enter("download_policy").await?;
        let store = self.store();
        if !store.policies.contains_key(id) {
            return Err(ClientError::NotFound);
        }
        Ok(store.policy_content.get(id).cloned().unwrap_or_default())
    }

    async fn delete_policy(&self, id: &str) -> Result<(), ClientError> {
        self.enter("delete_policy").await?;
        let mut store = self.store();
        store.policy_content.remove(id);
        store
            .policies
            .remove(id)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    async fn read_team(&self, id: &str) -> Result<Team, ClientError> {
        self.enter("read_team").await?;
        self.store()
            .teams
            .get(id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn read_workspace(
        &self,
        organization: &str,
        name: &str,
    ) -> Result<Workspace, ClientError> {
        self.enter("read_workspace").await?;
        self.store()
            .find_workspace(organization, name)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn add_team_access(
        &self,
        options: TeamAccessAddOptions,
    ) -> Result<TeamAccess, ClientError> {
        self.enter("add_team_access").await?;
        let mut store = self.store();
        let team = store
            .teams
            .get(&options.team_id)
            .cloned()
            .ok_or(ClientError::NotFound)?;
        let workspace = store
            .workspaces
            .get(&options.workspace_id)
            .cloned()
            .ok_or(ClientError::NotFound)?;
        let access = TeamAccess {
            id: store.assign_id("tws"),
            access: options.access,
            team: Some(team),
            workspace: Some(workspace),
        };
        store.team_access.insert(access.id.clone(), access.clone());
        Ok(access)
    }

    async fn read_team_access(&self, id: &str) -> Result<TeamAccess, ClientError> {
        self.enter("read_team_access").await?;
        self.store()
            .team_access
            .get(id)
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn remove_team_access(&self, id: &str) -> Result<(), ClientError> {
        self.enter("remove_team_access").await?;
        self.store()
            .team_access
            .remove(id)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    async fn create_variable(
        &self,
        options: VariableCreateOptions,
    ) -> Result<Variable, ClientError> {
        self.enter("create_variable").await?;
        let mut store = self.store();
        if !store.workspaces.contains_key(&options.workspace_id) {
            return Err(ClientError::NotFound);
        }
        let taken = store.variables.values().any(|v| {
            v.workspace_id == options.workspace_id
                && v.category == options.category
                && v.key == options.key
        });
        if taken {
            return Err(unprocessable("Key has already been taken"));
        }
        let variable = Variable {
            id: store.assign_id("var"),
            key: options.key,
            value: options.value,
            category: options.category,
            hcl: options.hcl,
            sensitive: options.sensitive,
            workspace_id: options.workspace_id,
        };
        store.variables.insert(variable.id.clone(), variable.clone());
        Ok(as_returned(&variable))
    }

    async fn list_variables(
        &self,
        options: VariableListOptions,
    ) -> Result<Vec<Variable>, ClientError> {
        self.enter("list_variables").await?;
        let store = self.store();
        let workspace = store
            .find_workspace(&options.organization, &options.workspace)
            .ok_or(ClientError::NotFound)?;
        Ok(store
            .variables
            .values()
            .filter(|v| v.workspace_id == workspace.id)
            .map(as_returned)
            .collect())
    }

    async fn update_variable(
        &self,
        id: &str,
        options: VariableUpdateOptions,
    ) -> Result<Variable, ClientError> {
        self.enter("update_variable").await?;
        let mut store = self.store();
        let variable = store.variables.get_mut(id).ok_or(ClientError::NotFound)?;
        if let Some(key) = &options.key {
            variable.key = key.clone();
        }
        if let Some(value) = &options.value {
            variable.value = value.clone();
        }
        if let Some(hcl) = options.hcl {
            variable.hcl = hcl;
        }
        if let Some(sensitive) = options.sensitive {
            variable.sensitive = sensitive;
        }
        let updated = as_returned(variable);
        store.last_variable_update = Some(options);
        Ok(updated)
    }

    async fn delete_variable(&self, id: &str) -> Result<(), ClientError> {
        self.enter("delete_variable").await?;
        self.store()
            .variables
            .remove(id)
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }

    async fn create_registry_module(
        &self,
        organization: &str,
        options: RegistryModuleCreateOptions,
    ) -> Result<RegistryModule, ClientError> {
        self.enter("create_registry_module").await?;
        let identifier = &options.vcs_repo.identifier;
        let (provider, name) = parse_module_repo(identifier).ok_or_else(|| {
            unprocessable("Repository name must follow terraform-<PROVIDER>-<NAME>")
        })?;

        let mut store = self.store();
        let key = module_key(organization, name, provider);
        if store.registry_modules.contains_key(&key) {
            return Err(unprocessable("Module has already been taken"));
        }
        let module = RegistryModule {
            id: store.assign_id("mod"),
            name: name.to_string(),
            provider: provider.to_string(),
            organization: organization.to_string(),
            versions: Vec::new(),
        };
        store.registry_modules.insert(key, module.clone());
        Ok(module)
    }

    async fn read_registry_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<RegistryModule, ClientError> {
        self.enter("read_registry_module").await?;
        self.store()
            .registry_modules
            .get(&module_key(organization, name, provider))
            .cloned()
            .ok_or(ClientError::NotFound)
    }

    async fn delete_registry_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<(), ClientError> {
        self.enter("delete_registry_module").await?;
        self.store()
            .registry_modules
            .remove(&module_key(organization, name, provider))
            .map(|_| ())
            .ok_or(ClientError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::{AccessType, CategoryType, EnforcementLevel, EnforcementOptions};
    use crate::provider::TfeProvider;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn variable_options(workspace_id: &str) -> VariableCreateOptions {
        VariableCreateOptions {
            key: "token".to_string(),
            value: "hunter2".to_string(),
            category: CategoryType::Env,
            hcl: false,
            sensitive: true,
            workspace_id: workspace_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_client_counts_calls() {
        let client = MemoryClient::new().with_team("team-1", "ops");

        assert_ok!(client.read_team("team-1").await);
        assert_eq!(
            assert_err!(client.read_team("team-2").await),
            ClientError::NotFound
        );

        assert_eq!(client.calls("read_team"), 2);
        assert_eq!(client.calls("read_workspace"), 0);
        assert_eq!(client.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_memory_client_injected_failure() {
        let client = MemoryClient::new();
        client.fail_on("read_policy", ClientError::Unauthorized);

        assert_eq!(
            assert_err!(client.read_policy("pol-1").await),
            ClientError::Unauthorized
        );

        client.clear_failures();
        assert_eq!(
            assert_err!(client.read_policy("pol-1").await),
            ClientError::NotFound
        );
    }

    #[tokio::test]
    async fn test_memory_client_policy_names_are_unique() {
        let client = MemoryClient::new();
        let options = PolicyCreateOptions {
            name: "policy-test".to_string(),
            enforce: vec![EnforcementOptions {
                path: "policy-test.sentinel".to_string(),
                mode: EnforcementLevel::Advisory,
            }],
        };

        let policy = assert_ok!(client.create_policy("acme", options.clone()).await);
        assert_eq!(policy.id, "pol-1");
        assert_err!(client.create_policy("acme", options.clone()).await);
        // Same name in another organization is fine
        assert_ok!(client.create_policy("other", options).await);
    }

    #[tokio::test]
    async fn test_memory_client_hides_sensitive_values() {
        let client = MemoryClient::new().with_workspace("acme", "prod");

        let created = assert_ok!(client.create_variable(variable_options("ws-1")).await);
        assert_eq!(created.value, "");
        assert_eq!(client.variable(&created.id).unwrap().value, "hunter2");

        let listed = assert_ok!(
            client
                .list_variables(VariableListOptions {
                    organization: "acme".to_string(),
                    workspace: "prod".to_string(),
                })
                .await
        );
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, "");
    }

    #[tokio::test]
    async fn test_memory_client_variable_needs_workspace() {
        let client = MemoryClient::new();
        assert_eq!(
            assert_err!(client.create_variable(variable_options("ws-9")).await),
            ClientError::NotFound
        );
    }

    #[tokio::test]
    async fn test_memory_client_team_access() {
        let client = MemoryClient::new()
            .with_team("team-1", "ops")
            .with_workspace("acme", "prod");

        let access = assert_ok!(
            client
                .add_team_access(TeamAccessAddOptions {
                    access: AccessType::Read,
                    team_id: "team-1".to_string(),
                    workspace_id: "ws-1".to_string(),
                })
                .await
        );
        assert_eq!(access.workspace.unwrap().name, "prod");

        assert_ok!(client.remove_team_access(&access.id).await);
        assert_eq!(
            assert_err!(client.remove_team_access(&access.id).await),
            ClientError::NotFound
        );
    }

    #[test]
    fn test_parse_module_repo() {
        assert_eq!(
            parse_module_repo("acme/terraform-aws-vpc"),
            Some(("aws", "vpc"))
        );
        assert_eq!(
            parse_module_repo("acme/terraform-google-network-peering"),
            Some(("google", "network-peering"))
        );
        assert_eq!(parse_module_repo("acme/vpc"), None);
        assert_eq!(parse_module_repo("terraform-aws-vpc"), None);
    }

    #[tokio::test]
    async fn test_memory_client_latency() {
        let client = MemoryClient::new()
            .with_team("team-1", "ops")
            .with_latency(Duration::from_millis(50));

        let result =
            tokio::time::timeout(Duration::from_millis(5), client.read_team("team-1")).await;
        assert!(result.is_err());
        // The call was counted even though it never completed
        assert_eq!(client.calls("read_team"), 1);
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let client = Arc::new(MemoryClient::new().with_workspace("acme", "prod"));
        let tester = ProviderTester::new(TfeProvider::new(client.clone()));

        let final_state = tester
            .lifecycle_crud(
                "tfe_variable",
                json!({
                    "key": "region",
                    "value": "eu-west-1",
                    "category": "terraform",
                    "workspace_id": "acme/prod"
                }),
                json!({
                    "key": "region",
                    "value": "eu-central-1",
                    "category": "terraform",
                    "workspace_id": "acme/prod"
                }),
            )
            .await
            .unwrap();

        assert_eq!(final_state["value"], "eu-central-1");
        assert_eq!(client.calls("update_variable"), 1);
        assert_eq!(client.calls("delete_variable"), 1);
    }

    #[test]
    fn test_tester_resource_types() {
        let tester = ProviderTester::new(TfeProvider::new(Arc::new(MemoryClient::new())));

        let types = tester.resource_types();
        assert_eq!(types.len(), 5);
        assert!(types.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(types.iter().all(|name| tester.schema().resources.contains_key(name)));
    }

    #[tokio::test]
    async fn test_tester_plan_helpers() {
        let client = Arc::new(MemoryClient::new().with_team("team-1", "ops"));
        let tester = ProviderTester::new(TfeProvider::new(client));
        let prior = json!({
            "id": "tws-1",
            "access": "read",
            "team_id": "team-1",
            "workspace_id": "acme/prod"
        });

        let plan = tester
            .plan_update("tfe_team_access", prior.clone(), prior.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);

        let mut proposed = prior.clone();
        proposed["access"] = json!("admin");
        let plan = tester
            .plan_update("tfe_team_access", prior.clone(), proposed)
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "access");
        assert_plan_replaces(&plan);

        let plan = tester.plan_delete("tfe_team_access", prior).await.unwrap();
        assert!(plan.planned_state.is_null());
        assert_plan_updates_in_place(&plan);
        assert_eq!(plan.changes.len(), 3);
    }

    #[tokio::test]
    async fn test_tester_validate_resource_config() {
        let tester = ProviderTester::new(TfeProvider::new(Arc::new(MemoryClient::new())));

        let err = tester
            .validate_resource_config("tfe_team_access", json!({"access": "owner"}))
            .await
            .unwrap_err();
        match err {
            TestError::Diagnostics(diags) => {
                assert_error_contains(&diags, "access");
                assert_error_contains(&diags, "team_id");
            },
            other => panic!("expected diagnostics, got {}", other),
        }
    }

    #[test]
    fn test_assert_no_errors() {
        let diagnostics = vec![Diagnostic::warning("Just a warning")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        let diagnostics = vec![Diagnostic::error("An error")];
        assert_no_errors(&diagnostics);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("field1"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("field1"));
        assert!(display.contains("More info"));
    }
}
