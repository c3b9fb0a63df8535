use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ota_auth::AuthorizationManager;
use ota_config::DeviceConfig;
use ota_control::ControlMapPool;
use ota_domain::{
    ControlMapAction, DeploymentDescriptor, DeploymentId, Hook, ModuleOperation, State,
    StateBoundary, SupportsRollback,
};
use ota_modules::{parse_needs_reboot, parse_supports_rollback, Rebooter, StateScriptExecutor, UpdateModuleExecutor};
use ota_store::{ControlMapRepository, KvStore, StateData, StateDataJournal, STATE_DATA_SCHEMA_VERSION};
use tracing::{info, warn};

use crate::deployment_log::DeploymentLog;
use crate::error::EngineError;
use crate::retry::{max_sending_attempts, Backoff};
use crate::server::{DeploymentOffer, DeploymentServerClient};
use crate::status::StatusTracker;

/// How many times the same non-looping state may be re-entered before the
/// engine forces the error path.
const MAXIMUM_STATE_DATA_STORE_COUNT: u32 = 20;
const FETCH_STORE_MAX_ATTEMPTS: u32 = 12;
const PRECOMMIT_REPORT_MAX_ATTEMPTS: u32 = 4;

/// Drives one device through the update state machine. Owns
/// every collaborator the driver thread touches: the journal, the
/// control-map pool, the module/script executors, the authorization
/// manager, and the deployment-server client. Generic over the store
/// backend so tests can run it entirely against `MemoryKvStore`.
pub struct Engine<K: KvStore> {
    config: Arc<DeviceConfig>,
    journal: StateDataJournal<K>,
    control_repo: ControlMapRepository<K>,
    control_pool: Arc<ControlMapPool>,
    module_executor: Arc<dyn UpdateModuleExecutor>,
    script_executor: Arc<dyn StateScriptExecutor>,
    rebooter: Arc<dyn Rebooter>,
    auth: Arc<AuthorizationManager>,
    server_client: Arc<dyn DeploymentServerClient>,
    status_tracker: StatusTracker,
    store_counts: HashMap<State, u32>,
    current_log: Option<DeploymentLog>,
}

impl<K: KvStore> Engine<K> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<DeviceConfig>,
        journal: StateDataJournal<K>,
        control_repo: ControlMapRepository<K>,
        control_pool: Arc<ControlMapPool>,
        module_executor: Arc<dyn UpdateModuleExecutor>,
        script_executor: Arc<dyn StateScriptExecutor>,
        rebooter: Arc<dyn Rebooter>,
        auth: Arc<AuthorizationManager>,
        server_client: Arc<dyn DeploymentServerClient>,
    ) -> Self {
        Engine {
            config,
            journal,
            control_repo,
            control_pool,
            module_executor,
            script_executor,
            rebooter,
            auth,
            server_client,
            status_tracker: StatusTracker::new(),
            store_counts: HashMap::new(),
            current_log: None,
        }
    }

    /// Rehydrates the control-map pool from its persisted snapshot,
    /// re-anchoring lapsed maps to the configured boot-expiration window.
    /// Call once at startup before `run_once`.
    pub async fn rehydrate_control_maps(&self) -> Result<(), EngineError> {
        let active = self.control_repo.load_active().await?;
        let expired = self.control_repo.load_expired().await?;
        self.control_pool
            .rehydrate(active, expired, Utc::now(), self.config.control_map_boot_expiration)
            .await;
        Ok(())
    }

    /// Runs one full cycle: resumes an in-flight deployment if the journal
    /// holds one, otherwise checks the server for a new deployment and
    /// drives it to completion. Returns the state the engine settled in
    /// (`Idle` on the common path, `AuthorizeWait` if no token is cached).
    pub async fn run_once(&mut self) -> Result<State, EngineError> {
        if let Some(resumed) = self.journal.load().await? {
            if !matches!(resumed.state, State::Idle | State::Final) {
                info!(
                    deployment_id = %resumed.deployment_id,
                    state = %resumed.state,
                    "resuming in-flight deployment"
                );
                self.store_counts.clear();
                return self.resume(resumed).await;
            }
        }
        self.check_for_update().await
    }

    async fn resume(&mut self, data: StateData) -> Result<State, EngineError> {
        let descriptor = data.update_info.ok_or_else(|| {
            EngineError::Internal("resumed state data missing deployment descriptor".into())
        })?;
        self.status_tracker.reset_for(&descriptor.deployment_id);
        self.current_log = DeploymentLog::start(
            &self.config.data_store_dir.join("logs"),
            descriptor.deployment_id.as_str(),
        )
        .ok();

        match data.state {
            State::UpdateVerifyReboot => self.verify_reboot(descriptor).await,
            State::UpdateVerifyRollbackReboot => self.verify_rollback_reboot(descriptor).await,
            State::UpdateAfterReboot => self.after_reboot(descriptor).await,
            State::UpdateAfterRollbackReboot => self.finish_rollback(descriptor).await,
            other => {
                warn!(
                    state = %other,
                    deployment_id = %descriptor.deployment_id,
                    "resumed in a non-resume-safe state, treating as failed deployment"
                );
                self.fail_deployment(descriptor, "unexpected restart mid-deployment").await
            }
        }
    }

    async fn check_for_update(&mut self) -> Result<State, EngineError> {
        let token = self.auth.get_token().await?;
        if token.is_empty() {
            self.auth.fetch_token().await?;
            return Ok(State::AuthorizeWait);
        }
        let server = self.primary_server()?;
        let offer = match self
            .server_client
            .next_deployment(&server, &self.config.device_type, &token)
            .await
        {
            Err(EngineError::Unauthorized) => {
                warn!("deployment check returned 401, reauthorizing");
                let fresh = self.auth.reauthorize().await?;
                self.server_client
                    .next_deployment(&server, &self.config.device_type, &fresh)
                    .await?
            }
            other => other?,
        };
        let Some(offer) = offer else {
            return Ok(State::Idle);
        };
        self.start_deployment(offer).await
    }

    async fn start_deployment(&mut self, offer: DeploymentOffer) -> Result<State, EngineError> {
        self.status_tracker.reset_for(&offer.deployment_id);
        self.store_counts.clear();
        self.current_log = DeploymentLog::start(
            &self.config.data_store_dir.join("logs"),
            offer.deployment_id.as_str(),
        )
        .ok();

        let workdir = self.workdir(&offer.deployment_id);
        let env = BTreeMap::new();

        let mut needs_reboot = Vec::with_capacity(offer.payload_types.len());
        for pt in &offer.payload_types {
            let outcome = self
                .module_executor
                .run(pt, ModuleOperation::NeedsArtifactReboot, &workdir, &env)
                .await?;
            needs_reboot.push(parse_needs_reboot(&outcome.stdout));
        }
        let supports_rollback = match offer.payload_types.first() {
            Some(pt) => {
                let outcome = self
                    .module_executor
                    .run(pt, ModuleOperation::SupportsRollback, &workdir, &env)
                    .await?;
                parse_supports_rollback(&outcome.stdout)
            }
            None => SupportsRollback::Unknown,
        };

        let descriptor = DeploymentDescriptor {
            deployment_id: offer.deployment_id,
            artifact_name: offer.artifact_name,
            artifact_group: offer.artifact_group,
            device_types_compatible: offer.device_types_compatible,
            payload_types: offer.payload_types,
            provides: offer.provides,
            depends: offer.depends,
            type_info_provides: offer.type_info_provides,
            needs_reboot,
            supports_rollback,
            download_uri: offer.download_uri,
        };

        if let Some(map) = offer.control_map {
            self.control_pool.insert(map).await;
            self.persist_control_maps().await?;
        }

        let device_provides = self.journal.load_provides().await?;
        if !descriptor.depends_satisfied_by(&device_provides) {
            warn!(
                deployment_id = %descriptor.deployment_id,
                "dependency check failed, refusing deployment without touching partitions"
            );
            return self
                .fail_deployment(descriptor, "depends not satisfied by device provides")
                .await;
        }

        self.fetch_and_store(descriptor).await
    }

    async fn fetch_and_store(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.report_interim_status(&descriptor, "downloading").await;
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(300));

        for attempt in 1..=FETCH_STORE_MAX_ATTEMPTS {
            self.enter_state(&descriptor, State::UpdateFetch).await?;
            let download = self
                .module_executor
                .run(&descriptor.payload_types[0], ModuleOperation::Download, &workdir, &env)
                .await;
            self.leave_state(State::UpdateFetch).await?;

            match download {
                Ok(_) => {
                    self.enter_state(&descriptor, State::UpdateStore).await?;
                    self.leave_state(State::UpdateStore).await?;
                    return self.after_store(descriptor).await;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "download failed");
                    self.error_hook(State::UpdateFetch).await?;
                    if attempt == FETCH_STORE_MAX_ATTEMPTS {
                        return self.fail_deployment(descriptor, "exhausted fetch/store retries").await;
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
            }
        }
        unreachable!("loop above always returns before exhausting its range")
    }

    async fn after_store(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.enter_state(&descriptor, State::UpdateAfterStore).await?;
        self.leave_state(State::UpdateAfterStore).await?;

        let action = self.consult_control_map(&descriptor, ModuleOperation::ArtifactInstall).await?;
        if action == ControlMapAction::Fail {
            return self.fail_deployment(descriptor, "control map voted fail before install").await;
        }
        self.install(descriptor).await
    }

    async fn install(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.report_interim_status(&descriptor, "installing").await;
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        self.enter_state(&descriptor, State::UpdateInstall).await?;
        let result = self
            .module_executor
            .run(&descriptor.payload_types[0], ModuleOperation::ArtifactInstall, &workdir, &env)
            .await;
        self.leave_state(State::UpdateInstall).await?;

        match result {
            Ok(_) => self.after_install(descriptor).await,
            Err(e) => {
                warn!(error = %e, "install failed");
                self.error_hook(State::UpdateInstall).await?;
                if descriptor.supports_rollback.is_supported() {
                    self.rollback(descriptor).await
                } else {
                    self.fail_deployment(descriptor, "install failed, rollback unsupported").await
                }
            }
        }
    }

    async fn after_install(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        if self.config.rebooting_report_before_vote && descriptor.reboot_requested() {
            self.report_interim_status(&descriptor, "rebooting").await;
        }
        let action = self.consult_control_map(&descriptor, ModuleOperation::ArtifactReboot).await?;
        if action == ControlMapAction::Fail {
            return self.fail_deployment(descriptor, "control map voted fail before reboot").await;
        }
        if !self.config.rebooting_report_before_vote && descriptor.reboot_requested() {
            self.report_interim_status(&descriptor, "rebooting").await;
        }

        if descriptor.reboot_requested() {
            self.reboot(descriptor).await
        } else {
            self.vote_then_commit(descriptor).await
        }
    }

    async fn reboot(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.enter_state(&descriptor, State::UpdateReboot).await?;
        let result = self.rebooter.reboot().await;
        self.leave_state(State::UpdateReboot).await?;

        match result {
            Ok(()) => self.verify_reboot(descriptor).await,
            Err(e) => {
                warn!(error = %e, "reboot command failed");
                self.error_hook(State::UpdateReboot).await?;
                if descriptor.supports_rollback.is_supported() {
                    self.rollback(descriptor).await
                } else {
                    self.fail_deployment(descriptor, "reboot failed, rollback unsupported").await
                }
            }
        }
    }

    async fn verify_reboot(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        self.enter_state(&descriptor, State::UpdateVerifyReboot).await?;
        let result = self
            .module_executor
            .run(&descriptor.payload_types[0], ModuleOperation::ArtifactVerifyReboot, &workdir, &env)
            .await;
        self.leave_state(State::UpdateVerifyReboot).await?;

        match result {
            Ok(_) => self.after_reboot(descriptor).await,
            Err(e) => {
                warn!(error = %e, "reboot verification failed");
                self.error_hook(State::UpdateVerifyReboot).await?;
                self.rollback(descriptor).await
            }
        }
    }

    async fn after_reboot(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.enter_state(&descriptor, State::UpdateAfterReboot).await?;
        self.leave_state(State::UpdateAfterReboot).await?;
        self.vote_then_commit(descriptor).await
    }

    async fn vote_then_commit(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let action = self.consult_control_map(&descriptor, ModuleOperation::ArtifactCommit).await?;
        if action == ControlMapAction::Fail {
            return self.rollback(descriptor).await;
        }
        self.commit(descriptor).await
    }

    async fn commit(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let precommit_attempts = PRECOMMIT_REPORT_MAX_ATTEMPTS.min(max_sending_attempts(
            self.config.update_poll_interval,
            self.config.retry_poll_interval,
            3,
        ));
        if self
            .report_with_retry(&descriptor, "rebooting", State::UpdatePreCommitStatusReportRetry, precommit_attempts)
            .await
            .is_err()
        {
            warn!(
                deployment_id = %descriptor.deployment_id,
                "pre-commit status report failed after retries, rolling back"
            );
            return self.rollback(descriptor).await;
        }

        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        self.enter_state(&descriptor, State::UpdateCommit).await?;
        let result = self
            .module_executor
            .run(&descriptor.payload_types[0], ModuleOperation::ArtifactCommit, &workdir, &env)
            .await;
        self.leave_state(State::UpdateCommit).await?;

        match result {
            Ok(_) => self.after_first_commit(descriptor).await,
            Err(e) => {
                warn!(error = %e, "commit failed");
                self.error_hook(State::UpdateCommit).await?;
                self.rollback(descriptor).await
            }
        }
    }

    async fn after_first_commit(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.enter_state(&descriptor, State::UpdateAfterFirstCommit).await?;
        self.leave_state(State::UpdateAfterFirstCommit).await?;
        self.enter_state(&descriptor, State::UpdateAfterCommit).await?;
        self.leave_state(State::UpdateAfterCommit).await?;
        self.cleanup(descriptor).await
    }

    async fn cleanup(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        for attempt in 0..2 {
            self.enter_state(&descriptor, State::UpdateCleanup).await?;
            let result = self
                .module_executor
                .run(&descriptor.payload_types[0], ModuleOperation::Cleanup, &workdir, &env)
                .await;
            self.leave_state(State::UpdateCleanup).await?;
            if result.is_ok() || attempt == 1 {
                break;
            }
            warn!(deployment_id = %descriptor.deployment_id, "cleanup failed, re-entering once");
        }
        self.finish_success(descriptor).await
    }

    async fn finish_success(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.report_final_status(&descriptor, "success").await;
        self.enter_state(&descriptor, State::UpdateStatusReport).await?;
        self.leave_state(State::UpdateStatusReport).await?;
        self.journal.clear().await?;
        Ok(State::Idle)
    }

    async fn rollback(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        self.enter_state(&descriptor, State::UpdateRollback).await?;
        let result = self
            .module_executor
            .run(&descriptor.payload_types[0], ModuleOperation::ArtifactRollback, &workdir, &env)
            .await;
        self.leave_state(State::UpdateRollback).await?;

        if let Err(e) = result {
            warn!(error = %e, "rollback itself failed");
            self.error_hook(State::UpdateRollback).await?;
            return self.fail_deployment(descriptor, "rollback failed").await;
        }

        if descriptor.reboot_requested() {
            self.enter_state(&descriptor, State::UpdateRollbackReboot).await?;
            let reboot_result = self.rebooter.reboot().await;
            self.leave_state(State::UpdateRollbackReboot).await?;
            if let Err(e) = reboot_result {
                warn!(error = %e, "rollback reboot command failed");
                self.error_hook(State::UpdateRollbackReboot).await?;
                return self.fail_deployment(descriptor, "rollback reboot failed").await;
            }
            self.verify_rollback_reboot(descriptor).await
        } else {
            self.finish_rollback(descriptor).await
        }
    }

    async fn verify_rollback_reboot(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        self.enter_state(&descriptor, State::UpdateVerifyRollbackReboot).await?;
        let result = self
            .module_executor
            .run(&descriptor.payload_types[0], ModuleOperation::ArtifactVerifyRollbackReboot, &workdir, &env)
            .await;
        self.leave_state(State::UpdateVerifyRollbackReboot).await?;

        if let Err(e) = result {
            warn!(error = %e, "rollback verification failed");
            self.error_hook(State::UpdateVerifyRollbackReboot).await?;
            return self.fail_deployment(descriptor, "rollback verification failed").await;
        }
        self.finish_rollback(descriptor).await
    }

    async fn finish_rollback(&mut self, descriptor: DeploymentDescriptor) -> Result<State, EngineError> {
        self.enter_state(&descriptor, State::UpdateAfterRollbackReboot).await?;
        self.leave_state(State::UpdateAfterRollbackReboot).await?;
        self.fail_deployment(descriptor, "deployment rolled back").await
    }

    async fn fail_deployment(&mut self, descriptor: DeploymentDescriptor, reason: &str) -> Result<State, EngineError> {
        warn!(deployment_id = %descriptor.deployment_id, reason, "deployment failed");
        let workdir = self.workdir(&descriptor.deployment_id);
        let env = self.env_for(&descriptor);
        for attempt in 0..2 {
            self.enter_state(&descriptor, State::UpdateError).await?;
            let result = self
                .module_executor
                .run(&descriptor.payload_types[0], ModuleOperation::ArtifactFailure, &workdir, &env)
                .await;
            self.leave_state(State::UpdateError).await?;
            if result.is_ok() || attempt == 1 {
                break;
            }
            warn!(deployment_id = %descriptor.deployment_id, "ArtifactFailure hook failed, re-entering once");
        }

        self.report_final_status(&descriptor, "failure").await;
        self.enter_state(&descriptor, State::UpdateStatusReport).await?;
        self.leave_state(State::UpdateStatusReport).await?;
        self.journal.clear().await?;
        Ok(State::Idle)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn enter_state(&mut self, descriptor: &DeploymentDescriptor, state: State) -> Result<(), EngineError> {
        if !state.permits_looping() {
            let count = self.store_counts.entry(state).or_insert(0);
            *count += 1;
            if *count > MAXIMUM_STATE_DATA_STORE_COUNT {
                return Err(EngineError::Internal(format!(
                    "loop detected: state {state} re-entered {count} times"
                )));
            }
        }
        let count = *self.store_counts.get(&state).unwrap_or(&0);

        info!(deployment_id = %descriptor.deployment_id, %state, "entering state");
        if let Some(log) = self.current_log.as_mut() {
            let _ = log.line(state.name(), "enter");
        }

        let data = StateData {
            version: STATE_DATA_SCHEMA_VERSION,
            deployment_id: descriptor.deployment_id.clone(),
            state,
            store_count: count,
            update_info: Some(descriptor.clone()),
            has_schema_update: false,
        };
        // Shadow-write first so a crash mid-hook leaves the previous
        // committed state as the resume point; only commit once the
        // Enter hook has actually run to completion.
        self.journal.store(&data).await?;
        if let Some(op) = state.module_operation() {
            self.script_executor
                .run(StateBoundary::new(op, Hook::Enter), &BTreeMap::new())
                .await?;
        }
        self.journal.commit_artifact_data().await?;
        Ok(())
    }

    async fn leave_state(&self, state: State) -> Result<(), EngineError> {
        if let Some(op) = state.module_operation() {
            self.script_executor
                .run(StateBoundary::new(op, Hook::Leave), &BTreeMap::new())
                .await?;
        }
        Ok(())
    }

    async fn error_hook(&self, from: State) -> Result<(), EngineError> {
        if let Some(op) = from.module_operation() {
            self.script_executor
                .run(StateBoundary::new(op, Hook::Error), &BTreeMap::new())
                .await?;
        }
        Ok(())
    }

    /// Consults the control-map pool at a blocking boundary, refreshing the
    /// map first if its half-life has elapsed, and looping
    /// through `ControlMapPause` until the pool's vote changes. Acknowledges
    /// the winning vote at priority 0 — a simplification: a full
    /// implementation would acknowledge against the specific map that cast
    /// the strongest vote, not the deployment as a whole.
    async fn consult_control_map(
        &mut self,
        descriptor: &DeploymentDescriptor,
        op: ModuleOperation,
    ) -> Result<ControlMapAction, EngineError> {
        let boundary = StateBoundary::new(op, Hook::Enter).control_map_key();
        let now = Utc::now();
        if let Some(half_time) = self.control_pool.next_half_time(now).await {
            if half_time <= now {
                if let Ok(server) = self.primary_server() {
                    let token = self.auth.get_token().await?;
                    if let Ok(Some(map)) = self
                        .server_client
                        .fetch_control_map(&server, &descriptor.deployment_id, &token)
                        .await
                    {
                        self.control_pool.insert(map).await;
                        self.persist_control_maps().await?;
                    }
                }
            }
        }
        self.control_pool.clear_expired(Utc::now()).await;

        loop {
            let action = self.control_pool.query_and_update(Utc::now(), &boundary).await;
            if action == ControlMapAction::Pause {
                info!(boundary = %boundary, "control map pause in effect, waiting for update");
                self.control_pool.notified().await;
                continue;
            }
            if action != ControlMapAction::Continue {
                self.control_pool.acknowledge(&descriptor.deployment_id, 0, &boundary).await;
            }
            return Ok(action);
        }
    }

    async fn persist_control_maps(&self) -> Result<(), EngineError> {
        let (active, expired) = self.control_pool.snapshot().await;
        self.control_repo.save_active(&active).await?;
        self.control_repo.save_expired(&expired).await?;
        Ok(())
    }

    /// Best-effort interim status (`downloading`/`installing`/`rebooting`):
    /// reported at most once per (deployment, status) but a delivery
    /// failure is only logged, never escalated — only idempotence is
    /// required here, not retry.
    async fn report_interim_status(&mut self, descriptor: &DeploymentDescriptor, status: &'static str) {
        if !self.status_tracker.should_report(&descriptor.deployment_id, status) {
            return;
        }
        let Ok(server) = self.primary_server() else { return };
        let Ok(token) = self.auth.get_token().await else { return };
        let result = self
            .server_client
            .report_status(&server, &descriptor.deployment_id, &token, status)
            .await;
        let result = match result {
            Err(EngineError::Unauthorized) => match self.auth.reauthorize().await {
                Ok(fresh) => {
                    self.server_client
                        .report_status(&server, &descriptor.deployment_id, &fresh, status)
                        .await
                }
                Err(e) => Err(EngineError::from(e)),
            },
            other => other,
        };
        if let Err(e) = result {
            warn!(deployment_id = %descriptor.deployment_id, status, error = %e, "interim status report failed, continuing");
        }
    }

    /// Final status (`success`/`failure`): reported at most once, retried
    /// with backoff up to `max_sending_attempts`, and silently given up on
    /// past that — the engine still transitions to `Idle` after max
    /// attempts rather than getting stuck.
    async fn report_final_status(&mut self, descriptor: &DeploymentDescriptor, status: &'static str) {
        if !self.status_tracker.should_report(&descriptor.deployment_id, status) {
            return;
        }
        let max_attempts = max_sending_attempts(
            self.config.update_poll_interval,
            self.config.retry_poll_interval,
            3,
        );
        if let Err(e) = self
            .report_with_retry(descriptor, status, State::UpdateStatusReportRetry, max_attempts)
            .await
        {
            warn!(deployment_id = %descriptor.deployment_id, status, error = %e, "giving up on status report after max attempts");
        }
    }

    async fn report_with_retry(
        &mut self,
        descriptor: &DeploymentDescriptor,
        status: &'static str,
        retry_state: State,
        max_attempts: u32,
    ) -> Result<(), EngineError> {
        let server = self.primary_server()?;
        let mut token = self.auth.get_token().await?;
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            let mut result = self
                .server_client
                .report_status(&server, &descriptor.deployment_id, &token, status)
                .await;
            if matches!(result, Err(EngineError::Unauthorized)) {
                warn!(attempt, status, "status report returned 401, reauthorizing");
                token = self.auth.reauthorize().await?;
                result = self
                    .server_client
                    .report_status(&server, &descriptor.deployment_id, &token, status)
                    .await;
            }
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, status, error = %e, "status report attempt failed");
                    last_err = Some(e);
                    if attempt < max_attempts {
                        self.enter_state(descriptor, retry_state).await?;
                        self.leave_state(retry_state).await?;
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EngineError::Internal("status report retries exhausted".into())))
    }

    fn primary_server(&self) -> Result<String, EngineError> {
        self.config
            .servers
            .first()
            .cloned()
            .ok_or_else(|| EngineError::Internal("no servers configured".into()))
    }

    fn workdir(&self, deployment_id: &DeploymentId) -> PathBuf {
        self.config.data_store_dir.join("payloads").join(deployment_id.as_str())
    }

    fn env_for(&self, descriptor: &DeploymentDescriptor) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("DEPLOYMENT_ID".to_string(), descriptor.deployment_id.to_string());
        env.insert("ARTIFACT_NAME".to_string(), descriptor.artifact_name.to_string());
        env.insert("ARTIFACT_GROUP".to_string(), descriptor.artifact_group.to_string());
        env
    }
}
