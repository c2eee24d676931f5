//! Orchestrator: sequences the safety gate, registries, and external
//! collaborators (scripting, telephony, persistence).
//!
//! Every collaborator call follows the same shape: take a snapshot, await
//! the external operation with no lock held, then apply the result as one
//! synchronous registry mutation.

pub mod model;

pub use model::{RehydrateSummary, StartCallJob, StartWarmTransfer, StatusEvent, WebhookOutcome};

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calls::{
    AttemptPatch, Availability, CallAttempt, CallAttemptStatus, CallJob, CallMode, JobRegistry,
    NewCallJob, ParsedTranscript,
};
use crate::config::OutreachConfig;
use crate::error::{ConfigError, DatabaseError, OrchestratorError, SafetyError};
use crate::events::{EventBus, OutreachEvent};
use crate::llm::{Role, create_provider};
use crate::safety::{
    BlockedNumberUpdate, DEFAULT_ESCALATION_LIMIT, EscalationEvent, EscalationSource, MAX_ESCALATIONS,
    SafetyGate,
};
use crate::scripting::{ConversationTurn, ReplyInput, ScriptGenerator, ScriptInput};
use crate::store::{Database, PersistenceSink};
use crate::telephony::{
    DryRunTelephony, PlaceCallRequest, Telephony, TwilioTelephony, map_attempt_status,
    map_transfer_status, twiml,
};
use crate::transfer::{NewTransfer, TransferLeg, TransferRegistry, TransferStatus, WarmTransferSession};

/// Error recorded on attempts whose target has no number.
pub const NO_INTAKE_PHONE: &str = "No intake phone number on file";

/// Error recorded on attempts whose destination is blocked.
pub const BLOCKED_DESTINATION: &str = "Destination number is blocked by safety policy";

/// Longest transcript excerpt kept on an attempt.
pub const TRANSCRIPT_EXCERPT_CHARS: usize = 500;

/// Rows loaded per table on startup.
pub const REHYDRATE_LIMIT: usize = 500;

const STATUS_CALLBACK_PATH: &str = "/webhooks/twilio/status";
const RECORDING_CALLBACK_PATH: &str = "/webhooks/twilio/recording";
const GATHER_CALLBACK_PATH: &str = "/webhooks/twilio/gather";

const LIVE_UNAVAILABLE_HINT: &str =
    "set TWILIO_ACCOUNT_SID, TWILIO_AUTH_TOKEN and TWILIO_FROM_NUMBER to enable live mode";

/// Owns the shared registries and the collaborator handles.
pub struct Orchestrator {
    config: OutreachConfig,
    jobs: JobRegistry,
    transfers: TransferRegistry,
    safety: SafetyGate,
    scripts: ScriptGenerator,
    dry_run: Arc<dyn Telephony>,
    live: Option<Arc<dyn Telephony>>,
    events: EventBus,
    sink: PersistenceSink,
}

impl Orchestrator {
    /// Wire collaborators from config: Twilio when credentials exist, the
    /// LLM when a key exists, persistence disabled until attached.
    pub fn new(config: OutreachConfig) -> Self {
        let live = config
            .twilio
            .clone()
            .map(|twilio| Arc::new(TwilioTelephony::new(twilio)) as Arc<dyn Telephony>);
        let llm = config.llm.as_ref().and_then(|settings| match create_provider(settings) {
            Ok(provider) => Some(provider),
            Err(e) => {
                warn!(error = %e, "LLM provider unavailable; scripting uses fallbacks");
                None
            }
        });
        let scripts = ScriptGenerator::new(llm);
        Self {
            jobs: JobRegistry::new(),
            transfers: TransferRegistry::new(),
            safety: SafetyGate::new(&config.safety),
            scripts,
            dry_run: Arc::new(DryRunTelephony::new()),
            live,
            events: EventBus::new(),
            sink: PersistenceSink::disabled(),
            config,
        }
    }

    pub fn with_live_telephony(mut self, telephony: Arc<dyn Telephony>) -> Self {
        self.live = Some(telephony);
        self
    }

    pub fn with_dry_run_telephony(mut self, telephony: Arc<dyn Telephony>) -> Self {
        self.dry_run = telephony;
        self
    }

    pub fn with_scripts(mut self, scripts: ScriptGenerator) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_persistence(mut self, sink: PersistenceSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &OutreachConfig {
        &self.config
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn transfers(&self) -> &TransferRegistry {
        &self.transfers
    }

    pub fn safety(&self) -> &SafetyGate {
        &self.safety
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn live_available(&self) -> bool {
        self.live.is_some()
    }

    pub fn llm_enabled(&self) -> bool {
        self.scripts.has_llm()
    }

    pub fn persistence_enabled(&self) -> bool {
        self.sink.is_enabled()
    }

    fn transport(&self, mode: CallMode) -> Result<Arc<dyn Telephony>, ConfigError> {
        match mode {
            CallMode::DryRun => Ok(self.dry_run.clone()),
            CallMode::Live => self.live.clone().ok_or_else(|| ConfigError::LiveTelephonyUnavailable {
                hint: LIVE_UNAVAILABLE_HINT.to_string(),
            }),
        }
    }

    // ── Change propagation ──────────────────────────────────────────

    fn job_changed(&self, job: &CallJob) {
        self.sink.job(job);
        self.events.job_updated(job);
    }

    fn transfer_changed(&self, session: &WarmTransferSession) {
        self.sink.transfer(session);
        self.events.transfer_updated(session);
    }

    fn escalated(&self, event: &EscalationEvent) {
        self.sink.escalation(event);
        self.events.escalation_recorded(event);
    }

    /// Full state for a newly connected dashboard.
    pub fn snapshot(&self) -> OutreachEvent {
        OutreachEvent::Snapshot {
            jobs: self.jobs.list_jobs(),
            transfers: self.transfers.list(),
            escalations: self.safety.list_escalations(DEFAULT_ESCALATION_LIMIT),
        }
    }

    // ── Call jobs ───────────────────────────────────────────────────

    /// Gate, create, and dial a job. Returns the job once every attempt has
    /// either been placed or failed.
    ///
    /// Denials happen before anything is registered. Per-target problems
    /// (missing or blocked number, transport failure) fail that attempt only.
    pub async fn start_call_job(&self, request: StartCallJob) -> Result<CallJob, OrchestratorError> {
        if request.targets.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "At least one shelter target is required".into(),
            ));
        }
        if request.survivor_context.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("survivor_context is required".into()));
        }

        let transport = self.transport(request.mode)?;

        let callback_number = request
            .callback_number
            .as_deref()
            .and_then(|raw| self.safety.normalize_phone(raw));
        if let Some(number) = &callback_number {
            if self.safety.is_blocked_number(number) {
                warn!(number = %number, "Call job rejected: callback number blocked");
                return Err(SafetyError::BlockedCallback {
                    number: number.clone(),
                }
                .into());
            }
        }

        let job = CallJob::new(
            request.mode,
            NewCallJob {
                survivor_context: request.survivor_context,
                callback_number,
                anonymous_mode: request.anonymous_mode,
                escalation_approved: request.escalation_approved,
            },
            &request.targets,
        );

        let risk = self.safety.assess_risk(&job.request.survivor_context);
        let gated = self.safety.gate_live_action(
            &risk,
            job.request.escalation_approved,
            job.mode.is_live(),
            EscalationSource::CallJob,
            &job.job_id.to_string(),
        );
        match gated {
            Ok(Some(event)) => self.escalated(&event),
            Ok(None) => {}
            Err(denied) => {
                if let Some(event) = denied
                    .escalation_id()
                    .and_then(|id| self.find_escalation(id))
                {
                    self.escalated(&event);
                }
                return Err(denied.into());
            }
        }

        let job = self.jobs.insert_job(job);
        self.job_changed(&job);

        let script_context = if job.request.anonymous_mode {
            self.safety.redact_for_anonymous_mode(&job.request.survivor_context)
        } else {
            job.request.survivor_context.clone()
        };

        join_all(
            job.attempts
                .iter()
                .map(|attempt| self.run_attempt(&job, attempt, transport.as_ref(), &script_context)),
        )
        .await;

        let job = self.jobs.get_job(job.job_id).unwrap_or(job);
        info!(
            job_id = %job.job_id,
            status = %job.status,
            transport = transport.name(),
            "Call job dispatched"
        );
        Ok(job)
    }

    fn find_escalation(&self, escalation_id: Uuid) -> Option<EscalationEvent> {
        self.safety
            .list_escalations(MAX_ESCALATIONS)
            .into_iter()
            .find(|e| e.escalation_id == escalation_id)
    }

    /// Script and dial one attempt. Failures land on the attempt only.
    async fn run_attempt(
        &self,
        job: &CallJob,
        attempt: &CallAttempt,
        transport: &dyn Telephony,
        script_context: &str,
    ) {
        let Some(to_phone) = attempt.to_phone.as_deref() else {
            self.apply_patch(job.job_id, attempt.attempt_id, AttemptPatch::failed(NO_INTAKE_PHONE));
            return;
        };
        if self.safety.is_blocked_number(to_phone) {
            warn!(job_id = %job.job_id, attempt_id = %attempt.attempt_id, "Destination blocked; attempt failed");
            self.apply_patch(job.job_id, attempt.attempt_id, AttemptPatch::failed(BLOCKED_DESTINATION));
            return;
        }
        let to = self
            .safety
            .normalize_phone(to_phone)
            .unwrap_or_else(|| to_phone.to_string());

        let script = self
            .scripts
            .generate_script(&ScriptInput {
                shelter_name: attempt.shelter_name.clone(),
                survivor_context: script_context.to_string(),
                callback_number: job.request.callback_number.clone(),
            })
            .await;

        let gather_url = self.gather_url(job.job_id, attempt.attempt_id);
        let markup = twiml::intake(&twiml::IntakeCall {
            shelter_name: &attempt.shelter_name,
            survivor_context: script_context,
            callback_number: job.request.callback_number.as_deref(),
            script: Some(&script.text),
            gather_action_url: gather_url.as_deref(),
        });
        let recording_callback_url = self.config.callback_url(RECORDING_CALLBACK_PATH);

        let placed = transport
            .place_call(PlaceCallRequest {
                to,
                twiml: markup,
                status_callback_url: self.config.callback_url(STATUS_CALLBACK_PATH),
                record: recording_callback_url.is_some(),
                recording_callback_url,
            })
            .await;

        match placed {
            Ok(sid) => {
                let patch = AttemptPatch::status(CallAttemptStatus::Initiated)
                    .with_script(script.text, script.source);
                if self.jobs.mark_attempt(job.job_id, attempt.attempt_id, patch).is_none() {
                    debug!(job_id = %job.job_id, sid = %sid, "Job gone before call was bound");
                    return;
                }
                if let Some(updated) = self.jobs.bind_provider_sid(job.job_id, attempt.attempt_id, &sid) {
                    info!(
                        job_id = %job.job_id,
                        attempt_id = %attempt.attempt_id,
                        sid = %sid,
                        "Call placed"
                    );
                    self.job_changed(&updated);
                }
            }
            Err(e) => {
                warn!(
                    job_id = %job.job_id,
                    attempt_id = %attempt.attempt_id,
                    error = %e,
                    "Call placement failed"
                );
                let patch = AttemptPatch::failed(e.to_string()).with_script(script.text, script.source);
                self.apply_patch(job.job_id, attempt.attempt_id, patch);
            }
        }
    }

    fn apply_patch(&self, job_id: Uuid, attempt_id: Uuid, patch: AttemptPatch) -> Option<CallJob> {
        let job = self.jobs.mark_attempt(job_id, attempt_id, patch)?;
        self.job_changed(&job);
        Some(job)
    }

    fn gather_url(&self, job_id: Uuid, attempt_id: Uuid) -> Option<String> {
        self.config.callback_url(&format!(
            "{GATHER_CALLBACK_PATH}?job_id={job_id}&attempt_id={attempt_id}"
        ))
    }

    // ── Provider webhooks ───────────────────────────────────────────

    /// Apply a provider status event to whichever attempt or transfer leg
    /// owns the SID. Redelivery converges on the same state.
    pub fn handle_call_status(&self, event: StatusEvent) -> WebhookOutcome {
        if let Some((job, attempt)) = self.jobs.find_by_provider_sid(&event.call_sid) {
            // Progress callbacks can arrive after the final one; a finished
            // attempt never goes back to initiated.
            let status = map_attempt_status(&event.call_status)
                .filter(|status| status.is_terminal() || !attempt.status.is_terminal());
            let mut patch = AttemptPatch {
                status,
                ..AttemptPatch::default()
            };
            if let Some(url) = event.recording_url.filter(|u| !u.is_empty()) {
                patch = patch.with_recording_url(url);
            }
            if patch == AttemptPatch::default() {
                debug!(sid = %event.call_sid, status = %event.call_status, "Unmapped call status ignored");
                return WebhookOutcome::Ignored;
            }
            return match self.apply_patch(job.job_id, attempt.attempt_id, patch) {
                Some(job) => {
                    info!(
                        job_id = %job.job_id,
                        attempt_id = %attempt.attempt_id,
                        sid = %event.call_sid,
                        provider_status = %event.call_status,
                        job_status = %job.status,
                        "Call status applied"
                    );
                    WebhookOutcome::Applied
                }
                None => WebhookOutcome::Ignored,
            };
        }

        if let Some((session, leg)) = self.transfers.find_by_sid(&event.call_sid) {
            let Some(status) = map_transfer_status(&event.call_status) else {
                debug!(sid = %event.call_sid, status = %event.call_status, "Transfer status unchanged");
                return WebhookOutcome::Ignored;
            };
            return match self.transfers.set_status(session.transfer_id, status) {
                Some(updated) => {
                    info!(
                        transfer_id = %updated.transfer_id,
                        leg = %leg,
                        sid = %event.call_sid,
                        status = %status,
                        "Transfer status applied"
                    );
                    self.transfer_changed(&updated);
                    WebhookOutcome::Applied
                }
                None => WebhookOutcome::Ignored,
            };
        }

        warn!(sid = %event.call_sid, status = %event.call_status, "Status callback for unknown SID");
        WebhookOutcome::Ignored
    }

    pub fn handle_recording(&self, call_sid: &str, recording_url: &str) -> WebhookOutcome {
        if recording_url.trim().is_empty() {
            return WebhookOutcome::Ignored;
        }
        let Some((job, attempt)) = self.jobs.find_by_provider_sid(call_sid) else {
            warn!(sid = %call_sid, "Recording callback for unknown SID");
            return WebhookOutcome::Ignored;
        };
        let patch = AttemptPatch::default().with_recording_url(recording_url);
        match self.apply_patch(job.job_id, attempt.attempt_id, patch) {
            Some(_) => WebhookOutcome::Applied,
            None => WebhookOutcome::Ignored,
        }
    }

    /// Interpret a finished call's transcript and attach the outcome.
    ///
    /// A follow-up outcome records an escalation. An available outcome on a
    /// live job texts the survivor's callback number.
    pub async fn handle_transcript(&self, call_sid: &str, transcript: &str) -> WebhookOutcome {
        let Some((job, attempt)) = self.jobs.find_by_provider_sid(call_sid) else {
            warn!(sid = %call_sid, "Transcript for unknown SID");
            return WebhookOutcome::Ignored;
        };

        let interpreted = self.scripts.parse_transcript(transcript).await;
        let parsed = interpreted.parsed;
        let patch = AttemptPatch {
            transcript_excerpt: Some(transcript.chars().take(TRANSCRIPT_EXCERPT_CHARS).collect()),
            parsed_transcript: Some(parsed.clone()),
            ..AttemptPatch::default()
        };
        let Some(job) = self.apply_patch(job.job_id, attempt.attempt_id, patch) else {
            return WebhookOutcome::Ignored;
        };
        info!(
            job_id = %job.job_id,
            attempt_id = %attempt.attempt_id,
            availability = ?parsed.availability_status,
            source = ?interpreted.source,
            "Transcript interpreted"
        );

        if parsed.needs_human_followup {
            let event = self.safety.record_escalation(EscalationEvent::new(
                EscalationSource::Transcript,
                attempt.attempt_id.to_string(),
                format!("{} call needs human follow-up", attempt.shelter_name),
                Some(parsed.summary.clone()),
            ));
            self.escalated(&event);
        }

        if parsed.availability_status == Availability::Available {
            self.notify_availability(&job, &attempt, transcript, &parsed).await;
        }
        WebhookOutcome::Applied
    }

    async fn notify_availability(
        &self,
        job: &CallJob,
        attempt: &CallAttempt,
        transcript: &str,
        parsed: &ParsedTranscript,
    ) {
        if !job.mode.is_live() {
            debug!(job_id = %job.job_id, "Dry-run job; availability SMS skipped");
            return;
        }
        let Some(callback) = job.request.callback_number.as_deref() else {
            return;
        };
        if self.safety.is_blocked_number(callback) {
            warn!(job_id = %job.job_id, "Callback number blocked; availability SMS skipped");
            return;
        }
        let risk = self.safety.assess_risk(transcript);
        match self.safety.gate_live_action(
            &risk,
            job.request.escalation_approved,
            true,
            EscalationSource::Transcript,
            &attempt.attempt_id.to_string(),
        ) {
            Ok(Some(event)) => self.escalated(&event),
            Ok(None) => {}
            Err(denied) => {
                if let Some(event) = denied.escalation_id().and_then(|id| self.find_escalation(id)) {
                    self.escalated(&event);
                }
                return;
            }
        }
        let Ok(transport) = self.transport(CallMode::Live) else {
            return;
        };

        let body = availability_message(&attempt.shelter_name, parsed);
        match transport.send_message(callback, &body).await {
            Ok(sid) => info!(job_id = %job.job_id, sid = %sid, "Availability SMS sent"),
            Err(e) => warn!(job_id = %job.job_id, error = %e, "Availability SMS failed"),
        }
    }

    /// Next conversational turn for a speech gather. Always returns TwiML.
    pub async fn gather_reply(&self, job_id: Uuid, attempt_id: Uuid, speech: Option<&str>) -> String {
        let Some(job) = self.jobs.get_job(job_id) else {
            debug!(job_id = %job_id, "Gather for unknown job");
            return twiml::follow_up("Thank you for your time. Goodbye.", None, true);
        };
        let Some(attempt) = job.attempt(attempt_id) else {
            debug!(job_id = %job_id, attempt_id = %attempt_id, "Gather for unknown attempt");
            return twiml::follow_up("Thank you for your time. Goodbye.", None, true);
        };

        let mut history = Vec::new();
        if let Some(script) = &attempt.generated_script {
            history.push(ConversationTurn {
                role: Role::Assistant,
                content: script.clone(),
            });
        }
        if let Some(speech) = speech.map(str::trim).filter(|s| !s.is_empty()) {
            history.push(ConversationTurn {
                role: Role::User,
                content: speech.to_string(),
            });
        }
        let survivor_context = if job.request.anonymous_mode {
            self.safety.redact_for_anonymous_mode(&job.request.survivor_context)
        } else {
            job.request.survivor_context.clone()
        };

        let (reply, source) = self
            .scripts
            .conversational_reply(&ReplyInput {
                shelter_name: attempt.shelter_name.clone(),
                survivor_context,
                callback_number: job.request.callback_number.clone(),
                history,
            })
            .await;
        debug!(
            job_id = %job_id,
            attempt_id = %attempt_id,
            source = ?source,
            end_call = reply.should_end_call,
            "Conversational reply"
        );

        let gather_url = self.gather_url(job_id, attempt_id);
        twiml::follow_up(&reply.reply, gather_url.as_deref(), reply.should_end_call)
    }

    // ── Warm transfers ──────────────────────────────────────────────

    /// Bridge the survivor and the shelter reached by an attempt through a
    /// shared conference. Both legs are dialed concurrently.
    pub async fn start_warm_transfer(
        &self,
        request: StartWarmTransfer,
    ) -> Result<WarmTransferSession, OrchestratorError> {
        let job = self
            .jobs
            .get_job(request.job_id)
            .ok_or(OrchestratorError::JobNotFound { id: request.job_id })?;
        let attempt = job
            .attempt(request.attempt_id)
            .ok_or(OrchestratorError::AttemptNotFound {
                job_id: request.job_id,
                attempt_id: request.attempt_id,
            })?;
        let shelter_phone = attempt
            .to_phone
            .as_deref()
            .and_then(|raw| self.safety.normalize_phone(raw))
            .ok_or_else(|| OrchestratorError::InvalidRequest("Attempt has no shelter phone number".into()))?;
        let survivor_phone = self
            .safety
            .normalize_phone(&request.survivor_phone)
            .ok_or_else(|| OrchestratorError::InvalidRequest("survivor_phone is required".into()))?;

        let transport = self.transport(request.mode)?;

        if self.safety.is_blocked_number(&survivor_phone) {
            return Err(SafetyError::BlockedCallback {
                number: survivor_phone,
            }
            .into());
        }
        if self.safety.is_blocked_number(&shelter_phone) {
            return Err(SafetyError::BlockedDestination {
                number: shelter_phone,
            }
            .into());
        }

        let risk_text = match request.notes.as_deref() {
            Some(notes) => format!("{} {notes}", job.request.survivor_context),
            None => job.request.survivor_context.clone(),
        };
        let risk = self.safety.assess_risk(&risk_text);
        let approved = request.escalation_approved || job.request.escalation_approved;
        match self.safety.gate_live_action(
            &risk,
            approved,
            request.mode.is_live(),
            EscalationSource::WarmTransfer,
            &request.attempt_id.to_string(),
        ) {
            Ok(Some(event)) => self.escalated(&event),
            Ok(None) => {}
            Err(denied) => {
                if let Some(event) = denied.escalation_id().and_then(|id| self.find_escalation(id)) {
                    self.escalated(&event);
                }
                return Err(denied.into());
            }
        }

        let session = self.transfers.create_session(
            request.mode,
            NewTransfer {
                job_id: job.job_id,
                attempt_id: attempt.attempt_id,
                shelter_name: attempt.shelter_name.clone(),
                shelter_phone,
                survivor_phone,
                survivor_name: request.survivor_name,
                notes: request.notes,
            },
        );
        self.transfer_changed(&session);

        if let Some(connecting) = self.transfers.set_status(session.transfer_id, TransferStatus::Connecting) {
            self.transfer_changed(&connecting);
        }

        let markup = twiml::conference_join(&session.conference_name);
        let status_callback_url = self.config.callback_url(STATUS_CALLBACK_PATH);
        let dial = |leg: TransferLeg, to: String| {
            let request = PlaceCallRequest {
                to,
                twiml: markup.clone(),
                status_callback_url: status_callback_url.clone(),
                record: false,
                recording_callback_url: None,
            };
            let transport = transport.clone();
            async move { (leg, transport.place_call(request).await) }
        };

        let results = join_all([
            dial(TransferLeg::Survivor, session.survivor_phone.clone()),
            dial(TransferLeg::Shelter, session.shelter_phone.clone()),
        ])
        .await;

        for (leg, placed) in results {
            match placed {
                Ok(sid) => {
                    if let Some(updated) = self.transfers.bind_call_sid(session.transfer_id, leg, &sid) {
                        info!(transfer_id = %session.transfer_id, leg = %leg, sid = %sid, "Transfer leg dialed");
                        self.transfer_changed(&updated);
                    }
                }
                Err(e) => {
                    warn!(transfer_id = %session.transfer_id, leg = %leg, error = %e, "Transfer leg failed");
                    if let Some(failed) = self.transfers.set_status(session.transfer_id, TransferStatus::Failed) {
                        self.transfer_changed(&failed);
                    }
                }
            }
        }

        Ok(self.transfers.get(session.transfer_id).unwrap_or(session))
    }

    // ── Safety policy ───────────────────────────────────────────────

    pub fn block_number(&self, raw: &str) -> BlockedNumberUpdate {
        let update = self.safety.add_blocked_number(raw);
        if let (true, Some(number)) = (update.changed, &update.normalized) {
            self.sink.block(number);
        }
        update
    }

    pub fn unblock_number(&self, raw: &str) -> BlockedNumberUpdate {
        let update = self.safety.remove_blocked_number(raw);
        if let (true, Some(number)) = (update.changed, &update.normalized) {
            self.sink.unblock(number);
        }
        update
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Load persisted state into the in-memory registries. Records already
    /// in memory are kept.
    pub async fn rehydrate(&self, db: &dyn Database) -> Result<RehydrateSummary, DatabaseError> {
        let escalations = db.load_escalations(MAX_ESCALATIONS).await?;
        let blocked = db.load_blocked_numbers().await?;
        let jobs = db.load_call_jobs(REHYDRATE_LIMIT).await?;
        let transfers = db.load_warm_transfers(REHYDRATE_LIMIT).await?;

        let summary = RehydrateSummary {
            escalations: escalations.len(),
            blocked_numbers: blocked
                .iter()
                .filter(|number| self.safety.add_blocked_number(number).changed)
                .count(),
            jobs: jobs.into_iter().filter(|job| self.jobs.restore_job(job.clone())).count(),
            transfers: transfers
                .into_iter()
                .filter(|session| self.transfers.restore(session.clone()))
                .count(),
        };
        self.safety.seed_escalations(escalations);

        info!(
            jobs = summary.jobs,
            transfers = summary.transfers,
            escalations = summary.escalations,
            blocked_numbers = summary.blocked_numbers,
            "State rehydrated"
        );
        Ok(summary)
    }

    /// Clear every job and transfer. Late webhooks for cleared ids are ignored.
    pub fn reset(&self) {
        self.jobs.reset();
        self.transfers.reset();
    }
}

/// SMS body telling the survivor a shelter reported space.
fn availability_message(shelter_name: &str, parsed: &ParsedTranscript) -> String {
    let beds = parsed
        .reported_available_beds
        .map(|n| format!(" ({n} bed{} reported)", if n == 1 { "" } else { "s" }))
        .unwrap_or_default();
    let mut body = format!("Eden update: {shelter_name} reports availability{beds}.");
    if !parsed.intake_requirements.is_empty() {
        body.push_str(&format!(" Bring: {}.", parsed.intake_requirements.join(", ")));
    }
    if !parsed.summary.is_empty() {
        body.push(' ');
        body.push_str(&parsed.summary);
    }
    body
}
