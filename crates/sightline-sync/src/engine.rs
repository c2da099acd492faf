//! The feed engine: the single task that owns presentation state.
//!
//! Commands (user actions, viewer changes) and background results both
//! arrive on channels and are handled one at a time here, so the pager, the
//! generation counter and the attachment map never need a lock.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use sightline_core::{
    Activity, ActivityFilter, Attachment, AttachmentRef, Error, EventBus, FeedEvent, FeedTarget,
    Generation, StatusOption, ViewerContext,
};

use crate::attachments::{AttachmentDelivery, AttachmentLoader};
use crate::config::EngineConfig;
use crate::coordinator::{Backends, Coordinator, FeedMessage, LoadedFeed, WriteOp};
use crate::pager::{Pager, PrependOutcome};

const SOURCE_ID: &str = "engine";
const CHANNEL_CAPACITY: usize = 64;

/// Requests the engine acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Show the feed of an explicitly chosen entity.
    Select(FeedTarget),
    /// The host now displays another version.
    ViewerChanged(ViewerContext),
    LoadOlder,
    SetFilter(ActivityFilter),
    /// Reload the current feed under a new generation.
    Refresh,
    ToggleChecklistItem {
        activity_id: String,
        item_index: usize,
    },
    UpdateStatus {
        target: FeedTarget,
        status: String,
    },
    /// Post `body` on the current target.
    PostComment(String),
    Shutdown,
}

impl From<ViewerContext> for EngineCommand {
    fn from(context: ViewerContext) -> Self {
        EngineCommand::ViewerChanged(context)
    }
}

/// Attachments downloaded for one activity.
#[derive(Debug, Clone)]
struct AttachmentSlot {
    activity_id: String,
    files: Vec<Attachment>,
}

/// Handle for sending commands to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn send(&self, command: EngineCommand) -> sightline_core::Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Internal("Feed engine is not running".into()))
    }

    /// Raw sender, e.g. as the sink of a viewer tracker.
    pub fn sender(&self) -> mpsc::Sender<EngineCommand> {
        self.tx.clone()
    }

    pub async fn shutdown(&self) -> sightline_core::Result<()> {
        self.send(EngineCommand::Shutdown).await
    }
}

/// Owner of feed state. See the module docs.
pub struct FeedEngine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    coordinator: Coordinator,
    loader: AttachmentLoader,
    pager: Pager,
    target: Option<FeedTarget>,
    filter: ActivityFilter,
    statuses: Vec<StatusOption>,
    attachments: BTreeMap<usize, AttachmentSlot>,
    /// Activities with a checklist write in flight, and the toggles queued behind it.
    checklist_writes: HashMap<String, VecDeque<usize>>,
    auth_failure_reported: bool,
    commands: mpsc::Receiver<EngineCommand>,
    messages: mpsc::Receiver<FeedMessage>,
}

impl FeedEngine {
    pub fn new(config: EngineConfig, backends: Backends, bus: Arc<EventBus>) -> (Self, EngineHandle) {
        let (cmd_tx, commands) = mpsc::channel(CHANNEL_CAPACITY);
        let (msg_tx, messages) = mpsc::channel(CHANNEL_CAPACITY);

        let loader = AttachmentLoader::new(Arc::clone(&backends.files), config.attachment_workers);
        let coordinator = Coordinator::new(backends, config.page_size, msg_tx);

        let engine = Self {
            config,
            bus,
            coordinator,
            loader,
            pager: Pager::new(),
            target: None,
            filter: ActivityFilter::default(),
            statuses: Vec::new(),
            attachments: BTreeMap::new(),
            checklist_writes: HashMap::new(),
            auth_failure_reported: false,
            commands,
            messages,
        };
        (engine, EngineHandle { tx: cmd_tx })
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn current_generation(&self) -> Generation {
        self.coordinator.current()
    }

    pub fn target(&self) -> Option<&FeedTarget> {
        self.target.as_ref()
    }

    pub fn filter(&self) -> ActivityFilter {
        self.filter
    }

    pub fn statuses(&self) -> &[StatusOption] {
        &self.statuses
    }

    /// Attachments loaded for the activity at `index`.
    pub fn attachments_at(&self, index: usize) -> &[Attachment] {
        self.attachments
            .get(&index)
            .map(|slot| slot.files.as_slice())
            .unwrap_or(&[])
    }

    /// Run until `Shutdown` or until every command sender is gone.
    pub async fn run(mut self) {
        info!(
            page_size = self.config.page_size,
            attachment_workers = self.config.attachment_workers,
            auto_refresh_ms = ?self.config.auto_refresh_ms,
            "Feed engine started"
        );

        let period = self.config.auto_refresh();
        let mut refresh = period.map(|p| {
            let mut ticker = interval_at(Instant::now() + p, p);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(message) = self.messages.recv() => self.handle_message(message),
                _ = next_tick(&mut refresh) => {
                    if let Some(target) = self.target.clone() {
                        debug!(entity_id = %target.entity_id, "Auto-refresh");
                        self.start_feed(target);
                    }
                }
            }
        }
        info!("Feed engine stopped");
    }

    /// Apply one command. Returns `false` on shutdown.
    pub fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Select(target) => self.start_feed(target),
            EngineCommand::ViewerChanged(context) => {
                let target = context.target();
                self.publish(FeedEvent::ViewerChanged { context });
                self.start_feed(target);
            }
            EngineCommand::Refresh => match self.target.clone() {
                Some(target) => self.start_feed(target),
                None => debug!("Refresh without a target"),
            },
            EngineCommand::LoadOlder => match self.pager.begin_older() {
                Some(request) => {
                    self.coordinator.request_older(request);
                }
                None => debug!(
                    has_older = self.pager.has_older(),
                    loading = self.pager.is_loading_older(),
                    "Load older ignored"
                ),
            },
            EngineCommand::SetFilter(filter) => {
                self.filter = filter;
                let visible = self
                    .pager
                    .visible(filter)
                    .into_iter()
                    .map(|(idx, _)| idx)
                    .collect();
                self.publish(FeedEvent::FilterChanged { filter, visible });
            }
            EngineCommand::ToggleChecklistItem {
                activity_id,
                item_index,
            } => self.toggle_checklist(activity_id, item_index),
            EngineCommand::UpdateStatus { target, status } => {
                self.coordinator
                    .request_write(WriteOp::UpdateStatus { target, status });
            }
            EngineCommand::PostComment(body) => match self.target.clone() {
                Some(target) => {
                    self.coordinator
                        .request_write(WriteOp::PostComment { target, body });
                }
                None => warn!("Comment posted without a target"),
            },
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Apply one background result.
    pub fn handle_message(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::FeedLoaded {
                generation,
                target,
                result,
            } => {
                if self.coordinator.accept(generation).is_err() {
                    return;
                }
                match result {
                    Ok(loaded) => self.apply_feed(generation, target, loaded),
                    Err(e) => self.report_failure(Some(generation), e),
                }
            }
            FeedMessage::OlderLoaded { generation, result } => {
                if self.coordinator.accept(generation).is_err() {
                    return;
                }
                match result {
                    Ok(page) => {
                        let outcome = self.pager.apply_older(page);
                        self.apply_prepend(generation, outcome);
                    }
                    Err(e) => {
                        self.pager.fail_older();
                        warn!(generation = generation.value(), error = %e, "Older page failed");
                        if e.is_fatal() {
                            self.report_failure(Some(generation), e);
                        }
                    }
                }
            }
            FeedMessage::Attachment(delivery) => self.apply_attachment(delivery),
            FeedMessage::WriteFinished { op, result } => self.apply_write(op, result),
        }
    }

    fn start_feed(&mut self, target: FeedTarget) {
        let (generation, _) = self.coordinator.request_feed(target.clone());
        self.pager.reset();
        self.attachments.clear();
        self.target = Some(target.clone());
        self.publish(FeedEvent::FeedLoading { generation, target });
    }

    fn apply_feed(&mut self, generation: Generation, target: FeedTarget, loaded: LoadedFeed) {
        let project = loaded.query.project.clone();
        self.pager.replace(loaded.query, loaded.page);
        self.statuses = loaded.statuses;

        info!(
            generation = generation.value(),
            entity_id = %target.entity_id,
            activity_count = self.pager.len(),
            "Feed loaded"
        );
        self.publish(FeedEvent::FeedReplaced {
            generation,
            target,
            activities: self.pager.activities().to_vec(),
            has_older: self.pager.has_older(),
            statuses: self.statuses.clone(),
        });

        let refs = AttachmentRef::collect(self.pager.activities(), 0);
        self.dispatch_attachments(project, generation, refs);
    }

    fn apply_prepend(&mut self, generation: Generation, outcome: PrependOutcome) {
        if outcome.resorted {
            self.reresolve_attachments();
        } else if outcome.prepended > 0 {
            let shift = outcome.prepended;
            self.attachments = std::mem::take(&mut self.attachments)
                .into_iter()
                .map(|(idx, slot)| (idx + shift, slot))
                .collect();
        }

        let added: Vec<Activity> = outcome
            .added_ids
            .iter()
            .filter_map(|id| self.pager.index_of(id))
            .filter_map(|idx| self.pager.activity(idx).cloned())
            .collect();

        info!(
            generation = generation.value(),
            prepended = outcome.prepended,
            has_older = outcome.has_older,
            "Older activities prepended"
        );
        self.publish(FeedEvent::OlderPrepended {
            generation,
            prepended: outcome.prepended,
            activities: added,
            has_older: outcome.has_older,
        });

        let refs: Vec<AttachmentRef> = outcome
            .added_ids
            .iter()
            .filter_map(|id| self.pager.index_of(id))
            .flat_map(|idx| {
                self.pager
                    .activity(idx)
                    .map(|a| AttachmentRef::collect(std::slice::from_ref(a), idx))
                    .unwrap_or_default()
            })
            .collect();
        if let Some(project) = self.pager.query().map(|q| q.project.clone()) {
            self.dispatch_attachments(project, generation, refs);
        }
    }

    /// Rebuild attachment keys from activity ids after a re-sort.
    fn reresolve_attachments(&mut self) {
        let old = std::mem::take(&mut self.attachments);
        for (_, slot) in old {
            if let Some(idx) = self.pager.index_of(&slot.activity_id) {
                self.attachments.insert(idx, slot);
            }
        }
    }

    fn dispatch_attachments(
        &self,
        project: String,
        generation: Generation,
        refs: Vec<AttachmentRef>,
    ) {
        if refs.is_empty() {
            return;
        }
        debug!(
            generation = generation.value(),
            count = refs.len(),
            "Dispatching attachment batch"
        );
        self.loader
            .spawn_batch(project, generation, refs, self.coordinator.sender());
    }

    fn apply_attachment(&mut self, delivery: AttachmentDelivery) {
        if self.coordinator.accept(delivery.generation).is_err() {
            return;
        }

        let index = match self.pager.activity(delivery.activity_index) {
            Some(a) if a.id == delivery.activity_id => Some(delivery.activity_index),
            _ => self.pager.index_of(&delivery.activity_id),
        };
        let Some(index) = index else {
            debug!(
                activity_id = %delivery.activity_id,
                file_id = %delivery.file_id,
                "Attachment for unknown activity dropped"
            );
            return;
        };

        let generation = delivery.generation;
        match delivery.attachment {
            Some(attachment) => {
                let slot = self.attachments.entry(index).or_insert_with(|| AttachmentSlot {
                    activity_id: delivery.activity_id.clone(),
                    files: Vec::new(),
                });
                slot.files.push(attachment.clone());
                self.publish(FeedEvent::AttachmentReady {
                    generation,
                    activity_index: index,
                    activity_id: delivery.activity_id,
                    attachment,
                });
            }
            None => self.publish(FeedEvent::AttachmentFailed {
                generation,
                activity_index: index,
                activity_id: delivery.activity_id,
                file_id: delivery.file_id,
            }),
        }
    }

    /// Toggles on one activity are serialized so each is computed from the
    /// body the previous write left behind.
    fn toggle_checklist(&mut self, activity_id: String, item_index: usize) {
        if let Some(queued) = self.checklist_writes.get_mut(&activity_id) {
            debug!(
                activity_id = %activity_id,
                item_index,
                "Checklist write in flight, queuing toggle"
            );
            queued.push_back(item_index);
            return;
        }
        if self.send_toggle(activity_id.clone(), item_index) {
            self.checklist_writes.insert(activity_id, VecDeque::new());
        }
    }

    /// Issue the next queued toggle for `activity_id`, if any.
    fn finish_toggle(&mut self, activity_id: &str) {
        while let Some(item_index) = self
            .checklist_writes
            .get_mut(activity_id)
            .and_then(VecDeque::pop_front)
        {
            if self.send_toggle(activity_id.to_string(), item_index) {
                return;
            }
        }
        self.checklist_writes.remove(activity_id);
    }

    /// Returns whether a write was issued.
    fn send_toggle(&mut self, activity_id: String, item_index: usize) -> bool {
        let project = self.pager.query().map(|q| q.project.clone());
        let body = self.pager.toggled_body(&activity_id, item_index);

        match (project, body) {
            (Some(project), Ok(body)) => {
                self.coordinator.request_write(WriteOp::ToggleChecklist {
                    project,
                    activity_id,
                    item_index,
                    body,
                });
                true
            }
            (_, Err(e)) => {
                warn!(activity_id = %activity_id, error = %e, "Checklist toggle rejected");
                self.publish(FeedEvent::ChecklistUpdateFailed {
                    activity_id,
                    item_index,
                    error: e.to_string(),
                });
                false
            }
            (None, Ok(_)) => {
                self.publish(FeedEvent::ChecklistUpdateFailed {
                    activity_id,
                    item_index,
                    error: "No feed loaded".to_string(),
                });
                false
            }
        }
    }

    fn apply_write(&mut self, op: WriteOp, result: sightline_core::Result<()>) {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.report_failure(None, e.clone());
            }
        }

        match (op, result) {
            (
                WriteOp::ToggleChecklist {
                    activity_id,
                    item_index,
                    body,
                    ..
                },
                Ok(()),
            ) => {
                self.pager.update_body(&activity_id, &body);
                self.publish(FeedEvent::ChecklistUpdated {
                    activity_id: activity_id.clone(),
                    item_index,
                    body,
                });
                self.finish_toggle(&activity_id);
            }
            (
                WriteOp::ToggleChecklist {
                    activity_id,
                    item_index,
                    ..
                },
                Err(e),
            ) => {
                warn!(activity_id = %activity_id, error = %e, "Checklist update failed");
                self.publish(FeedEvent::ChecklistUpdateFailed {
                    activity_id: activity_id.clone(),
                    item_index,
                    error: e.to_string(),
                });
                self.finish_toggle(&activity_id);
            }
            (WriteOp::UpdateStatus { target, status }, Ok(())) => {
                self.publish(FeedEvent::StatusUpdated { target, status });
                self.refresh_after_write();
            }
            (WriteOp::UpdateStatus { target, status }, Err(e)) => {
                warn!(entity_id = %target.entity_id, error = %e, "Status update failed");
                self.publish(FeedEvent::StatusUpdateFailed {
                    target,
                    status,
                    error: e.to_string(),
                });
            }
            (WriteOp::PostComment { target, .. }, Ok(())) => {
                self.publish(FeedEvent::CommentPosted { target });
                self.refresh_after_write();
            }
            (WriteOp::PostComment { target, .. }, Err(e)) => {
                warn!(entity_id = %target.entity_id, error = %e, "Comment failed");
                self.publish(FeedEvent::CommentFailed {
                    target,
                    error: e.to_string(),
                });
            }
        }
    }

    fn refresh_after_write(&mut self) {
        if let Some(target) = self.target.clone() {
            self.start_feed(target);
        }
    }

    fn report_failure(&mut self, generation: Option<Generation>, e: Error) {
        let fatal = e.is_fatal();
        if fatal {
            if self.auth_failure_reported {
                debug!(error = %e, "Repeated auth failure suppressed");
                return;
            }
            self.auth_failure_reported = true;
        }
        error!(
            generation = generation.map(|g| g.value()),
            fatal,
            error = %e,
            "Feed failed"
        );
        self.publish(FeedEvent::FeedFailed {
            generation,
            error: e.to_string(),
            fatal,
        });
    }

    fn publish(&self, event: FeedEvent) {
        self.bus.emit(event, Some(SOURCE_ID));
    }
}

/// Next auto-refresh tick, or never when auto-refresh is off.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}
