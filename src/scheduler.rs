//! Request orchestration: validate, extract, gather, resolve, assemble, store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::calendar::CalendarProvider;
use crate::config::SchedulerConfig;
use crate::day::resolve_day;
use crate::error::{CalendarError, IntentError, SchedulingError};
use crate::event::{AttendeeAvailability, Identity, TimeInterval};
use crate::intent::{IntentExtractor, IntentRequest, IntentSource, SchedulingIntent};
use crate::proposal::{ProposalId, ProposalStatus, ProposalStore, SchedulingProposal};
use crate::resolver::{AttendeeEvents, MeetingQuery, SlotResolver};
use crate::wire::{
    assemble_output, assemble_processed, format_timestamp, CalendarAccess, MeetingRequest, Metadata,
    ProcessedRequest, ScheduledMeeting, ValidatedRequest, WorkflowFlags,
};

/// Where a request is in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    IntentExtracted,
    AvailabilityGathered,
    SlotResolved,
    OutputAssembled,
    Failed,
}

impl PipelineStage {
    /// Every flag up to and including `self` is set. `Failed` sets none.
    fn workflow(self) -> WorkflowFlags {
        let reached = |stage: PipelineStage| self.rank() >= stage.rank();
        WorkflowFlags {
            request_received: reached(PipelineStage::Received),
            intent_extracted: reached(PipelineStage::IntentExtracted),
            availability_gathered: reached(PipelineStage::AvailabilityGathered),
            slot_resolved: reached(PipelineStage::SlotResolved),
            output_assembled: reached(PipelineStage::OutputAssembled),
        }
    }

    fn rank(self) -> u8 {
        match self {
            PipelineStage::Failed => 0,
            PipelineStage::Received => 1,
            PipelineStage::IntentExtracted => 2,
            PipelineStage::AvailabilityGathered => 3,
            PipelineStage::SlotResolved => 4,
            PipelineStage::OutputAssembled => 5,
        }
    }
}

/// A successful run. Degraded runs are successful too; see `output.metadata.warnings`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub proposal_id: ProposalId,
    pub processed: ProcessedRequest,
    pub output: ScheduledMeeting,
    pub stage: PipelineStage,
}

struct Gathered {
    availabilities: HashMap<Identity, AttendeeAvailability>,
    access: CalendarAccess,
    warnings: Vec<String>,
}

pub struct Scheduler {
    extractor: Arc<dyn IntentExtractor>,
    calendar: Arc<dyn CalendarProvider>,
    store: Arc<ProposalStore>,
    resolver: SlotResolver,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        extractor: Arc<dyn IntentExtractor>,
        calendar: Arc<dyn CalendarProvider>,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler::with_store(extractor, calendar, Arc::new(ProposalStore::new()), config)
    }

    /// Shares `store` with other schedulers.
    pub fn with_store(
        extractor: Arc<dyn IntentExtractor>,
        calendar: Arc<dyn CalendarProvider>,
        store: Arc<ProposalStore>,
        config: SchedulerConfig,
    ) -> Self {
        Scheduler {
            extractor,
            calendar,
            store,
            resolver: SlotResolver::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs one request through the whole pipeline and stores the result as a pending proposal.
    ///
    /// # Errors
    /// Only `SchedulingError::Validation`: extraction and calendar failures degrade the result
    /// instead of failing it.
    pub async fn schedule(&self, request: MeetingRequest) -> Result<ScheduleOutcome, SchedulingError> {
        let offset = self.config.offset();
        let validated = request.validate(offset).map_err(|e| {
            warn!(
                "Request {:?} {:?}: {} ({})",
                request.request_id,
                PipelineStage::Failed,
                e,
                e.error_code()
            );
            e
        })?;
        info!(
            "Received request {} from {} with {} attendees",
            request.request_id,
            validated.organizer,
            validated.attendees.len()
        );
        let mut warnings = Vec::new();

        let (intent, intent_source) = match self.extract(&request, &validated).await {
            Ok(intent) => (intent, IntentSource::Extractor),
            Err(e) => {
                warn!("Intent extraction failed for {}: {}, using default intent", request.request_id, e);
                warnings.push(format!("intent extraction failed: {}", e));
                let intent_request = IntentRequest {
                    text: &request.email_content,
                    organizer: &validated.organizer,
                    attendees: &validated.attendees,
                    sent_on: Some(validated.received_at.date_naive()),
                };
                (
                    SchedulingIntent::fallback(&intent_request, self.config.default_duration_minutes),
                    IntentSource::Default,
                )
            }
        };

        let day = resolve_day(validated.received_at.date_naive(), intent.day);
        debug!("Request {} resolves to {} ({:?})", request.request_id, day, intent.day);

        let uninvited: Vec<Identity> = std::iter::once(&validated.organizer)
            .chain(&validated.attendees)
            .filter(|listed| !intent.participants.iter().any(|p| p.matches(listed)))
            .cloned()
            .collect();
        if !uninvited.is_empty() {
            debug!("Request {} leaves out {:?}", request.request_id, uninvited);
        }

        let looked_up: Vec<Identity> = intent
            .participants
            .iter()
            .chain(&uninvited)
            .cloned()
            .collect();
        let gathered = self.gather(&looked_up, &self.resolver.full_day(day)).await;
        warnings.extend(gathered.warnings);

        let query = MeetingQuery {
            participants: intent.participants.clone(),
            day,
            duration_minutes: intent.duration_minutes,
            time: intent.time,
            subject: request.summary().to_string(),
        };
        let resolved = self.resolver.resolve(&query, &gathered.availabilities);
        info!(
            "Request {} resolved to {} .. {} with {} conflicts",
            request.request_id,
            format_timestamp(&resolved.slot.start()),
            format_timestamp(&resolved.slot.end()),
            resolved.conflicts_detected
        );

        let proposal_id = ProposalId::new();
        let processed = assemble_processed(&request, &resolved.window, intent.duration_minutes);
        let stage = PipelineStage::OutputAssembled;
        let metadata = Metadata {
            conflicts_detected: resolved.conflicts_detected,
            processing_timestamp: Some(format_timestamp(&now(offset))),
            proposal_id: Some(proposal_id.to_string()),
            intent_source: Some(intent_source),
            warnings,
            calendar_access: gathered.access,
            workflow: stage.workflow(),
        };
        let uninvited: Vec<AttendeeEvents> = uninvited
            .iter()
            .map(|identity| AttendeeEvents::uninvited(identity, &gathered.availabilities))
            .collect();
        let output = assemble_output(&processed, &resolved, &uninvited, metadata);

        self.store.insert(SchedulingProposal {
            id: proposal_id,
            request,
            intent,
            resolved_slot: resolved.slot,
            per_attendee_events: resolved
                .per_attendee_events
                .into_iter()
                .map(|attendee| (attendee.identity, attendee.events))
                .collect(),
            status: ProposalStatus::Pending,
        });

        Ok(ScheduleOutcome {
            proposal_id,
            processed,
            output,
            stage,
        })
    }

    async fn extract(
        &self,
        request: &MeetingRequest,
        validated: &ValidatedRequest,
    ) -> Result<SchedulingIntent, IntentError> {
        let intent_request = IntentRequest {
            text: &request.email_content,
            organizer: &validated.organizer,
            attendees: &validated.attendees,
            sent_on: Some(validated.received_at.date_naive()),
        };
        let limit = self.config.intent_timeout();

        let raw = timeout(limit, self.extractor.extract(&intent_request))
            .await
            .map_err(|_| IntentError::Timeout(limit))??;
        debug!("{} extractor returned {:?}", self.extractor.name(), raw);

        raw.into_intent(&intent_request, &self.config.placeholder_domain)?
            .within(&self.config.duration_bounds())
    }

    /// Looks up every participant concurrently. Failures leave the participant free.
    async fn gather(&self, participants: &[Identity], window: &TimeInterval) -> Gathered {
        let limit = self.config.calendar_timeout();
        let lookups = participants.iter().map(|identity| async move {
            let events = timeout(limit, self.calendar.busy_intervals(identity, window))
                .await
                .unwrap_or_else(|_| {
                    Err(CalendarError::Timeout {
                        identity: identity.to_string(),
                        timeout: limit,
                    })
                });
            (identity, events)
        });

        let mut gathered = Gathered {
            availabilities: HashMap::with_capacity(participants.len()),
            access: CalendarAccess::default(),
            warnings: Vec::new(),
        };
        for (identity, events) in join_all(lookups).await {
            let availability = match events {
                Ok(events) => {
                    gathered.access.succeeded.push(identity.to_string());
                    AttendeeAvailability::new(identity.clone(), events)
                }
                Err(e) => {
                    warn!("Treating {} as free: {}", identity, e);
                    gathered.access.failed.push(identity.to_string());
                    gathered.warnings.push(format!("availability unknown: {}", e));
                    AttendeeAvailability::free(identity.clone())
                }
            };
            gathered.availabilities.insert(identity.clone(), availability);
        }

        gathered
    }

    /// # Errors
    /// `PROPOSAL_NOT_FOUND` for an unknown id, `INVALID_PROPOSAL_TRANSITION` unless pending.
    pub fn confirm(&self, proposal_id: &str) -> Result<SchedulingProposal, SchedulingError> {
        let id = proposal_id.parse::<ProposalId>()?;
        let proposal = self.store.confirm(&id)?;
        info!("Confirmed proposal {}", id);
        Ok(proposal)
    }

    /// # Errors
    /// Same as [`Scheduler::confirm`].
    pub fn cancel(&self, proposal_id: &str) -> Result<SchedulingProposal, SchedulingError> {
        let id = proposal_id.parse::<ProposalId>()?;
        let proposal = self.store.cancel(&id)?;
        info!("Cancelled proposal {}", id);
        Ok(proposal)
    }

    pub fn retrieve(&self, proposal_id: &str) -> Result<SchedulingProposal, SchedulingError> {
        let id = proposal_id.parse::<ProposalId>()?;
        Ok(self.store.get(&id)?)
    }

    pub fn proposals(&self) -> Vec<(ProposalId, ProposalStatus)> {
        self.store.list()
    }
}

fn now(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::StaticCalendar;
    use crate::event::CalendarEvent;
    use crate::intent::{FixtureExtractor, KeywordExtractor, RawIntent};
    use crate::wire::AttendeeRef;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::time::Duration;

    fn request(text: &str) -> MeetingRequest {
        MeetingRequest {
            request_id: "6118b54f-907b-4451-8d48-dd13d76033a5".to_string(),
            // Wednesday
            datetime: "02-07-2025T12:34:55".to_string(),
            location: Some("IISc Bangalore".to_string()),
            from: "userone.amd@gmail.com".to_string(),
            attendees: vec![
                AttendeeRef {
                    email: "usertwo.amd@gmail.com".to_string(),
                },
                AttendeeRef {
                    email: "userthree.amd@gmail.com".to_string(),
                },
            ],
            subject: Some("Agentic AI Project Status Update".to_string()),
            email_content: text.to_string(),
        }
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2025, 7, d, h, m, 0)
            .unwrap()
    }

    struct SlowCalendar;

    #[async_trait]
    impl CalendarProvider for SlowCalendar {
        async fn busy_intervals(
            &self,
            _identity: &Identity,
            _window: &TimeInterval,
        ) -> Result<Vec<CalendarEvent>, CalendarError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl IntentExtractor for SlowExtractor {
        async fn extract(&self, _request: &IntentRequest<'_>) -> Result<RawIntent, IntentError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(RawIntent::default())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn keyword_pipeline_avoids_busy_time() {
        let two = Identity::new("usertwo.amd@gmail.com");
        let calendar = StaticCalendar::new().with_events(
            &two,
            vec![CalendarEvent::new(
                TimeInterval::new(at(3, 9, 0), at(3, 10, 0)).unwrap(),
                vec![two.clone()],
                "Standup",
            )],
        );
        let scheduler = Scheduler::new(
            Arc::new(KeywordExtractor),
            Arc::new(calendar),
            SchedulerConfig::default(),
        );

        let outcome = scheduler
            .schedule(request(
                "Hi Team. Let's meet on Thursday for 30 minutes to discuss the status of Agentic AI Project.",
            ))
            .await
            .unwrap();
        let output = &outcome.output;

        assert_eq!(outcome.stage, PipelineStage::OutputAssembled);
        assert_eq!(output.event_start, "2025-07-03T10:00:00+05:30");
        assert_eq!(output.event_end, "2025-07-03T10:30:00+05:30");
        assert_eq!(output.start, "2025-07-03T09:00:00+05:30");
        assert_eq!(output.duration_mins, "30");
        assert_eq!(output.attendees.len(), 3);
        assert_eq!(output.attendees[1].events.len(), 2);
        assert_eq!(output.attendees[1].events[1].summary, "Agentic AI Project Status Update");
        assert_eq!(output.attendees[1].events[1].num_attendees, 3);
        assert_eq!(output.metadata.conflicts_detected, 0);
        assert_eq!(output.metadata.intent_source, Some(IntentSource::Extractor));
        assert_eq!(output.metadata.calendar_access.succeeded.len(), 3);
        assert!(output.metadata.workflow.output_assembled);
        assert_eq!(
            output.metadata.proposal_id.as_deref(),
            Some(outcome.proposal_id.to_string().as_str())
        );
        assert_eq!(
            scheduler.proposals(),
            vec![(outcome.proposal_id, ProposalStatus::Pending)]
        );
    }

    #[tokio::test]
    async fn malformed_intent_falls_back_to_defaults() {
        let scheduler = Scheduler::new(
            Arc::new(FixtureExtractor::replying("Sorry, I can't do that.")),
            Arc::new(StaticCalendar::new()),
            SchedulerConfig::default(),
        );

        let outcome = scheduler
            .schedule(request("Let's meet on Monday at 9:00 AM for an hour."))
            .await
            .unwrap();
        let output = &outcome.output;

        // Next business day after Wednesday, first gap of an empty day
        assert_eq!(output.event_start, "2025-07-03T09:00:00+05:30");
        assert_eq!(output.duration_mins, "30");
        assert_eq!(output.attendees.len(), 3);
        assert_eq!(output.metadata.intent_source, Some(IntentSource::Default));
        assert_eq!(output.metadata.warnings.len(), 1);
    }

    #[tokio::test]
    async fn extractor_output_is_applied() {
        let scheduler = Scheduler::new(
            Arc::new(FixtureExtractor::replying(
                r#"{"participants": ["usertwo"], "duration_minutes": 45, "time_constraints": "Monday 9:00 AM"}"#,
            )),
            Arc::new(StaticCalendar::new()),
            SchedulerConfig::default(),
        );

        let outcome = scheduler.schedule(request("irrelevant")).await.unwrap();
        let output = &outcome.output;

        assert_eq!(output.event_start, "2025-07-07T09:00:00+05:30");
        assert_eq!(output.event_end, "2025-07-07T09:45:00+05:30");
        let emails: Vec<&str> = output.attendees.iter().map(|a| a.email.as_str()).collect();
        assert_eq!(
            emails,
            vec!["userone.amd@gmail.com", "usertwo.amd@gmail.com", "userthree.amd@gmail.com"]
        );
        assert_eq!(output.attendees[1].events.len(), 1);
        assert_eq!(output.attendees[1].events[0].num_attendees, 2);
        assert!(output.attendees[2].events.is_empty());
    }

    #[tokio::test]
    async fn attendees_left_out_keep_their_calendars() {
        let three = Identity::new("userthree.amd@gmail.com");
        let calendar = StaticCalendar::new().with_events(
            &three,
            vec![CalendarEvent::new(
                TimeInterval::new(at(3, 9, 0), at(3, 10, 0)).unwrap(),
                vec![three.clone()],
                "Review",
            )],
        );
        let scheduler = Scheduler::new(
            Arc::new(FixtureExtractor::replying(
                r#"{"participants": ["usertwo"], "duration_minutes": 30, "time_constraints": "Thursday"}"#,
            )),
            Arc::new(calendar),
            SchedulerConfig::default(),
        );

        let outcome = scheduler.schedule(request("irrelevant")).await.unwrap();
        let output = &outcome.output;

        // userthree's 09:00 block does not push the meeting back
        assert_eq!(output.event_start, "2025-07-03T09:00:00+05:30");
        assert_eq!(output.attendees.len(), 3);
        let three_events = &output.attendees[2].events;
        assert_eq!(output.attendees[2].email, three.to_string());
        assert_eq!(three_events.len(), 1);
        assert_eq!(three_events[0].summary, "Review");
        assert_eq!(output.metadata.conflicts_detected, 0);
        assert_eq!(output.metadata.calendar_access.succeeded.len(), 3);
        assert_eq!(
            scheduler
                .retrieve(&outcome.proposal_id.to_string())
                .unwrap()
                .per_attendee_events
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn out_of_range_durations_fall_back_to_defaults() {
        let scheduler = Scheduler::new(
            Arc::new(FixtureExtractor::replying(
                r#"{"participants": ["usertwo"], "duration_minutes": 10000, "time_constraints": "Thursday"}"#,
            )),
            Arc::new(StaticCalendar::new()),
            SchedulerConfig::default(),
        );

        let outcome = scheduler.schedule(request("irrelevant")).await.unwrap();
        let output = &outcome.output;

        assert_eq!(output.event_start, "2025-07-03T09:00:00+05:30");
        assert_eq!(output.event_end, "2025-07-03T09:30:00+05:30");
        assert_eq!(output.duration_mins, "30");
        assert_eq!(output.metadata.intent_source, Some(IntentSource::Default));
        assert_eq!(output.metadata.warnings.len(), 1);
        assert!(output.metadata.warnings[0].contains("10000"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_extractor_times_out() {
        let config = SchedulerConfig {
            intent_timeout_ms: 100,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            Arc::new(SlowExtractor),
            Arc::new(StaticCalendar::new()),
            config,
        );

        let outcome = scheduler.schedule(request("Friday at 3 pm")).await.unwrap();
        let metadata = &outcome.output.metadata;

        assert_eq!(metadata.intent_source, Some(IntentSource::Default));
        assert_eq!(metadata.warnings.len(), 1);
        assert!(metadata.warnings[0].starts_with("intent extraction failed"));
        assert!(metadata.warnings[0].contains("did not answer"));
        assert_eq!(outcome.output.attendees.len(), 3);
        assert_eq!(outcome.output.duration_mins, "30");
    }

    #[tokio::test]
    async fn failing_calendars_are_treated_as_free() {
        let three = Identity::new("userthree.amd@gmail.com");
        let scheduler = Scheduler::new(
            Arc::new(KeywordExtractor),
            Arc::new(StaticCalendar::new().failing_for(&three)),
            SchedulerConfig::default(),
        );

        let outcome = scheduler
            .schedule(request("Thursday at 11:00 A.M works for everyone."))
            .await
            .unwrap();
        let metadata = &outcome.output.metadata;

        assert_eq!(outcome.output.event_start, "2025-07-03T11:00:00+05:30");
        assert_eq!(metadata.calendar_access.failed, vec![three.to_string()]);
        assert_eq!(metadata.calendar_access.succeeded.len(), 2);
        assert_eq!(metadata.warnings.len(), 1);
        assert_eq!(outcome.output.attendees[2].events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calendars_time_out() {
        let config = SchedulerConfig {
            calendar_timeout_ms: 50,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(Arc::new(KeywordExtractor), Arc::new(SlowCalendar), config);

        let outcome = scheduler.schedule(request("Friday, half an hour")).await.unwrap();
        let metadata = &outcome.output.metadata;

        assert_eq!(outcome.output.event_start, "2025-07-04T09:00:00+05:30");
        assert_eq!(metadata.calendar_access.failed.len(), 3);
        assert!(metadata.warnings.iter().all(|w| w.contains("did not answer")));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_stage() {
        let scheduler = Scheduler::new(
            Arc::new(KeywordExtractor),
            Arc::new(StaticCalendar::new()),
            SchedulerConfig::default(),
        );
        let mut bad = request("Thursday");
        bad.from = "userone at gmail".to_string();

        let error = scheduler.schedule(bad).await.unwrap_err();

        assert_eq!(error.error_code(), "INVALID_EMAIL");
        assert!(scheduler.proposals().is_empty());
    }

    #[tokio::test]
    async fn proposals_move_through_their_lifecycle() {
        let scheduler = Scheduler::new(
            Arc::new(KeywordExtractor),
            Arc::new(StaticCalendar::new()),
            SchedulerConfig::default(),
        );
        let first = scheduler.schedule(request("Thursday")).await.unwrap();
        let second = scheduler.schedule(request("Friday")).await.unwrap();
        let first_id = first.proposal_id.to_string();
        let second_id = second.proposal_id.to_string();

        assert_eq!(scheduler.confirm(&first_id).unwrap().status, ProposalStatus::Confirmed);
        assert_eq!(
            scheduler.confirm(&first_id).unwrap_err().error_code(),
            "INVALID_PROPOSAL_TRANSITION"
        );
        assert_eq!(scheduler.cancel(&second_id).unwrap().status, ProposalStatus::Cancelled);
        assert_eq!(scheduler.retrieve(&second_id).unwrap().status, ProposalStatus::Cancelled);
        assert_eq!(
            scheduler.retrieve("no-such-proposal").unwrap_err().error_code(),
            "PROPOSAL_NOT_FOUND"
        );
        assert_eq!(scheduler.proposals().len(), 2);
    }
}
