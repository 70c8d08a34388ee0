pub mod calendar;
pub mod config;
pub mod day;
pub mod error;
pub mod event;
pub mod intent;
pub mod llm;
pub mod proposal;
pub mod resolver;
pub mod scheduler;
pub mod time;
pub mod wire;

pub use calendar::{CalendarProvider, HttpCalendar, StaticCalendar};
pub use config::{ChatCompletionConfig, SchedulerConfig};
pub use error::{CalendarError, IntentError, ProposalError, SchedulingError, ValidationError};
pub use event::{AttendeeAvailability, CalendarEvent, Identity, TimeInterval};
pub use intent::{FixtureExtractor, IntentExtractor, KeywordExtractor, SchedulingIntent};
pub use llm::ChatCompletionExtractor;
pub use proposal::{ProposalId, ProposalStatus, ProposalStore, SchedulingProposal};
pub use resolver::{MeetingQuery, ResolvedSlot, SlotResolver};
pub use scheduler::{PipelineStage, ScheduleOutcome, Scheduler};
pub use wire::{MeetingRequest, ProcessedRequest, ScheduledMeeting};
