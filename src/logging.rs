use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::MediaError;
use crate::models::{SessionId, SessionKind};
use crate::session::state::{Operation, SessionState};

const DEFAULT_HISTORY: usize = 1000;
pub const LOG_LEVEL_ENV: &str = "MEDIA_SESSION_LOG_LEVEL";

/// Session event kept in the in-memory history
#[derive(Debug, Clone)]
pub struct SessionLogEvent {
    pub timestamp: DateTime<Utc>,
    pub session: String,
    pub event_type: SessionLogEventType,
    pub duration: Option<Duration>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLogEventType {
    SessionCreated,
    StateTransition,
    OperationCompleted,
    OperationCancelled,
    OutputBackpressure,
    LimitReached,
    SessionError,
    PerformanceWarning,
    SessionReleased,
}

impl SessionLogEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionLogEventType::SessionCreated => "SESSION_CREATED",
            SessionLogEventType::StateTransition => "STATE_TRANSITION",
            SessionLogEventType::OperationCompleted => "OPERATION_COMPLETED",
            SessionLogEventType::OperationCancelled => "OPERATION_CANCELLED",
            SessionLogEventType::OutputBackpressure => "OUTPUT_BACKPRESSURE",
            SessionLogEventType::LimitReached => "LIMIT_REACHED",
            SessionLogEventType::SessionError => "SESSION_ERROR",
            SessionLogEventType::PerformanceWarning => "PERFORMANCE_WARNING",
            SessionLogEventType::SessionReleased => "SESSION_RELEASED",
        }
    }
}

/// Engine-wide logger shared by every session of a service
#[derive(Clone)]
pub struct SessionLogger {
    events: Arc<Mutex<VecDeque<SessionLogEvent>>>,
    max_events: usize,
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLogger {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            max_events: max_events.max(1),
        }
    }

    /// Initialize env_logger. `MEDIA_SESSION_LOG_LEVEL` wins over `default_level`.
    pub fn init(default_level: &str) -> Result<(), Box<dyn std::error::Error>> {
        let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());

        let mut builder = env_logger::Builder::new();
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{}] [{}:{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        });
        builder.filter_level(parse_level(&log_level));
        builder.try_init()?;

        info!("Media session logging initialized with level: {}", log_level);
        Ok(())
    }

    pub fn log_event(
        &self,
        session: &SessionId,
        event_type: SessionLogEventType,
        details: String,
        duration: Option<Duration>,
    ) {
        let session = session.short();
        match event_type {
            SessionLogEventType::SessionCreated
            | SessionLogEventType::StateTransition
            | SessionLogEventType::SessionReleased
            | SessionLogEventType::LimitReached => {
                info!("[{}] [{}] {}", event_type.as_str(), session, details);
            }
            SessionLogEventType::OperationCompleted => {
                debug!("[{}] [{}] {} (took: {:?})", event_type.as_str(), session, details, duration);
            }
            SessionLogEventType::OperationCancelled
            | SessionLogEventType::OutputBackpressure
            | SessionLogEventType::PerformanceWarning => {
                warn!("[{}] [{}] {}", event_type.as_str(), session, details);
            }
            SessionLogEventType::SessionError => {
                error!("[{}] [{}] {}", event_type.as_str(), session, details);
            }
        }

        if let Ok(mut events) = self.events.lock() {
            events.push_back(SessionLogEvent {
                timestamp: Utc::now(),
                session,
                event_type,
                duration,
                details,
            });
            while events.len() > self.max_events {
                events.pop_front();
            }
        }
    }

    pub fn log_session_created(&self, session: &SessionId, kind: SessionKind, backend: &str) {
        self.log_event(
            session,
            SessionLogEventType::SessionCreated,
            format!("{} session on backend '{}'", kind, backend),
            None,
        );
    }

    pub fn log_transition(&self, session: &SessionId, from: SessionState, to: SessionState) {
        self.log_event(
            session,
            SessionLogEventType::StateTransition,
            format!("{} -> {}", from, to),
            None,
        );
    }

    pub fn log_operation(&self, session: &SessionId, operation: Operation, took: Duration) {
        self.log_event(
            session,
            SessionLogEventType::OperationCompleted,
            operation.to_string(),
            Some(took),
        );
    }

    pub fn log_cancelled(&self, session: &SessionId, operation: Operation, by: Operation) {
        self.log_event(
            session,
            SessionLogEventType::OperationCancelled,
            format!("{} cancelled by {}", operation, by),
            None,
        );
    }

    pub fn log_backpressure(&self, session: &SessionId, pending: usize) {
        self.log_event(
            session,
            SessionLogEventType::OutputBackpressure,
            format!("no free output buffer, {} frame(s) waiting", pending),
            None,
        );
    }

    pub fn log_limit(&self, session: &SessionId, what: &str) {
        self.log_event(session, SessionLogEventType::LimitReached, what.to_string(), None);
    }

    pub fn log_session_error(&self, session: &SessionId, err: &MediaError) {
        self.log_event(
            session,
            SessionLogEventType::SessionError,
            format!("{} (code {})", err, err.ext_code()),
            None,
        );
    }

    pub fn log_performance_warning(&self, session: &SessionId, operation: Operation, took: Duration, threshold: Duration) {
        self.log_event(
            session,
            SessionLogEventType::PerformanceWarning,
            format!(
                "{} took {}ms (threshold: {}ms)",
                operation,
                took.as_millis(),
                threshold.as_millis()
            ),
            Some(took),
        );
    }

    pub fn log_released(&self, session: &SessionId) {
        self.log_event(session, SessionLogEventType::SessionReleased, "released".to_string(), None);
    }

    pub fn get_recent_events(&self, count: usize) -> Vec<SessionLogEvent> {
        let Ok(events) = self.events.lock() else {
            return Vec::new();
        };
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn get_event_statistics(&self) -> EventStatistics {
        let mut stats = EventStatistics::default();
        let Ok(events) = self.events.lock() else {
            return stats;
        };

        for event in events.iter() {
            match event.event_type {
                SessionLogEventType::SessionCreated => stats.sessions_created += 1,
                SessionLogEventType::StateTransition => stats.transitions += 1,
                SessionLogEventType::OperationCancelled => stats.cancellations += 1,
                SessionLogEventType::OutputBackpressure => stats.backpressure_stalls += 1,
                SessionLogEventType::SessionError => stats.session_errors += 1,
                SessionLogEventType::PerformanceWarning => stats.performance_warnings += 1,
                _ => {}
            }
        }
        stats.total_events = events.len();
        stats
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or(log::LevelFilter::Info)
}

/// Statistics about logged events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStatistics {
    pub total_events: usize,
    pub sessions_created: usize,
    pub transitions: usize,
    pub cancellations: usize,
    pub backpressure_stalls: usize,
    pub session_errors: usize,
    pub performance_warnings: usize,
}

/// Timer utility for measuring operation durations
pub struct OperationTimer {
    start_time: Instant,
    operation: Operation,
}

impl OperationTimer {
    pub fn new(operation: Operation) -> Self {
        trace!("Starting operation: {}", operation);
        Self {
            start_time: Instant::now(),
            operation,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Elapsed time, warning through `logger` above `threshold`
    pub fn finish_with_threshold(self, logger: &SessionLogger, session: &SessionId, threshold: Duration) -> Duration {
        let duration = self.elapsed();
        if duration > threshold {
            logger.log_performance_warning(session, self.operation, duration, threshold);
        } else {
            logger.log_operation(session, self.operation, duration);
        }
        duration
    }
}
