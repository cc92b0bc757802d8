use crate::engine::{EngineError, EngineHandle};
use chrono::NaiveDate;
use facegate_core::{AttendanceKind, Descriptor, LivenessScore, MatchError, Thresholds};
use serde::Serialize;
use zbus::{interface, DBusError};

/// Errors surfaced over D-Bus. Each failure kind gets its own error name
/// (`org.facegate.Attendance1.Error.<Variant>`) so clients can tell a
/// liveness failure from an unrecognized face or a duplicate enrollment.
#[derive(Debug, DBusError)]
#[zbus(prefix = "org.facegate.Attendance1.Error")]
pub enum AttendanceError {
    #[zbus(error)]
    ZBus(zbus::Error),
    LivenessFailed(String),
    NoReferenceData(String),
    FaceNotRecognized(String),
    DuplicateFace(String),
    InvalidDescriptor(String),
    UnknownEmployee(String),
    EmailTaken(String),
    InvalidArgument(String),
    Internal(String),
}

impl From<EngineError> for AttendanceError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::Match(m) => match m {
                MatchError::LivenessFailed { .. } => Self::LivenessFailed(msg),
                MatchError::NoReferenceData => Self::NoReferenceData(msg),
                MatchError::FaceNotRecognized { .. } => Self::FaceNotRecognized(msg),
                MatchError::DuplicateFace { .. } => Self::DuplicateFace(msg),
                MatchError::InvalidDescriptor(_) => Self::InvalidDescriptor(msg),
            },
            EngineError::UnknownEmployee(_) => Self::UnknownEmployee(msg),
            EngineError::EmailTaken(_) => Self::EmailTaken(msg),
            EngineError::Store(_) | EngineError::Spawn(_) | EngineError::ChannelClosed => {
                tracing::error!(error = %msg, "internal engine failure");
                Self::Internal(msg)
            }
        }
    }
}

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.facegate.Attendance1
/// Object path: /org/facegate/Attendance1
pub struct AttendanceService {
    engine: EngineHandle,
    thresholds: Thresholds,
    history_limit: usize,
    log_limit: usize,
    descriptor_dim: Option<usize>,
}

impl AttendanceService {
    pub fn new(
        engine: EngineHandle,
        thresholds: Thresholds,
        history_limit: usize,
        log_limit: usize,
        descriptor_dim: Option<usize>,
    ) -> Self {
        Self {
            engine,
            thresholds,
            history_limit,
            log_limit,
            descriptor_dim,
        }
    }
}

#[interface(name = "org.facegate.Attendance1")]
impl AttendanceService {
    /// Create an employee with their reference descriptor. Returns the
    /// employee as JSON.
    async fn enroll(
        &self,
        email: &str,
        full_name: &str,
        descriptor: Vec<f64>,
    ) -> Result<String, AttendanceError> {
        tracing::info!(email, dims = descriptor.len(), "enroll requested");
        if email.trim().is_empty() || full_name.trim().is_empty() {
            return Err(AttendanceError::InvalidArgument(
                "email and full name are required".into(),
            ));
        }
        let descriptor = descriptor_from_wire(descriptor, self.descriptor_dim)?;
        let employee = self
            .engine
            .enroll(email.to_string(), full_name.to_string(), descriptor)
            .await?;
        to_json(&employee)
    }

    /// Replace an employee's reference descriptor.
    async fn replace_photo(
        &self,
        employee_id: &str,
        descriptor: Vec<f64>,
    ) -> Result<String, AttendanceError> {
        tracing::info!(employee_id, dims = descriptor.len(), "replace_photo requested");
        let descriptor = descriptor_from_wire(descriptor, self.descriptor_dim)?;
        let write = self
            .engine
            .replace_photo(employee_id.into(), descriptor)
            .await?;
        to_json(&write)
    }

    /// Check in or out. `kind` is `CHECK_IN` (default when empty) or
    /// `CHECK_OUT`. Returns the recorded event as JSON.
    async fn mark(
        &self,
        employee_id: &str,
        descriptor: Vec<f64>,
        liveness: f64,
        kind: &str,
    ) -> Result<String, AttendanceError> {
        tracing::info!(employee_id, liveness, kind, "mark requested");
        let kind = AttendanceKind::parse(kind).ok_or_else(|| {
            AttendanceError::InvalidArgument(format!("unknown attendance kind: {kind}"))
        })?;
        let liveness = liveness_from_wire(liveness)?;
        let descriptor = descriptor_from_wire(descriptor, self.descriptor_dim)?;
        let event = self
            .engine
            .mark(employee_id.into(), descriptor, liveness, kind)
            .await?;
        to_json(&event)
    }

    /// Recent attendance of one employee. `limit` 0 uses the configured default.
    async fn history(&self, employee_id: &str, limit: u32) -> Result<String, AttendanceError> {
        let limit = limit_or(limit, self.history_limit);
        let events = self.engine.history(employee_id.into(), limit).await?;
        to_json(&events)
    }

    async fn stats(&self, employee_id: &str) -> Result<String, AttendanceError> {
        let stats = self.engine.stats(employee_id.into()).await?;
        to_json(&stats)
    }

    /// Organisation-wide log. `date` is `YYYY-MM-DD` (UTC) or empty for all days.
    async fn attendance_log(&self, date: &str, limit: u32) -> Result<String, AttendanceError> {
        let date = parse_date(date)?;
        let limit = limit_or(limit, self.log_limit);
        let entries = self.engine.attendance_log(date, limit).await?;
        to_json(&entries)
    }

    async fn list_employees(&self) -> Result<String, AttendanceError> {
        let employees = self.engine.list_employees().await?;
        to_json(&employees)
    }

    /// Remove an employee together with their descriptors and attendance.
    async fn remove_employee(&self, employee_id: &str) -> Result<bool, AttendanceError> {
        tracing::info!(employee_id, "remove_employee requested");
        Ok(self.engine.remove_employee(employee_id.into()).await?)
    }

    /// Return daemon status information.
    async fn status(&self) -> Result<String, AttendanceError> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "thresholds": self.thresholds,
            "history_limit": self.history_limit,
            "log_limit": self.log_limit,
            "descriptor_dim": self.descriptor_dim,
        })
        .to_string())
    }
}

fn descriptor_from_wire(
    values: Vec<f64>,
    dim: Option<usize>,
) -> Result<Descriptor, AttendanceError> {
    if let Some(dim) = dim {
        if !values.is_empty() && values.len() != dim {
            return Err(AttendanceError::InvalidDescriptor(format!(
                "descriptor has {} values, expected {dim}",
                values.len()
            )));
        }
    }
    Descriptor::new(values.into_iter().map(|v| v as f32).collect())
        .map_err(|e| AttendanceError::InvalidDescriptor(e.to_string()))
}

/// Liveness must lie in [0, 1]. NaN is rejected too.
fn liveness_from_wire(value: f64) -> Result<LivenessScore, AttendanceError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AttendanceError::InvalidArgument(format!(
            "liveness score {value} is outside [0, 1]"
        )));
    }
    Ok(LivenessScore(value as f32))
}

fn parse_date(raw: &str) -> Result<Option<NaiveDate>, AttendanceError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| AttendanceError::InvalidArgument(format!("invalid date {raw:?}: {e}")))
}

fn limit_or(requested: u32, default: usize) -> usize {
    if requested == 0 {
        default
    } else {
        requested as usize
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AttendanceError> {
    serde_json::to_string(value).map_err(|e| AttendanceError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_errors_map_to_distinct_names() {
        let cases = [
            (MatchError::LivenessFailed { score: 0.5, minimum: 0.9 }, "LivenessFailed"),
            (MatchError::NoReferenceData, "NoReferenceData"),
            (
                MatchError::FaceNotRecognized { distance: 0.7, threshold: 0.6 },
                "FaceNotRecognized",
            ),
            (
                MatchError::DuplicateFace { owner: "bob".into(), distance: 0.3 },
                "DuplicateFace",
            ),
            (MatchError::InvalidDescriptor("empty".into()), "InvalidDescriptor"),
        ];

        for (err, expected) in cases {
            let mapped = AttendanceError::from(EngineError::Match(err));
            let name = match &mapped {
                AttendanceError::LivenessFailed(_) => "LivenessFailed",
                AttendanceError::NoReferenceData(_) => "NoReferenceData",
                AttendanceError::FaceNotRecognized(_) => "FaceNotRecognized",
                AttendanceError::DuplicateFace(_) => "DuplicateFace",
                AttendanceError::InvalidDescriptor(_) => "InvalidDescriptor",
                other => panic!("unexpected mapping: {other:?}"),
            };
            assert_eq!(name, expected);
        }
    }

    #[test]
    fn test_duplicate_message_names_owner() {
        let mapped = AttendanceError::from(EngineError::Match(MatchError::DuplicateFace {
            owner: "bob".into(),
            distance: 0.3,
        }));
        match mapped {
            AttendanceError::DuplicateFace(msg) => assert!(msg.contains("bob"), "{msg}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_descriptor_from_wire_rejects_empty() {
        assert!(matches!(
            descriptor_from_wire(vec![], None),
            Err(AttendanceError::InvalidDescriptor(_))
        ));
        let d = descriptor_from_wire(vec![0.25, -0.5], None).unwrap();
        assert_eq!(d.values(), &[0.25f32, -0.5]);
    }

    #[test]
    fn test_descriptor_from_wire_enforces_configured_dim() {
        assert!(descriptor_from_wire(vec![0.1; 128], Some(128)).is_ok());
        match descriptor_from_wire(vec![0.1; 64], Some(128)) {
            Err(AttendanceError::InvalidDescriptor(msg)) => {
                assert!(msg.contains("expected 128"), "{msg}")
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Without a configured dimension any non-empty length is accepted.
        assert!(descriptor_from_wire(vec![0.1; 64], None).is_ok());
    }

    #[test]
    fn test_liveness_from_wire_rejects_out_of_range() {
        for bad in [7.5, -0.1, 1.0001, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(liveness_from_wire(bad), Err(AttendanceError::InvalidArgument(_))),
                "{bad} should be rejected"
            );
        }
        assert_eq!(liveness_from_wire(0.95).unwrap(), LivenessScore(0.95));
        assert_eq!(liveness_from_wire(0.0).unwrap(), LivenessScore(0.0));
        assert_eq!(liveness_from_wire(1.0).unwrap(), LivenessScore(1.0));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("").unwrap(), None);
        assert_eq!(
            parse_date("2026-03-02").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2)
        );
        assert!(matches!(
            parse_date("02.03.2026"),
            Err(AttendanceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_limit_or_default() {
        assert_eq!(limit_or(0, 50), 50);
        assert_eq!(limit_or(10, 50), 10);
    }
}
