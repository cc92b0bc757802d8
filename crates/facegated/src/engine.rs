use crate::store::{
    AttendanceEvent, AttendanceLogEntry, AttendanceStats, DescriptorWrite, Employee, Store,
    StoreError,
};
use chrono::{NaiveDate, Utc};
use facegate_core::{AttendanceKind, Descriptor, EmployeeId, LivenessScore, MatchEngine, MatchError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("unknown employee: {0}")]
    UnknownEmployee(EmployeeId),
    #[error("an employee with email {0} already exists")]
    EmailTaken(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        email: String,
        full_name: String,
        descriptor: Descriptor,
        reply: Reply<Employee>,
    },
    ReplacePhoto {
        employee: EmployeeId,
        descriptor: Descriptor,
        reply: Reply<DescriptorWrite>,
    },
    Mark {
        employee: EmployeeId,
        descriptor: Descriptor,
        liveness: LivenessScore,
        kind: AttendanceKind,
        reply: Reply<AttendanceEvent>,
    },
    History {
        employee: EmployeeId,
        limit: usize,
        reply: Reply<Vec<AttendanceEvent>>,
    },
    Stats {
        employee: EmployeeId,
        reply: Reply<AttendanceStats>,
    },
    AttendanceLog {
        date: Option<NaiveDate>,
        limit: usize,
        reply: Reply<Vec<AttendanceLogEntry>>,
    },
    ListEmployees {
        reply: Reply<Vec<Employee>>,
    },
    RemoveEmployee {
        employee: EmployeeId,
        reply: Reply<bool>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Create an employee with their first reference descriptor, after the
    /// duplicate-identity check against every enrolled face.
    pub async fn enroll(
        &self,
        email: String,
        full_name: String,
        descriptor: Descriptor,
    ) -> Result<Employee, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            email,
            full_name,
            descriptor,
            reply,
        })
        .await
    }

    /// Replace an employee's reference descriptor.
    pub async fn replace_photo(
        &self,
        employee: EmployeeId,
        descriptor: Descriptor,
    ) -> Result<DescriptorWrite, EngineError> {
        self.call(|reply| EngineRequest::ReplacePhoto {
            employee,
            descriptor,
            reply,
        })
        .await
    }

    /// Evaluate an attendance attempt and record it if accepted.
    pub async fn mark(
        &self,
        employee: EmployeeId,
        descriptor: Descriptor,
        liveness: LivenessScore,
        kind: AttendanceKind,
    ) -> Result<AttendanceEvent, EngineError> {
        self.call(|reply| EngineRequest::Mark {
            employee,
            descriptor,
            liveness,
            kind,
            reply,
        })
        .await
    }

    pub async fn history(
        &self,
        employee: EmployeeId,
        limit: usize,
    ) -> Result<Vec<AttendanceEvent>, EngineError> {
        self.call(|reply| EngineRequest::History {
            employee,
            limit,
            reply,
        })
        .await
    }

    pub async fn stats(&self, employee: EmployeeId) -> Result<AttendanceStats, EngineError> {
        self.call(|reply| EngineRequest::Stats { employee, reply }).await
    }

    pub async fn attendance_log(
        &self,
        date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<AttendanceLogEntry>, EngineError> {
        self.call(|reply| EngineRequest::AttendanceLog { date, limit, reply })
            .await
    }

    pub async fn list_employees(&self) -> Result<Vec<Employee>, EngineError> {
        self.call(|reply| EngineRequest::ListEmployees { reply }).await
    }

    pub async fn remove_employee(&self, employee: EmployeeId) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::RemoveEmployee { employee, reply })
            .await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the store, so every enrollment write is serialized and
/// every evaluation reads descriptors as of a single point in time.
pub fn spawn_engine(store: Store, engine: MatchEngine) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    let mut worker = Worker { store, engine };

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                worker.handle(req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

struct Worker {
    store: Store,
    engine: MatchEngine,
}

impl Worker {
    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Enroll {
                email,
                full_name,
                descriptor,
                reply,
            } => {
                let _ = reply.send(self.run_enroll(&email, &full_name, &descriptor));
            }
            EngineRequest::ReplacePhoto {
                employee,
                descriptor,
                reply,
            } => {
                let _ = reply.send(self.run_replace_photo(&employee, &descriptor));
            }
            EngineRequest::Mark {
                employee,
                descriptor,
                liveness,
                kind,
                reply,
            } => {
                let _ = reply.send(self.run_mark(&employee, &descriptor, liveness, kind));
            }
            EngineRequest::History {
                employee,
                limit,
                reply,
            } => {
                let result = self
                    .require_employee(&employee)
                    .and_then(|_| Ok(self.store.history(&employee, limit)?));
                let _ = reply.send(result);
            }
            EngineRequest::Stats { employee, reply } => {
                let result = self
                    .require_employee(&employee)
                    .and_then(|_| Ok(self.store.stats(&employee, Utc::now())?));
                let _ = reply.send(result);
            }
            EngineRequest::AttendanceLog { date, limit, reply } => {
                let _ = reply.send(self.store.attendance_log(date, limit).map_err(Into::into));
            }
            EngineRequest::ListEmployees { reply } => {
                let _ = reply.send(self.store.list_employees().map_err(Into::into));
            }
            EngineRequest::RemoveEmployee { employee, reply } => {
                let result = match self.store.remove_employee(&employee) {
                    Ok(true) => Ok(true),
                    Ok(false) => Err(EngineError::UnknownEmployee(employee)),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn require_employee(&self, employee: &EmployeeId) -> Result<Employee, EngineError> {
        self.store
            .employee(employee)?
            .ok_or_else(|| EngineError::UnknownEmployee(employee.clone()))
    }

    fn run_enroll(
        &mut self,
        email: &str,
        full_name: &str,
        descriptor: &Descriptor,
    ) -> Result<Employee, EngineError> {
        if self.store.email_taken(email)? {
            return Err(EngineError::EmailTaken(email.to_string()));
        }

        let everyone = self.store.references_excluding(None)?;
        self.engine.check_for_duplicate_identity(descriptor, &everyone)?;

        Ok(self.store.create_employee(email, full_name, descriptor)?)
    }

    fn run_replace_photo(
        &mut self,
        employee: &EmployeeId,
        descriptor: &Descriptor,
    ) -> Result<DescriptorWrite, EngineError> {
        self.require_employee(employee)?;

        let others = self.store.references_excluding(Some(employee))?;
        self.engine.check_for_duplicate_identity(descriptor, &others)?;

        Ok(self.store.upsert_descriptor(employee, descriptor)?)
    }

    fn run_mark(
        &mut self,
        employee: &EmployeeId,
        descriptor: &Descriptor,
        liveness: LivenessScore,
        kind: AttendanceKind,
    ) -> Result<AttendanceEvent, EngineError> {
        self.require_employee(employee)?;

        let references = self.store.references_for(employee)?;
        let acceptance = self
            .engine
            .evaluate_attendance(descriptor, liveness, &references)?;

        let event = self
            .store
            .record_attendance(employee, kind, &acceptance, Utc::now())?;

        tracing::info!(
            employee = %employee,
            kind = %kind,
            confidence = event.confidence,
            liveness = event.liveness_score,
            "attendance recorded"
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::Thresholds;

    fn d(values: &[f32]) -> Descriptor {
        Descriptor::new(values.to_vec()).unwrap()
    }

    fn spawn() -> EngineHandle {
        let store = Store::open_in_memory().unwrap();
        spawn_engine(store, MatchEngine::new(Thresholds::default())).unwrap()
    }

    async fn enroll(engine: &EngineHandle, name: &str, descriptor: Descriptor) -> Employee {
        engine
            .enroll(format!("{name}@example.com"), name.to_string(), descriptor)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mark_accepts_enrolled_face() {
        let engine = spawn();
        let alice = enroll(&engine, "alice", d(&[0.0, 0.0])).await;

        let event = engine
            .mark(alice.id.clone(), d(&[0.45, 0.0]), LivenessScore(0.95), AttendanceKind::CheckIn)
            .await
            .unwrap();
        assert!((event.confidence - 0.55).abs() < 1e-6);
        assert_eq!(event.liveness_score, 0.95);

        let history = engine.history(alice.id, 50).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_rejections_are_distinguishable_and_not_recorded() {
        let engine = spawn();
        let alice = enroll(&engine, "alice", d(&[0.0, 0.0])).await;

        let err = engine
            .mark(alice.id.clone(), d(&[0.45, 0.0]), LivenessScore(0.5), AttendanceKind::CheckIn)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Match(MatchError::LivenessFailed { .. })));

        let err = engine
            .mark(alice.id.clone(), d(&[0.72, 0.0]), LivenessScore(0.95), AttendanceKind::CheckOut)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Match(MatchError::FaceNotRecognized { .. })));

        assert!(engine.history(alice.id, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_unknown_employee() {
        let engine = spawn();
        let err = engine
            .mark("ghost".into(), d(&[0.0]), LivenessScore(0.95), AttendanceKind::CheckIn)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownEmployee(_)));
    }

    #[tokio::test]
    async fn test_enroll_rejects_duplicate_face() {
        let engine = spawn();
        let bob = enroll(&engine, "bob", d(&[0.0, 0.0])).await;

        let err = engine
            .enroll("alice@example.com".into(), "Alice".into(), d(&[0.3, 0.0]))
            .await
            .unwrap_err();
        match err {
            EngineError::Match(MatchError::DuplicateFace { owner, .. }) => assert_eq!(owner, bob.id),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(engine.list_employees().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enroll_rejects_taken_email() {
        let engine = spawn();
        enroll(&engine, "bob", d(&[0.0, 0.0])).await;
        let err = engine
            .enroll("bob@example.com".into(), "Other Bob".into(), d(&[5.0, 5.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn test_replace_photo_ignores_own_descriptor() {
        let engine = spawn();
        let alice = enroll(&engine, "alice", d(&[0.0, 0.0])).await;
        enroll(&engine, "bob", d(&[3.0, 3.0])).await;

        let write = engine
            .replace_photo(alice.id.clone(), d(&[0.1, 0.0]))
            .await
            .unwrap();
        assert!(write.replaced);

        let err = engine
            .replace_photo(alice.id, d(&[3.0, 3.1]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Match(MatchError::DuplicateFace { .. })));
    }

    #[tokio::test]
    async fn test_remove_employee() {
        let engine = spawn();
        let alice = enroll(&engine, "alice", d(&[0.0, 0.0])).await;

        assert!(engine.remove_employee(alice.id.clone()).await.unwrap());
        let err = engine.remove_employee(alice.id.clone()).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownEmployee(_)));
        assert!(matches!(
            engine.stats(alice.id).await.unwrap_err(),
            EngineError::UnknownEmployee(_)
        ));
    }

    #[tokio::test]
    async fn test_attendance_log_and_stats() {
        let engine = spawn();
        let alice = enroll(&engine, "alice", d(&[0.0, 0.0])).await;
        engine
            .mark(alice.id.clone(), d(&[0.1, 0.0]), LivenessScore(0.98), AttendanceKind::CheckIn)
            .await
            .unwrap();

        let log = engine.attendance_log(None, 100).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].employee_name, "alice");

        let stats = engine.stats(alice.id).await.unwrap();
        assert_eq!(stats.today_count, 1);
        assert_eq!(stats.chart.len(), 1);
    }
}
