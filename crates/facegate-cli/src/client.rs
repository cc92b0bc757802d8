use zbus::proxy;

/// Client side of `org.facegate.Attendance1`. JSON payloads are returned
/// as strings and pretty-printed by the caller.
#[proxy(
    interface = "org.facegate.Attendance1",
    default_service = "org.facegate.Attendance1",
    default_path = "/org/facegate/Attendance1",
    gen_blocking = false
)]
pub trait Attendance {
    async fn enroll(&self, email: &str, full_name: &str, descriptor: Vec<f64>) -> zbus::Result<String>;

    async fn replace_photo(&self, employee_id: &str, descriptor: Vec<f64>) -> zbus::Result<String>;

    async fn mark(
        &self,
        employee_id: &str,
        descriptor: Vec<f64>,
        liveness: f64,
        kind: &str,
    ) -> zbus::Result<String>;

    async fn history(&self, employee_id: &str, limit: u32) -> zbus::Result<String>;

    async fn stats(&self, employee_id: &str) -> zbus::Result<String>;

    async fn attendance_log(&self, date: &str, limit: u32) -> zbus::Result<String>;

    async fn list_employees(&self) -> zbus::Result<String>;

    async fn remove_employee(&self, employee_id: &str) -> zbus::Result<bool>;

    async fn status(&self) -> zbus::Result<String>;
}
