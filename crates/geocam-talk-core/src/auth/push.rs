/// Hook fired once a login has produced a session.
///
/// Called after the session becomes active. An error is logged by the
/// client and otherwise ignored, so implementations that do slow work
/// should spawn it themselves.
pub trait PushRegistrar: Send + Sync {
    fn register(&self) -> anyhow::Result<()>;
}

/// Registrar for deployments without push notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

impl PushRegistrar for NoopRegistrar {
    fn register(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
