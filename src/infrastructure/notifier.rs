use crate::domain::PrincipalId;
use crate::domain::ports::Notifier;
use async_trait::async_trait;
use tracing::info;

/// Notifier that only writes to the log.
///
/// Stands in for the messaging collaborator when none is wired up.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_principal(&self, principal: PrincipalId, message: &str) {
        info!(principal, message, "principal notification");
    }

    async fn notify_operator(&self, message: &str) {
        info!(message, "operator notification");
    }
}
