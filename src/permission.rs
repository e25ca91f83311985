use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Camera permission check supplied by the host platform
#[async_trait]
pub trait PermissionOracle: Send + Sync + 'static {
    /// Whether camera access is currently granted
    fn has_permission(&self) -> bool;

    /// Ask the user for camera access; resolves once they answer
    async fn request_permission(&self) -> bool;
}

/// Oracle with a fixed answer, optionally granted only after being asked
#[derive(Debug)]
pub struct StaticPermission {
    granted: AtomicBool,
    grant_on_request: bool,
    response_delay: Duration,
    requests: AtomicUsize,
}

impl StaticPermission {
    /// Permission already held
    pub fn granted() -> Self {
        Self::new(true, true)
    }

    /// Permission not held and refused when asked
    pub fn denied() -> Self {
        Self::new(false, false)
    }

    /// Permission not held but granted when asked
    pub fn grant_on_request() -> Self {
        Self::new(false, true)
    }

    fn new(granted: bool, grant_on_request: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
            grant_on_request,
            response_delay: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    /// Simulate the user taking a while to answer the prompt
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Number of prompts that have been issued
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionOracle for StaticPermission {
    fn has_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_permission(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.has_permission() {
            return true;
        }

        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        if self.grant_on_request {
            self.granted.store(true, Ordering::SeqCst);
        }
        self.grant_on_request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_permission_answers() {
        let granted = StaticPermission::granted();
        assert!(granted.has_permission());
        assert!(granted.request_permission().await);

        let denied = StaticPermission::denied();
        assert!(!denied.has_permission());
        assert!(!denied.request_permission().await);
        assert!(!denied.has_permission());
        assert_eq!(denied.request_count(), 1);

        let prompt = StaticPermission::grant_on_request();
        assert!(!prompt.has_permission());
        assert!(prompt.request_permission().await);
        assert!(prompt.has_permission());
    }
}
