//! Suspend-and-resume primitive for decision points.
//!
//! A decision job that cannot answer itself builds a `Decision` and returns
//! it to the scheduler. Someone else (the admin API) later calls
//! [`Decision::resolve`] with the position of a choice; the package's
//! execution unit, blocked in [`Decision::wait`], wakes up, applies the job's
//! side effects through its [`Decider`], and resumes at the chosen link.

use std::future::Future;
use std::pin::Pin;

use ccp_types::decision::{ChoiceSummary, DecisionSummary};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::package::PackageInfo;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision is not pending resolution")]
    AlreadyResolved,

    #[error("unavailable choice: {0}")]
    UnavailableChoice(usize),

    #[error("decision cancelled")]
    Cancelled,

    #[error("apply decision: {0}")]
    Decide(String),
}

// ---------------------------------------------------------------------------
// Choice
// ---------------------------------------------------------------------------

/// One selectable answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    /// Key/value written by the decider, if any. Empty strings otherwise.
    pub value: (String, String),
    /// Chain or link to resume at. `None` ends the chain.
    pub next_link: Option<Uuid>,
}

impl Choice {
    pub fn new(label: impl Into<String>, next_link: Option<Uuid>) -> Self {
        Self {
            label: label.into(),
            value: (String::new(), String::new()),
            next_link,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.value = (key.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Decider
// ---------------------------------------------------------------------------

/// Side effects a decision job applies once its decision resolves.
///
/// Object-safe with boxed futures so decisions of every job kind share one
/// type.
pub trait Decider: Send + Sync {
    fn decide<'a>(
        &'a self,
        choice: &'a Choice,
    ) -> Pin<Box<dyn Future<Output = Result<(), DecisionError>> + Send + 'a>>;
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

pub struct Decision {
    id: Uuid,
    name: String,
    package: PackageInfo,
    job_id: Uuid,
    choices: Vec<Choice>,
    /// Holds the chosen position once resolved. A watch channel retains the
    /// value, so a resolution that lands before anyone waits is kept.
    resolution: watch::Sender<Option<usize>>,
    /// Taken on first wait so side effects run once.
    decider: Mutex<Option<Box<dyn Decider>>>,
}

impl std::fmt::Debug for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decision")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("package_id", &self.package.id)
            .field("job_id", &self.job_id)
            .field("choices", &self.choices)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl Decision {
    pub fn new(
        name: impl Into<String>,
        package: PackageInfo,
        job_id: Uuid,
        choices: Vec<Choice>,
        decider: Box<dyn Decider>,
    ) -> Self {
        let (resolution, _) = watch::channel(None);
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            package,
            job_id,
            choices,
            resolution,
            decider: Mutex::new(Some(decider)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn package(&self) -> &PackageInfo {
        &self.package
    }

    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.borrow().is_some()
    }

    /// Pick the choice at `position`. Only the first valid call succeeds.
    pub fn resolve(&self, position: usize) -> Result<(), DecisionError> {
        if position >= self.choices.len() {
            return Err(DecisionError::UnavailableChoice(position));
        }
        let accepted = self.resolution.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(position);
            true
        });
        if accepted {
            Ok(())
        } else {
            Err(DecisionError::AlreadyResolved)
        }
    }

    /// Block until the decision resolves or `cancel` fires, apply the job's
    /// side effects and return the link to resume at.
    ///
    /// Waiting again after resolution returns the same link without applying
    /// the side effects twice. A decider that fails is kept and retried by
    /// the next wait.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<Option<Uuid>, DecisionError> {
        let mut rx = self.resolution.subscribe();
        let position = tokio::select! {
            _ = cancel.cancelled() => return Err(DecisionError::Cancelled),
            res = rx.wait_for(Option::is_some) => {
                res.map(|value| *value).map_err(|_| DecisionError::Cancelled)?
            }
        };
        let position = position.ok_or(DecisionError::Cancelled)?;
        let choice = self
            .choices
            .get(position)
            .ok_or(DecisionError::UnavailableChoice(position))?;

        let mut decider = self.decider.lock().await;
        if let Some(d) = decider.as_ref() {
            d.decide(choice).await?;
            decider.take();
        }

        Ok(choice.next_link)
    }

    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary {
            id: self.id,
            name: self.name.clone(),
            choices: self
                .choices
                .iter()
                .enumerate()
                .map(|(id, choice)| ChoiceSummary {
                    id,
                    label: choice.label.clone(),
                })
                .collect(),
            package_id: self.package.id,
            package_path: self.package.path.clone(),
            package_type: self.package.package_type,
            job_id: self.job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use ccp_types::package::PackageType;

    use super::*;

    struct CountingDecider(Arc<AtomicUsize>);

    impl Decider for CountingDecider {
        fn decide<'a>(
            &'a self,
            _choice: &'a Choice,
        ) -> Pin<Box<dyn Future<Output = Result<(), DecisionError>> + Send + 'a>> {
            Box::pin(async move {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    /// Fails its first call, then counts successful ones.
    struct FlakyDecider {
        attempts: AtomicUsize,
        applied: Arc<AtomicUsize>,
    }

    impl Decider for FlakyDecider {
        fn decide<'a>(
            &'a self,
            _choice: &'a Choice,
        ) -> Pin<Box<dyn Future<Output = Result<(), DecisionError>> + Send + 'a>> {
            Box::pin(async move {
                if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(DecisionError::Decide("store unavailable".to_string()));
                }
                self.applied.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    fn decision(calls: Arc<AtomicUsize>) -> (Decision, Uuid, Uuid) {
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let package = PackageInfo {
            id: Uuid::now_v7(),
            name: "Images".to_string(),
            path: "/shared/Images/".to_string(),
            package_type: PackageType::Transfer,
        };
        let d = Decision::new(
            "Approve standard transfer",
            package,
            Uuid::now_v7(),
            vec![Choice::new("Approve", Some(first)), Choice::new("Reject", Some(second))],
            Box::new(CountingDecider(calls)),
        );
        (d, first, second)
    }

    #[tokio::test]
    async fn test_resolution_before_wait_is_kept() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (d, _, second) = decision(calls.clone());
        d.resolve(1).unwrap();
        let next = d.wait(&CancellationToken::new()).await.unwrap();
        assert_eq!(next, Some(second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_resolve_fails_and_keeps_first_choice() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (d, first, _) = decision(calls.clone());
        d.resolve(0).unwrap();
        let err = d.resolve(1).unwrap_err();
        assert!(matches!(err, DecisionError::AlreadyResolved));
        assert_eq!(err.to_string(), "decision is not pending resolution");

        let token = CancellationToken::new();
        assert_eq!(d.wait(&token).await.unwrap(), Some(first));
        assert_eq!(d.wait(&token).await.unwrap(), Some(first));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_decider_is_retried_on_next_wait() {
        let applied = Arc::new(AtomicUsize::new(0));
        let next = Uuid::now_v7();
        let package = PackageInfo {
            id: Uuid::now_v7(),
            name: "Images".to_string(),
            path: "/shared/Images/".to_string(),
            package_type: PackageType::Sip,
        };
        let d = Decision::new(
            "Store AIP location",
            package,
            Uuid::now_v7(),
            vec![Choice::new("Default location", Some(next))],
            Box::new(FlakyDecider {
                attempts: AtomicUsize::new(0),
                applied: applied.clone(),
            }),
        );
        d.resolve(0).unwrap();

        let token = CancellationToken::new();
        assert!(matches!(d.wait(&token).await, Err(DecisionError::Decide(_))));
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        assert_eq!(d.wait(&token).await.unwrap(), Some(next));
        assert_eq!(d.wait(&token).await.unwrap(), Some(next));
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_choice_is_rejected() {
        let (d, _, _) = decision(Arc::new(AtomicUsize::new(0)));
        assert!(matches!(d.resolve(7), Err(DecisionError::UnavailableChoice(7))));
        assert!(!d.is_resolved());
        d.resolve(0).unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_on_concurrent_resolve() {
        let (d, first, _) = decision(Arc::new(AtomicUsize::new(0)));
        let d = Arc::new(d);
        let waiter = {
            let d = d.clone();
            tokio::spawn(async move { d.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        d.resolve(0).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let (d, _, _) = decision(Arc::new(AtomicUsize::new(0)));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(d.wait(&token).await, Err(DecisionError::Cancelled)));
    }

    #[test]
    fn test_summary() {
        let (d, _, _) = decision(Arc::new(AtomicUsize::new(0)));
        let summary = d.summary();
        assert_eq!(summary.choices.len(), 2);
        assert_eq!(summary.choices[1].label, "Reject");
        assert_eq!(summary.package_type, PackageType::Transfer);
    }
}
