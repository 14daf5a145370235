use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::Pipeline;

/// Runs a cycle, then sleeps `every`, until `cancel` fires. A cycle in flight always runs to
/// completion; a failed cycle is logged and the loop carries on.
pub async fn run_loop(pipeline: Arc<Pipeline>, every: Duration, cancel: CancellationToken) {
    info!(every_secs = every.as_secs(), "scheduler started");
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match pipeline.run_once(false, None).await {
            Ok(run) => info!(
                scoring = run.scoring,
                llm_draft = run.llm_draft,
                publish = run.publish,
                "scheduled cycle done"
            ),
            Err(e) => error!(error = %e, "scheduled cycle failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(every) => {}
        }
    }
    info!("scheduler stopped");
}

/// Cancels `cancel` on Ctrl-C or, on unix, SIGTERM.
pub fn cancel_on_shutdown(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c() => info!("interrupt received, finishing current cycle"),
            _ = terminate() => info!("terminate received, finishing current cycle"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    })
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatBackend;
    use crate::config::Config;
    use crate::context::AppContext;
    use crate::db::Repository;
    use crate::error::{AppError, Result};
    use crate::scoring::RuleSet;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl ChatBackend for Offline {
        fn model(&self) -> &str {
            "offline"
        }

        async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
            Err(AppError::LlmResponse("offline".into()))
        }
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        let ctx = AppContext::with_parts(
            Config::default(),
            repo,
            None,
            Arc::new(Offline),
            Vec::new(),
            RuleSet::defaults().unwrap(),
        );
        let pipeline = Arc::new(Pipeline::new(Arc::new(ctx)));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_loop(pipeline, Duration::from_secs(3600), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
