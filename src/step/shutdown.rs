//! Shutdown step.
//!
//! Stops the VM once provisioning is done and waits until the driver reports
//! it stopped. Three stages run in order, each able to halt the step:
//!
//! 1. initiate: in-guest command, driver stop, or nothing (disabled)
//! 2. await_stopped: poll the driver until stopped or the timeout expires
//! 3. settle: optional grace delay so backend locks can clear
//!
//! Every wait races the context's cancellation token.

use super::{Step, StepAction};
use crate::communicator::{Communicator, RemoteCmd};
use crate::config::{ShutdownMode, StepConfig, VmId};
use crate::driver::Driver;
use crate::error::{Error, ShutdownError};
use crate::ui::Ui;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval between running-state queries.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Collaborators borrowed by the shutdown step for one run.
pub struct ShutdownContext<'a> {
    /// Channel into the guest. Only needed for a graceful shutdown.
    pub communicator: Option<&'a dyn Communicator>,
    /// Virtualization backend.
    pub driver: &'a dyn Driver,
    /// Operator output.
    pub ui: &'a dyn Ui,
    /// The VM to shut down.
    pub vm_id: &'a VmId,
    /// Cancellation requested by the pipeline.
    pub cancel: CancellationToken,
}

impl<'a> ShutdownContext<'a> {
    /// Create a context without a communicator and with a fresh token.
    pub fn new(driver: &'a dyn Driver, ui: &'a dyn Ui, vm_id: &'a VmId) -> Self {
        Self {
            communicator: None,
            driver,
            ui,
            vm_id,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the channel used to run the shutdown command.
    pub fn with_communicator(mut self, communicator: &'a dyn Communicator) -> Self {
        self.communicator = Some(communicator);
        self
    }

    /// Use the pipeline's cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Shuts the VM down and waits for it to stop.
#[derive(Debug, Clone)]
pub struct ShutdownStep {
    mode: ShutdownMode,
    timeout: Duration,
    post_stop_delay: Duration,
}

impl ShutdownStep {
    /// Create the step from its configuration.
    pub fn new(config: &StepConfig) -> Self {
        Self {
            mode: config.mode(),
            timeout: config.timeout,
            post_stop_delay: config.post_stop_delay,
        }
    }

    /// The shutdown channel selected at construction.
    pub fn mode(&self) -> &ShutdownMode {
        &self.mode
    }

    /// Ask the VM to stop through the configured channel.
    pub async fn initiate(&self, ctx: &ShutdownContext<'_>) -> Result<(), ShutdownError> {
        match &self.mode {
            ShutdownMode::Disabled => {
                ctx.ui
                    .say("Automatic shutdown disabled. Please shutdown virtual machine.");
                Ok(())
            }
            ShutdownMode::GracefulCommand(command) => {
                ctx.ui.say("Gracefully halting virtual machine...");
                tracing::debug!(vm = %ctx.vm_id, command = %command, "executing shutdown command");

                let comm = ctx.communicator.ok_or_else(|| {
                    ShutdownError::CommandFailed(Error::communicator("no communicator available"))
                })?;
                let cmd = RemoteCmd::new(command.as_str());

                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(ShutdownError::Cancelled),
                    result = cmd.run_with_ui(comm, ctx.ui) => {
                        result.map_err(ShutdownError::CommandFailed)
                    }
                }
            }
            ShutdownMode::ForcedStop => {
                ctx.ui.say("Halting the virtual machine...");
                ctx.driver
                    .stop(ctx.vm_id)
                    .await
                    .map_err(ShutdownError::DriverStopFailed)
            }
        }
    }

    /// Poll the driver until the VM stops or `timeout` elapses.
    ///
    /// A failed query counts as "still running"; only the deadline ends the
    /// wait with an error.
    pub async fn await_stopped(
        &self,
        ctx: &ShutdownContext<'_>,
        timeout: Duration,
    ) -> Result<(), ShutdownError> {
        tracing::debug!(
            vm = %ctx.vm_id,
            timeout = %humantime::format_duration(timeout),
            "waiting for shutdown to complete"
        );
        let deadline = Instant::now() + timeout;

        loop {
            let running = match ctx.driver.is_running(ctx.vm_id).await {
                Ok(running) => running,
                Err(e) => {
                    tracing::debug!(vm = %ctx.vm_id, error = %e, "running-state query failed");
                    true
                }
            };
            if !running {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ShutdownError::Timeout(timeout));
            }

            // Last sleep is cut short so the final check lands on the deadline
            let wake = (now + POLL_INTERVAL).min(deadline);
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ShutdownError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Wait `delay` after the stop.
    ///
    /// Only a cancel that interrupts the wait is an error; a zero delay never
    /// looks at the token.
    pub async fn settle(
        &self,
        ctx: &ShutdownContext<'_>,
        delay: Duration,
    ) -> Result<(), ShutdownError> {
        if delay.is_zero() {
            return Ok(());
        }
        tracing::debug!(
            vm = %ctx.vm_id,
            delay = %humantime::format_duration(delay),
            "delaying after shutdown to allow locks to clear"
        );
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ShutdownError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn execute(&self, ctx: &ShutdownContext<'_>) -> Result<(), ShutdownError> {
        self.initiate(ctx).await?;
        self.await_stopped(ctx, self.timeout).await?;
        self.settle(ctx, self.post_stop_delay).await
    }
}

#[async_trait]
impl<'a> Step<ShutdownContext<'a>> for ShutdownStep {
    fn name(&self) -> &str {
        "shutdown"
    }

    async fn run(&self, ctx: &ShutdownContext<'a>) -> StepAction {
        tracing::debug!(vm = %ctx.vm_id, mode = %self.mode, "running shutdown step");

        match self.execute(ctx).await {
            Ok(()) => {
                tracing::info!(vm = %ctx.vm_id, "vm shut down");
                StepAction::Continue
            }
            Err(e) => {
                tracing::error!(vm = %ctx.vm_id, kind = e.kind(), error = %e, "shutdown step halted");
                ctx.ui.error(&e.to_string());
                StepAction::Halt(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::MemoryUi;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Driver that reports running for the first `running_polls` queries.
    struct CountingDriver {
        running_polls: usize,
        polls: AtomicUsize,
        stops: AtomicUsize,
    }

    impl CountingDriver {
        fn new(running_polls: usize) -> Self {
            Self {
                running_polls,
                polls: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Driver for CountingDriver {
        async fn stop(&self, _id: &VmId) -> crate::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_running(&self, _id: &VmId) -> crate::Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(n < self.running_polls)
        }
    }

    fn step(config: StepConfig) -> ShutdownStep {
        ShutdownStep::new(&config)
    }

    /// Paused-clock timers fire on millisecond ticks.
    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cadence() {
        let driver = CountingDriver::new(3);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let ctx = ShutdownContext::new(&driver, &ui, &id);

        let start = Instant::now();
        step(StepConfig::default())
            .await_stopped(&ctx, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(driver.polls.load(Ordering::SeqCst), 4);
        assert_elapsed(start, POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_check_lands_on_deadline() {
        let driver = CountingDriver::new(usize::MAX);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let ctx = ShutdownContext::new(&driver, &ui, &id);

        let start = Instant::now();
        let err = step(StepConfig::default())
            .await_stopped(&ctx, Duration::from_millis(1200))
            .await
            .unwrap_err();

        assert!(matches!(err, ShutdownError::Timeout(_)));
        assert_elapsed(start, Duration::from_millis(1200));
        // 0ms, 500ms, 1000ms, 1200ms
        assert_eq!(driver.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_checks_once() {
        let driver = CountingDriver::new(usize::MAX);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let ctx = ShutdownContext::new(&driver, &ui, &id);

        let err = step(StepConfig::default())
            .await_stopped(&ctx, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, ShutdownError::Timeout(_)));
        assert_eq!(driver.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_waits_exactly_delay() {
        let driver = CountingDriver::new(0);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let ctx = ShutdownContext::new(&driver, &ui, &id);
        let step = step(StepConfig::default());

        let start = Instant::now();
        step.settle(&ctx, Duration::from_secs(3)).await.unwrap();
        assert_elapsed(start, Duration::from_secs(3));

        let start = Instant::now();
        step.settle(&ctx, Duration::ZERO).await.unwrap();
        assert_elapsed(start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_zero_delay_ignores_cancelled_token() {
        let driver = CountingDriver::new(0);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = ShutdownContext::new(&driver, &ui, &id).with_cancel(cancel);
        let step = step(StepConfig::default());

        assert!(step.settle(&ctx, Duration::ZERO).await.is_ok());
        assert!(matches!(
            step.settle(&ctx, Duration::from_secs(1)).await,
            Err(ShutdownError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_graceful_without_communicator_fails() {
        let driver = CountingDriver::new(0);
        let ui = MemoryUi::new();
        let id = VmId::new("vm");
        let ctx = ShutdownContext::new(&driver, &ui, &id);

        let step = step(StepConfig {
            shutdown_command: Some("poweroff".into()),
            ..Default::default()
        });
        let err = step.initiate(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ShutdownError::CommandFailed(Error::Communicator(_))
        ));
        assert_eq!(driver.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_step_name_and_mode() {
        let step = step(StepConfig {
            disable_shutdown: true,
            ..Default::default()
        });
        assert_eq!(Step::<ShutdownContext<'static>>::name(&step), "shutdown");
        assert_eq!(step.mode(), &ShutdownMode::Disabled);
    }
}
